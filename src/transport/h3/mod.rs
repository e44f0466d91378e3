//! HTTP/3 transport over QUIC (quiche on BoringSSL).
//!
//! [`H3Connection::connect`] performs the handshake and spawns a driver task
//! owning the socket; [`H3Handle`] clones talk to it over channels.

mod connection;
mod driver;
mod handle;

use std::time::Duration;

use bytes::Bytes;

pub use connection::{configure_quic, H3Connection};
pub use handle::H3Handle;

pub(crate) use driver::BodyReceiver;

use crate::error::Result;
use crate::timeouts::recv_with_read_timeout;

/// Pull the next body chunk from a streaming HTTP/3 response.
pub async fn next_chunk(rx: &mut BodyReceiver, timeout: Option<Duration>) -> Result<Option<Bytes>> {
    recv_with_read_timeout(rx, timeout).await?.transpose()
}
