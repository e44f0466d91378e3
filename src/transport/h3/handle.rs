//! HTTP/3 connection handle - non-blocking interface for sending requests.
//!
//! The handle sends commands to a driver task and receives responses via channels.
//! Clones share the same driver, which is what makes multiplexing work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::fingerprint::PseudoHeaderOrder;
use crate::headers::is_connection_specific;
use crate::timeouts::{read_within, write_within, Timeouts};
use crate::transport::h3::driver::{BodyReceiver, DriverCommand};
use crate::transport::{ResponseHead, WireRequest};

/// HTTP/3 connection handle for sending requests
#[derive(Clone)]
pub struct H3Handle {
    /// Channel for sending commands to the driver
    command_tx: mpsc::Sender<DriverCommand>,
    alive: Arc<AtomicBool>,
    pseudo_order: PseudoHeaderOrder,
}

impl std::fmt::Debug for H3Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H3Handle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl H3Handle {
    pub(crate) fn new(
        command_tx: mpsc::Sender<DriverCommand>,
        alive: Arc<AtomicBool>,
        pseudo_order: PseudoHeaderOrder,
    ) -> Self {
        Self {
            command_tx,
            alive,
            pseudo_order,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.command_tx.is_closed()
    }

    /// Send an HTTP/3 request and wait for the response head.
    /// Body chunks arrive on the returned receiver; it closes at end of stream.
    pub async fn send_request(
        &self,
        req: &WireRequest,
        timeouts: &Timeouts,
    ) -> Result<(ResponseHead, BodyReceiver)> {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();

        let command = DriverCommand::SendRequest {
            headers: build_headers(req, self.pseudo_order),
            body: req.body.clone(),
            head_tx,
            body_tx,
        };

        write_within(timeouts.write, async {
            self.command_tx
                .send(command)
                .await
                .map_err(|_| Error::write("HTTP/3 driver has shut down"))
        })
        .await?;

        let head = read_within(timeouts.read, async {
            head_rx
                .await
                .map_err(|_| Error::remote_protocol("HTTP/3 driver dropped the stream"))?
        })
        .await?;

        Ok((head, body_rx))
    }
}

/// Pseudo-headers in the profile's order, then regular headers lowercased.
fn build_headers(req: &WireRequest, order: PseudoHeaderOrder) -> Vec<quiche::h3::Header> {
    let method = req.method.as_str();
    let authority = req.authority();
    let path = req.origin_form();
    let scheme = req.url.scheme();

    let pseudo: [(&str, &str); 4] = match order {
        PseudoHeaderOrder::Chrome => [
            (":method", method),
            (":authority", &authority),
            (":scheme", scheme),
            (":path", path),
        ],
        PseudoHeaderOrder::Firefox => [
            (":method", method),
            (":path", path),
            (":authority", &authority),
            (":scheme", scheme),
        ],
    };

    let mut headers: Vec<quiche::h3::Header> = pseudo
        .iter()
        .map(|(name, value)| quiche::h3::Header::new(name.as_bytes(), value.as_bytes()))
        .collect();

    for (name, value) in req.headers.ordered(req.header_order) {
        if name.starts_with(':')
            || is_connection_specific(name)
            || name.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        headers.push(quiche::h3::Header::new(
            name.to_ascii_lowercase().as_bytes(),
            value.as_bytes(),
        ));
    }

    let body_len = req.body.as_ref().map_or(0, Bytes::len);
    if body_len > 0 || matches!(req.method, http::Method::POST | http::Method::PUT | http::Method::PATCH) {
        headers.push(quiche::h3::Header::new(
            b"content-length",
            body_len.to_string().as_bytes(),
        ));
    }
    headers
}
