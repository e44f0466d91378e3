//! Timeout configuration for HTTP requests.
//!
//! Four independent timeout classes, each raising its own error kind:
//!
//! - **connect**: DNS + TCP + proxy tunnel + TLS/QUIC handshake
//! - **read**: maximum gap between received bytes (resets on each chunk)
//! - **write**: maximum gap while sending the request (resets on each write)
//! - **pool**: time to wait for a pooled connection slot
//!
//! # Usage
//!
//! ```rust,ignore
//! use guise::{Client, Timeouts};
//! use std::time::Duration;
//!
//! // One value for every class
//! let client = Client::builder().timeout(10.0).build()?;
//!
//! // Granular
//! let client = Client::builder()
//!     .timeouts(Timeouts::new().connect(Duration::from_secs(5)).read(Duration::from_secs(60)))
//!     .build()?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default value for every timeout class.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout configuration for HTTP requests.
///
/// When a field is `None`, no timeout is applied for that phase.
///
/// # Timeout Semantics
///
/// - **connect**: Does NOT reset. Deadline for establishing the transport.
/// - **read**: RESETS on each chunk received. Detects hung responses.
/// - **write**: RESETS on each chunk sent. Detects hung uploads.
/// - **pool**: Does NOT reset. Time waiting for a pooled connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Timeout for establishing a connection.
    pub connect: Option<Duration>,

    /// Read timeout: maximum time waiting for the next piece of the response.
    ///
    /// Covers the wait for response headers as well as each body chunk.
    pub read: Option<Duration>,

    /// Write timeout: maximum time waiting to send the next piece of the request.
    pub write: Option<Duration>,

    /// Pool acquire timeout: time waiting for an available pooled connection.
    pub pool: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(Some(DEFAULT_TIMEOUT))
    }
}

impl Timeouts {
    /// Create a Timeouts with every class disabled.
    pub fn new() -> Self {
        Self::uniform(None)
    }

    /// Same value for every class.
    pub fn uniform(timeout: Option<Duration>) -> Self {
        Self {
            connect: timeout,
            read: timeout,
            write: timeout,
            pool: timeout,
        }
    }

    /// Build from float seconds. Non-finite or negative values are rejected.
    pub fn from_secs_f64(secs: f64) -> Result<Self> {
        Ok(Self::uniform(Some(duration_from_secs_f64(secs)?)))
    }

    /// Set connect timeout.
    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout);
        self
    }

    /// Set read timeout.
    pub fn read(mut self, timeout: Duration) -> Self {
        self.read = Some(timeout);
        self
    }

    /// Set write timeout.
    pub fn write(mut self, timeout: Duration) -> Self {
        self.write = Some(timeout);
        self
    }

    /// Set pool acquire timeout.
    pub fn pool(mut self, timeout: Duration) -> Self {
        self.pool = Some(timeout);
        self
    }

    /// Disable connect timeout.
    pub fn no_connect_timeout(mut self) -> Self {
        self.connect = None;
        self
    }

    /// Disable read timeout.
    pub fn no_read_timeout(mut self) -> Self {
        self.read = None;
        self
    }

    /// Disable write timeout.
    pub fn no_write_timeout(mut self) -> Self {
        self.write = None;
        self
    }

    /// Disable pool acquire timeout.
    pub fn no_pool_timeout(mut self) -> Self {
        self.pool = None;
        self
    }
}

pub(crate) fn duration_from_secs_f64(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::invalid_argument(format!("invalid timeout: {}", secs)))
}

/// Bound the connect phase.
pub(crate) async fn connect_within<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(t) => tokio::time::timeout(t, fut)
            .await
            .map_err(|_| Error::ConnectTimeout(t))?,
        None => fut.await,
    }
}

/// Bound one read step.
pub(crate) async fn read_within<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(t) => tokio::time::timeout(t, fut)
            .await
            .map_err(|_| Error::ReadTimeout(t))?,
        None => fut.await,
    }
}

/// Bound one write step.
pub(crate) async fn write_within<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(t) => tokio::time::timeout(t, fut)
            .await
            .map_err(|_| Error::WriteTimeout(t))?,
        None => fut.await,
    }
}

/// Receive from a channel with a read timeout.
///
/// The timeout resets on each successful receive, making it suitable for
/// detecting hung streams without killing healthy long-running transfers.
pub(crate) async fn recv_with_read_timeout<T>(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>,
    idle: Option<Duration>,
) -> Result<Option<T>> {
    match idle {
        Some(idle) => tokio::select! {
            biased;
            v = rx.recv() => Ok(v),
            _ = tokio::time::sleep(idle) => Err(Error::ReadTimeout(idle)),
        },
        None => Ok(rx.recv().await),
    }
}
