//! Native HTTP/2 client using the h2 crate directly.
//!
//! The handshake carries the profile's SETTINGS values and connection
//! window, so the Akamai fingerprint matches the impersonated browser.
//! One [`H2Connection`] is cloned across every request multiplexed on it.

use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use h2::client::{Builder, SendRequest};
use h2::{RecvStream, SendStream};
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request, Uri};

use crate::error::{Error, Result};
use crate::fingerprint::http2::Http2Settings;
use crate::headers::{is_connection_specific, Headers};
use crate::timeouts::{read_within, write_within, Timeouts};
use crate::transport::connector::MaybeHttpsStream;
use crate::transport::{ResponseHead, WireRequest};

/// Shared handle to one HTTP/2 connection.
#[derive(Clone)]
pub struct H2Connection {
    /// Handle for sending requests (supports multiplexing via Clone)
    send_request: SendRequest<Bytes>,
    /// Cleared when the connection task exits.
    alive: Arc<AtomicBool>,
}

impl std::fmt::Debug for H2Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Connection")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Clears the liveness flag however the connection task ends, including
/// being dropped with its runtime.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl H2Connection {
    /// Perform the HTTP/2 handshake with the profile's SETTINGS and spawn
    /// the task that drives the connection.
    pub async fn handshake(stream: MaybeHttpsStream, settings: &Http2Settings) -> Result<Self> {
        let mut builder = Builder::new();
        builder
            .header_table_size(settings.header_table_size)
            .initial_window_size(settings.initial_window_size)
            .initial_connection_window_size(settings.connection_window_size)
            .max_frame_size(settings.max_frame_size)
            .enable_push(settings.enable_push);
        if let Some(max) = settings.max_header_list_size {
            builder.max_header_list_size(max);
        }
        if let Some(max) = settings.max_concurrent_streams {
            builder.max_concurrent_streams(max);
        }

        let (send_request, connection) = builder
            .handshake::<_, Bytes>(stream)
            .await
            .map_err(|e| Error::connect(format!("HTTP/2 handshake failed: {}", e)))?;

        let alive = Arc::new(AtomicBool::new(true));
        let flag = AliveGuard(alive.clone());
        // No I/O happens without this task
        tokio::spawn(async move {
            let _flag = flag;
            match connection.await {
                Ok(()) => tracing::debug!("H2: connection closed"),
                Err(e) => tracing::warn!("H2: connection error: {}", e),
            }
        });

        Ok(Self {
            send_request,
            alive,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Open a stream, send the request, and wait for the response head.
    pub async fn send_request(
        &self,
        req: &WireRequest,
        timeouts: &Timeouts,
    ) -> Result<(ResponseHead, RecvStream)> {
        let request = build_request(req)?;
        let body = req.body.clone().filter(|b| !b.is_empty());

        let mut sender = write_within(timeouts.write, async {
            self.send_request
                .clone()
                .ready()
                .await
                .map_err(|e| map_h2_error(e, true))
        })
        .await?;

        let (response_future, send_stream) = sender
            .send_request(request, body.is_none())
            .map_err(|e| map_h2_error(e, true))?;

        if let Some(body) = body {
            send_body(send_stream, body, timeouts.write).await?;
        }

        let response = read_within(timeouts.read, async {
            response_future.await.map_err(|e| map_h2_error(e, false))
        })
        .await?;

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Ok((ResponseHead { status, headers }, response.into_body()))
    }
}

/// Send the request body, respecting stream flow control.
async fn send_body(mut stream: SendStream<Bytes>, mut body: Bytes, timeout: Option<Duration>) -> Result<()> {
    while !body.is_empty() {
        stream.reserve_capacity(body.len());
        let capacity = write_within(timeout, async {
            match poll_fn(|cx| stream.poll_capacity(cx)).await {
                Some(Ok(n)) => Ok(n),
                Some(Err(e)) => Err(map_h2_error(e, true)),
                None => Err(Error::write("HTTP/2 stream closed while sending body")),
            }
        })
        .await?;
        if capacity == 0 {
            continue;
        }
        let chunk = body.split_to(capacity.min(body.len()));
        stream
            .send_data(chunk, body.is_empty())
            .map_err(|e| map_h2_error(e, true))?;
    }
    Ok(())
}

/// Pull the next DATA frame, releasing its flow-control capacity.
pub async fn next_chunk(recv: &mut RecvStream, timeout: Option<Duration>) -> Result<Option<Bytes>> {
    let next = read_within(timeout, async { Ok(recv.data().await) }).await?;
    match next {
        Some(Ok(chunk)) => {
            let _ = recv.flow_control().release_capacity(chunk.len());
            Ok(Some(chunk))
        }
        Some(Err(e)) => Err(map_h2_error(e, false)),
        None => Ok(None),
    }
}

/// Build the `http::Request` h2 sends; pseudo-headers come from the URI.
fn build_request(req: &WireRequest) -> Result<Request<()>> {
    let uri: Uri = req
        .absolute_form()
        .parse()
        .map_err(|e| Error::InvalidUrl(format!("{}: {}", req.url, e)))?;

    let mut builder = Request::builder().method(req.method.clone()).uri(uri);
    for (name, value) in req.headers.ordered(req.header_order) {
        if is_connection_specific(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        let name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
            .map_err(|_| Error::local_protocol(format!("Invalid header name: {:?}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::local_protocol(format!("Invalid value for header {}", name)))?;
        builder = builder.header(name, value);
    }

    let body_len = req.body.as_ref().map_or(0, Bytes::len);
    if body_len > 0 || matches!(req.method, Method::POST | Method::PUT | Method::PATCH) {
        builder = builder.header(http::header::CONTENT_LENGTH, body_len);
    }

    builder
        .body(())
        .map_err(|e| Error::local_protocol(format!("Failed to build request: {}", e)))
}

fn map_h2_error(e: h2::Error, writing: bool) -> Error {
    if let Some(io) = e.get_io() {
        return if writing {
            Error::from_write_io(io)
        } else {
            Error::from_read_io(io)
        };
    }
    if e.is_remote() || e.is_go_away() {
        Error::remote_protocol(format!("HTTP/2: {}", e))
    } else {
        Error::local_protocol(format!("HTTP/2: {}", e))
    }
}
