//! RFC 9110/9112 compliant HTTP/1.1 client implementation.
//!
//! Uses httparse for response parsing and raw I/O for maximum control
//! over request formatting and header order. Bodies are pulled
//! incrementally through [`BodyFraming`] so responses can stream.

use std::future::poll_fn;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use http::Method;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::timeouts::{read_within, write_within, Timeouts};
use crate::transport::connector::MaybeHttpsStream;
use crate::transport::{ResponseHead, WireRequest};

/// Maximum response header size (64KB).
const MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

/// Longest chunk-size line we tolerate (size plus extensions).
const MAX_CHUNK_LINE: usize = 4096;

/// Request bodies are written in slices of this size, each under the write timeout.
const WRITE_SLICE: usize = 16 * 1024;

const READ_CHUNK: usize = 8192;

/// How the response body is delimited, and how far we are through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// Fixed length: bytes still to read.
    Length(u64),
    Chunked(ChunkState),
    /// Delimited by connection close.
    UntilClose,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Size,
    Data(u64),
    DataCrlf,
    Trailers,
}

impl BodyFraming {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// HTTP/1.1 connection for sending requests.
#[derive(Debug)]
pub struct H1Connection {
    stream: MaybeHttpsStream,
    /// Bytes received but not yet consumed.
    read_buf: BytesMut,
    /// Send absolute-form targets (plain HTTP via an HTTP proxy).
    absolute_form: bool,
    /// Whether the connection should be closed after the current response.
    should_close: bool,
}

impl H1Connection {
    /// Create a new HTTP/1.1 connection from an existing stream.
    pub fn new(stream: MaybeHttpsStream, absolute_form: bool) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            absolute_form,
            should_close: false,
        }
    }

    /// Check if the connection should be closed (not reusable).
    pub fn should_close(&self) -> bool {
        self.should_close
    }

    /// Reusable once the previous body was read to its end.
    pub fn is_reusable(&self, framing: &BodyFraming) -> bool {
        !self.should_close && framing.is_done() && self.read_buf.is_empty()
    }

    /// Check an idle connection: a pending read means the peer is still there.
    /// EOF, an error, or unsolicited bytes all mean the connection is unusable.
    pub async fn is_alive(&mut self) -> bool {
        if self.should_close || !self.read_buf.is_empty() {
            return false;
        }
        let mut peek = [0u8; 1];
        let stream = &mut self.stream;
        poll_fn(|cx| {
            let mut buf = ReadBuf::new(&mut peek);
            Poll::Ready(matches!(
                Pin::new(&mut *stream).poll_read(cx, &mut buf),
                Poll::Pending
            ))
        })
        .await
    }

    /// Write the request and read the response head.
    ///
    /// The body is left on the wire; pull it with [`Self::read_body_chunk`].
    pub async fn send_request(
        &mut self,
        req: &WireRequest,
        timeouts: &Timeouts,
    ) -> Result<(ResponseHead, BodyFraming)> {
        let head = encode_request_head(req, self.absolute_form)?;
        self.write_all(&head, timeouts.write).await?;
        if let Some(body) = req.body.as_ref().filter(|b| !b.is_empty()) {
            self.write_all(body, timeouts.write).await?;
        }
        write_within(timeouts.write, async {
            self.stream.flush().await.map_err(|e| Error::from_write_io(&e))
        })
        .await?;

        self.read_response_head(&req.method, timeouts.read).await
    }

    async fn write_all(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
        for slice in data.chunks(WRITE_SLICE) {
            let stream = &mut self.stream;
            write_within(timeout, async move {
                stream.write_all(slice).await.map_err(|e| Error::from_write_io(&e))
            })
            .await?;
        }
        Ok(())
    }

    /// Read until enough bytes are buffered, under the read timeout.
    async fn fill_buf(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let stream = &mut self.stream;
        let buf = &mut self.read_buf;
        buf.reserve(READ_CHUNK);
        read_within(timeout, async move {
            stream.read_buf(buf).await.map_err(|e| Error::from_read_io(&e))
        })
        .await
    }

    /// Read and parse the response head.
    ///
    /// Per RFC 9112 Section 6, 1xx informational responses are consumed
    /// until a final (2xx-5xx) response is received.
    async fn read_response_head(
        &mut self,
        method: &Method,
        timeout: Option<Duration>,
    ) -> Result<(ResponseHead, BodyFraming)> {
        loop {
            let parsed = {
                let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
                let mut response = httparse::Response::new(&mut headers);
                match response.parse(&self.read_buf) {
                    Ok(httparse::Status::Complete(len)) => {
                        let status = response
                            .code
                            .ok_or_else(|| Error::remote_protocol("Missing status code"))?;
                        let mut collected = Headers::new();
                        for h in response.headers.iter().filter(|h| !h.name.is_empty()) {
                            collected.append(h.name, String::from_utf8_lossy(h.value).into_owned());
                        }
                        Some((len, status, response.version.unwrap_or(1), collected))
                    }
                    Ok(httparse::Status::Partial) => None,
                    Err(e) => {
                        return Err(Error::remote_protocol(format!(
                            "Failed to parse response: {}",
                            e
                        )))
                    }
                }
            };

            let Some((len, status, minor, headers)) = parsed else {
                if self.read_buf.len() >= MAX_HEADERS_SIZE {
                    return Err(Error::remote_protocol("Response headers too large"));
                }
                if self.fill_buf(timeout).await? == 0 {
                    self.should_close = true;
                    return Err(Error::remote_protocol(
                        "Server disconnected without sending a complete response",
                    ));
                }
                continue;
            };
            self.read_buf.advance(len);

            if (100..200).contains(&status) {
                tracing::trace!("H1: skipping informational {} response", status);
                continue;
            }

            let framing = self.framing_for(status, minor, method, &headers)?;
            return Ok((ResponseHead { status, headers }, framing));
        }
    }

    /// Decide body framing per RFC 9112 Section 6.3.
    fn framing_for(
        &mut self,
        status: u16,
        minor_version: u8,
        method: &Method,
        headers: &Headers,
    ) -> Result<BodyFraming> {
        let connection = headers.get("connection").map(str::to_ascii_lowercase);
        if connection.as_deref().is_some_and(|c| c.contains("close")) {
            self.should_close = true;
        }
        if minor_version == 0 && !connection.as_deref().is_some_and(|c| c.contains("keep-alive")) {
            self.should_close = true;
        }

        // HEAD responses and 1xx/204/304 never carry a body
        if *method == Method::HEAD || matches!(status, 204 | 304) {
            return Ok(BodyFraming::Done);
        }

        if let Some(te) = headers.get("transfer-encoding") {
            // Chunked must be the final transfer coding
            let chunked = te
                .split(',')
                .next_back()
                .is_some_and(|s| s.trim().eq_ignore_ascii_case("chunked"));
            if chunked {
                return Ok(BodyFraming::Chunked(ChunkState::Size));
            }
            self.should_close = true;
            return Ok(BodyFraming::UntilClose);
        }

        if let Some(cl) = headers.get("content-length") {
            return Ok(match parse_content_length(cl)? {
                0 => BodyFraming::Done,
                n => BodyFraming::Length(n),
            });
        }

        self.should_close = true;
        Ok(BodyFraming::UntilClose)
    }

    /// Pull the next piece of the response body. `Ok(None)` marks the end.
    pub async fn read_body_chunk(
        &mut self,
        framing: &mut BodyFraming,
        timeout: Option<Duration>,
    ) -> Result<Option<Bytes>> {
        loop {
            match *framing {
                BodyFraming::Done => return Ok(None),
                BodyFraming::Length(remaining) => {
                    if self.read_buf.is_empty() && self.fill_buf(timeout).await? == 0 {
                        self.should_close = true;
                        return Err(Error::remote_protocol(format!(
                            "Connection closed before receiving full body ({} bytes missing)",
                            remaining
                        )));
                    }
                    let chunk = self.take_up_to(remaining);
                    let left = remaining - chunk.len() as u64;
                    *framing = if left == 0 {
                        BodyFraming::Done
                    } else {
                        BodyFraming::Length(left)
                    };
                    return Ok(Some(chunk));
                }
                BodyFraming::UntilClose => {
                    if self.read_buf.is_empty() && self.fill_buf(timeout).await? == 0 {
                        *framing = BodyFraming::Done;
                        return Ok(None);
                    }
                    return Ok(Some(self.read_buf.split().freeze()));
                }
                BodyFraming::Chunked(state) => {
                    if let Some(chunk) = self.step_chunked(framing, state, timeout).await? {
                        return Ok(Some(chunk));
                    }
                }
            }
        }
    }

    /// Advance the chunked decoder by one state. Returns data when a chunk
    /// payload was read; `None` means "keep going".
    async fn step_chunked(
        &mut self,
        framing: &mut BodyFraming,
        state: ChunkState,
        timeout: Option<Duration>,
    ) -> Result<Option<Bytes>> {
        match state {
            ChunkState::Size => match find_crlf(&self.read_buf) {
                Some(pos) => {
                    let size = parse_chunk_size(&self.read_buf[..pos])?;
                    self.read_buf.advance(pos + 2);
                    *framing = BodyFraming::Chunked(if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data(size)
                    });
                }
                None => {
                    if self.read_buf.len() > MAX_CHUNK_LINE {
                        return Err(Error::remote_protocol("Chunk size line too long"));
                    }
                    self.fill_or_eof(timeout, "chunk size").await?;
                }
            },
            ChunkState::Data(remaining) => {
                if self.read_buf.is_empty() {
                    self.fill_or_eof(timeout, "chunk data").await?;
                }
                let chunk = self.take_up_to(remaining);
                let left = remaining - chunk.len() as u64;
                *framing = BodyFraming::Chunked(if left == 0 {
                    ChunkState::DataCrlf
                } else {
                    ChunkState::Data(left)
                });
                return Ok(Some(chunk));
            }
            ChunkState::DataCrlf => {
                if self.read_buf.len() < 2 {
                    self.fill_or_eof(timeout, "chunk terminator").await?;
                    return Ok(None);
                }
                if &self.read_buf[..2] != b"\r\n" {
                    return Err(Error::remote_protocol("Missing CRLF after chunk data"));
                }
                self.read_buf.advance(2);
                *framing = BodyFraming::Chunked(ChunkState::Size);
            }
            // trailer-section = *( field-line CRLF ) CRLF; trailers are discarded
            ChunkState::Trailers => match find_crlf(&self.read_buf) {
                Some(0) => {
                    self.read_buf.advance(2);
                    *framing = BodyFraming::Done;
                }
                Some(pos) => self.read_buf.advance(pos + 2),
                None => {
                    if self.fill_buf(timeout).await? == 0 {
                        // Peer closed after the last chunk; body is complete.
                        self.should_close = true;
                        *framing = BodyFraming::Done;
                    }
                }
            },
        }
        Ok(None)
    }

    async fn fill_or_eof(&mut self, timeout: Option<Duration>, what: &str) -> Result<()> {
        if self.fill_buf(timeout).await? == 0 {
            self.should_close = true;
            return Err(Error::remote_protocol(format!(
                "Connection closed while reading {}",
                what
            )));
        }
        Ok(())
    }

    fn take_up_to(&mut self, limit: u64) -> Bytes {
        let n = usize::try_from(limit).unwrap_or(usize::MAX).min(self.read_buf.len());
        self.read_buf.split_to(n).freeze()
    }

    /// Best-effort graceful shutdown.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| Error::Close(e.to_string()))
    }
}

/// Build the HTTP/1.1 request head as bytes.
///
/// Host comes first, then headers in profile order with their stored
/// casing, then the rest in insertion order.
fn encode_request_head(req: &WireRequest, absolute_form: bool) -> Result<Vec<u8>> {
    let mut request = Vec::with_capacity(1024);

    // Validate header names and values per RFC 9110
    for (name, value) in req.headers.iter() {
        validate_header_name(name)?;
        validate_header_value(value)?;
    }

    // Request line: METHOD request-target HTTP/1.1\r\n
    request.extend_from_slice(req.method.as_str().as_bytes());
    request.push(b' ');
    let target = if absolute_form {
        req.absolute_form()
    } else {
        req.origin_form()
    };
    request.extend_from_slice(target.as_bytes());
    request.extend_from_slice(b" HTTP/1.1\r\n");

    // Host header (required for HTTP/1.1 per RFC 9112 Section 3.2)
    let authority = req.authority();
    let (host_name, host_value) = req
        .headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("host"))
        .unwrap_or(("Host", authority.as_str()));
    push_header(&mut request, host_name, host_value);

    let mut has_connection_header = false;
    for (name, value) in req.headers.ordered(req.header_order) {
        if name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
        {
            continue;
        }
        if name.eq_ignore_ascii_case("connection") {
            has_connection_header = true;
        }
        push_header(&mut request, name, value);
    }

    // Add Connection: keep-alive if not explicitly set by user
    if !has_connection_header {
        push_header(&mut request, "Connection", "keep-alive");
    }

    // Bodies are always fixed-length
    let body_len = req.body.as_ref().map_or(0, Bytes::len);
    let needs_length = body_len > 0
        || matches!(req.method, Method::POST | Method::PUT | Method::PATCH);
    if needs_length {
        push_header(&mut request, "Content-Length", &body_len.to_string());
    }

    // End of headers
    request.extend_from_slice(b"\r\n");
    Ok(request)
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Parse a chunk-size line (without CRLF); extensions after `;` are ignored.
fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let line = std::str::from_utf8(line)
        .map_err(|_| Error::remote_protocol("Non-ASCII chunk size line"))?;
    let size = line.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size, 16)
        .map_err(|_| Error::remote_protocol(format!("Invalid chunk size: {:?}", size)))
}

/// Find the first CRLF in a buffer, returning its position.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Validate a header name per RFC 9110 Section 5.1.
///
/// Header names must be tokens: 1*tchar where tchar excludes
/// delimiters, control characters, and whitespace.
fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::local_protocol("Empty header name"));
    }
    if !name.bytes().all(is_tchar) {
        return Err(Error::local_protocol(format!(
            "Invalid character in header name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Check if a byte is a valid token character per RFC 9110.
fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}

/// Validate a header value per RFC 9110 Section 5.5.
///
/// Header values must not contain NUL, CR, or LF (prevents header injection).
fn validate_header_value(value: &str) -> Result<()> {
    if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::local_protocol(
            "Invalid character in header value (CR/LF/NUL not allowed)",
        ));
    }
    Ok(())
}

/// Parse and validate Content-Length header value per RFC 9112 Section 6.2.
///
/// If multiple values are present (comma-separated), they must all be identical.
fn parse_content_length(value: &str) -> Result<u64> {
    let mut parts = value.split(',').map(str::trim);
    let parse = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| Error::remote_protocol(format!("Invalid Content-Length: {}", value)))
    };

    let first = parse(parts.next().unwrap_or(""))?;
    for part in parts {
        if parse(part)? != first {
            return Err(Error::remote_protocol(format!(
                "Conflicting Content-Length values: {}",
                value
            )));
        }
    }
    Ok(first)
}
