//! HTTP response with single-consumption body semantics.
//!
//! A body is read at most once: either buffered with [`Response::read`] or
//! streamed with [`Response::chunk`]. Content-Encoding is undone on the way
//! out in both cases. Once buffered, the bytes stay available through
//! [`Response::content`] even after [`Response::close`].

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use encoding_rs::Encoding;
use url::Url;

use crate::body::{BodySource, ContentDecoder};
use crate::error::{Error, Result};
use crate::headers::{charset_param, Headers};
use crate::transport::ResponseHead;
use crate::version::HttpVersion;

/// Bytes inspected when sniffing a document's declared charset.
const PRESCAN_LIMIT: usize = 1024;

/// Where a response body is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    /// Nothing read yet.
    Unread,
    /// Fully read into memory.
    Buffered,
    /// Being pulled chunk by chunk.
    Streaming,
    /// Streamed to the end.
    Consumed,
    /// Explicitly closed.
    Closed,
}

/// HTTP response.
#[derive(Debug)]
pub struct Response {
    status: u16,
    version: HttpVersion,
    headers: Headers,
    url: Option<Url>,
    history: Vec<Url>,
    /// Caller's choice, or the client's `default_encoding`.
    encoding_override: Option<String>,
    state: BodyState,
    stream_consumed: bool,
    content: Option<Bytes>,
    source: BodySource,
    decoder: Option<ContentDecoder>,
    read_timeout: Option<Duration>,
}

impl Response {
    /// Build an already-read response, e.g. for tests or cached data.
    pub fn new(status: u16, headers: Headers, content: impl Into<Bytes>) -> Self {
        Self {
            status,
            version: HttpVersion::Http1_1,
            headers,
            url: None,
            history: Vec::new(),
            encoding_override: None,
            state: BodyState::Buffered,
            stream_consumed: true,
            content: Some(content.into()),
            source: BodySource::Empty,
            decoder: None,
            read_timeout: None,
        }
    }

    /// Response whose body is still on the wire.
    pub(crate) fn streaming(
        head: ResponseHead,
        version: HttpVersion,
        url: Url,
        source: BodySource,
        read_timeout: Option<Duration>,
    ) -> Self {
        let decoder = ContentDecoder::for_headers(&head.headers);
        Self {
            status: head.status,
            version,
            headers: head.headers,
            url: Some(url),
            history: Vec::new(),
            encoding_override: None,
            state: BodyState::Unread,
            stream_consumed: false,
            content: None,
            source,
            decoder,
            read_timeout,
        }
    }

    /// Set the URL this response was received from.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub(crate) fn set_history(&mut self, history: Vec<Url>) {
        self.history = history;
    }

    pub(crate) fn set_default_encoding(&mut self, encoding: Option<String>) {
        if self.encoding_override.is_none() {
            self.encoding_override = encoding;
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Standard reason phrase for the status code; empty when unknown.
    pub fn reason_phrase(&self) -> &'static str {
        http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// `HTTP/1.1`, `HTTP/2` or `HTTP/3`.
    pub fn http_version(&self) -> &'static str {
        self.version.as_str()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Final URL after redirects.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// URLs visited before the final one, oldest first.
    pub fn history(&self) -> &[Url] {
        &self.history
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_closed(&self) -> bool {
        self.state == BodyState::Closed
    }

    pub fn is_stream_consumed(&self) -> bool {
        self.stream_consumed
    }

    pub fn state(&self) -> BodyState {
        self.state
    }

    /// Buffered body. Fails with `ResponseNotRead` until [`Self::read`] ran.
    pub fn content(&self) -> Result<&Bytes> {
        self.content.as_ref().ok_or(Error::ResponseNotRead)
    }

    /// Read the whole (decoded) body into memory. Calling it again returns
    /// the same bytes.
    pub async fn read(&mut self) -> Result<Bytes> {
        match self.state {
            BodyState::Buffered => return self.content().cloned(),
            BodyState::Streaming | BodyState::Consumed => return Err(Error::StreamConsumed),
            BodyState::Closed => return Err(Error::StreamClosed),
            BodyState::Unread => {}
        }
        self.stream_consumed = true;

        let mut buf = BytesMut::new();
        loop {
            match self.next_decoded().await {
                Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
        let content = buf.freeze();
        self.content = Some(content.clone());
        self.state = BodyState::Buffered;
        Ok(content)
    }

    /// Next decoded body chunk; `Ok(None)` at the end.
    ///
    /// Only valid on an unread response. Once iteration starts, [`Self::read`]
    /// fails with `StreamConsumed`.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            BodyState::Unread => {
                self.state = BodyState::Streaming;
                self.stream_consumed = true;
            }
            BodyState::Streaming => {}
            BodyState::Buffered | BodyState::Consumed => return Err(Error::StreamConsumed),
            BodyState::Closed => return Err(Error::StreamClosed),
        }
        match self.next_decoded().await {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.state = BodyState::Consumed;
                Ok(None)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Release the connection. An unfinished HTTP/1.1 body evicts it.
    pub fn close(&mut self) {
        if !self.source.is_empty() {
            tracing::debug!("Response: closing with body still on the wire");
        }
        self.source.abandon();
        self.decoder = None;
        self.state = BodyState::Closed;
    }

    /// Discard the body so the connection can be reused.
    pub(crate) async fn drain(&mut self) -> Result<()> {
        if self.state == BodyState::Unread {
            self.stream_consumed = true;
            self.decoder = None;
            self.state = BodyState::Consumed;
            if let Err(e) = self.source.drain(self.read_timeout).await {
                self.close();
                return Err(e);
            }
        }
        Ok(())
    }

    async fn next_decoded(&mut self) -> Result<Option<Bytes>> {
        loop {
            let raw = self.source.next_chunk(self.read_timeout).await?;
            let Some(decoder) = self.decoder.as_mut() else {
                return Ok(raw);
            };
            match raw {
                Some(raw) => {
                    let decoded = decoder.decode(&raw)?;
                    if !decoded.is_empty() {
                        return Ok(Some(decoded));
                    }
                }
                None => {
                    let tail = decoder.finish()?;
                    self.decoder = None;
                    return Ok(Some(tail).filter(|t| !t.is_empty()));
                }
            }
        }
    }

    /// Charset used by [`Self::text`]: explicit override, then the
    /// Content-Type charset, then a prescan of the buffered bytes, then `utf-8`.
    pub fn encoding(&self) -> String {
        if let Some(label) = &self.encoding_override {
            return label.clone();
        }
        let declared = self
            .headers
            .get("content-type")
            .and_then(charset_param)
            .map(str::to_ascii_lowercase)
            .filter(|label| Encoding::for_label(label.as_bytes()).is_some());
        if let Some(label) = declared {
            return label;
        }
        self.content
            .as_deref()
            .and_then(sniff_charset)
            .unwrap_or_else(|| "utf-8".to_string())
    }

    /// Override the text encoding. Unknown labels are rejected.
    pub fn set_encoding(&mut self, label: &str) -> Result<()> {
        let label = label.trim().to_ascii_lowercase();
        if Encoding::for_label(label.as_bytes()).is_none() {
            return Err(Error::invalid_argument(format!("unknown encoding: {}", label)));
        }
        self.encoding_override = Some(label);
        Ok(())
    }

    /// Body decoded as text, reading it first if needed. Undecodable
    /// sequences become U+FFFD.
    pub async fn text(&mut self) -> Result<String> {
        if self.content.is_none() {
            self.read().await?;
        }
        let content = self.content()?;
        let encoding = Encoding::for_label(self.encoding().as_bytes()).unwrap_or(encoding_rs::UTF_8);
        let (text, _, _) = encoding.decode(content);
        Ok(text.into_owned())
    }

    /// Parse the body as JSON. On failure the buffered content stays intact.
    pub async fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        let text = self.text().await?;
        serde_json::from_str(&text).map_err(Error::from)
    }

    /// `HttpStatusError` unless the status is 2xx.
    pub fn raise_for_status(&self) -> Result<&Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(Error::HttpStatus {
            status: self.status,
            reason: self.reason_phrase().to_string(),
            url: self.url.as_ref().map(Url::to_string).unwrap_or_default(),
        })
    }
}

/// Charset from a byte-order mark, an XML declaration, or an HTML
/// `<meta>` tag near the start of the document.
fn sniff_charset(bytes: &[u8]) -> Option<String> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return Some(encoding.name().to_ascii_lowercase());
    }
    let head = &bytes[..bytes.len().min(PRESCAN_LIMIT)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();

    let label = if head.starts_with("<?xml") {
        let decl_end = head.find("?>").unwrap_or(head.len());
        attribute_value(&head[..decl_end], "encoding=")
    } else {
        head.match_indices("<meta")
            .find_map(|(idx, _)| {
                let tag = &head[idx..];
                let tag = &tag[..tag.find('>').unwrap_or(tag.len())];
                attribute_value(tag, "charset=")
            })
    }?;

    Encoding::for_label(label.as_bytes()).map(|_| label.to_string())
}

/// Value following `key` up to a quote, space, `;` or `>`.
fn attribute_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = text.find(key)? + key.len();
    let value = text[start..].trim_start_matches(['"', '\'', ' ']);
    let end = value
        .find(|c: char| matches!(c, '"' | '\'' | ' ' | ';' | '>' | '/'))
        .unwrap_or(value.len());
    Some(&value[..end]).filter(|v| !v.is_empty())
}
