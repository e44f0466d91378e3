//! Response body plumbing: where the bytes come from, and how they are
//! content-decoded on the way out.
//!
//! A [`BodySource`] owns the connection lease for as long as the body is
//! on the wire. Reaching the end hands the connection back to the pool;
//! dropping it early evicts it.

use std::io::{Read, Write};
use std::time::Duration;

use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use ::h2::RecvStream;

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::pool::{H1Lease, SharedLease};
use crate::transport::h1::BodyFraming;
use crate::transport::h3::BodyReceiver;
use crate::transport::{h2, h3};

/// Raw (still content-encoded) body bytes and the lease they arrive on.
#[derive(Default)]
pub(crate) enum BodySource {
    /// Nothing left on the wire.
    #[default]
    Empty,
    H1 {
        lease: H1Lease,
        framing: BodyFraming,
    },
    H2 {
        recv: RecvStream,
        lease: SharedLease,
    },
    H3 {
        rx: BodyReceiver,
        lease: SharedLease,
    },
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Empty => "Empty",
            Self::H1 { .. } => "H1",
            Self::H2 { .. } => "H2",
            Self::H3 { .. } => "H3",
        })
    }
}

impl BodySource {
    /// HTTP/1.1 body; a body that is already complete (HEAD, 204, empty
    /// Content-Length) hands the connection back right away.
    pub(crate) fn h1(lease: H1Lease, framing: BodyFraming) -> Self {
        if framing.is_done() {
            settle_h1(lease, &framing);
            return Self::Empty;
        }
        Self::H1 { lease, framing }
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Pull the next raw chunk. `Ok(None)` marks the end of the body, at
    /// which point the connection has already been returned to the pool.
    pub(crate) async fn next_chunk(&mut self, read_timeout: Option<Duration>) -> Result<Option<Bytes>> {
        let result = match self {
            Self::Empty => return Ok(None),
            Self::H1 { lease, framing } => lease.conn().read_body_chunk(framing, read_timeout).await,
            Self::H2 { recv, .. } => h2::next_chunk(recv, read_timeout).await,
            Self::H3 { rx, .. } => h3::next_chunk(rx, read_timeout).await,
        };
        match &result {
            Ok(Some(chunk)) => tracing::trace!("Body: {} bytes", chunk.len()),
            Ok(None) => self.finish(),
            Err(e) => self.fail(e),
        }
        result
    }

    /// Read to the end, discarding the bytes, so the connection can be reused.
    pub(crate) async fn drain(&mut self, read_timeout: Option<Duration>) -> Result<()> {
        while self.next_chunk(read_timeout).await?.is_some() {}
        Ok(())
    }

    /// Give up on the rest of the body.
    ///
    /// HTTP/1.1 connections with unread bytes are evicted; HTTP/2 and
    /// HTTP/3 streams are reset and the shared connection stays pooled.
    pub(crate) fn abandon(&mut self) {
        match std::mem::take(self) {
            Self::Empty => {}
            Self::H1 { lease, framing } => {
                if !framing.is_done() {
                    tracing::debug!("H1 Pool: body abandoned mid-stream, evicting connection");
                }
                settle_h1(lease, &framing);
            }
            // Dropping the receiving half resets the stream.
            Self::H2 { recv, lease } => drop((recv, lease)),
            Self::H3 { rx, lease } => drop((rx, lease)),
        }
    }

    fn finish(&mut self) {
        match std::mem::take(self) {
            Self::H1 { lease, framing } => settle_h1(lease, &framing),
            other => drop(other),
        }
    }

    fn fail(&mut self, err: &Error) {
        match std::mem::take(self) {
            Self::Empty => {}
            Self::H1 { lease, .. } => lease.evict(),
            Self::H2 { lease, .. } | Self::H3 { lease, .. } => {
                if err.poisons_connection() {
                    lease.evict();
                }
            }
        }
    }
}

/// Pool the connection if the exchange left it clean, evict it otherwise.
fn settle_h1(mut lease: H1Lease, framing: &BodyFraming) {
    if lease.conn().is_reusable(framing) {
        lease.release();
    } else {
        lease.evict();
    }
}

/// Undoes `Content-Encoding` as chunks arrive.
///
/// gzip and deflate decode incrementally; br and zstd are collected and
/// decoded when the body ends.
pub(crate) struct ContentDecoder {
    /// In decoding order: the reverse of the header's listing.
    stages: Vec<Stage>,
}

impl std::fmt::Debug for ContentDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentDecoder")
            .field("stages", &self.stages.len())
            .finish()
    }
}

enum Stage {
    Gzip(Option<GzDecoder<Vec<u8>>>),
    Deflate(DeflateStage),
    Brotli(Vec<u8>),
    Zstd(Vec<u8>),
}

enum DeflateStage {
    /// Waiting for two bytes to tell zlib from raw deflate.
    Sniffing(Vec<u8>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),
}

impl ContentDecoder {
    /// `None` when the body needs no decoding, or uses a coding we don't
    /// know (in which case the raw bytes are passed through).
    pub(crate) fn for_headers(headers: &Headers) -> Option<Self> {
        let mut stages = Vec::new();
        for value in headers.get_all("content-encoding") {
            for coding in value.split(',').map(|c| c.trim().to_ascii_lowercase()) {
                let stage = match coding.as_str() {
                    "" | "identity" => continue,
                    "gzip" | "x-gzip" => Stage::Gzip(None),
                    "deflate" => Stage::Deflate(DeflateStage::Sniffing(Vec::new())),
                    "br" => Stage::Brotli(Vec::new()),
                    "zstd" => Stage::Zstd(Vec::new()),
                    other => {
                        tracing::debug!("Body: unknown content-encoding {:?}, passing through", other);
                        return None;
                    }
                };
                stages.push(stage);
            }
        }
        if stages.is_empty() {
            return None;
        }
        stages.reverse();
        Some(Self { stages })
    }

    pub(crate) fn decode(&mut self, chunk: &[u8]) -> Result<Bytes> {
        let mut data = chunk.to_vec();
        for stage in &mut self.stages {
            if data.is_empty() {
                break;
            }
            data = stage.feed(&data)?;
        }
        Ok(Bytes::from(data))
    }

    /// Flush whatever the decoders still hold.
    pub(crate) fn finish(&mut self) -> Result<Bytes> {
        let mut carry = Vec::new();
        for mut stage in std::mem::take(&mut self.stages) {
            let mut out = if carry.is_empty() {
                Vec::new()
            } else {
                stage.feed(&carry)?
            };
            out.extend(stage.finish()?);
            carry = out;
        }
        Ok(Bytes::from(carry))
    }
}

impl Stage {
    fn feed(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Gzip(decoder) => {
                let decoder = decoder.get_or_insert_with(|| GzDecoder::new(Vec::new()));
                decoder
                    .write_all(input)
                    .map_err(|e| Error::decoding(format!("gzip: {}", e)))?;
                Ok(std::mem::take(decoder.get_mut()))
            }
            Self::Deflate(stage) => stage.feed(input),
            Self::Brotli(buf) | Self::Zstd(buf) => {
                buf.extend_from_slice(input);
                Ok(Vec::new())
            }
        }
    }

    fn finish(self) -> Result<Vec<u8>> {
        match self {
            // Never saw a byte (HEAD, 204): nothing to finish.
            Self::Gzip(None) => Ok(Vec::new()),
            Self::Gzip(Some(decoder)) => decoder
                .finish()
                .map_err(|e| Error::decoding(format!("gzip: {}", e))),
            Self::Deflate(stage) => stage.finish(),
            Self::Brotli(buf) if buf.is_empty() => Ok(Vec::new()),
            Self::Brotli(buf) => decode_brotli(&buf),
            Self::Zstd(buf) if buf.is_empty() => Ok(Vec::new()),
            Self::Zstd(buf) => decode_zstd(&buf),
        }
    }
}

impl DeflateStage {
    fn feed(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        if let Self::Sniffing(pending) = self {
            pending.extend_from_slice(input);
            if pending.len() < 2 {
                return Ok(Vec::new());
            }
            let buffered = std::mem::take(pending);
            *self = if is_zlib_header(&buffered) {
                Self::Zlib(ZlibDecoder::new(Vec::new()))
            } else {
                Self::Raw(DeflateDecoder::new(Vec::new()))
            };
            return self.feed(&buffered);
        }
        let result = match self {
            Self::Zlib(d) => d.write_all(input).map(|_| std::mem::take(d.get_mut())),
            Self::Raw(d) => d.write_all(input).map(|_| std::mem::take(d.get_mut())),
            Self::Sniffing(_) => Ok(Vec::new()),
        };
        result.map_err(|e| Error::decoding(format!("deflate: {}", e)))
    }

    fn finish(self) -> Result<Vec<u8>> {
        let result = match self {
            Self::Sniffing(pending) if pending.is_empty() => Ok(Vec::new()),
            Self::Sniffing(pending) => {
                let mut out = Vec::new();
                flate2::read::DeflateDecoder::new(&pending[..])
                    .read_to_end(&mut out)
                    .map(|_| out)
            }
            Self::Zlib(d) => d.finish(),
            Self::Raw(d) => d.finish(),
        };
        result.map_err(|e| Error::decoding(format!("deflate: {}", e)))
    }
}

/// RFC 1950 header check: deflate method and a valid FCHECK.
fn is_zlib_header(bytes: &[u8]) -> bool {
    match bytes {
        [cmf, flg, ..] => cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

fn decode_brotli(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = brotli::Decompressor::new(data, 4096);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::decoding(format!("brotli: {}", e)))?;
    Ok(decoded)
}

fn decode_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::decode_all(data).map_err(|e| Error::decoding(format!("zstd: {}", e)))
}
