//! Wire-level transports: TCP/TLS connect, proxies, and one module per HTTP version.

pub mod connector;
pub mod h1;
pub mod h2;
pub mod h3;
pub mod proxy;
pub mod tcp;

use bytes::Bytes;
use http::Method;
use url::{Host, Position, Url};

use crate::error::{Error, Result};
use crate::headers::Headers;

/// A fully resolved request, ready to be written by any transport.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    /// Emission order for known names (lowercase), from the fingerprint profile.
    pub header_order: &'static [&'static str],
    pub body: Option<Bytes>,
}

impl WireRequest {
    /// `host[:port]` as it belongs in `Host` / `:authority` (default port omitted).
    pub fn authority(&self) -> String {
        self.url[Position::BeforeHost..Position::AfterPort].to_string()
    }

    /// Origin-form request target: path plus query.
    pub fn origin_form(&self) -> &str {
        &self.url[Position::BeforePath..Position::AfterQuery]
    }

    /// Absolute-form request target, without the fragment.
    pub fn absolute_form(&self) -> &str {
        &self.url[..Position::AfterQuery]
    }
}

/// Status line and headers of a response, independent of the HTTP version.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Headers,
}

/// Host name to dial: IPv6 literals lose their brackets.
pub fn connect_host(url: &Url) -> Result<String> {
    match url.host() {
        Some(Host::Domain(d)) => Ok(d.to_string()),
        Some(Host::Ipv4(ip)) => Ok(ip.to_string()),
        Some(Host::Ipv6(ip)) => Ok(ip.to_string()),
        None => Err(Error::InvalidUrl(format!("URL has no host: {}", url))),
    }
}

/// Port to dial, falling back to the scheme default.
pub fn connect_port(url: &Url) -> Result<u16> {
    url.port_or_known_default()
        .ok_or_else(|| Error::InvalidUrl(format!("URL has no port: {}", url)))
}
