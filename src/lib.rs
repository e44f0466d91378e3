//! # Guise
//!
//! HTTP client that impersonates browser network fingerprints.
//!
//! Guise speaks HTTP/1.1, HTTP/2 and HTTP/3 with BoringSSL-based TLS
//! fingerprinting (cipher order, extensions, ALPN) and browser-accurate
//! HTTP/2 SETTINGS and header ordering. Requests can be issued from async
//! code through [`Client`] or from plain threads through [`blocking::Client`].
//!
//! ```no_run
//! # async fn run() -> guise::Result<()> {
//! let client = guise::Client::builder().impersonate("chrome").build()?;
//! let mut response = client.get("https://example.com/").send().await?;
//! println!("{} {}", response.status(), response.text().await?);
//! # Ok(())
//! # }
//! ```

mod body;
mod redirect;

pub mod blocking;
pub mod client;
pub mod config;
pub mod cookie;
pub mod error;
pub mod fingerprint;
pub mod headers;
pub mod negotiate;
pub mod pool;
pub mod request;
pub mod response;
pub mod timeouts;
pub mod transport;
pub mod version;

use bytes::Bytes;
use once_cell::sync::OnceCell;

pub use client::Client;
pub use config::{ClientBuilder, ClientConfig, DEFAULT_MAX_REDIRECTS};
pub use cookie::{Cookie, CookieAttributes, CookieJar, CookieStore, Cookies};
pub use error::{Category, Error, ErrorKind, Result};
pub use fingerprint::{Browser, FingerprintProfile};
pub use headers::Headers;
pub use pool::{PoolConfig, PoolStats};
pub use request::{Request, RequestBuilder};
pub use response::{BodyState, Response};
pub use timeouts::Timeouts;
pub use transport::proxy::Proxy;
pub use version::HttpVersion;

static DEFAULT_CLIENT: OnceCell<Client> = OnceCell::new();

/// Process-wide client behind the convenience calls, built on first use.
/// It shares nothing with explicitly built clients.
pub fn default_client() -> Result<&'static Client> {
    DEFAULT_CLIENT.get_or_try_init(Client::new)
}

pub fn request(method: impl Into<String>, url: impl Into<String>) -> Result<RequestBuilder> {
    Ok(default_client()?.request(method, url))
}

pub async fn get(url: impl Into<String>) -> Result<Response> {
    request("GET", url)?.send().await
}

pub async fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Result<Response> {
    request("POST", url)?.content(body).send().await
}
