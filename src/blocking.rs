//! Synchronous client.
//!
//! Wraps the async [`crate::Client`] and a private tokio runtime; every
//! call blocks the calling thread at the same points the async client
//! would suspend. Do not use it from inside an async runtime.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;
use url::Url;

use crate::config::ClientBuilder;
use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::request::Request;
use crate::response::BodyState;
use crate::timeouts::Timeouts;
use crate::version::HttpVersion;

fn build_runtime() -> Result<Runtime> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(Error::configuration(
            "the blocking client cannot be used inside an async runtime",
        ));
    }
    // One worker keeps HTTP/2 and HTTP/3 connection tasks running between calls.
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("guise-blocking")
        .enable_all()
        .build()
        .map_err(|e| Error::configuration(format!("failed to start runtime: {}", e)))
}

fn block_on<F: std::future::Future>(runtime: &Runtime, fut: F) -> Result<F::Output> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(Error::configuration(
            "the blocking client cannot be used inside an async runtime",
        ));
    }
    Ok(runtime.block_on(fut))
}

/// Blocking HTTP client.
#[derive(Clone, Debug)]
pub struct Client {
    inner: crate::Client,
    runtime: Arc<Runtime>,
}

impl Client {
    pub fn new() -> Result<Self> {
        Self::from_builder(ClientBuilder::new())
    }

    /// Build from the same builder the async client uses.
    pub fn from_builder(builder: ClientBuilder) -> Result<Self> {
        let runtime = build_runtime()?;
        // Built inside the runtime so nothing it creates outlives it.
        let inner = {
            let _guard = runtime.enter();
            builder.build()?
        };
        Ok(Self {
            inner,
            runtime: Arc::new(runtime),
        })
    }

    /// The async client sharing this client's pool and cookies.
    pub fn as_async(&self) -> &crate::Client {
        &self.inner
    }

    pub fn request(&self, method: impl Into<String>, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            inner: self.inner.request(method, url),
            runtime: self.runtime.clone(),
        }
    }

    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        self.request("GET", url)
    }

    pub fn post(&self, url: impl Into<String>) -> RequestBuilder {
        self.request("POST", url)
    }

    pub fn put(&self, url: impl Into<String>) -> RequestBuilder {
        self.request("PUT", url)
    }

    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder {
        self.request("PATCH", url)
    }

    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder {
        self.request("DELETE", url)
    }

    pub fn head(&self, url: impl Into<String>) -> RequestBuilder {
        self.request("HEAD", url)
    }

    pub fn options(&self, url: impl Into<String>) -> RequestBuilder {
        self.request("OPTIONS", url)
    }

    pub fn execute(&self, request: Request) -> Result<Response> {
        let inner = block_on(&self.runtime, self.inner.execute(request))??;
        Ok(Response {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

/// Blocking counterpart of [`crate::RequestBuilder`].
#[must_use = "a RequestBuilder does nothing until sent"]
#[derive(Debug)]
pub struct RequestBuilder {
    inner: crate::RequestBuilder,
    runtime: Arc<Runtime>,
}

impl RequestBuilder {
    fn map(self, f: impl FnOnce(crate::RequestBuilder) -> crate::RequestBuilder) -> Self {
        Self {
            inner: f(self.inner),
            runtime: self.runtime,
        }
    }

    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.map(|b| b.header(name, value))
    }

    pub fn headers(self, headers: &Headers) -> Self {
        self.map(|b| b.headers(headers))
    }

    pub fn content(self, body: impl Into<Bytes>) -> Self {
        self.map(|b| b.content(body))
    }

    pub fn data<K, V>(self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.map(|b| b.data(fields))
    }

    pub fn json<T: serde::Serialize + ?Sized>(self, value: &T) -> Self {
        self.map(|b| b.json(value))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.map(|b| b.timeout(timeout))
    }

    pub fn timeout_secs(self, secs: f64) -> Self {
        self.map(|b| b.timeout_secs(secs))
    }

    pub fn timeouts(self, timeouts: Timeouts) -> Self {
        self.map(|b| b.timeouts(timeouts))
    }

    pub fn force_http3(self, force: bool) -> Self {
        self.map(|b| b.force_http3(force))
    }

    pub fn stream(self, stream: bool) -> Self {
        self.map(|b| b.stream(stream))
    }

    pub fn build(self) -> Result<Request> {
        self.inner.build()
    }

    pub fn send(self) -> Result<Response> {
        let inner = block_on(&self.runtime, self.inner.send())??;
        Ok(Response {
            inner,
            runtime: self.runtime,
        })
    }
}

/// Blocking counterpart of [`crate::Response`].
#[derive(Debug)]
pub struct Response {
    inner: crate::Response,
    runtime: Arc<Runtime>,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.inner.status()
    }

    pub fn reason_phrase(&self) -> &'static str {
        self.inner.reason_phrase()
    }

    pub fn version(&self) -> HttpVersion {
        self.inner.version()
    }

    pub fn http_version(&self) -> &'static str {
        self.inner.http_version()
    }

    pub fn headers(&self) -> &Headers {
        self.inner.headers()
    }

    pub fn url(&self) -> Option<&Url> {
        self.inner.url()
    }

    pub fn history(&self) -> &[Url] {
        self.inner.history()
    }

    pub fn is_success(&self) -> bool {
        self.inner.is_success()
    }

    pub fn is_redirect(&self) -> bool {
        self.inner.is_redirect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn is_stream_consumed(&self) -> bool {
        self.inner.is_stream_consumed()
    }

    pub fn state(&self) -> BodyState {
        self.inner.state()
    }

    pub fn content(&self) -> Result<&Bytes> {
        self.inner.content()
    }

    pub fn encoding(&self) -> String {
        self.inner.encoding()
    }

    pub fn set_encoding(&mut self, label: &str) -> Result<()> {
        self.inner.set_encoding(label)
    }

    pub fn read(&mut self) -> Result<Bytes> {
        block_on(&self.runtime, self.inner.read())?
    }

    pub fn text(&mut self) -> Result<String> {
        block_on(&self.runtime, self.inner.text())?
    }

    pub fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        block_on(&self.runtime, self.inner.json())?
    }

    /// Decoded body chunks, pulled as the iterator advances.
    pub fn iter_bytes(&mut self) -> BytesIter<'_> {
        BytesIter {
            response: self,
            done: false,
        }
    }

    pub fn raise_for_status(&self) -> Result<&Self> {
        self.inner.raise_for_status()?;
        Ok(self)
    }

    pub fn close(&mut self) {
        self.inner.close();
    }

    pub fn into_async(self) -> crate::Response {
        self.inner
    }
}

/// Iterator returned by [`Response::iter_bytes`].
///
/// Yields each error once, then stops.
#[derive(Debug)]
pub struct BytesIter<'a> {
    response: &'a mut Response,
    done: bool,
}

impl Iterator for BytesIter<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let response = &mut *self.response;
        match block_on(&response.runtime, response.inner.chunk()) {
            Ok(Ok(Some(chunk))) => Some(Ok(chunk)),
            Ok(Ok(None)) => {
                self.done = true;
                None
            }
            Ok(Err(e)) | Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

static DEFAULT_CLIENT: OnceCell<Client> = OnceCell::new();

fn default_client() -> Result<&'static Client> {
    DEFAULT_CLIENT.get_or_try_init(Client::new)
}

/// Request on the process-wide default blocking client.
pub fn request(method: impl Into<String>, url: impl Into<String>) -> Result<RequestBuilder> {
    Ok(default_client()?.request(method, url))
}

pub fn get(url: impl Into<String>) -> Result<Response> {
    request("GET", url)?.send()
}

pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Result<Response> {
    request("POST", url)?.content(body).send()
}
