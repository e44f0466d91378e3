//! Request assembly.
//!
//! Headers merge in increasing precedence: client defaults, cookies from
//! the store (added per hop by the client), then per-call headers.

use std::time::Duration;

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::response::Response;
use crate::timeouts::{duration_from_secs_f64, Timeouts};

/// A fully resolved request, immutable once sent.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: Headers,
    pub(crate) body: Option<Bytes>,
    /// Overrides the client's timeouts for this call.
    pub(crate) timeouts: Option<Timeouts>,
    /// `Some(true)` forces HTTP/3, `Some(false)` forbids it.
    pub(crate) force_http3: Option<bool>,
    pub(crate) stream: bool,
    /// The caller set `Cookie` on this call, so the store stays out of it.
    pub(crate) explicit_cookie: bool,
}

impl Request {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }
}

/// Builder returned by [`Client::request`] and friends.
#[must_use = "a RequestBuilder does nothing until sent"]
pub struct RequestBuilder {
    client: Client,
    method: String,
    url: String,
    headers: Headers,
    content: Option<Bytes>,
    data: Option<Vec<(String, String)>>,
    json: Option<std::result::Result<Vec<u8>, String>>,
    timeouts: Option<Timeouts>,
    timeout_secs: Option<f64>,
    force_http3: Option<bool>,
    stream: bool,
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

impl RequestBuilder {
    pub(crate) fn new(client: Client, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client,
            method: method.into(),
            url: url.into(),
            headers: Headers::new(),
            content: None,
            data: None,
            json: None,
            timeouts: None,
            timeout_secs: None,
            force_http3: None,
            stream: false,
        }
    }

    /// Set a header, replacing any default of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn headers(mut self, headers: &Headers) -> Self {
        self.headers.merge(headers);
        self
    }

    /// Raw request body. Exclusive with [`Self::data`] and [`Self::json`].
    pub fn content(mut self, body: impl Into<Bytes>) -> Self {
        self.content = Some(body.into());
        self
    }

    /// Form fields, sent URL-encoded.
    pub fn data<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.data = Some(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// JSON body; sets `Content-Type: application/json` unless given.
    pub fn json<T: serde::Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.json = Some(serde_json::to_vec(value).map_err(|e| e.to_string()));
        self
    }

    /// Same limit for every timeout class of this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeouts = Some(Timeouts::uniform(Some(timeout)));
        self.timeout_secs = None;
        self
    }

    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self.timeout_secs = None;
        self
    }

    /// Use HTTP/3 only (`true`), or never (`false`), for this request.
    pub fn force_http3(mut self, force: bool) -> Self {
        self.force_http3 = Some(force);
        self
    }

    /// Return as soon as the head arrives; the body is pulled with
    /// [`Response::chunk`] or [`Response::read`].
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Resolve into a [`Request`] without sending it.
    pub fn build(self) -> Result<Request> {
        self.split().map(|(_, request)| request)
    }

    pub async fn send(self) -> Result<Response> {
        let (client, request) = self.split()?;
        client.execute(request).await
    }

    pub(crate) fn split(self) -> Result<(Client, Request)> {
        let method = Method::from_bytes(self.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::invalid_argument(format!("invalid method: {:?}", self.method)))?;
        let url = parse_url(&self.url)?;

        let given = [self.content.is_some(), self.data.is_some(), self.json.is_some()];
        if given.iter().filter(|g| **g).count() > 1 {
            return Err(Error::invalid_argument(
                "content, data and json are mutually exclusive",
            ));
        }

        let explicit_cookie = self.headers.contains("cookie");
        let mut headers = self.client.config().headers.clone();
        headers.merge(&self.headers);

        let body = if let Some(fields) = self.data {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields)
                .finish();
            headers.set_default("Content-Type", "application/x-www-form-urlencoded");
            Some(Bytes::from(encoded))
        } else if let Some(json) = self.json {
            let json = json.map_err(|e| Error::invalid_argument(format!("JSON body: {}", e)))?;
            headers.set_default("Content-Type", "application/json");
            Some(Bytes::from(json))
        } else {
            self.content
        };

        let timeouts = match self.timeout_secs {
            Some(secs) => Some(Timeouts::uniform(Some(duration_from_secs_f64(secs)?))),
            None => self.timeouts,
        };

        let request = Request {
            method,
            url,
            headers,
            body,
            timeouts,
            force_http3: self.force_http3,
            stream: self.stream,
            explicit_cookie,
        };
        Ok((self.client, request))
    }
}

/// Absolute http(s) URL with a host.
pub(crate) fn parse_url(input: &str) -> Result<Url> {
    let url = Url::parse(input.trim())?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::UnsupportedProtocol(format!(
                "Request URL has an unsupported scheme '{}'",
                other
            )))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidUrl(format!("missing host: {}", input)));
    }
    Ok(url)
}
