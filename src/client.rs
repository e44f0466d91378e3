//! Async HTTP client.
//!
//! A [`Client`] is cheap to clone; clones share one connection pool, one
//! cookie store and one TLS context. Each call runs:
//!
//! 1. request assembly (headers, cookies, body)
//! 2. protocol choice (HTTP/3, or TCP with ALPN picking HTTP/2 or HTTP/1.1)
//! 3. connection lease from the pool, connecting if needed
//! 4. the wire exchange, then redirect following

use std::future::Future;
use std::sync::Arc;

use http::Method;
use url::Url;

use crate::body::BodySource;
use crate::config::{ClientBuilder, ClientConfig};
use crate::cookie::{cookie_header_for, store_response_cookies, CookieStore};
use crate::error::{Error, ErrorKind, Result};
use crate::negotiate::{choose_route, is_hard_quic_failure, Http3Failures, Route, RoutePolicy};
use crate::pool::{ConnectionPool, H1Lease, H1Slot, PoolKey, PoolStats, SharedHandle, SharedLease};
use crate::redirect;
use crate::request::{Request, RequestBuilder};
use crate::response::Response;
use crate::timeouts::{connect_within, Timeouts};
use crate::transport::connector::{BoringConnector, MaybeHttpsStream};
use crate::transport::h1::H1Connection;
use crate::transport::h2::H2Connection;
use crate::transport::h3::{configure_quic, H3Connection};
use crate::transport::{connect_host, connect_port, WireRequest};
use crate::version::HttpVersion;

/// HTTP client with browser fingerprint impersonation.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    connector: BoringConnector,
    pool: ConnectionPool,
    http3_failures: Http3Failures,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl Client {
    /// Client with default settings: no impersonation, TCP only.
    pub fn new() -> Result<Self> {
        ClientBuilder::new().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn with_config(config: ClientConfig) -> Result<Self> {
        let connector = BoringConnector::new(
            &config.profile,
            config.verify,
            &config.root_certificates,
            config.local_address,
            config.proxy.clone(),
        )?;
        let pool = ConnectionPool::new(config.pool.clone());
        tracing::debug!(
            "Client: built (browser={:?}, http3={}, proxy={})",
            config.browser,
            config.http3,
            config.proxy.is_some()
        );
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                pool,
                http3_failures: Http3Failures::default(),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn cookie_store(&self) -> &Arc<dyn CookieStore> {
        &self.inner.config.cookie_store
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Drop every pooled connection and forget remembered QUIC failures.
    pub fn close(&self) {
        self.inner.pool.clear();
        self.inner.http3_failures.clear();
    }

    pub fn request(&self, method: impl Into<String>, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, url)
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

    /// Send `request`, following redirects if enabled. Unless the request
    /// asked to stream, the body is read before this returns.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let config = &self.inner.config;
        let timeouts = request.timeouts.unwrap_or(config.timeouts);
        let mut history: Vec<Url> = Vec::new();

        let mut response = loop {
            let mut response = self.send_once(&request, &timeouts).await?;
            store_response_cookies(config.cookie_store.as_ref(), &request.url, response.headers());

            if !config.follow_redirects {
                break response;
            }
            let location = response.headers().get("location");
            let Some(next) = redirect::next_request(&request, response.status(), location)? else {
                break response;
            };
            if history.len() >= config.max_redirects {
                response.close();
                return Err(Error::TooManyRedirects {
                    count: config.max_redirects,
                });
            }
            tracing::debug!(
                "Redirect: {} {} -> {} {}",
                response.status(),
                request.url,
                next.method,
                next.url
            );
            if let Err(e) = response.drain().await {
                tracing::debug!("Redirect: discarding unread body failed: {}", e);
            }
            history.push(std::mem::replace(&mut request, next).url);
        };

        response.set_history(history);
        response.set_default_encoding(config.default_encoding.clone());
        if !request.stream {
            response.read().await?;
        }
        Ok(response)
    }

    /// One request/response exchange, no redirects.
    async fn send_once(&self, request: &Request, timeouts: &Timeouts) -> Result<Response> {
        let config = &self.inner.config;
        let policy = RoutePolicy {
            http3: config.http3,
            force_http3: request.force_http3,
            proxied: config.proxy.is_some(),
        };
        let route = choose_route(&request.url, policy, &self.inner.http3_failures)?;
        let wire = self.wire_request(request);
        tracing::debug!("Client: {} {} via {:?}", wire.method, wire.url, route);

        match route {
            Route::Http3Only => self.send_h3(&wire, timeouts).await,
            Route::Tcp => self.send_tcp(&wire, timeouts).await,
            Route::Http3ThenTcp => match self.send_h3(&wire, timeouts).await {
                Err(e) if is_hard_quic_failure(&e) => {
                    let host = connect_host(&wire.url)?;
                    let port = connect_port(&wire.url)?;
                    tracing::warn!("H3: {}:{} unavailable ({}), falling back to TCP", host, port, e);
                    if config.remember_http3_failures {
                        self.inner.http3_failures.remember(&host, port);
                    }
                    self.send_tcp(&wire, timeouts).await
                }
                other => other,
            },
        }
    }

    /// Request as it goes on the wire for this hop.
    fn wire_request(&self, request: &Request) -> WireRequest {
        let config = &self.inner.config;
        let mut headers = request.headers.clone();
        if !request.explicit_cookie {
            if let Some(cookie) = cookie_header_for(config.cookie_store.as_ref(), &request.url) {
                headers.set("Cookie", cookie);
            }
        }
        let is_https = request.url.scheme() == "https";
        if self.inner.connector.uses_absolute_form(is_https) {
            if let Some(auth) = config.proxy.as_ref().and_then(|p| p.basic_auth()) {
                headers.set_default("Proxy-Authorization", auth);
            }
        }
        WireRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            headers,
            header_order: config.profile.header_order,
            body: request.body.clone(),
        }
    }

    /// TCP path: reuse an HTTP/2 connection if one exists, else lease or
    /// open an HTTP/1.1 slot and let ALPN decide. TLS connects hold the
    /// HTTP/2 connect gate until ALPN has answered.
    async fn send_tcp(&self, wire: &WireRequest, timeouts: &Timeouts) -> Result<Response> {
        let host = connect_host(&wire.url)?;
        let port = connect_port(&wire.url)?;
        let is_https = wire.url.scheme() == "https";
        let h2_key = PoolKey::new(host.clone(), port, is_https, HttpVersion::Http2);
        let pool = &self.inner.pool;

        let mut gate = None;
        if is_https {
            if let Some(lease) = pool.lease_shared(&h2_key, timeouts.pool).await? {
                return self.send_shared(lease, wire, timeouts).await;
            }
            gate = pool.connect_gate(&h2_key, timeouts.pool).await?;
            if gate.is_some() {
                if let Some(lease) = pool.lease_shared(&h2_key, timeouts.pool).await? {
                    return self.send_shared(lease, wire, timeouts).await;
                }
            }
        }

        let h1_key = h2_key.with_version(HttpVersion::Http1_1);
        let lease = match pool.acquire_h1(&h1_key, timeouts.pool).await? {
            H1Slot::Idle(lease) => lease,
            H1Slot::Connect(slot) => {
                let connector = &self.inner.connector;
                let host = host.as_str();
                let connect_timeout = timeouts.connect;
                let stream = self
                    .with_retries(&wire.method, move || {
                        connector.connect(host, port, is_https, connect_timeout)
                    })
                    .await?;
                if stream.is_h2() {
                    drop(slot);
                    let lease = self.start_h2(&h2_key, stream, timeouts).await?;
                    drop(gate);
                    return self.send_shared(lease, wire, timeouts).await;
                }
                if is_https {
                    pool.mark_http1_only(&h2_key);
                }
                let absolute_form = self.inner.connector.uses_absolute_form(is_https);
                slot.attach(H1Connection::new(stream, absolute_form))
            }
        };
        drop(gate);
        self.send_h1(lease, wire, timeouts).await
    }

    async fn start_h2(
        &self,
        key: &PoolKey,
        stream: MaybeHttpsStream,
        timeouts: &Timeouts,
    ) -> Result<SharedLease> {
        let settings = &self.inner.config.profile.http2;
        let conn = connect_within(timeouts.connect, H2Connection::handshake(stream, settings)).await?;
        tracing::debug!("H2: connection established to {}:{}", key.host, key.port);
        self.inner.pool.register_shared(key, SharedHandle::H2(conn))
    }

    async fn send_h1(&self, mut lease: H1Lease, wire: &WireRequest, timeouts: &Timeouts) -> Result<Response> {
        match lease.conn().send_request(wire, timeouts).await {
            Ok((head, framing)) => {
                Ok(Response::streaming(
                    head,
                    HttpVersion::Http1_1,
                    wire.url.clone(),
                    BodySource::h1(lease, framing),
                    timeouts.read,
                ))
            }
            Err(e) => {
                lease.evict();
                Err(e)
            }
        }
    }

    async fn send_h3(&self, wire: &WireRequest, timeouts: &Timeouts) -> Result<Response> {
        let host = connect_host(&wire.url)?;
        let port = connect_port(&wire.url)?;
        let key = PoolKey::new(host.clone(), port, true, HttpVersion::Http3);
        let pool = &self.inner.pool;

        let lease = match pool.lease_shared(&key, timeouts.pool).await? {
            Some(lease) => lease,
            None => {
                let gate = pool.connect_gate(&key, timeouts.pool).await?;
                if let Some(lease) = pool.lease_shared(&key, timeouts.pool).await? {
                    return self.send_shared(lease, wire, timeouts).await;
                }
                let connector = &self.inner.connector;
                let host = host.as_str();
                let pseudo_order = self.inner.config.profile.pseudo_order;
                let connect_timeout = timeouts.connect;
                let handle = self
                    .with_retries(&wire.method, move || async move {
                        let quic = configure_quic(connector.quic_context_builder()?, connector.verify())?;
                        H3Connection::connect(
                            host,
                            port,
                            quic,
                            connector.local_address(),
                            pseudo_order,
                            connect_timeout,
                        )
                        .await
                    })
                    .await?;
                let lease = pool.register_shared(&key, SharedHandle::H3(handle))?;
                drop(gate);
                lease
            }
        };
        self.send_shared(lease, wire, timeouts).await
    }

    async fn send_shared(&self, lease: SharedLease, wire: &WireRequest, timeouts: &Timeouts) -> Result<Response> {
        let url = wire.url.clone();
        match lease.handle().clone() {
            SharedHandle::H2(conn) => match conn.send_request(wire, timeouts).await {
                Ok((head, recv)) => Ok(Response::streaming(
                    head,
                    HttpVersion::Http2,
                    url,
                    BodySource::H2 { recv, lease },
                    timeouts.read,
                )),
                Err(e) => Err(evict_if_poisoned(lease, e)),
            },
            SharedHandle::H3(handle) => match handle.send_request(wire, timeouts).await {
                Ok((head, rx)) => Ok(Response::streaming(
                    head,
                    HttpVersion::Http3,
                    url,
                    BodySource::H3 { rx, lease },
                    timeouts.read,
                )),
                Err(e) => Err(evict_if_poisoned(lease, e)),
            },
        }
    }

    /// Retry connection establishment for idempotent methods.
    async fn with_retries<T, F, Fut>(&self, method: &Method, mut connect: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retries = if is_idempotent(method) {
            self.inner.config.retries
        } else {
            0
        };
        let mut attempt = 0;
        loop {
            match connect().await {
                Err(e)
                    if attempt < retries
                        && matches!(e.kind(), ErrorKind::ConnectError | ErrorKind::ConnectTimeout) =>
                {
                    attempt += 1;
                    tracing::debug!("Client: connect failed ({}), retry {}/{}", e, attempt, retries);
                }
                other => return other,
            }
        }
    }
}

fn evict_if_poisoned(lease: SharedLease, err: Error) -> Error {
    if err.poisons_connection() {
        lease.evict();
    }
    err
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}
