use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use boring::ssl::SslAcceptor;
use bytes::Bytes;
use h2::server::SendResponse;
use h2::RecvStream;
use tokio::net::TcpListener;

/// Response produced by an [`MockH2Server`] handler.
#[derive(Debug, Clone, Default)]
pub struct H2Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Pause before the response head is sent.
    pub delay: Duration,
}

impl H2Reply {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            body: Bytes::copy_from_slice(body.as_bytes()),
            ..Self::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Counters observed by a running server.
#[derive(Debug, Default)]
pub struct H2Stats {
    connections: AtomicUsize,
    requests: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl H2Stats {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Highest number of streams in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn begin(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn end(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// TLS + HTTP/2 server on `h2::server`.
pub struct MockH2Server {
    listener: TcpListener,
    port: u16,
}

impl MockH2Server {
    pub async fn new() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn url(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    /// Serve in a background task. `acceptor` must select `h2` via ALPN.
    pub fn start<F>(self, acceptor: SslAcceptor, max_concurrent_streams: u32, handler: F) -> Arc<H2Stats>
    where
        F: Fn(&http::Request<()>) -> H2Reply + Send + Sync + 'static,
    {
        let stats = Arc::new(H2Stats::default());
        let handler = Arc::new(handler);
        let listener = self.listener;
        let shared = stats.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                shared.connections.fetch_add(1, Ordering::SeqCst);
                let acceptor = acceptor.clone();
                let handler = handler.clone();
                let stats = shared.clone();
                tokio::spawn(async move {
                    let tls = match tokio_boring::accept(&acceptor, tcp).await {
                        Ok(tls) => tls,
                        Err(e) => {
                            tracing::error!("TLS accept error: {}", e);
                            return;
                        }
                    };
                    let mut conn = match h2::server::Builder::new()
                        .max_concurrent_streams(max_concurrent_streams)
                        .handshake::<_, Bytes>(tls)
                        .await
                    {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!("H2 handshake error: {}", e);
                            return;
                        }
                    };
                    while let Some(Ok((request, respond))) = conn.accept().await {
                        tokio::spawn(respond_to(request, respond, handler.clone(), stats.clone()));
                    }
                });
            }
        });
        stats
    }
}

async fn respond_to<F>(
    request: http::Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
    handler: Arc<F>,
    stats: Arc<H2Stats>,
) where
    F: Fn(&http::Request<()>) -> H2Reply,
{
    let (parts, mut body) = request.into_parts();
    while let Some(Ok(chunk)) = body.data().await {
        let _ = body.flow_control().release_capacity(chunk.len());
    }
    let head = http::Request::from_parts(parts, ());

    stats.begin();
    let reply = (*handler)(&head);
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let mut builder = http::Response::builder().status(reply.status);
    for (name, value) in &reply.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Ok(response) = builder.body(()) {
        let end = reply.body.is_empty();
        if let Ok(mut send) = respond.send_response(response, end) {
            if !end {
                let _ = send.send_data(reply.body, true);
            }
        }
    }
    stats.end();
}
