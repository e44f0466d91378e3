use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boring::ssl::SslAcceptor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Index of the TCP connection that carried it, in accept order.
    pub connection: usize,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the server writes back: byte segments, each after an optional pause.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    segments: Vec<(Duration, Vec<u8>)>,
    close: bool,
}

impl Reply {
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::default().then(Duration::ZERO, bytes)
    }

    pub fn ok(body: &str) -> Self {
        Self::status(200, &[], body)
    }

    /// Content-Length framed response.
    pub fn status(status: u16, headers: &[(&str, &str)], body: impl AsRef<[u8]>) -> Self {
        let body = body.as_ref();
        let reason = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let mut head = format!("HTTP/1.1 {} {}\r\n", status, reason);
        for (name, value) in headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(body);
        Self::raw(bytes)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::status(status, &[("Location", location)], "")
    }

    /// Append bytes written after `delay`.
    pub fn then(mut self, delay: Duration, bytes: impl Into<Vec<u8>>) -> Self {
        self.segments.push((delay, bytes.into()));
        self
    }

    /// Close the connection once the reply is written.
    pub fn close(mut self) -> Self {
        self.close = true;
        self
    }
}

/// Shared view of a running server.
#[derive(Clone, Default)]
pub struct ServerHandle {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    connections: Arc<AtomicUsize>,
}

impl ServerHandle {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Scripted HTTP/1.1 server. Keeps connections alive until the client
/// closes them or a [`Reply`] asks to close.
pub struct MockHttpServer {
    listener: TcpListener,
    port: u16,
    handle: ServerHandle,
}

impl MockHttpServer {
    /// Bind to a random port.
    pub async fn new() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            handle: ServerHandle::default(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn url_tls(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    /// Serve plain HTTP in a background task.
    pub fn start<F>(self, handler: F) -> ServerHandle
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        let handler = Arc::new(handler);
        let Self {
            listener, handle: shared, ..
        } = self;
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let id = shared.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, id, handler.clone(), shared.clone()));
            }
        });
        handle
    }

    /// Serve HTTP/1.1 over TLS in a background task.
    pub fn start_tls<F>(self, acceptor: SslAcceptor, handler: F) -> ServerHandle
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        self.start_tls_after_drops(acceptor, 0, handler)
    }

    /// Like [`start_tls`](Self::start_tls), but the first `drops` TCP
    /// connections are closed before the TLS handshake.
    pub fn start_tls_after_drops<F>(self, acceptor: SslAcceptor, drops: usize, handler: F) -> ServerHandle
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        let handler = Arc::new(handler);
        let Self {
            listener, handle: shared, ..
        } = self;
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let id = shared.connections.fetch_add(1, Ordering::SeqCst);
                if id < drops {
                    drop(tcp);
                    continue;
                }
                let acceptor = acceptor.clone();
                let handler = handler.clone();
                let shared = shared.clone();
                tokio::spawn(async move {
                    match tokio_boring::accept(&acceptor, tcp).await {
                        Ok(stream) => serve(stream, id, handler, shared).await,
                        Err(e) => tracing::error!("TLS accept error: {}", e),
                    }
                });
            }
        });
        handle
    }
}

async fn serve<S, F>(mut stream: S, id: usize, handler: Arc<F>, shared: ServerHandle)
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: Fn(&RecordedRequest) -> Reply,
{
    let mut buf = Vec::new();
    while let Some(request) = read_request(&mut stream, &mut buf, id).await {
        let reply = (*handler)(&request);
        shared.requests.lock().unwrap().push(request);

        for (delay, bytes) in &reply.segments {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            if stream.write_all(bytes).await.is_err() || stream.flush().await.is_err() {
                return;
            }
        }
        if reply.close {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

type Head = (usize, String, String, Vec<(String, String)>);

/// Parsed head and its length, once the buffer holds all of it.
fn parse_head(buf: &[u8]) -> Option<Head> {
    let mut slots = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut slots);
    let httparse::Status::Complete(head_len) = parsed.parse(buf).ok()? else {
        return None;
    };
    let headers = parsed
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();
    Some((head_len, parsed.method?.to_string(), parsed.path?.to_string(), headers))
}

/// Read one request (head plus Content-Length body). `None` on EOF.
async fn read_request<S>(stream: &mut S, buf: &mut Vec<u8>, connection: usize) -> Option<RecordedRequest>
where
    S: AsyncRead + Unpin,
{
    let (head_len, method, path, headers) = loop {
        if let Some(head) = parse_head(buf) {
            break head;
        }
        if !fill(stream, buf).await {
            return None;
        }
    };
    let body_len = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_len + body_len {
        if !fill(stream, buf).await {
            return None;
        }
    }
    let body = buf[head_len..head_len + body_len].to_vec();
    buf.drain(..head_len + body_len);
    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
        connection,
    })
}

async fn fill<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 8192];
    match stream.read(&mut chunk).await {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            true
        }
    }
}
