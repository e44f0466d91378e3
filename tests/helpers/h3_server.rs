use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use quiche::h3::NameValue;
use quiche::ConnectionId;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const MAX_DATAGRAM_SIZE: usize = 1350;

/// A request as the server saw it.
#[derive(Debug, Clone, Default)]
pub struct H3Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl H3Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response produced by a [`MockH3Server`] handler.
#[derive(Debug, Clone, Default)]
pub struct H3Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Pause before the response head is sent.
    pub delay: Duration,
}

impl H3Reply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            body: body.into(),
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
pub struct H3Stats {
    connections: AtomicUsize,
    requests: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl H3Stats {
    /// QUIC connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Highest number of requests in flight at once.
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

type Handler = dyn Fn(&H3Request) -> H3Reply + Send + Sync;

/// HTTP/3 server on `quiche`, one task per QUIC connection.
pub struct MockH3Server {
    socket: Arc<UdpSocket>,
    port: u16,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl MockH3Server {
    /// Bind a UDP port and write a fresh self-signed certificate for it.
    pub async fn new() -> io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let port = socket.local_addr()?.port();

        let names = vec!["127.0.0.1".to_string(), "localhost".to_string()];
        let cert = rcgen::generate_simple_self_signed(names).map_err(io::Error::other)?;
        let dir = std::env::temp_dir();
        let cert_path = dir.join(format!("guise_h3_{}_{}.crt", std::process::id(), port));
        let key_path = dir.join(format!("guise_h3_{}_{}.key", std::process::id(), port));
        std::fs::write(&cert_path, cert.cert.pem())?;
        std::fs::write(&key_path, cert.signing_key.serialize_pem())?;

        Ok(Self {
            socket: Arc::new(socket),
            port,
            cert_path,
            key_path,
        })
    }

    pub fn url(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    /// Serve in a background task.
    pub fn start<F>(self, handler: F) -> Arc<H3Stats>
    where
        F: Fn(&H3Request) -> H3Reply + Send + Sync + 'static,
    {
        let stats = Arc::new(H3Stats::default());
        let handler: Arc<Handler> = Arc::new(handler);
        tokio::spawn(self.run(handler, stats.clone()));
        stats
    }

    fn config(&self) -> quiche::Config {
        let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION).expect("quiche config");
        config
            .load_cert_chain_from_pem_file(self.cert_path.to_str().expect("cert path"))
            .expect("load cert");
        config
            .load_priv_key_from_pem_file(self.key_path.to_str().expect("key path"))
            .expect("load key");
        config
            .set_application_protos(quiche::h3::APPLICATION_PROTOCOL)
            .expect("alpn");
        config.set_max_idle_timeout(30_000);
        config.set_max_recv_udp_payload_size(65535);
        config.set_max_send_udp_payload_size(MAX_DATAGRAM_SIZE);
        config.set_initial_max_data(15_663_105);
        config.set_initial_max_stream_data_bidi_local(1_000_000);
        config.set_initial_max_stream_data_bidi_remote(1_000_000);
        config.set_initial_max_stream_data_uni(1_000_000);
        config.set_initial_max_streams_bidi(100);
        config.set_initial_max_streams_uni(100);
        config.set_disable_active_migration(true);
        config
    }

    async fn run(self, handler: Arc<Handler>, stats: Arc<H3Stats>) {
        let local_addr = self.socket.local_addr().expect("local addr");
        let mut connections: HashMap<ConnectionId<'static>, mpsc::Sender<(Vec<u8>, SocketAddr)>> =
            HashMap::new();
        let mut buf = vec![0u8; 65535];

        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!("UDP recv error: {}", e);
                    break;
                }
            };
            let packet = buf[..len].to_vec();
            let Ok(header) = quiche::Header::from_slice(&mut buf[..len], quiche::MAX_CONN_ID_LEN) else {
                continue;
            };
            let conn_id = header.dcid.clone().into_owned();

            let known = connections
                .get(&conn_id)
                .is_some_and(|tx| !tx.is_closed());
            if !known {
                if header.ty != quiche::Type::Initial || !quiche::version_is_supported(header.version) {
                    continue;
                }
                // Our own full-length id, so short-header packets parse back to it.
                let mut scid = [0u8; quiche::MAX_CONN_ID_LEN];
                getrandom::fill(&mut scid).expect("rng");
                let scid = ConnectionId::from_vec(scid.to_vec());
                let mut config = self.config();
                let conn = match quiche::accept(&scid, None, local_addr, peer, &mut config) {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("QUIC accept error: {}", e);
                        continue;
                    }
                };
                stats.connections.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = mpsc::channel(256);
                connections.insert(conn_id.clone(), tx.clone());
                connections.insert(scid, tx);
                let session = Session {
                    conn,
                    h3: None,
                    socket: self.socket.clone(),
                    local_addr,
                    handler: handler.clone(),
                    stats: stats.clone(),
                    pending: HashMap::new(),
                    unsent: HashMap::new(),
                };
                tokio::spawn(session.serve(rx));
            }

            if let Some(tx) = connections.get(&conn_id) {
                let _ = tx.send((packet, peer)).await;
            }
        }
    }
}

/// One accepted QUIC connection.
struct Session {
    conn: quiche::Connection,
    h3: Option<quiche::h3::Connection>,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    handler: Arc<Handler>,
    stats: Arc<H3Stats>,
    /// Requests still receiving their body.
    pending: HashMap<u64, H3Request>,
    /// Response bodies waiting for flow-control credit.
    unsent: HashMap<u64, Bytes>,
}

impl Session {
    async fn serve(mut self, mut packets: mpsc::Receiver<(Vec<u8>, SocketAddr)>) {
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<(u64, H3Reply)>();
        let mut out = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let wait = self.conn.timeout().unwrap_or(Duration::from_millis(100));
            tokio::select! {
                packet = packets.recv() => {
                    let Some((mut packet, from)) = packet else { break };
                    let info = quiche::RecvInfo { from, to: self.local_addr };
                    if let Err(e) = self.conn.recv(&mut packet, info) {
                        tracing::debug!("quiche recv error: {}", e);
                    }
                    self.poll_requests(&ready_tx);
                }
                ready = ready_rx.recv() => {
                    if let Some((stream_id, reply)) = ready {
                        self.respond(stream_id, reply);
                    }
                }
                _ = tokio::time::sleep(wait) => self.conn.on_timeout(),
            }

            self.flush_unsent();
            while let Ok((len, info)) = self.conn.send(&mut out) {
                let _ = self.socket.send_to(&out[..len], info.to).await;
            }
            if self.conn.is_closed() {
                break;
            }
        }
    }

    fn poll_requests(&mut self, ready: &mpsc::UnboundedSender<(u64, H3Reply)>) {
        if self.h3.is_none() && self.conn.is_established() {
            let config = quiche::h3::Config::new().expect("h3 config");
            match quiche::h3::Connection::with_transport(&mut self.conn, &config) {
                Ok(h3) => self.h3 = Some(h3),
                Err(e) => {
                    tracing::error!("HTTP/3 init error: {}", e);
                    return;
                }
            }
        }
        let Some(h3) = self.h3.as_mut() else {
            return;
        };

        let mut complete = Vec::new();
        loop {
            match h3.poll(&mut self.conn) {
                Ok((stream_id, quiche::h3::Event::Headers { list, more_frames })) => {
                    let mut request = H3Request::default();
                    for h in &list {
                        let name = String::from_utf8_lossy(h.name()).into_owned();
                        let value = String::from_utf8_lossy(h.value()).into_owned();
                        match name.as_str() {
                            ":method" => request.method = value,
                            ":path" => request.path = value,
                            _ => request.headers.push((name, value)),
                        }
                    }
                    if more_frames {
                        self.pending.insert(stream_id, request);
                    } else {
                        complete.push((stream_id, request));
                    }
                }
                Ok((stream_id, quiche::h3::Event::Data)) => {
                    let mut chunk = vec![0u8; 16 * 1024];
                    while let Ok(n) = h3.recv_body(&mut self.conn, stream_id, &mut chunk) {
                        if let Some(request) = self.pending.get_mut(&stream_id) {
                            request.body.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
                Ok((stream_id, quiche::h3::Event::Finished)) => {
                    if let Some(request) = self.pending.remove(&stream_id) {
                        complete.push((stream_id, request));
                    }
                }
                Ok(_) => {}
                Err(quiche::h3::Error::Done) => break,
                Err(e) => {
                    tracing::debug!("HTTP/3 poll error: {}", e);
                    break;
                }
            }
        }

        for (stream_id, request) in complete {
            self.stats.begin();
            let reply = (*self.handler)(&request);
            if reply.delay.is_zero() {
                self.respond(stream_id, reply);
            } else {
                let ready = ready.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(reply.delay).await;
                    let _ = ready.send((stream_id, reply));
                });
            }
        }
    }

    fn respond(&mut self, stream_id: u64, reply: H3Reply) {
        let Some(h3) = self.h3.as_mut() else {
            return;
        };
        let mut headers = vec![
            quiche::h3::Header::new(b":status", reply.status.to_string().as_bytes()),
            quiche::h3::Header::new(b"content-length", reply.body.len().to_string().as_bytes()),
        ];
        for (name, value) in &reply.headers {
            headers.push(quiche::h3::Header::new(name.as_bytes(), value.as_bytes()));
        }
        if let Err(e) = h3.send_response(&mut self.conn, stream_id, &headers, reply.body.is_empty()) {
            tracing::error!("HTTP/3 send_response error: {}", e);
            self.stats.end();
            return;
        }
        if reply.body.is_empty() {
            self.stats.end();
        } else {
            self.unsent.insert(stream_id, reply.body);
            self.flush_unsent();
        }
    }

    fn flush_unsent(&mut self) {
        let Some(h3) = self.h3.as_mut() else {
            return;
        };
        let mut finished = Vec::new();
        for (stream_id, body) in self.unsent.iter_mut() {
            match h3.send_body(&mut self.conn, *stream_id, &body[..], true) {
                Ok(written) if written == body.len() => finished.push(*stream_id),
                Ok(written) => {
                    let _ = body.split_to(written);
                }
                Err(quiche::h3::Error::Done) => {}
                Err(e) => {
                    tracing::debug!("HTTP/3 send_body error: {}", e);
                    finished.push(*stream_id);
                }
            }
        }
        for stream_id in finished {
            self.unsent.remove(&stream_id);
            self.stats.end();
        }
    }
}
