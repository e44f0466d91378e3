//! HTTP/3 connection driver - background task that reads packets and routes them to streams.
//!
//! The driver owns the QUIC connection and UdpSocket. Response heads go back
//! over a oneshot; body bytes are pushed into a per-stream channel as they
//! arrive, so callers can stream.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use quiche::h3::NameValue;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::transport::ResponseHead;

/// Largest UDP datagram we send (Chrome's QUIC default).
pub(crate) const MAX_DATAGRAM_SIZE: usize = 1350;

pub(crate) type BodyReceiver = mpsc::UnboundedReceiver<Result<Bytes>>;

/// Command sent from handle to driver
pub enum DriverCommand {
    /// Open a stream; the head arrives on `head_tx`, body chunks on `body_tx`.
    SendRequest {
        headers: Vec<quiche::h3::Header>,
        body: Option<Bytes>,
        head_tx: oneshot::Sender<Result<ResponseHead>>,
        body_tx: mpsc::UnboundedSender<Result<Bytes>>,
    },
}

/// Per-stream state tracked by driver
struct DriverStreamState {
    head_tx: Option<oneshot::Sender<Result<ResponseHead>>>,
    body_tx: mpsc::UnboundedSender<Result<Bytes>>,
    /// Request body not yet accepted by flow control.
    pending_body: Option<Bytes>,
}

impl DriverStreamState {
    fn fail(mut self, err: impl Fn() -> Error) {
        match self.head_tx.take() {
            Some(tx) => {
                let _ = tx.send(Err(err()));
            }
            None => {
                let _ = self.body_tx.send(Err(err()));
            }
        }
    }
}

/// HTTP/3 connection driver
pub struct H3Driver {
    command_rx: mpsc::Receiver<DriverCommand>,
    conn: quiche::Connection,
    h3_conn: quiche::h3::Connection,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    streams: HashMap<u64, DriverStreamState>,
    alive: Arc<AtomicBool>,
}

impl H3Driver {
    pub fn new(
        command_rx: mpsc::Receiver<DriverCommand>,
        conn: quiche::Connection,
        h3_conn: quiche::h3::Connection,
        socket: Arc<UdpSocket>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            command_rx,
            conn,
            h3_conn,
            socket,
            local_addr,
            peer_addr,
            streams: HashMap::new(),
            alive,
        }
    }

    /// Run until every handle is dropped or the connection dies.
    pub async fn drive(mut self) {
        let result = self.run().await;
        self.alive.store(false, Ordering::Release);

        let reason = match &result {
            Ok(()) => "HTTP/3 connection closed".to_string(),
            Err(e) => {
                tracing::warn!("H3: driver stopped: {}", e);
                e.to_string()
            }
        };
        for (_, stream) in self.streams.drain() {
            stream.fail(|| Error::remote_protocol(reason.clone()));
        }
    }

    async fn run(&mut self) -> Result<()> {
        let mut buf = vec![0u8; 65535];
        let mut out = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            self.flush_pending_bodies();
            self.flush_egress(&mut out).await?;

            if self.conn.is_closed() {
                return Err(Error::remote_protocol(format!(
                    "QUIC connection closed (peer error: {:?})",
                    self.conn.peer_error()
                )));
            }

            // quiche tells us how long until its next timer event
            let timeout_duration = self.conn.timeout().unwrap_or(Duration::from_secs(60));

            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        // All handles dropped
                        let _ = self.conn.close(true, 0x00, b"client shutdown");
                        let _ = self.flush_egress(&mut out).await;
                        return Ok(());
                    }
                },

                res = self.socket.recv_from(&mut buf) => {
                    let (len, from) = res.map_err(|e| Error::from_read_io(&e))?;
                    if from != self.peer_addr {
                        continue;
                    }
                    let info = quiche::RecvInfo { from, to: self.local_addr };
                    match self.conn.recv(&mut buf[..len], info) {
                        Ok(_) => self.process_h3_events()?,
                        Err(quiche::Error::Done) => {}
                        Err(e) => tracing::debug!("H3: QUIC recv error: {}", e),
                    }
                }

                _ = sleep(timeout_duration) => {
                    self.conn.on_timeout();
                }
            }
        }
    }

    /// quiche is a state machine; send every packet it has generated.
    async fn flush_egress(&mut self, out: &mut [u8]) -> Result<()> {
        loop {
            match self.conn.send(out) {
                Ok((len, info)) => {
                    self.socket
                        .send_to(&out[..len], info.to)
                        .await
                        .map_err(|e| Error::from_write_io(&e))?;
                }
                Err(quiche::Error::Done) => return Ok(()),
                Err(e) => return Err(Error::write(format!("QUIC send error: {}", e))),
            }
        }
    }

    fn handle_command(&mut self, cmd: DriverCommand) {
        match cmd {
            DriverCommand::SendRequest {
                headers,
                body,
                head_tx,
                body_tx,
            } => {
                let body = body.filter(|b| !b.is_empty());
                match self.h3_conn.send_request(&mut self.conn, &headers, body.is_none()) {
                    Ok(stream_id) => {
                        tracing::trace!("H3: opened stream {}", stream_id);
                        self.streams.insert(
                            stream_id,
                            DriverStreamState {
                                head_tx: Some(head_tx),
                                body_tx,
                                pending_body: body,
                            },
                        );
                    }
                    Err(e) => {
                        let _ = head_tx.send(Err(Error::local_protocol(format!(
                            "HTTP/3 send request failed: {}",
                            e
                        ))));
                    }
                }
            }
        }
    }

    /// Push request bodies as far as flow control allows.
    fn flush_pending_bodies(&mut self) {
        let mut failed = Vec::new();
        for (&stream_id, stream) in self.streams.iter_mut() {
            let Some(data) = stream.pending_body.take() else {
                continue;
            };
            match self.h3_conn.send_body(&mut self.conn, stream_id, &data, true) {
                Ok(written) if written < data.len() => {
                    stream.pending_body = Some(data.slice(written..));
                }
                Ok(_) => {}
                Err(quiche::h3::Error::Done) => stream.pending_body = Some(data),
                Err(e) => failed.push((stream_id, e.to_string())),
            }
        }
        for (stream_id, reason) in failed {
            if let Some(stream) = self.streams.remove(&stream_id) {
                stream.fail(|| Error::write(format!("HTTP/3 send body failed: {}", reason)));
            }
        }
    }

    fn process_h3_events(&mut self) -> Result<()> {
        loop {
            match self.h3_conn.poll(&mut self.conn) {
                Ok((stream_id, quiche::h3::Event::Headers { list, .. })) => {
                    let Some(stream) = self.streams.get_mut(&stream_id) else {
                        continue;
                    };
                    let mut status = None;
                    let mut headers = Headers::new();
                    for header in &list {
                        let name = String::from_utf8_lossy(header.name());
                        let value = String::from_utf8_lossy(header.value());
                        if name == ":status" {
                            status = value.parse::<u16>().ok();
                        } else if !name.starts_with(':') {
                            headers.append(name.into_owned(), value.into_owned());
                        }
                    }
                    // Trailers arrive as a second Headers event; ignore them.
                    if let Some(tx) = stream.head_tx.take() {
                        let head = status
                            .map(|status| ResponseHead { status, headers })
                            .ok_or_else(|| Error::remote_protocol("HTTP/3 response missing :status"));
                        let _ = tx.send(head);
                    }
                }
                Ok((stream_id, quiche::h3::Event::Data)) => self.read_stream_data(stream_id),
                Ok((stream_id, quiche::h3::Event::Finished)) => {
                    // Dropping the sender ends the body
                    if let Some(stream) = self.streams.remove(&stream_id) {
                        if let Some(tx) = stream.head_tx {
                            let _ = tx.send(Err(Error::remote_protocol(
                                "HTTP/3 stream finished without headers",
                            )));
                        }
                    }
                }
                Ok((stream_id, quiche::h3::Event::Reset(error_code))) => {
                    if let Some(stream) = self.streams.remove(&stream_id) {
                        stream.fail(|| {
                            Error::remote_protocol(format!("HTTP/3 stream reset: {}", error_code))
                        });
                    }
                }
                Ok((_, quiche::h3::Event::GoAway)) => {
                    tracing::debug!("H3: received GOAWAY");
                }
                Ok(_) => {}
                Err(quiche::h3::Error::Done) => return Ok(()),
                Err(e) => {
                    return Err(Error::remote_protocol(format!("HTTP/3 poll error: {}", e)));
                }
            }
        }
    }

    fn read_stream_data(&mut self, stream_id: u64) {
        let mut buf = vec![0u8; 65535];
        let mut abandoned = false;
        if let Some(stream) = self.streams.get(&stream_id) {
            while let Ok(len) = self.h3_conn.recv_body(&mut self.conn, stream_id, &mut buf) {
                if stream
                    .body_tx
                    .send(Ok(Bytes::copy_from_slice(&buf[..len])))
                    .is_err()
                {
                    abandoned = true;
                    break;
                }
            }
        }
        if abandoned {
            // Body receiver dropped: stop the peer sending.
            tracing::trace!("H3: stream {} abandoned by reader", stream_id);
            self.streams.remove(&stream_id);
            let _ = self.conn.stream_shutdown(stream_id, quiche::Shutdown::Read, 0x010c);
        }
    }
}
