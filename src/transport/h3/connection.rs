//! HTTP/3 connection establishment.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use boring::ssl::SslContextBuilder;
use getrandom::fill as getrandom_fill;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::fingerprint::PseudoHeaderOrder;
use crate::timeouts::connect_within;
use crate::transport::h3::driver::{H3Driver, MAX_DATAGRAM_SIZE};
use crate::transport::h3::handle::H3Handle;

/// Chrome's initial_max_data transport parameter.
const CHROME_INITIAL_MAX_DATA: u64 = 15_663_105;

/// Commands queued per connection before senders wait.
const COMMAND_QUEUE: usize = 32;

/// QUIC transport parameters matching Chrome, on top of a fingerprinted TLS context.
pub fn configure_quic(ssl: SslContextBuilder, verify: bool) -> Result<quiche::Config> {
    let mut config = quiche::Config::with_boring_ssl_ctx_builder(quiche::PROTOCOL_VERSION, ssl)
        .map_err(|e| Error::configuration(format!("Failed to create QUIC config: {}", e)))?;

    config
        .set_application_protos(quiche::h3::APPLICATION_PROTOCOL)
        .map_err(|e| Error::configuration(format!("Failed to set HTTP/3 ALPN: {}", e)))?;
    config.verify_peer(verify);

    config.set_max_idle_timeout(30_000);
    config.set_max_recv_udp_payload_size(65535);
    config.set_max_send_udp_payload_size(MAX_DATAGRAM_SIZE);
    config.set_initial_max_data(CHROME_INITIAL_MAX_DATA);
    config.set_initial_max_stream_data_bidi_local(1_000_000);
    config.set_initial_max_stream_data_bidi_remote(1_000_000);
    config.set_initial_max_stream_data_uni(1_000_000);
    config.set_initial_max_streams_bidi(100);
    config.set_initial_max_streams_uni(100);
    config.set_disable_active_migration(true);
    Ok(config)
}

pub struct H3Connection;

impl H3Connection {
    /// Connect to an HTTP/3 server and return a handle.
    ///
    /// The QUIC handshake is driven here, under the connect timeout, so
    /// failures surface before a driver task is spawned.
    pub async fn connect(
        host: &str,
        port: u16,
        mut config: quiche::Config,
        local: Option<IpAddr>,
        pseudo_order: PseudoHeaderOrder,
        timeout: Option<Duration>,
    ) -> Result<H3Handle> {
        connect_within(timeout, async {
            let peer_addr = resolve(host, port, local).await?;
            let bind_ip = local.unwrap_or(if peer_addr.is_ipv4() {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            } else {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            });
            let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0))
                .await
                .map_err(|e| Error::connect(format!("UDP bind failed: {}", e)))?;
            let local_addr = socket
                .local_addr()
                .map_err(|e| Error::connect(format!("UDP socket has no local address: {}", e)))?;

            let mut scid = [0u8; quiche::MAX_CONN_ID_LEN];
            getrandom_fill(&mut scid).map_err(|e| Error::connect(format!("RNG error: {}", e)))?;
            let scid = quiche::ConnectionId::from_ref(&scid);

            let mut conn = quiche::connect(Some(host), &scid, local_addr, peer_addr, &mut config)
                .map_err(|e| Error::connect(format!("QUIC connect failed: {}", e)))?;

            handshake(&mut conn, &socket, local_addr, peer_addr).await?;

            let h3_config = quiche::h3::Config::new()
                .map_err(|e| Error::connect(format!("HTTP/3 config error: {}", e)))?;
            let h3_conn = quiche::h3::Connection::with_transport(&mut conn, &h3_config)
                .map_err(|e| Error::connect(format!("HTTP/3 init error: {}", e)))?;

            let alive = Arc::new(AtomicBool::new(true));
            let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
            let driver = H3Driver::new(
                rx,
                conn,
                h3_conn,
                Arc::new(socket),
                local_addr,
                peer_addr,
                alive.clone(),
            );
            tokio::spawn(driver.drive());

            tracing::debug!("H3: connected to {}:{} ({})", host, port, peer_addr);
            Ok(H3Handle::new(tx, alive, pseudo_order))
        })
        .await
    }
}

async fn resolve(host: &str, port: u16, local: Option<IpAddr>) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::connect(format!("DNS resolution failed for {}: {}", host, e)))?
        .find(|addr| local.map_or(true, |l| l.is_ipv4() == addr.is_ipv4()))
        .ok_or_else(|| Error::connect(format!("No addresses found for {}", host)))
}

/// Drive the handshake until established. Bounded by the caller's timeout
/// and by quiche's own idle timeout.
async fn handshake(
    conn: &mut quiche::Connection,
    socket: &UdpSocket,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
) -> Result<()> {
    let mut buf = vec![0u8; 65535];
    let mut out = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        loop {
            match conn.send(&mut out) {
                Ok((len, info)) => {
                    socket
                        .send_to(&out[..len], info.to)
                        .await
                        .map_err(|e| Error::connect(format!("UDP send failed: {}", e)))?;
                }
                Err(quiche::Error::Done) => break,
                Err(e) => return Err(Error::connect(format!("QUIC send error: {}", e))),
            }
        }

        if conn.is_established() {
            return Ok(());
        }
        if conn.is_closed() {
            return Err(Error::connect(format!(
                "QUIC connection closed during handshake (local: {:?}, peer: {:?})",
                conn.local_error(),
                conn.peer_error()
            )));
        }

        let wait = conn.timeout().unwrap_or(Duration::from_millis(100));
        match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) if from == peer_addr => {
                let info = quiche::RecvInfo {
                    from,
                    to: local_addr,
                };
                if let Err(e) = conn.recv(&mut buf[..len], info) {
                    tracing::debug!("H3: handshake recv error: {}", e);
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(Error::connect(format!("UDP recv failed: {}", e))),
            Err(_) => conn.on_timeout(),
        }
    }
}
