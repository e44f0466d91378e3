//! TCP connection setup and TCP/IP stack fingerprinting.
//!
//! Configures TCP socket options to match browser behavior:
//! - Initial window size (via socket buffers)
//! - TTL (Time To Live)
//!
//! These options are detectable before the TLS handshake (p0f-style
//! fingerprinting). MSS, window scaling, SACK and timestamps are negotiated
//! by the OS stack and cannot be set through portable socket options.

use std::io;
use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpSocket, TcpStream};

use crate::error::{Error, Result};

/// TCP/IP fingerprint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFingerprint {
    /// Socket buffer size (bytes), shapes the advertised receive window.
    /// `None` leaves the OS default.
    pub window_size: Option<u32>,
    /// Initial TTL for IPv4 packets. macOS/Linux: 64, Windows: 128.
    pub ttl: Option<u8>,
    /// Disable Nagle's algorithm. Browsers do.
    pub nodelay: bool,
}

impl Default for TcpFingerprint {
    fn default() -> Self {
        Self::chrome()
    }
}

impl TcpFingerprint {
    /// Create Chrome TCP fingerprint (macOS).
    pub fn chrome() -> Self {
        Self {
            window_size: Some(65_535),
            ttl: Some(64),
            nodelay: true,
        }
    }

    /// Create Firefox TCP fingerprint.
    /// Firefox uses the same TCP settings as Chrome on the same OS.
    pub fn firefox() -> Self {
        Self::chrome()
    }

    /// Leave everything to the OS.
    pub fn os_default() -> Self {
        Self {
            window_size: None,
            ttl: None,
            nodelay: true,
        }
    }
}

/// Configure a TCP socket with fingerprint settings.
pub fn configure_tcp_socket(socket: SockRef<'_>, fp: &TcpFingerprint, ipv4: bool) -> io::Result<()> {
    if let Some(window) = fp.window_size {
        socket.set_recv_buffer_size(window as usize)?;
        socket.set_send_buffer_size(window as usize)?;
    }
    if let (Some(ttl), true) = (fp.ttl, ipv4) {
        socket.set_ttl_v4(ttl as u32)?;
    }
    Ok(())
}

/// Resolve `host:port` and connect, trying each address in turn.
///
/// `local` binds the socket before connecting; only addresses of the same
/// family are tried when it is set.
pub async fn connect(
    host: &str,
    port: u16,
    local: Option<IpAddr>,
    fp: &TcpFingerprint,
) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::connect(format!("DNS resolution failed for {}:{}: {}", host, port, e)))?
        .filter(|addr| local.map_or(true, |l| l.is_ipv4() == addr.is_ipv4()))
        .collect();

    if addrs.is_empty() {
        return Err(Error::connect(format!("No addresses found for {}:{}", host, port)));
    }

    let mut last_err = None;
    for addr in addrs {
        match connect_addr(addr, local, fp).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("TCP: connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(Error::connect(format!(
        "Failed to connect to {}:{}: {}",
        host,
        port,
        last_err.map_or_else(|| "unknown error".to_string(), |e| e.to_string())
    )))
}

async fn connect_addr(
    addr: SocketAddr,
    local: Option<IpAddr>,
    fp: &TcpFingerprint,
) -> io::Result<TcpStream> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    configure_tcp_socket(SockRef::from(&socket), fp, addr.is_ipv4())?;
    if let Some(ip) = local {
        socket.bind(&SocketAddr::new(ip, 0).into())?;
    }

    let socket = TcpSocket::from_std_stream(socket.into());
    let stream = socket.connect(addr).await?;
    stream.set_nodelay(fp.nodelay)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_fingerprint_defaults() {
        let fp = TcpFingerprint::default();
        assert_eq!(fp.window_size, Some(65_535));
        assert_eq!(fp.ttl, Some(64));
        assert!(fp.nodelay);
    }

    #[test]
    fn test_chrome_firefox_similar() {
        assert_eq!(TcpFingerprint::chrome(), TcpFingerprint::firefox());
        assert_eq!(TcpFingerprint::os_default().ttl, None);
    }

    #[tokio::test]
    async fn test_connect_with_local_bind() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let local: IpAddr = "127.0.0.1".parse().unwrap();

        let stream = connect("127.0.0.1", port, Some(local), &TcpFingerprint::chrome())
            .await
            .unwrap();
        assert_eq!(stream.local_addr().unwrap().ip(), local);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("127.0.0.1", port, None, &TcpFingerprint::os_default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ConnectError);
    }
}
