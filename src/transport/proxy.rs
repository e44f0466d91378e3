//! Proxy support: HTTP CONNECT tunnels and SOCKS5 handshakes.

use std::net::IpAddr;

use base64::Engine as _;
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use crate::error::{Error, Result};
use crate::transport::tcp::{self, TcpFingerprint};

/// Largest CONNECT response head we accept.
const MAX_CONNECT_RESPONSE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    /// `http://` or `https://` proxy URL: plain TCP to the proxy, CONNECT for tunnels.
    Http,
    /// `socks5://`: target resolved locally.
    Socks5,
    /// `socks5h://`: target name resolved by the proxy.
    Socks5h,
}

/// Parsed proxy URL.
#[derive(Clone, PartialEq, Eq)]
pub struct Proxy {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    credentials: Option<(String, String)>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Proxy {
    /// Parse a proxy URL. Bad URLs are configuration errors.
    pub fn parse(proxy_url: &str) -> Result<Self> {
        let url = Url::parse(proxy_url)
            .map_err(|e| Error::configuration(format!("invalid proxy URL '{}': {}", proxy_url, e)))?;
        let (scheme, default_port) = match url.scheme() {
            "http" => (ProxyScheme::Http, 80),
            "https" => (ProxyScheme::Http, 443),
            "socks5" => (ProxyScheme::Socks5, 1080),
            "socks5h" => (ProxyScheme::Socks5h, 1080),
            other => {
                return Err(Error::configuration(format!(
                    "unsupported proxy scheme '{}'",
                    other
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::configuration("proxy URL has no host"))?
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();
        let credentials = if url.username().is_empty() {
            None
        } else {
            Some((
                percent_decode(url.username()),
                percent_decode(url.password().unwrap_or("")),
            ))
        };
        Ok(Self {
            scheme,
            host,
            port: url.port().unwrap_or(default_port),
            credentials,
        })
    }

    pub fn is_http(&self) -> bool {
        self.scheme == ProxyScheme::Http
    }

    /// `Proxy-Authorization` value for HTTP proxies.
    pub fn basic_auth(&self) -> Option<String> {
        self.credentials.as_ref().map(|(user, pass)| {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
            format!("Basic {}", token)
        })
    }

    /// Open a TCP connection to the proxy and, when `tunnel` is set (or the
    /// proxy is SOCKS), establish a tunnel to `target_host:target_port`.
    pub async fn connect(
        &self,
        target_host: &str,
        target_port: u16,
        tunnel: bool,
        local: Option<IpAddr>,
        fp: &TcpFingerprint,
    ) -> Result<TcpStream> {
        let mut stream = tcp::connect(&self.host, self.port, local, fp)
            .await
            .map_err(|e| Error::proxy(format!("failed to reach proxy {}:{}: {}", self.host, self.port, e)))?;

        match self.scheme {
            ProxyScheme::Http if tunnel => {
                tracing::debug!("Proxy: CONNECT {}:{} via {}:{}", target_host, target_port, self.host, self.port);
                http_connect(&mut stream, target_host, target_port, self.basic_auth().as_deref()).await?;
            }
            ProxyScheme::Http => {}
            ProxyScheme::Socks5 | ProxyScheme::Socks5h => {
                tracing::debug!("Proxy: SOCKS5 {}:{} via {}:{}", target_host, target_port, self.host, self.port);
                let target = if self.scheme == ProxyScheme::Socks5 {
                    resolve_locally(target_host, target_port).await?
                } else {
                    SocksTarget::Domain(target_host.to_string())
                };
                socks5_handshake(&mut stream, &target, target_port, self.credentials.as_ref()).await?;
            }
        }
        Ok(stream)
    }
}

/// Establish an HTTP CONNECT tunnel over an already-open proxy connection.
pub async fn http_connect<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    auth: Option<&str>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = authority(host, port);
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);
    if let Some(auth) = auth {
        request.push_str("Proxy-Authorization: ");
        request.push_str(auth);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::proxy(format!("failed to send CONNECT request: {}", e)))?;

    // Read byte-wise so nothing past the head is swallowed.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_RESPONSE {
            return Err(Error::proxy("CONNECT response headers too large"));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| Error::proxy(format!("failed to read CONNECT response: {}", e)))?;
        if n == 0 {
            return Err(Error::proxy("proxy closed connection during CONNECT"));
        }
        head.push(byte[0]);
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    response
        .parse(&head)
        .map_err(|e| Error::proxy(format!("malformed CONNECT response: {}", e)))?;
    match response.code {
        Some(code) if (200..300).contains(&code) => Ok(()),
        Some(code) => Err(Error::proxy(format!(
            "CONNECT to {} failed: {} {}",
            authority,
            code,
            response.reason.unwrap_or("")
        ))),
        None => Err(Error::proxy("CONNECT response missing status")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocksTarget {
    Ip(IpAddr),
    Domain(String),
}

async fn resolve_locally(host: &str, port: u16) -> Result<SocksTarget> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocksTarget::Ip(ip));
    }
    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::proxy(format!("SOCKS5 target lookup failed for {}: {}", host, e)))?
        .next()
        .ok_or_else(|| Error::proxy(format!("SOCKS5 target {} has no addresses", host)))?;
    Ok(SocksTarget::Ip(addr.ip()))
}

/// SOCKS5 handshake (RFC 1928) with optional username/password auth (RFC 1929).
pub async fn socks5_handshake<S>(
    stream: &mut S,
    target: &SocksTarget,
    port: u16,
    credentials: Option<&(String, String)>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_err = |what: &str, e: std::io::Error| Error::proxy(format!("SOCKS5 {}: {}", what, e));

    // Method negotiation
    let greeting: &[u8] = if credentials.is_some() {
        &[0x05, 0x02, 0x00, 0x02]
    } else {
        &[0x05, 0x01, 0x00]
    };
    stream.write_all(greeting).await.map_err(|e| io_err("greeting", e))?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(|e| io_err("method reply", e))?;
    if choice[0] != 0x05 {
        return Err(Error::proxy("SOCKS5 proxy replied with wrong version"));
    }
    match (choice[1], credentials) {
        (0x00, _) => {}
        (0x02, Some((user, pass))) => {
            if user.len() > 255 || pass.len() > 255 {
                return Err(Error::proxy("SOCKS5 credentials too long"));
            }
            let mut auth = Vec::with_capacity(3 + user.len() + pass.len());
            auth.push(0x01);
            auth.push(user.len() as u8);
            auth.extend_from_slice(user.as_bytes());
            auth.push(pass.len() as u8);
            auth.extend_from_slice(pass.as_bytes());
            stream.write_all(&auth).await.map_err(|e| io_err("auth", e))?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await.map_err(|e| io_err("auth reply", e))?;
            if status[1] != 0x00 {
                return Err(Error::proxy("SOCKS5 authentication failed"));
            }
        }
        (0xFF, _) => return Err(Error::proxy("SOCKS5 proxy accepted none of our auth methods")),
        (other, _) => {
            return Err(Error::proxy(format!("SOCKS5 proxy chose unsupported method {:#04x}", other)))
        }
    }

    // Connect request
    let mut request = vec![0x05, 0x01, 0x00];
    match target {
        SocksTarget::Ip(IpAddr::V4(ip)) => {
            request.push(0x01);
            request.extend_from_slice(&ip.octets());
        }
        SocksTarget::Ip(IpAddr::V6(ip)) => {
            request.push(0x04);
            request.extend_from_slice(&ip.octets());
        }
        SocksTarget::Domain(name) => {
            if name.len() > 255 {
                return Err(Error::proxy("SOCKS5 target host name too long"));
            }
            request.push(0x03);
            request.push(name.len() as u8);
            request.extend_from_slice(name.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.map_err(|e| io_err("connect request", e))?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.map_err(|e| io_err("connect reply", e))?;
    if reply[1] != 0x00 {
        return Err(Error::proxy(format!(
            "SOCKS5 connect rejected: {}",
            socks5_reply_message(reply[1])
        )));
    }

    // Skip bound address
    let skip = match reply[3] {
        0x01 => 4 + 2,
        0x04 => 16 + 2,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(|e| io_err("bound address", e))?;
            len[0] as usize + 2
        }
        _ => return Err(Error::proxy("SOCKS5 reply has invalid address type")),
    };
    let mut bound = vec![0u8; skip];
    stream.read_exact(&mut bound).await.map_err(|e| io_err("bound address", e))?;
    Ok(())
}

fn socks5_reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}
