//! BoringSSL TLS connector.
//!
//! Owns the fingerprinted TLS context and the connect path:
//! DNS, TCP (profile socket options, optional local bind), optional proxy
//! tunnel, then the TLS handshake with the profile's ClientHello.

use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use boring::ssl::{
    SslConnector, SslContextBuilder, SslMethod, SslSessionCacheMode, SslVerifyMode, SslVersion,
};
use boring::x509::X509;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintProfile, TlsFingerprint};
use crate::timeouts::connect_within;
use crate::transport::proxy::Proxy;
use crate::transport::tcp::{self, TcpFingerprint};
use crate::version::HttpVersion;

/// Parse root certificates supplied as DER or PEM (PEM may hold a chain).
pub fn parse_root_certificates(certs: &[Vec<u8>]) -> Result<Vec<X509>> {
    let mut parsed = Vec::new();
    for bytes in certs {
        if let Ok(cert) = X509::from_der(bytes) {
            parsed.push(cert);
            continue;
        }
        let chain = X509::stack_from_pem(bytes)
            .map_err(|e| Error::configuration(format!("invalid root certificate: {}", e)))?;
        if chain.is_empty() {
            return Err(Error::configuration("root certificate PEM holds no certificates"));
        }
        parsed.extend(chain);
    }
    Ok(parsed)
}

/// Apply the ClientHello shape of a fingerprint to a TLS context.
pub(crate) fn apply_fingerprint(builder: &mut SslContextBuilder, fp: &TlsFingerprint) -> Result<()> {
    let tls_err = |what: &str, e: boring::error::ErrorStack| {
        Error::configuration(format!("Failed to set {}: {}", what, e))
    };

    let ciphers = fp.tls12_cipher_string();
    if !ciphers.is_empty() {
        builder.set_cipher_list(&ciphers).map_err(|e| tls_err("cipher list", e))?;
    }
    if !fp.curves.is_empty() {
        builder
            .set_curves_list(&fp.curves.join(":"))
            .map_err(|e| tls_err("curves", e))?;
    }
    if !fp.sigalgs.is_empty() {
        builder
            .set_sigalgs_list(&fp.sigalgs.join(":"))
            .map_err(|e| tls_err("signature algorithms", e))?;
    }

    // Chrome: GREASE + permutation. Firefox: neither.
    builder.set_grease_enabled(fp.grease);
    builder.set_permute_extensions(fp.permute_extensions);

    builder
        .set_min_proto_version(Some(SslVersion::TLS1_2))
        .map_err(|e| tls_err("min TLS version", e))?;
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_3))
        .map_err(|e| tls_err("max TLS version", e))?;
    Ok(())
}

/// Apply certificate verification policy and extra trust anchors.
pub(crate) fn apply_trust(builder: &mut SslContextBuilder, verify: bool, roots: &[X509]) -> Result<()> {
    if !verify {
        builder.set_verify(SslVerifyMode::NONE);
        return Ok(());
    }
    builder.set_verify(SslVerifyMode::PEER);
    for cert in roots {
        builder
            .cert_store_mut()
            .add_cert(cert.clone())
            .map_err(|e| Error::configuration(format!("Failed to add root certificate: {}", e)))?;
    }
    Ok(())
}

/// BoringSSL-based connector with browser fingerprinting.
#[derive(Clone)]
pub struct BoringConnector {
    ssl: SslConnector,
    tls: TlsFingerprint,
    tcp: TcpFingerprint,
    roots: Vec<X509>,
    verify: bool,
    local: Option<IpAddr>,
    proxy: Option<Proxy>,
}

impl std::fmt::Debug for BoringConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoringConnector")
            .field("verify", &self.verify)
            .field("local", &self.local)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

impl BoringConnector {
    /// Build the TLS context once; every connection shares it.
    pub fn new(
        profile: &FingerprintProfile,
        verify: bool,
        root_certs: &[Vec<u8>],
        local: Option<IpAddr>,
        proxy: Option<Proxy>,
    ) -> Result<Self> {
        let roots = parse_root_certificates(root_certs)?;
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::configuration(format!("Failed to create SSL connector: {}", e)))?;

        apply_fingerprint(&mut builder, &profile.tls)?;
        apply_trust(&mut builder, verify, &roots)?;

        // Session resumption, as browsers do
        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);
        builder
            .set_alpn_protos(&profile.alpn_wire())
            .map_err(|e| Error::configuration(format!("Failed to set ALPN: {}", e)))?;

        Ok(Self {
            ssl: builder.build(),
            tls: profile.tls.clone(),
            tcp: profile.tcp.clone(),
            roots,
            verify,
            local,
            proxy,
        })
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    pub fn local_address(&self) -> Option<IpAddr> {
        self.local
    }

    /// Plain-HTTP requests through an HTTP proxy use absolute-form targets.
    pub fn uses_absolute_form(&self, is_https: bool) -> bool {
        !is_https && self.proxy.as_ref().is_some_and(Proxy::is_http)
    }

    /// Fresh TLS context for QUIC carrying the same fingerprint and trust.
    pub fn quic_context_builder(&self) -> Result<SslContextBuilder> {
        let mut builder = SslContextBuilder::new(SslMethod::tls_client())
            .map_err(|e| Error::configuration(format!("Failed to create SSL context: {}", e)))?;
        builder
            .set_default_verify_paths()
            .map_err(|e| Error::configuration(format!("Failed to load system roots: {}", e)))?;
        apply_fingerprint(&mut builder, &self.tls)?;
        apply_trust(&mut builder, self.verify, &self.roots)?;
        Ok(builder)
    }

    /// Connect to `host:port`, returning either a plain TCP or TLS stream.
    ///
    /// The whole path (DNS, TCP, proxy, TLS) is bounded by `timeout`.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        is_https: bool,
        timeout: Option<Duration>,
    ) -> Result<MaybeHttpsStream> {
        connect_within(timeout, self.connect_inner(host, port, is_https)).await
    }

    async fn connect_inner(&self, host: &str, port: u16, is_https: bool) -> Result<MaybeHttpsStream> {
        let tcp_stream = match &self.proxy {
            // Plain HTTP through an HTTP proxy talks to the proxy directly.
            Some(proxy) => proxy.connect(host, port, is_https, self.local, &self.tcp).await?,
            None => tcp::connect(host, port, self.local, &self.tcp).await?,
        };

        if !is_https {
            return Ok(MaybeHttpsStream::Http(tcp_stream));
        }

        let mut config = self
            .ssl
            .configure()
            .map_err(|e| Error::connect(format!("Failed to configure SSL: {}", e)))?;
        if !self.verify {
            config.set_verify_hostname(false);
        }

        let ssl_stream = tokio_boring::connect(config, host, tcp_stream)
            .await
            .map_err(|e| Error::connect(format!("TLS handshake with {} failed: {}", host, e)))?;

        tracing::debug!(
            "TLS: connected to {}:{} (alpn={:?})",
            host,
            port,
            ssl_stream
                .ssl()
                .selected_alpn_protocol()
                .map(String::from_utf8_lossy)
        );
        Ok(MaybeHttpsStream::Https(ssl_stream))
    }
}

/// Stream that can be either HTTP (plain TCP) or HTTPS (TLS).
#[derive(Debug)]
pub enum MaybeHttpsStream {
    /// Plain TCP stream for HTTP.
    Http(TcpStream),
    /// TLS-wrapped stream for HTTPS.
    Https(SslStream<TcpStream>),
}

impl MaybeHttpsStream {
    /// Protocol selected by ALPN. Plain TCP and no-ALPN mean HTTP/1.1.
    pub fn negotiated_version(&self) -> HttpVersion {
        match self {
            MaybeHttpsStream::Http(_) => HttpVersion::Http1_1,
            MaybeHttpsStream::Https(stream) => {
                HttpVersion::from_alpn(stream.ssl().selected_alpn_protocol())
            }
        }
    }

    pub fn is_h2(&self) -> bool {
        self.negotiated_version() == HttpVersion::Http2
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
