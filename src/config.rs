//! Client configuration.
//!
//! [`ClientBuilder`] collects settings as given; [`ClientBuilder::build`]
//! validates them into an immutable [`ClientConfig`] shared by every
//! request the client issues.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::client::Client;
use crate::cookie::{CookieJar, CookieStore, Cookies};
use crate::error::{Error, Result};
use crate::fingerprint::{Browser, FingerprintProfile};
use crate::headers::Headers;
use crate::pool::PoolConfig;
use crate::timeouts::{duration_from_secs_f64, Timeouts};
use crate::transport::proxy::Proxy;

/// Default redirect hop limit.
pub const DEFAULT_MAX_REDIRECTS: usize = 20;

/// Validated, immutable client settings.
pub struct ClientConfig {
    pub browser: Option<Browser>,
    pub profile: FingerprintProfile,
    pub http3: bool,
    pub proxy: Option<Proxy>,
    pub timeouts: Timeouts,
    pub verify: bool,
    pub default_encoding: Option<String>,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    /// Profile headers overlaid with the caller's defaults.
    pub headers: Headers,
    pub cookie_store: Arc<dyn CookieStore>,
    pub local_address: Option<IpAddr>,
    pub root_certificates: Vec<Vec<u8>>,
    pub pool: PoolConfig,
    pub remember_http3_failures: bool,
    pub retries: usize,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("browser", &self.browser)
            .field("http3", &self.http3)
            .field("proxy", &self.proxy)
            .field("timeouts", &self.timeouts)
            .field("verify", &self.verify)
            .field("default_encoding", &self.default_encoding)
            .field("follow_redirects", &self.follow_redirects)
            .field("max_redirects", &self.max_redirects)
            .field("headers", &self.headers)
            .field("local_address", &self.local_address)
            .field("pool", &self.pool)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`].
///
/// ```no_run
/// # async fn run() -> guise::Result<()> {
/// let client = guise::Client::builder()
///     .impersonate("chrome")
///     .timeout_secs(10.0)
///     .build()?;
/// let mut resp = client.get("https://example.com/").send().await?;
/// println!("{}", resp.text().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClientBuilder {
    browser: Option<String>,
    http3: bool,
    proxy: Option<String>,
    timeouts: Timeouts,
    timeout_secs: Option<f64>,
    verify: bool,
    default_encoding: Option<String>,
    follow_redirects: bool,
    max_redirects: usize,
    headers: Headers,
    cookie_store: Option<Arc<dyn CookieStore>>,
    cookies: Cookies,
    local_address: Option<String>,
    root_certificates: Vec<Vec<u8>>,
    pool: PoolConfig,
    remember_http3_failures: bool,
    retries: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            browser: None,
            http3: false,
            proxy: None,
            timeouts: Timeouts::default(),
            timeout_secs: None,
            verify: true,
            default_encoding: None,
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            headers: Headers::new(),
            cookie_store: None,
            cookies: Cookies::new(),
            local_address: None,
            root_certificates: Vec::new(),
            pool: PoolConfig::default(),
            remember_http3_failures: true,
            retries: 0,
        }
    }

    /// Browser to impersonate, e.g. `"chrome"` or `"firefox133"`.
    pub fn impersonate(mut self, browser: impl Into<String>) -> Self {
        self.browser = Some(browser.into());
        self
    }

    /// Try HTTP/3 first for https URLs, falling back to TCP.
    pub fn http3(mut self, enabled: bool) -> Self {
        self.http3 = enabled;
        self
    }

    /// `http://`, `https://`, `socks5://` or `socks5h://` proxy URL.
    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = Some(url.into());
        self
    }

    /// Same limit for connect, read, write and pool acquisition.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeouts = Timeouts::uniform(Some(timeout));
        self.timeout_secs = None;
        self
    }

    /// [`Self::timeout`] in (fractional) seconds.
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Per-class timeouts.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self.timeout_secs = None;
        self
    }

    pub fn no_timeout(self) -> Self {
        self.timeouts(Timeouts::new())
    }

    /// Verify server certificates (default on).
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Trust an extra root certificate (PEM or DER).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.root_certificates.push(cert.into());
        self
    }

    /// Text encoding used by `Response::text` regardless of what the
    /// response declares.
    pub fn default_encoding(mut self, label: impl Into<String>) -> Self {
        self.default_encoding = Some(label.into());
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Add a default header; overrides a profile header of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn headers(mut self, headers: &Headers) -> Self {
        self.headers.merge(headers);
        self
    }

    /// Cookie storage shared with the caller.
    pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.cookie_store = Some(store);
        self
    }

    /// Cookies to seed the client's own jar with.
    pub fn cookies(mut self, cookies: Cookies) -> Self {
        self.cookies = cookies;
        self
    }

    /// Local IP address to bind outgoing connections to.
    pub fn local_address(mut self, addr: impl Into<String>) -> Self {
        self.local_address = Some(addr.into());
        self
    }

    pub fn pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool.idle_timeout = timeout;
        self
    }

    pub fn pool_max_connections_per_host(mut self, max: usize) -> Self {
        self.pool.max_connections_per_host = max;
        self
    }

    /// Skip HTTP/3 for a host after a hard QUIC failure (default on).
    pub fn remember_http3_failures(mut self, remember: bool) -> Self {
        self.remember_http3_failures = remember;
        self
    }

    /// Retry connection failures of idempotent requests up to `n` times.
    pub fn retries(mut self, n: usize) -> Self {
        self.retries = n;
        self
    }

    pub fn build(self) -> Result<Client> {
        Client::with_config(self.into_config()?)
    }

    pub(crate) fn into_config(self) -> Result<ClientConfig> {
        let browser = self
            .browser
            .as_deref()
            .map(str::parse::<Browser>)
            .transpose()?;
        let profile = FingerprintProfile::for_browser(browser);

        let proxy = self.proxy.as_deref().map(Proxy::parse).transpose()?;

        let timeouts = match self.timeout_secs {
            Some(secs) => Timeouts::uniform(Some(
                duration_from_secs_f64(secs).map_err(|e| Error::configuration(e.to_string()))?,
            )),
            None => self.timeouts,
        };

        let default_encoding = self
            .default_encoding
            .map(|label| {
                let label = label.trim().to_ascii_lowercase();
                match encoding_rs::Encoding::for_label(label.as_bytes()) {
                    Some(_) => Ok(label),
                    None => Err(Error::configuration(format!("unknown encoding: {}", label))),
                }
            })
            .transpose()?;

        let local_address = self
            .local_address
            .as_deref()
            .map(|addr| {
                addr.trim_matches(['[', ']'])
                    .parse::<IpAddr>()
                    .map_err(|_| Error::configuration(format!("invalid local address: {}", addr)))
            })
            .transpose()?;

        if self.pool.max_connections_per_host == 0 || self.pool.max_multiplexed_per_host == 0 {
            return Err(Error::configuration("pool limits must be at least 1"));
        }

        let cookie_store = match self.cookie_store {
            Some(store) if !self.cookies.is_empty() && !store.is_empty() => {
                return Err(Error::configuration(
                    "both a cookie store and a cookies collection were supplied; pass one",
                ));
            }
            Some(store) => store,
            None => Arc::new(CookieJar::new()),
        };
        self.cookies.seed(cookie_store.as_ref());

        let mut headers = profile.default_headers();
        headers.merge(&self.headers);

        Ok(ClientConfig {
            browser,
            profile,
            http3: self.http3,
            proxy,
            timeouts,
            verify: self.verify,
            default_encoding,
            follow_redirects: self.follow_redirects,
            max_redirects: self.max_redirects,
            headers,
            cookie_store,
            local_address,
            root_certificates: self.root_certificates,
            pool: self.pool,
            remember_http3_failures: self.remember_http3_failures,
            retries: self.retries,
        })
    }
}
