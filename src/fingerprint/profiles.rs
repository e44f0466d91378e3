//! Browser fingerprint profiles.

use std::fmt;
use std::str::FromStr;

use super::http2::{Http2Settings, PseudoHeaderOrder};
use super::tls::TlsFingerprint;
use crate::error::Error;
use crate::headers::{self, Headers};
use crate::transport::tcp::TcpFingerprint;

/// Browsers we can impersonate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Browser {
    /// Chrome 131 on macOS.
    Chrome,
    /// Firefox 133 on macOS.
    Firefox,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
        }
    }

    /// Full fingerprint for this browser.
    pub fn profile(&self) -> FingerprintProfile {
        match self {
            Self::Chrome => FingerprintProfile {
                browser: Some(Browser::Chrome),
                tls: TlsFingerprint::chrome(),
                http2: Http2Settings::chrome(),
                alpn: &["h2", "http/1.1"],
                pseudo_order: PseudoHeaderOrder::Chrome,
                headers: headers::CHROME_HEADERS,
                header_order: headers::CHROME_HEADER_ORDER,
                tcp: TcpFingerprint::chrome(),
            },
            Self::Firefox => FingerprintProfile {
                browser: Some(Browser::Firefox),
                tls: TlsFingerprint::firefox(),
                http2: Http2Settings::firefox(),
                alpn: &["h2", "http/1.1"],
                pseudo_order: PseudoHeaderOrder::Firefox,
                headers: headers::FIREFOX_HEADERS,
                header_order: headers::FIREFOX_HEADER_ORDER,
                tcp: TcpFingerprint::firefox(),
            },
        }
    }
}

impl FromStr for Browser {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" | "chrome131" | "chrome_131" => Ok(Self::Chrome),
            "firefox" | "firefox133" | "firefox_133" => Ok(Self::Firefox),
            other => Err(Error::configuration(format!(
                "unsupported browser '{}' (expected chrome or firefox)",
                other
            ))),
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the wire sees that identifies a client.
///
/// Static data: building one never touches the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintProfile {
    /// `None` for the engine's own, non-impersonating profile.
    pub browser: Option<Browser>,
    pub tls: TlsFingerprint,
    pub http2: Http2Settings,
    /// ALPN offer, most preferred first.
    pub alpn: &'static [&'static str],
    pub pseudo_order: PseudoHeaderOrder,
    /// Default request headers.
    pub headers: &'static [(&'static str, &'static str)],
    /// Emission order for known header names (lowercase).
    pub header_order: &'static [&'static str],
    pub tcp: TcpFingerprint,
}

impl FingerprintProfile {
    /// No impersonation: BoringSSL defaults and engine headers.
    pub fn plain() -> Self {
        Self {
            browser: None,
            tls: TlsFingerprint {
                cipher_list: &[],
                sigalgs: &[],
                curves: &[],
                extension_order: &[],
                grease: false,
                permute_extensions: false,
            },
            http2: Http2Settings::plain(),
            alpn: &["h2", "http/1.1"],
            pseudo_order: PseudoHeaderOrder::Chrome,
            headers: &[],
            header_order: &["host"],
            tcp: TcpFingerprint::os_default(),
        }
    }

    pub fn for_browser(browser: Option<Browser>) -> Self {
        browser.map_or_else(Self::plain, |b| b.profile())
    }

    pub fn is_impersonating(&self) -> bool {
        self.browser.is_some()
    }

    /// Default headers sent with every request.
    pub fn default_headers(&self) -> Headers {
        if self.headers.is_empty() {
            headers::default_headers()
        } else {
            self.headers.iter().copied().collect()
        }
    }

    /// ALPN offer in TLS wire format (length-prefixed).
    pub fn alpn_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for proto in self.alpn {
            out.push(proto.len() as u8);
            out.extend_from_slice(proto.as_bytes());
        }
        out
    }

    /// Akamai HTTP/2 fingerprint string for this profile.
    pub fn akamai_fingerprint(&self) -> String {
        self.http2.akamai_fingerprint(self.pseudo_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_from_str() {
        assert_eq!("chrome".parse::<Browser>().unwrap(), Browser::Chrome);
        assert_eq!("Chrome131".parse::<Browser>().unwrap(), Browser::Chrome);
        assert_eq!("FIREFOX".parse::<Browser>().unwrap(), Browser::Firefox);
        assert_eq!("firefox133".parse::<Browser>().unwrap(), Browser::Firefox);

        let err = "netscape".parse::<Browser>().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_profiles_are_deterministic() {
        assert_eq!(Browser::Chrome.profile(), Browser::Chrome.profile());
        assert_ne!(Browser::Chrome.profile(), Browser::Firefox.profile());
    }

    #[test]
    fn test_alpn_wire() {
        assert_eq!(Browser::Chrome.profile().alpn_wire(), b"\x02h2\x08http/1.1".to_vec());
    }

    #[test]
    fn test_plain_profile_headers() {
        let plain = FingerprintProfile::plain();
        assert!(!plain.is_impersonating());
        let headers = plain.default_headers();
        assert!(headers.get("user-agent").unwrap().starts_with("guise/"));
    }

    #[test]
    fn test_chrome_headers() {
        let headers = Browser::Chrome.profile().default_headers();
        assert!(headers.get("User-Agent").unwrap().contains("Chrome/131"));
        assert_eq!(headers.get("sec-fetch-mode"), Some("navigate"));
    }
}
