//! Negotiated HTTP version.

use std::fmt;

/// Protocol a response was exchanged over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVersion {
    Http1_1,
    Http2,
    Http3,
}

impl HttpVersion {
    /// Get human-readable version string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1_1 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
            Self::Http3 => "HTTP/3",
        }
    }

    /// Check if this version supports multiplexing.
    pub fn supports_multiplexing(&self) -> bool {
        matches!(self, Self::Http2 | Self::Http3)
    }

    /// Map an ALPN protocol id to a version. Anything but `h2` is HTTP/1.1.
    pub fn from_alpn(alpn: Option<&[u8]>) -> Self {
        match alpn {
            Some(b"h2") => Self::Http2,
            _ => Self::Http1_1,
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_alpn() {
        assert_eq!(HttpVersion::from_alpn(Some(b"h2")), HttpVersion::Http2);
        assert_eq!(HttpVersion::from_alpn(Some(b"http/1.1")), HttpVersion::Http1_1);
        assert_eq!(HttpVersion::from_alpn(None), HttpVersion::Http1_1);
    }

    #[test]
    fn test_display() {
        assert_eq!(HttpVersion::Http3.to_string(), "HTTP/3");
        assert!(HttpVersion::Http2.supports_multiplexing());
        assert!(!HttpVersion::Http1_1.supports_multiplexing());
    }
}
