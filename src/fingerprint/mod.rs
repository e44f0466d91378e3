//! TLS and HTTP/2 fingerprinting configuration.

pub mod http2;
pub mod profiles;
pub mod tls;

pub use http2::{Http2Settings, PseudoHeaderOrder};
pub use profiles::{Browser, FingerprintProfile};
pub use tls::TlsFingerprint;
