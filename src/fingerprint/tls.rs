//! TLS fingerprint configuration (JA3/JA4 inputs).
//!
//! BoringSSL builds the ClientHello; we control the cipher order, groups,
//! signature algorithms, GREASE and extension permutation. The extension
//! list is kept for reference: modern browsers permute it per connection.

/// Chrome 131 cipher suites in exact order (TLS 1.3 suites are fixed by BoringSSL).
pub const CHROME_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-RSA-AES256-SHA",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA",
    "AES256-SHA",
];

/// Chrome 131 signature algorithms.
pub const CHROME_SIGALGS: &[&str] = &[
    "ecdsa_secp256r1_sha256",
    "rsa_pss_rsae_sha256",
    "rsa_pkcs1_sha256",
    "ecdsa_secp384r1_sha384",
    "rsa_pss_rsae_sha384",
    "rsa_pkcs1_sha384",
    "rsa_pss_rsae_sha512",
    "rsa_pkcs1_sha512",
];

/// Chrome 131 supported groups.
pub const CHROME_CURVES: &[&str] = &["X25519", "P-256", "P-384"];

/// Chrome 131 extension IDs (reference order).
pub const CHROME_EXTENSIONS: &[u16] = &[
    0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, 21,
];

/// Firefox 133 cipher suites in exact order.
pub const FIREFOX_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_CHACHA20_POLY1305_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-AES256-SHA",
    "ECDHE-ECDSA-AES128-SHA",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-RSA-AES256-SHA",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA",
    "AES256-SHA",
];

/// Firefox 133 signature algorithms.
pub const FIREFOX_SIGALGS: &[&str] = &[
    "ecdsa_secp256r1_sha256",
    "ecdsa_secp384r1_sha384",
    "ecdsa_secp521r1_sha512",
    "rsa_pss_rsae_sha256",
    "rsa_pss_rsae_sha384",
    "rsa_pss_rsae_sha512",
    "rsa_pkcs1_sha256",
    "rsa_pkcs1_sha384",
    "rsa_pkcs1_sha512",
    "ecdsa_sha1",
    "rsa_pkcs1_sha1",
];

/// Firefox 133 supported groups.
pub const FIREFOX_CURVES: &[&str] = &["X25519", "P-256", "P-384", "P-521"];

/// Firefox 133 extension IDs (reference order).
pub const FIREFOX_EXTENSIONS: &[u16] = &[
    0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28, 65037,
];

/// TLS fingerprint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFingerprint {
    /// Cipher suites in order (BoringSSL names; `TLS_` entries are TLS 1.3).
    pub cipher_list: &'static [&'static str],
    /// Signature algorithms.
    pub sigalgs: &'static [&'static str],
    /// Supported curves/groups.
    pub curves: &'static [&'static str],
    /// Extension order (reference for JA3; not enforced).
    pub extension_order: &'static [u16],
    /// Enable GREASE values.
    pub grease: bool,
    /// Shuffle extension order per handshake.
    pub permute_extensions: bool,
}

impl TlsFingerprint {
    /// Create a TLS fingerprint for Chrome 131.
    pub fn chrome() -> Self {
        Self {
            cipher_list: CHROME_CIPHERS,
            sigalgs: CHROME_SIGALGS,
            curves: CHROME_CURVES,
            extension_order: CHROME_EXTENSIONS,
            grease: true,
            permute_extensions: true,
        }
    }

    /// Create a TLS fingerprint for Firefox 133 (no GREASE).
    pub fn firefox() -> Self {
        Self {
            cipher_list: FIREFOX_CIPHERS,
            sigalgs: FIREFOX_SIGALGS,
            curves: FIREFOX_CURVES,
            extension_order: FIREFOX_EXTENSIONS,
            grease: false,
            permute_extensions: false,
        }
    }

    /// TLS 1.2 suites only, as `set_cipher_list` expects them.
    pub(crate) fn tls12_cipher_string(&self) -> String {
        self.cipher_list
            .iter()
            .filter(|c| !c.starts_with("TLS_"))
            .copied()
            .collect::<Vec<_>>()
            .join(":")
    }
}
