//! Per-request protocol selection.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use url::Url;

use crate::error::{Error, ErrorKind, Result};

/// How a request reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// QUIC only; no TCP fallback.
    Http3Only,
    /// QUIC first, TCP (ALPN picks HTTP/2 or HTTP/1.1) if QUIC fails.
    Http3ThenTcp,
    /// TCP with ALPN.
    Tcp,
}

/// Hosts where QUIC failed hard this session.
#[derive(Debug, Default)]
pub struct Http3Failures {
    hosts: Mutex<HashSet<(String, u16)>>,
}

impl Http3Failures {
    pub fn remember(&self, host: &str, port: u16) {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((host.to_ascii_lowercase(), port));
    }

    pub fn contains(&self, host: &str, port: u16) -> bool {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(host.to_ascii_lowercase(), port))
    }

    pub fn clear(&self) {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Inputs to [`choose_route`].
#[derive(Debug, Clone, Copy)]
pub struct RoutePolicy {
    /// Client-level HTTP/3 opt-in.
    pub http3: bool,
    /// Per-request override.
    pub force_http3: Option<bool>,
    pub proxied: bool,
}

pub fn choose_route(url: &Url, policy: RoutePolicy, failures: &Http3Failures) -> Result<Route> {
    let https = url.scheme() == "https";
    match policy.force_http3 {
        Some(true) => {
            if !https {
                return Err(Error::UnsupportedProtocol(
                    "HTTP/3 requires an https URL".into(),
                ));
            }
            if policy.proxied {
                return Err(Error::UnsupportedProtocol(
                    "HTTP/3 cannot be used through a proxy".into(),
                ));
            }
            return Ok(Route::Http3Only);
        }
        Some(false) => return Ok(Route::Tcp),
        None => {}
    }

    if !policy.http3 || !https || policy.proxied {
        return Ok(Route::Tcp);
    }
    let host = url.host_str().unwrap_or_default();
    let port = url.port_or_known_default().unwrap_or(443);
    if failures.contains(host, port) {
        tracing::debug!("H3: skipping {}:{} after an earlier QUIC failure", host, port);
        return Ok(Route::Tcp);
    }
    Ok(Route::Http3ThenTcp)
}

/// QUIC failures that justify falling back to TCP: the connection never
/// came up. Errors on an established connection are returned as is.
pub fn is_hard_quic_failure(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::ConnectError | ErrorKind::ConnectTimeout)
}
