//! Redirect following: works out the next hop from a 3xx response.
//!
//! - 301/302 turn POST, PUT and PATCH into GET; 303 turns everything but
//!   HEAD into GET. A rewritten request loses its body and the headers
//!   describing it.
//! - 307/308 resend the same method and body.
//! - Leaving the origin drops `Authorization`. `Cookie` is always dropped;
//!   the client recomputes it from the store for the new URL.

use http::Method;
use url::Url;

use crate::error::{Error, Result};
use crate::request::Request;

const BODY_HEADERS: &[&str] = &["content-type", "content-length", "transfer-encoding"];

/// Request for the next hop, or `None` when `status`/`location` don't
/// call for one.
pub(crate) fn next_request(
    previous: &Request,
    status: u16,
    location: Option<&str>,
) -> Result<Option<Request>> {
    if !matches!(status, 301 | 302 | 303 | 307 | 308) {
        return Ok(None);
    }
    let Some(location) = location else {
        return Ok(None);
    };

    let url = resolve_location(&previous.url, location)?;
    let mut next = previous.clone();

    let rewrite_to_get = match status {
        303 => previous.method != Method::HEAD,
        301 | 302 => matches!(previous.method, Method::POST | Method::PUT | Method::PATCH),
        _ => false,
    };
    if rewrite_to_get {
        next.method = Method::GET;
        next.body = None;
        for name in BODY_HEADERS {
            next.headers.remove(name);
        }
    }

    if !same_origin(&previous.url, &url) {
        if !is_https_upgrade(&previous.url, &url) {
            next.headers.remove("authorization");
        }
        next.headers.remove("host");
    }
    next.headers.remove("cookie");
    next.explicit_cookie = false;
    next.url = url;
    Ok(Some(next))
}

fn resolve_location(base: &Url, location: &str) -> Result<Url> {
    let mut url = base
        .join(location.trim())
        .map_err(|e| Error::remote_protocol(format!("Invalid redirect location {:?}: {}", location, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::UnsupportedProtocol(format!(
                "Redirect to unsupported scheme '{}'",
                other
            )))
        }
    }
    if url.fragment().is_none() {
        url.set_fragment(base.fragment());
    }
    Ok(url)
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// http -> https on the same host and default ports keeps credentials.
fn is_https_upgrade(from: &Url, to: &Url) -> bool {
    from.scheme() == "http"
        && to.scheme() == "https"
        && from.host_str() == to.host_str()
        && from.port_or_known_default() == Some(80)
        && to.port_or_known_default() == Some(443)
}
