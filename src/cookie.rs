//! RFC 6265 cookie handling.
//!
//! The engine only talks to cookie storage through the [`CookieStore`]
//! capability. [`CookieJar`] is the built-in thread-safe implementation;
//! [`Cookies`] is a simple name/value collection used to seed a client.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use url::Url;

use crate::error::{Error, Result};
use crate::headers::Headers;

/// Attributes carried alongside a cookie name/value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieAttributes {
    pub secure: bool,
    pub http_only: bool,
    /// Absolute expiry. `Max-Age` is folded into this when parsed.
    pub expires: Option<DateTime<Utc>>,
    pub same_site: Option<String>,
    /// Set when no `Domain` attribute was given: only the exact host matches.
    pub host_only: bool,
}

/// Capability the client uses to read and write cookies.
pub trait CookieStore: Send + Sync {
    /// Name/value pairs to send for a request to `domain` + `path`.
    fn get_cookies_for(&self, domain: &str, path: &str, secure: bool) -> Vec<(String, String)>;

    /// Store (or replace) a cookie. An expiry in the past deletes it.
    fn set_cookie(
        &self,
        domain: &str,
        path: &str,
        name: &str,
        value: &str,
        attrs: &CookieAttributes,
    );

    /// Whether the store currently holds anything.
    fn is_empty(&self) -> bool {
        false
    }
}

/// RFC 6265 cookie representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lowercased, without a leading dot. Empty matches every host.
    pub domain: String,
    pub path: String,
    pub attrs: CookieAttributes,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(&domain.into()),
            path: "/".to_string(),
            attrs: CookieAttributes::default(),
        }
    }

    /// Parse a `Set-Cookie` value received for `request_url`.
    ///
    /// Returns `None` for cookies a user agent must ignore (no name, or a
    /// `Domain` attribute the request host does not belong to).
    pub fn parse_set_cookie(header: &str, request_url: &Url) -> Option<Self> {
        let request_host = request_url.host_str()?.to_ascii_lowercase();

        let mut parts = header.split(';').map(str::trim);
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie::new(name, value.trim().trim_matches('"'), request_host.clone());
        cookie.path = default_path(request_url.path());
        cookie.attrs.host_only = true;
        let mut max_age: Option<i64> = None;

        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attr, ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "secure" => cookie.attrs.secure = true,
                "httponly" => cookie.attrs.http_only = true,
                "domain" if !val.is_empty() => {
                    let domain = normalize_domain(val);
                    if !domain_matches(&request_host, &domain) {
                        return None;
                    }
                    cookie.domain = domain;
                    cookie.attrs.host_only = false;
                }
                "path" if val.starts_with('/') => cookie.path = val.to_string(),
                "expires" => cookie.attrs.expires = parse_cookie_date(val),
                "max-age" => max_age = val.parse().ok(),
                "samesite" => cookie.attrs.same_site = Some(val.to_string()),
                _ => {}
            }
        }

        // Max-Age wins over Expires.
        if let Some(secs) = max_age {
            cookie.attrs.expires = Some(if secs <= 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                Utc::now() + ChronoDuration::seconds(secs)
            });
        }
        Some(cookie)
    }

    pub fn is_expired(&self) -> bool {
        self.attrs.expires.is_some_and(|e| e <= Utc::now())
    }

    /// Whether this cookie should be sent to `host` + `path`.
    pub fn matches(&self, host: &str, path: &str, secure: bool) -> bool {
        if self.attrs.secure && !secure {
            return false;
        }
        if self.is_expired() {
            return false;
        }
        let host = host.to_ascii_lowercase();
        let domain_ok = if self.domain.is_empty() {
            true
        } else if self.attrs.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        domain_ok && path_matches(path, &self.path)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Thread-safe in-memory cookie store.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<Vec<Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by (domain, path, name). Expired cookies delete.
    pub fn add(&self, cookie: Cookie) {
        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        cookies.retain(|c| {
            !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        });
        if !cookie.is_expired() {
            cookies.push(cookie);
        }
    }

    /// Snapshot of every live cookie.
    pub fn cookies(&self) -> Vec<Cookie> {
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        cookies.iter().filter(|c| !c.is_expired()).cloned().collect()
    }

    pub fn clear(&self) {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.cookies().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CookieStore for CookieJar {
    fn get_cookies_for(&self, domain: &str, path: &str, secure: bool) -> Vec<(String, String)> {
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        let mut matched: Vec<&Cookie> = cookies
            .iter()
            .filter(|c| c.matches(domain, path, secure))
            .collect();
        // RFC 6265 5.4: longer paths first.
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        matched
            .into_iter()
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect()
    }

    fn set_cookie(
        &self,
        domain: &str,
        path: &str,
        name: &str,
        value: &str,
        attrs: &CookieAttributes,
    ) {
        self.add(Cookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: normalize_domain(domain),
            path: path.to_string(),
            attrs: attrs.clone(),
        });
    }

    fn is_empty(&self) -> bool {
        CookieJar::is_empty(self)
    }
}

/// Ordered cookie collection keyed by name, optionally scoped by domain/path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies {
    entries: Vec<Cookie>,
}

impl Cookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a cookie for every host and path.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set_scoped(name, value, "", "/");
    }

    /// Set a cookie restricted to `domain` and `path`. Empty domain matches any host.
    pub fn set_scoped(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        domain: &str,
        path: &str,
    ) {
        let mut cookie = Cookie::new(name, value, domain);
        cookie.path = if path.is_empty() { "/".into() } else { path.into() };
        self.entries.retain(|c| {
            !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        });
        self.entries.push(cookie);
    }

    /// Look up a cookie value by name. More than one match is a conflict.
    pub fn get(&self, name: &str) -> Result<Option<&str>> {
        self.get_scoped(name, None, None)
    }

    /// Like [`get`](Self::get), narrowed by domain and/or path.
    pub fn get_scoped(
        &self,
        name: &str,
        domain: Option<&str>,
        path: Option<&str>,
    ) -> Result<Option<&str>> {
        let domain = domain.map(normalize_domain);
        let mut found: Option<&str> = None;
        for c in self.filter(name, domain.as_deref(), path) {
            if found.is_some() {
                return Err(Error::CookieConflict(format!(
                    "Multiple cookies exist with name={}",
                    name
                )));
            }
            found = Some(c.value.as_str());
        }
        Ok(found)
    }

    /// Remove cookies by name, optionally narrowed by domain and/or path.
    pub fn delete(&mut self, name: &str, domain: Option<&str>, path: Option<&str>) {
        let domain = domain.map(normalize_domain);
        self.entries.retain(|c| {
            !(c.name == name
                && domain.as_deref().map_or(true, |d| c.domain == d)
                && path.map_or(true, |p| c.path == p))
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copy every cookie from `other`, replacing same (domain, path, name).
    pub fn update(&mut self, other: &Cookies) {
        for c in &other.entries {
            self.set_scoped(c.name.clone(), c.value.clone(), &c.domain, &c.path);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Push every entry into `store`.
    pub(crate) fn seed(&self, store: &dyn CookieStore) {
        for c in &self.entries {
            store.set_cookie(&c.domain, &c.path, &c.name, &c.value, &c.attrs);
        }
    }

    fn filter<'a>(
        &'a self,
        name: &'a str,
        domain: Option<&'a str>,
        path: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Cookie> + 'a {
        self.entries.iter().filter(move |c| {
            c.name == name
                && domain.map_or(true, |d| c.domain == d)
                && path.map_or(true, |p| c.path == p)
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Cookies {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut cookies = Cookies::new();
        for (k, v) in iter {
            cookies.set(k, v);
        }
        cookies
    }
}

/// `Cookie` header value for `url`, if the store has anything to send.
pub(crate) fn cookie_header_for(store: &dyn CookieStore, url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let pairs = store.get_cookies_for(host, url.path(), url.scheme() == "https");
    if pairs.is_empty() {
        return None;
    }
    Some(
        pairs
            .iter()
            .map(|(n, v)| format!("{}={}", n, v))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Record every `Set-Cookie` header of a response received from `url`.
pub(crate) fn store_response_cookies(store: &dyn CookieStore, url: &Url, headers: &Headers) {
    for value in headers.get_all("set-cookie") {
        match Cookie::parse_set_cookie(value, url) {
            Some(c) => {
                tracing::trace!("Cookies: storing {} for {}{}", c.name, c.domain, c.path);
                store.set_cookie(&c.domain, &c.path, &c.name, &c.value, &c.attrs);
            }
            None => tracing::debug!("Cookies: ignoring Set-Cookie from {}", url),
        }
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || (host.ends_with(domain)
            && host.as_bytes().get(host.len() - domain.len() - 1) == Some(&b'.')
            && host.parse::<std::net::IpAddr>().is_err())
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

/// RFC 6265 5.1.4 default-path.
fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

fn parse_cookie_date(date_str: &str) -> Option<DateTime<Utc>> {
    for fmt in [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
    ] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(date_str, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    date_str
        .parse::<i64>()
        .ok()
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_parse_set_cookie_defaults() {
        let c = Cookie::parse_set_cookie("sid=abc; HttpOnly", &url("https://example.com/a/b")).unwrap();
        assert_eq!(c.name, "sid");
        assert_eq!(c.value, "abc");
        assert_eq!(c.domain, "example.com");
        assert_eq!(c.path, "/a");
        assert!(c.attrs.host_only);
        assert!(c.attrs.http_only);
    }

    #[test]
    fn test_parse_rejects_foreign_domain() {
        let u = url("https://example.com/");
        assert!(Cookie::parse_set_cookie("a=1; Domain=other.com", &u).is_none());
        assert!(Cookie::parse_set_cookie("=1", &u).is_none());
        let c = Cookie::parse_set_cookie("a=1; Domain=.Example.com", &url("https://www.example.com/")).unwrap();
        assert_eq!(c.domain, "example.com");
        assert!(!c.attrs.host_only);
    }

    #[test]
    fn test_domain_and_path_matching() {
        let jar = CookieJar::new();
        let u = url("https://www.example.com/");
        store_response_cookies(
            &jar,
            &u,
            &Headers::from_iter([
                ("Set-Cookie", "wide=1; Domain=example.com; Path=/"),
                ("Set-Cookie", "narrow=2; Path=/docs"),
                ("Set-Cookie", "sec=3; Secure"),
            ]),
        );

        let got = jar.get_cookies_for("api.example.com", "/", true);
        assert_eq!(got, vec![("wide".to_string(), "1".to_string())]);

        let got = jar.get_cookies_for("www.example.com", "/docs/page", false);
        assert_eq!(got[0], ("narrow".to_string(), "2".to_string()));
        assert!(!got.iter().any(|(n, _)| n == "sec"));

        assert!(jar.get_cookies_for("www.example.com", "/docsx", true).iter().all(|(n, _)| n != "narrow"));
    }

    #[test]
    fn test_max_age_zero_deletes() {
        let jar = CookieJar::new();
        let u = url("http://example.com/");
        store_response_cookies(&jar, &u, &Headers::from_iter([("Set-Cookie", "a=1")]));
        assert_eq!(jar.len(), 1);
        store_response_cookies(&jar, &u, &Headers::from_iter([("Set-Cookie", "a=; Max-Age=0")]));
        assert!(jar.is_empty());
    }

    #[test]
    fn test_expires_parsing() {
        let past = Cookie::parse_set_cookie(
            "a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT",
            &url("http://example.com/"),
        )
        .unwrap();
        assert!(past.is_expired());
    }

    #[test]
    fn test_cookie_header_for() {
        let jar = CookieJar::new();
        jar.add(Cookie::new("a", "1", "example.com"));
        jar.add(Cookie::new("b", "2", "example.com"));
        assert_eq!(
            cookie_header_for(&jar, &url("https://example.com/x")).as_deref(),
            Some("a=1; b=2")
        );
        assert!(cookie_header_for(&jar, &url("https://other.org/")).is_none());
    }

    #[test]
    fn test_cookies_collection_conflict() {
        let mut cookies = Cookies::new();
        cookies.set_scoped("id", "1", "a.com", "/");
        cookies.set_scoped("id", "2", "b.com", "/");
        let err = cookies.get("id").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::CookieConflict);
        assert_eq!(cookies.get_scoped("id", Some("b.com"), None).unwrap(), Some("2"));

        cookies.delete("id", Some("a.com"), None);
        assert_eq!(cookies.get("id").unwrap(), Some("2"));
        assert_eq!(cookies.get("missing").unwrap(), None);
    }

    #[test]
    fn test_cookies_set_replaces_and_update() {
        let mut cookies: Cookies = [("a", "1")].into_iter().collect();
        cookies.set("a", "2");
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies.get("a").unwrap(), Some("2"));

        let other: Cookies = [("b", "3")].into_iter().collect();
        cookies.update(&other);
        assert_eq!(cookies.len(), 2);
        cookies.clear();
        assert!(cookies.is_empty());
    }

    #[test]
    fn test_wildcard_seed_matches_any_host() {
        let jar = CookieJar::new();
        let cookies: Cookies = [("token", "t")].into_iter().collect();
        cookies.seed(&jar);
        assert_eq!(jar.get_cookies_for("anything.test", "/deep/path", false).len(), 1);
    }

    #[test]
    fn test_default_path() {
        assert_eq!(default_path("/"), "/");
        assert_eq!(default_path("/a"), "/");
        assert_eq!(default_path("/a/b/c"), "/a/b");
        assert_eq!(default_path(""), "/");
    }
}
