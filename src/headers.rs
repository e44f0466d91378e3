//! Ordered, case-insensitive header list and browser header presets.
//!
//! `Headers` keeps insertion order and the casing each name was given with.
//! Lookups ignore case. HTTP/1.1 writes names with their stored casing;
//! HTTP/2 and HTTP/3 lowercase them on the wire.

use std::fmt;

/// Ordered header multimap with case-insensitive lookup.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Add an entry without touching existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every entry for `name` with a single one.
    ///
    /// The new entry takes the position and casing of the first existing
    /// entry's slot, but the name is rewritten with the casing given here.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(pos) => {
                self.entries[pos] = (name.clone(), value);
                let mut idx = 0;
                self.entries.retain(|(k, _)| {
                    let keep = idx <= pos || !k.eq_ignore_ascii_case(&name);
                    idx += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Set only if no entry for `name` exists.
    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.contains(&name) {
            self.entries.push((name, value.into()));
        }
    }

    /// Remove every entry for `name`. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    /// Overlay `other` on top of `self`.
    ///
    /// Every name present in `other` replaces all of its entries here. Names
    /// `other` does not mention keep their position and casing.
    pub fn merge(&mut self, other: &Headers) {
        let mut seen: Vec<&str> = Vec::new();
        for (name, _) in &other.entries {
            if seen.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                continue;
            }
            seen.push(name);
            let mut values = other.get_all(name);
            if let Some(first) = values.next() {
                self.set(name.clone(), first);
                let rest: Vec<&str> = values.collect();
                if !rest.is_empty() {
                    let pos = self.position(name).map_or(self.entries.len(), |p| p + 1);
                    for (offset, v) in rest.into_iter().enumerate() {
                        self.entries
                            .insert(pos + offset, (name.clone(), v.to_string()));
                    }
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in wire order: names listed in `order` first (in that order),
    /// then everything else in insertion order.
    pub fn ordered(&self, order: &[&str]) -> Vec<(&str, &str)> {
        let mut out = Vec::with_capacity(self.entries.len());
        let mut taken = vec![false; self.entries.len()];
        for wanted in order {
            for (idx, (k, v)) in self.entries.iter().enumerate() {
                if !taken[idx] && k.eq_ignore_ascii_case(wanted) {
                    taken[idx] = true;
                    out.push((k.as_str(), v.as_str()));
                }
            }
        }
        for (idx, (k, v)) in self.entries.iter().enumerate() {
            if !taken[idx] {
                out.push((k.as_str(), v.as_str()));
            }
        }
        out
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Headers {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.entries
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Headers that only make sense on a single HTTP/1.1 hop.
pub(crate) fn is_connection_specific(name: &str) -> bool {
    const HOP: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-connection",
        "transfer-encoding",
        "upgrade",
        "host",
    ];
    HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Parse the `charset` parameter out of a Content-Type value.
pub(crate) fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (k, v) = param.split_once('=')?;
        if k.trim().eq_ignore_ascii_case("charset") {
            Some(v.trim().trim_matches('"').trim_matches('\''))
        } else {
            None
        }
    })
}

/// Engine defaults used when no browser profile is selected.
pub fn default_headers() -> Headers {
    Headers::from_iter([
        ("User-Agent", concat!("guise/", env!("CARGO_PKG_VERSION"))),
        ("Accept", "*/*"),
        ("Accept-Encoding", "gzip, deflate, br, zstd"),
        ("Connection", "keep-alive"),
    ])
}

/// Chrome 131 browser headers for page navigation.
pub const CHROME_HEADERS: &[(&str, &str)] = &[
    ("sec-ch-ua", r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", r#""macOS""#),
    ("Upgrade-Insecure-Requests", "1"),
    ("User-Agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"),
    ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-User", "?1"),
    ("Sec-Fetch-Dest", "document"),
    ("Accept-Encoding", "gzip, deflate, br, zstd"),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Priority", "u=0, i"),
];

/// Chrome's header emission order (HTTP/1.1 and HTTP/2).
pub const CHROME_HEADER_ORDER: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "cache-control",
    "sec-ch-ua",
    "sec-ch-ua-mobile",
    "sec-ch-ua-platform",
    "upgrade-insecure-requests",
    "origin",
    "content-type",
    "user-agent",
    "accept",
    "sec-fetch-site",
    "sec-fetch-mode",
    "sec-fetch-user",
    "sec-fetch-dest",
    "referer",
    "accept-encoding",
    "accept-language",
    "cookie",
    "priority",
];

/// Firefox 133 browser headers for page navigation.
pub const FIREFOX_HEADERS: &[(&str, &str)] = &[
    ("User-Agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0"),
    ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    ("Accept-Language", "en-US,en;q=0.5"),
    ("Accept-Encoding", "gzip, deflate, br, zstd"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Priority", "u=0, i"),
    ("TE", "trailers"),
];

/// Firefox's header emission order.
pub const FIREFOX_HEADER_ORDER: &[&str] = &[
    "host",
    "user-agent",
    "accept",
    "accept-language",
    "accept-encoding",
    "content-type",
    "content-length",
    "origin",
    "connection",
    "referer",
    "cookie",
    "upgrade-insecure-requests",
    "sec-fetch-dest",
    "sec-fetch-mode",
    "sec-fetch-site",
    "sec-fetch-user",
    "priority",
    "te",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let headers = Headers::from_iter([("Content-Type", "text/html")]);
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert!(headers.get("missing").is_none());
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut headers = Headers::from_iter([("A", "1"), ("x-foo", "old"), ("B", "2"), ("X-Foo", "dup")]);
        headers.set("X-FOO", "new");
        let names: Vec<_> = headers.iter().collect();
        assert_eq!(names, vec![("A", "1"), ("X-FOO", "new"), ("B", "2")]);
    }

    #[test]
    fn test_merge_preserves_unmentioned_casing() {
        let mut base = Headers::from_iter([("user-agent", "base"), ("Accept", "*/*")]);
        let over = Headers::from_iter([("User-Agent", "custom"), ("X-Extra", "1")]);
        base.merge(&over);
        let entries: Vec<_> = base.iter().collect();
        assert_eq!(
            entries,
            vec![("User-Agent", "custom"), ("Accept", "*/*"), ("X-Extra", "1")]
        );
    }

    #[test]
    fn test_merge_keeps_multiple_values() {
        let mut base = Headers::from_iter([("Accept", "*/*")]);
        let over = Headers::from_iter([("X-Multi", "a"), ("x-multi", "b")]);
        base.merge(&over);
        assert_eq!(base.get_all("x-multi").collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_ordered_profile_first() {
        let headers = Headers::from_iter([
            ("X-Custom", "1"),
            ("Accept", "*/*"),
            ("User-Agent", "ua"),
        ]);
        let wire = headers.ordered(&["user-agent", "accept"]);
        assert_eq!(
            wire,
            vec![("User-Agent", "ua"), ("Accept", "*/*"), ("X-Custom", "1")]
        );
    }

    #[test]
    fn test_remove_and_set_default() {
        let mut headers = Headers::from_iter([("Cookie", "a=1"), ("cookie", "b=2")]);
        assert!(headers.remove("COOKIE"));
        assert!(headers.is_empty());
        headers.set_default("Content-Type", "a");
        headers.set_default("content-type", "b");
        assert_eq!(headers.get("Content-Type"), Some("a"));
    }

    #[test]
    fn test_charset_param() {
        assert_eq!(charset_param("text/html; charset=ISO-8859-1"), Some("ISO-8859-1"));
        assert_eq!(charset_param("text/html;charset=\"utf-8\""), Some("utf-8"));
        assert_eq!(charset_param("application/json"), None);
    }

    #[test]
    fn test_connection_specific() {
        assert!(is_connection_specific("Connection"));
        assert!(is_connection_specific("transfer-encoding"));
        assert!(!is_connection_specific("accept"));
    }

    #[test]
    fn test_presets_covered_by_order() {
        for (name, _) in CHROME_HEADERS {
            assert!(
                CHROME_HEADER_ORDER.iter().any(|o| o.eq_ignore_ascii_case(name)),
                "{} missing from chrome order",
                name
            );
        }
        for (name, _) in FIREFOX_HEADERS {
            assert!(
                FIREFOX_HEADER_ORDER.iter().any(|o| o.eq_ignore_ascii_case(name)),
                "{} missing from firefox order",
                name
            );
        }
    }
}
