//! Request-derived cache keys and invalidation scopes.
//!
//! A [`CacheKey`] is built from the method, the path and the query string of
//! a read request. Query pairs are decoded and sorted before the key is
//! formed, so `?a=1&b=2` and `?b=2&a=1` address the same entry.

use std::fmt;

/// The parts of a read request that determine its cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Shorthand for a GET descriptor.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    /// Add one query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Build a descriptor from a method, a path and a raw (still encoded)
    /// query string.
    pub fn from_parts(method: &str, path: &str, raw_query: Option<&str>) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            query: raw_query.map(parse_query).unwrap_or_default(),
        }
    }
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return "/".to_string();
    }
    let with_root = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    with_root.trim_end_matches('/').to_string()
}

/// Canonical cache key: `"{METHOD} {path}"` or `"{METHOD} {path}?{query}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    method: String,
    path: String,
    query: String,
}

impl CacheKey {
    /// Derive the key for a request. Parameter order does not matter.
    pub fn from_request(request: &RequestDescriptor) -> Self {
        let mut pairs: Vec<(&str, &str)> = request
            .query
            .iter()
            .filter(|(k, _)| !k.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.sort_unstable();

        let query = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Self {
            method: request.method.trim().to_ascii_uppercase(),
            path: normalize_path(&request.path),
            query,
        }
    }

    /// Parse the canonical text form produced by `Display`.
    pub fn parse(canonical: &str) -> Option<Self> {
        let (method, target) = canonical.trim().split_once(' ')?;
        if method.is_empty() || !target.starts_with('/') {
            return None;
        }
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        Some(Self::from_request(&RequestDescriptor::from_parts(
            method, path, query,
        )))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.query.is_empty() {
            write!(f, "{} {}", self.method, self.path)
        } else {
            write!(f, "{} {}?{}", self.method, self.path, self.query)
        }
    }
}

/// Which entries an invalidation removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Every entry.
    All,
    /// Entries whose path is the prefix or lies beneath it, any method.
    PathPrefix(String),
    /// Exactly one key.
    Exact(CacheKey),
}

impl InvalidationScope {
    pub fn path_prefix(prefix: &str) -> Self {
        Self::PathPrefix(normalize_path(prefix))
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Self::All => true,
            Self::Exact(exact) => exact == key,
            Self::PathPrefix(prefix) => {
                if prefix == "/" {
                    return true;
                }
                match key.path.strip_prefix(prefix.as_str()) {
                    Some(rest) => rest.is_empty() || rest.starts_with('/'),
                    None => false,
                }
            }
        }
    }
}

impl fmt::Display for InvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::PathPrefix(prefix) => write!(f, "prefix:{}", prefix),
            Self::Exact(key) => write!(f, "key:{}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_ignores_param_order() {
        let a = RequestDescriptor::get("/feeds/areas")
            .with_param("sw_lat", "36.1")
            .with_param("ne_lat", "38.2");
        let b = RequestDescriptor::get("/feeds/areas")
            .with_param("ne_lat", "38.2")
            .with_param("sw_lat", "36.1");
        assert_eq!(CacheKey::from_request(&a), CacheKey::from_request(&b));
    }

    #[test]
    fn test_key_distinguishes_values_and_methods() {
        let a = RequestDescriptor::get("/needs").with_param("only_not_resolved", "true");
        let b = RequestDescriptor::get("/needs").with_param("only_not_resolved", "false");
        assert_ne!(CacheKey::from_request(&a), CacheKey::from_request(&b));

        let head = RequestDescriptor::new("HEAD", "/needs");
        let get = RequestDescriptor::get("/needs");
        assert_ne!(CacheKey::from_request(&head), CacheKey::from_request(&get));
    }

    #[test]
    fn test_trailing_slash_and_case_normalized() {
        let a = CacheKey::from_request(&RequestDescriptor::new("get", "/feeds/7/"));
        let b = CacheKey::from_request(&RequestDescriptor::get("/feeds/7"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "GET /feeds/7");
    }

    #[test]
    fn test_raw_query_is_decoded() {
        let raw = RequestDescriptor::from_parts("GET", "/feeds/areas", Some("reason=enkaz+alti&channel=%40afet"));
        let built = RequestDescriptor::get("/feeds/areas")
            .with_param("channel", "@afet")
            .with_param("reason", "enkaz alti");
        assert_eq!(CacheKey::from_request(&raw), CacheKey::from_request(&built));
    }

    #[test]
    fn test_parse_round_trips_display() {
        let key = CacheKey::from_request(
            &RequestDescriptor::get("/feeds/areas")
                .with_param("b", "2")
                .with_param("a", "x y"),
        );
        let parsed = CacheKey::parse(&key.to_string()).unwrap();
        assert_eq!(parsed, key);
        assert!(CacheKey::parse("no-path").is_none());
    }

    #[test]
    fn test_prefix_scope_is_segment_aware() {
        let scope = InvalidationScope::path_prefix("/feeds/");
        let areas = CacheKey::from_request(&RequestDescriptor::get("/feeds/areas"));
        let feed = CacheKey::from_request(&RequestDescriptor::get("/feeds/12"));
        let other = CacheKey::from_request(&RequestDescriptor::get("/feedsxyz"));
        let needs = CacheKey::from_request(&RequestDescriptor::get("/needs"));

        assert!(scope.matches(&areas));
        assert!(scope.matches(&feed));
        assert!(!scope.matches(&other));
        assert!(!scope.matches(&needs));
        assert!(InvalidationScope::All.matches(&needs));
        assert!(InvalidationScope::Exact(needs.clone()).matches(&needs));
    }

    proptest! {
        #[test]
        fn prop_key_is_order_independent(
            params in proptest::collection::vec(("[a-z_]{1,8}", "[ -~]{0,12}"), 0..8),
            seed in any::<u64>(),
        ) {
            let mut shuffled = params.clone();
            // deterministic rotation stands in for a shuffle
            if !shuffled.is_empty() {
                let len = shuffled.len();
                shuffled.rotate_left((seed as usize) % len);
            }
            let mut a = RequestDescriptor::get("/feeds/areas");
            a.query = params;
            let mut b = RequestDescriptor::get("/feeds/areas");
            b.query = shuffled;
            prop_assert_eq!(CacheKey::from_request(&a), CacheKey::from_request(&b));
        }

        #[test]
        fn prop_canonical_form_parses_back(
            params in proptest::collection::vec(("[a-z]{1,6}", "[a-zA-Z0-9 &=%+]{0,10}"), 0..5),
        ) {
            let mut request = RequestDescriptor::get("/needs");
            request.query = params;
            let key = CacheKey::from_request(&request);
            prop_assert_eq!(CacheKey::parse(&key.to_string()), Some(key));
        }
    }
}
