//! Request, response and cache-key types shared by every component.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use bytes::Bytes;
use regex::Regex;
use url::Url;

/// How the request was initiated by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    #[default]
    SameOrigin,
    NoCors,
    Cors,
}

/// Whether intermediate HTTP caches may answer the fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Always go to the origin.
    Reload,
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub mode: RequestMode,
    /// Resource kind hint such as "document" or "image".
    pub destination: Option<String>,
    pub cache_mode: CacheMode,
    pub body: Bytes,
}

impl Request {
    /// A GET request in same-origin mode.
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            headers: Vec::new(),
            mode: RequestMode::SameOrigin,
            destination: None,
            cache_mode: CacheMode::Default,
            body: Bytes::new(),
        }
    }

    /// A GET request for a top-level document load.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: Some("document".to_string()),
            ..Self::get(url)
        }
    }

    /// Parse `url` and build a GET request.
    pub fn parse_get(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::Config {
            message: format!("Invalid request URL '{}': {}", url, e),
        })?;
        Ok(Self::get(url))
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// A response produced by the network or replayed from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A 200 response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Normalized identity of a request, used as the store lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    /// Wrap a key string read back from a store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rules for turning a request into a [`RequestKey`].
#[derive(Debug, Clone)]
pub struct KeyPolicy {
    ignore_params: Vec<Regex>,
    vary_headers: Vec<String>,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        let ignore_params = EngineConfig::DEFAULT_IGNORED_PARAMS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            ignore_params,
            vary_headers: Vec::new(),
        }
    }
}

impl KeyPolicy {
    /// Build a policy from query-parameter patterns and cache-relevant headers.
    pub fn new(ignore_params: &[String], vary_headers: &[String]) -> Result<Self> {
        let ignore_params = ignore_params
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::Config {
                    message: format!("Invalid ignored-parameter pattern '{}': {}", p, e),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut vary_headers: Vec<String> =
            vary_headers.iter().map(|h| h.to_ascii_lowercase()).collect();
        vary_headers.sort();
        vary_headers.dedup();
        Ok(Self {
            ignore_params,
            vary_headers,
        })
    }

    /// Normalize a request into its store key.
    pub fn key_for(&self, request: &Request) -> RequestKey {
        let mut key = format!(
            "{} {}",
            request.method.to_ascii_uppercase(),
            self.normalize_url(&request.url)
        );

        let varied: Vec<String> = self
            .vary_headers
            .iter()
            .filter_map(|name| request.header(name).map(|v| format!("{}={}", name, v.trim())))
            .collect();
        if !varied.is_empty() {
            key.push_str(" [");
            key.push_str(&varied.join(";"));
            key.push(']');
        }

        RequestKey(key)
    }

    /// Key of a plain GET for `url`, as used by manifests and fallbacks.
    pub fn key_for_url(&self, url: &Url) -> RequestKey {
        RequestKey(format!("GET {}", self.normalize_url(url)))
    }

    fn normalize_url(&self, url: &Url) -> String {
        let mut url = url.clone();
        url.set_fragment(None);

        if url.query().is_some() {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(name, _)| !self.ignore_params.iter().any(|re| re.is_match(name)))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            if kept.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(kept);
            }
        }

        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_key_strips_fragment_and_tracking_params() {
        let policy = KeyPolicy::default();
        let a = Request::get(url("https://app.test/page?id=7&utm_source=mail#top"));
        let b = Request::get(url("https://app.test/page?id=7&fbclid=abc"));
        assert_eq!(policy.key_for(&a), policy.key_for(&b));
        assert_eq!(policy.key_for(&a).as_str(), "GET https://app.test/page?id=7");
    }

    #[test]
    fn test_key_drops_empty_query() {
        let policy = KeyPolicy::default();
        let req = Request::get(url("https://app.test/?utm_campaign=x"));
        assert_eq!(policy.key_for(&req).as_str(), "GET https://app.test/");
    }

    #[test]
    fn test_key_includes_method() {
        let policy = KeyPolicy::default();
        let get = Request::get(url("https://app.test/api"));
        let head = get.clone().with_method("head");
        assert_ne!(policy.key_for(&get), policy.key_for(&head));
        assert!(policy.key_for(&head).as_str().starts_with("HEAD "));
    }

    #[test]
    fn test_vary_headers_are_part_of_key() {
        let policy = KeyPolicy::new(&[], &["Accept-Language".to_string()]).unwrap();
        let en = Request::get(url("https://app.test/")).with_header("accept-language", "en");
        let de = Request::get(url("https://app.test/")).with_header("Accept-Language", "de");
        let en_again = Request::get(url("https://app.test/"))
            .with_header("ACCEPT-LANGUAGE", " en ")
            .with_header("x-unrelated", "1");

        assert_ne!(policy.key_for(&en), policy.key_for(&de));
        assert_eq!(policy.key_for(&en), policy.key_for(&en_again));
        assert_eq!(
            policy.key_for(&en).as_str(),
            "GET https://app.test/ [accept-language=en]"
        );
    }

    #[test]
    fn test_key_for_url_matches_get_request() {
        let policy = KeyPolicy::default();
        let u = url("https://app.test/offline.html");
        assert_eq!(policy.key_for_url(&u), policy.key_for(&Request::get(u.clone())));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = KeyPolicy::new(&["(".to_string()], &[]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_response_success_range() {
        assert!(Response::ok("x").is_success());
        assert!(!Response::new(304, "").is_success());
        assert!(!Response::new(500, "").is_success());
    }
}
