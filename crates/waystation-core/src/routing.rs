//! Ordered route table mapping requests to strategies.
//!
//! Routes are checked in registration order and the first match wins. This
//! is the only ordering guarantee: a broad route registered before a narrow
//! one shadows it.

use crate::error::{Error, Result};
use crate::request::Request;
use crate::strategy::Strategy;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Predicate over request attributes.
pub type RequestPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// How a route decides whether it applies to a request.
#[derive(Clone)]
pub enum Matcher {
    /// URL path equals this string.
    Path(String),
    /// URL path is one of these strings.
    Paths(BTreeSet<String>),
    /// Regex tested against the full URL string.
    Regex(Regex),
    /// Top-level document loads only.
    Navigation,
    Predicate(RequestPredicate),
}

impl Matcher {
    /// Compile a regex matcher.
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Matcher::Regex)
            .map_err(|e| Error::Config {
                message: format!("Invalid route pattern '{}': {}", pattern, e),
            })
    }

    pub fn predicate(f: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        Matcher::Predicate(Arc::new(f))
    }

    pub fn matches(&self, request: &Request) -> bool {
        match self {
            Matcher::Path(path) => request.url.path() == path,
            Matcher::Paths(paths) => paths.contains(request.url.path()),
            Matcher::Regex(re) => re.is_match(request.url.as_str()),
            Matcher::Navigation => request.is_navigation(),
            Matcher::Predicate(f) => f(request),
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matcher::Path(path) => write!(f, "Path({})", path),
            Matcher::Paths(paths) => write!(f, "Paths({} paths)", paths.len()),
            Matcher::Regex(re) => write!(f, "Regex({})", re.as_str()),
            Matcher::Navigation => write!(f, "Navigation"),
            Matcher::Predicate(_) => write!(f, "Predicate"),
        }
    }
}

/// A matcher, an optional method filter and the strategy it selects.
#[derive(Debug, Clone)]
pub struct Route {
    pub matcher: Matcher,
    /// Upper-case method the route is limited to; `None` accepts any method.
    pub method: Option<String>,
    pub strategy: Strategy,
}

impl Route {
    /// A route limited to GET requests.
    pub fn new(matcher: Matcher, strategy: Strategy) -> Self {
        Self {
            matcher,
            method: Some("GET".to_string()),
            strategy,
        }
    }

    pub fn with_method(mut self, method: Option<&str>) -> Self {
        self.method = method.map(|m| m.to_ascii_uppercase());
        self
    }

    pub fn accepts(&self, request: &Request) -> bool {
        let method_ok = self
            .method
            .as_deref()
            .map_or(true, |m| request.method.eq_ignore_ascii_case(m));
        method_ok && self.matcher.matches(request)
    }
}

/// Immutable, ordered route table.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// First registered route accepting `request`.
    pub fn match_route(&self, request: &Request) -> Option<&Route> {
        self.routes.iter().find(|route| route.accepts(request))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
