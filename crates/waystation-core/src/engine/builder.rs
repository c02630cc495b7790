//! Builder for configuring an InterceptionEngine.

use super::lifecycle::{AtomicLifecycleState, LifecycleState};
use super::{InstallMode, InterceptionEngine, PrecacheManifest, Takeover};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::manifest::{self, ResourceDescriptor};
use crate::network::DynFetcher;
use crate::request::KeyPolicy;
use crate::routing::{Matcher, Route, Router};
use crate::store::{DynCacheStorage, MemoryStorage, StoreName};
use crate::strategy::{CacheFirst, Strategy};
use crate::warmup::WarmupPolicy;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

enum PendingRoute {
    Ready(Route),
    /// CacheFirst over the paths precached into this store, built once the
    /// scope URL is known.
    Precached(StoreName),
}

/// Builder for configuring an [`InterceptionEngine`].
///
/// # Example
///
/// ```rust,ignore
/// use waystation_core::{InterceptionEngine, NavigationFallback, Matcher, Route, Strategy};
///
/// let engine = InterceptionEngine::builder()
///     .scope_url(Url::parse("https://app.example/")?)
///     .storage(Arc::new(SqliteStorage::open("cache.sqlite")?))
///     .fetcher(Arc::new(HttpFetcher::new()?))
///     .precache_and_route("precache-v1", manifest)
///     .route(Route::new(
///         Matcher::Navigation,
///         Strategy::NavigationFallback(NavigationFallback::new("precache-v1", "/offline.html")),
///     ))
///     .build()?;
/// ```
pub struct EngineBuilder {
    scope_url: Option<Url>,
    storage: Option<DynCacheStorage>,
    fetcher: Option<DynFetcher>,
    keys: KeyPolicy,
    warmup_policy: WarmupPolicy,
    install_mode: InstallMode,
    fetch_concurrency: usize,
    takeover: Takeover,
    cleanup_prefix: Option<String>,
    precache: Vec<(StoreName, Vec<ResourceDescriptor>)>,
    routes: Vec<PendingRoute>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            scope_url: None,
            storage: None,
            fetcher: None,
            keys: KeyPolicy::default(),
            warmup_policy: WarmupPolicy::default(),
            install_mode: InstallMode::default(),
            fetch_concurrency: EngineConfig::DEFAULT_FETCH_CONCURRENCY,
            takeover: Takeover::default(),
            cleanup_prefix: None,
            precache: Vec::new(),
            routes: Vec::new(),
        }
    }

    /// Base URL manifest entries and fallback URLs are resolved against.
    ///
    /// Required.
    pub fn scope_url(mut self, url: Url) -> Self {
        self.scope_url = Some(url);
        self
    }

    /// Cache storage backend.
    ///
    /// Default: an in-memory store.
    pub fn storage(mut self, storage: DynCacheStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Network capability. Required.
    pub fn fetcher(mut self, fetcher: DynFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn key_policy(mut self, keys: KeyPolicy) -> Self {
        self.keys = keys;
        self
    }

    /// Default: [`WarmupPolicy::FailFast`]
    pub fn warmup_policy(mut self, policy: WarmupPolicy) -> Self {
        self.warmup_policy = policy;
        self
    }

    /// Default: [`InstallMode::Sequential`]
    pub fn install_mode(mut self, mode: InstallMode) -> Self {
        self.install_mode = mode;
        self
    }

    /// Fetches in flight per warm-up run.
    pub fn fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    /// Default: [`Takeover::Immediate`]
    pub fn takeover(mut self, takeover: Takeover) -> Self {
        self.takeover = takeover;
        self
    }

    /// On activation, delete stores whose name starts with `prefix` and
    /// that this engine does not use.
    ///
    /// Pair this with version-qualified store names (`pages-v2`) so an
    /// update never shares a store with the engine it replaces.
    pub fn cleanup_outdated(mut self, prefix: impl Into<String>) -> Self {
        self.cleanup_prefix = Some(prefix.into());
        self
    }

    /// Warm `store` with `descriptors` at install time.
    ///
    /// Calling this twice for one store appends to its manifest.
    pub fn precache(
        mut self,
        store: impl Into<String>,
        descriptors: Vec<ResourceDescriptor>,
    ) -> Self {
        let store = StoreName::new(store);
        match self.precache.iter_mut().find(|(name, _)| *name == store) {
            Some((_, existing)) => existing.extend(descriptors),
            None => self.precache.push((store, descriptors)),
        }
        self
    }

    /// Precache `descriptors` and route their paths CacheFirst from `store`.
    ///
    /// The route takes its priority from where this call sits among the
    /// other route registrations.
    pub fn precache_and_route(
        self,
        store: impl Into<String>,
        descriptors: Vec<ResourceDescriptor>,
    ) -> Self {
        let store = store.into();
        let mut builder = self.precache(store.clone(), descriptors);
        builder
            .routes
            .push(PendingRoute::Precached(StoreName::new(store)));
        builder
    }

    /// Register a route. Earlier routes win.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(PendingRoute::Ready(route));
        self
    }

    pub fn routes(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.routes
            .extend(routes.into_iter().map(PendingRoute::Ready));
        self
    }

    /// Resolve manifests and freeze the route table.
    pub fn build(self) -> Result<InterceptionEngine> {
        let scope_url = self.scope_url.ok_or_else(|| Error::Config {
            message: "Engine scope URL is required".to_string(),
        })?;
        let fetcher = self.fetcher.ok_or_else(|| Error::Config {
            message: "Engine fetcher is required".to_string(),
        })?;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));

        let precache: Vec<PrecacheManifest> = self
            .precache
            .into_iter()
            .map(|(store, descriptors)| PrecacheManifest {
                resources: manifest::resolve(&descriptors, &scope_url, &self.keys),
                store,
            })
            .collect();

        let mut routes = Vec::with_capacity(self.routes.len());
        for pending in self.routes {
            match pending {
                PendingRoute::Ready(route) => routes.push(route),
                PendingRoute::Precached(store) => {
                    let paths = precached_paths(&precache, &store, &scope_url);
                    if paths.is_empty() {
                        warn!(
                            "No same-origin resources precached in '{}'; skipping its route",
                            store
                        );
                        continue;
                    }
                    routes.push(Route::new(
                        Matcher::Paths(paths),
                        Strategy::CacheFirst(CacheFirst::new(store.as_str()).keyed_by_url()),
                    ));
                }
            }
        }

        let id = Uuid::new_v4();
        debug!(
            "Built engine {} with {} route(s) and {} precache store(s)",
            id,
            routes.len(),
            precache.len()
        );

        Ok(InterceptionEngine {
            id,
            scope_url,
            storage,
            fetcher,
            keys: self.keys,
            router: Router::new(routes),
            precache,
            warmup_policy: self.warmup_policy,
            install_mode: self.install_mode,
            fetch_concurrency: self.fetch_concurrency,
            takeover: self.takeover,
            cleanup_prefix: self.cleanup_prefix,
            state: AtomicLifecycleState::new(LifecycleState::Installing),
            install_lock: Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        })
    }
}

fn precached_paths(
    precache: &[PrecacheManifest],
    store: &StoreName,
    scope: &Url,
) -> BTreeSet<String> {
    precache
        .iter()
        .filter(|m| &m.store == store)
        .flat_map(|m| m.resources.iter())
        .filter_map(|r| r.fetch_url.as_ref())
        .filter(|url| url.origin() == scope.origin())
        .map(|url| url.path().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ScriptedNetwork;
    use crate::request::Request;

    fn scope() -> Url {
        Url::parse("https://app.test/base/").unwrap()
    }

    #[test]
    fn test_build_requires_scope_and_fetcher() {
        let err = EngineBuilder::new().build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err = EngineBuilder::new().scope_url(scope()).build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_precache_and_route_routes_precached_paths() {
        let engine = EngineBuilder::new()
            .scope_url(scope())
            .fetcher(Arc::new(ScriptedNetwork::new()))
            .precache_and_route(
                "pre",
                vec![
                    ResourceDescriptor::new("app.js"),
                    ResourceDescriptor::new("/logo.svg"),
                    ResourceDescriptor::new("https://cdn.test/font.woff2"),
                ],
            )
            .build()
            .unwrap();

        assert_eq!(engine.router().len(), 1);
        let route = &engine.router().routes()[0];
        assert_eq!(route.strategy.name(), "cache-first");

        let hit = Request::parse_get("https://app.test/base/app.js").unwrap();
        let other = Request::parse_get("https://app.test/base/other.js").unwrap();
        assert!(engine.router().match_route(&hit).is_some());
        assert!(engine.router().match_route(&other).is_none());
        assert!(engine
            .router()
            .match_route(&Request::parse_get("https://app.test/logo.svg").unwrap())
            .is_some());
    }

    #[test]
    fn test_precache_appends_per_store() {
        let engine = EngineBuilder::new()
            .scope_url(scope())
            .fetcher(Arc::new(ScriptedNetwork::new()))
            .precache("pre", vec![ResourceDescriptor::new("a.js")])
            .precache("pre", vec![ResourceDescriptor::new("b.js")])
            .precache("fonts", vec![ResourceDescriptor::new("f.woff2")])
            .build()
            .unwrap();

        assert_eq!(engine.precache().len(), 2);
        assert_eq!(engine.precache()[0].resources.len(), 2);
        assert!(engine.router().is_empty());
        assert_eq!(engine.store_names().len(), 2);
    }

    #[test]
    fn test_route_order_preserved_around_precache_route() {
        let engine = EngineBuilder::new()
            .scope_url(scope())
            .fetcher(Arc::new(ScriptedNetwork::new()))
            .route(Route::new(
                Matcher::Path("/base/app.js".to_string()),
                Strategy::NetworkOnly(crate::strategy::NetworkOnly::new()),
            ))
            .precache_and_route("pre", vec![ResourceDescriptor::new("app.js")])
            .build()
            .unwrap();

        let req = Request::parse_get("https://app.test/base/app.js").unwrap();
        let route = engine.router().match_route(&req).unwrap();
        assert_eq!(route.strategy.name(), "network-only");
    }
}
