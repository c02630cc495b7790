//! The interception engine: lifecycle owner and request orchestrator.
//!
//! An engine is built once with its routes and precache manifests, then
//! driven by the host through three hooks:
//!
//! 1. [`InterceptionEngine::on_install`] warms every precache store.
//! 2. [`InterceptionEngine::on_activate`] reclaims orphaned entries and
//!    takes over a [`DeploymentScope`], retiring the previous controller.
//! 3. [`InterceptionEngine::on_request`] / [`InterceptionEngine::fetch_event`]
//!    handle traffic while the engine is Active.

mod builder;
mod lifecycle;
mod scope;

pub use builder::EngineBuilder;
pub use lifecycle::LifecycleState;
pub use scope::DeploymentScope;

use crate::error::Result;
use crate::manifest::ResolvedResource;
use crate::network::DynFetcher;
use crate::request::{KeyPolicy, Request, Response};
use crate::routing::Router;
use crate::store::{DynCacheStorage, StoreName};
use crate::strategy::{Outcome, StrategyContext};
use crate::warmup::{WarmupCoordinator, WarmupPolicy, WarmupReport};
use lifecycle::AtomicLifecycleState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

/// How `on_install` warms multiple precache stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallMode {
    /// One store after another, in registration order.
    #[default]
    Sequential,
    /// All stores at once.
    Concurrent,
}

/// How `on_activate` retires the previous controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Takeover {
    /// Retire the previous controller immediately.
    #[default]
    Immediate,
    /// Wait until the previous controller has no requests in flight.
    Drain,
}

/// A precache store and the resources warm-up keeps in it.
#[derive(Debug, Clone)]
pub struct PrecacheManifest {
    pub store: StoreName,
    pub resources: Vec<ResolvedResource>,
}

/// Decides, per request, between store, network and fallback.
pub struct InterceptionEngine {
    id: Uuid,
    scope_url: Url,
    storage: DynCacheStorage,
    fetcher: DynFetcher,
    keys: KeyPolicy,
    router: Router,
    precache: Vec<PrecacheManifest>,
    warmup_policy: WarmupPolicy,
    install_mode: InstallMode,
    fetch_concurrency: usize,
    takeover: Takeover,
    cleanup_prefix: Option<String>,
    state: AtomicLifecycleState,
    /// Held for the duration of one warm-up run.
    install_lock: Mutex<()>,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Counts one request as in flight for as long as it lives.
struct InFlight<'a> {
    engine: &'a InterceptionEngine,
}

impl<'a> InFlight<'a> {
    fn enter(engine: &'a InterceptionEngine) -> Self {
        engine.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { engine }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.engine.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.engine.idle.notify_waiters();
        }
    }
}

impl InterceptionEngine {
    /// Start configuring an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state.load()
    }

    pub fn scope_url(&self) -> &Url {
        &self.scope_url
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn key_policy(&self) -> &KeyPolicy {
        &self.keys
    }

    pub fn precache(&self) -> &[PrecacheManifest] {
        &self.precache
    }

    /// Requests currently being handled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Every store this engine reads or writes.
    pub fn store_names(&self) -> BTreeSet<StoreName> {
        self.precache
            .iter()
            .map(|p| p.store.clone())
            .chain(
                self.router
                    .routes()
                    .iter()
                    .filter_map(|r| r.strategy.store().cloned()),
            )
            .collect()
    }

    fn coordinator(&self) -> WarmupCoordinator<'_> {
        WarmupCoordinator::new(
            self.storage.as_ref(),
            self.fetcher.as_ref(),
            &self.keys,
            &self.scope_url,
        )
        .with_policy(self.warmup_policy)
        .with_concurrency(self.fetch_concurrency)
    }

    /// Warm every precache store.
    ///
    /// Valid only while Installing, and only one call runs at a time. On
    /// success the engine moves to Activating; on failure it stays Installing
    /// so the host can retry.
    pub async fn on_install(&self) -> Result<Vec<WarmupReport>> {
        let Ok(_installing) = self.install_lock.try_lock() else {
            return Err(crate::Error::InvalidState {
                expected: "installing",
                actual: "installing (warm-up already running)",
            });
        };
        self.state.ensure(LifecycleState::Installing)?;

        let span = info_span!("install", engine = %self.id);
        let reports = async {
            info!(
                "Installing: warming {} store(s) ({:?})",
                self.precache.len(),
                self.install_mode
            );
            let coordinator = self.coordinator();
            match self.install_mode {
                InstallMode::Sequential => {
                    let mut reports = Vec::with_capacity(self.precache.len());
                    for manifest in &self.precache {
                        reports.push(
                            coordinator
                                .warm_resolved(&manifest.store, &manifest.resources)
                                .await?,
                        );
                    }
                    Ok::<_, crate::Error>(reports)
                }
                InstallMode::Concurrent => {
                    futures::future::try_join_all(
                        self.precache
                            .iter()
                            .map(|m| coordinator.warm_resolved(&m.store, &m.resources)),
                    )
                    .await
                }
            }
        }
        .instrument(span)
        .await
        .inspect_err(|e| warn!("Install of engine {} failed: {}", self.id, e))?;

        self.state
            .transition(LifecycleState::Installing, LifecycleState::Activating)?;
        info!("Engine {} installed", self.id);
        Ok(reports)
    }

    /// Reclaim orphaned entries and take over `scope`.
    ///
    /// Valid only while Activating. The engine becomes the controller of
    /// `scope` at once; the previous controller, if any, is retired according
    /// to the configured [`Takeover`] and ends up Terminated.
    pub async fn on_activate(self: &Arc<Self>, scope: &DeploymentScope) -> Result<()> {
        self.state.ensure(LifecycleState::Activating)?;

        let span = info_span!("activate", engine = %self.id);
        async {
            let coordinator = self.coordinator();
            for manifest in &self.precache {
                coordinator.reclaim(&manifest.store, &manifest.resources).await;
            }
            self.cleanup_outdated().await;

            self.state
                .transition(LifecycleState::Activating, LifecycleState::Active)?;

            // New requests reach this engine from here on; the prior
            // controller only finishes what it already started.
            let prior = scope.take_over(Arc::clone(self)).await;
            if let Some(retired) = prior.filter(|p| p.id != self.id) {
                if self.takeover == Takeover::Drain {
                    info!(
                        "Waiting for engine {} to drain {} request(s)",
                        retired.id,
                        retired.in_flight()
                    );
                    retired.drained().await;
                }
                info!("Engine {} retired by {}", retired.id, self.id);
                retired.terminate();
            }
            info!("Engine {} is now active", self.id);
            Ok::<(), crate::Error>(())
        }
        .instrument(span)
        .await
    }

    /// Delete stores under the cleanup prefix that this engine does not use.
    async fn cleanup_outdated(&self) {
        let Some(prefix) = self.cleanup_prefix.as_deref() else {
            return;
        };
        let names = match self.storage.store_names().await {
            Ok(names) => names,
            Err(e) => {
                warn!("Could not list stores for cleanup: {}", e);
                return;
            }
        };

        let in_use = self.store_names();
        for name in names
            .iter()
            .filter(|n| n.as_str().starts_with(prefix) && !in_use.contains(*n))
        {
            match self.storage.delete_store(name).await {
                Ok(true) => info!("Deleted outdated store '{}'", name),
                Ok(false) => {}
                Err(e) => warn!("Failed to delete outdated store '{}': {}", name, e),
            }
        }
    }

    /// Resolves once no request is in flight.
    async fn drained(&self) {
        loop {
            let idle = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Route `request` and run the matched strategy.
    ///
    /// Declines with [`Outcome::PassThrough`] when the engine is not Active
    /// or no route matches. Strategy errors are returned unchanged.
    pub async fn on_request(&self, request: &Request) -> Result<Outcome> {
        let _in_flight = InFlight::enter(self);
        self.dispatch(request).await
    }

    /// Handle `request` end to end: a declined request is fetched from the
    /// network exactly as it was received.
    pub async fn fetch_event(&self, request: &Request) -> Result<Response> {
        let _in_flight = InFlight::enter(self);
        match self.dispatch(request).await? {
            Outcome::Respond(response) => Ok(response),
            Outcome::PassThrough => self.fetcher.fetch(request, None).await,
        }
    }

    async fn dispatch(&self, request: &Request) -> Result<Outcome> {
        let state = self.state();
        if state != LifecycleState::Active {
            debug!("Engine {} is {}, declining {}", self.id, state, request.url);
            return Ok(Outcome::PassThrough);
        }

        let Some(route) = self.router.match_route(request) else {
            debug!("No route for {} {}", request.method, request.url);
            return Ok(Outcome::PassThrough);
        };

        debug!(
            "{} {} -> {}",
            request.method,
            request.url,
            route.strategy.name()
        );
        let ctx = StrategyContext {
            storage: self.storage.as_ref(),
            fetcher: self.fetcher.as_ref(),
            keys: &self.keys,
            scope: &self.scope_url,
        };
        route.strategy.handle(request, &ctx).await
    }

    /// Retire the engine; it declines every request from now on.
    pub fn terminate(&self) {
        let previous = self.state.load();
        self.state.store(LifecycleState::Terminated);
        if previous != LifecycleState::Terminated {
            info!("Engine {} terminated (was {})", self.id, previous);
        }
    }
}

impl std::fmt::Debug for InterceptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptionEngine")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("scope_url", &self.scope_url.as_str())
            .field("routes", &self.router.len())
            .field("precache", &self.precache.len())
            .finish()
    }
}
