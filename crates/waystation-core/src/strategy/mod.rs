//! Cache-vs-network strategies.
//!
//! The strategy set is closed: [`Strategy`] is an enum and the engine
//! dispatches on it with an exhaustive match. Each strategy converts store
//! and network failures into the engine's error kinds itself; a store that
//! cannot be opened or read counts as a miss, and a failed write is logged
//! without affecting the response.

mod cache;
mod navigation;
mod network;

pub use cache::{CacheFirst, CacheOnly};
pub use navigation::NavigationFallback;
pub use network::{NetworkFirst, NetworkOnly};

use crate::error::Result;
use crate::expiration::ExpirationPolicy;
use crate::network::Fetcher;
use crate::request::{KeyPolicy, Request, RequestKey, Response};
use crate::store::{CacheStorage, CachedEntry, DynStoreHandle, StoreName};
use chrono::Utc;
use tracing::{debug, warn};
use url::Url;

/// Capabilities a strategy runs against.
pub struct StrategyContext<'a> {
    pub storage: &'a dyn CacheStorage,
    pub fetcher: &'a dyn Fetcher,
    pub keys: &'a KeyPolicy,
    /// Base URL relative fallback URLs are resolved against.
    pub scope: &'a Url,
}

/// Result of handling a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Respond(Response),
    /// The strategy declines; the host fetches the request itself.
    PassThrough,
}

impl Outcome {
    pub fn into_response(self) -> Option<Response> {
        match self {
            Outcome::Respond(response) => Some(response),
            Outcome::PassThrough => None,
        }
    }
}

/// The closed set of strategies a route can select.
#[derive(Debug, Clone)]
pub enum Strategy {
    CacheFirst(CacheFirst),
    NetworkFirst(NetworkFirst),
    CacheOnly(CacheOnly),
    NetworkOnly(NetworkOnly),
    NavigationFallback(NavigationFallback),
}

impl Strategy {
    pub async fn handle(&self, request: &Request, ctx: &StrategyContext<'_>) -> Result<Outcome> {
        match self {
            Strategy::CacheFirst(s) => s.handle(request, ctx).await.map(Outcome::Respond),
            Strategy::NetworkFirst(s) => s.handle(request, ctx).await.map(Outcome::Respond),
            Strategy::CacheOnly(s) => s.handle(request, ctx).await.map(Outcome::Respond),
            Strategy::NetworkOnly(s) => s.handle(request, ctx).await.map(Outcome::Respond),
            Strategy::NavigationFallback(s) => s.handle(request, ctx).await,
        }
    }

    /// Store the strategy reads or writes, if any.
    pub fn store(&self) -> Option<&StoreName> {
        match self {
            Strategy::CacheFirst(s) => Some(&s.store),
            Strategy::NetworkFirst(s) => Some(&s.store),
            Strategy::CacheOnly(s) => Some(&s.store),
            Strategy::NetworkOnly(_) => None,
            Strategy::NavigationFallback(s) => Some(&s.store),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::CacheFirst(_) => "cache-first",
            Strategy::NetworkFirst(_) => "network-first",
            Strategy::CacheOnly(_) => "cache-only",
            Strategy::NetworkOnly(_) => "network-only",
            Strategy::NavigationFallback(_) => "navigation-fallback",
        }
    }
}

async fn open_store(ctx: &StrategyContext<'_>, name: &StoreName) -> Option<DynStoreHandle> {
    match ctx.storage.open(name).await {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("Store '{}' unavailable, treating as miss: {}", name, e);
            None
        }
    }
}

/// Look up `key`, treating store failures and expired entries as misses.
async fn lookup(
    ctx: &StrategyContext<'_>,
    name: &StoreName,
    key: &RequestKey,
    expiration: Option<&ExpirationPolicy>,
) -> Option<CachedEntry> {
    let store = open_store(ctx, name).await?;
    let entry = match store.get(key).await {
        Ok(entry) => entry?,
        Err(e) => {
            warn!("Lookup of {} in '{}' failed, treating as miss: {}", key, name, e);
            return None;
        }
    };

    if let Some(policy) = expiration {
        if !policy.is_fresh(&entry, Utc::now()) {
            debug!("Ignoring expired entry {} in '{}'", key, name);
            return None;
        }
    }

    Some(entry)
}

/// Store a successful response and apply eviction. Failures are logged only.
async fn write_through(
    ctx: &StrategyContext<'_>,
    name: &StoreName,
    key: &RequestKey,
    response: &Response,
    expiration: Option<&ExpirationPolicy>,
) {
    if !response.is_success() {
        debug!("Not caching {} (status {})", key, response.status);
        return;
    }
    let Some(store) = open_store(ctx, name).await else {
        return;
    };

    let entry = CachedEntry::new(key.clone(), response.clone());
    if let Err(e) = store.put(entry).await {
        warn!("Failed to cache {} in '{}': {}", key, name, e);
        return;
    }

    if let Some(policy) = expiration {
        policy.after_write(store.as_ref()).await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::StrategyContext;
    use crate::network::ScriptedNetwork;
    use crate::request::KeyPolicy;
    use crate::store::MemoryStorage;
    use url::Url;

    /// Owned capabilities a test can borrow a [`StrategyContext`] from.
    pub struct Harness {
        pub storage: MemoryStorage,
        pub net: ScriptedNetwork,
        pub keys: KeyPolicy,
        pub scope: Url,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                storage: MemoryStorage::new(),
                net: ScriptedNetwork::new(),
                keys: KeyPolicy::default(),
                scope: Url::parse("https://app.test/").unwrap(),
            }
        }

        pub fn ctx(&self) -> StrategyContext<'_> {
            StrategyContext {
                storage: &self.storage,
                fetcher: &self.net,
                keys: &self.keys,
                scope: &self.scope,
            }
        }
    }
}
