//! Store warm-up from asset manifests.
//!
//! Warm-up is atomic per resource: each fetched resource is committed on its
//! own, so a failure never rolls back resources that already landed. Whether
//! one failure fails the whole run is decided by [`WarmupPolicy`].

use crate::config::EngineConfig;
use crate::error::{Error, Result, WarmupFailure};
use crate::manifest::{self, ResolvedResource, ResourceDescriptor};
use crate::network::Fetcher;
use crate::request::{CacheMode, KeyPolicy, Request, RequestKey};
use crate::store::{CacheStorage, CachedEntry, StoreHandle, StoreName};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

/// What a failed resource does to the warm-up run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarmupPolicy {
    /// Abort on the first failure; the engine must not activate.
    #[default]
    FailFast,
    /// Log failures and continue; the failed resources are simply absent.
    AllowPartial,
}

/// Outcome of a warm-up run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupReport {
    pub store: StoreName,
    /// URLs fetched and committed by this run.
    pub fetched: Vec<String>,
    /// URLs already present with a matching revision.
    pub skipped: Vec<String>,
    /// Failures tolerated under [`WarmupPolicy::AllowPartial`].
    pub failed: Vec<WarmupFailure>,
}

impl WarmupReport {
    fn new(store: StoreName) -> Self {
        Self {
            store,
            fetched: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Populates named stores from resolved manifests.
pub struct WarmupCoordinator<'a> {
    storage: &'a dyn CacheStorage,
    fetcher: &'a dyn Fetcher,
    keys: &'a KeyPolicy,
    scope: &'a Url,
    policy: WarmupPolicy,
    concurrency: usize,
}

impl<'a> WarmupCoordinator<'a> {
    pub fn new(
        storage: &'a dyn CacheStorage,
        fetcher: &'a dyn Fetcher,
        keys: &'a KeyPolicy,
        scope: &'a Url,
    ) -> Self {
        Self {
            storage,
            fetcher,
            keys,
            scope,
            policy: WarmupPolicy::default(),
            concurrency: EngineConfig::DEFAULT_FETCH_CONCURRENCY,
        }
    }

    pub fn with_policy(mut self, policy: WarmupPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Maximum fetches in flight at once (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Resolve `descriptors` and bring `name` up to date with them.
    pub async fn warm_up(
        &self,
        name: &StoreName,
        descriptors: &[ResourceDescriptor],
    ) -> Result<WarmupReport> {
        let resolved = manifest::resolve(descriptors, self.scope, self.keys);
        self.warm_resolved(name, &resolved).await
    }

    /// Fetch every resolved resource that is missing or has a changed revision.
    pub async fn warm_resolved(
        &self,
        name: &StoreName,
        resolved: &[ResolvedResource],
    ) -> Result<WarmupReport> {
        let store = self.storage.open(name).await.map_err(|e| Error::Warmup {
            store: name.to_string(),
            failures: vec![WarmupFailure {
                url: "*".to_string(),
                reason: e.to_string(),
            }],
        })?;

        let mut report = WarmupReport::new(name.clone());
        let mut pending = Vec::new();
        for resource in resolved {
            match store.get(&resource.key).await {
                Ok(Some(entry))
                    if entry.tag.as_deref() == Some(resource.revisioned_key.as_str()) =>
                {
                    report.skipped.push(resource.url.clone());
                }
                Ok(_) => pending.push(resource),
                Err(e) => {
                    warn!("Could not check {} in '{}', refetching: {}", resource.key, name, e);
                    pending.push(resource);
                }
            }
        }

        debug!(
            "Warm-up of '{}': {} to fetch, {} up to date",
            name,
            pending.len(),
            report.skipped.len()
        );

        let mut results = stream::iter(pending)
            .map(|resource| self.fetch_and_commit(store.as_ref(), resource))
            .buffer_unordered(self.concurrency);

        while let Some((resource, outcome)) = results.next().await {
            match outcome {
                Ok(()) => report.fetched.push(resource.url.clone()),
                Err(reason) => {
                    let failure = WarmupFailure {
                        url: resource.url.clone(),
                        reason,
                    };
                    match self.policy {
                        WarmupPolicy::FailFast => {
                            warn!("Warm-up of '{}' aborted: {}", name, failure);
                            return Err(Error::Warmup {
                                store: name.to_string(),
                                failures: vec![failure],
                            });
                        }
                        WarmupPolicy::AllowPartial => {
                            warn!("Warm-up of '{}' skipped {}", name, failure);
                            report.failed.push(failure);
                        }
                    }
                }
            }
        }

        info!(
            "Warmed store '{}': {} fetched, {} up to date, {} failed",
            name,
            report.fetched.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn fetch_and_commit<'r>(
        &self,
        store: &dyn StoreHandle,
        resource: &'r ResolvedResource,
    ) -> (&'r ResolvedResource, std::result::Result<(), String>) {
        let Some(url) = resource.fetch_url.clone() else {
            return (resource, Err("URL cannot be resolved against the scope".to_string()));
        };

        let request = Request::get(url).with_cache_mode(CacheMode::Reload);
        let response = match self.fetcher.fetch(&request, None).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => return (resource, Err(format!("HTTP {}", response.status))),
            Err(e) => return (resource, Err(e.to_string())),
        };

        let entry = CachedEntry::new(resource.key.clone(), response)
            .with_tag(resource.revisioned_key.clone());
        let committed = store.put(entry).await.map_err(|e| e.to_string());
        (resource, committed)
    }

    /// Delete warm-up entries whose URL is no longer in the manifest.
    ///
    /// Entries written at request time carry no tag and are left alone.
    /// Returns the number of entries removed; failures are logged only.
    pub async fn reclaim(&self, name: &StoreName, resolved: &[ResolvedResource]) -> usize {
        let store = match self.storage.open(name).await {
            Ok(store) => store,
            Err(e) => {
                warn!("Skipping reclaim of '{}': {}", name, e);
                return 0;
            }
        };
        let keys = match store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Skipping reclaim of '{}': {}", name, e);
                return 0;
            }
        };

        let current: HashSet<&RequestKey> = resolved.iter().map(|r| &r.key).collect();
        let mut removed = 0;
        for key in keys.iter().filter(|k| !current.contains(k)) {
            let tagged = matches!(store.get(key).await, Ok(Some(entry)) if entry.tag.is_some());
            if !tagged {
                continue;
            }
            match store.delete(key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to reclaim {} from '{}': {}", key, name, e),
            }
        }

        if removed > 0 {
            info!("Reclaimed {} orphaned entries from '{}'", removed, name);
        }
        removed
    }
}
