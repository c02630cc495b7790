//! Entry-count and age bounds for runtime stores.
//!
//! Eviction only ever runs as a side effect of a successful write. It is
//! best-effort: failures are logged and never reach the response path.

use crate::store::{CachedEntry, EntryMeta, StoreHandle};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

/// Bounds applied to a store after each write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpirationPolicy {
    pub max_entries: Option<usize>,
    pub max_age: Option<Duration>,
}

impl ExpirationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_entries.is_none() && self.max_age.is_none()
    }

    /// Whether `entry` is young enough to be served at `now`.
    pub fn is_fresh(&self, entry: &CachedEntry, now: DateTime<Utc>) -> bool {
        match self.max_age {
            Some(max_age) => !is_older_than(entry.stored_at, max_age, now),
            None => true,
        }
    }

    /// Apply the bounds to `store`. Returns the number of entries removed.
    pub async fn after_write(&self, store: &dyn StoreHandle) -> usize {
        if self.is_unbounded() {
            return 0;
        }

        let entries = match store.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping eviction for store '{}': {}", store.name(), e);
                return 0;
            }
        };

        let doomed = self.select_victims(entries, Utc::now());
        let mut removed = 0;
        for meta in &doomed {
            match store.delete(&meta.key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to evict {} from '{}': {}", meta.key, store.name(), e),
            }
        }

        if removed > 0 {
            debug!("Evicted {} entries from store '{}'", removed, store.name());
        }
        removed
    }

    /// Entries that violate the bounds: expired ones, then the oldest beyond
    /// `max_entries`.
    fn select_victims(&self, mut entries: Vec<EntryMeta>, now: DateTime<Utc>) -> Vec<EntryMeta> {
        let mut victims = Vec::new();

        if let Some(max_age) = self.max_age {
            let (expired, live): (Vec<_>, Vec<_>) = entries
                .into_iter()
                .partition(|m| is_older_than(m.stored_at, max_age, now));
            victims.extend(expired);
            entries = live;
        }

        if let Some(max_entries) = self.max_entries {
            if entries.len() > max_entries {
                entries.sort_by(|a, b| {
                    a.stored_at
                        .cmp(&b.stored_at)
                        .then(a.sequence.cmp(&b.sequence))
                });
                let excess = entries.len() - max_entries;
                victims.extend(entries.into_iter().take(excess));
            }
        }

        victims
    }
}

fn is_older_than(stored_at: DateTime<Utc>, max_age: Duration, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(max_age) {
        Ok(max_age) => now - stored_at > max_age,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RequestKey, Response};
    use crate::store::{CacheStorage, MemoryStorage};

    fn key(s: &str) -> RequestKey {
        RequestKey::from_raw(format!("GET https://app.test{}", s))
    }

    #[tokio::test]
    async fn test_max_entries_keeps_most_recent() {
        let storage = MemoryStorage::new();
        let store = storage.open(&"images".into()).await.unwrap();
        let policy = ExpirationPolicy::new().with_max_entries(2);

        for path in ["/1.png", "/2.png", "/3.png"] {
            store.put(CachedEntry::new(key(path), Response::ok(path))).await.unwrap();
            policy.after_write(store.as_ref()).await;
        }

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![key("/2.png"), key("/3.png")]);
    }

    #[tokio::test]
    async fn test_max_age_removes_expired_on_write() {
        let storage = MemoryStorage::new();
        let store = storage.open(&"api".into()).await.unwrap();
        let policy = ExpirationPolicy::new().with_max_age(Duration::from_secs(60));

        let mut stale = CachedEntry::new(key("/old"), Response::ok("old"));
        stale.stored_at = Utc::now() - chrono::Duration::seconds(120);
        store.put(stale).await.unwrap();
        store.put(CachedEntry::new(key("/new"), Response::ok("new"))).await.unwrap();

        assert_eq!(policy.after_write(store.as_ref()).await, 1);
        assert_eq!(store.keys().await.unwrap(), vec![key("/new")]);
    }

    #[test]
    fn test_ties_broken_by_sequence() {
        let now = Utc::now();
        let policy = ExpirationPolicy::new().with_max_entries(1);
        let metas = vec![
            EntryMeta { key: key("/b"), stored_at: now, sequence: 2 },
            EntryMeta { key: key("/a"), stored_at: now, sequence: 1 },
        ];

        let victims = policy.select_victims(metas, now);
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].key, key("/a"));
    }

    #[test]
    fn test_is_fresh() {
        let policy = ExpirationPolicy::new().with_max_age(Duration::from_secs(30));
        let now = Utc::now();
        let mut entry = CachedEntry::new(key("/a"), Response::ok("a"));
        entry.stored_at = now - chrono::Duration::seconds(10);
        assert!(policy.is_fresh(&entry, now));
        entry.stored_at = now - chrono::Duration::seconds(31);
        assert!(!policy.is_fresh(&entry, now));
        assert!(ExpirationPolicy::new().is_fresh(&entry, now));
    }

    #[tokio::test]
    async fn test_unbounded_policy_is_noop() {
        let storage = MemoryStorage::new();
        let store = storage.open(&"s".into()).await.unwrap();
        store.put(CachedEntry::new(key("/a"), Response::ok("a"))).await.unwrap();
        assert_eq!(ExpirationPolicy::new().after_write(store.as_ref()).await, 0);
        assert_eq!(store.keys().await.unwrap().len(), 1);
    }
}
