//! Cache store capability traits and types.

use crate::error::Result;
use crate::request::{RequestKey, Response};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Identifier partitioning the cache into independent namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreName(String);

impl StoreName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub key: RequestKey,
    pub response: Response,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// Revisioned key of the manifest resource this entry was warmed from.
    ///
    /// `None` for entries written at request time.
    pub tag: Option<String>,
}

impl CachedEntry {
    /// An untagged entry stored now.
    pub fn new(key: RequestKey, response: Response) -> Self {
        Self {
            key,
            response,
            stored_at: Utc::now(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Listing information for one entry, without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub key: RequestKey,
    pub stored_at: DateTime<Utc>,
    /// Store-assigned write counter; later writes have larger values.
    pub sequence: u64,
}

/// One opened, named store.
///
/// Every operation is atomic per key; writes are last-writer-wins.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Name this handle was opened with.
    fn name(&self) -> &StoreName;

    /// Look up an entry by key.
    async fn get(&self, key: &RequestKey) -> Result<Option<CachedEntry>>;

    /// Insert or replace an entry.
    async fn put(&self, entry: CachedEntry) -> Result<()>;

    /// Insert or replace several entries.
    async fn put_all(&self, entries: Vec<CachedEntry>) -> Result<()> {
        for entry in entries {
            self.put(entry).await?;
        }
        Ok(())
    }

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, key: &RequestKey) -> Result<bool>;

    /// All keys currently stored.
    async fn keys(&self) -> Result<Vec<RequestKey>>;

    /// Metadata for every entry.
    ///
    /// The default implementation reads each entry; stores that can list
    /// metadata directly should override it.
    async fn entries(&self) -> Result<Vec<EntryMeta>> {
        let mut metas = Vec::new();
        for (index, key) in self.keys().await?.into_iter().enumerate() {
            if let Some(entry) = self.get(&key).await? {
                metas.push(EntryMeta {
                    key,
                    stored_at: entry.stored_at,
                    sequence: index as u64,
                });
            }
        }
        Ok(metas)
    }
}

/// Shared handle type returned by [`CacheStorage::open`].
pub type DynStoreHandle = Arc<dyn StoreHandle>;

/// Opens named stores, creating them on first use.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn open(&self, name: &StoreName) -> Result<DynStoreHandle>;

    /// Names of all stores that currently hold entries.
    async fn store_names(&self) -> Result<Vec<StoreName>>;

    /// Remove a store and all of its entries. Returns whether it existed.
    async fn delete_store(&self, name: &StoreName) -> Result<bool>;
}

/// Shared storage type held by the engine and strategies.
pub type DynCacheStorage = Arc<dyn CacheStorage>;
