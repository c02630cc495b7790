//! In-process cache storage.

use super::traits::{
    CacheStorage, CachedEntry, DynStoreHandle, EntryMeta, StoreHandle, StoreName,
};
use crate::error::{Error, Result};
use crate::request::RequestKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Volatile storage keeping every store in memory.
///
/// Handles opened with the same name share their entries.
#[derive(Default)]
pub struct MemoryStorage {
    stores: RwLock<HashMap<StoreName, Arc<MemoryStore>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &StoreName) -> Result<DynStoreHandle> {
        let mut stores = self.stores.write().map_err(|e| lock_error(name, e))?;
        let store = stores
            .entry(name.clone())
            .or_insert_with(|| Arc::new(MemoryStore::new(name.clone())));
        Ok(Arc::clone(store) as DynStoreHandle)
    }

    async fn store_names(&self) -> Result<Vec<StoreName>> {
        let stores = self
            .stores
            .read()
            .map_err(|e| lock_error(&StoreName::new("*"), e))?;
        let mut names = Vec::new();
        for (name, store) in stores.iter() {
            let entries = store.entries.read().map_err(|e| lock_error(name, e))?;
            if !entries.is_empty() {
                names.push(name.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_store(&self, name: &StoreName) -> Result<bool> {
        let mut stores = self.stores.write().map_err(|e| lock_error(name, e))?;
        Ok(stores.remove(name).is_some())
    }
}

struct Slot {
    entry: CachedEntry,
    sequence: u64,
}

/// One named in-memory store.
pub struct MemoryStore {
    name: StoreName,
    entries: RwLock<HashMap<RequestKey, Slot>>,
    next_sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new(name: StoreName) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl StoreHandle for MemoryStore {
    fn name(&self) -> &StoreName {
        &self.name
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
        let entries = self.entries.read().map_err(|e| lock_error(&self.name, e))?;
        Ok(entries.get(key).map(|slot| slot.entry.clone()))
    }

    async fn put(&self, entry: CachedEntry) -> Result<()> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.write().map_err(|e| lock_error(&self.name, e))?;
        entries.insert(entry.key.clone(), Slot { entry, sequence });
        Ok(())
    }

    async fn put_all(&self, batch: Vec<CachedEntry>) -> Result<()> {
        let mut entries = self.entries.write().map_err(|e| lock_error(&self.name, e))?;
        for entry in batch {
            let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            entries.insert(entry.key.clone(), Slot { entry, sequence });
        }
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|e| lock_error(&self.name, e))?;
        Ok(entries.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<RequestKey>> {
        let entries = self.entries.read().map_err(|e| lock_error(&self.name, e))?;
        Ok(entries.keys().cloned().collect())
    }

    async fn entries(&self) -> Result<Vec<EntryMeta>> {
        let entries = self.entries.read().map_err(|e| lock_error(&self.name, e))?;
        Ok(entries
            .values()
            .map(|slot| EntryMeta {
                key: slot.entry.key.clone(),
                stored_at: slot.entry.stored_at,
                sequence: slot.sequence,
            })
            .collect())
    }
}

fn lock_error<E: std::fmt::Display>(name: &StoreName, err: E) -> Error {
    Error::StoreUnavailable {
        store: name.to_string(),
        message: format!("Lock poisoned: {}", err),
    }
}
