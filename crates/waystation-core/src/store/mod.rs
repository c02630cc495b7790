//! Cache store capability.
//!
//! The engine only talks to stores through [`CacheStorage`] and
//! [`StoreHandle`]. Two implementations ship with the crate:
//! - [`MemoryStorage`] for tests and short-lived hosts
//! - [`SqliteStorage`] for persistent hosts, one namespace per store name

mod memory;
mod sqlite;
mod traits;

pub use memory::{MemoryStorage, MemoryStore};
pub use sqlite::{SqliteStorage, SqliteStore};
pub use traits::{
    CacheStorage, CachedEntry, DynCacheStorage, DynStoreHandle, EntryMeta, StoreHandle, StoreName,
};
