//! Centralized configuration constants for the engine.
//!
//! File-based configuration for hosts lives in [`crate::settings`]; the values
//! here are the defaults it falls back to.

use std::time::Duration;

/// Engine-level defaults.
pub struct EngineConfig;

impl EngineConfig {
    /// Network attempt budget for NetworkFirst before falling back to the store.
    pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(3);
    /// Maximum concurrent fetches within one warm-up run.
    pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;
    /// Query marker appended to a key to form its revisioned key.
    pub const REVISION_MARKER: &'static str = "__revision";
    /// Query parameters stripped from request keys by default.
    pub const DEFAULT_IGNORED_PARAMS: &'static [&'static str] = &["^utm_", "^fbclid$"];
    /// Header a host sets to identify top-level document loads.
    pub const NAVIGATION_MODE_HEADER: &'static str = "sec-fetch-mode";
}

/// Store-level defaults.
pub struct StoreConfig;

impl StoreConfig {
    pub const DEFAULT_DB_FILE_NAME: &'static str = "waystation-cache.sqlite";
    /// Store used by precache settings entries that do not name one.
    pub const DEFAULT_PRECACHE_STORE: &'static str = "precache-v1";
}

/// Network client defaults.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = "Waystation/0.1";
}
