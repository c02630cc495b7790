//! Waystation Core - cache-backed request interception engine.
//!
//! The engine sits between a host that intercepts requests and two opaque
//! capabilities: a network ([`Fetcher`]) and a set of named cache stores
//! ([`CacheStorage`]). For each request it picks a route, runs that route's
//! [`Strategy`] and returns a response or declines. Before serving traffic
//! it warms its precache stores from revisioned asset manifests.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waystation_core::{
//!     DeploymentScope, HttpFetcher, InterceptionEngine, Matcher, NavigationFallback,
//!     ResourceDescriptor, Route, SqliteStorage, Strategy,
//! };
//!
//! #[tokio::main]
//! async fn main() -> waystation_core::Result<()> {
//!     let engine = Arc::new(
//!         InterceptionEngine::builder()
//!             .scope_url("https://app.example/".parse().unwrap())
//!             .storage(Arc::new(SqliteStorage::open("cache.sqlite")?))
//!             .fetcher(Arc::new(HttpFetcher::new()?))
//!             .precache_and_route(
//!                 "precache-v1",
//!                 vec![
//!                     ResourceDescriptor::revisioned("/index.html", "a1b2"),
//!                     ResourceDescriptor::revisioned("/offline.html", "c3d4"),
//!                 ],
//!             )
//!             .route(Route::new(
//!                 Matcher::Navigation,
//!                 Strategy::NavigationFallback(NavigationFallback::new(
//!                     "precache-v1",
//!                     "/offline.html",
//!                 )),
//!             ))
//!             .build()?,
//!     );
//!
//!     let scope = DeploymentScope::new();
//!     engine.on_install().await?;
//!     engine.on_activate(&scope).await?;
//!
//!     let request = waystation_core::Request::parse_get("https://app.example/index.html")?;
//!     let response = engine.fetch_event(&request).await?;
//!     println!("{} ({} bytes)", response.status, response.body.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod expiration;
pub mod manifest;
pub mod network;
pub mod request;
pub mod routing;
pub mod settings;
pub mod store;
pub mod strategy;
pub mod warmup;

// Re-export commonly used types
pub use config::{EngineConfig, NetworkConfig, StoreConfig};
pub use engine::{
    DeploymentScope, EngineBuilder, InstallMode, InterceptionEngine, LifecycleState,
    PrecacheManifest, Takeover,
};
pub use error::{Error, Result, WarmupFailure};
pub use expiration::ExpirationPolicy;
pub use manifest::{load_manifest, resolve, ResolvedResource, ResourceDescriptor};
pub use network::{DynFetcher, Fetcher, HttpFetcher, Reply, ScriptedNetwork};
pub use request::{CacheMode, KeyPolicy, Request, RequestKey, RequestMode, Response};
pub use routing::{Matcher, Route, Router};
pub use settings::EngineSettings;
pub use store::{
    CacheStorage, CachedEntry, DynCacheStorage, DynStoreHandle, EntryMeta, MemoryStorage,
    SqliteStorage, StoreHandle, StoreName,
};
pub use strategy::{
    CacheFirst, CacheOnly, NavigationFallback, NetworkFirst, NetworkOnly, Outcome, Strategy,
    StrategyContext,
};
pub use warmup::{WarmupCoordinator, WarmupPolicy, WarmupReport};
