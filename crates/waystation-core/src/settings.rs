//! JSON settings file for hosts that configure the engine declaratively.
//!
//! ```json
//! {
//!   "scope_url": "https://app.example/",
//!   "upstream": "http://127.0.0.1:8080/",
//!   "precache": [
//!     { "store": "precache-v2", "route": true, "manifest_path": "manifest.json" }
//!   ],
//!   "routes": [
//!     { "match": "navigation",
//!       "strategy": { "kind": "navigation-fallback", "store": "precache-v2",
//!                     "fallback_url": "/offline.html" } },
//!     { "match": { "regex": "/api/" }, "method": null,
//!       "strategy": { "kind": "network-first", "store": "api-v1", "timeout_ms": 2000 } }
//!   ]
//! }
//! ```

use crate::config::{EngineConfig, StoreConfig};
use crate::engine::{EngineBuilder, InstallMode, Takeover};
use crate::error::{Error, Result};
use crate::expiration::ExpirationPolicy;
use crate::manifest::{load_manifest, ResourceDescriptor};
use crate::request::KeyPolicy;
use crate::routing::{Matcher, Route};
use crate::strategy::{
    CacheFirst, CacheOnly, NavigationFallback, NetworkFirst, NetworkOnly, Strategy,
};
use crate::warmup::WarmupPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Declarative engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub scope_url: String,
    /// Origin the HTTP fetcher forwards requests to, if not the scope itself.
    #[serde(default)]
    pub upstream: Option<String>,
    /// SQLite database backing the stores.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub warmup_policy: WarmupPolicy,
    #[serde(default)]
    pub install_mode: InstallMode,
    #[serde(default)]
    pub takeover: Takeover,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Store-name prefix whose unused stores are deleted on activation.
    #[serde(default)]
    pub cleanup_prefix: Option<String>,
    #[serde(default)]
    pub key_policy: Option<KeyPolicySettings>,
    #[serde(default)]
    pub precache: Vec<PrecacheSettings>,
    #[serde(default)]
    pub routes: Vec<RouteSettings>,
}

fn default_fetch_concurrency() -> usize {
    EngineConfig::DEFAULT_FETCH_CONCURRENCY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPolicySettings {
    #[serde(default = "default_ignore_params")]
    pub ignore_params: Vec<String>,
    #[serde(default)]
    pub vary_headers: Vec<String>,
}

fn default_ignore_params() -> Vec<String> {
    EngineConfig::DEFAULT_IGNORED_PARAMS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecacheSettings {
    #[serde(default = "default_precache_store")]
    pub store: String,
    /// Also route the precached paths CacheFirst from this store.
    #[serde(default)]
    pub route: bool,
    #[serde(default)]
    pub manifest: Vec<ResourceDescriptor>,
    /// Manifest file, relative to the settings file. Appended to `manifest`.
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
}

fn default_precache_store() -> String {
    StoreConfig::DEFAULT_PRECACHE_STORE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSettings {
    #[serde(rename = "match")]
    pub matcher: MatchSettings,
    /// `null` accepts any method.
    #[serde(default = "default_method")]
    pub method: Option<String>,
    pub strategy: StrategySettings,
}

fn default_method() -> Option<String> {
    Some("GET".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSettings {
    Path(String),
    Paths(Vec<String>),
    Regex(String),
    Navigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    CacheFirst,
    NetworkFirst,
    CacheOnly,
    NetworkOnly,
    NavigationFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    pub kind: StrategyKind,
    #[serde(default)]
    pub store: Option<String>,
    /// Network deadline; 0 disables it.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub max_age_secs: Option<u64>,
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default)]
    pub fallback_on_error_status: Option<bool>,
}

impl EngineSettings {
    /// Read settings from a JSON file.
    ///
    /// `manifest_path` entries are loaded relative to the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io_with_path(e, path))?;
        let mut settings = Self::from_json(&raw)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for precache in &mut settings.precache {
            if let Some(manifest_path) = &precache.manifest_path {
                let descriptors = load_manifest(base.join(manifest_path))?;
                debug!(
                    "Loaded {} manifest entries for '{}' from {}",
                    descriptors.len(),
                    precache.store,
                    manifest_path.display()
                );
                precache.manifest.extend(descriptors);
            }
        }
        if let Some(database) = &settings.database {
            if database.is_relative() {
                settings.database = Some(base.join(database));
            }
        }

        Ok(settings)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(raw)?;
        settings.scope()?;
        Ok(settings)
    }

    pub fn scope(&self) -> Result<Url> {
        parse_url("scope", &self.scope_url)
    }

    pub fn upstream_url(&self) -> Result<Option<Url>> {
        self.upstream
            .as_deref()
            .map(|raw| parse_url("upstream", raw))
            .transpose()
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| PathBuf::from(StoreConfig::DEFAULT_DB_FILE_NAME))
    }

    /// Apply everything except storage and fetcher to `builder`.
    pub fn apply(&self, builder: EngineBuilder) -> Result<EngineBuilder> {
        let mut builder = builder
            .scope_url(self.scope()?)
            .warmup_policy(self.warmup_policy)
            .install_mode(self.install_mode)
            .takeover(self.takeover)
            .fetch_concurrency(self.fetch_concurrency);

        if let Some(keys) = &self.key_policy {
            builder = builder.key_policy(KeyPolicy::new(&keys.ignore_params, &keys.vary_headers)?);
        }
        if let Some(prefix) = &self.cleanup_prefix {
            builder = builder.cleanup_outdated(prefix.clone());
        }

        // Precache routes come first so they shadow broader configured routes.
        for precache in &self.precache {
            builder = if precache.route {
                builder.precache_and_route(precache.store.clone(), precache.manifest.clone())
            } else {
                builder.precache(precache.store.clone(), precache.manifest.clone())
            };
        }
        for route in &self.routes {
            builder = builder.route(route.to_route()?);
        }

        Ok(builder)
    }
}

impl RouteSettings {
    pub fn to_route(&self) -> Result<Route> {
        let matcher = match &self.matcher {
            MatchSettings::Path(path) => Matcher::Path(path.clone()),
            MatchSettings::Paths(paths) => Matcher::Paths(paths.iter().cloned().collect()),
            MatchSettings::Regex(pattern) => Matcher::regex(pattern)?,
            MatchSettings::Navigation => Matcher::Navigation,
        };
        Ok(Route::new(matcher, self.strategy.to_strategy()?).with_method(self.method.as_deref()))
    }
}

impl StrategySettings {
    pub fn to_strategy(&self) -> Result<Strategy> {
        let strategy = match self.kind {
            StrategyKind::CacheFirst => {
                let mut s = CacheFirst::new(self.require_store()?);
                if let Some(expiration) = self.expiration() {
                    s = s.with_expiration(expiration);
                }
                Strategy::CacheFirst(s)
            }
            StrategyKind::NetworkFirst => {
                let mut s = NetworkFirst::new(self.require_store()?);
                if let Some(ms) = self.timeout_ms {
                    s = s.with_timeout(timeout_from_ms(ms));
                }
                if let Some(expiration) = self.expiration() {
                    s = s.with_expiration(expiration);
                }
                Strategy::NetworkFirst(s)
            }
            StrategyKind::CacheOnly => Strategy::CacheOnly(CacheOnly::new(self.require_store()?)),
            StrategyKind::NetworkOnly => Strategy::NetworkOnly(
                NetworkOnly::new().with_timeout(self.timeout_ms.and_then(timeout_from_ms)),
            ),
            StrategyKind::NavigationFallback => {
                let fallback_url = self.fallback_url.clone().ok_or_else(|| Error::Config {
                    message: "navigation-fallback requires 'fallback_url'".to_string(),
                })?;
                let mut s = NavigationFallback::new(self.require_store()?, fallback_url)
                    .with_timeout(self.timeout_ms.and_then(timeout_from_ms));
                if let Some(enabled) = self.fallback_on_error_status {
                    s = s.with_fallback_on_error_status(enabled);
                }
                Strategy::NavigationFallback(s)
            }
        };
        Ok(strategy)
    }

    fn require_store(&self) -> Result<String> {
        self.store.clone().ok_or_else(|| Error::Config {
            message: format!("Strategy {:?} requires a 'store'", self.kind),
        })
    }

    fn expiration(&self) -> Option<ExpirationPolicy> {
        if self.max_entries.is_none() && self.max_age_secs.is_none() {
            return None;
        }
        let mut policy = ExpirationPolicy::new();
        if let Some(max) = self.max_entries {
            policy = policy.with_max_entries(max);
        }
        if let Some(secs) = self.max_age_secs {
            policy = policy.with_max_age(Duration::from_secs(secs));
        }
        Some(policy)
    }
}

fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn parse_url(what: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Config {
        message: format!("Invalid {} URL '{}': {}", what, raw, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ScriptedNetwork;
    use std::sync::Arc;
    use tempfile::TempDir;

    const SETTINGS: &str = r#"{
        "scope_url": "https://app.test/",
        "takeover": "drain",
        "warmup_policy": "allow-partial",
        "precache": [
            { "store": "pre-v1", "route": true,
              "manifest": [{ "url": "/index.html", "revision": "r1" }, { "url": "/app.js" }] }
        ],
        "routes": [
            { "match": "navigation",
              "strategy": { "kind": "navigation-fallback", "store": "pre-v1",
                            "fallback_url": "/offline.html" } },
            { "match": { "regex": "/api/" }, "method": null,
              "strategy": { "kind": "network-first", "store": "api", "timeout_ms": 0,
                            "max_entries": 10 } }
        ]
    }"#;

    #[test]
    fn test_parse_settings() {
        let settings = EngineSettings::from_json(SETTINGS).unwrap();
        assert_eq!(settings.takeover, Takeover::Drain);
        assert_eq!(settings.warmup_policy, WarmupPolicy::AllowPartial);
        assert_eq!(settings.install_mode, InstallMode::Sequential);
        assert_eq!(settings.fetch_concurrency, EngineConfig::DEFAULT_FETCH_CONCURRENCY);
        assert_eq!(settings.precache[0].manifest.len(), 2);
        assert_eq!(settings.routes[0].method.as_deref(), Some("GET"));
        assert_eq!(settings.routes[1].method, None);
        assert!(matches!(settings.routes[0].matcher, MatchSettings::Navigation));
    }

    #[test]
    fn test_apply_builds_routes_in_order() {
        let settings = EngineSettings::from_json(SETTINGS).unwrap();
        let engine = settings
            .apply(EngineBuilder::new())
            .unwrap()
            .fetcher(Arc::new(ScriptedNetwork::new()))
            .build()
            .unwrap();

        let names: Vec<&str> = engine
            .router()
            .routes()
            .iter()
            .map(|r| r.strategy.name())
            .collect();
        assert_eq!(names, vec!["cache-first", "navigation-fallback", "network-first"]);

        match &engine.router().routes()[2].strategy {
            Strategy::NetworkFirst(s) => {
                assert_eq!(s.timeout, None);
                assert_eq!(s.expiration.unwrap().max_entries, Some(10));
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_precache_store_defaults_when_unnamed() {
        let json = r#"{ "scope_url": "https://app.test/",
            "precache": [{ "manifest": [{ "url": "/a.js", "revision": "1" }] }] }"#;
        let settings = EngineSettings::from_json(json).unwrap();
        assert_eq!(settings.precache[0].store, StoreConfig::DEFAULT_PRECACHE_STORE);
    }

    #[test]
    fn test_invalid_settings_are_config_errors() {
        let bad_scope = r#"{ "scope_url": "not a url" }"#;
        assert!(matches!(
            EngineSettings::from_json(bad_scope),
            Err(Error::Config { .. })
        ));

        let bad_regex = r#"{ "scope_url": "https://app.test/",
            "routes": [{ "match": { "regex": "(" }, "strategy": { "kind": "network-only" } }] }"#;
        let settings = EngineSettings::from_json(bad_regex).unwrap();
        assert!(matches!(
            settings.apply(EngineBuilder::new()),
            Err(Error::Config { .. })
        ));

        let missing_store = r#"{ "scope_url": "https://app.test/",
            "routes": [{ "match": { "path": "/x" }, "strategy": { "kind": "cache-first" } }] }"#;
        let settings = EngineSettings::from_json(missing_store).unwrap();
        assert!(settings.apply(EngineBuilder::new()).is_err());
    }

    #[test]
    fn test_load_resolves_paths_relative_to_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("manifest.json"),
            r#"[{ "url": "/a.css", "revision": "1" }, { "url": "/b.css", "revision": null }]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("waystation.json"),
            r#"{ "scope_url": "https://app.test/", "database": "cache.sqlite",
                 "precache": [{ "store": "css", "manifest_path": "manifest.json" }] }"#,
        )
        .unwrap();

        let settings = EngineSettings::load(dir.path().join("waystation.json")).unwrap();
        assert_eq!(settings.precache[0].manifest.len(), 2);
        assert_eq!(settings.database_path(), dir.path().join("cache.sqlite"));
        assert_eq!(settings.upstream_url().unwrap(), None);
    }
}
