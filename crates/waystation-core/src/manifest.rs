//! Asset manifest resolution.
//!
//! A manifest is an ordered list of `{url, revision}` pairs produced by an
//! external build step. Resolution turns it into store keys plus revisioned
//! keys; a changed revision yields a different revisioned key, which is how
//! warm-up notices that a stored entry is outdated.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::request::{KeyPolicy, RequestKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub url: String,
    /// Opaque content revision. `None` keeps the entry until the store is cleared.
    #[serde(default)]
    pub revision: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: None,
        }
    }

    pub fn revisioned(url: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: Some(revision.into()),
        }
    }
}

/// Read a JSON manifest (`[{"url": ..., "revision": ...}, ...]`) from disk.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<Vec<ResourceDescriptor>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| crate::Error::io_with_path(e, path))?;
    Ok(serde_json::from_str(&raw)?)
}

/// A manifest entry resolved against the engine scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    /// Absolute URL, or the raw manifest string if it could not be resolved.
    pub url: String,
    /// Parsed URL used to fetch the resource.
    pub fetch_url: Option<Url>,
    pub key: RequestKey,
    pub revision: Option<String>,
    /// Key string qualified by the revision; equals the key when unrevisioned.
    pub revisioned_key: String,
}

/// Resolve manifest descriptors into store keys.
///
/// Later duplicates of a URL replace earlier ones in place. Malformed URLs
/// are passed through as opaque keys; they can never be fetched, so warm-up
/// reports them as failures.
pub fn resolve(
    descriptors: &[ResourceDescriptor],
    base: &Url,
    policy: &KeyPolicy,
) -> Vec<ResolvedResource> {
    let mut resolved: Vec<ResolvedResource> = Vec::with_capacity(descriptors.len());
    let mut positions: HashMap<RequestKey, usize> = HashMap::new();

    for descriptor in descriptors {
        let resource = resolve_one(descriptor, base, policy);
        match positions.get(&resource.key) {
            Some(&index) => resolved[index] = resource,
            None => {
                positions.insert(resource.key.clone(), resolved.len());
                resolved.push(resource);
            }
        }
    }

    resolved
}

fn resolve_one(
    descriptor: &ResourceDescriptor,
    base: &Url,
    policy: &KeyPolicy,
) -> ResolvedResource {
    let (url, fetch_url, key) = match base.join(&descriptor.url) {
        Ok(url) => {
            let key = policy.key_for_url(&url);
            (url.to_string(), Some(url), key)
        }
        Err(_) => (
            descriptor.url.clone(),
            None,
            RequestKey::from_raw(format!("GET {}", descriptor.url)),
        ),
    };

    let revisioned_key = revisioned_key(&key, descriptor.revision.as_deref());

    ResolvedResource {
        url,
        fetch_url,
        key,
        revision: descriptor.revision.clone(),
        revisioned_key,
    }
}

/// Qualify `key` with a revision marker.
pub fn revisioned_key(key: &RequestKey, revision: Option<&str>) -> String {
    match revision {
        Some(rev) => format!("{} {}={}", key, EngineConfig::REVISION_MARKER, rev),
        None => key.to_string(),
    }
}
