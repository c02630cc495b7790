//! Store-first strategies.

use super::{lookup, write_through, StrategyContext};
use crate::error::{Error, Result};
use crate::expiration::ExpirationPolicy;
use crate::request::{Request, Response};
use crate::store::StoreName;
use tracing::debug;

/// Serve from the store; fetch and store only on a miss.
#[derive(Debug, Clone)]
pub struct CacheFirst {
    pub store: StoreName,
    pub expiration: Option<ExpirationPolicy>,
    /// Key requests by URL alone, the way warm-up keys precached entries.
    pub url_keyed: bool,
}

impl CacheFirst {
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: StoreName::new(store),
            expiration: None,
            url_keyed: false,
        }
    }

    /// Ignore vary headers when keying, so precached entries are found.
    pub fn keyed_by_url(mut self) -> Self {
        self.url_keyed = true;
        self
    }

    pub fn with_expiration(mut self, expiration: ExpirationPolicy) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub(super) async fn handle(
        &self,
        request: &Request,
        ctx: &StrategyContext<'_>,
    ) -> Result<Response> {
        let key = if self.url_keyed {
            ctx.keys.key_for_url(&request.url)
        } else {
            ctx.keys.key_for(request)
        };

        if let Some(entry) = lookup(ctx, &self.store, &key, self.expiration.as_ref()).await {
            debug!("Cache hit for {} in '{}'", key, self.store);
            return Ok(entry.response);
        }

        debug!("Cache miss for {} in '{}', fetching", key, self.store);
        let response = ctx.fetcher.fetch(request, None).await.map_err(|e| {
            debug!("Network failed for {}: {}", key, e);
            Error::ResourceUnavailable {
                key: key.to_string(),
            }
        })?;

        write_through(ctx, &self.store, &key, &response, self.expiration.as_ref()).await;
        Ok(response)
    }
}

/// Serve from the store only.
#[derive(Debug, Clone)]
pub struct CacheOnly {
    pub store: StoreName,
}

impl CacheOnly {
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: StoreName::new(store),
        }
    }

    pub(super) async fn handle(
        &self,
        request: &Request,
        ctx: &StrategyContext<'_>,
    ) -> Result<Response> {
        let key = ctx.keys.key_for(request);
        lookup(ctx, &self.store, &key, None)
            .await
            .map(|entry| entry.response)
            .ok_or_else(|| Error::ResourceUnavailable {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::KeyPolicy;
    use crate::store::{CacheStorage, CachedEntry};
    use crate::strategy::test_support::Harness;
    use std::time::Duration;

    const URL: &str = "https://app.test/index.html";

    async fn seed(h: &Harness, store: &str, url: &str, body: &'static str) {
        let req = Request::parse_get(url).unwrap();
        let handle = h.storage.open(&store.into()).await.unwrap();
        handle
            .put(CachedEntry::new(h.keys.key_for(&req), Response::ok(body)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let h = Harness::new();
        seed(&h, "pages", URL, "stored").await;
        h.net.respond(URL, "fresh");

        let strategy = CacheFirst::new("pages");
        let response = strategy
            .handle(&Request::parse_get(URL).unwrap(), &h.ctx())
            .await
            .unwrap();

        assert_eq!(response.body, "stored");
        assert_eq!(h.net.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let h = Harness::new();
        h.net.respond(URL, "fresh");
        let strategy = CacheFirst::new("pages");
        let req = Request::parse_get(URL).unwrap();

        assert_eq!(strategy.handle(&req, &h.ctx()).await.unwrap().body, "fresh");
        assert_eq!(strategy.handle(&req, &h.ctx()).await.unwrap().body, "fresh");
        assert_eq!(h.net.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_errors() {
        let h = Harness::new();
        let strategy = CacheFirst::new("pages");
        let req = Request::parse_get("https://app.test/missing").unwrap();

        assert_eq!(strategy.handle(&req, &h.ctx()).await.unwrap().status, 404);
        let store = h.storage.open(&"pages".into()).await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_first_miss_and_network_down() {
        let h = Harness::new();
        h.net.set_offline(true);
        let err = CacheFirst::new("pages")
            .handle(&Request::parse_get(URL).unwrap(), &h.ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_cache_first_evicts_after_write() {
        let h = Harness::new();
        let strategy =
            CacheFirst::new("images").with_expiration(ExpirationPolicy::new().with_max_entries(2));
        for name in ["a", "b", "c"] {
            let url = format!("https://app.test/{}.png", name);
            h.net.respond(&url, "png");
            strategy
                .handle(&Request::parse_get(&url).unwrap(), &h.ctx())
                .await
                .unwrap();
        }

        let store = h.storage.open(&"images".into()).await.unwrap();
        let mut keys: Vec<String> = store
            .keys()
            .await
            .unwrap()
            .iter()
            .map(|k| k.to_string())
            .collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["GET https://app.test/b.png", "GET https://app.test/c.png"]
        );
    }

    #[tokio::test]
    async fn test_cache_first_refetches_expired_entry() {
        let h = Harness::new();
        let req = Request::parse_get(URL).unwrap();
        let mut stale = CachedEntry::new(h.keys.key_for(&req), Response::ok("stale"));
        stale.stored_at = chrono::Utc::now() - chrono::Duration::hours(2);
        h.storage.open(&"pages".into()).await.unwrap().put(stale).await.unwrap();
        h.net.respond(URL, "fresh");

        let strategy = CacheFirst::new("pages")
            .with_expiration(ExpirationPolicy::new().with_max_age(Duration::from_secs(3600)));
        assert_eq!(strategy.handle(&req, &h.ctx()).await.unwrap().body, "fresh");
        assert_eq!(h.net.request_count(), 1);
    }

    #[tokio::test]
    async fn test_url_keyed_cache_first_ignores_vary_headers() {
        let mut h = Harness::new();
        h.keys = KeyPolicy::new(&[], &["accept-language".to_string()]).unwrap();
        seed(&h, "pre", URL, "warmed").await;
        h.net.set_offline(true);

        let req = Request::parse_get(URL)
            .unwrap()
            .with_header("Accept-Language", "en");
        let err = CacheFirst::new("pre").handle(&req, &h.ctx()).await.unwrap_err();
        assert!(matches!(err, Error::ResourceUnavailable { .. }));

        let response = CacheFirst::new("pre")
            .keyed_by_url()
            .handle(&req, &h.ctx())
            .await
            .unwrap();
        assert_eq!(response.body, "warmed");
    }

    #[tokio::test]
    async fn test_cache_only() {
        let h = Harness::new();
        seed(&h, "static", URL, "stored").await;
        let strategy = CacheOnly::new("static");

        let hit = strategy.handle(&Request::parse_get(URL).unwrap(), &h.ctx()).await;
        assert_eq!(hit.unwrap().body, "stored");

        let miss = strategy
            .handle(&Request::parse_get("https://app.test/other").unwrap(), &h.ctx())
            .await;
        assert!(matches!(miss, Err(Error::ResourceUnavailable { .. })));
        assert_eq!(h.net.request_count(), 0);
    }
}
