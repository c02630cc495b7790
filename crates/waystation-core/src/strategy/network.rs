//! Network-first strategies.

use super::{lookup, write_through, StrategyContext};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::expiration::ExpirationPolicy;
use crate::network::fetch_with_timeout;
use crate::request::{Request, Response};
use crate::store::StoreName;
use std::time::Duration;
use tracing::debug;

/// Try the network within a deadline, fall back to the store.
#[derive(Debug, Clone)]
pub struct NetworkFirst {
    pub store: StoreName,
    pub timeout: Option<Duration>,
    pub expiration: Option<ExpirationPolicy>,
}

impl NetworkFirst {
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: StoreName::new(store),
            timeout: Some(EngineConfig::DEFAULT_NETWORK_TIMEOUT),
            expiration: None,
        }
    }

    /// Deadline for the network attempt; `None` waits for the transport.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
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
        let key = ctx.keys.key_for(request);

        match fetch_with_timeout(ctx.fetcher, request, self.timeout).await {
            Ok(response) => {
                write_through(ctx, &self.store, &key, &response, self.expiration.as_ref()).await;
                Ok(response)
            }
            Err(e) => {
                debug!("Network failed for {} ({}), trying '{}'", key, e, self.store);
                lookup(ctx, &self.store, &key, self.expiration.as_ref())
                    .await
                    .map(|entry| entry.response)
                    .ok_or_else(|| Error::ResourceUnavailable {
                        key: key.to_string(),
                    })
            }
        }
    }
}

/// Network only; the store is never touched.
#[derive(Debug, Clone, Default)]
pub struct NetworkOnly {
    pub timeout: Option<Duration>,
}

impl NetworkOnly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub(super) async fn handle(
        &self,
        request: &Request,
        ctx: &StrategyContext<'_>,
    ) -> Result<Response> {
        fetch_with_timeout(ctx.fetcher, request, self.timeout)
            .await
            .map_err(|e| {
                debug!("Network-only fetch of {} failed: {}", request.url, e);
                Error::ResourceUnavailable {
                    key: ctx.keys.key_for(request).to_string(),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Reply;
    use crate::store::{CacheStorage, CachedEntry};
    use crate::strategy::test_support::Harness;

    const URL: &str = "https://app.test/api/feed";

    async fn seed(h: &Harness, body: &'static str) {
        let req = Request::parse_get(URL).unwrap();
        h.storage
            .open(&"api".into())
            .await
            .unwrap()
            .put(CachedEntry::new(h.keys.key_for(&req), Response::ok(body)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_network_first_prefers_network_and_writes_through() {
        let h = Harness::new();
        seed(&h, "old").await;
        h.net.respond(URL, "new");

        let req = Request::parse_get(URL).unwrap();
        let response = NetworkFirst::new("api").handle(&req, &h.ctx()).await.unwrap();
        assert_eq!(response.body, "new");

        let stored = h
            .storage
            .open(&"api".into())
            .await
            .unwrap()
            .get(&h.keys.key_for(&req))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.response.body, "new");
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_store() {
        let h = Harness::new();
        seed(&h, "cached").await;
        h.net.fail(URL);

        let req = Request::parse_get(URL).unwrap();
        let response = NetworkFirst::new("api").handle(&req, &h.ctx()).await.unwrap();
        assert_eq!(response.body, "cached");
    }

    #[tokio::test]
    async fn test_network_first_empty_store_and_failing_network() {
        let h = Harness::new();
        h.net.fail(URL);

        let req = Request::parse_get(URL).unwrap();
        let err = NetworkFirst::new("api").handle(&req, &h.ctx()).await.unwrap_err();
        assert!(matches!(err, Error::ResourceUnavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_first_timeout_uses_store() {
        let h = Harness::new();
        seed(&h, "cached").await;
        h.net.script(
            URL,
            Reply::Delay(Duration::from_secs(30), Box::new(Reply::Respond(Response::ok("slow")))),
        );

        let req = Request::parse_get(URL).unwrap();
        let strategy = NetworkFirst::new("api").with_timeout(Some(Duration::from_secs(2)));
        let response = strategy.handle(&req, &h.ctx()).await.unwrap();
        assert_eq!(response.body, "cached");
    }

    #[tokio::test]
    async fn test_network_only_never_touches_store() {
        let h = Harness::new();
        seed(&h, "cached").await;
        h.net.fail(URL);

        let req = Request::parse_get(URL).unwrap();
        let err = NetworkOnly::new().handle(&req, &h.ctx()).await.unwrap_err();
        assert!(matches!(err, Error::ResourceUnavailable { .. }));

        h.net.respond(URL, "live");
        let response = NetworkOnly::new().handle(&req, &h.ctx()).await.unwrap();
        assert_eq!(response.body, "live");

        let stored = h.storage.open(&"api".into()).await.unwrap();
        let entry = stored.get(&h.keys.key_for(&req)).await.unwrap().unwrap();
        assert_eq!(entry.response.body, "cached");
    }
}
