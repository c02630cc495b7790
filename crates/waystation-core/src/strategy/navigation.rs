//! Offline fallback for top-level document loads.

use super::{lookup, Outcome, StrategyContext};
use crate::error::{Error, Result};
use crate::network::fetch_with_timeout;
use crate::request::{Request, RequestKey};
use crate::store::StoreName;
use std::time::Duration;
use tracing::{debug, error};

/// Serve navigations from the network, or a pre-warmed fallback document.
///
/// Requests that are not navigations are passed through untouched. The
/// fallback is always looked up under its own fixed key, never the
/// requested one, so it must have been populated by warm-up.
#[derive(Debug, Clone)]
pub struct NavigationFallback {
    pub store: StoreName,
    /// URL of the fallback document, relative to the engine scope.
    pub fallback_url: String,
    /// Treat non-2xx network responses as failures.
    pub fallback_on_error_status: bool,
    pub timeout: Option<Duration>,
}

impl NavigationFallback {
    pub fn new(store: impl Into<String>, fallback_url: impl Into<String>) -> Self {
        Self {
            store: StoreName::new(store),
            fallback_url: fallback_url.into(),
            fallback_on_error_status: true,
            timeout: None,
        }
    }

    pub fn with_fallback_on_error_status(mut self, enabled: bool) -> Self {
        self.fallback_on_error_status = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Store key of the fallback document.
    pub fn fallback_key(&self, ctx: &StrategyContext<'_>) -> Result<RequestKey> {
        let url = ctx.scope.join(&self.fallback_url).map_err(|e| Error::Config {
            message: format!("Invalid fallback URL '{}': {}", self.fallback_url, e),
        })?;
        Ok(ctx.keys.key_for_url(&url))
    }

    pub(super) async fn handle(
        &self,
        request: &Request,
        ctx: &StrategyContext<'_>,
    ) -> Result<Outcome> {
        if !request.is_navigation() {
            return Ok(Outcome::PassThrough);
        }

        match fetch_with_timeout(ctx.fetcher, request, self.timeout).await {
            Ok(response) if response.is_success() || !self.fallback_on_error_status => {
                return Ok(Outcome::Respond(response));
            }
            Ok(response) => debug!(
                "Navigation to {} returned {}, serving fallback",
                request.url, response.status
            ),
            Err(e) => debug!("Navigation to {} failed ({}), serving fallback", request.url, e),
        }

        let key = self.fallback_key(ctx)?;
        match lookup(ctx, &self.store, &key, None).await {
            Some(entry) => Ok(Outcome::Respond(entry.response)),
            None => {
                error!(
                    "Fallback document {} missing from store '{}'; check the precache manifest",
                    key, self.store
                );
                Err(Error::FallbackUnavailable {
                    key: key.to_string(),
                })
            }
        }
    }
}
