//! Network capability trait.

use crate::error::{Error, Result};
use crate::request::{Request, Response};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Opaque network access used by strategies and warm-up.
///
/// A response with any status is `Ok`; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `request`. `timeout` is a hint the implementation may enforce.
    async fn fetch(&self, request: &Request, timeout: Option<Duration>) -> Result<Response>;
}

/// Shared fetcher type held by the engine.
pub type DynFetcher = Arc<dyn Fetcher>;

/// Fetch with a hard deadline.
///
/// When the deadline passes the in-flight fetch future is dropped, which
/// cancels it, and [`Error::Timeout`] is returned.
pub async fn fetch_with_timeout(
    fetcher: &dyn Fetcher,
    request: &Request,
    timeout: Option<Duration>,
) -> Result<Response> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fetcher.fetch(request, Some(limit)))
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fetcher.fetch(request, None).await,
    }
}
