//! HTTP fetcher backed by reqwest.
//!
//! Provides a wrapper around reqwest with:
//! - Optional rewriting of request origins onto an upstream server
//! - Hop-by-hop header filtering
//! - Cache bypass for reload-mode requests

use super::fetcher::Fetcher;
use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::request::{CacheMode, Request, Response};
use async_trait::async_trait;
use reqwest::{header, Client, Method};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Fetcher issuing real HTTP requests.
pub struct HttpFetcher {
    client: Client,
    /// Whole-request timeout applied when a fetch names none.
    timeout: Duration,
    /// Origin that request URLs are rewritten onto, if any.
    upstream: Option<Url>,
}

impl HttpFetcher {
    /// Create a fetcher with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a fetcher with a custom default timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| Error::Network {
                message: format!("Failed to create HTTP client: {}", e),
                status: None,
            })?;

        Ok(Self {
            client,
            timeout,
            upstream: None,
        })
    }

    /// Send every request to `upstream`, keeping path and query.
    pub fn with_upstream(mut self, upstream: Url) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// URL the request is actually sent to.
    pub fn target_url(&self, url: &Url) -> Url {
        match &self.upstream {
            Some(upstream) => {
                let mut target = upstream.clone();
                target.set_path(url.path());
                target.set_query(url.query());
                target
            }
            None => url.clone(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request, timeout: Option<Duration>) -> Result<Response> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| Error::Network {
            message: format!("Invalid method {}: {}", request.method, e),
            status: None,
        })?;
        let target = self.target_url(&request.url);

        let mut builder = self.client.request(method, target.clone());
        for (name, value) in &request.headers {
            if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.cache_mode == CacheMode::Reload {
            builder = builder
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::PRAGMA, "no-cache");
        }
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let limit = timeout.unwrap_or(self.timeout);
        let failed = |e: reqwest::Error| {
            if e.is_timeout() {
                Error::Timeout(limit)
            } else {
                Error::Network {
                    message: format!("{} {} failed: {}", request.method, target, e),
                    status: None,
                }
            }
        };

        let response = builder.send().await.map_err(failed)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(failed)?;

        debug!("{} {} -> {}", request.method, target, status);

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_creation() {
        assert!(HttpFetcher::new().is_ok());
    }

    #[tokio::test]
    async fn test_stalled_body_reports_configured_timeout() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\npartial")
                .await
                .unwrap();
            // Hold the connection open without finishing the body
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let limit = Duration::from_millis(300);
        let fetcher = HttpFetcher::with_timeout(limit).unwrap();
        let url = Url::parse(&format!("http://{}/slow", addr)).unwrap();
        let err = fetcher.fetch(&Request::get(url), None).await.unwrap_err();

        match err {
            Error::Timeout(after) => assert_eq!(after, limit),
            other => panic!("unexpected error {:?}", other),
        }
        server.abort();
    }

    #[test]
    fn test_target_url_without_upstream() {
        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse("https://app.test/a.css?v=1").unwrap();
        assert_eq!(fetcher.target_url(&url), url);
    }

    #[test]
    fn test_target_url_rewrites_origin() {
        let fetcher = HttpFetcher::new()
            .unwrap()
            .with_upstream(Url::parse("http://127.0.0.1:9000").unwrap());
        let url = Url::parse("https://app.test/css/site.css?v=2").unwrap();
        assert_eq!(
            fetcher.target_url(&url).as_str(),
            "http://127.0.0.1:9000/css/site.css?v=2"
        );
    }
}
