//! HTTP server implementation using Axum.

use crate::handler::{handle_health, handle_intercept};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use url::Url;
use waystation_core::DeploymentScope;

/// Path of the health endpoint; everything else is intercepted.
pub const HEALTH_PATH: &str = "/__waystation/health";

/// Application state shared across handlers.
pub struct AppState {
    /// Scope whose controller handles intercepted requests
    pub scope: Arc<DeploymentScope>,
    /// Base URL incoming paths are resolved against
    pub scope_url: Url,
}

/// Build the router: the health endpoint plus an intercepting fallback.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(HEALTH_PATH, get(handle_health))
        .fallback(handle_intercept)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = router(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;
    use waystation_core::{
        CacheFirst, InterceptionEngine, Matcher, MemoryStorage, NavigationFallback,
        ResourceDescriptor, Route, ScriptedNetwork, Strategy,
    };

    async fn active_state(net: Arc<ScriptedNetwork>) -> Arc<AppState> {
        let scope_url = Url::parse("https://app.test/").unwrap();
        let engine = Arc::new(
            InterceptionEngine::builder()
                .scope_url(scope_url.clone())
                .storage(Arc::new(MemoryStorage::new()))
                .fetcher(net)
                .precache_and_route(
                    "pre",
                    vec![
                        ResourceDescriptor::revisioned("/index.html", "1"),
                        ResourceDescriptor::revisioned("/offline.html", "1"),
                    ],
                )
                .route(Route::new(
                    Matcher::Navigation,
                    Strategy::NavigationFallback(NavigationFallback::new("pre", "/offline.html")),
                ))
                .route(Route::new(
                    Matcher::regex(r"\.png$").unwrap(),
                    Strategy::CacheFirst(CacheFirst::new("images")),
                ))
                .build()
                .unwrap(),
        );
        let scope = Arc::new(DeploymentScope::new());
        engine.on_install().await.unwrap();
        engine.on_activate(&scope).await.unwrap();
        Arc::new(AppState { scope, scope_url })
    }

    fn scripted() -> Arc<ScriptedNetwork> {
        let net = Arc::new(ScriptedNetwork::new());
        net.respond("https://app.test/index.html", "<h1>home</h1>");
        net.respond("https://app.test/offline.html", "<h1>offline</h1>");
        net
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_precached_path_served_offline() {
        let net = scripted();
        let app = router(active_state(net.clone()).await);
        net.set_offline(true);

        let response = app
            .oneshot(HttpRequest::get("/index.html").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_offline_navigation_served_fallback() {
        let net = scripted();
        let app = router(active_state(net.clone()).await);
        net.set_offline(true);

        let request = HttpRequest::get("/account/settings")
            .header("sec-fetch-mode", "navigate")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(body_text(response).await, "<h1>offline</h1>");
    }

    #[tokio::test]
    async fn test_unavailable_resource_maps_to_gateway_timeout() {
        let net = scripted();
        let app = router(active_state(net.clone()).await);
        net.set_offline(true);

        let response = app
            .oneshot(HttpRequest::get("/logo.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_health_reports_controller() {
        let app = router(active_state(scripted()).await);
        let response = app
            .oneshot(HttpRequest::get(HEALTH_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["state"], "active");
    }

    #[tokio::test]
    async fn test_health_without_controller() {
        let state = Arc::new(AppState {
            scope: Arc::new(DeploymentScope::new()),
            scope_url: Url::parse("https://app.test/").unwrap(),
        });
        let response = router(state)
            .oneshot(HttpRequest::get(HEALTH_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_server_starts() {
        let state = Arc::new(AppState {
            scope: Arc::new(DeploymentScope::new()),
            scope_url: Url::parse("https://app.test/").unwrap(),
        });
        let addr = start_server(state, "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
    }
}
