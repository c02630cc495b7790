//! Request handlers and HTTP <-> engine conversion.

use crate::server::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response as HttpResponse},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;
use waystation_core::{EngineConfig, Request, RequestMode, Response};

/// Headers not copied from an engine response onto the wire.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["connection", "content-length", "transfer-encoding"];

/// Health check endpoint.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.scope.controller().await {
        Some(engine) => Json(json!({
            "status": "ok",
            "engine": engine.id().to_string(),
            "state": engine.state().as_str(),
            "in_flight": engine.in_flight(),
        }))
        .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "uncontrolled"})),
        )
            .into_response(),
    }
}

/// Fallback handler: every other request goes through the engine.
pub async fn handle_intercept(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let request = match to_engine_request(&state.scope_url, &method, &uri, &headers, body) {
        Ok(request) => request,
        Err(message) => {
            warn!("Rejecting request for {}: {}", uri, message);
            return (StatusCode::BAD_REQUEST, message).into_response();
        }
    };

    let Some(engine) = state.scope.controller().await else {
        return (StatusCode::SERVICE_UNAVAILABLE, "No active engine").into_response();
    };

    match engine.fetch_event(&request).await {
        Ok(response) => into_http_response(response),
        Err(e) => {
            debug!("{} {} failed: {}", request.method, request.url, e);
            let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, e.to_string()).into_response()
        }
    }
}

/// Whether the HTTP request is a top-level document load.
pub fn is_navigation(method: &Method, headers: &HeaderMap) -> bool {
    let header_value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(mode) = header_value(EngineConfig::NAVIGATION_MODE_HEADER) {
        return mode.eq_ignore_ascii_case("navigate");
    }
    method == Method::GET
        && header_value(header::ACCEPT.as_str())
            .map(|accept| accept.contains("text/html"))
            .unwrap_or(false)
}

/// Rebuild an incoming HTTP request as an engine request under `scope_url`.
pub fn to_engine_request(
    scope_url: &Url,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Request, String> {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = scope_url
        .join(path)
        .map_err(|e| format!("Cannot resolve '{}': {}", path, e))?;

    let mut request = Request::get(url).with_method(method.as_str()).with_body(body);
    for (name, value) in headers {
        match value.to_str() {
            Ok(value) => request = request.with_header(name.as_str(), value),
            Err(_) => debug!("Dropping non-text header {}", name),
        }
    }

    request.destination = request.header("sec-fetch-dest").map(str::to_string);
    if is_navigation(method, headers) {
        request = request.with_mode(RequestMode::Navigate);
        request.destination.get_or_insert_with(|| "document".to_string());
    }

    Ok(request)
}

/// Convert an engine response into an HTTP response.
pub fn into_http_response(response: Response) -> HttpResponse {
    let mut http = HttpResponse::new(Body::from(response.body));
    *http.status_mut() = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let headers = http.headers_mut();
    for (name, value) in &response.headers {
        if SKIPPED_RESPONSE_HEADERS
            .iter()
            .any(|skipped| name.eq_ignore_ascii_case(skipped))
        {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!("Dropping invalid response header {}", name),
        }
    }

    http
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.insert(name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_navigation_detection() {
        assert!(is_navigation(&Method::GET, &headers(&[("sec-fetch-mode", "navigate")])));
        assert!(!is_navigation(&Method::GET, &headers(&[("sec-fetch-mode", "cors")])));
        assert!(is_navigation(
            &Method::GET,
            &headers(&[("accept", "text/html,application/xhtml+xml")])
        ));
        assert!(!is_navigation(&Method::POST, &headers(&[("accept", "text/html")])));
        assert!(!is_navigation(&Method::GET, &headers(&[("accept", "image/png")])));
    }

    #[test]
    fn test_to_engine_request_resolves_under_scope() {
        let scope = Url::parse("https://app.test/").unwrap();
        let uri: Uri = "/docs/intro?tab=2".parse().unwrap();
        let request = to_engine_request(
            &scope,
            &Method::GET,
            &uri,
            &headers(&[("sec-fetch-mode", "navigate"), ("sec-fetch-dest", "document")]),
            Bytes::new(),
        )
        .unwrap();

        assert_eq!(request.url.as_str(), "https://app.test/docs/intro?tab=2");
        assert!(request.is_navigation());
        assert_eq!(request.destination.as_deref(), Some("document"));
        assert_eq!(request.header("Sec-Fetch-Mode"), Some("navigate"));
    }

    #[test]
    fn test_into_http_response_copies_headers() {
        let response = Response::new(201, "made")
            .with_header("Content-Type", "text/plain")
            .with_header("Content-Length", "999");
        let http = into_http_response(response);

        assert_eq!(http.status(), StatusCode::CREATED);
        assert_eq!(http.headers()["content-type"], "text/plain");
        assert_ne!(
            http.headers().get("content-length").map(|v| v.as_bytes()),
            Some(b"999".as_slice())
        );
    }
}
