//! REPL preview HTTP server
//!
//! Axum-based server that answers requests from sandboxed preview documents
//! and exposes the pipeline ingress and host event stream next to them.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function, so the logic is testable without axum dispatch.
//!
//! Endpoints:
//! - GET  /health                     - status of the artifact cache and relay
//! - GET  /version                    - server version info
//! - POST /~repl-server-artifacts     - store an artifact (build pipeline)
//! - GET  /repl/~repl-server-events   - Server-Sent Events of relayed messages
//! - *    (fallback)                  - request interception, then upstream pass-through

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose;
use base64::Engine as _;
use futures::Stream;
use repl_core::{ArtifactResponse, CacheEntry, HeaderList, InterceptedRequest};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::Instrument;

use crate::state::AppState;
use crate::subscription::ClientFilter;

pub const ARTIFACTS_PATH: &str = "/~repl-server-artifacts";
pub const EVENTS_PATH: &str = "/repl/~repl-server-events";

/// Largest request body forwarded upstream or accepted as an artifact.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route(ARTIFACTS_PATH, post(put_artifact_handler))
        .route(EVENTS_PATH, get(events_handler))
        .fallback(intercept_handler)
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = state.config.http_addr();
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("REPL preview server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Artifact upload from the build pipeline. `url` may be a bare path, which is
/// resolved against the server's public origin. Binary bodies travel in
/// `body_base64`; `body` carries text.
#[derive(Debug, Deserialize)]
pub struct ArtifactUpload {
    pub cache: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub request_headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub body_base64: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct EventsQuery {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    let body = crate::router::health_report(state).await;
    let status = if body["status"] == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, body)
}

/// Inner version - returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": repl_core::ipc::PROTOCOL_VERSION,
    })
}

/// Inner artifact ingress - validates the upload and stores it.
pub async fn put_artifact_inner(
    state: &AppState,
    upload: ArtifactUpload,
) -> (StatusCode, serde_json::Value) {
    let url = match upload.url {
        Some(u) if !u.trim().is_empty() => u,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "url field is required",
                    "status": "error",
                }),
            );
        }
    };

    let body = match decode_body(upload.body, upload.body_base64) {
        Ok(b) => b,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": message,
                    "status": "error",
                }),
            );
        }
    };

    let mut headers: HeaderList = upload.headers.into_iter().collect();
    if let Some(ct) = upload.content_type {
        headers.set("Content-Type", &ct);
    }
    let entry = CacheEntry {
        method: upload.method.unwrap_or_else(|| "GET".to_string()),
        url,
        request_headers: upload.request_headers.into_iter().collect(),
        status: upload.status.unwrap_or(200),
        headers,
        body,
    };

    match crate::router::put_artifact(state, upload.cache, entry).await {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": e.to_string(),
                "status": "error",
            }),
        ),
    }
}

/// Inner interception - rebuilds the absolute URL and offers the request
/// to the interceptor. `Ok(None)` means the request is not ours.
pub async fn intercept_inner(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> std::result::Result<Option<ArtifactResponse>, (StatusCode, String)> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.public_origin(), path_and_query);

    let mut request = InterceptedRequest::new(method.as_str(), &url)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            request.headers.append(name.as_str(), v);
        }
    }

    state.interceptor.handle(&request).await.map_err(|e| {
        tracing::error!(url = %url, error = %e, "Interception failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

// ============================================================================
// Axum handler wrappers (thin - delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn put_artifact_handler(
    State(state): State<Arc<AppState>>,
    Json(upload): Json<ArtifactUpload>,
) -> impl IntoResponse {
    let (status, body) = put_artifact_inner(&state, upload).await;
    (status, Json(body))
}

pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let events = state.events.subscribe();
    let filter = ClientFilter::new(query.client_id);
    tracing::debug!("Event stream subscriber attached");
    Sse::new(event_stream(events, filter)).keep_alive(KeepAlive::default())
}

fn event_stream(
    events: broadcast::Receiver<String>,
    filter: ClientFilter,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    futures::stream::unfold((events, filter), |(mut events, filter)| async move {
        loop {
            match events.recv().await {
                Ok(payload) if filter.accepts(&payload) => {
                    return Some((Ok(Event::default().data(payload)), (events, filter)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

pub async fn intercept_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let span = tracing::debug_span!(
        "intercept",
        request_id = %uuid::Uuid::new_v4(),
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let intercepted = intercept_inner(&state, req.method(), req.uri(), req.headers()).await;
        match intercepted {
            Ok(Some(artifact)) => artifact_response(artifact),
            Ok(None) => pass_through(&state, req).await,
            Err((status, message)) => (status, message).into_response(),
        }
    }
    .instrument(span)
    .await
}

// ============================================================================
// Helpers
// ============================================================================

/// Response body bytes of an upload: `body_base64` when given, else the text `body`.
fn decode_body(text: String, encoded: Option<String>) -> std::result::Result<Vec<u8>, String> {
    match encoded {
        Some(_) if !text.is_empty() => {
            Err("body and body_base64 are mutually exclusive".to_string())
        }
        Some(b64) => general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|e| format!("body_base64 is not valid base64: {}", e)),
        None => Ok(text.into_bytes()),
    }
}

/// Convert an `ArtifactResponse` into an axum response, keeping header order.
pub fn artifact_response(artifact: ArtifactResponse) -> Response {
    let mut response = Response::new(Body::from(artifact.body));
    *response.status_mut() =
        StatusCode::from_u16(artifact.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers = response.headers_mut();
    for (name, value) in artifact.headers.iter() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(n), Ok(v)) => {
                headers.append(n, v);
            }
            _ => tracing::warn!(header = name, "Skipping invalid stored header"),
        }
    }
    response
}

/// Forward a request the interceptor declined to the configured upstream,
/// or answer 404 when there is none.
async fn pass_through(state: &AppState, req: Request) -> Response {
    let (Some(client), Some(upstream)) = (&state.upstream, &state.config.http.upstream) else {
        return (StatusCode::NOT_FOUND, "not handled").into_response();
    };

    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", upstream.trim_end_matches('/'), path_and_query);

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let method = match reqwest::Method::from_bytes(parts.method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let mut outbound = client.request(method, &url).body(body);
    for (name, value) in parts.headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        if let Ok(v) = value.to_str() {
            outbound = outbound.header(name.as_str(), v);
        }
    }

    let upstream_rsp = match outbound.send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(url = %url, error = %e, "Upstream request failed");
            return (StatusCode::BAD_GATEWAY, format!("upstream error: {}", e)).into_response();
        }
    };

    let status = upstream_rsp.status().as_u16();
    let headers: HeaderList = upstream_rsp
        .headers()
        .iter()
        .filter_map(|(n, v)| v.to_str().ok().map(|v| (n.as_str().to_string(), v.to_string())))
        .collect();
    match upstream_rsp.bytes().await {
        Ok(bytes) => artifact_response(ArtifactResponse::new(status, headers, bytes)),
        Err(e) => (StatusCode::BAD_GATEWAY, format!("upstream error: {}", e)).into_response(),
    }
}

// ============================================================================
// Unit Tests - call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use repl_core::ReplConfig;

    fn state() -> AppState {
        AppState::new(ReplConfig::default())
    }

    fn upload(url: Option<&str>, content_type: &str, body: &str) -> ArtifactUpload {
        ArtifactUpload {
            cache: None,
            url: url.map(str::to_string),
            method: None,
            status: None,
            content_type: Some(content_type.to_string()),
            headers: Vec::new(),
            request_headers: Vec::new(),
            body: body.to_string(),
            body_base64: None,
        }
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "repl-relay/1");
    }

    #[tokio::test]
    async fn test_health_inner_ok() {
        let (status, body) = health_inner(&state()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_put_artifact_requires_url() {
        let (status, body) = put_artifact_inner(&state(), upload(None, "text/html", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        let (status, _) = put_artifact_inner(&state(), upload(Some("  "), "text/html", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_put_artifact_accepts_binary_body() {
        let state = state();
        let png = [0x89u8, b'P', b'N', b'G', 0x00, 0xff];
        let mut up = upload(Some("/repl/s1/logo.png"), "image/png", "");
        up.body_base64 = Some(general_purpose::STANDARD.encode(png));
        let (status, body) = put_artifact_inner(&state, up).await;
        assert_eq!(status, StatusCode::OK, "{}", body);

        let owned: Uri = "/repl/s1/logo.png".parse().unwrap();
        let rsp = intercept_inner(&state, &Method::GET, &owned, &HeaderMap::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rsp.content_type(), Some("image/png"));
        assert_eq!(&rsp.body[..], &png[..]);
    }

    #[tokio::test]
    async fn test_put_artifact_rejects_bad_base64() {
        let mut up = upload(Some("/repl/s1/a.wasm"), "application/wasm", "");
        up.body_base64 = Some("not base64!".to_string());
        let (status, body) = put_artifact_inner(&state(), up).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("body_base64"));

        let mut both = upload(Some("/repl/s1/a.txt"), "text/plain", "text");
        both.body_base64 = Some("dGV4dA==".to_string());
        let (status, _) = put_artifact_inner(&state(), both).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_intercept_inner_routes_by_path() {
        let state = state();
        let (status, _) =
            put_artifact_inner(&state, upload(Some("/repl/s1/"), "text/html", "<p>hi</p>")).await;
        assert_eq!(status, StatusCode::OK);

        let headers = HeaderMap::new();
        let owned: Uri = "/repl/s1/".parse().unwrap();
        let rsp = intercept_inner(&state, &Method::GET, &owned, &headers)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rsp.status, 200);
        assert!(rsp.text().ends_with("<p>hi</p>"));

        let foreign: Uri = "/static/logo.svg".parse().unwrap();
        assert!(intercept_inner(&state, &Method::GET, &foreign, &headers)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_artifact_response_keeps_headers_in_order() {
        let headers: HeaderList = [("Content-Type", "text/javascript"), ("ETag", "\"abc\"")]
            .into_iter()
            .collect();
        let rsp = artifact_response(ArtifactResponse::new(203, headers, "x"));
        assert_eq!(rsp.status(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
        let names: Vec<&str> = rsp.headers().keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["content-type", "etag"]);
    }

    #[test]
    fn test_artifact_response_skips_invalid_headers() {
        let headers: HeaderList = [("bad header", "x"), ("X-Ok", "1")].into_iter().collect();
        let rsp = artifact_response(ArtifactResponse::new(200, headers, ""));
        assert_eq!(rsp.headers().len(), 1);
        assert_eq!(rsp.headers()["x-ok"], "1");
    }
}
