//! HTTP integration tests for the REPL preview server
//!
//! Requests are dispatched through `build_router` with `oneshot`, the way a
//! sandboxed document's fetches reach the server.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use repl_core::fakes::UnavailableStorage;
use repl_core::{
    EventKind, EventScope, Injector, MemoryCacheStorage, ReplConfig, ReplEventMessage, SessionId,
};
use repl_server::http::{build_router, ARTIFACTS_PATH, EVENTS_PATH};
use repl_server::AppState;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ORIGIN: &str = "http://127.0.0.1:8787";

fn make_state() -> Arc<AppState> {
    Arc::new(AppState::new(ReplConfig::default()))
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn put(state: &Arc<AppState>, artifact: serde_json::Value) {
    let req = Request::builder()
        .method("POST")
        .uri(ARTIFACTS_PATH)
        .header("content-type", "application/json")
        .body(Body::from(artifact.to_string()))
        .unwrap();
    let resp = build_router(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK, "artifact upload failed");
}

async fn get(state: &Arc<AppState>, uri: &str) -> axum::response::Response {
    let req = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    build_router(state.clone()).oneshot(req).await.unwrap()
}

// ===========================================================================
// TEST 1: HTML hit - injected body, fixed headers
// ===========================================================================
#[tokio::test]
async fn test_document_hit_is_instrumented() {
    let state = make_state();
    put(
        &state,
        json!({
            "url": "/repl/s1/index.html",
            "content_type": "text/html",
            "headers": [["X-Build", "42"], ["Cache-Control", "max-age=600"]],
            "body": "<body>ok</body>"
        }),
    )
    .await;

    let resp = get(&state, "/repl/s1/index.html").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers().clone();
    assert_eq!(headers["content-type"], "text/html; charset=utf-8");
    assert_eq!(headers["cache-control"], "no-store");
    assert_eq!(headers["x-qwik-repl-app"], "ssr-result");
    assert!(headers.get("x-build").is_none(), "cached headers must not leak");
    assert_eq!(headers.get_all("cache-control").iter().count(), 1);

    let body = body_string(resp).await;
    assert_eq!(
        body,
        Injector::default().inject(&SessionId::from("s1"), Some("<body>ok</body>"))
    );
}

// ===========================================================================
// TEST 2: asset hit - pass-through plus one network event on the stream
// ===========================================================================
#[tokio::test]
async fn test_asset_hit_passes_through_and_streams_event() {
    let state = make_state();
    put(
        &state,
        json!({
            "url": "/repl/s1/bundle.js",
            "content_type": "application/javascript",
            "headers": [["ETag", "\"b1\""]],
            "body": "export default 1;"
        }),
    )
    .await;

    // attach an event subscriber before the asset is requested
    let events = get(&state, &format!("{}?clientId=s1", EVENTS_PATH)).await;
    assert_eq!(events.status(), StatusCode::OK);
    assert_eq!(events.headers()["content-type"], "text/event-stream");
    let mut stream = events.into_body().into_data_stream();

    let resp = get(&state, "/repl/s1/bundle.js").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/javascript");
    assert_eq!(resp.headers()["etag"], "\"b1\"");
    assert!(resp.headers().get("x-qwik-repl-app").is_none());
    assert_eq!(body_string(resp).await, "export default 1;");

    let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("event within timeout")
        .expect("stream open")
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    let data = text
        .lines()
        .find_map(|l| l.strip_prefix("data:"))
        .expect("sse data line")
        .trim();
    let message: ReplEventMessage = serde_json::from_str(data).unwrap();
    assert_eq!(message.client_id.as_str(), "s1");
    assert_eq!(message.event.kind, EventKind::ClientModule);
    assert_eq!(message.event.scope, EventScope::Network);
    assert_eq!(message.event.message.lines(), vec!["/repl/s1/bundle.js"]);
}

// ===========================================================================
// TEST 3: miss - 404 with the full request URL
// ===========================================================================
#[tokio::test]
async fn test_missing_artifact_is_404() {
    let state = make_state();
    let resp = get(&state, "/repl/s1/missing.js").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers()["cache-control"], "no-store");
    assert_eq!(resp.headers()["x-qwik-repl-app"], "Not-Found");
    assert_eq!(
        body_string(resp).await,
        format!("404 - {}/repl/s1/missing.js", ORIGIN)
    );
}

// ===========================================================================
// TEST 4: not owned, no upstream - plain 404 without diagnostic header
// ===========================================================================
#[tokio::test]
async fn test_foreign_paths_fall_through() {
    let state = make_state();
    for uri in ["/assets/app.css", "/repl/~repl-server-host/index.html", "/repl"] {
        let resp = get(&state, uri).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        assert!(resp.headers().get("x-qwik-repl-app").is_none(), "{uri}");
        assert_eq!(body_string(resp).await, "not handled");
    }
}

// ===========================================================================
// TEST 5: not owned, upstream configured - proxied
// ===========================================================================
#[tokio::test]
async fn test_foreign_paths_proxy_to_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/assets/app.css"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("body{}", "text/css"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = ReplConfig::default();
    config.http.upstream = Some(upstream.uri());
    let state = Arc::new(AppState::new(config));

    let resp = get(&state, "/assets/app.css").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/css");
    assert_eq!(body_string(resp).await, "body{}");
}

// ===========================================================================
// TEST 6: owned requests never reach the upstream, even on a miss
// ===========================================================================
#[tokio::test]
async fn test_owned_miss_is_not_proxied() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let mut config = ReplConfig::default();
    config.http.upstream = Some(upstream.uri());
    let state = Arc::new(AppState::new(config));

    let resp = get(&state, "/repl/s9/main.js").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers()["x-qwik-repl-app"], "Not-Found");
}

// ===========================================================================
// TEST 7: storage unavailable - request fails with 500
// ===========================================================================
#[tokio::test]
async fn test_storage_unavailable_is_500() {
    let state = Arc::new(AppState::with_reader(
        ReplConfig::default(),
        Arc::new(MemoryCacheStorage::new(4)),
        Arc::new(UnavailableStorage),
    ));
    let resp = get(&state, "/repl/s1/index.html").await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// ===========================================================================
// TEST 8: GET /version and /health
// ===========================================================================
#[tokio::test]
async fn test_version_and_health_endpoints() {
    let state = make_state();

    let resp = get(&state, "/version").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["protocol"], "repl-relay/1");

    let resp = get(&state, "/health").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["cache"], "repl-result-cache");
}

// ===========================================================================
// TEST 9: event stream filter drops other sessions
// ===========================================================================
#[tokio::test]
async fn test_event_stream_filters_by_client() {
    let state = make_state();
    for session in ["a", "b"] {
        put(
            &state,
            json!({
                "url": format!("/repl/{session}/x.js"),
                "content_type": "text/javascript",
                "body": "x"
            }),
        )
        .await;
    }

    let events = get(&state, &format!("{}?clientId=b", EVENTS_PATH)).await;
    let mut stream = events.into_body().into_data_stream();

    get(&state, "/repl/a/x.js").await;
    get(&state, "/repl/b/x.js").await;

    let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("\"clientId\":\"b\""), "{text}");
    assert!(!text.contains("\"clientId\":\"a\""), "{text}");
}
