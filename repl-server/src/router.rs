use repl_core::ipc::{ReplRequest, ReplResponse};
use repl_core::CacheEntry;

use crate::state::AppState;

/// Handle one IPC request. `Subscribe` is answered by the connection loop
/// in `server.rs`; here it only returns an acknowledgement.
pub async fn handle_request(request: ReplRequest, state: &AppState) -> ReplResponse {
    match request {
        ReplRequest::Ping => ReplResponse::pong(),
        ReplRequest::Health => ReplResponse::ok(health_report(state).await),
        ReplRequest::Put { cache, entry } => match put_artifact(state, cache, entry).await {
            Ok(data) => ReplResponse::ok(data),
            Err(e) => ReplResponse::err(e.to_string()),
        },
        ReplRequest::Evict { cache, url } => match evict_artifact(state, cache, &url).await {
            Ok(data) => ReplResponse::ok(data),
            Err(e) => ReplResponse::err(e.to_string()),
        },
        ReplRequest::Subscribe { client_id } => ReplResponse::ok(serde_json::json!({
            "subscribed": true,
            "client_id": client_id,
        })),
    }
}

/// Status snapshot shared by the IPC `health` action and `GET /health`.
pub async fn health_report(state: &AppState) -> serde_json::Value {
    let stores = state.storage.store_names().await;
    let entries = match state.storage.open_store(&state.config.cache.name).await {
        Ok(store) => Some(store.len().await),
        Err(e) => {
            tracing::warn!("Artifact cache unavailable during health check: {}", e);
            None
        }
    };
    let status = if entries.is_some() { "healthy" } else { "degraded" };
    serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "cache": state.config.cache.name,
        "entries": entries,
        "stores": stores,
        "subscribers": state.events.subscriber_count(),
        "socket": state.config.service.socket_path,
        "started_at": state.started_at.to_rfc3339(),
    })
}

/// Store an artifact on behalf of the build pipeline.
pub async fn put_artifact(
    state: &AppState,
    cache: Option<String>,
    mut entry: CacheEntry,
) -> anyhow::Result<serde_json::Value> {
    let cache = cache.unwrap_or_else(|| state.config.cache.name.clone());
    entry.url = state.absolute_url(&entry.url);
    let url = entry.url.clone();
    let store = state.storage.open_store(&cache).await?;
    store.put(entry).await?;
    tracing::info!(cache = %cache, url = %url, "Stored artifact");
    Ok(serde_json::json!({ "stored": true, "cache": cache, "url": url }))
}

pub async fn evict_artifact(
    state: &AppState,
    cache: Option<String>,
    url: &str,
) -> anyhow::Result<serde_json::Value> {
    let cache = cache.unwrap_or_else(|| state.config.cache.name.clone());
    let url = state.absolute_url(url);
    let store = state.storage.open_store(&cache).await?;
    let removed = store.evict(&url).await;
    tracing::info!(cache = %cache, url = %url, removed, "Evicted artifact");
    Ok(serde_json::json!({ "removed": removed, "cache": cache, "url": url }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use repl_core::{ArtifactResponse, HeaderList, InterceptedRequest, ReplConfig};

    fn entry(url: &str) -> CacheEntry {
        let headers: HeaderList = [("Content-Type", "text/javascript")].into_iter().collect();
        CacheEntry::get(url, ArtifactResponse::new(200, headers, "x"))
    }

    #[tokio::test]
    async fn test_ping() {
        let state = AppState::new(ReplConfig::default());
        let rsp = handle_request(ReplRequest::Ping, &state).await;
        assert_eq!(rsp.data.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn test_put_then_intercept() {
        let state = AppState::new(ReplConfig::default());
        let rsp = handle_request(
            ReplRequest::Put {
                cache: None,
                entry: entry("/repl/s1/a.js"),
            },
            &state,
        )
        .await;
        assert!(rsp.is_ok(), "{:?}", rsp.error);
        assert_eq!(rsp.data.unwrap()["url"], "http://127.0.0.1:8787/repl/s1/a.js");

        let req = InterceptedRequest::get("http://127.0.0.1:8787/repl/s1/a.js").unwrap();
        let out = state.interceptor.handle(&req).await.unwrap().unwrap();
        assert_eq!(out.status, 200);
        assert_eq!(out.body, "x");
    }

    #[tokio::test]
    async fn test_evict() {
        let state = AppState::new(ReplConfig::default());
        handle_request(
            ReplRequest::Put { cache: None, entry: entry("http://127.0.0.1:8787/repl/s1/a.js") },
            &state,
        )
        .await;
        let rsp = handle_request(
            ReplRequest::Evict { cache: None, url: "/repl/s1/a.js".to_string() },
            &state,
        )
        .await;
        assert_eq!(rsp.data.unwrap()["removed"], 1);
    }

    #[tokio::test]
    async fn test_put_over_store_limit_errors() {
        let mut config = ReplConfig::default();
        config.cache.max_stores = 1;
        let state = AppState::new(config);
        let rsp = handle_request(
            ReplRequest::Put { cache: Some("other".to_string()), entry: entry("/repl/s1/a.js") },
            &state,
        )
        .await;
        assert!(rsp.is_ok());

        let rsp = handle_request(
            ReplRequest::Put { cache: Some("third".to_string()), entry: entry("/repl/s1/a.js") },
            &state,
        )
        .await;
        assert!(!rsp.is_ok());
        assert!(rsp.error.unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_health_report() {
        let state = AppState::new(ReplConfig::default());
        let health = health_report(&state).await;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["cache"], "repl-result-cache");
        assert_eq!(health["entries"], 0);
        assert_eq!(health["subscribers"], 0);
    }
}
