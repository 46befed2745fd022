use std::sync::Arc;

use chrono::{DateTime, Utc};
use repl_core::{
    BroadcastTransport, CacheStorage, EventRelay, Injector, MemoryCacheStorage, ReplConfig,
};

use crate::interceptor::RequestInterceptor;
use crate::responder::CacheResponder;

/// Everything the IPC and HTTP front ends share.
pub struct AppState {
    pub config: ReplConfig,
    /// Write side of the artifact cache, used by pipeline ingress only.
    pub storage: Arc<MemoryCacheStorage>,
    pub events: BroadcastTransport,
    pub interceptor: RequestInterceptor,
    pub upstream: Option<reqwest::Client>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ReplConfig) -> Self {
        let storage = Arc::new(MemoryCacheStorage::new(config.cache.max_stores));
        Self::with_reader(config, storage.clone(), storage)
    }

    /// Build state whose interceptor reads through `reader` rather than `storage`.
    pub fn with_reader(
        config: ReplConfig,
        storage: Arc<MemoryCacheStorage>,
        reader: Arc<dyn CacheStorage>,
    ) -> Self {
        let events = BroadcastTransport::new(config.relay.channel_capacity);
        let interceptor = RequestInterceptor::new(
            config.cache.name.clone(),
            CacheResponder::new(reader),
            Injector::new(&config.instrumentation),
            EventRelay::new(Arc::new(events.clone())),
        );
        let upstream = config.http.upstream.as_ref().map(|_| reqwest::Client::new());
        Self {
            config,
            storage,
            events,
            interceptor,
            upstream,
            started_at: Utc::now(),
        }
    }

    /// Origin used to rebuild absolute URLs for intercepted requests and
    /// to resolve relative artifact URLs, e.g. `http://127.0.0.1:8787`.
    pub fn public_origin(&self) -> String {
        match &self.config.http.public_origin {
            Some(origin) => origin.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.config.http_addr()),
        }
    }

    /// Resolve `url` against the public origin when it is a bare path.
    pub fn absolute_url(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{}", self.public_origin(), url)
        } else {
            url.to_string()
        }
    }
}
