//! Request interceptor - routing policy for requests from sandboxed documents.
//!
//! A request is owned when its first path segment is `repl` and the path does
//! not contain the reserved `/~repl-server-` marker. The second segment is the
//! session id. Owned requests are answered from the artifact cache:
//!
//! - HTML hit  → bridge script injected, fresh headers, status 200
//! - other hit → cached response untouched, one `client-module` network event
//! - miss      → synthetic 404 `"404 - <url>"`
//!
//! Requests that are not owned yield `None` and fall through to the caller.

use repl_core::{
    ArtifactResponse, EventRelay, HeaderList, Injector, InterceptedRequest, MonotonicClock,
    ReplError, ReplEventMessage, RuntimeEvent, SessionId,
};

use crate::responder::CacheResponder;

pub const REPL_SEGMENT: &str = "repl";
pub const SERVER_CHANNEL_MARKER: &str = "/~repl-server-";

/// Diagnostic header set on synthesized responses.
pub const DIAGNOSTIC_HEADER: &str = "X-Qwik-REPL-App";
pub const DIAGNOSTIC_SSR_RESULT: &str = "ssr-result";
pub const DIAGNOSTIC_NOT_FOUND: &str = "Not-Found";

/// How an owned request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Document,
    Asset,
    NotFound,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Document => "document",
            Outcome::Asset => "asset",
            Outcome::NotFound => "not-found",
        }
    }
}

/// Session id of `request` if it belongs to the preview, `None` otherwise.
pub fn owned_session(request: &InterceptedRequest) -> Option<SessionId> {
    let path = request.url.path();
    if path.contains(SERVER_CHANNEL_MARKER) {
        return None;
    }
    let segments = request.path_segments();
    if segments.get(1) != Some(&REPL_SEGMENT) {
        return None;
    }
    match segments.get(2) {
        Some(id) if !id.is_empty() => Some(SessionId::from(*id)),
        _ => None,
    }
}

#[derive(Clone)]
pub struct RequestInterceptor {
    cache_name: String,
    responder: CacheResponder,
    injector: Injector,
    relay: EventRelay,
    clock: MonotonicClock,
}

impl RequestInterceptor {
    pub fn new(
        cache_name: impl Into<String>,
        responder: CacheResponder,
        injector: Injector,
        relay: EventRelay,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            responder,
            injector,
            relay,
            clock: MonotonicClock::new(),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Answer `request`, or return `Ok(None)` when it is not ours.
    ///
    /// Fails only when the artifact store cannot be opened.
    pub async fn handle(
        &self,
        request: &InterceptedRequest,
    ) -> Result<Option<ArtifactResponse>, ReplError> {
        match self.handle_classified(request).await? {
            Some((_, response)) => Ok(Some(response)),
            None => Ok(None),
        }
    }

    /// Like [`handle`](Self::handle), also reporting which branch answered.
    pub async fn handle_classified(
        &self,
        request: &InterceptedRequest,
    ) -> Result<Option<(Outcome, ArtifactResponse)>, ReplError> {
        let Some(session) = owned_session(request) else {
            return Ok(None);
        };

        let answered = match self.responder.lookup(&self.cache_name, request).await? {
            Some(cached) if cached.is_html() => (Outcome::Document, self.document(&session, &cached)),
            Some(cached) => {
                self.report_module(&session, request);
                (Outcome::Asset, cached)
            }
            None => (Outcome::NotFound, not_found(request)),
        };

        tracing::debug!(
            session = %session,
            outcome = answered.0.as_str(),
            url = %request.url,
            "Intercepted request"
        );
        Ok(Some(answered))
    }

    fn document(&self, session: &SessionId, cached: &ArtifactResponse) -> ArtifactResponse {
        let html = cached.text();
        let body = self.injector.inject(session, Some(&html));
        let headers: HeaderList = [
            ("Content-Type", "text/html; charset=utf-8"),
            ("Cache-Control", "no-store"),
            (DIAGNOSTIC_HEADER, DIAGNOSTIC_SSR_RESULT),
        ]
        .into_iter()
        .collect();
        ArtifactResponse::new(200, headers, body)
    }

    fn report_module(&self, session: &SessionId, request: &InterceptedRequest) {
        let event = RuntimeEvent::client_module(request.path_and_query(), self.clock.now_ms());
        self.relay
            .send(&ReplEventMessage::new(session.clone(), event));
    }
}

fn not_found(request: &InterceptedRequest) -> ArtifactResponse {
    let headers: HeaderList = [
        ("Content-Type", "text/plain;charset=UTF-8"),
        ("Cache-Control", "no-store"),
        (DIAGNOSTIC_HEADER, DIAGNOSTIC_NOT_FOUND),
    ]
    .into_iter()
    .collect();
    ArtifactResponse::new(404, headers, format!("404 - {}", request.url))
}
