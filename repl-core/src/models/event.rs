//! Runtime events relayed from a preview session to the host.
//!
//! Wire shape (JSON, crosses a postMessage-style boundary as a string):
//!
//! ```json
//! { "type": "event", "clientId": "s1",
//!   "event": { "kind": "console-log", "scope": "client", "message": ["hi"], "start": 12.5 } }
//! ```

use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::request::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ClientModule,
    ConsoleLog,
    ConsoleWarn,
    ConsoleError,
    Error,
    Symbol,
    Resume,
}

impl EventKind {
    /// Scope the kind is produced in. Network events come from the
    /// interceptor, everything else from injected instrumentation.
    pub fn scope(self) -> EventScope {
        match self {
            EventKind::ClientModule => EventScope::Network,
            _ => EventScope::Client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    Network,
    Client,
}

/// `message` is either a list of strings or a bare string (the resume
/// signal sends an empty string).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventMessage {
    Lines(Vec<String>),
    Text(String),
}

impl EventMessage {
    pub fn empty() -> Self {
        EventMessage::Text(String::new())
    }

    pub fn lines(&self) -> Vec<&str> {
        match self {
            EventMessage::Lines(l) => l.iter().map(String::as_str).collect(),
            EventMessage::Text(t) if t.is_empty() => Vec::new(),
            EventMessage::Text(t) => vec![t.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    pub kind: EventKind,
    pub scope: EventScope,
    pub message: EventMessage,
    /// Milliseconds on a monotonic clock.
    pub start: f64,
}

impl RuntimeEvent {
    pub fn new(kind: EventKind, message: EventMessage, start: f64) -> Self {
        Self {
            kind,
            scope: kind.scope(),
            message,
            start,
        }
    }

    /// A `client-module` network event for a served asset.
    pub fn client_module(path_and_query: impl Into<String>, start: f64) -> Self {
        Self::new(
            EventKind::ClientModule,
            EventMessage::Lines(vec![path_and_query.into()]),
            start,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "event", rename_all = "camelCase")]
pub struct ReplEventMessage {
    pub client_id: SessionId,
    pub event: RuntimeEvent,
}

impl ReplEventMessage {
    pub fn new(client_id: SessionId, event: RuntimeEvent) -> Self {
        Self { client_id, event }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Millisecond timestamps relative to a fixed origin, like `performance.now()`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
