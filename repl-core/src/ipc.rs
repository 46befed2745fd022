use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;

pub const PROTOCOL_VERSION: &str = "repl-relay/1";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplRequest {
    Ping,
    Health,
    /// Store an artifact. Issued by the build pipeline, never by the interceptor.
    Put {
        cache: Option<String>,
        entry: CacheEntry,
    },
    Evict {
        cache: Option<String>,
        url: String,
    },
    /// Switch the connection to a stream of relayed events.
    Subscribe {
        client_id: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl ReplResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    /// One frame of an event subscription.
    pub fn event(message_json: String) -> Self {
        Self::ok(serde_json::json!({ "message": message_json }))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
