//! Filtering of relayed event payloads for a single subscriber.

use repl_core::ReplEventMessage;

#[derive(Debug, Clone, Default)]
pub struct ClientFilter {
    client_id: Option<String>,
}

impl ClientFilter {
    pub fn new(client_id: Option<String>) -> Self {
        Self {
            client_id: client_id.filter(|id| !id.is_empty()),
        }
    }

    /// Whether a serialized message should reach this subscriber.
    /// Unfiltered subscribers accept everything, including unparseable payloads.
    pub fn accepts(&self, payload: &str) -> bool {
        let Some(wanted) = &self.client_id else {
            return true;
        };
        serde_json::from_str::<ReplEventMessage>(payload)
            .map(|m| m.client_id.as_str() == wanted)
            .unwrap_or(false)
    }
}
