//! Event relay - best-effort delivery of runtime events to the host.
//!
//! `EventTransport::post` reports success or failure so delivery attempts are
//! observable; `EventRelay::send` is the fire-and-forget wrapper that drops
//! the outcome. No retry, no buffering.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::DeliveryError;
use crate::models::ReplEventMessage;

/// Moves one serialized `ReplEventMessage` (a JSON string) to the host.
pub trait EventTransport: Send + Sync {
    fn post(&self, payload: String) -> Result<(), DeliveryError>;
}

#[derive(Clone)]
pub struct EventRelay {
    transport: Arc<dyn EventTransport>,
}

impl EventRelay {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self { transport }
    }

    /// Serialize and post, reporting the outcome.
    pub fn try_send(&self, message: &ReplEventMessage) -> Result<(), DeliveryError> {
        let payload = message
            .to_json()
            .map_err(|e| DeliveryError::Rejected(e.to_string()))?;
        self.transport.post(payload)
    }

    /// Fire-and-forget. A failed delivery is lost.
    pub fn send(&self, message: &ReplEventMessage) {
        if let Err(e) = self.try_send(message) {
            tracing::trace!(client_id = %message.client_id, error = %e, "Dropped relayed event");
        }
    }
}

impl std::fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRelay").finish_non_exhaustive()
    }
}

/// Fans serialized events out to every current subscriber. Subscribers that
/// fall more than `capacity` messages behind lose the oldest ones.
#[derive(Debug, Clone)]
pub struct BroadcastTransport {
    tx: broadcast::Sender<String>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventTransport for BroadcastTransport {
    fn post(&self, payload: String) -> Result<(), DeliveryError> {
        self.tx
            .send(payload)
            .map(|_| ())
            .map_err(|_| DeliveryError::NoReceiver)
    }
}
