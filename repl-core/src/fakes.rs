//! In-memory fakes for the transport, realm and storage seams (testing only)
//!
//! Provides `RecordingTransport`, `FailingTransport`, `FakeRealm` and
//! `UnavailableStorage` so relay, instrumentation and interception can be
//! exercised without a browser or a host frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cache::{ArtifactCache, CacheStorage};
use crate::error::{DeliveryError, ReplError};
use crate::instrument::{ConsoleLevel, ConsoleSink, CustomEventListener, ErrorListener, Realm};
use crate::models::ReplEventMessage;
use crate::relay::EventTransport;

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

/// Accepts every payload and keeps it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    payloads: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }

    /// Posted payloads parsed back into messages.
    pub fn messages(&self) -> Vec<ReplEventMessage> {
        self.payloads()
            .iter()
            .map(|p| serde_json::from_str(p).expect("recorded payload is a ReplEventMessage"))
            .collect()
    }
}

impl EventTransport for RecordingTransport {
    fn post(&self, payload: String) -> Result<(), DeliveryError> {
        self.payloads.lock().unwrap().push(payload);
        Ok(())
    }
}

/// Rejects every payload with the configured error, counting attempts.
#[derive(Debug)]
pub struct FailingTransport {
    error: DeliveryError,
    attempts: AtomicUsize,
}

impl FailingTransport {
    pub fn new(error: DeliveryError) -> Self {
        Self {
            error,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl EventTransport for FailingTransport {
    fn post(&self, _payload: String) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeRealm
// ---------------------------------------------------------------------------

type Printed = Arc<Mutex<Vec<(ConsoleLevel, Vec<String>)>>>;

/// Document globals whose default console sinks record what they print.
pub struct FakeRealm {
    sinks: HashMap<ConsoleLevel, ConsoleSink>,
    error_listeners: Vec<ErrorListener>,
    custom_listeners: HashMap<String, Vec<CustomEventListener>>,
    printed: Printed,
}

impl FakeRealm {
    pub fn new() -> Self {
        let printed: Printed = Arc::default();
        let sinks = ConsoleLevel::ALL
            .into_iter()
            .map(|level| {
                let printed = printed.clone();
                let sink: ConsoleSink = Arc::new(move |args: &[String]| {
                    printed.lock().unwrap().push((level, args.to_vec()));
                });
                (level, sink)
            })
            .collect();
        Self {
            sinks,
            error_listeners: Vec::new(),
            custom_listeners: HashMap::new(),
            printed,
        }
    }

    /// Invoke whatever sink is currently installed for `level`.
    pub fn console(&self, level: ConsoleLevel, args: &[String]) {
        (self.console_sink(level))(args);
    }

    pub fn raise_error(&self, message: &str) {
        for listener in &self.error_listeners {
            listener(message);
        }
    }

    pub fn dispatch(&self, name: &str, detail: Option<&str>) {
        if let Some(listeners) = self.custom_listeners.get(name) {
            for listener in listeners {
                listener(detail);
            }
        }
    }

    /// Everything the original console sinks received, in order.
    pub fn printed(&self) -> Vec<(ConsoleLevel, Vec<String>)> {
        self.printed.lock().unwrap().clone()
    }
}

impl Default for FakeRealm {
    fn default() -> Self {
        Self::new()
    }
}

impl Realm for FakeRealm {
    fn console_sink(&self, level: ConsoleLevel) -> ConsoleSink {
        self.sinks[&level].clone()
    }

    fn set_console_sink(&mut self, level: ConsoleLevel, sink: ConsoleSink) {
        self.sinks.insert(level, sink);
    }

    fn add_error_listener(&mut self, listener: ErrorListener) {
        self.error_listeners.push(listener);
    }

    fn add_custom_event_listener(&mut self, name: &str, listener: CustomEventListener) {
        self.custom_listeners
            .entry(name.to_string())
            .or_default()
            .push(listener);
    }
}

// ---------------------------------------------------------------------------
// UnavailableStorage
// ---------------------------------------------------------------------------

/// Storage whose stores can never be opened.
#[derive(Debug, Default)]
pub struct UnavailableStorage;

#[async_trait]
impl CacheStorage for UnavailableStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn ArtifactCache>, ReplError> {
        Err(ReplError::StorageUnavailable(format!("{name}: storage offline")))
    }
}
