//! Client-side instrumentation, modelled with explicit dependencies.
//!
//! A [`Realm`] stands in for the sandboxed document's globals: the three
//! console sinks plus registrars for the error listener and custom events.
//! [`Instrumentation::install`] wraps each console sink in a
//! [`ConsoleWrapper`] (relay, then call the original) and registers the
//! error/symbol/resume listeners. The returned [`InstalledHooks`] restores
//! the original sinks on [`InstalledHooks::uninstall`].

use std::sync::Arc;

use crate::config::InstrumentationConfig;
use crate::error::DeliveryError;
use crate::models::{EventKind, EventMessage, MonotonicClock, ReplEventMessage, RuntimeEvent, SessionId};
use crate::relay::EventRelay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

impl ConsoleLevel {
    pub const ALL: [ConsoleLevel; 3] = [ConsoleLevel::Log, ConsoleLevel::Warn, ConsoleLevel::Error];

    pub fn kind(self) -> EventKind {
        match self {
            ConsoleLevel::Log => EventKind::ConsoleLog,
            ConsoleLevel::Warn => EventKind::ConsoleWarn,
            ConsoleLevel::Error => EventKind::ConsoleError,
        }
    }
}

pub type ConsoleSink = Arc<dyn Fn(&[String]) + Send + Sync>;
pub type ErrorListener = Box<dyn Fn(&str) + Send + Sync>;
pub type CustomEventListener = Box<dyn Fn(Option<&str>) + Send + Sync>;

/// The globals a document exposes to instrumentation.
pub trait Realm {
    fn console_sink(&self, level: ConsoleLevel) -> ConsoleSink;

    fn set_console_sink(&mut self, level: ConsoleLevel, sink: ConsoleSink);

    fn add_error_listener(&mut self, listener: ErrorListener);

    fn add_custom_event_listener(&mut self, name: &str, listener: CustomEventListener);
}

#[derive(Clone)]
struct ClientRelay {
    client_id: SessionId,
    relay: EventRelay,
    clock: MonotonicClock,
}

impl ClientRelay {
    fn emit(&self, kind: EventKind, message: EventMessage) -> Result<(), DeliveryError> {
        let event = RuntimeEvent::new(kind, message, self.clock.now_ms());
        self.relay
            .try_send(&ReplEventMessage::new(self.client_id.clone(), event))
    }
}

/// A console sink decorated to relay each call before forwarding it.
#[derive(Clone)]
pub struct ConsoleWrapper {
    level: ConsoleLevel,
    original: ConsoleSink,
    relay: ClientRelay,
}

impl ConsoleWrapper {
    pub fn level(&self) -> ConsoleLevel {
        self.level
    }

    pub fn original(&self) -> ConsoleSink {
        self.original.clone()
    }

    pub fn call(&self, args: &[String]) {
        // delivery result is dropped; the original sink runs regardless
        let _ = self
            .relay
            .emit(self.level.kind(), EventMessage::Lines(args.to_vec()));
        (self.original)(args);
    }

    pub fn into_sink(self) -> ConsoleSink {
        Arc::new(move |args: &[String]| self.call(args))
    }
}

pub struct Instrumentation {
    relay: ClientRelay,
    symbol_event: String,
    resume_event: String,
}

impl Instrumentation {
    pub fn new(client_id: SessionId, relay: EventRelay, config: &InstrumentationConfig) -> Self {
        Self {
            relay: ClientRelay {
                client_id,
                relay,
                clock: MonotonicClock::new(),
            },
            symbol_event: config.symbol_event.clone(),
            resume_event: config.resume_event.clone(),
        }
    }

    pub fn wrap(&self, level: ConsoleLevel, original: ConsoleSink) -> ConsoleWrapper {
        ConsoleWrapper {
            level,
            original,
            relay: self.relay.clone(),
        }
    }

    /// Install all hooks into `realm`. Call once per document load.
    pub fn install(&self, realm: &mut dyn Realm) -> InstalledHooks {
        let mut originals = Vec::with_capacity(ConsoleLevel::ALL.len());
        for level in ConsoleLevel::ALL {
            let original = realm.console_sink(level);
            let wrapper = self.wrap(level, original.clone());
            realm.set_console_sink(level, wrapper.into_sink());
            originals.push((level, original));
        }

        let relay = self.relay.clone();
        realm.add_error_listener(Box::new(move |message: &str| {
            let _ = relay.emit(EventKind::Error, EventMessage::Lines(vec![message.to_string()]));
        }));

        let relay = self.relay.clone();
        realm.add_custom_event_listener(
            &self.symbol_event,
            Box::new(move |detail: Option<&str>| {
                // same text the bridge's String(ev.detail) yields; messages hold strings, never null
                let symbol = detail.unwrap_or("undefined").to_string();
                let _ = relay.emit(EventKind::Symbol, EventMessage::Lines(vec![symbol]));
            }),
        );

        let relay = self.relay.clone();
        realm.add_custom_event_listener(
            &self.resume_event,
            Box::new(move |_detail: Option<&str>| {
                let _ = relay.emit(EventKind::Resume, EventMessage::empty());
            }),
        );

        tracing::debug!(client_id = %self.relay.client_id, "Installed instrumentation hooks");
        InstalledHooks { originals }
    }
}

/// Handle to the console sinks replaced by [`Instrumentation::install`].
///
/// Listeners registered on the realm stay registered; only the console
/// sinks can be restored.
pub struct InstalledHooks {
    originals: Vec<(ConsoleLevel, ConsoleSink)>,
}

impl InstalledHooks {
    pub fn uninstall(self, realm: &mut dyn Realm) {
        for (level, sink) in self.originals {
            realm.set_console_sink(level, sink);
        }
    }
}
