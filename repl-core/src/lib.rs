pub mod cache;
pub mod config;
pub mod error;
pub mod fakes;
pub mod inject;
pub mod instrument;
pub mod ipc;
pub mod models;
pub mod relay;

pub use cache::{ArtifactCache, CacheEntry, CacheStorage, MemoryCache, MemoryCacheStorage};
pub use config::ReplConfig;
pub use error::{DeliveryError, ReplError};
pub use inject::Injector;
pub use instrument::{ConsoleLevel, ConsoleWrapper, InstalledHooks, Instrumentation, Realm};
pub use models::{
    ArtifactResponse, EventKind, EventMessage, EventScope, HeaderList, InterceptedRequest,
    MonotonicClock, ReplEventMessage, RuntimeEvent, SessionId,
};
pub use relay::{BroadcastTransport, EventRelay, EventTransport};
