pub mod event;
pub mod request;
pub mod response;

pub use event::{EventKind, EventMessage, EventScope, MonotonicClock, ReplEventMessage, RuntimeEvent};
pub use request::{InterceptedRequest, SessionId};
pub use response::{ArtifactResponse, HeaderList};
