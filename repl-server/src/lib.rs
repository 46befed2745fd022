pub mod http;
pub mod interceptor;
pub mod responder;
pub mod router;
pub mod server;
pub mod state;
pub mod subscription;

pub use interceptor::{owned_session, Outcome, RequestInterceptor};
pub use responder::CacheResponder;
pub use state::AppState;
