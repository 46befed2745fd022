//! Cache responder - find a stored response for a request, or don't.
//!
//! Classification (document / asset) is left to the interceptor. The
//! responder never writes to or evicts from the store.

use std::sync::Arc;

use repl_core::{ArtifactResponse, CacheStorage, InterceptedRequest, ReplError};

#[derive(Clone)]
pub struct CacheResponder {
    storage: Arc<dyn CacheStorage>,
}

impl CacheResponder {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self { storage }
    }

    /// Open `cache_name` (creating it if needed) and match `request` against it.
    ///
    /// A store that cannot be opened fails the lookup; there is no fallback
    /// to the network.
    pub async fn lookup(
        &self,
        cache_name: &str,
        request: &InterceptedRequest,
    ) -> Result<Option<ArtifactResponse>, ReplError> {
        let cache = self.storage.open(cache_name).await?;
        Ok(cache.match_request(request).await)
    }
}
