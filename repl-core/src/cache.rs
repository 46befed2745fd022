//! Artifact cache - named request/response stores filled by the build pipeline.
//!
//! The interceptor sees stores only through [`ArtifactCache`], which can match
//! but never write. Writes go through [`MemoryCache::put`] / [`MemoryCache::evict`],
//! reachable from the pipeline ingress only.
//!
//! Matching follows the browser Cache API defaults:
//! - only `GET` requests match
//! - the URL is compared without its fragment, query included
//! - `Vary` on the stored response requires the listed request headers to
//!   equal the values recorded at put time; `Vary: *` never matches

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ReplError;
use crate::models::{ArtifactResponse, HeaderList, InterceptedRequest};

/// Opens named artifact stores.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open the store called `name`, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn ArtifactCache>, ReplError>;
}

/// Read-only view of one named store.
#[async_trait]
pub trait ArtifactCache: Send + Sync {
    async fn match_request(&self, request: &InterceptedRequest) -> Option<ArtifactResponse>;
}

/// One stored (request, response) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub request_headers: HeaderList,
    pub status: u16,
    #[serde(default)]
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

impl CacheEntry {
    pub fn get(url: impl Into<String>, response: ArtifactResponse) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            request_headers: HeaderList::new(),
            status: response.status,
            headers: response.headers,
            body: response.body.to_vec(),
        }
    }

    pub fn with_request_header(mut self, name: &str, value: &str) -> Self {
        self.request_headers.append(name, value);
        self
    }

    pub fn response(&self) -> ArtifactResponse {
        ArtifactResponse::new(self.status, self.headers.clone(), self.body.clone())
    }

    fn vary_names(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("vary"))
            .flat_map(|(_, v)| v.split(','))
            .map(|n| n.trim().to_ascii_lowercase())
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// Whether `headers` agree with the recorded request headers on every
    /// name the stored response varies on.
    fn vary_matches(&self, headers: &HeaderList) -> bool {
        self.vary_names().iter().all(|name| {
            name != "*" && self.request_headers.get(name) == headers.get(name)
        })
    }

    fn matches(&self, request: &InterceptedRequest) -> bool {
        request.method == "GET"
            && self.url == request.cache_url()
            && self.vary_matches(&request.headers)
    }
}

/// In-process store. Entries are keyed by URL, with one entry per `Vary` variant.
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<String, Vec<CacheEntry>>>,
}

impl MemoryCache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert `entry`, replacing any variant the same request would have matched.
    pub async fn put(&self, mut entry: CacheEntry) -> Result<(), ReplError> {
        let url = reqwest::Url::parse(&entry.url)
            .map_err(|e| ReplError::InvalidRequest(format!("bad url {:?}: {}", entry.url, e)))?;
        let mut key = url;
        key.set_fragment(None);
        entry.url = key.to_string();
        entry.method = entry.method.to_ascii_uppercase();

        let mut entries = self.entries.write().await;
        let variants = entries.entry(entry.url.clone()).or_default();
        variants.retain(|old| !old.vary_matches(&entry.request_headers));
        variants.push(entry);
        Ok(())
    }

    /// Remove every variant stored for `url`. Returns how many were removed.
    pub async fn evict(&self, url: &str) -> usize {
        let key = match reqwest::Url::parse(url) {
            Ok(mut u) => {
                u.set_fragment(None);
                u.to_string()
            }
            Err(_) => url.to_string(),
        };
        self.entries
            .write()
            .await
            .remove(&key)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ArtifactCache for MemoryCache {
    async fn match_request(&self, request: &InterceptedRequest) -> Option<ArtifactResponse> {
        let entries = self.entries.read().await;
        entries
            .get(&request.cache_url())?
            .iter()
            .find(|e| e.matches(request))
            .map(CacheEntry::response)
    }
}

/// A set of named [`MemoryCache`]s with an upper bound on how many may exist.
#[derive(Debug)]
pub struct MemoryCacheStorage {
    stores: RwLock<HashMap<String, Arc<MemoryCache>>>,
    max_stores: usize,
}

impl MemoryCacheStorage {
    pub fn new(max_stores: usize) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            max_stores,
        }
    }

    /// Open (or create) a store with write access.
    pub async fn open_store(&self, name: &str) -> Result<Arc<MemoryCache>, ReplError> {
        if let Some(store) = self.stores.read().await.get(name) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }
        if stores.len() >= self.max_stores {
            return Err(ReplError::StorageUnavailable(format!(
                "cannot open {:?}: store limit of {} reached",
                name, self.max_stores
            )));
        }
        let store = Arc::new(MemoryCache::new(name));
        stores.insert(name.to_string(), store.clone());
        tracing::debug!(cache = name, "Opened artifact cache");
        Ok(store)
    }

    pub async fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn ArtifactCache>, ReplError> {
        let store: Arc<dyn ArtifactCache> = self.open_store(name).await?;
        Ok(store)
    }
}
