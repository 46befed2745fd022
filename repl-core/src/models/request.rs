use std::fmt;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::response::HeaderList;
use crate::error::ReplError;

/// Opaque token naming one sandboxed preview instance. Never validated here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A network request issued by a sandboxed document, as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub method: String,
    pub url: Url,
    pub headers: HeaderList,
}

impl InterceptedRequest {
    pub fn new(method: impl Into<String>, url: &str) -> Result<Self, ReplError> {
        let url = Url::parse(url)
            .map_err(|e| ReplError::InvalidRequest(format!("bad url {url:?}: {e}")))?;
        Ok(Self {
            method: method.into().to_ascii_uppercase(),
            url,
            headers: HeaderList::new(),
        })
    }

    pub fn get(url: &str) -> Result<Self, ReplError> {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Path split on `/`. Index 0 is the empty string before the leading slash.
    pub fn path_segments(&self) -> Vec<&str> {
        self.url.path().split('/').collect()
    }

    /// Path plus `?query` when the query is non-empty.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(q) if !q.is_empty() => format!("{}?{}", self.url.path(), q),
            _ => self.url.path().to_string(),
        }
    }

    /// Absolute URL with any fragment removed, the form cache keys use.
    pub fn cache_url(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.to_string()
    }
}

impl fmt::Display for InterceptedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
