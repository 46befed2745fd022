use config::{Config, ConfigError, File};
use serde::Deserialize;

/// Logical name of the artifact cache the build pipeline writes into.
pub const DEFAULT_CACHE_NAME: &str = "repl-result-cache";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReplConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub instrumentation: InstrumentationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/repl-relay.sock".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub name: String,
    /// Upper bound on distinct named stores; opening one more fails.
    pub max_stores: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CACHE_NAME.to_string(),
            max_stores: 16,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Origin that ownership-miss requests are forwarded to, if any.
    pub upstream: Option<String>,
    /// Origin intercepted URLs are rebuilt with; defaults to `http://host:port`.
    /// Cache keys are absolute URLs, so the pipeline must use the same origin.
    pub public_origin: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8787,
            upstream: None,
            public_origin: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InstrumentationConfig {
    pub symbol_event: String,
    pub resume_event: String,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            symbol_event: "qsymbol".to_string(),
            resume_event: "qresume".to_string(),
        }
    }
}

impl ReplConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    /// Socket address string the HTTP server binds to.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}
