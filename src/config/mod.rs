//! Configuration for the directory service.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (userdir.toml)
//! ```toml
//! [server]
//! listen = "0.0.0.0:1001"
//!
//! [storage]
//! backend = "document"
//! data_dir = "/var/lib/userdir"
//! namespace = "user"
//!
//! [aggregation]
//! read_timeout_ms = 2000
//! max_in_flight = 64
//! ```
//!
//! Environment variables use the `USERDIR_` prefix with `__` between
//! sections, e.g. `USERDIR_STORAGE__DATA_DIR=/var/lib/userdir`.

mod defaults;

pub use defaults::*;

use crate::aggregate::FanOutOptions;
use crate::resolve::VariantPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "USERDIR_";

/// Sections nest on `__`; single underscores stay inside field names.
fn env_provider(prefix: &str) -> Env {
    Env::prefixed(prefix).split("__")
}

/// Main configuration for the directory service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub aggregation: AggregationConfig,
}

impl DirectoryConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, env_provider(ENV_PREFIX), overrides)
    }

    fn load_with_env(
        config_path: Option<&str>,
        env: Env,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(DirectoryConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(env);
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    /// Engine behaviour for the configured backend.
    pub fn policy(&self) -> VariantPolicy {
        let policy = self.storage.backend.policy();
        match self.storage.require_phone {
            Some(required) => policy.with_require_phone(required),
            None => policy,
        }
    }

    pub fn fan_out(&self) -> FanOutOptions {
        FanOutOptions {
            read_timeout: Duration::from_millis(self.aggregation.read_timeout_ms),
            max_in_flight: self.aggregation.max_in_flight,
        }
    }
}

/// Storage backend, and with it the service variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// RocksDB documents with a phone-number index
    #[default]
    Document,
    /// RocksDB used as a namespaced key/value cache
    DocumentCache,
    /// In-memory key/value cache
    Cache,
}

impl Backend {
    pub fn policy(self) -> VariantPolicy {
        match self {
            Backend::Document => VariantPolicy::document(),
            Backend::DocumentCache => VariantPolicy::document_cache(),
            Backend::Cache => VariantPolicy::cache(),
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(Backend::Document),
            "document-cache" => Ok(Backend::DocumentCache),
            "cache" => Ok(Backend::Cache),
            other => Err(ConfigError::new(format!("unknown backend {other:?}"))),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 1001)),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Data directory for the RocksDB backends
    pub data_dir: PathBuf,
    /// Key namespace for the key/value backends
    pub namespace: String,
    /// Override whether register requires a phone number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_phone: Option<bool>,
    /// Run RocksDB repair before opening
    pub repair: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            namespace: DEFAULT_NAMESPACE.to_string(),
            require_phone: None,
            repair: false,
        }
    }
}

/// Fan-out listing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Per-read deadline in milliseconds
    pub read_timeout_ms: u64,
    /// Concurrent reads per listing
    pub max_in_flight: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<bool>,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
#[error("configuration error: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::new(e.to_string())
    }
}
