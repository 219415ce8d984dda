//! Configuration management for a confidential store node
//!
//! Defaults, optionally overlaid by a TOML file, then by environment
//! variables of the form `CONFSTORE_<SECTION>_<KEY>`.

use crate::backend::RedisStoreConfig;
use crate::logging::LogLevel;
use crate::signer::LocalDaSigner;
use crate::transport::RedisTransportConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub redis: RedisConfig,
    pub sled: SledConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
    Sled,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            "sled" => Ok(BackendKind::Sled),
            other => Err(ConfigError::UnknownKind {
                kind: "backend",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Mock,
    Redis,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(TransportKind::Mock),
            "redis" => Ok(TransportKind::Redis),
            other => Err(ConfigError::UnknownKind {
                kind: "transport",
                value: other.to_string(),
            }),
        }
    }
}

/// Engine wiring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: BackendKind,

    pub transport: TransportKind,

    /// Hex private keys held by the data signer
    pub signing_keys: Vec<String>,

    /// Persist outgoing messages until published
    pub enable_outbox: bool,
}

/// Redis connection settings shared by the backend and the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub store_url: String,

    pub pubsub_url: String,

    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,

    /// Expiry of every key written by the backend
    #[serde(with = "humantime_serde")]
    pub value_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SledConfig {
    pub path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            transport: TransportKind::Mock,
            signing_keys: vec![],
            enable_outbox: false,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            store_url: "redis://127.0.0.1:6379".to_string(),
            pubsub_url: "redis://127.0.0.1:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            value_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/confstore"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl RedisConfig {
    pub fn store_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            url: self.store_url.clone(),
            connection_timeout: self.connection_timeout,
            response_timeout: self.response_timeout,
            ttl: self.value_ttl,
        }
    }

    pub fn transport_config(&self) -> RedisTransportConfig {
        RedisTransportConfig {
            url: self.pubsub_url.clone(),
            connection_timeout: self.connection_timeout,
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", key, e)))
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(value)
        .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", key, e)))
}

impl Config {
    /// Load configuration from defaults and environment variables
    ///
    /// Example: CONFSTORE_ENGINE_BACKEND=redis
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, then apply environment overrides
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let mut config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Engine
        if let Some(v) = lookup("CONFSTORE_ENGINE_BACKEND") {
            self.engine.backend = v.parse()?;
        }
        if let Some(v) = lookup("CONFSTORE_ENGINE_TRANSPORT") {
            self.engine.transport = v.parse()?;
        }
        if let Some(v) = lookup("CONFSTORE_ENGINE_SIGNING_KEYS") {
            self.engine.signing_keys = v
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("CONFSTORE_ENGINE_ENABLE_OUTBOX") {
            self.engine.enable_outbox = parse_flag("outbox flag", &v)?;
        }

        // Redis
        if let Some(v) = lookup("CONFSTORE_REDIS_STORE_URL") {
            self.redis.store_url = v;
        }
        if let Some(v) = lookup("CONFSTORE_REDIS_PUBSUB_URL") {
            self.redis.pubsub_url = v;
        }
        if let Some(v) = lookup("CONFSTORE_REDIS_CONNECTION_TIMEOUT") {
            self.redis.connection_timeout = parse_duration("connection timeout", &v)?;
        }
        if let Some(v) = lookup("CONFSTORE_REDIS_RESPONSE_TIMEOUT") {
            self.redis.response_timeout = parse_duration("response timeout", &v)?;
        }
        if let Some(v) = lookup("CONFSTORE_REDIS_VALUE_TTL") {
            self.redis.value_ttl = parse_duration("value ttl", &v)?;
        }

        // Sled
        if let Some(v) = lookup("CONFSTORE_SLED_PATH") {
            self.sled.path = PathBuf::from(v);
        }

        // Logging
        if let Some(v) = lookup("CONFSTORE_LOGGING_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("CONFSTORE_LOGGING_JSON_FORMAT") {
            self.logging.json_format = parse_flag("JSON flag", &v)?;
        }
        if let Some(v) = lookup("CONFSTORE_LOGGING_WITH_TARGET") {
            self.logging.with_target = parse_flag("target flag", &v)?;
        }

        // Metrics
        if let Some(v) = lookup("CONFSTORE_METRICS_ENABLED") {
            self.metrics.enabled = parse_flag("metrics flag", &v)?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let uses_redis_store = self.engine.backend == BackendKind::Redis;
        if uses_redis_store && self.redis.store_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis backend selected but store_url is empty".to_string(),
            ));
        }
        if self.engine.transport == TransportKind::Redis && self.redis.pubsub_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis transport selected but pubsub_url is empty".to_string(),
            ));
        }
        if uses_redis_store && self.redis.value_ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "value_ttl must be greater than 0".to_string(),
            ));
        }
        if self.engine.backend == BackendKind::Sled && self.sled.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "sled backend selected but path is empty".to_string(),
            ));
        }

        LocalDaSigner::from_hex_keys(self.engine.signing_keys.as_slice())
            .map_err(|e| ConfigError::ValidationFailed(format!("Invalid signing key: {}", e)))?;

        self.logging.level.parse::<LogLevel>().map_err(|_| {
            ConfigError::ValidationFailed(format!("Invalid log level: {}", self.logging.level))
        })?;

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
