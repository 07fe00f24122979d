//! Configuration management for Windowgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, WindowGateError};
use crate::ratelimit::{ConsistencyMode, LogFormat, WindowSettings, DEFAULT_MAX_CAS_ATTEMPTS};

/// Prefix for environment variable overrides, e.g. `WINDOWGATE_LIMITER__MAX_REQUESTS`.
pub const ENV_PREFIX: &str = "WINDOWGATE";

const SECS_PER_HOUR: u64 = 3600;

/// Main configuration for the Windowgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowGateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Quota window configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP admission configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Quota window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Length of the rolling window in hours
    #[serde(default = "default_window_hours")]
    pub window_hours: u64,

    /// Requests permitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Bucket width in hours
    #[serde(default = "default_compaction_hours")]
    pub compaction_hours: u64,

    /// Prefix for store keys
    #[serde(default)]
    pub key_prefix: String,

    #[serde(default)]
    pub consistency: ConsistencyMode,

    #[serde(default = "default_max_cas_attempts")]
    pub max_cas_attempts: u32,

    #[serde(default = "default_prune_on_write")]
    pub prune_on_write: bool,

    /// Layout of values written to the store
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            max_requests: default_max_requests(),
            compaction_hours: default_compaction_hours(),
            key_prefix: String::new(),
            consistency: ConsistencyMode::default(),
            max_cas_attempts: default_max_cas_attempts(),
            prune_on_write: default_prune_on_write(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_window_hours() -> u64 {
    24
}

fn default_max_requests() -> u64 {
    110
}

fn default_compaction_hours() -> u64 {
    1
}

fn default_max_cas_attempts() -> u32 {
    DEFAULT_MAX_CAS_ATTEMPTS
}

fn default_prune_on_write() -> bool {
    true
}

impl LimiterConfig {
    /// Convert to validated limiter settings.
    pub fn settings(&self) -> Result<WindowSettings> {
        let settings = WindowSettings {
            window_size: Duration::from_secs(self.window_hours.saturating_mul(SECS_PER_HOUR)),
            max_requests: self.max_requests,
            compaction_interval: Duration::from_secs(
                self.compaction_hours.saturating_mul(SECS_PER_HOUR),
            ),
            key_prefix: self.key_prefix.clone(),
            consistency: self.consistency,
            max_cas_attempts: self.max_cas_attempts,
            prune_on_write: self.prune_on_write,
            log_format: self.log_format,
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Which store implementation to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Shared store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL, e.g. `redis://127.0.0.1:6379`
    #[serde(default)]
    pub url: Option<String>,
}

/// HTTP admission configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Header carrying the client address when running behind a proxy.
    /// The peer socket address is used when unset or absent.
    #[serde(default)]
    pub client_key_header: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogOutput,

    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogOutput::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WindowGateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WindowGateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from an optional YAML file layered under
    /// `WINDOWGATE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder =
                builder.add_source(::config::File::from(path).format(::config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|layered| layered.try_deserialize())
            .map_err(|e| WindowGateError::Config(e.to_string()))
    }
}
