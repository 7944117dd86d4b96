//! Channel service configuration.
//!
//! Settings are resolved in layers: built-in defaults, then a TOML file, then
//! `SABLE_*` environment variables. [`ServiceConfig`] bundles the settings with
//! the collaborators a service is wired to.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sable_kv::KeyValueStore;
use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

use crate::channel::CalculationAnalyzer;
use crate::cluster::HostResolver;
use crate::constants::DEFAULT_KEY_PREFIX;
use crate::constants::DEFAULT_RPC_TIMEOUT_MS;
use crate::key::MAX_LOCAL_KEY;
use crate::resource::ResourceGraph;
use crate::storage::TsStore;
use crate::transport::Transport;

/// Tunables of the channel layer.
///
/// # TOML Example
///
/// ```toml
/// validate_names = true
/// max_external_channels = 1000
/// rpc_timeout_ms = 5000
/// key_prefix = "__sable"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Enforce name syntax and uniqueness on create. Renames are always validated.
    ///
    /// Default: true.
    #[serde(default = "default_validate_names")]
    pub validate_names: bool,

    /// Upper bound on non-internal, non-virtual channels per node.
    ///
    /// Default: the size of the local key space.
    #[serde(default = "default_max_external_channels")]
    pub max_external_channels: u32,

    /// Deadline for a single peer RPC.
    ///
    /// Default: 10000 ms.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Namespace for channel records and resources in the metadata store.
    ///
    /// Default: "__sable".
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            validate_names: default_validate_names(),
            max_external_channels: default_max_external_channels(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_validate_names() -> bool {
    true
}

fn default_max_external_channels() -> u32 {
    MAX_LOCAL_KEY
}

fn default_rpc_timeout_ms() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl ChannelConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).context(ParseTomlSnafu { path: PathBuf::from("<inline>") })
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Load configuration from `SABLE_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            validate_names: parse_env("SABLE_VALIDATE_NAMES").unwrap_or_else(default_validate_names),
            max_external_channels: parse_env("SABLE_MAX_EXTERNAL_CHANNELS")
                .unwrap_or_else(default_max_external_channels),
            rpc_timeout_ms: parse_env("SABLE_RPC_TIMEOUT_MS").unwrap_or_else(default_rpc_timeout_ms),
            key_prefix: parse_env("SABLE_KEY_PREFIX").unwrap_or_else(default_key_prefix),
        }
    }

    /// Overlay non-default fields of `other` onto `self`.
    pub fn merge(&mut self, other: Self) {
        if other.validate_names != default_validate_names() {
            self.validate_names = other.validate_names;
        }
        if other.max_external_channels != default_max_external_channels() {
            self.max_external_channels = other.max_external_channels;
        }
        if other.rpc_timeout_ms != default_rpc_timeout_ms() {
            self.rpc_timeout_ms = other.rpc_timeout_ms;
        }
        if other.key_prefix != default_key_prefix() {
            self.key_prefix = other.key_prefix;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::Validation {
                message: "rpc_timeout_ms must be non-zero".into(),
            });
        }
        if self.max_external_channels > MAX_LOCAL_KEY {
            return Err(ConfigError::Validation {
                message: format!("max_external_channels must not exceed {MAX_LOCAL_KEY}"),
            });
        }
        if self.key_prefix.is_empty() || self.key_prefix.contains('/') {
            return Err(ConfigError::Validation {
                message: "key_prefix must be non-empty and must not contain '/'".into(),
            });
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Configuration loading and parsing errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },
}

/// Everything a channel service is opened with.
#[derive(Clone)]
pub struct ServiceConfig {
    pub channel: ChannelConfig,
    pub host: Arc<dyn HostResolver>,
    /// Replicated cluster metadata store.
    pub metadata: Arc<dyn KeyValueStore>,
    pub ts: Arc<dyn TsStore>,
    pub transport: Arc<dyn Transport>,
    pub resources: Option<Arc<dyn ResourceGraph>>,
    pub analyzer: Option<Arc<dyn CalculationAnalyzer>>,
}

impl ServiceConfig {
    pub fn new(
        host: Arc<dyn HostResolver>,
        metadata: Arc<dyn KeyValueStore>,
        ts: Arc<dyn TsStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            channel: ChannelConfig::default(),
            host,
            metadata,
            ts,
            transport,
            resources: None,
            analyzer: None,
        }
    }

    pub fn with_channel_config(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceGraph>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn CalculationAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }
}
