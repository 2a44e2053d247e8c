//! Configuration schema and loader for the pstore router.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;

/// Top-level router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Caller-facing gRPC listen address.
    pub listen: SocketAddr,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Upper bound on a single message, applied to both directions on the
    /// caller-facing server and on every backend client.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Backends in fanout order. Index 0 is the default primary.
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub write_queue: WriteQueueSettings,
}

/// Native schema spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Same schema as the router itself.
    Pstore,
    Rstore,
    Mstore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Stable identifier used for metric labels and write-queue routing.
    pub name: String,
    pub kind: BackendKind,
    /// Endpoint URI, e.g. `http://rstore.rstore:8080`.
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutMode {
    /// Primary inline, secondaries concurrently in the background.
    Parallel,
    /// Every backend inline, in order, before answering.
    Sequential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_mode")]
    pub mode: FanoutMode,

    /// Parallel mode only: a failed primary skips the secondary phase.
    #[serde(default = "default_true")]
    pub short_circuit: bool,

    /// Probability in [0, 1] of routing authority away from backend 0.
    #[serde(default)]
    pub split_weight: f64,

    /// Effective deadline when the caller sets none.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            short_circuit: true,
            split_weight: 0.0,
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteQueueSettings {
    /// Bounded backlog; producers wait once it is full.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Per-element delivery timeout.
    #[serde(default = "default_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Enqueue the primary's value for secondaries that disagree on Read.
    #[serde(default)]
    pub read_repair: bool,
}

impl Default for WriteQueueSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            delivery_timeout_ms: default_timeout_ms(),
            read_repair: false,
        }
    }
}

// --- Defaults ---

fn default_max_message_bytes() -> usize {
    2000 * 1024 * 1024
}
fn default_mode() -> FanoutMode {
    FanoutMode::Parallel
}
fn default_true() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_capacity() -> usize {
    1024
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl RouterConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::Invalid(
                "backends must list at least one backend".into(),
            ));
        }
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                return Err(ConfigError::Invalid("backends[].name must be set".into()));
            }
            if backend.address.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "backend '{}' has no address",
                    backend.name
                )));
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate backend name '{}'",
                    backend.name
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.dispatch.split_weight) {
            return Err(ConfigError::Invalid(format!(
                "dispatch.split_weight ({}) must be within [0, 1]",
                self.dispatch.split_weight
            )));
        }
        if self.dispatch.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.default_timeout_ms must be > 0".into(),
            ));
        }
        if self.write_queue.capacity == 0 {
            return Err(ConfigError::Invalid(
                "write_queue.capacity must be > 0".into(),
            ));
        }
        if self.write_queue.delivery_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "write_queue.delivery_timeout_ms must be > 0".into(),
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid("max_message_bytes must be > 0".into()));
        }
        Ok(())
    }
}

/// Load a `RouterConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<RouterConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `RouterConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<RouterConfig, ConfigError> {
    let config: RouterConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
