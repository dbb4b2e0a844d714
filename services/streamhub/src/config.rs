//! Streamhub configuration loading.
//!
//! Process-level settings (bind address, admission/heartbeat tuning) come
//! from environment variables read at startup, with a thin `clap` layer for
//! the handful of flags that make sense as process arguments. The remote-node
//! table and the demo token table live in an optional TOML file, loaded via
//! a `RawFileConfig` with every field `Option`, validated (and defaulted)
//! into a concrete struct.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use streamhub_protocol::RemoteNodeConfig;
use thiserror::Error;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/streamhub/streamhub.toml";

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct StreamhubConfig {
    pub bind: String,
    pub max_clients: usize,
    pub heartbeat_interval: Duration,
    pub remote_nodes: Vec<RemoteNodeConfig>,
    pub tokens: HashMap<String, String>,
}

impl Default for StreamhubConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_owned(),
            max_clients: streamhub_core::DEFAULT_MAX_CLIENTS,
            heartbeat_interval: streamhub_core::HEARTBEAT_INTERVAL,
            remote_nodes: Vec::new(),
            tokens: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawFileConfig {
    remote_nodes: Option<Vec<RemoteNodeConfig>>,
    tokens: Option<HashMap<String, String>>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io { path: String, source: std::io::Error },
    #[error("parsing config file: {0}")]
    Parse(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Load the remote-node/token table from a TOML file, if `path` exists.
/// A missing file at the default path is not an error; an explicitly
/// requested path that cannot be read is.
fn load_file_config(path: &Path, required: bool) -> Result<RawFileConfig, ConfigError> {
    let toml_str = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(source) if !required && source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(RawFileConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Io { path: path.display().to_string(), source });
        }
    };
    toml::from_str(&toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Build the final configuration from CLI flags, environment variables, and
/// an optional TOML file. CLI flags win over environment variables; both win
/// over file/library defaults.
pub fn resolve_config(
    bind_flag: Option<String>,
    config_path_flag: Option<String>,
) -> Result<StreamhubConfig, ConfigError> {
    let mut config = StreamhubConfig::default();

    if let Ok(value) = std::env::var("STREAMHUB_BIND") {
        config.bind = value;
    }
    if let Some(bind) = bind_flag {
        config.bind = bind;
    }

    if let Ok(value) = std::env::var("STREAMHUB_MAX_CLIENTS") {
        config.max_clients = value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("STREAMHUB_MAX_CLIENTS: {value}")))?;
    }

    if let Ok(value) = std::env::var("STREAMHUB_HEARTBEAT_INTERVAL_SECS") {
        let secs: u64 = value.parse().map_err(|_| {
            ConfigError::InvalidValue(format!("STREAMHUB_HEARTBEAT_INTERVAL_SECS: {value}"))
        })?;
        config.heartbeat_interval = Duration::from_secs(secs);
    }

    let (config_path, required) = match config_path_flag.or_else(|| std::env::var("STREAMHUB_CONFIG_PATH").ok()) {
        Some(path) => (path, true),
        None => (DEFAULT_CONFIG_PATH.to_owned(), false),
    };
    let file = load_file_config(Path::new(&config_path), required)?;
    if let Some(remote_nodes) = file.remote_nodes {
        config.remote_nodes = remote_nodes;
    }
    if let Some(tokens) = file.tokens {
        config.tokens = tokens;
    }

    Ok(config)
}
