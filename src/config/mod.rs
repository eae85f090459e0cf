//! Configuration management for the differential engine
//!
//! All environment-derived settings are collected into one immutable
//! [`DifferentialConfig`] at suite start and passed explicitly to the
//! locator, discovery and node lifecycle code. Nothing below this module
//! reads the process environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::primitives::Network;
use crate::utils::env::{env_bool, env_int, env_opt, env_path};

/// Environment keys consumed by [`DifferentialConfig::from_env`]
pub mod keys {
    pub const NETWORK: &str = "BITCOIN_NETWORK";
    pub const RPC_USER: &str = "BITCOIN_RPC_USER";
    pub const RPC_PASSWORD: &str = "BITCOIN_RPC_PASSWORD";
    pub const RPC_HOST: &str = "BITCOIN_RPC_HOST";
    pub const RPC_PORT: &str = "BITCOIN_RPC_PORT";
    pub const CORE_PATH: &str = "CORE_PATH";
    pub const CACHE_DIR: &str = "BITCOIN_CORE_CACHE_DIR";
    pub const KEEP_DATA: &str = "KEEP_REGTEST_DATA";
    pub const BASE_PORT: &str = "DIFFERENTIAL_BASE_PORT";
    pub const PORT_RANGE: &str = "DIFFERENTIAL_PORT_RANGE";
    pub const REUSE_NODES: &str = "DIFFERENTIAL_REUSE_NODES";
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// RPC settings used for discovered (reused) nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcSettings {
    /// RPC username (falls back to cookie / bitcoin.conf lookup when unset)
    #[serde(default)]
    pub user: Option<String>,

    /// RPC password
    #[serde(default)]
    pub password: Option<String>,

    /// Host probed by discovery
    #[serde(default = "default_rpc_host")]
    pub host: String,

    /// Custom port probed before the conventional ones
    #[serde(default)]
    pub port: Option<u16>,

    /// Per-call timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_seconds: u64,

    /// Timeout for discovery probes in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_millis: u64,
}

fn default_rpc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    1500
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            host: default_rpc_host(),
            port: None,
            timeout_seconds: default_rpc_timeout(),
            probe_timeout_millis: default_probe_timeout(),
        }
    }
}

impl RpcSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_millis)
    }
}

/// Window of ports used for owned nodes' RPC endpoints
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRangeConfig {
    /// First port probed
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Number of ports in the window
    #[serde(default = "default_port_range")]
    pub range_size: u16,
}

// Above every conventional RPC/P2P port so a user's real nodes are never probed.
fn default_base_port() -> u16 {
    18543
}

fn default_port_range() -> u16 {
    100
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            range_size: default_port_range(),
        }
    }
}

/// Owned node lifecycle tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeLifecycleConfig {
    /// Readiness deadline after spawning the daemon
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,

    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,

    /// Start attempts, each with a fresh port lease
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,

    /// Keep owned node data directories after the node stops
    #[serde(default)]
    pub keep_data: bool,

    /// Reuse an already-running node found by discovery instead of starting one
    #[serde(default)]
    pub reuse_discovered: bool,

    /// Parent directory for owned node data (defaults to /dev/shm or the temp dir)
    #[serde(default)]
    pub data_root: Option<PathBuf>,
}

fn default_startup_timeout() -> u64 {
    60
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_start_attempts() -> u32 {
    2
}

impl Default for NodeLifecycleConfig {
    fn default() -> Self {
        Self {
            startup_timeout_seconds: default_startup_timeout(),
            stop_timeout_seconds: default_stop_timeout(),
            start_attempts: default_start_attempts(),
            keep_data: false,
            reuse_discovered: false,
            data_root: None,
        }
    }
}

impl NodeLifecycleConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }
}

/// Reference binary search configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocatorConfig {
    /// Explicit install/source directory (highest priority)
    #[serde(default)]
    pub core_path: Option<PathBuf>,

    /// Versioned binary cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Extra conventional directories searched after the built-in list
    #[serde(default)]
    pub extra_search_paths: Vec<PathBuf>,

    /// Skip the executable search path (PATH) fallback
    #[serde(default)]
    pub skip_system_path: bool,

    /// Skip the built-in conventional directories
    #[serde(default)]
    pub skip_conventional_paths: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "bllvm_differential::node=debug"); RUST_LOG wins
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON logs (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DifferentialConfig {
    /// Preferred network for discovery
    #[serde(default)]
    pub network: Option<Network>,

    #[serde(default)]
    pub rpc: RpcSettings,

    #[serde(default)]
    pub ports: PortRangeConfig,

    #[serde(default)]
    pub node: NodeLifecycleConfig,

    #[serde(default)]
    pub locator: LocatorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DifferentialConfig {
    /// Build the configuration from defaults plus the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a TOML file, then overlay the process environment
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: DifferentialConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay environment values onto this configuration
    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_opt(keys::NETWORK) {
            let network = value.parse::<Network>().map_err(|_| ConfigError::InvalidValue {
                key: keys::NETWORK,
                value: value.clone(),
            })?;
            self.network = Some(network);
        }

        if let Some(user) = env_opt(keys::RPC_USER) {
            self.rpc.user = Some(user);
        }
        if let Some(password) = env_opt(keys::RPC_PASSWORD) {
            self.rpc.password = Some(password);
        }
        if let Some(host) = env_opt(keys::RPC_HOST) {
            self.rpc.host = host;
        }
        if let Some(value) = env_opt(keys::RPC_PORT) {
            self.rpc.port = Some(parse_port(keys::RPC_PORT, &value)?);
        }

        if let Some(path) = env_path(keys::CORE_PATH) {
            self.locator.core_path = Some(path);
        }
        if let Some(path) = env_path(keys::CACHE_DIR) {
            self.locator.cache_dir = Some(path);
        }

        if env_opt(keys::KEEP_DATA).is_some() {
            self.node.keep_data = env_bool(keys::KEEP_DATA);
        }
        if env_opt(keys::REUSE_NODES).is_some() {
            self.node.reuse_discovered = env_bool(keys::REUSE_NODES);
        }

        if let Some(value) = env_opt(keys::BASE_PORT) {
            self.ports.base_port = parse_port(keys::BASE_PORT, &value)?;
        }
        if let Some(value) = env_opt(keys::PORT_RANGE) {
            self.ports.range_size =
                env_int::<u16>(keys::PORT_RANGE)
                    .filter(|r| *r > 0)
                    .ok_or(ConfigError::InvalidValue {
                        key: keys::PORT_RANGE,
                        value,
                    })?;
        }

        Ok(())
    }
}

fn parse_port(key: &'static str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_KEYS: [&str; 11] = [
        keys::NETWORK,
        keys::RPC_USER,
        keys::RPC_PASSWORD,
        keys::RPC_HOST,
        keys::RPC_PORT,
        keys::CORE_PATH,
        keys::CACHE_DIR,
        keys::KEEP_DATA,
        keys::BASE_PORT,
        keys::PORT_RANGE,
        keys::REUSE_NODES,
    ];

    fn clear_env() {
        for key in ALL_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_environment() {
        clear_env();
        let config = DifferentialConfig::from_env().unwrap();
        assert_eq!(config, DifferentialConfig::default());
        assert_eq!(config.rpc.host, "127.0.0.1");
        assert_eq!(config.ports.base_port, 18543);
        assert_eq!(config.node.start_attempts, 2);
        assert!(!config.node.keep_data);
    }

    #[test]
    #[serial]
    fn test_environment_overlay() {
        clear_env();
        std::env::set_var(keys::NETWORK, "regtest");
        std::env::set_var(keys::RPC_USER, "alice");
        std::env::set_var(keys::RPC_PASSWORD, "secret");
        std::env::set_var(keys::RPC_PORT, "19443");
        std::env::set_var(keys::KEEP_DATA, "1");
        std::env::set_var(keys::CORE_PATH, "/opt/core");
        std::env::set_var(keys::BASE_PORT, "20000");

        let config = DifferentialConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.network, Some(Network::Regtest));
        assert_eq!(config.rpc.user.as_deref(), Some("alice"));
        assert_eq!(config.rpc.password.as_deref(), Some("secret"));
        assert_eq!(config.rpc.port, Some(19443));
        assert!(config.node.keep_data);
        assert_eq!(config.locator.core_path, Some(PathBuf::from("/opt/core")));
        assert_eq!(config.ports.base_port, 20000);
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        clear_env();
        std::env::set_var(keys::NETWORK, "moon");
        assert!(matches!(
            DifferentialConfig::from_env(),
            Err(ConfigError::InvalidValue { key: keys::NETWORK, .. })
        ));
        clear_env();

        std::env::set_var(keys::RPC_PORT, "70000");
        assert!(DifferentialConfig::from_env().is_err());
        clear_env();

        std::env::set_var(keys::PORT_RANGE, "0");
        assert!(DifferentialConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_toml_file() {
        clear_env();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("differential.toml");
        std::fs::write(
            &path,
            r#"
network = "signet"

[ports]
base_port = 21000
range_size = 10

[node]
keep_data = true
startup_timeout_seconds = 5

[logging]
filter = "debug"
"#,
        )
        .unwrap();

        let config = DifferentialConfig::from_file(&path).unwrap();
        assert_eq!(config.network, Some(Network::Signet));
        assert_eq!(config.ports.base_port, 21000);
        assert_eq!(config.ports.range_size, 10);
        assert!(config.node.keep_data);
        assert_eq!(config.node.startup_timeout(), Duration::from_secs(5));
        assert_eq!(config.node.stop_timeout_seconds, 10);
        assert_eq!(config.logging.filter.as_deref(), Some("debug"));
    }
}
