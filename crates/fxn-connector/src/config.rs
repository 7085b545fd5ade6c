//! Connector configuration.
//!
//! Loaded from a TOML file. Every section is optional and falls back to its
//! defaults; CLI flags are applied on top by the binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fxn_node::{HeadConfig, NodeConfig, WorkerConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9370";
pub const CONFIG_FILE_NAME: &str = "connector.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Address the REST API binds to.
    pub listen_addr: String,
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Number of in-process workers.
    pub workers: usize,
    /// Root for installed functions and job working directories.
    pub data_dir: PathBuf,
    /// Program that runs a function's entry point. When unset the entry
    /// point itself is executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<PathBuf>,
    /// Settings shared by the head and every worker.
    pub node: NodeConfig,
    /// Head node settings.
    pub head: HeadConfig,
    /// Settings applied to each worker.
    pub worker: WorkerConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            log_level: "info".to_string(),
            workers: 3,
            data_dir: default_data_dir(),
            runtime: None,
            node: NodeConfig::default(),
            head: HeadConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("fxn"))
        .unwrap_or_else(|| PathBuf::from(".fxn"))
}

/// `<config dir>/fxn/connector.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fxn").join(CONFIG_FILE_NAME))
}

impl ConnectorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load `path`, or the default config file when it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be positive");
        }
        self.listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen address {}", self.listen_addr))?;
        self.node.validate()?;
        self.head.validate()?;
        self.worker.validate()?;
        Ok(())
    }

    /// Directory holding the functions installed on `worker`.
    pub fn functions_dir(&self, worker: &str) -> PathBuf {
        self.data_dir.join("functions").join(worker)
    }

    /// Directory holding job working directories for `worker`.
    pub fn work_dir(&self, worker: &str) -> PathBuf {
        self.data_dir.join("work").join(worker)
    }
}
