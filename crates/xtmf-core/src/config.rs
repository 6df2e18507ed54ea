//! Process-chain configuration
//!
//! All tunables in one place. Loaded from TOML at startup, falls back to
//! defaults if no config file exists.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct XtmfConfig {
    pub client: ClientConfig,
    pub bus: BusConfig,
    pub host: HostConfig,
}

/// Where a client executes the runs it dequeues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// One run process per job.
    #[default]
    Process,
    /// Runs execute on a blocking thread of the client itself.
    InProcess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Heartbeat period toward the host. 0 disables heartbeats.
    pub heartbeat_interval_ms: u64,
    pub isolation: Isolation,
    /// Executable launched per run. Defaults to the current executable.
    pub run_executable: Option<PathBuf>,
    pub run_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Upper bound on waiting for a reader loop to observe disposal.
    pub dispose_timeout_ms: u64,
    /// Poll period while waiting for the reader loop.
    pub dispose_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Client executable launched by the host. Defaults to the current executable.
    pub client_executable: Option<PathBuf>,
    pub client_args: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            isolation: Isolation::default(),
            run_executable: None,
            run_args: vec!["run".into()],
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dispose_timeout_ms: 2_000,
            dispose_poll_ms: 25,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            client_executable: None,
            client_args: vec!["client".into()],
        }
    }
}

impl BusConfig {
    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.dispose_timeout_ms)
    }

    pub fn dispose_poll(&self) -> Duration {
        Duration::from_millis(self.dispose_poll_ms.max(1))
    }
}

impl ClientConfig {
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

impl XtmfConfig {
    /// `<config dir>/xtmf/xtmf.toml`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("xtmf").join("xtmf.toml"))
    }

    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(Error::IoError(_)) => {
                tracing::info!("No config at {} - using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("{} - using defaults", e);
                Self::default()
            }
        }
    }

    /// Strict variant of [`XtmfConfig::load`].
    pub fn try_load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
