//! convoyd.toml configuration.
//!
//! Every field is optional in the file; command-line flags override file
//! values, which override the built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 8443;
pub const DEFAULT_DATA_DIR: &str = "/var/lib/convoy";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub agent: AgentSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    pub port: Option<u16>,
    pub request_timeout_ms: Option<u64>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Flags given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub agent_port: Option<u16>,
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub agent_port: u16,
    pub agent_request_timeout: Duration,
}

impl DaemonConfig {
    pub fn resolve(file: FileConfig, cli: CliOverrides) -> Self {
        Self {
            port: cli.port.or(file.server.port).unwrap_or(DEFAULT_PORT),
            data_dir: cli
                .data_dir
                .or(file.server.data_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            agent_port: cli
                .agent_port
                .or(file.agent.port)
                .unwrap_or(convoy_rollout::DEFAULT_AGENT_PORT),
            agent_request_timeout: Duration::from_millis(
                file.agent
                    .request_timeout_ms
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
        }
    }

    /// Path of the redb database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("convoy.redb")
    }
}
