//! Daemon configuration, read once at startup from the per-user data dir.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tidyd_core::service::DEFAULT_HISTORY_PAIRS;

#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(std::io::Error),
    ParseFailed(toml::de::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadFailed(error) => write!(f, "failed to read config file: {}", error),
            ConfigError::ParseFailed(error) => write!(f, "failed to parse config file: {}", error),
        }
    }
}

impl std::error::Error for ConfigError {}

fn default_history_pairs() -> usize {
    DEFAULT_HISTORY_PAIRS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directories the daemon watches and organizes.
    #[serde(default)]
    pub watch: Vec<PathBuf>,
    /// Conversation pairs kept as context for chat requests.
    #[serde(default = "default_history_pairs")]
    pub history_pairs: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            watch: Vec::new(),
            history_pairs: DEFAULT_HISTORY_PAIRS,
        }
    }
}

impl DaemonConfig {
    /// Load from `path`. A missing file is not an error, it just means the
    /// default configuration.
    pub fn load(path: &Path) -> Result<DaemonConfig, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DaemonConfig::default());
            }
            Err(error) => return Err(ConfigError::ReadFailed(error)),
        };
        toml::from_str(&text).map_err(ConfigError::ParseFailed)
    }
}
