//! Settings file at ~/.jiranlink/config.json.
//!
//! Every field is optional; a missing file means defaults throughout.

use crate::location::providers::{ProviderKind, ProviderSettings, DEFAULT_GPSD_ADDR};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderKind,
    pub gpsd_addr: String,
    pub timeout_secs: u64,
    /// Readings with a larger error radius (meters) are refused.
    pub max_accuracy_m: Option<f64>,
    /// JSON district list replacing the built-in set.
    pub districts_file: Option<PathBuf>,
    pub listings_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Auto,
            gpsd_addr: DEFAULT_GPSD_ADDR.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_accuracy_m: None,
            districts_file: None,
            listings_file: None,
        }
    }
}

impl Config {
    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io { path: path.to_path_buf(), source });
            }
        };
        let mut cfg: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        // A zero deadline would fail every lookup before it starts.
        if cfg.timeout_secs == 0 {
            tracing::warn!("timeout_secs = 0 in {}; using {}s", path.display(), DEFAULT_TIMEOUT_SECS);
            cfg.timeout_secs = DEFAULT_TIMEOUT_SECS;
        }
        Ok(cfg)
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".jiranlink")
            .join("config.json")
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            gpsd_addr: self.gpsd_addr.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}
