//! On-disk JSON configuration.
//!
//! A small JSON file under the application home directory holds the upstream
//! agent endpoint. A missing file is created with defaults; an unreadable or
//! invalid file is logged and defaults are used, so a broken config never
//! prevents the bridge from starting.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BridgeError, Result};

/// Directory name of the application home under `$HOME`.
const APP_HOME_DIR_NAME: &str = ".pageant-bridge";

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Endpoint of the upstream agent both frontends relay to.
    pub agent_endpoint: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            agent_endpoint: default_agent_endpoint(),
        }
    }
}

/// The well-known upstream agent endpoint: the ambient agent socket if one
/// is advertised, otherwise the fixed system path.
pub fn default_agent_endpoint() -> String {
    std::env::var("SSH_AUTH_SOCK").unwrap_or_else(|_| "/tmp/openssh-ssh-agent.sock".to_string())
}

/// Application home directory (`~/.pageant-bridge`).
pub fn app_home_dir() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| BridgeError::Config("HOME is not set".to_string()))?;
    Ok(PathBuf::from(home).join(APP_HOME_DIR_NAME))
}

/// Default config file path (`~/.pageant-bridge/configs/default-conf.json`).
pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_home_dir()?.join("configs").join("default-conf.json"))
}

/// Create the application home layout (`logs/`, `configs/`) if missing.
pub fn ensure_app_dirs() -> Result<()> {
    let home = app_home_dir()?;
    std::fs::create_dir_all(home.join("logs"))?;
    std::fs::create_dir_all(home.join("configs"))?;
    Ok(())
}

impl BridgeConfig {
    /// Load the config from `path`, creating it with defaults if missing.
    ///
    /// Read or parse failures fall back to defaults after logging; the
    /// original file is left untouched for inspection.
    pub fn load_or_create(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, creating default");
            let config = Self::default();
            if let Err(e) = config.store(path) {
                warn!(error = %e, "failed to create default config file");
            }
            return config;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(config) => {
                info!(path = %path.display(), "loaded config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                Self::default()
            }
        }
    }

    /// Write the config to `path` as pretty-printed JSON.
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.json");

        let config = BridgeConfig::load_or_create(&path);
        assert_eq!(config.agent_endpoint, default_agent_endpoint());
        assert!(path.exists());
    }

    #[test]
    fn test_store_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.json");

        let config = BridgeConfig {
            agent_endpoint: "/run/agent.sock".to_string(),
        };
        config.store(&path).unwrap();

        let loaded = BridgeConfig::load_or_create(&path);
        assert_eq!(loaded.agent_endpoint, "/run/agent.sock");
    }

    #[test]
    fn test_invalid_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.json");
        std::fs::write(&path, "{not json").unwrap();

        let config = BridgeConfig::load_or_create(&path);
        assert_eq!(config.agent_endpoint, default_agent_endpoint());
    }
}
