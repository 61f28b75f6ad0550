//! Runtime settings and the optional user config file
//!
//! Defaults can be overridden in `~/.vulcan-sync/config.json`; the CLI then
//! applies environment variables and flags on top.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Local end of the forwarding tunnel
pub const LOCAL_PORT: u16 = 61222;
/// Admin API port on the gateway instance
pub const REMOTE_PORT: u16 = 8182;
/// Interval between tunnel readiness probes
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Upper bound on the tunnel readiness wait
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of the project spec store
    pub config_dir: PathBuf,
    /// Load balancer fronting the gateway instances
    pub pool: String,
    /// AWS region passed to the inventory and metadata lookups
    pub region: Option<String>,
    /// Remote user for the SSH tunnel
    pub ssh_user: Option<String>,
    /// Identity file for the SSH tunnel
    pub ssh_identity: Option<PathBuf>,
    /// Admin client binary
    pub admin_client: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("projects"),
            pool: "vulcan".to_string(),
            region: None,
            ssh_user: None,
            ssh_identity: None,
            admin_client: "vctl".to_string(),
            local_port: LOCAL_PORT,
            remote_port: REMOTE_PORT,
            poll_interval: POLL_INTERVAL,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

impl Settings {
    /// Base URL of the admin API through the tunnel
    pub fn tunnel_base_url(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }

    /// Apply values present in the config file
    pub fn merge_file(mut self, file: FileConfig) -> Self {
        if let Some(config_dir) = file.config_dir {
            self.config_dir = config_dir;
        }
        if let Some(pool) = file.pool {
            self.pool = pool;
        }
        if file.region.is_some() {
            self.region = file.region;
        }
        if file.ssh_user.is_some() {
            self.ssh_user = file.ssh_user;
        }
        if file.ssh_identity.is_some() {
            self.ssh_identity = file.ssh_identity;
        }
        if let Some(admin_client) = file.admin_client {
            self.admin_client = admin_client;
        }
        if let Some(secs) = file.ready_timeout_seconds {
            self.ready_timeout = Duration::from_secs(secs);
        }
        self
    }
}

/// Contents of `~/.vulcan-sync/config.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_identity: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_timeout_seconds: Option<u64>,
}

/// Configuration file loader
pub struct ConfigManager;

impl ConfigManager {
    /// Default config file path, if a home directory exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".vulcan-sync").join("config.json"))
    }

    /// Load the config file at `path`
    ///
    /// A missing file yields the empty config.
    pub fn load_from(path: &Path) -> Result<FileConfig> {
        if !path.exists() {
            return Ok(FileConfig::default());
        }

        let json = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        serde_json::from_str(&json).map_err(|e| {
            SyncError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load settings from defaults plus the user config file
    pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
        let file = match path {
            Some(path) => Self::load_from(path)?,
            None => match Self::default_path() {
                Some(path) => Self::load_from(&path)?,
                None => FileConfig::default(),
            },
        };
        Ok(Settings::default().merge_file(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.local_port, 61222);
        assert_eq!(settings.remote_port, 8182);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.tunnel_base_url(), "http://localhost:61222");
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let temp = TempDir::new().unwrap();
        let config = ConfigManager::load_from(&temp.path().join("config.json")).unwrap();
        assert_eq!(config, FileConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".vulcan-sync").join("config.json");
        let config = FileConfig {
            pool: Some("edge-lb".to_string()),
            ssh_user: Some("ubuntu".to_string()),
            ready_timeout_seconds: Some(5),
            ..Default::default()
        };
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let settings = ConfigManager::load_settings(Some(&path)).unwrap();
        assert_eq!(settings.pool, "edge-lb");
        assert_eq!(settings.ssh_user.as_deref(), Some("ubuntu"));
        assert_eq!(settings.ready_timeout, Duration::from_secs(5));
        assert_eq!(settings.admin_client, "vctl");
    }

    #[test]
    fn test_malformed_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(ConfigManager::load_from(&path).is_err());
    }
}
