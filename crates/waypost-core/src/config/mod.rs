//! Configuration management for Waypost.
//!
//! This module handles loading, saving, and managing Waypost configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/waypost/config.toml` |
//! | macOS | `~/Library/Application Support/Waypost/config.toml` |
//! | Windows | `%APPDATA%\Waypost\config.toml` |

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::ConnectionParams;
use crate::error::{Error, Result};
use crate::{DEFAULT_DURATION_SECS, DEFAULT_INTERVAL_SECS};

/// Main configuration struct for Waypost.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings
    pub server: ServerConfig,
    /// Sharing session settings
    pub sharing: SharingConfig,
    /// Security settings
    pub security: SecurityConfig,
}

/// Backend server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the backend server
    pub url: String,
    /// Account name, for servers that require one
    pub username: Option<String>,
    /// Server password
    pub password: String,
    /// Transport parameters (timeout, proxy, certificate policy)
    pub connection: ConnectionParams,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: String::new(),
            connection: ConnectionParams::default(),
        }
    }
}

/// Sharing session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    /// Session duration
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Location push interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Minimum movement in meters before a new position is pushed
    pub min_distance: f64,
    /// Preferred link ID; the server may honor or ignore it
    pub custom_id: Option<String>,
    /// Resume an interrupted session without prompting
    pub auto_resume: bool,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            min_distance: 0.0,
            custom_id: None,
            auto_resume: false,
        }
    }
}

/// Security configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Passphrase enabling end-to-end encryption when set
    pub e2e_passphrase: Option<String>,
}

impl Config {
    /// Load the configuration from the default location.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()
            .ok_or_else(|| Error::Config("cannot determine config directory".to_string()))?;
        Self::load_from(path)
    }

    /// Load the configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Save the configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()
            .ok_or_else(|| Error::Config("cannot determine config directory".to_string()))?;
        self.save_to(path)
    }

    /// Save the configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Config(format!(
                    "failed to create config directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let raw = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;
        fs::write(&path, raw)
            .map_err(|e| Error::Config(format!("failed to write {}: {e}", path.display())))
    }

    /// The default configuration file path for this platform.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "waypost", "Waypost")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sharing.duration.as_secs(), DEFAULT_DURATION_SECS);
        assert_eq!(config.sharing.interval.as_secs(), DEFAULT_INTERVAL_SECS);
        assert!(!config.sharing.auto_resume);
        assert!(config.security.e2e_passphrase.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(dir.path().join("config.toml")).unwrap();
        assert!(config.server.url.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.server.url = "https://waypost.example.com".to_string();
        config.server.password = "secret".to_string();
        config.sharing.duration = Duration::from_secs(3600);
        config.sharing.auto_resume = true;
        config.save_to(path.clone()).unwrap();

        let loaded = Config::load_from(path).unwrap();
        assert_eq!(loaded.server.url, "https://waypost.example.com");
        assert_eq!(loaded.sharing.duration.as_secs(), 3600);
        assert!(loaded.sharing.auto_resume);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nurl = \"https://waypost.example.com\"\n").unwrap();

        let config = Config::load_from(path).unwrap();
        assert_eq!(config.server.url, "https://waypost.example.com");
        assert_eq!(config.sharing.interval.as_secs(), DEFAULT_INTERVAL_SECS);
    }
}
