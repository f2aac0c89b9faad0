//! Configuration module for markloc
//!
//! Loads user configuration from ~/.markloc/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Team the markers belong to
    pub team_id: String,
    /// Marker database (default: <config_dir>/markloc/markers.db)
    pub database: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            team_id: "local".to_string(),
            database: None,
        }
    }
}

impl Config {
    /// Load configuration from default path (~/.markloc/config.toml)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(config_path: &std::path::Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Invalid config file: {}", config_path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".markloc")
            .join("config.toml")
    }

    /// Merge CLI overrides into config
    pub fn with_overrides(mut self, team_id: Option<String>, database: Option<PathBuf>) -> Self {
        if let Some(team) = team_id {
            self.team_id = team;
        }
        if let Some(db) = database {
            self.database = Some(db);
        }
        self
    }

    /// Create a default config file, returning its path
    pub fn create_default() -> Result<PathBuf> {
        let config_path = Self::default_path();
        let config = Config::default();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(&config)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(config_path)
    }
}
