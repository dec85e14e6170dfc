use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::identity::generate_display_name;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "pollen";
const APP_NAME: &str = "pollen";
const CONFIG_FILE: &str = "config.json";

/// Overrides the config directory (used by tests)
pub const CONFIG_DIR_ENV: &str = "POLLEN_CONFIG_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollenConfig {
    /// Human-readable name shown to peers and in logs
    pub display_name: String,
    /// Where received files are saved
    pub download_path: PathBuf,
}

impl Default for PollenConfig {
    fn default() -> Self {
        Self {
            display_name: generate_display_name(),
            download_path: default_download_dir(),
        }
    }
}

impl PollenConfig {
    fn config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk, or create and persist a default one
    pub fn load_or_create() -> Result<Self> {
        let path = Self::config_path().context("No config directory available")?;

        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save()?;
                tracing::info!("Created config at {}", path.display());
                Ok(config)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        Self::load_or_create().unwrap_or_else(|e| {
            tracing::warn!("Using default config: {:#}", e);
            Self::default()
        })
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().context("No config directory available")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default download directory: ~/pollen
pub fn default_download_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pollen")
}
