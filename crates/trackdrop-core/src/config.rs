//! Application configuration management.
//!
//! Handles loading, saving, and managing the settings the download flow
//! reads: the default output directory, the track URL template and the
//! event buffer size.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::DEFAULT_TRACK_URL_TEMPLATE;
use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER;

/// Smallest accepted event buffer.
pub const MIN_EVENT_BUFFER: usize = 16;

/// Largest accepted event buffer.
pub const MAX_EVENT_BUFFER: usize = 4096;

fn default_track_url_template() -> String {
    DEFAULT_TRACK_URL_TEMPLATE.to_string()
}

const fn default_event_buffer_capacity() -> usize {
    DEFAULT_EVENT_BUFFER
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Output directory used when the user gives no override.
    #[serde(default)]
    pub download_directory: Option<PathBuf>,
    /// Template turning a track id into a resolvable URL.
    #[serde(default = "default_track_url_template")]
    pub track_url_template: String,
    /// Buffer of the event hub, shared by all channels.
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_directory: None,
            track_url_template: default_track_url_template(),
            event_buffer_capacity: default_event_buffer_capacity(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, or create it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from `path`, writing defaults if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|e| Error::FileSystem {
            path: path.to_path_buf(),
            message: format!("Failed to read config file: {e}"),
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;

        info!("Loaded config from {}", path.display());
        if let Some(dir) = &config.download_directory {
            debug!("Download directory: {}", dir.display());
        }
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| Error::FileSystem {
                path: parent.to_path_buf(),
                message: format!("Failed to create config directory: {e}"),
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| Error::FileSystem {
            path: path.to_path_buf(),
            message: format!("Failed to write config file: {e}"),
        })?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Update the default download directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is not usable.
    pub fn set_download_directory(&mut self, path: Option<PathBuf>) -> Result<()> {
        if let Some(dir) = &path {
            validate_download_directory(dir)?;
            info!("Updated download directory to: {}", dir.display());
        } else {
            info!("Cleared download directory");
        }
        self.download_directory = path;
        Ok(())
    }

    /// Event buffer size within the accepted bounds.
    #[must_use]
    pub fn event_buffer_capacity(&self) -> usize {
        self.event_buffer_capacity
            .clamp(MIN_EVENT_BUFFER, MAX_EVENT_BUFFER)
    }

    /// Get the path to the config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

/// Get the path to the config file.
fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("trackdrop")
        .join("config.json")
}

/// Validate that a directory can receive downloads, creating it if needed.
fn validate_download_directory(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(Error::Configuration(
            "Download directory must be an absolute path".to_string(),
        ));
    }

    if path.exists() {
        if !path.is_dir() {
            return Err(Error::Configuration(format!(
                "Path exists but is not a directory: {}",
                path.display()
            )));
        }

        let marker = path.join(".trackdrop_write_test");
        match fs::write(&marker, "test") {
            Ok(()) => {
                let _ = fs::remove_file(&marker);
            }
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "Directory is not writable: {} ({})",
                    path.display(),
                    e
                )));
            }
        }
    } else {
        fs::create_dir_all(path).map_err(|e| {
            Error::Configuration(format!("Cannot create directory {}: {}", path.display(), e))
        })?;
    }

    Ok(())
}

/// Configuration manager that handles loading and caching config.
#[derive(Debug)]
pub struct ConfigManager {
    path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    /// Create a manager backed by the default config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded.
    pub fn new() -> Result<Self> {
        Self::with_path(config_file_path())
    }

    /// Create a manager backed by `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        let config = AppConfig::load_from(&path)?;
        Ok(Self { path, config })
    }

    /// Get a reference to the current configuration.
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the download directory is invalid or the config
    /// cannot be saved.
    pub fn update(&mut self, config: AppConfig) -> Result<()> {
        if let Some(dir) = &config.download_directory {
            validate_download_directory(dir)?;
        }
        self.config = config;
        self.config.save_to(&self.path)
    }

    /// Update just the download directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is invalid or config cannot be saved.
    pub fn set_download_directory(&mut self, path: Option<PathBuf>) -> Result<()> {
        self.config.set_download_directory(path)?;
        self.config.save_to(&self.path)
    }

    /// Reset to default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be saved.
    pub fn reset(&mut self) -> Result<()> {
        self.config = AppConfig::default();
        self.config.save_to(&self.path)
    }
}
