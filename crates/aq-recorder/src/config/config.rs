//! Configuration management for aq-recorder.
//!
//! Handles loading and saving TOML configuration files with cross-platform
//! paths, validation, and atomic write operations.

use crate::{
    AppError, AppResult,
    config::{MAX_CHANNELS, RecordingConfig},
};

use aq_recorder_core::MIN_RECORD_BUFFERS;

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Main configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Recording session settings.
    #[serde(default)]
    pub recording: RecordingConfig,
}

impl Config {
    /// Load configuration from the platform config directory, creating a
    /// default file if none exists.
    #[track_caller]
    #[instrument]
    pub fn load() -> AppResult<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path`, writing defaults there if it is missing.
    #[track_caller]
    pub fn load_from(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            info!(config_path = ?path, "No config found, creating default");
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| AppError::config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| AppError::config(format!("Failed to parse config: {}", e)))?;

        info!(config_path = ?path, "Configuration loaded");

        Ok(config)
    }

    /// Check every recording setting before any device is opened.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn validate(&self) -> AppResult<()> {
        let recording = &self.recording;

        if recording.output_path.as_os_str().is_empty() {
            return Err(AppError::config("output_path must not be empty"));
        }
        if !(1..=MAX_CHANNELS).contains(&recording.channels) {
            return Err(AppError::config(format!(
                "channels must be between 1 and {}, got {}",
                MAX_CHANNELS, recording.channels
            )));
        }
        if recording.buffer_count < MIN_RECORD_BUFFERS {
            return Err(AppError::config(format!(
                "buffer_count must be at least {}, got {}",
                MIN_RECORD_BUFFERS, recording.buffer_count
            )));
        }
        if !recording.buffer_duration_secs.is_finite() || recording.buffer_duration_secs <= 0.0 {
            return Err(AppError::config(format!(
                "buffer_duration_secs must be positive, got {}",
                recording.buffer_duration_secs
            )));
        }
        if let Some(max) = recording.max_duration_secs
            && (!max.is_finite() || max <= 0.0)
        {
            return Err(AppError::config(format!(
                "max_duration_secs must be positive, got {}",
                max
            )));
        }

        Ok(())
    }

    /// Save configuration to `path` using atomic write pattern.
    ///
    /// Writes to a temporary file first, then renames to prevent corruption
    /// if the process crashes during the write.
    #[track_caller]
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| AppError::config(format!("Failed to serialize config: {}", e)))?;

        let temp_path = path.with_extension("toml.tmp");

        let mut temp_file = fs::File::create(&temp_path)
            .map_err(|e| AppError::config(format!("Failed to create temp config file: {}", e)))?;

        temp_file
            .write_all(contents.as_bytes())
            .map_err(|e| AppError::config(format!("Failed to write temp config file: {}", e)))?;

        temp_file
            .sync_all()
            .map_err(|e| AppError::config(format!("Failed to sync temp config file: {}", e)))?;

        fs::rename(&temp_path, path).map_err(|e| {
            AppError::config(format!("Failed to rename temp config to final: {}", e))
        })?;

        info!(config_path = ?path, "Configuration saved (atomic write)");

        Ok(())
    }

    #[track_caller]
    fn config_path() -> AppResult<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "aq-recorder", "AQ-Recorder")
            .ok_or_else(|| AppError::config("Failed to get config directory"))?;

        let config_dir = proj_dirs.config_dir();

        if !config_dir.exists() {
            fs::create_dir_all(config_dir)?;
            debug!(config_dir = ?config_dir, "Created config directory");
        }

        Ok(config_dir.join("config.toml"))
    }
}
