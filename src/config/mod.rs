// SPDX-License-Identifier: MPL-2.0
//! This module handles the player's configuration, including loading and saving
//! user preferences to a `settings.toml` file.
//!
//! # Examples
//!
//! ```no_run
//! use vidlens::config::{self, PlayerConfig};
//! use std::path::PathBuf;
//!
//! // Load existing configuration
//! let mut config = config::load().unwrap_or_default();
//!
//! // Modify a setting
//! config.force_software_hdr = true;
//!
//! // Save the modified configuration
//! config::save(&config).expect("Failed to save config");
//!
//! // To load/save from a specific path (e.g., for testing)
//! let temp_dir = PathBuf::from("./temp_config_dir");
//! std::fs::create_dir_all(&temp_dir).unwrap();
//! let temp_file = temp_dir.join("test_settings.toml");
//! config::save_to_path(&config, &temp_file).expect("Failed to save to path");
//! let loaded_config = config::load_from_path(&temp_file).expect("Failed to load from path");
//! assert!(loaded_config.force_software_hdr);
//! std::fs::remove_dir_all(&temp_dir).unwrap();
//! ```

pub mod defaults;

pub use defaults::*;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "settings.toml";
const APP_NAME: &str = "vidlens";

/// Persisted player settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Playback volume (0.0 to 1.0).
    pub volume: f32,
    /// Whether audio output is muted.
    pub muted: bool,
    /// Prefer the 10-bit system-memory path over GPU textures for HDR sources.
    pub force_software_hdr: bool,
    /// Hardware device type name passed to FFmpeg (e.g. "vaapi", "d3d11va").
    /// `None` picks the platform default.
    pub hardware_device: Option<String>,
    /// Hand hardware surfaces to the renderer instead of copying them to
    /// system memory. Only SDR surfaces qualify; HDR still goes through the
    /// tone mapper.
    pub zero_copy: bool,
    pub sync: SyncSettings,
    pub hdr: HdrSettings,
    pub audio: AudioSettings,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
            muted: false,
            force_software_hdr: false,
            hardware_device: None,
            zero_copy: false,
            sync: SyncSettings::default(),
            hdr: HdrSettings::default(),
            audio: AudioSettings::default(),
        }
    }
}

/// Clock/sync thresholds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub late_drop_ms: u32,
    pub early_sleep_ms: u32,
    pub grace_window_ms: u32,
    pub catch_up_ms: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            late_drop_ms: DEFAULT_LATE_DROP_MS,
            early_sleep_ms: DEFAULT_EARLY_SLEEP_MS,
            grace_window_ms: DEFAULT_GRACE_WINDOW_MS,
            catch_up_ms: DEFAULT_CATCH_UP_MS,
        }
    }
}

impl SyncSettings {
    /// Returns a copy with every threshold clamped into the supported range.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let clamp = |ms: u32| ms.clamp(MIN_SYNC_THRESHOLD_MS, MAX_SYNC_THRESHOLD_MS);
        Self {
            late_drop_ms: clamp(self.late_drop_ms),
            early_sleep_ms: clamp(self.early_sleep_ms),
            grace_window_ms: clamp(self.grace_window_ms),
            catch_up_ms: clamp(self.catch_up_ms),
        }
    }
}

/// HDR filter graph settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdrSettings {
    pub max_in_flight: u32,
    pub ceiling_width: u32,
    pub ceiling_height: u32,
}

impl Default for HdrSettings {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_HDR_MAX_IN_FLIGHT,
            ceiling_width: DEFAULT_HDR_CEILING_WIDTH,
            ceiling_height: DEFAULT_HDR_CEILING_HEIGHT,
        }
    }
}

impl HdrSettings {
    /// Returns the in-flight bound clamped into the supported range.
    #[must_use]
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight
            .clamp(MIN_HDR_MAX_IN_FLIGHT, MAX_HDR_MAX_IN_FLIGHT)
    }
}

/// Audio device buffer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub buffer_ms: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            buffer_ms: DEFAULT_AUDIO_BUFFER_MS,
        }
    }
}

impl AudioSettings {
    /// Ring buffer length, clamped into the supported range.
    #[must_use]
    pub fn buffer_duration(&self) -> Duration {
        Duration::from_millis(u64::from(
            self.buffer_ms.clamp(MIN_AUDIO_BUFFER_MS, MAX_AUDIO_BUFFER_MS),
        ))
    }
}

/// Location of `settings.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push(APP_NAME);
        path.push(CONFIG_FILE);
        path
    })
}

pub fn load() -> Result<PlayerConfig> {
    if let Some(path) = default_config_path() {
        if path.exists() {
            return load_from_path(&path);
        }
    }
    Ok(PlayerConfig::default())
}

pub fn save(config: &PlayerConfig) -> Result<()> {
    if let Some(path) = default_config_path() {
        return save_to_path(config, &path);
    }
    Ok(())
}

pub fn load_from_path(path: &Path) -> Result<PlayerConfig> {
    let content = fs::read_to_string(path)?;
    match toml::from_str(&content) {
        Ok(config) => Ok(config),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "invalid settings file, using defaults");
            Ok(PlayerConfig::default())
        }
    }
}

pub fn save_to_path(config: &PlayerConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip_preserves_settings() {
        let config = PlayerConfig {
            volume: 0.4,
            muted: true,
            force_software_hdr: true,
            hardware_device: Some("vaapi".to_string()),
            zero_copy: true,
            sync: SyncSettings {
                late_drop_ms: 250,
                ..SyncSettings::default()
            },
            ..PlayerConfig::default()
        };
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        save_to_path(&config, &config_path).expect("failed to save config");
        let loaded = load_from_path(&config_path).expect("failed to load config");

        assert_eq!(loaded, config);
    }

    #[test]
    fn load_from_path_returns_default_on_invalid_toml() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "not = valid = toml").expect("failed to write invalid toml");

        let loaded = load_from_path(&config_path).expect("load should not error");
        assert_eq!(loaded, PlayerConfig::default());
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "volume = 0.25\n").expect("failed to write toml");

        let loaded = load_from_path(&config_path).expect("load should not error");
        assert!((loaded.volume - 0.25).abs() < f32::EPSILON);
        assert_eq!(loaded.sync, SyncSettings::default());
        assert_eq!(loaded.hdr.max_in_flight, DEFAULT_HDR_MAX_IN_FLIGHT);
        assert!(!loaded.zero_copy);
    }

    #[test]
    fn save_to_path_creates_parent_directories() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("deep").join("path").join("settings.toml");

        save_to_path(&PlayerConfig::default(), &config_path)
            .expect("save should create directories");
        assert!(config_path.exists());
    }

    #[test]
    fn sanitized_sync_settings_are_clamped() {
        let settings = SyncSettings {
            late_drop_ms: 0,
            early_sleep_ms: 99_999,
            ..SyncSettings::default()
        }
        .sanitized();
        assert_eq!(settings.late_drop_ms, MIN_SYNC_THRESHOLD_MS);
        assert_eq!(settings.early_sleep_ms, MAX_SYNC_THRESHOLD_MS);
    }

    #[test]
    fn hdr_in_flight_is_clamped() {
        let hdr = HdrSettings {
            max_in_flight: 0,
            ..HdrSettings::default()
        };
        assert_eq!(hdr.max_in_flight(), MIN_HDR_MAX_IN_FLIGHT);
    }

    #[test]
    fn audio_buffer_duration_is_clamped() {
        let audio = AudioSettings { buffer_ms: 1 };
        assert_eq!(
            audio.buffer_duration(),
            Duration::from_millis(u64::from(MIN_AUDIO_BUFFER_MS))
        );
    }
}
