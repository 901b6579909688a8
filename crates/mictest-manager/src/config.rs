//! Manager configuration stored as RON.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use mictest_audio::{ContextOptions, DriverKind};
use mictest_core::{SampleRate, sample_rates};

/// Tunables for the device manager
///
/// Every field has a default, so a config file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Sample rate of every audio context the manager creates
    pub sample_rate: SampleRate,

    /// Analyser FFT size (power of two, 32..=32768)
    pub fft_size: usize,

    /// Delay applied on the delayed input path, in seconds
    pub delay_seconds: f32,

    /// Asset path of the looping background track
    pub background_path: String,

    /// Volume of the background track (0.0-1.0)
    pub background_volume: f32,

    /// Asset path of the decoded-buffer fixture
    pub buffer_path: String,

    /// Level meter refresh rate
    pub meter_hz: u32,

    /// What renders each context
    pub driver: DriverKind,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sample_rate: sample_rates::SR_48000,
            fft_size: 32,
            delay_seconds: 1.0,
            background_path: "guitar.wav".to_string(),
            background_volume: 0.2,
            buffer_path: "beat.wav".to_string(),
            meter_hz: 60,
            driver: DriverKind::Device,
        }
    }
}

impl ManagerConfig {
    /// Options for a new audio context
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            sample_rate: self.sample_rate,
            driver: self.driver,
        }
    }

    /// Time between two level meter readings
    pub fn meter_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.meter_hz.max(1)))
    }

    /// Save to a RON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::SerializationFailed(e.to_string()))?;

        std::fs::write(path.as_ref(), ron_string).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Load from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let ron_string =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Self = ron::from_str(&ron_string)
            .map_err(|e| ConfigError::DeserializationFailed(e.to_string()))?;

        if config.meter_hz == 0 {
            return Err(ConfigError::InvalidValue(
                "meter_hz must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.background_volume) {
            return Err(ConfigError::InvalidValue(format!(
                "background_volume {} is outside 0.0-1.0",
                config.background_volume
            )));
        }

        Ok(config)
    }
}

/// Errors from loading or saving a [`ManagerConfig`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.fft_size, 32);
        assert_eq!(config.background_path, "guitar.wav");
        assert_eq!(config.buffer_path, "beat.wav");
        assert_eq!(config.meter_interval(), Duration::from_secs_f64(1.0 / 60.0));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("mictest.ron");

        let config = ManagerConfig {
            delay_seconds: 0.25,
            driver: DriverKind::Clock,
            ..ManagerConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = ManagerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("partial.ron");
        std::fs::write(&path, "(fft_size: 64, driver: Manual)").unwrap();

        let loaded = ManagerConfig::load(&path).unwrap();
        assert_eq!(loaded.fft_size, 64);
        assert_eq!(loaded.driver, DriverKind::Manual);
        assert_eq!(loaded.sample_rate, 48000);
        assert_eq!(loaded.background_volume, 0.2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.ron");
        std::fs::write(&path, "(meter_hz: 0)").unwrap();
        assert!(matches!(
            ManagerConfig::load(&path),
            Err(ConfigError::InvalidValue(_))
        ));

        std::fs::write(&path, "(sample_rate: \"fast\")").unwrap();
        assert!(matches!(
            ManagerConfig::load(&path),
            Err(ConfigError::DeserializationFailed(_))
        ));

        assert!(matches!(
            ManagerConfig::load(temp_dir.path().join("missing.ron")),
            Err(ConfigError::IoError(_))
        ));
    }
}
