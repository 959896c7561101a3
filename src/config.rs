//! Configuration for the EEG stream pipeline.

use crate::core::aggregator::{
    AggregatorSettings, DEFAULT_DECIMATION_STRIDE, DEFAULT_DISPLAY_DECIMALS, DEFAULT_WINDOW_LEN,
};
use crate::core::cascade::CascadeDesign;
use crate::core::detrend::DetrendMode;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "eeg-stream-pipeline";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filter and presentation parameters
    pub pipeline: PipelineConfig,

    /// Delay between two polls of the frame source
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Root of the directory-backed frame source
    pub source_path: PathBuf,

    /// Path for state and stats
    pub data_path: PathBuf,

    /// Path of the JSON-lines archive
    pub archive_path: PathBuf,

    /// Path for CSV exports
    pub export_path: PathBuf,

    /// IANA timezone used for annotations
    pub timezone: String,

    /// Streams idle for this long are dropped from memory
    pub idle_eviction_secs: u64,

    /// Capacity of the live delivery channel
    pub live_channel_capacity: usize,

    /// Port of the HTTP server
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            pipeline: PipelineConfig::default(),
            poll_interval: Duration::from_millis(1000),
            source_path: data_dir.join("frames"),
            archive_path: data_dir.join("archive"),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            timezone: "UTC".to_string(),
            idle_eviction_secs: 600, // 10 minutes
            live_channel_capacity: 256,
            server_port: 8787,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file, falling back to defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Where pipeline counters are persisted.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [
            &self.data_path,
            &self.archive_path,
            &self.export_path,
            &self.source_path,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        Ok(())
    }

    /// Parse the configured timezone.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{}'", self.timezone)))
    }

    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    /// Check every value that would otherwise fail later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        self.timezone()?;
        if self.live_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "live_channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Filter cascade and presentation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampling_rate_hz: f64,
    pub notch_hz: f64,
    pub notch_q: f64,
    pub highpass_hz: f64,
    pub lowpass_hz: f64,
    pub block_size: usize,
    pub detrend_mode: DetrendMode,
    pub decimation_stride: usize,
    pub display_decimals: u32,
    pub window_len: usize,
    /// Magnitudes below this are emitted as zero. Disabled when absent
    pub zero_threshold: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let design = CascadeDesign::default();
        Self {
            sampling_rate_hz: design.sampling_rate_hz,
            notch_hz: design.notch_hz,
            notch_q: design.notch_q,
            highpass_hz: design.highpass_hz,
            lowpass_hz: design.lowpass_hz,
            block_size: design.block_size,
            detrend_mode: design.detrend_mode,
            decimation_stride: DEFAULT_DECIMATION_STRIDE,
            display_decimals: DEFAULT_DISPLAY_DECIMALS,
            window_len: DEFAULT_WINDOW_LEN,
            zero_threshold: None,
        }
    }
}

impl PipelineConfig {
    pub fn cascade(&self) -> CascadeDesign {
        CascadeDesign {
            sampling_rate_hz: self.sampling_rate_hz,
            notch_hz: self.notch_hz,
            notch_q: self.notch_q,
            highpass_hz: self.highpass_hz,
            lowpass_hz: self.lowpass_hz,
            block_size: self.block_size,
            detrend_mode: self.detrend_mode,
        }
    }

    pub fn settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            cascade: self.cascade(),
            decimation_stride: self.decimation_stride,
            display_decimals: self.display_decimals,
            window_len: self.window_len,
            zero_threshold: self.zero_threshold,
        }
    }

    /// Reject parameters that produce unstable or meaningless filters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sampling_rate_hz.is_finite() && self.sampling_rate_hz > 0.0) {
            return Err(ConfigError::Invalid(
                "sampling_rate_hz must be positive".to_string(),
            ));
        }

        let nyquist = self.sampling_rate_hz / 2.0;
        for (name, value) in [
            ("notch_hz", self.notch_hz),
            ("highpass_hz", self.highpass_hz),
            ("lowpass_hz", self.lowpass_hz),
        ] {
            if !(value > 0.0 && value < nyquist) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be in (0, {nyquist}) Hz, got {value}"
                )));
            }
        }

        if !(self.notch_q.is_finite() && self.notch_q > 0.0) {
            return Err(ConfigError::Invalid("notch_q must be positive".to_string()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be positive".to_string()));
        }
        if self.decimation_stride == 0 {
            return Err(ConfigError::Invalid(
                "decimation_stride must be positive".to_string(),
            ));
        }
        if let Some(threshold) = self.zero_threshold {
            if !(threshold.is_finite() && threshold >= 0.0) {
                return Err(ConfigError::Invalid(
                    "zero_threshold must be a non-negative number".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as integer milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.pipeline.sampling_rate_hz, 500.0);
        assert_eq!(config.pipeline.decimation_stride, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_matches_cascade_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.cascade(), CascadeDesign::default());
        assert_eq!(config.settings(), AggregatorSettings::default());
    }

    #[test]
    fn test_validate_rejects_bad_cutoffs() {
        let bad = [
            PipelineConfig {
                lowpass_hz: 250.0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                highpass_hz: 0.0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                notch_q: 0.0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                block_size: 0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                decimation_stride: 0,
                ..PipelineConfig::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn test_timezone_parsing() {
        let mut config = Config {
            timezone: "Europe/Madrid".to_string(),
            ..Config::default()
        };
        assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::Madrid);

        config.timezone = "Mars/Olympus".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let path = std::env::temp_dir().join(format!("eeg-config-{}.json", uuid::Uuid::new_v4()));
        let config = Config {
            poll_interval: Duration::from_millis(250),
            pipeline: PipelineConfig {
                detrend_mode: DetrendMode::Median,
                zero_threshold: Some(0.5),
                ..PipelineConfig::default()
            },
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.poll_interval, Duration::from_millis(250));
        assert_eq!(loaded.pipeline, config.pipeline);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"poll_interval": 40}"#).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(40));
        assert_eq!(config.pipeline, PipelineConfig::default());
    }
}
