//! Configuration management for tethersync
//!
//! Every operational parameter of the session controller and the alignment
//! engine lives here: trigger and flush timeouts, heartbeat cadence, retry
//! bounds, the alignment search window and the usable-confidence threshold.
//! Values load from TOML, optionally layered with `TETHERSYNC_*` environment
//! overrides.

use crate::errors::SyncError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TetherSyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub alignment: AlignmentSettings,
    #[serde(default)]
    pub decode: DecodeConfig,
}

/// Device command timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// How long the camera has to confirm it started recording
    pub trigger_timeout_ms: u64,
    /// Pause after a hardware reset before re-acquiring the device
    pub reset_grace_ms: u64,
    /// How long to wait for the take to appear on the card after stopping
    pub file_appear_timeout_ms: u64,
    /// Poll interval while waiting on the device
    pub poll_interval_ms: u64,
    /// Upper bound on joining the supervisor thread during close
    pub close_timeout_ms: u64,
}

/// Liveness supervision while recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// Consecutive missed heartbeats before the session is considered locked
    pub miss_threshold: u32,
}

/// Backoff for transient transport errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// File transfer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Total transfer attempts before giving up on a take
    pub max_attempts: u32,
    /// Where downloaded takes land
    pub output_directory: String,
}

/// Alignment engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentSettings {
    /// Only this much audio from the start of each track is searched for the clap
    pub search_window_seconds: f64,
    /// Confidence at or above which a sync is labelled usable (0.0-1.0)
    pub usable_confidence: f64,
    /// Shortest buffer the engine will analyse
    pub analysis_frame_seconds: f64,
    /// Parabolic interpolation around the correlation peak
    pub refine_peak: bool,
    /// Envelope smoothing for transient detection
    pub transient_smoothing_seconds: f64,
}

/// External decoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub ffmpeg_binary: String,
    /// Rate ffmpeg resamples to while extracting audio
    pub analysis_sample_rate: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            trigger_timeout_ms: 5000,
            reset_grace_ms: 1500,
            file_appear_timeout_ms: 15000,
            poll_interval_ms: 100,
            close_timeout_ms: 2000,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            miss_threshold: 3,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            output_directory: "./takes".to_string(),
        }
    }
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            search_window_seconds: 60.0,
            usable_confidence: 0.5,
            analysis_frame_seconds: 0.05,
            refine_peak: false,
            transient_smoothing_seconds: 0.005,
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            analysis_sample_rate: 16000,
        }
    }
}

impl TetherSyncConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Failed to read config file: {}", e)))?;

        let config: TetherSyncConfig = toml::from_str(&contents)
            .map_err(|e| SyncError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Layer defaults, an optional TOML file and `TETHERSYNC_<SECTION>__<KEY>`
    /// environment variables, in that order of precedence.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| SyncError::Config(format!("Failed to seed defaults: {}", e)))?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("TETHERSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to layer configuration: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| SyncError::Config(format!("Invalid layered configuration: {}", e)))
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SyncError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| SyncError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("tethersync.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.device.trigger_timeout_ms == 0 {
            return Err("Trigger timeout must be non-zero".to_string());
        }
        if self.device.poll_interval_ms == 0 {
            return Err("Poll interval must be non-zero".to_string());
        }

        if self.heartbeat.interval_ms == 0 {
            return Err("Heartbeat interval must be non-zero".to_string());
        }
        if self.heartbeat.miss_threshold == 0 {
            return Err("Heartbeat miss threshold must be at least 1".to_string());
        }

        if self.retry.max_attempts == 0 || self.retry.max_attempts > 10 {
            return Err("Retry attempts must be between 1 and 10".to_string());
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err("Initial backoff cannot exceed the backoff cap".to_string());
        }

        if self.download.max_attempts == 0 || self.download.max_attempts > 10 {
            return Err("Download attempts must be between 1 and 10".to_string());
        }

        let alignment = &self.alignment;
        if !(alignment.search_window_seconds.is_finite() && alignment.search_window_seconds > 0.0)
        {
            return Err("Search window must be a positive number of seconds".to_string());
        }
        if !(0.0..=1.0).contains(&alignment.usable_confidence) {
            return Err("Usable confidence must be between 0.0 and 1.0".to_string());
        }
        if !(alignment.analysis_frame_seconds > 0.0
            && alignment.analysis_frame_seconds < alignment.search_window_seconds)
        {
            return Err("Analysis frame must be positive and shorter than the window".to_string());
        }
        if alignment.transient_smoothing_seconds <= 0.0 {
            return Err("Transient smoothing must be positive".to_string());
        }

        if self.decode.analysis_sample_rate < 1000 {
            return Err("Analysis sample rate must be at least 1000 Hz".to_string());
        }

        Ok(())
    }
}
