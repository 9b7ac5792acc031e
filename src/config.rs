//! Configuration management for the NFC jukebox
//!
//! Handles loading and parsing of the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Directory all mapping entries are resolved against
    pub media_root: PathBuf,
    /// Card-id → media-path mapping file
    pub mapping_file: PathBuf,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub mixer: MixerConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default)]
    pub reload: ReloadConfig,
}

/// Card sensor polling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorConfig {
    /// Status file the reader daemon keeps updated with the present UID
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    /// Per-read timeout handed to the transport
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Consecutive empty reads before a card counts as removed
    #[serde(default = "default_departure_threshold")]
    pub departure_threshold: u32,
    /// Poll cadence while no card is present
    #[serde(default = "default_poll_absent_ms")]
    pub poll_interval_absent_ms: u64,
    /// Poll cadence while a card is present (longer, to keep the bus quiet
    /// during playback)
    #[serde(default = "default_poll_present_ms")]
    pub poll_interval_present_ms: u64,
    /// Extra sleep after a transport read error
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

/// Audio decoder subprocess configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecoderConfig {
    /// Decoder executable, invoked once per file
    #[serde(default = "default_decoder_command")]
    pub command: String,
    /// Arguments placed before the file path
    #[serde(default = "default_decoder_args")]
    pub args: Vec<String>,
    /// Recognized audio file extensions for folder playback
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Sweep leftover decoder processes with pkill on every stop
    #[serde(default = "default_true")]
    pub kill_stray: bool,
}

/// ALSA mixer control identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MixerConfig {
    #[serde(default = "default_mixer_card")]
    pub card: String,
    #[serde(default = "default_mixer_control")]
    pub control: String,
}

/// Volume file and tick configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VolumeConfig {
    /// Scalar file the rotary-encoder bridge writes the level into
    #[serde(default = "default_volume_file")]
    pub file: PathBuf,
    /// Level used until the file says otherwise, percent
    #[serde(default = "default_volume_level")]
    pub default_level: u8,
    /// Cadence of the apply-if-changed tick while audio is active
    #[serde(default = "default_volume_tick_secs")]
    pub tick_secs: u64,
}

/// Mapping-file change detection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReloadConfig {
    /// How often the mapping file's mtime is checked
    #[serde(default = "default_reload_interval_secs")]
    pub interval_secs: u64,
}

fn default_status_file() -> PathBuf {
    PathBuf::from("/run/nfc-jukebox/card")
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_departure_threshold() -> u32 {
    3
}

fn default_poll_absent_ms() -> u64 {
    100
}

fn default_poll_present_ms() -> u64 {
    300
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_decoder_command() -> String {
    "mpg123".to_string()
}

fn default_decoder_args() -> Vec<String> {
    vec!["-q".to_string(), "-a".to_string(), "default".to_string()]
}

fn default_extensions() -> Vec<String> {
    vec!["mp3".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_mixer_card() -> String {
    "0".to_string()
}

fn default_mixer_control() -> String {
    "SoftMaster".to_string()
}

fn default_volume_file() -> PathBuf {
    PathBuf::from("/tmp/jukebox_volume")
}

fn default_volume_level() -> u8 {
    50
}

fn default_volume_tick_secs() -> u64 {
    1
}

fn default_reload_interval_secs() -> u64 {
    10
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            status_file: default_status_file(),
            read_timeout_ms: default_read_timeout_ms(),
            departure_threshold: default_departure_threshold(),
            poll_interval_absent_ms: default_poll_absent_ms(),
            poll_interval_present_ms: default_poll_present_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            command: default_decoder_command(),
            args: default_decoder_args(),
            extensions: default_extensions(),
            kill_stray: default_true(),
        }
    }
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            card: default_mixer_card(),
            control: default_mixer_control(),
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            file: default_volume_file(),
            default_level: default_volume_level(),
            tick_secs: default_volume_tick_secs(),
        }
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reload_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }
}

impl SensorConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval_absent(&self) -> Duration {
        Duration::from_millis(self.poll_interval_absent_ms)
    }

    pub fn poll_interval_present(&self) -> Duration {
        Duration::from_millis(self.poll_interval_present_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl VolumeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

impl ReloadConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
