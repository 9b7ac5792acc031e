//! Volume bridge
//!
//! The rotary-encoder bridge process writes a plain integer into the volume
//! file; this side reads it, clamps it, and pushes changes to the ALSA mixer.
//! The in-process cache decides what counts as a change — the file is only
//! the cross-process wire.

use crate::config::{MixerConfig, VolumeConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const MIN_LEVEL: u8 = 0;
pub const MAX_LEVEL: u8 = 100;

/// System mixer seam.
///
/// The probe can fail — a kiosk without the softvol control still plays
/// audio, just without live volume.
#[async_trait]
pub trait MixerControl: Send + Sync {
    /// Check that the control exists.
    async fn probe(&self) -> Result<()>;

    /// Set the control to a level in percent.
    async fn set_level(&self, percent: u8) -> Result<()>;
}

/// ALSA mixer driven through the `amixer` CLI
pub struct AlsaMixer {
    card: String,
    control: String,
}

impl AlsaMixer {
    pub fn new(settings: &MixerConfig) -> Self {
        Self {
            card: settings.card.clone(),
            control: settings.control.clone(),
        }
    }
}

#[async_trait]
impl MixerControl for AlsaMixer {
    async fn probe(&self) -> Result<()> {
        let status = Command::new("amixer")
            .args(["-c", &self.card, "sget", &self.control])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("Failed to run amixer")?;

        if status.success() {
            Ok(())
        } else {
            anyhow::bail!(
                "mixer control '{}' not found on card {}",
                self.control,
                self.card
            )
        }
    }

    async fn set_level(&self, percent: u8) -> Result<()> {
        let status = Command::new("amixer")
            .args([
                "-c",
                &self.card,
                "sset",
                &self.control,
                &format!("{}%", percent),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("Failed to run amixer")?;

        if status.success() {
            Ok(())
        } else {
            anyhow::bail!("amixer sset exited with {}", status)
        }
    }
}

/// Cached volume level plus the file/mixer bookkeeping around it
pub struct VolumeBridge {
    volume_file: PathBuf,
    level: u8,
    mixer: Arc<dyn MixerControl>,
    mixer_available: bool,
}

impl VolumeBridge {
    /// Probe the mixer, push the default level, and seed the volume file so
    /// the encoder bridge always has something to edit.
    pub async fn init(mixer: Arc<dyn MixerControl>, settings: &VolumeConfig) -> Self {
        let level = settings.default_level.min(MAX_LEVEL);

        let mixer_available = match mixer.probe().await {
            Ok(()) => {
                if let Err(e) = mixer.set_level(level).await {
                    warn!("Failed to set initial volume: {:#}", e);
                }
                info!("🔊 Software volume ready at {}%", level);
                true
            }
            Err(e) => {
                warn!("Mixer unavailable, volume changes will not be applied: {:#}", e);
                false
            }
        };

        let bridge = Self {
            volume_file: settings.file.clone(),
            level,
            mixer,
            mixer_available,
        };
        bridge.write_volume_file().await;
        bridge
    }

    /// Read the volume file and apply the level if it differs from the
    /// cache. Returns whether a change was applied.
    ///
    /// A missing file is recreated with the cached level; unparseable
    /// content leaves the cache untouched. Values outside [0,100] are
    /// clamped before the comparison, so an out-of-range file settles once
    /// instead of reapplying every tick.
    pub async fn apply_if_changed(&mut self) -> bool {
        let content = match tokio::fs::read_to_string(&self.volume_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.write_volume_file().await;
                return false;
            }
            Err(e) => {
                warn!(
                    "Failed to read volume file {}: {}",
                    self.volume_file.display(),
                    e
                );
                return false;
            }
        };

        let requested: i64 = match content.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                debug!(
                    "Ignoring unparseable volume file content: {:?}",
                    content.trim()
                );
                return false;
            }
        };

        let clamped = requested.clamp(MIN_LEVEL as i64, MAX_LEVEL as i64) as u8;
        if clamped == self.level {
            return false;
        }

        let old = self.level;
        self.level = clamped;
        if self.mixer_available {
            if let Err(e) = self.mixer.set_level(clamped).await {
                warn!("Failed to apply volume {}%: {:#}", clamped, e);
            }
        }
        info!("🔊 Volume: {}% → {}%", old, clamped);
        true
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn mixer_available(&self) -> bool {
        self.mixer_available
    }

    async fn write_volume_file(&self) {
        if let Err(e) = tokio::fs::write(&self.volume_file, self.level.to_string()).await {
            warn!(
                "Failed to write volume file {}: {}",
                self.volume_file.display(),
                e
            );
        }
    }
}
