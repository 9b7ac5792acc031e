//! Event orchestration
//!
//! Wires presence events to mapping lookups and playback commands, applies
//! mapping reload signals, and runs the volume tick while audio is active.
//! Every entry point is invoked from the main select! loop, one event at a
//! time, which is what keeps rapid card swaps from racing two decoders.

use crate::card::CardId;
use crate::mapping::{MappingError, MappingStore};
use crate::playback::PlaybackController;
use crate::presence::PresenceEvent;
use crate::volume::VolumeBridge;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

pub struct Jukebox {
    mapping: Arc<MappingStore>,
    playback: PlaybackController,
    volume: Arc<AsyncMutex<VolumeBridge>>,
}

impl Jukebox {
    pub fn new(
        mapping: Arc<MappingStore>,
        playback: PlaybackController,
        volume: Arc<AsyncMutex<VolumeBridge>>,
    ) -> Self {
        Self {
            mapping,
            playback,
            volume,
        }
    }

    pub async fn handle_event(&self, event: PresenceEvent) {
        match event {
            PresenceEvent::CardArrived(id) => self.on_card_arrived(&id).await,
            PresenceEvent::CardDeparted => self.on_card_departed().await,
        }
    }

    /// A card landed on the pad (or swapped in place).
    ///
    /// An unknown card, or a mapped path that no longer exists, changes
    /// nothing: whatever is playing keeps playing. The detector has already
    /// filtered re-reads of the same still-present card, so an arrival here
    /// is a deliberate act.
    pub async fn on_card_arrived(&self, id: &CardId) {
        let Some(path) = self.mapping.lookup(id) else {
            info!("❓ Card {} not in mapping file", id);
            return;
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!("⚠️  Mapped media for card {} is missing: {}", id, path.display());
            return;
        }

        info!("🎯 Card {} → {}", id, path.display());
        self.playback.play(&path).await;
    }

    pub async fn on_card_departed(&self) {
        info!("🛑 Card removed, stopping playback");
        self.playback.stop_immediately().await;
    }

    /// The mapping watcher saw the file change.
    pub async fn on_reload(&self) {
        match self.mapping.load().await {
            Ok(count) => info!("📝 Mapping reloaded: {} entries", count),
            Err(MappingError::NotFound(path)) => {
                warn!("Mapping file disappeared ({}), keeping empty table until it returns", path.display())
            }
            Err(e) => warn!("Failed to reload mapping: {:#}", e),
        }
    }

    /// Low-frequency tick: pick up external volume changes during playback.
    pub async fn on_volume_tick(&self) {
        if self.playback.is_active() {
            self.volume.lock().await.apply_if_changed().await;
        }
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }
}
