//! Sensor transport seam
//!
//! The detector only cares about "what identifier, if any, did this poll
//! see". How that answer is produced — SPI bus, USB reader, or the reader
//! daemon's status file — lives behind [`SensorTransport`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// One-poll view of the card reader.
///
/// Implementations use interior mutability if they keep state; the detector
/// holds the transport behind an `Arc`.
#[async_trait]
pub trait SensorTransport: Send + Sync {
    /// Poll the reader once.
    ///
    /// `Ok(None)` means "no card this poll" — it is not an error. `Err` is a
    /// transport failure (bus hiccup, unreadable device) the caller absorbs.
    async fn read_presence(&self, timeout: Duration) -> Result<Option<String>>;
}

/// Transport backed by the reader daemon's status file.
///
/// The daemon keeps the file holding the UID of the card currently on the
/// pad, and truncates it when the pad is empty. Same cross-process contract
/// as the volume file: the filesystem is the wire.
pub struct PresenceFileTransport {
    path: PathBuf,
}

impl PresenceFileTransport {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SensorTransport for PresenceFileTransport {
    async fn read_presence(&self, timeout: Duration) -> Result<Option<String>> {
        let read = tokio::time::timeout(timeout, tokio::fs::read_to_string(&self.path)).await;
        match read {
            // A stalled read counts as "nothing seen this poll"
            Err(_elapsed) => Ok(None),
            Ok(Ok(content)) => {
                let id = content.trim();
                if id.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(id.to_string()))
                }
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Ok(Err(e)) => Err(e).with_context(|| {
                format!("Failed to read sensor status file: {}", self.path.display())
            }),
        }
    }
}
