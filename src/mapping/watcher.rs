//! Mapping file watcher for hot-reload support
//!
//! Polls the mapping file's modification time on a fixed interval instead of
//! subscribing to filesystem events: the kiosk's consumer wants a steady
//! "checked, unchanged" heartbeat as well as the change edges, and mtime
//! polling also catches the file appearing for the first time.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one watcher check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadSignal {
    /// The file's mtime differs from the last observed one (or the file just
    /// appeared). Emitted exactly once per detected change.
    Changed,
    /// Checked, nothing new.
    Unchanged,
}

/// Watcher that polls the mapping file and emits one signal per check
pub struct MappingWatcher {
    rx: mpsc::Receiver<ReloadSignal>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MappingWatcher {
    /// Spawn the polling task for the given file.
    pub fn start(path: PathBuf, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(4);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            info!("Mapping watcher started for: {}", path.display());
            let mut last_mtime: Option<SystemTime> = None;

            loop {
                let signal = match mtime_of(&path).await {
                    Ok(mtime) => {
                        if last_mtime != Some(mtime) {
                            debug!("Mapping file changed: {}", path.display());
                            last_mtime = Some(mtime);
                            ReloadSignal::Changed
                        } else {
                            ReloadSignal::Unchanged
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!("Mapping file not found: {}", path.display());
                        ReloadSignal::Unchanged
                    }
                    Err(e) => {
                        warn!("Failed to stat mapping file {}: {}", path.display(), e);
                        ReloadSignal::Unchanged
                    }
                };

                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    res = tx.send(signal) => {
                        if res.is_err() {
                            // Receiver dropped, nobody cares anymore
                            break;
                        }
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }

            debug!("Mapping watcher stopped");
        });

        Self {
            rx,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Wait for the next check result.
    /// Returns None once the watcher has been stopped.
    pub async fn next_signal(&mut self) -> Option<ReloadSignal> {
        self.rx.recv().await
    }

    /// Stop the polling task and wait for it to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MappingWatcher {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

async fn mtime_of(path: &Path) -> io::Result<SystemTime> {
    tokio::fs::metadata(path).await?.modified()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn first_sight_of_the_file_is_a_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cards.csv");
        fs::write(&path, "ABCD,song.mp3\n").unwrap();

        let mut watcher = MappingWatcher::start(path, Duration::from_millis(20));
        assert_eq!(watcher.next_signal().await, Some(ReloadSignal::Changed));
        assert_eq!(watcher.next_signal().await, Some(ReloadSignal::Unchanged));
        watcher.stop().await;
    }

    #[tokio::test]
    async fn missing_file_reports_unchanged_until_it_appears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cards.csv");

        let mut watcher = MappingWatcher::start(path.clone(), Duration::from_millis(20));
        assert_eq!(watcher.next_signal().await, Some(ReloadSignal::Unchanged));

        fs::write(&path, "ABCD,song.mp3\n").unwrap();
        // Skip however many Unchanged ticks race the write
        let mut saw_change = false;
        for _ in 0..20 {
            if watcher.next_signal().await == Some(ReloadSignal::Changed) {
                saw_change = true;
                break;
            }
        }
        assert!(saw_change);
        watcher.stop().await;
    }

    #[tokio::test]
    async fn rewrite_raises_exactly_one_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cards.csv");
        fs::write(&path, "ABCD,song.mp3\n").unwrap();

        let mut watcher = MappingWatcher::start(path.clone(), Duration::from_millis(20));
        assert_eq!(watcher.next_signal().await, Some(ReloadSignal::Changed));
        assert_eq!(watcher.next_signal().await, Some(ReloadSignal::Unchanged));

        fs::write(&path, "ABCD,other.mp3\n").unwrap();
        let mut changes = 0;
        for _ in 0..6 {
            if watcher.next_signal().await == Some(ReloadSignal::Changed) {
                changes += 1;
            }
        }
        assert_eq!(changes, 1);
        watcher.stop().await;
    }

    #[tokio::test]
    async fn stop_ends_the_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cards.csv");
        let mut watcher = MappingWatcher::start(path, Duration::from_millis(20));
        watcher.stop().await;
        // Drain whatever was in flight; the channel must close
        while watcher.next_signal().await.is_some() {}
    }
}
