//! Playback controller
//!
//! Owns the decoder subprocess and the idle / single-track / folder-sequence
//! state machine. Folder sequences advance on their own task so callers
//! return immediately; stopping is synchronous, idempotent, and always wins
//! against an in-flight sequence task.
//!
//! Two primitives make stop race-free: a stop flag, and a session counter
//! bumped by every `play`. A sequence task that never observed the stop flag
//! (the flag is cleared again by the next `play`) still exits because its
//! session is stale. Child spawn-and-store happens under the same lock
//! `stop_immediately` kills through, so a freshly spawned decoder can never
//! escape a stop.

use crate::config::DecoderConfig;
use crate::volume::VolumeBridge;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Granularity at which the stop flag and child liveness are polled
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Bounded wait for a killed decoder to be reaped
const KILL_WAIT: Duration = Duration::from_secs(1);

/// What the controller is doing right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    PlayingSingle(PathBuf),
    PlayingSequence { dir: PathBuf, index: usize },
}

impl PlaybackState {
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackState::Idle)
    }
}

/// Running decoder subprocess.
///
/// `kill_on_drop` backs up the explicit kill paths: whatever way the handle
/// leaves scope, the process does not outlive it.
struct DecoderChild {
    child: Child,
}

impl DecoderChild {
    fn spawn(settings: &DecoderConfig, file: &Path) -> Result<Self> {
        let child = Command::new(&settings.command)
            .args(&settings.args)
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to launch decoder '{}' for {}",
                    settings.command,
                    file.display()
                )
            })?;
        Ok(Self { child })
    }

    async fn kill_and_reap(mut self) {
        let _ = self.child.start_kill();
        if tokio::time::timeout(KILL_WAIT, self.child.wait())
            .await
            .is_err()
        {
            warn!("Decoder did not exit within {:?} of being killed", KILL_WAIT);
        }
    }
}

struct Shared {
    settings: DecoderConfig,
    volume: Arc<AsyncMutex<VolumeBridge>>,
    state: Mutex<PlaybackState>,
    /// Generation of the latest `play` call
    session: AtomicU64,
    stop_flag: AtomicBool,
    child: AsyncMutex<Option<DecoderChild>>,
}

impl Shared {
    fn cancelled(&self, session: u64) -> bool {
        self.stop_flag.load(Ordering::SeqCst) || self.session.load(Ordering::SeqCst) != session
    }

    /// Write `state` unless a newer `play` owns the controller by now.
    fn set_state_if_current(&self, session: u64, state: PlaybackState) {
        if self.session.load(Ordering::SeqCst) == session {
            *self.state.lock() = state;
        }
    }

    fn advance_index(&self, session: u64, index: usize) {
        if self.session.load(Ordering::SeqCst) == session {
            if let PlaybackState::PlayingSequence { index: i, .. } = &mut *self.state.lock() {
                *i = index;
            }
        }
    }
}

/// Drives the decoder subprocess from card events
pub struct PlaybackController {
    shared: Arc<Shared>,
}

impl PlaybackController {
    pub fn new(settings: DecoderConfig, volume: Arc<AsyncMutex<VolumeBridge>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                volume,
                state: Mutex::new(PlaybackState::Idle),
                session: AtomicU64::new(0),
                stop_flag: AtomicBool::new(false),
                child: AsyncMutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.lock().clone()
    }

    /// Projection the orchestrator uses to gate the volume tick.
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().is_active()
    }

    /// Start playback of a file or folder.
    ///
    /// Stops whatever is active first, so at most one decoder ever runs.
    /// Failures (vanished target, empty folder, launch error) are logged and
    /// leave the controller idle; none of them are fatal.
    pub async fn play(&self, path: &Path) {
        self.stop_immediately().await;

        let session = self.shared.session.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.stop_flag.store(false, Ordering::SeqCst);

        // Pick up a pending volume change so the track starts at the live
        // level, not the one cached at the previous tick
        self.shared.volume.lock().await.apply_if_changed().await;

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!("⚠️  Playback target unavailable: {}: {}", path.display(), e);
                return;
            }
        };

        if meta.is_dir() {
            self.play_folder(path, session).await;
        } else {
            self.play_file(path, session).await;
        }
    }

    async fn play_file(&self, file: &Path, session: u64) {
        {
            let mut slot = self.shared.child.lock().await;
            if self.shared.cancelled(session) {
                return;
            }
            match DecoderChild::spawn(&self.shared.settings, file) {
                Ok(child) => {
                    *slot = Some(child);
                    self.shared
                        .set_state_if_current(session, PlaybackState::PlayingSingle(file.to_path_buf()));
                    info!("▶️  Playing: {}", file.display());
                }
                Err(e) => {
                    warn!("⚠️  {:#}", e);
                    return;
                }
            }
        }

        // Return to idle when the track ends on its own
        let shared = self.shared.clone();
        tokio::spawn(async move {
            wait_for_exit(&shared, session).await;
            shared.set_state_if_current(session, PlaybackState::Idle);
        });
    }

    async fn play_folder(&self, dir: &Path, session: u64) {
        let files = match list_audio_files(dir, &self.shared.settings.extensions).await {
            Ok(files) => files,
            Err(e) => {
                warn!("⚠️  Failed to read folder {}: {}", dir.display(), e);
                return;
            }
        };
        if files.is_empty() {
            warn!("⚠️  No audio files in {}", dir.display());
            return;
        }

        info!("🎵 Playing {} files from {}", files.len(), dir.display());
        self.shared.set_state_if_current(
            session,
            PlaybackState::PlayingSequence {
                dir: dir.to_path_buf(),
                index: 0,
            },
        );

        let shared = self.shared.clone();
        tokio::spawn(run_sequence(shared, files, session));
    }

    /// Stop playback now.
    ///
    /// Sets the stop flag, forces the state to idle, kills the running
    /// decoder (bounded reap), and optionally sweeps stray decoder processes
    /// left over from a previous run. Safe to call at any time, from any
    /// state, repeatedly.
    pub async fn stop_immediately(&self) {
        self.shared.stop_flag.store(true, Ordering::SeqCst);
        *self.shared.state.lock() = PlaybackState::Idle;

        let taken = self.shared.child.lock().await.take();
        if let Some(child) = taken {
            child.kill_and_reap().await;
            info!("🛑 Audio stopped");
        }

        if self.shared.settings.kill_stray {
            if let Some(name) = decoder_process_name(&self.shared.settings.command) {
                let _ = Command::new("pkill")
                    .args(["-9", name])
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
            }
        }
    }
}

/// Launch the files of a folder one at a time, in order, until the list is
/// exhausted or the session is cancelled.
async fn run_sequence(shared: Arc<Shared>, files: Vec<PathBuf>, session: u64) {
    let total = files.len();
    for (index, file) in files.iter().enumerate() {
        if shared.cancelled(session) {
            return;
        }
        shared.advance_index(session, index);

        {
            let mut slot = shared.child.lock().await;
            if shared.cancelled(session) {
                return;
            }
            match DecoderChild::spawn(&shared.settings, file) {
                Ok(child) => {
                    *slot = Some(child);
                    info!("🎵 [{}/{}] {}", index + 1, total, file.display());
                }
                Err(e) => {
                    warn!("⚠️  {:#}", e);
                    shared.set_state_if_current(session, PlaybackState::Idle);
                    return;
                }
            }
        }

        wait_for_exit(&shared, session).await;
    }

    shared.set_state_if_current(session, PlaybackState::Idle);
    debug!("✅ Folder sequence complete");
}

/// Poll until the current decoder exits naturally or the session is
/// cancelled. A stop empties the child slot out from under us, which also
/// counts as "done".
async fn wait_for_exit(shared: &Shared, session: u64) {
    loop {
        if shared.cancelled(session) {
            return;
        }
        let exited = {
            let mut slot = shared.child.lock().await;
            match slot.as_mut() {
                Some(dc) => match dc.child.try_wait() {
                    Ok(Some(status)) => {
                        if !status.success() {
                            debug!("Decoder exited with {}", status);
                        }
                        *slot = None;
                        true
                    }
                    Ok(None) => false,
                    Err(e) => {
                        warn!("Failed to poll decoder: {}", e);
                        *slot = None;
                        true
                    }
                },
                None => true,
            }
        };
        if exited {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Immediate children of `dir` with a recognized extension, sorted
/// lexicographically.
async fn list_audio_files(dir: &Path, extensions: &[String]) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        let recognized = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|known| known.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if recognized {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn decoder_process_name(command: &str) -> Option<&str> {
    Path::new(command).file_name().and_then(|n| n.to_str())
}
