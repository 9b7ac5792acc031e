//! Card-to-media mapping store
//!
//! Loads `ID,relative/path` lines from the mapping file and resolves them
//! against the media root. The whole table is replaced on every load so
//! concurrent lookups always see a complete snapshot.

pub mod watcher;

use crate::card::CardId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use watcher::{MappingWatcher, ReloadSignal};

/// Immutable view of the mapping table, shared with readers
pub type MappingSnapshot = Arc<HashMap<String, PathBuf>>;

/// Conditions a mapping load can end in
#[derive(Debug, Error)]
pub enum MappingError {
    /// The file is absent. The store is left empty; a later reload recovers
    /// once the file appears.
    #[error("mapping file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read mapping file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Mapping from card identifier to media path.
///
/// Keys are the raw trimmed left-hand side of each mapping line; lookups use
/// the exact identifier string, so entries must be written in the uppercase
/// hex form the reader reports.
pub struct MappingStore {
    media_root: PathBuf,
    mapping_file: PathBuf,
    entries: RwLock<MappingSnapshot>,
}

impl MappingStore {
    /// Create an empty store. Call [`load`](Self::load) to populate it.
    pub fn new(media_root: PathBuf, mapping_file: PathBuf) -> Self {
        Self {
            media_root,
            mapping_file,
            entries: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Reload the mapping file wholesale, returning the entry count.
    ///
    /// A missing file empties the store and returns
    /// [`MappingError::NotFound`] — callers log it as a warning and keep
    /// running. Lookups racing a load observe either the old or the new
    /// table, never a mix.
    pub async fn load(&self) -> Result<usize, MappingError> {
        let content = match tokio::fs::read_to_string(&self.mapping_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                *self.entries.write() = Arc::new(HashMap::new());
                return Err(MappingError::NotFound(self.mapping_file.clone()));
            }
            Err(e) => {
                return Err(MappingError::Io {
                    path: self.mapping_file.clone(),
                    source: e,
                })
            }
        };

        let table = parse_mapping(&content, &self.media_root);
        let count = table.len();
        *self.entries.write() = Arc::new(table);
        debug!("Mapping table replaced: {} entries", count);
        Ok(count)
    }

    /// Look up the media path for a card.
    pub fn lookup(&self, id: &CardId) -> Option<PathBuf> {
        self.entries.read().get(id.as_str()).cloned()
    }

    /// Current table snapshot (diagnostics).
    pub fn snapshot(&self) -> MappingSnapshot {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn mapping_file(&self) -> &Path {
        &self.mapping_file
    }
}

/// Parse mapping lines: trim, skip blanks and `#` comments, skip comma-less
/// lines, split on the FIRST comma, trim both sides. Later duplicates win.
fn parse_mapping(content: &str, media_root: &Path) -> HashMap<String, PathBuf> {
    let mut table = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((id, relpath)) = line.split_once(',') else {
            continue;
        };
        table.insert(id.trim().to_string(), media_root.join(relpath.trim()));
    }
    table
}
