//! Tracked entries: one per file known to an observable directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file discovered in, or reported by, the watched directory.
///
/// Entries are owned by their [`EntryCollection`](crate::EntryCollection);
/// consumers only ever see clones handed out by the read-only view or by
/// change notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntry {
    /// Full path to the file. Changes in place on rename.
    path: PathBuf,

    /// Number of modification events seen since discovery.
    change_count: u64,

    /// When the entry was first tracked.
    discovered_at: DateTime<Utc>,

    /// When the last modification event was applied.
    last_modified_at: Option<DateTime<Utc>>,
}

impl TrackedEntry {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            change_count: 0,
            discovered_at: Utc::now(),
            last_modified_at: None,
        }
    }

    /// Full path to the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of modification events seen since discovery.
    pub fn change_count(&self) -> u64 {
        self.change_count
    }

    /// When the entry was first tracked.
    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    /// When the last modification event was applied, if any.
    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified_at
    }

    /// File name component of the path.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    pub(crate) fn set_path(&mut self, path: PathBuf) -> EntryField {
        self.path = path;
        EntryField::Path
    }

    /// The counter saturates instead of wrapping so it never goes backwards.
    pub(crate) fn record_change(&mut self) -> EntryField {
        self.change_count = self.change_count.saturating_add(1);
        self.last_modified_at = Some(Utc::now());
        EntryField::ChangeCount
    }
}

/// A field of [`TrackedEntry`] that can change after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryField {
    /// The entry was renamed.
    Path,

    /// The entry saw another modification.
    ChangeCount,
}
