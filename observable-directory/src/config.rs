//! Configuration types for observable directories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Configuration for an observable directory session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Marshal mutations onto the opening caller's runtime instead of
    /// applying them inline on the delivery thread.
    pub capture_caller_context: bool,

    /// How event paths are matched against tracked entries.
    pub path_comparison: PathComparison,

    /// What to do with an entry whose file was renamed out of the root.
    pub outbound_rename: OutboundRename,

    /// How long a rename source waits for its destination, in milliseconds.
    pub rename_window_ms: u64,

    /// Count metadata-only changes as modifications.
    pub track_metadata: bool,

    /// Whether the initial scan follows symbolic links.
    pub follow_symlinks: bool,
}

impl SessionConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            capture_caller_context: true,
            path_comparison: PathComparison::Exact,
            outbound_rename: OutboundRename::Remove,
            rename_window_ms: 2000,
            track_metadata: false,
            follow_symlinks: false,
        }
    }

    /// Apply mutations inline on the delivery thread.
    pub fn inline(mut self) -> Self {
        self.capture_caller_context = false;
        self
    }

    /// Set the path comparison policy.
    pub fn with_path_comparison(mut self, comparison: PathComparison) -> Self {
        self.path_comparison = comparison;
        self
    }

    /// Set the outbound rename policy.
    pub fn with_outbound_rename(mut self, policy: OutboundRename) -> Self {
        self.outbound_rename = policy;
        self
    }

    /// Set the rename pairing window.
    pub fn with_rename_window(mut self, window: Duration) -> Self {
        self.rename_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Count metadata-only changes as modifications.
    pub fn track_metadata(mut self) -> Self {
        self.track_metadata = true;
        self
    }

    /// Follow symbolic links during the initial scan.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// The rename pairing window as a [`Duration`].
    pub fn rename_window(&self) -> Duration {
        Duration::from_millis(self.rename_window_ms)
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.rename_window_ms == 0 {
            return Err(WatcherError::Config(
                "rename_window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How an event path is matched to a tracked entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathComparison {
    /// Byte-for-byte equality. No case folding or separator normalization.
    #[default]
    Exact,

    /// Equality after lowercasing the path.
    CaseInsensitive,
}

impl PathComparison {
    /// The lookup key for `path` under this policy.
    pub fn key(self, path: &Path) -> PathBuf {
        match self {
            Self::Exact => path.to_path_buf(),
            Self::CaseInsensitive => PathBuf::from(path.to_string_lossy().to_lowercase()),
        }
    }
}

/// What happens to an entry renamed to somewhere outside the watched root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundRename {
    /// Treat the move as a deletion.
    #[default]
    Remove,

    /// Leave the entry in place.
    Keep,
}
