//! Initial listing of the watched directory.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, WatcherError};

/// List the files directly inside `root`, in enumeration order.
///
/// Subdirectories are skipped. Unreadable entries are logged and skipped;
/// failing to read `root` itself is an error.
pub fn scan_directory(root: &Path, follow_symlinks: bool) -> Result<Vec<PathBuf>> {
    let start = Instant::now();
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(follow_symlinks);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(e
                    .into_io_error()
                    .map(WatcherError::Io)
                    .unwrap_or_else(|| WatcherError::PathNotFound(root.display().to_string())));
            }
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {e}", root.display());
                continue;
            }
        };

        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    debug!(
        "Scanned {} files in {} in {:?}",
        files.len(),
        root.display(),
        start.elapsed()
    );
    Ok(files)
}
