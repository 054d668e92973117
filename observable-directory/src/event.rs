//! Filesystem events and their translation from raw `notify` events.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::{OutboundRename, SessionConfig};

/// A change reported for the watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FsEvent {
    /// A file appeared.
    Created { path: PathBuf },

    /// A file disappeared.
    Deleted { path: PathBuf },

    /// A file moved from `from` to `to`.
    Renamed { from: PathBuf, to: PathBuf },

    /// A file's contents changed.
    Modified { path: PathBuf },
}

impl FsEvent {
    /// Shorthand for [`FsEvent::Created`].
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::Created { path: path.into() }
    }

    /// Shorthand for [`FsEvent::Deleted`].
    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::Deleted { path: path.into() }
    }

    /// Shorthand for [`FsEvent::Renamed`].
    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::Renamed {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Shorthand for [`FsEvent::Modified`].
    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::Modified { path: path.into() }
    }
}

/// Pending rename sources kept before the oldest is treated as an outbound move.
const MAX_PENDING_SOURCES: usize = 512;

/// Added to expiry deadlines so a scheduled check lands past the window.
const EXPIRY_SLACK: Duration = Duration::from_millis(1);

/// Completed `From`/`To` pairs remembered so a trailing `Both` is not applied twice.
const MAX_RECENT_PAIRS: usize = 64;

#[derive(Debug)]
struct PendingSource {
    seen_at: Instant,
    path: PathBuf,
    tracker: Option<usize>,
}

/// Turns raw `notify` events into [`FsEvent`]s.
///
/// Backends report renames in different shapes: inotify sends `From`, `To`
/// and then a combined `Both`; Windows sends `From` and `To`; FSEvents only
/// says that a name changed. A `From` waits for its `To` for at most the
/// configured window. A source that never finds its destination was moved out
/// of the root and is resolved by the [`OutboundRename`] policy.
#[derive(Debug)]
pub struct EventTranslator {
    track_metadata: bool,
    outbound_rename: OutboundRename,
    rename_window: Duration,
    pending: VecDeque<PendingSource>,
    recent_pairs: VecDeque<(PathBuf, PathBuf)>,
}

impl EventTranslator {
    /// Create a translator from session settings.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            track_metadata: config.track_metadata,
            outbound_rename: config.outbound_rename,
            rename_window: config.rename_window(),
            pending: VecDeque::new(),
            recent_pairs: VecDeque::new(),
        }
    }

    /// Translate one raw event observed at `now`.
    pub fn translate(&mut self, event: notify::Event, now: Instant) -> Vec<FsEvent> {
        if event.paths.is_empty() {
            trace!(kind = ?event.kind, "Dropping event without paths");
            return self.expire(now);
        }

        let tracker = event.attrs.tracker();
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                let mut out = self.expire(now);
                for path in event.paths {
                    self.pending.push_back(PendingSource {
                        seen_at: now,
                        path,
                        tracker,
                    });
                }
                while self.pending.len() > MAX_PENDING_SOURCES {
                    if let Some(source) = self.pending.pop_front() {
                        out.extend(resolve_outbound(self.outbound_rename, source.path));
                    }
                }
                out
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let mut out = self.expire(now);
                for to in event.paths {
                    match self.take_source(tracker) {
                        Some(from) => {
                            self.remember_pair(from.clone(), to.clone());
                            out.push(FsEvent::Renamed { from, to });
                        }
                        None => out.push(FsEvent::Created { path: to }),
                    }
                }
                out
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut out = self.expire(now);
                let mut paths = event.paths.into_iter();
                let (Some(from), Some(to)) = (paths.next(), paths.next()) else {
                    trace!("Dropping rename without a destination");
                    return out;
                };
                if self.forget_pair(&from, &to) {
                    trace!(from = %from.display(), to = %to.display(), "Rename already applied");
                } else {
                    self.pending.retain(|source| source.path != from);
                    out.push(FsEvent::Renamed { from, to });
                }
                out
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                let mut out = self.resolve_all_pending();
                out.extend(event.paths.into_iter().map(|path| {
                    if path.exists() {
                        FsEvent::Created { path }
                    } else {
                        FsEvent::Deleted { path }
                    }
                }));
                out
            }
            EventKind::Create(_) => {
                let mut out = self.resolve_all_pending();
                out.extend(event.paths.into_iter().map(FsEvent::created));
                out
            }
            EventKind::Remove(_) => {
                let mut out = self.resolve_all_pending();
                out.extend(event.paths.into_iter().map(FsEvent::deleted));
                out
            }
            EventKind::Modify(ModifyKind::Metadata(_)) if !self.track_metadata => {
                trace!("Ignoring metadata-only change");
                self.expire(now)
            }
            EventKind::Modify(_) => {
                let mut out = self.resolve_all_pending();
                out.extend(event.paths.into_iter().map(FsEvent::modified));
                out
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {
                trace!(kind = ?event.kind, "Ignoring event");
                self.expire(now)
            }
        }
    }

    /// Resolve rename sources older than the pairing window.
    pub fn expire(&mut self, now: Instant) -> Vec<FsEvent> {
        let mut out = Vec::new();
        while let Some(source) = self.pending.front() {
            if now.saturating_duration_since(source.seen_at) <= self.rename_window {
                break;
            }
            if let Some(source) = self.pending.pop_front() {
                out.extend(resolve_outbound(self.outbound_rename, source.path));
            }
        }
        out
    }

    /// Number of rename sources still waiting for a destination.
    pub fn pending_sources(&self) -> usize {
        self.pending.len()
    }

    fn resolve_all_pending(&mut self) -> Vec<FsEvent> {
        let policy = self.outbound_rename;
        self.pending
            .drain(..)
            .filter_map(|source| resolve_outbound(policy, source.path))
            .collect()
    }

    /// How long until the oldest rename source is due to expire, if any is
    /// waiting.
    pub fn next_expiry(&self, now: Instant) -> Option<Duration> {
        self.pending.front().map(|source| {
            let waited = now.saturating_duration_since(source.seen_at);
            self.rename_window.saturating_sub(waited) + EXPIRY_SLACK
        })
    }

    /// The source carrying the same rename cookie. Destinations without a
    /// cookie pair with the oldest source.
    fn take_source(&mut self, tracker: Option<usize>) -> Option<PathBuf> {
        let position = match tracker {
            Some(cookie) => self
                .pending
                .iter()
                .position(|source| source.tracker == Some(cookie))?,
            None => 0,
        };
        self.pending.remove(position).map(|source| source.path)
    }

    fn remember_pair(&mut self, from: PathBuf, to: PathBuf) {
        if self.recent_pairs.len() == MAX_RECENT_PAIRS {
            self.recent_pairs.pop_front();
        }
        self.recent_pairs.push_back((from, to));
    }

    fn forget_pair(&mut self, from: &Path, to: &Path) -> bool {
        match self
            .recent_pairs
            .iter()
            .position(|(f, t)| f == from && t == to)
        {
            Some(position) => {
                self.recent_pairs.remove(position);
                true
            }
            None => false,
        }
    }
}

fn resolve_outbound(policy: OutboundRename, path: PathBuf) -> Option<FsEvent> {
    match policy {
        OutboundRename::Remove => Some(FsEvent::Deleted { path }),
        OutboundRename::Keep => {
            trace!(path = %path.display(), "Keeping entry moved out of the root");
            None
        }
    }
}
