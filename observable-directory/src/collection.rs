//! The ordered, observable set of tracked entries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::PathComparison;
use crate::entry::{EntryField, TrackedEntry};
use crate::error::Result;
use crate::event::FsEvent;
use crate::reconciler::{self, Mutation};

/// Entries in discovery order, keyed by path.
///
/// Order is the initial scan order followed by event arrival order. A rename
/// keeps the entry where it was.
#[derive(Debug)]
pub struct EntryCollection {
    comparison: PathComparison,
    entries: IndexMap<PathBuf, TrackedEntry>,
}

impl EntryCollection {
    /// Create an empty collection using `comparison` to match paths.
    pub fn new(comparison: PathComparison) -> Self {
        Self {
            comparison,
            entries: IndexMap::new(),
        }
    }

    /// The path comparison policy in use.
    pub fn comparison(&self) -> PathComparison {
        self.comparison
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry is tracked at `path`.
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(&self.comparison.key(path))
    }

    /// The entry tracked at `path`.
    pub fn get(&self, path: &Path) -> Option<&TrackedEntry> {
        self.entries.get(&self.comparison.key(path))
    }

    /// Position of the entry tracked at `path`.
    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.entries.get_index_of(&self.comparison.key(path))
    }

    /// Entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.entries.values()
    }

    /// Apply a mutation and describe what changed.
    pub(crate) fn apply(&mut self, mutation: Mutation) -> Vec<EntryChange> {
        match mutation {
            Mutation::Insert(path) => {
                let key = self.comparison.key(&path);
                if self.entries.contains_key(&key) {
                    return Vec::new();
                }
                let entry = TrackedEntry::new(path);
                let (index, _) = self.entries.insert_full(key, entry.clone());
                vec![EntryChange::Added { index, entry }]
            }
            Mutation::Remove(path) => self
                .entries
                .shift_remove_full(&self.comparison.key(&path))
                .map(|(index, _, entry)| EntryChange::Removed { index, entry })
                .into_iter()
                .collect(),
            Mutation::Rename {
                from,
                to,
                overwrite,
            } => {
                let from_key = self.comparison.key(&from);
                let to_key = self.comparison.key(&to);
                let mut changes = Vec::new();

                if overwrite && from_key != to_key {
                    if let Some((index, _, entry)) = self.entries.shift_remove_full(&to_key) {
                        changes.push(EntryChange::Removed { index, entry });
                    }
                }

                let Some((index, _, mut entry)) = self.entries.shift_remove_full(&from_key)
                else {
                    return changes;
                };
                let field = entry.set_path(to);
                self.entries.shift_insert(index, to_key, entry.clone());
                changes.push(EntryChange::Updated {
                    index,
                    field,
                    entry,
                });
                changes
            }
            Mutation::Touch(path) => {
                let key = self.comparison.key(&path);
                self.entries
                    .get_full_mut(&key)
                    .map(|(index, _, entry)| EntryChange::Updated {
                        index,
                        field: entry.record_change(),
                        entry: entry.clone(),
                    })
                    .into_iter()
                    .collect()
            }
            Mutation::None => Vec::new(),
        }
    }
}

/// A change to the collection, delivered to subscribers.
///
/// `index` is the entry's position at the time of the change: for `Removed`
/// the position it was removed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum EntryChange {
    /// A new entry was tracked.
    Added { index: usize, entry: TrackedEntry },

    /// An entry stopped being tracked.
    Removed { index: usize, entry: TrackedEntry },

    /// A field of a tracked entry changed.
    Updated {
        index: usize,
        field: EntryField,
        entry: TrackedEntry,
    },
}

impl EntryChange {
    /// Position of the affected entry.
    pub fn index(&self) -> usize {
        match self {
            Self::Added { index, .. } | Self::Removed { index, .. } | Self::Updated { index, .. } => {
                *index
            }
        }
    }

    /// The affected entry, as it is after the change.
    pub fn entry(&self) -> &TrackedEntry {
        match self {
            Self::Added { entry, .. } | Self::Removed { entry, .. } | Self::Updated { entry, .. } => {
                entry
            }
        }
    }
}

/// Handle returned by [`Entries::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&EntryChange) + Send + Sync>;

struct Shared {
    collection: RwLock<EntryCollection>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

/// Read-only live view of a session's entries.
///
/// Cloning the view is cheap and every clone observes the same collection.
/// Subscribers run synchronously on whichever execution context applied the
/// mutation, one change at a time and in order. They are called after the
/// collection lock is released, so a callback may read the view.
#[derive(Clone)]
pub struct Entries {
    shared: Arc<Shared>,
}

impl Entries {
    pub(crate) fn new(comparison: PathComparison) -> Self {
        Self {
            shared: Arc::new(Shared {
                collection: RwLock::new(EntryCollection::new(comparison)),
                subscribers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
            }),
        }
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether an entry is tracked at `path`.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.read().contains(path.as_ref())
    }

    /// A copy of the entry tracked at `path`.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<TrackedEntry> {
        self.read().get(path.as_ref()).cloned()
    }

    /// A copy of every entry, in order.
    pub fn snapshot(&self) -> Vec<TrackedEntry> {
        self.read().iter().cloned().collect()
    }

    /// Tracked paths, in order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.read().iter().map(|e| e.path().to_path_buf()).collect()
    }

    /// Run `f` against the collection under a read lock.
    pub fn with<R>(&self, f: impl FnOnce(&EntryCollection) -> R) -> R {
        f(&self.read())
    }

    /// Register a callback for every added, removed or updated entry.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&EntryChange) + Send + Sync + 'static,
    {
        let id = SubscriptionId(
            self.shared
                .next_subscription
                .fetch_add(1, Ordering::Relaxed),
        );
        self.subscribers().push((id, Arc::new(callback)));
        trace!(?id, "Added entry subscriber");
        id
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// Fill the empty collection from `scan` while holding the write lock, so
    /// no event can be applied until the initial listing is in place.
    pub(crate) fn populate<F>(&self, scan: F) -> Result<usize>
    where
        F: FnOnce() -> Result<Vec<PathBuf>>,
    {
        let mut collection = self.write();
        for path in scan()? {
            collection.apply(Mutation::Insert(path));
        }
        Ok(collection.len())
    }

    /// Reconcile one event, apply the result and notify subscribers.
    pub(crate) fn reconcile(&self, event: &FsEvent) -> Vec<EntryChange> {
        let changes = {
            let mut collection = self.write();
            let mutation = reconciler::reconcile(event, &collection);
            if mutation == Mutation::None {
                trace!(?event, "Event requires no change");
                return Vec::new();
            }
            debug!(?mutation, "Applying mutation");
            collection.apply(mutation)
        };
        self.notify(&changes);
        changes
    }

    fn notify(&self, changes: &[EntryChange]) {
        if changes.is_empty() {
            return;
        }
        let subscribers: Vec<Subscriber> = self
            .subscribers()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for change in changes {
            for callback in &subscribers {
                callback(change);
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, EntryCollection> {
        self.shared
            .collection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntryCollection> {
        self.shared
            .collection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Subscriber)>> {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Entries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entries")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn labels(changes: &[EntryChange]) -> Vec<String> {
        changes
            .iter()
            .map(|change| match change {
                EntryChange::Added { index, entry } => {
                    format!("added {} @{index}", entry.path().display())
                }
                EntryChange::Removed { index, entry } => {
                    format!("removed {} @{index}", entry.path().display())
                }
                EntryChange::Updated {
                    index,
                    field,
                    entry,
                } => format!("{field:?} {} @{index}", entry.path().display()),
            })
            .collect()
    }

    #[test]
    fn test_insertion_order_is_discovery_order() {
        let mut collection = EntryCollection::new(PathComparison::Exact);
        for name in ["/d/zeta", "/d/alpha", "/d/mid"] {
            collection.apply(Mutation::Insert(PathBuf::from(name)));
        }

        let paths: Vec<_> = collection.iter().map(|e| e.path().to_path_buf()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/d/zeta"),
                PathBuf::from("/d/alpha"),
                PathBuf::from("/d/mid"),
            ]
        );
    }

    #[test]
    fn test_rename_keeps_position() {
        let mut collection = EntryCollection::new(PathComparison::Exact);
        for name in ["/d/a", "/d/b", "/d/c"] {
            collection.apply(Mutation::Insert(PathBuf::from(name)));
        }

        let changes = collection.apply(Mutation::Rename {
            from: PathBuf::from("/d/b"),
            to: PathBuf::from("/d/renamed"),
            overwrite: false,
        });

        assert_eq!(labels(&changes), vec!["Path /d/renamed @1"]);
        assert_eq!(collection.index_of(Path::new("/d/renamed")), Some(1));
        assert!(!collection.contains(Path::new("/d/b")));
    }

    #[test]
    fn test_displacing_rename_reports_removal_first() {
        let mut collection = EntryCollection::new(PathComparison::Exact);
        for name in ["/d/a", "/d/b", "/d/c"] {
            collection.apply(Mutation::Insert(PathBuf::from(name)));
        }

        let changes = collection.apply(Mutation::Rename {
            from: PathBuf::from("/d/c"),
            to: PathBuf::from("/d/a"),
            overwrite: true,
        });

        assert_eq!(labels(&changes), vec!["removed /d/a @0", "Path /d/a @1"]);
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_touch_and_remove_report_changes() {
        let mut collection = EntryCollection::new(PathComparison::Exact);
        let added = collection.apply(Mutation::Insert(PathBuf::from("/d/a")));
        let touched = collection.apply(Mutation::Touch(PathBuf::from("/d/a")));
        let removed = collection.apply(Mutation::Remove(PathBuf::from("/d/a")));
        let missing = collection.apply(Mutation::Remove(PathBuf::from("/d/a")));

        assert_eq!(labels(&added), vec!["added /d/a @0"]);
        assert_eq!(labels(&touched), vec!["ChangeCount /d/a @0"]);
        assert_eq!(touched[0].entry().change_count(), 1);
        assert_eq!(labels(&removed), vec!["removed /d/a @0"]);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_subscribers_see_changes_and_can_read_view() {
        let entries = Entries::new(PathComparison::Exact);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let view = entries.clone();
        let sink = Arc::clone(&seen);
        let id = entries.subscribe(move |change| {
            sink.lock().unwrap().push((change.clone(), view.len()));
        });

        entries.reconcile(&FsEvent::created("/d/a"));
        entries.reconcile(&FsEvent::modified("/d/a"));
        entries.reconcile(&FsEvent::modified("/d/unknown"));
        assert!(entries.unsubscribe(id));
        entries.reconcile(&FsEvent::deleted("/d/a"));

        let seen = seen.lock().unwrap();
        let changes: Vec<_> = seen.iter().map(|(change, _)| change.clone()).collect();
        assert_eq!(labels(&changes), vec!["added /d/a @0", "ChangeCount /d/a @0"]);
        assert!(seen.iter().all(|(_, len)| *len == 1));
        assert!(entries.is_empty());
        assert!(!entries.unsubscribe(id));
    }

    #[test]
    fn test_populate_skips_duplicates() {
        let entries = Entries::new(PathComparison::CaseInsensitive);
        let count = entries
            .populate(|| {
                Ok(vec![
                    PathBuf::from("/d/One.txt"),
                    PathBuf::from("/d/one.txt"),
                    PathBuf::from("/d/two.txt"),
                ])
            })
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            entries.paths(),
            vec![PathBuf::from("/d/One.txt"), PathBuf::from("/d/two.txt")]
        );
    }
}
