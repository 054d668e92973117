//! Event-to-mutation policy.
//!
//! [`reconcile`] is a pure function of one event and the current collection.
//! It keeps no memory of earlier events, so duplicate or late deliveries are
//! resolved purely by what is tracked right now.

use std::path::{Path, PathBuf};

use crate::collection::EntryCollection;
use crate::event::FsEvent;

/// The change an event requires of the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Track a new entry with a zero change count.
    Insert(PathBuf),

    /// Stop tracking the entry at this path.
    Remove(PathBuf),

    /// Move the entry at `from` to `to` in place, keeping its position and
    /// change count. With `overwrite`, the other entry tracked at `to` is
    /// removed first.
    Rename {
        from: PathBuf,
        to: PathBuf,
        overwrite: bool,
    },

    /// Bump the change count of the entry at this path.
    Touch(PathBuf),

    /// Nothing to do.
    None,
}

/// Decide what `event` requires of `entries`.
pub fn reconcile(event: &FsEvent, entries: &EntryCollection) -> Mutation {
    match event {
        FsEvent::Created { path } => insert_if_untracked(entries, path),
        FsEvent::Deleted { path } => {
            if entries.contains(path) {
                Mutation::Remove(path.clone())
            } else {
                Mutation::None
            }
        }
        FsEvent::Renamed { from, to } => {
            if from == to {
                Mutation::None
            } else if let Some(source) = entries.index_of(from) {
                let overwrite = entries.index_of(to).is_some_and(|target| target != source);
                Mutation::Rename {
                    from: from.clone(),
                    to: to.clone(),
                    overwrite,
                }
            } else {
                // The source was never tracked: outside the root or missed at startup.
                insert_if_untracked(entries, to)
            }
        }
        FsEvent::Modified { path } => {
            if entries.contains(path) {
                Mutation::Touch(path.clone())
            } else {
                Mutation::None
            }
        }
    }
}

fn insert_if_untracked(entries: &EntryCollection, path: &Path) -> Mutation {
    if entries.contains(path) {
        Mutation::None
    } else {
        Mutation::Insert(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathComparison;
    use pretty_assertions::assert_eq;

    fn collection(paths: &[&str]) -> EntryCollection {
        let mut entries = EntryCollection::new(PathComparison::Exact);
        for path in paths {
            entries.apply(Mutation::Insert(PathBuf::from(path)));
        }
        entries
    }

    fn apply_all(entries: &mut EntryCollection, events: &[FsEvent]) {
        for event in events {
            let mutation = reconcile(event, entries);
            entries.apply(mutation);
        }
    }

    fn paths(entries: &EntryCollection) -> Vec<PathBuf> {
        entries.iter().map(|e| e.path().to_path_buf()).collect()
    }

    #[test]
    fn test_created_inserts_once() {
        let mut entries = collection(&[]);

        assert_eq!(
            reconcile(&FsEvent::created("/d/a"), &entries),
            Mutation::Insert(PathBuf::from("/d/a"))
        );
        apply_all(&mut entries, &[FsEvent::created("/d/a")]);
        assert_eq!(reconcile(&FsEvent::created("/d/a"), &entries), Mutation::None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut once = collection(&["/d/a", "/d/b"]);
        let mut twice = collection(&["/d/a", "/d/b"]);

        apply_all(&mut once, &[FsEvent::deleted("/d/a")]);
        apply_all(&mut twice, &[FsEvent::deleted("/d/a"), FsEvent::deleted("/d/a")]);

        assert_eq!(paths(&once), paths(&twice));
        assert_eq!(paths(&once), vec![PathBuf::from("/d/b")]);
    }

    #[test]
    fn test_rename_preserves_identity() {
        let mut entries = collection(&["/d/a"]);
        apply_all(
            &mut entries,
            &[
                FsEvent::modified("/d/a"),
                FsEvent::modified("/d/a"),
                FsEvent::modified("/d/a"),
                FsEvent::renamed("/d/a", "/d/b"),
            ],
        );

        assert!(!entries.contains(Path::new("/d/a")));
        let renamed = entries.get(Path::new("/d/b")).unwrap();
        assert_eq!(renamed.change_count(), 3);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_out_of_band_rename_creates_entry() {
        let mut entries = collection(&[]);

        assert_eq!(
            reconcile(&FsEvent::renamed("/elsewhere/x", "/d/y"), &entries),
            Mutation::Insert(PathBuf::from("/d/y"))
        );
        apply_all(&mut entries, &[FsEvent::renamed("/elsewhere/x", "/d/y")]);

        let created = entries.get(Path::new("/d/y")).unwrap();
        assert_eq!(created.change_count(), 0);
    }

    #[test]
    fn test_out_of_band_rename_onto_tracked_path_is_noop() {
        let entries = collection(&["/d/y"]);
        assert_eq!(
            reconcile(&FsEvent::renamed("/d/x", "/d/y"), &entries),
            Mutation::None
        );
    }

    #[test]
    fn test_modify_unknown_path_is_noop() {
        let mut entries = collection(&["/d/a"]);

        assert_eq!(reconcile(&FsEvent::modified("/d/z"), &entries), Mutation::None);
        apply_all(&mut entries, &[FsEvent::modified("/d/z")]);

        assert_eq!(paths(&entries), vec![PathBuf::from("/d/a")]);
        assert_eq!(entries.get(Path::new("/d/a")).unwrap().change_count(), 0);
    }

    #[test]
    fn test_rename_onto_tracked_path_displaces_it() {
        let mut entries = collection(&["/d/a", "/d/b"]);
        apply_all(&mut entries, &[FsEvent::renamed("/d/a", "/d/b")]);

        assert_eq!(paths(&entries), vec![PathBuf::from("/d/b")]);
    }

    #[test]
    fn test_rename_decides_overwrite() {
        let entries = collection(&["/d/a", "/d/b"]);

        assert_eq!(
            reconcile(&FsEvent::renamed("/d/a", "/d/b"), &entries),
            Mutation::Rename {
                from: PathBuf::from("/d/a"),
                to: PathBuf::from("/d/b"),
                overwrite: true,
            }
        );
        assert_eq!(
            reconcile(&FsEvent::renamed("/d/a", "/d/c"), &entries),
            Mutation::Rename {
                from: PathBuf::from("/d/a"),
                to: PathBuf::from("/d/c"),
                overwrite: false,
            }
        );
    }

    #[test]
    fn test_case_only_rename_does_not_overwrite_itself() {
        let mut entries = EntryCollection::new(PathComparison::CaseInsensitive);
        entries.apply(Mutation::Insert(PathBuf::from("/d/readme")));

        assert_eq!(
            reconcile(&FsEvent::renamed("/d/readme", "/d/README"), &entries),
            Mutation::Rename {
                from: PathBuf::from("/d/readme"),
                to: PathBuf::from("/d/README"),
                overwrite: false,
            }
        );
    }

    #[test]
    fn test_rename_to_self_is_noop() {
        let entries = collection(&["/d/a"]);
        assert_eq!(
            reconcile(&FsEvent::renamed("/d/a", "/d/a"), &entries),
            Mutation::None
        );
    }

    #[test]
    fn test_paths_stay_unique_under_any_sequence() {
        let names = ["/d/a", "/d/b", "/d/c"];
        let mut events = Vec::new();
        for (i, from) in names.iter().enumerate() {
            let to = names[(i + 1) % names.len()];
            events.push(FsEvent::created(*from));
            events.push(FsEvent::renamed(*from, to));
            events.push(FsEvent::created(to));
            events.push(FsEvent::renamed("/outside/n", *from));
            events.push(FsEvent::modified(to));
            events.push(FsEvent::created(*from));
        }

        let mut entries = collection(&[]);
        for event in &events {
            let mutation = reconcile(event, &entries);
            entries.apply(mutation);

            let mut seen = paths(&entries);
            let total = seen.len();
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), total, "duplicate path after {event:?}");
        }
    }

    #[test]
    fn test_case_insensitive_matching() {
        let mut entries = EntryCollection::new(PathComparison::CaseInsensitive);
        entries.apply(Mutation::Insert(PathBuf::from("/d/Notes.txt")));

        assert_eq!(reconcile(&FsEvent::created("/d/notes.TXT"), &entries), Mutation::None);
        assert_eq!(
            reconcile(&FsEvent::modified("/d/NOTES.txt"), &entries),
            Mutation::Touch(PathBuf::from("/d/NOTES.txt"))
        );

        apply_all(&mut entries, &[FsEvent::renamed("/d/NOTES.TXT", "/d/notes.txt")]);
        assert_eq!(paths(&entries), vec![PathBuf::from("/d/notes.txt")]);
    }
}
