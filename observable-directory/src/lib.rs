//! # Observable Directory
//!
//! This crate keeps a live, observable list of the files in one directory,
//! synchronized with the filesystem as change notifications arrive.
//!
//! ## Features
//!
//! - **Initial Scan**: Entries reflect the directory as soon as it is opened
//! - **Reconciliation**: Events are matched to entries by path and turned into
//!   add / remove / rename / change-count mutations
//! - **Serialized Dispatch**: Mutations and notifications run on one execution
//!   context, in arrival order
//! - **Subscriptions**: Observers are told about every added, removed or
//!   updated entry
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Observable Directory                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatchBackend ──► EventTranslator ──► Dispatcher                │
//! │       │                                   │                     │
//! │       ▼                                   ▼                     │
//! │  initial scan ──────────────────►  reconcile ──► EntryCollection │
//! │                                                       │         │
//! │                                                       ▼         │
//! │                                                  subscribers    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codex_observable_directory::ObservableDirectory;
//!
//! let mut dir = ObservableDirectory::open("/home/user/Downloads", true)?;
//! dir.entries().subscribe(|change| println!("{change:?}"));
//!
//! for entry in dir.entries().snapshot() {
//!     println!("{} ({} changes)", entry.path().display(), entry.change_count());
//! }
//!
//! dir.close()?;
//! ```

pub mod backend;
pub mod collection;
pub mod config;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod event;
pub mod reconciler;
pub mod scan;
pub mod session;

pub use backend::{ManualWatcher, SessionEventHandler, WatchBackend};
pub use collection::{Entries, EntryChange, EntryCollection, SubscriptionId};
pub use config::{OutboundRename, PathComparison, SessionConfig};
pub use dispatcher::{Dispatcher, ExecutionContext};
pub use entry::{EntryField, TrackedEntry};
pub use error::{Result, WatcherError};
pub use event::{EventTranslator, FsEvent};
pub use reconciler::{Mutation, reconcile};
pub use session::{ObservableDirectory, ObservableDirectoryBuilder, SessionState};
