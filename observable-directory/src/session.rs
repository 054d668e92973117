//! Directory watch sessions.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::backend::{SessionEventHandler, WatchBackend};
use crate::collection::Entries;
use crate::config::SessionConfig;
use crate::dispatcher::{Dispatcher, ExecutionContext};
use crate::error::{Result, WatcherError};
use crate::scan::scan_directory;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Watch registered, initial scan not finished.
    Created,

    /// Initial entries are in place and events are being applied.
    Active,

    /// Closed. Terminal.
    Closed,
}

/// A live view of the files in one directory.
///
/// Opening a session lists the directory synchronously, so [`entries`] holds
/// the current files as soon as `open` returns. From then on every event the
/// backend reports is reconciled into the collection on the session's
/// execution context.
///
/// Known limitation: events the OS drops or coalesces under load are not
/// recovered; the entries may drift from disk until the directory is opened
/// again.
///
/// [`entries`]: ObservableDirectory::entries
pub struct ObservableDirectory {
    root: PathBuf,
    config: SessionConfig,
    entries: Entries,
    dispatcher: Dispatcher,
    backend: Option<Box<dyn WatchBackend>>,
    state: SessionState,
}

impl ObservableDirectory {
    /// Open `path` with default settings.
    ///
    /// With `capture_caller_context` set, mutations run on the caller's tokio
    /// runtime; otherwise they run inline on the OS delivery thread.
    pub fn open(path: impl Into<PathBuf>, capture_caller_context: bool) -> Result<Self> {
        let config = SessionConfig {
            capture_caller_context,
            ..SessionConfig::default()
        };
        Self::builder(path).config(config).open()
    }

    /// Start configuring a session for `path`.
    pub fn builder(path: impl Into<PathBuf>) -> ObservableDirectoryBuilder {
        ObservableDirectoryBuilder::new(path)
    }

    /// The watched root.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Read-only live view of the entries.
    pub fn entries(&self) -> &Entries {
        &self.entries
    }

    /// Settings the session was opened with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Wait until every event accepted so far has been applied.
    pub async fn drain(&self) {
        self.dispatcher.drain().await;
    }

    /// Release the watch handle and stop applying events.
    ///
    /// Mutations queued but not yet started are dropped; one already running
    /// completes. Calling this again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.dispatcher.close();

        let result = match self.backend.take() {
            Some(mut backend) => backend.unwatch(&self.root),
            None => Ok(()),
        };
        info!("Closed observable directory: {}", self.root.display());
        result
    }
}

impl Drop for ObservableDirectory {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to release watch on {}: {e}", self.root.display());
        }
    }
}

impl std::fmt::Debug for ObservableDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableDirectory")
            .field("root", &self.root)
            .field("state", &self.state)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ObservableDirectory`].
#[derive(Debug)]
pub struct ObservableDirectoryBuilder {
    root: PathBuf,
    config: SessionConfig,
    context: Option<ExecutionContext>,
}

impl ObservableDirectoryBuilder {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            root: path.into(),
            config: SessionConfig::default(),
            context: None,
        }
    }

    /// Use these settings.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Run mutations on `context` instead of the one implied by
    /// [`SessionConfig::capture_caller_context`].
    pub fn execution_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Open the session on the platform's recommended OS watcher.
    pub fn open(self) -> Result<ObservableDirectory> {
        self.open_with(|handler| notify::recommended_watcher(handler).map_err(WatcherError::from))
    }

    /// Open the session on a backend built from the session's event handler.
    pub fn open_with<B, F>(self, make_backend: F) -> Result<ObservableDirectory>
    where
        B: WatchBackend + 'static,
        F: FnOnce(SessionEventHandler) -> Result<B>,
    {
        let Self {
            root,
            config,
            context,
        } = self;

        if !root.is_dir() {
            return Err(WatcherError::PathNotFound(root.display().to_string()));
        }
        config.validate()?;

        let context = match context {
            Some(context) => context,
            None => ExecutionContext::from_capture_flag(config.capture_caller_context)?,
        };
        debug!(?context, "Opening observable directory: {}", root.display());

        let dispatcher = Dispatcher::new(context)?;
        let entries = Entries::new(config.path_comparison);
        let handler = SessionEventHandler::new(&config, dispatcher.clone(), entries.clone());

        let mut session = ObservableDirectory {
            root,
            config,
            entries,
            dispatcher,
            backend: None,
            state: SessionState::Created,
        };

        // Watch before listing so nothing slips between the two. Events that
        // arrive meanwhile wait for the listing and reconcile idempotently.
        let mut backend = make_backend(handler)?;
        backend.watch(&session.root)?;
        session.backend = Some(Box::new(backend));

        let follow_symlinks = session.config.follow_symlinks;
        let root = session.root.clone();
        let count = session
            .entries
            .populate(|| scan_directory(&root, follow_symlinks))?;

        session.state = SessionState::Active;
        info!("Watching {} ({count} files)", session.root.display());
        Ok(session)
    }
}
