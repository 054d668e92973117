//! Sources of raw filesystem events.
//!
//! A session hands a [`SessionEventHandler`] to a backend factory and then
//! asks the backend to watch the root. The handler runs on whatever thread the
//! backend delivers on and forwards translated events to the dispatcher.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{trace, warn};

use crate::collection::Entries;
use crate::config::SessionConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::event::{EventTranslator, FsEvent};

/// Something that can watch a single directory, non-recursively.
pub trait WatchBackend: Send {
    /// Start delivering events for `root`.
    fn watch(&mut self, root: &Path) -> Result<()>;

    /// Stop delivering events for `root`.
    fn unwatch(&mut self, root: &Path) -> Result<()>;
}

impl WatchBackend for RecommendedWatcher {
    fn watch(&mut self, root: &Path) -> Result<()> {
        Watcher::watch(self, root, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    fn unwatch(&mut self, root: &Path) -> Result<()> {
        Watcher::unwatch(self, root)?;
        Ok(())
    }
}

/// Receives raw events for one session.
///
/// A rename source that is still unpaired when its window closes is resolved
/// by a delayed check on the dispatcher, so an outbound move is applied even
/// when no further event arrives.
pub struct SessionEventHandler {
    inner: Arc<HandlerInner>,
}

struct HandlerInner {
    pairing: Mutex<Pairing>,
    dispatcher: Dispatcher,
    entries: Entries,
}

struct Pairing {
    translator: EventTranslator,
    expiry_armed: bool,
}

impl Pairing {
    /// Delay for a new expiry check, unless one is already scheduled.
    fn arm_expiry(&mut self, now: Instant) -> Option<Duration> {
        if self.expiry_armed {
            return None;
        }
        let delay = self.translator.next_expiry(now)?;
        self.expiry_armed = true;
        Some(delay)
    }
}

impl SessionEventHandler {
    pub(crate) fn new(config: &SessionConfig, dispatcher: Dispatcher, entries: Entries) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                pairing: Mutex::new(Pairing {
                    translator: EventTranslator::new(config),
                    expiry_armed: false,
                }),
                dispatcher,
                entries,
            }),
        }
    }
}

impl HandlerInner {
    fn pairing(&self) -> MutexGuard<'_, Pairing> {
        self.pairing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forward(&self, events: Vec<FsEvent>) {
        for fs_event in events {
            let entries = self.entries.clone();
            self.dispatcher.dispatch_logged(move || {
                entries.reconcile(&fs_event);
            });
        }
    }

    fn schedule_expiry(self: &Arc<Self>, delay: Option<Duration>) {
        let Some(delay) = delay else {
            return;
        };
        trace!(?delay, "Scheduling rename expiry");
        let inner = Arc::clone(self);
        self.dispatcher
            .dispatch_after(delay, move || inner.expire_pending());
    }

    /// Runs on the dispatcher's context.
    fn expire_pending(self: &Arc<Self>) {
        let now = Instant::now();
        let (expired, delay) = {
            let mut pairing = self.pairing();
            pairing.expiry_armed = false;
            let expired = pairing.translator.expire(now);
            (expired, pairing.arm_expiry(now))
        };
        for fs_event in &expired {
            self.entries.reconcile(fs_event);
        }
        self.schedule_expiry(delay);
    }
}

impl notify::EventHandler for SessionEventHandler {
    fn handle_event(&mut self, event: notify::Result<notify::Event>) {
        if self.inner.dispatcher.is_closed() {
            trace!("Session closed, ignoring raw event");
            return;
        }

        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!("Watch error: {e}");
                return;
            }
        };
        if event.need_rescan() {
            warn!("Backend dropped events; entries may be stale until the directory is reopened");
        }

        let now = Instant::now();
        let (events, delay) = {
            let mut pairing = self.inner.pairing();
            let events = pairing.translator.translate(event, now);
            (events, pairing.arm_expiry(now))
        };
        self.inner.forward(events);
        self.inner.schedule_expiry(delay);
    }
}

impl std::fmt::Debug for SessionEventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventHandler")
            .field("translator", &self.inner.pairing().translator)
            .field("dispatcher", &self.inner.dispatcher)
            .finish_non_exhaustive()
    }
}

/// A backend fed by hand.
///
/// Events pushed through any clone are delivered on the pushing thread, just
/// as an OS backend delivers on its own thread. Events pushed while the root
/// is not watched are discarded.
#[derive(Clone)]
pub struct ManualWatcher {
    state: Arc<Mutex<ManualState>>,
}

struct ManualState {
    handler: SessionEventHandler,
    watched: Option<PathBuf>,
}

impl ManualWatcher {
    /// Create a backend around a session's handler.
    pub fn new(handler: SessionEventHandler) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                handler,
                watched: None,
            })),
        }
    }

    /// Deliver a raw event. Returns whether a root was being watched.
    pub fn push(&self, event: notify::Event) -> bool {
        self.deliver(Ok(event))
    }

    /// Deliver a backend error.
    pub fn push_error(&self, error: notify::Error) -> bool {
        self.deliver(Err(error))
    }

    /// The currently watched root.
    pub fn watched_root(&self) -> Option<PathBuf> {
        self.lock().watched.clone()
    }

    fn deliver(&self, event: notify::Result<notify::Event>) -> bool {
        let mut state = self.lock();
        if state.watched.is_none() {
            trace!("Manual watcher is not watching, discarding event");
            return false;
        }
        notify::EventHandler::handle_event(&mut state.handler, event);
        true
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WatchBackend for ManualWatcher {
    fn watch(&mut self, root: &Path) -> Result<()> {
        self.lock().watched = Some(root.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, root: &Path) -> Result<()> {
        let mut state = self.lock();
        if state.watched.as_deref() == Some(root) {
            state.watched = None;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ManualWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualWatcher")
            .field("watched", &self.watched_root())
            .finish_non_exhaustive()
    }
}
