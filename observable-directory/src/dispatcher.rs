//! Serialized execution of collection mutations.
//!
//! Every mutation goes through a [`Dispatcher`]. With a queued context the
//! delivering thread only enqueues the job; a single consumer runs jobs one
//! at a time in the order they were accepted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{Result, WatcherError};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Barrier(oneshot::Sender<()>),
}

/// Where mutations run.
#[derive(Debug, Clone)]
pub enum ExecutionContext {
    /// Synchronously on the thread that delivered the event. Jobs from
    /// different delivery threads are not ordered relative to each other.
    Inline,

    /// On a single task spawned on this runtime.
    Runtime(Handle),

    /// On a dedicated OS thread owned by the dispatcher.
    Thread,
}

impl ExecutionContext {
    /// Capture the caller's tokio runtime.
    pub fn capture() -> Result<Self> {
        Handle::try_current()
            .map(Self::Runtime)
            .map_err(|_| WatcherError::NoExecutionContext)
    }

    /// [`capture`](Self::capture) when `capture_caller_context` is set,
    /// [`Inline`](Self::Inline) otherwise.
    pub fn from_capture_flag(capture_caller_context: bool) -> Result<Self> {
        if capture_caller_context {
            Self::capture()
        } else {
            Ok(Self::Inline)
        }
    }
}

/// Funnels jobs onto one execution context.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Option<mpsc::UnboundedSender<Message>>,
    timers: Option<Handle>,
    closed: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Create a dispatcher, starting its consumer if the context needs one.
    pub fn new(context: ExecutionContext) -> Result<Self> {
        let closed = Arc::new(AtomicBool::new(false));
        let timers = match &context {
            ExecutionContext::Runtime(handle) => Some(handle.clone()),
            ExecutionContext::Inline | ExecutionContext::Thread => None,
        };

        let queue = match context {
            ExecutionContext::Inline => None,
            ExecutionContext::Runtime(handle) => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let worker_closed = Arc::clone(&closed);
                handle.spawn(async move {
                    while let Some(message) = rx.recv().await {
                        run(message, &worker_closed);
                    }
                    trace!("Dispatcher task finished");
                });
                Some(tx)
            }
            ExecutionContext::Thread => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let worker_closed = Arc::clone(&closed);
                std::thread::Builder::new()
                    .name("observable-directory".to_string())
                    .spawn(move || {
                        while let Some(message) = rx.blocking_recv() {
                            run(message, &worker_closed);
                        }
                        trace!("Dispatcher thread finished");
                    })?;
                Some(tx)
            }
        };

        Ok(Self {
            queue,
            timers,
            closed,
        })
    }

    /// Accept a job. Never blocks on the job itself unless the context is
    /// inline.
    ///
    /// Returns `Ok(false)` once the dispatcher is closed and
    /// [`WatcherError::ChannelSend`] if the consumer has exited.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> Result<bool> {
        if self.is_closed() {
            trace!("Dispatcher closed, dropping job");
            return Ok(false);
        }
        match &self.queue {
            None => {
                job();
                Ok(true)
            }
            Some(queue) => queue
                .send(Message::Run(Box::new(job)))
                .map(|()| true)
                .map_err(|_| WatcherError::ChannelSend),
        }
    }

    /// Dispatch `job` once `delay` has elapsed.
    ///
    /// The wait happens on the runtime for a runtime context and on a short
    /// lived timer thread otherwise. A job that comes due after
    /// [`close`](Self::close) is dropped.
    pub fn dispatch_after(&self, delay: Duration, job: impl FnOnce() + Send + 'static) {
        let dispatcher = self.clone();
        match &self.timers {
            Some(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    dispatcher.dispatch_logged(job);
                });
            }
            None => {
                let spawned = std::thread::Builder::new()
                    .name("observable-directory-timer".to_string())
                    .spawn(move || {
                        std::thread::sleep(delay);
                        dispatcher.dispatch_logged(job);
                    });
                if let Err(e) = spawned {
                    warn!("Failed to start timer thread: {e}");
                }
            }
        }
    }

    /// [`dispatch`](Self::dispatch), logging a job that could not be queued.
    pub(crate) fn dispatch_logged(&self, job: impl FnOnce() + Send + 'static) {
        match self.dispatch(job) {
            Ok(true) => {}
            Ok(false) => trace!("Job dropped after close"),
            Err(e) => warn!("Dropping job: {e}"),
        }
    }

    /// Stop accepting jobs. Jobs queued but not started are dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Dispatcher closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until every job accepted before this call has run or been dropped.
    pub async fn drain(&self) {
        let Some(queue) = &self.queue else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if queue.send(Message::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queued", &self.queue.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn run(message: Message, closed: &AtomicBool) {
    match message {
        Message::Run(job) => {
            if closed.load(Ordering::SeqCst) {
                trace!("Dispatcher closed, dropping queued job");
            } else {
                job();
            }
        }
        Message::Barrier(done) => {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::thread;

    fn recorder() -> (Arc<Mutex<Vec<usize>>>, impl Fn(usize) -> Box<dyn FnOnce() + Send>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let make = move |n: usize| -> Box<dyn FnOnce() + Send> {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().unwrap().push(n))
        };
        (seen, make)
    }

    #[test]
    fn test_capture_outside_runtime_fails() {
        assert!(matches!(
            ExecutionContext::capture(),
            Err(WatcherError::NoExecutionContext)
        ));
        assert!(matches!(
            ExecutionContext::from_capture_flag(false),
            Ok(ExecutionContext::Inline)
        ));
    }

    #[test]
    fn test_inline_runs_immediately() {
        let dispatcher = Dispatcher::new(ExecutionContext::Inline).unwrap();
        let (seen, job) = recorder();

        assert!(dispatcher.dispatch(job(1)).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        dispatcher.close();
        assert!(!dispatcher.dispatch(job(2)).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_runtime_context_preserves_order_on_caller_thread() {
        let dispatcher = Dispatcher::new(ExecutionContext::capture().unwrap()).unwrap();
        let caller = thread::current().id();
        let threads = Arc::new(Mutex::new(Vec::new()));
        let (seen, job) = recorder();

        let delivery = {
            let dispatcher = dispatcher.clone();
            let threads = Arc::clone(&threads);
            let jobs: Vec<_> = (0..50).map(&job).collect();
            thread::spawn(move || {
                for job in jobs {
                    let threads = Arc::clone(&threads);
                    dispatcher
                        .dispatch(move || {
                            threads.lock().unwrap().push(thread::current().id());
                            job();
                        })
                        .unwrap();
                }
            })
        };
        delivery.join().unwrap();
        dispatcher.drain().await;

        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
        assert!(threads.lock().unwrap().iter().all(|id| *id == caller));
    }

    #[tokio::test]
    async fn test_close_drops_queued_jobs() {
        let dispatcher = Dispatcher::new(ExecutionContext::capture().unwrap()).unwrap();
        let (seen, job) = recorder();

        assert!(dispatcher.dispatch(job(1)).unwrap());
        dispatcher.close();
        assert!(!dispatcher.dispatch(job(2)).unwrap());
        dispatcher.drain().await;

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dedicated_thread_runs_in_order() {
        let dispatcher = Dispatcher::new(ExecutionContext::Thread).unwrap();
        let (seen, job) = recorder();

        for n in 0..10 {
            dispatcher.dispatch(job(n)).unwrap();
        }
        dispatcher.drain().await;

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_dispatch_fails_once_consumer_is_gone() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(ExecutionContext::Runtime(runtime.handle().clone())).unwrap();
        drop(runtime);
        let (seen, job) = recorder();

        assert!(matches!(
            dispatcher.dispatch(job(1)),
            Err(WatcherError::ChannelSend)
        ));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_after_runs_on_runtime_once_due() {
        let dispatcher = Dispatcher::new(ExecutionContext::capture().unwrap()).unwrap();
        let (seen, job) = recorder();

        dispatcher.dispatch_after(Duration::from_millis(20), job(1));
        dispatcher.drain().await;
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        dispatcher.drain().await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_dispatch_after_is_dropped_after_close() {
        let dispatcher = Dispatcher::new(ExecutionContext::Inline).unwrap();
        let (seen, job) = recorder();

        dispatcher.dispatch_after(Duration::from_millis(20), job(1));
        dispatcher.close();
        thread::sleep(Duration::from_millis(100));

        assert!(seen.lock().unwrap().is_empty());
    }
}
