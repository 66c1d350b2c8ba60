//! Debouncing.
//!
//! A [`Debouncer`] holds at most one pending action. Every call to
//! `debounce` cancels whatever was pending and starts a fresh delay, so a
//! burst of calls closer together than the delay produces a single run of
//! the last action once the burst settles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::cancel::CancellationSource;
use crate::dispatch::{Dispatcher, ErrorHandler, Work};
use crate::error::EventResult;

struct Pending {
    generation: u64,
    source: CancellationSource,
}

/// Single-slot delayed execution with cancel-and-restart semantics.
///
/// # Example
///
/// ```rust,ignore
/// let debouncer = Debouncer::new();
/// let dispatcher = TokioDispatcher::current();
///
/// for query in ["l", "la", "lat"] {
///     debouncer.debounce(move || search(query), Duration::from_millis(250), &dispatcher);
/// }
/// // Only `search("lat")` runs, 250ms after the last call.
/// ```
#[derive(Default)]
pub struct Debouncer {
    pending: Arc<Mutex<Option<Pending>>>,
    generation: AtomicU64,
}

impl Debouncer {
    /// Create a debouncer with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` to run on `dispatcher` after `delay`, replacing any
    /// pending action.
    pub fn debounce<F>(&self, action: F, delay: Duration, dispatcher: &dyn Dispatcher)
    where
        F: FnOnce() -> EventResult + Send + 'static,
    {
        self.schedule(async move { action() }.boxed(), delay, dispatcher, None);
    }

    /// Like [`debounce`](Self::debounce), reporting action errors to
    /// `on_error` instead of the dispatcher's default reporting.
    pub fn debounce_with<F>(
        &self,
        action: F,
        delay: Duration,
        dispatcher: &dyn Dispatcher,
        on_error: ErrorHandler,
    ) where
        F: FnOnce() -> EventResult + Send + 'static,
    {
        self.schedule(async move { action() }.boxed(), delay, dispatcher, Some(on_error));
    }

    /// Schedule an async action, replacing any pending action.
    pub fn debounce_async<F, Fut>(&self, action: F, delay: Duration, dispatcher: &dyn Dispatcher)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = EventResult> + Send + 'static,
    {
        self.schedule(async move { action().await }.boxed(), delay, dispatcher, None);
    }

    /// Cancel the pending action, if any.
    pub fn cancel(&self) {
        let pending = self.pending.lock().take();
        if let Some(pending) = pending {
            pending.source.cancel();
        }
    }

    /// Whether an action is waiting for its delay to elapse.
    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    fn schedule(
        &self,
        work: Work,
        delay: Duration,
        dispatcher: &dyn Dispatcher,
        on_error: Option<ErrorHandler>,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let source = CancellationSource::new();
        let token = source.token();

        let previous = self
            .pending
            .lock()
            .replace(Pending { generation, source });
        if let Some(previous) = previous {
            tracing::trace!(target: "lattice_events::debounce", "restarting debounce window");
            previous.source.cancel();
        }

        let pending = Arc::clone(&self.pending);
        dispatcher.run(
            async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }

                {
                    let mut slot = pending.lock();
                    match slot.as_ref() {
                        Some(current) if current.generation == generation => {
                            *slot = None;
                        }
                        // Superseded between the timer firing and this check.
                        _ => return Ok(()),
                    }
                }

                work.await
            }
            .boxed(),
            None,
            on_error,
        );
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &self.is_pending())
            .finish()
    }
}
