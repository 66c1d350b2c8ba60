//! Dispatcher capability.
//!
//! Stages that move work off the raising call path (debounce, the
//! sync-to-async bridge) hand it to a [`Dispatcher`]. The pipeline never
//! decides *where* work runs; it only asks a dispatcher to run it,
//! optionally cancellable and optionally with an error callback.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::cancel::CancellationToken;
use crate::error::{EventError, EventResult};

/// A unit of dispatched work.
pub type Work = BoxFuture<'static, EventResult>;

/// Receives errors from dispatched work instead of the raising caller.
pub type ErrorHandler = Arc<dyn Fn(EventError) + Send + Sync>;

/// Runs work items on some execution context.
pub trait Dispatcher: Send + Sync {
    /// Run `work`.
    ///
    /// If `cancel` fires before the work completes, the work is abandoned.
    /// Errors returned by the work go to `on_error` when one is supplied;
    /// otherwise the dispatcher reports them in its own way.
    fn run(&self, work: Work, cancel: Option<CancellationToken>, on_error: Option<ErrorHandler>);
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn run(&self, work: Work, cancel: Option<CancellationToken>, on_error: Option<ErrorHandler>) {
        (**self).run(work, cancel, on_error)
    }
}

/// Dispatches work as tasks on a tokio runtime.
///
/// Errors without an error handler are reported through `tracing` at error
/// level, since there is no caller left to return them to.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: Handle,
}

impl TokioDispatcher {
    /// Create a dispatcher for the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a dispatcher for the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Dispatcher for TokioDispatcher {
    fn run(&self, work: Work, cancel: Option<CancellationToken>, on_error: Option<ErrorHandler>) {
        self.handle.spawn(async move {
            let result = match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => Ok(()),
                        result = work => result,
                    }
                }
                None => work.await,
            };

            if let Err(err) = result {
                match on_error {
                    Some(handler) => handler(err),
                    None => tracing::error!(
                        target: "lattice_events::dispatch",
                        error = %err,
                        "dispatched work failed"
                    ),
                }
            }
        });
    }
}
