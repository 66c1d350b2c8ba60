//! Disposal primitives.
//!
//! A [`Disposable`] wraps a single teardown action and guarantees that it
//! runs at most once, no matter how many times `dispose` is called or from
//! which thread. Everything in the pipeline that can be torn down (chain
//! nodes, transaction handles, cancellation registrations) implements the
//! [`Dispose`] trait.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Types with an explicit, idempotent teardown.
pub trait Dispose {
    /// Release the resource. Calling this more than once is a no-op.
    fn dispose(&self);

    /// Whether `dispose` has been called.
    fn is_disposed(&self) -> bool;
}

type TeardownFn = Box<dyn FnOnce() + Send + 'static>;

/// Runs a teardown action exactly once.
///
/// Dropping a `Disposable` does not run the action; teardown is always
/// explicit.
pub struct Disposable {
    disposed: AtomicBool,
    action: Mutex<Option<TeardownFn>>,
}

impl Disposable {
    /// Create a disposable that runs `action` on first disposal.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            disposed: AtomicBool::new(false),
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Create a disposable with nothing to tear down.
    pub fn empty() -> Self {
        Self {
            disposed: AtomicBool::new(false),
            action: Mutex::new(None),
        }
    }
}

impl Dispose for Disposable {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Take the action out before running it so the lock is not held
        // while user code executes.
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
