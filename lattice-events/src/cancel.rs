//! Cancellation signals.
//!
//! A [`CancellationSource`] owns the right to cancel; any number of
//! [`CancellationToken`] clones observe it. Tokens accept callbacks that run
//! exactly once when cancellation happens (or immediately, if it already
//! has), and async code can await [`CancellationToken::cancelled`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::disposable::Dispose;

type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

struct CancelState {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<u64, CancelCallback>>,
    notify: Notify,
}

impl CancelState {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        self.notify.notify_waiters();
        tracing::trace!(
            target: "lattice_events::cancel",
            callbacks = callbacks.len(),
            "cancellation requested"
        );
        // BTreeMap iteration is in registration order.
        for (_, callback) in callbacks {
            callback();
        }
    }
}

/// The owning side of a cancellation signal.
pub struct CancellationSource {
    state: Arc<CancelState>,
}

impl CancellationSource {
    /// Create a new, uncancelled source.
    pub fn new() -> Self {
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(BTreeMap::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Get a token observing this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            state: Arc::clone(&self.state),
        }
    }

    /// Signal cancellation. Registered callbacks run on the calling thread.
    ///
    /// Calling this again has no effect.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// The observing side of a cancellation signal.
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl CancellationToken {
    /// A token that is never cancelled.
    pub fn none() -> Self {
        CancellationSource::new().token()
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Register a callback to run once on cancellation.
    ///
    /// If the token is already cancelled, the callback runs immediately on
    /// the calling thread and the returned registration is inert.
    pub fn register<F>(&self, callback: F) -> CancellationRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut callbacks = self.state.callbacks.lock();
            // Checked under the lock: `cancel` flips the flag before draining.
            if !self.state.cancelled.load(Ordering::Acquire) {
                callbacks.insert(id, Box::new(callback));
                return CancellationRegistration {
                    state: Arc::downgrade(&self.state),
                    id,
                };
            }
        }
        callback();
        CancellationRegistration {
            state: Weak::new(),
            id,
        }
    }

    /// Wait until cancellation is signalled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A callback registered on a [`CancellationToken`].
pub struct CancellationRegistration {
    state: Weak<CancelState>,
    id: u64,
}

impl CancellationRegistration {
    /// Remove the callback. Returns `false` if it already ran or was removed.
    pub fn unregister(&self) -> bool {
        match self.state.upgrade() {
            Some(state) => state.callbacks.lock().remove(&self.id).is_some(),
            None => false,
        }
    }
}

impl Dispose for CancellationRegistration {
    fn dispose(&self) {
        self.unregister();
    }

    fn is_disposed(&self) -> bool {
        match self.state.upgrade() {
            Some(state) => !state.callbacks.lock().contains_key(&self.id),
            None => true,
        }
    }
}
