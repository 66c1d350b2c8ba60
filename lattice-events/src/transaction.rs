//! Transaction gate.
//!
//! A [`Transaction`] counts operations in progress. It is "open" while at
//! least one [`TransactionHandle`] is outstanding, and raises events only on
//! the edges:
//!
//! - `0 -> 1`: `opened`, then `changed(true)`
//! - `1 -> 0`: `closed`, then `changed(false)`
//!
//! Nested `begin` calls only move the counter, so a caller can wrap a batch
//! of operations and observe a single open/close pair.
//!
//! # Example
//!
//! ```rust
//! use lattice_events::Transaction;
//!
//! let busy = Transaction::new();
//! let outer = busy.begin().unwrap();
//! let inner = busy.begin().unwrap();
//!
//! inner.release().unwrap();
//! assert!(busy.is_open());
//!
//! outer.release().unwrap();
//! assert!(!busy.is_open());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::disposable::Dispose;
use crate::error::EventResult;
use crate::event::Event;

struct TransactionState {
    pending: Mutex<usize>,
    opened: Event<()>,
    closed: Event<()>,
    changed: Event<bool>,
}

impl TransactionState {
    fn enter(&self) -> EventResult {
        let first = {
            let mut pending = self.pending.lock();
            *pending += 1;
            *pending == 1
        };
        if first {
            tracing::trace!(target: "lattice_events::transaction", "transaction opened");
            // `changed` is raised even if an `opened` handler fails.
            let opened = self.opened.fire();
            let changed = self.changed.raise(&true);
            return opened.and(changed);
        }
        Ok(())
    }

    fn exit(&self) -> EventResult {
        let last = {
            let mut pending = self.pending.lock();
            assert!(
                *pending > 0,
                "transaction released more times than it was begun"
            );
            *pending -= 1;
            *pending == 0
        };
        if last {
            tracing::trace!(target: "lattice_events::transaction", "transaction closed");
            let closed = self.closed.fire();
            let changed = self.changed.raise(&false);
            return closed.and(changed);
        }
        Ok(())
    }
}

/// A reentrant open/closed gate over pending operations.
///
/// Cloning yields another handle to the same gate.
#[derive(Clone)]
pub struct Transaction {
    state: Arc<TransactionState>,
}

impl Transaction {
    /// Create a closed gate.
    pub fn new() -> Self {
        Self {
            state: Arc::new(TransactionState {
                pending: Mutex::new(0),
                opened: Event::new(),
                closed: Event::new(),
                changed: Event::new(),
            }),
        }
    }

    /// Start an operation, opening the gate if it was closed.
    ///
    /// If an `opened` or `changed` handler fails, the operation is rolled
    /// back before the error is returned.
    pub fn begin(&self) -> EventResult<TransactionHandle> {
        let handle = TransactionHandle {
            state: Arc::clone(&self.state),
            released: AtomicBool::new(false),
        };
        // Counted before raising so the handle's drop undoes it on error.
        self.state.enter()?;
        Ok(handle)
    }

    /// Whether any operation is in progress.
    pub fn is_open(&self) -> bool {
        self.pending() > 0
    }

    /// Number of outstanding handles.
    pub fn pending(&self) -> usize {
        *self.state.pending.lock()
    }

    /// Raised when the gate goes from closed to open.
    pub fn opened(&self) -> &Event<()> {
        &self.state.opened
    }

    /// Raised when the last outstanding handle is released.
    pub fn closed(&self) -> &Event<()> {
        &self.state.closed
    }

    /// Raised on both edges with the new open state.
    pub fn changed(&self) -> &Event<bool> {
        &self.state.changed
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("pending", &self.pending())
            .finish()
    }
}

/// One outstanding operation on a [`Transaction`].
///
/// Releasing is idempotent. A handle dropped without being released is
/// released on drop.
#[must_use = "dropping a transaction handle releases it immediately"]
pub struct TransactionHandle {
    state: Arc<TransactionState>,
    released: AtomicBool,
}

impl TransactionHandle {
    /// End the operation. Only the first call has any effect.
    pub fn release(&self) -> EventResult {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.state.exit()
    }

    /// Whether this handle has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn release_logged(&self) {
        if let Err(err) = self.release() {
            tracing::error!(
                target: "lattice_events::transaction",
                error = %err,
                "transition handler failed while releasing transaction"
            );
        }
    }
}

impl Dispose for TransactionHandle {
    fn dispose(&self) {
        self.release_logged();
    }

    fn is_disposed(&self) -> bool {
        self.is_released()
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        self.release_logged();
    }
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
