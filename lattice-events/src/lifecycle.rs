//! Lifecycle capability.
//!
//! A [`Lifecycle`] is anything with a terminal "disposed" moment, such as a
//! view model or a session. The `on` chain stage uses it to tear a chain
//! down automatically when its owner goes away.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::disposable::Dispose;
use crate::error::EventResult;
use crate::event::Event;

/// An object with a terminal disposal event.
pub trait Lifecycle: Send + Sync {
    /// Whether the object has already reached its end.
    fn is_disposed(&self) -> bool;

    /// Raised once when the object reaches its end.
    fn disposed(&self) -> &Event<()>;
}

/// A minimal lifecycle scope that ends when [`Lifetime::end`] is called.
#[derive(Debug, Default)]
pub struct Lifetime {
    ended: AtomicBool,
    disposed: Event<()>,
}

impl Lifetime {
    /// Create a scope that has not ended.
    pub fn new() -> Self {
        Self::default()
    }

    /// End the scope, raising `disposed` the first time only.
    pub fn end(&self) -> EventResult {
        if self.ended.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::trace!(target: "lattice_events::lifecycle", "lifetime ended");
        self.disposed.fire()
    }
}

impl Lifecycle for Lifetime {
    fn is_disposed(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn disposed(&self) -> &Event<()> {
        &self.disposed
    }
}

impl Dispose for Lifetime {
    fn dispose(&self) {
        if let Err(err) = self.end() {
            tracing::error!(
                target: "lattice_events::lifecycle",
                error = %err,
                "disposed handler failed while ending lifetime"
            );
        }
    }

    fn is_disposed(&self) -> bool {
        Lifecycle::is_disposed(self)
    }
}
