//! Error types for the event pipeline.
//!
//! Errors raised by user callbacks travel back through `raise` to whoever
//! fired the event, unless a `catch` stage intercepts them. `EventError` is
//! cheap to clone and keeps the identity of the original failure, so a catch
//! stage can inspect an error and hand the very same instance onward.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// A specialized Result type for pipeline operations.
pub type EventResult<T = ()> = Result<T, EventError>;

/// The error type carried through event chains.
#[derive(Debug, Clone, Error)]
pub enum EventError {
    /// A constructor was given an argument outside its valid range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// Name of the offending argument.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A failure raised by user code (a handler, predicate, or selector).
    #[error(transparent)]
    Handler(Arc<dyn StdError + Send + Sync + 'static>),

    /// A plain message failure.
    #[error("{0}")]
    Message(Arc<str>),

    /// Work was cancelled before it could complete.
    #[error("operation cancelled")]
    Cancelled,
}

impl EventError {
    /// Wrap an arbitrary error raised by user code.
    pub fn handler<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Handler(Arc::new(err))
    }

    /// Create a message error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(Arc::from(message.into()))
    }

    pub(crate) fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Check whether two errors are the same instance.
    ///
    /// Clones of an error compare equal here; two separately constructed
    /// errors with the same text do not.
    pub fn same_as(&self, other: &EventError) -> bool {
        match (self, other) {
            (Self::Handler(a), Self::Handler(b)) => Arc::ptr_eq(a, b),
            (Self::Message(a), Self::Message(b)) => Arc::ptr_eq(a, b),
            (Self::Cancelled, Self::Cancelled) => true,
            (
                Self::InvalidArgument { name: a, reason: ra },
                Self::InvalidArgument { name: b, reason: rb },
            ) => a == b && ra == rb,
            _ => false,
        }
    }

    /// Attempt to view the wrapped handler error as a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Handler(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}
