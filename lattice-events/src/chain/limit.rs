//! Concurrency limiting for async chains.
//!
//! A limit stage admits at most `max_concurrent` occurrences into its
//! downstream at once. Occurrences arriving while every slot is busy wait
//! in a FIFO buffer of at most `max_buffer` entries; anything beyond that
//! is dropped. Drops are part of the contract, not errors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::{EventError, EventResult};

/// How many occurrences may wait for a free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLimit {
    /// At most this many waiting occurrences; `Bounded(0)` disables waiting.
    Bounded(usize),
    /// Every occurrence waits, however many are queued.
    Unlimited,
}

impl BufferLimit {
    /// Interpret a signed buffer size where `-1` means unlimited.
    ///
    /// Values below `-1` are rejected.
    pub fn from_raw(raw: i64) -> EventResult<Self> {
        match raw {
            -1 => Ok(Self::Unlimited),
            n if n < -1 => Err(EventError::invalid_argument(
                "max_buffer",
                format!("{n} is below the unlimited sentinel -1"),
            )),
            n => usize::try_from(n).map(Self::Bounded).map_err(|_| {
                EventError::invalid_argument("max_buffer", format!("{n} does not fit in usize"))
            }),
        }
    }
}

/// Options for a limit stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitOptions {
    /// Maximum number of occurrences running downstream at once.
    pub max_concurrent: usize,
    /// How many occurrences may wait for a slot.
    pub max_buffer: BufferLimit,
}

impl LimitOptions {
    /// Create options with the given limits.
    pub fn new(max_concurrent: usize, max_buffer: BufferLimit) -> Self {
        Self {
            max_concurrent,
            max_buffer,
        }
    }

    /// Build options from signed values, where a buffer of `-1` is unlimited.
    pub fn from_raw(max_concurrent: i64, max_buffer: i64) -> EventResult<Self> {
        let max_concurrent = usize::try_from(max_concurrent).map_err(|_| {
            EventError::invalid_argument(
                "max_concurrent",
                format!("{max_concurrent} is negative"),
            )
        })?;
        let options = Self::new(max_concurrent, BufferLimit::from_raw(max_buffer)?);
        options.validate()?;
        Ok(options)
    }

    /// Check that the options describe a usable limit.
    pub fn validate(&self) -> EventResult {
        if self.max_concurrent == 0 {
            return Err(EventError::invalid_argument(
                "max_concurrent",
                "must be at least 1",
            ));
        }
        if self.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(EventError::invalid_argument(
                "max_concurrent",
                format!("must not exceed {}", Semaphore::MAX_PERMITS),
            ));
        }
        Ok(())
    }
}

impl Default for LimitOptions {
    /// One at a time, nothing buffered.
    fn default() -> Self {
        Self::new(1, BufferLimit::Bounded(0))
    }
}

/// Admission control shared by every occurrence passing one limit stage.
pub(crate) struct LimitGate {
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    max_buffer: BufferLimit,
}

/// Decrements the waiting count even if the admitting future is dropped.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl LimitGate {
    pub(crate) fn new(options: LimitOptions) -> EventResult<Self> {
        options.validate()?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(options.max_concurrent)),
            waiting: AtomicUsize::new(0),
            max_buffer: options.max_buffer,
        })
    }

    /// Wait for a slot. Returns `None` when the occurrence must be dropped.
    pub(crate) async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Some(permit),
            Err(TryAcquireError::Closed) => return None,
            Err(TryAcquireError::NoPermits) => {}
        }

        let queued = self.waiting.fetch_add(1, Ordering::AcqRel);
        let _guard = WaitingGuard(&self.waiting);
        if let BufferLimit::Bounded(max) = self.max_buffer {
            if queued >= max {
                tracing::debug!(
                    target: "lattice_events::limit",
                    waiting = queued,
                    max_buffer = max,
                    "buffer full, dropping occurrence"
                );
                return None;
            }
        }

        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }

    #[cfg(test)]
    fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_buffer_sentinel() {
        assert_eq!(BufferLimit::from_raw(-1).unwrap(), BufferLimit::Unlimited);
        assert_eq!(BufferLimit::from_raw(3).unwrap(), BufferLimit::Bounded(3));
        assert!(matches!(
            BufferLimit::from_raw(-2),
            Err(EventError::InvalidArgument { name: "max_buffer", .. })
        ));
    }

    #[test]
    fn zero_or_negative_concurrency_is_rejected() {
        assert!(LimitOptions::new(0, BufferLimit::Unlimited).validate().is_err());
        assert!(matches!(
            LimitOptions::from_raw(-1, 0),
            Err(EventError::InvalidArgument { name: "max_concurrent", .. })
        ));
        assert!(LimitOptions::from_raw(2, -1).is_ok());
    }

    #[tokio::test]
    async fn gate_queues_up_to_bounded_buffer() {
        let gate = Arc::new(LimitGate::new(LimitOptions::new(1, BufferLimit::Bounded(1))).unwrap());

        let first = gate.admit().await;
        assert!(first.is_some());

        let waiter = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.admit().await.is_some() }
        });
        tokio::task::yield_now().await;
        assert_eq!(gate.waiting(), 1);

        assert!(gate.admit().await.is_none());
        assert_eq!(gate.waiting(), 1);

        drop(first);
        assert!(waiter.await.unwrap());
        assert_eq!(gate.waiting(), 0);
    }

    #[tokio::test]
    async fn gate_drops_beyond_buffer() {
        let gate = LimitGate::new(LimitOptions::new(1, BufferLimit::Bounded(0))).unwrap();

        let first = gate.admit().await;
        assert!(first.is_some());
        assert_eq!(gate.available(), 0);

        assert!(gate.admit().await.is_none());
        assert_eq!(gate.waiting(), 0);

        drop(first);
        assert!(gate.admit().await.is_some());
    }
}
