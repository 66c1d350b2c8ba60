//! Event sources.
//!
//! An [`Event`] is the root broadcaster of a pipeline: a multicast list of
//! handlers invoked in subscription order. [`AsyncEvent`] is its async
//! twin, where every handler returns a future that is awaited before the
//! next handler runs.
//!
//! # Payload arity
//!
//! One generic payload covers every shape of event:
//!
//! - `Event<()>` for events without arguments
//! - `Event<T>` for events with a single argument
//! - `Event<(S, T)>` for sender + argument events
//!
//! # Reentrancy
//!
//! `raise` works on a snapshot of the handler list taken when it starts,
//! and the internal lock is never held while a handler runs. Handlers may
//! therefore subscribe or unsubscribe (themselves or others) freely:
//!
//! - a handler added during a raise is first invoked by the *next* raise
//! - a handler removed during a raise is skipped if it has not run yet
//! - no other handler is skipped or invoked twice
//!
//! # Errors
//!
//! The first handler error stops the raise and is returned to the caller.
//! There is no per-handler isolation; use a `catch` stage for that.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::chain::{AsyncObserver, Observer};
use crate::error::EventResult;

/// Identifies a handler subscription on an event.
///
/// IDs are unique across every event in the process, so an ID can never
/// accidentally remove a handler from the wrong event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw u64 value of this handler ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A synchronous event handler.
pub type Handler<A> = Arc<dyn Fn(&A) -> EventResult + Send + Sync>;

/// An asynchronous event handler.
pub type AsyncHandler<A> = Arc<dyn Fn(A) -> BoxFuture<'static, EventResult> + Send + Sync>;

/// One entry in an invocation list.
///
/// `live` is cleared on unsubscribe so that an in-flight raise holding a
/// snapshot skips the entry.
struct Slot<H> {
    id: HandlerId,
    live: AtomicBool,
    handler: H,
}

/// Ordered multicast list shared by both event flavors.
struct Registry<H> {
    slots: Mutex<Vec<Arc<Slot<H>>>>,
}

impl<H: Clone> Registry<H> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    fn add(&self, handler: H) -> HandlerId {
        let id = HandlerId::next();
        self.slots.lock().push(Arc::new(Slot {
            id,
            live: AtomicBool::new(true),
            handler,
        }));
        id
    }

    fn remove(&self, id: HandlerId) -> bool {
        let mut slots = self.slots.lock();
        match slots.iter().position(|slot| slot.id == id) {
            Some(index) => {
                let slot = slots.remove(index);
                slot.live.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    fn clear(&self) {
        let removed = std::mem::take(&mut *self.slots.lock());
        for slot in removed {
            slot.live.store(false, Ordering::Release);
        }
    }

    fn len(&self) -> usize {
        self.slots.lock().len()
    }

    fn snapshot(&self) -> SmallVec<[Arc<Slot<H>>; 8]> {
        self.slots.lock().iter().cloned().collect()
    }
}

// ----------------------------------------------------------------------------
// Synchronous events
// ----------------------------------------------------------------------------

/// A synchronous multicast event.
///
/// Cloning an `Event` yields another handle to the same invocation list.
///
/// # Example
///
/// ```
/// use lattice_events::Event;
///
/// let changed = Event::<i32>::new();
/// changed.subscribe(|value| {
///     println!("value is now {value}");
///     Ok(())
/// });
/// changed.raise(&5).unwrap();
/// ```
pub struct Event<A> {
    registry: Arc<Registry<Handler<A>>>,
}

/// A non-owning reference to an [`Event`]'s invocation list.
pub(crate) struct WeakEvent<A> {
    registry: Weak<Registry<Handler<A>>>,
}

impl<A> WeakEvent<A> {
    pub(crate) fn unsubscribe(&self, id: HandlerId) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.remove(id))
            .unwrap_or(false)
    }
}

impl<A: 'static> Event<A> {
    /// Create an event with no handlers.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
        }
    }

    /// Subscribe a handler. Handlers run in subscription order.
    pub fn subscribe<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&A) -> EventResult + Send + Sync + 'static,
    {
        self.registry.add(Arc::new(handler))
    }

    pub(crate) fn subscribe_handler(&self, handler: Handler<A>) -> HandlerId {
        self.registry.add(handler)
    }

    /// Remove a handler. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.registry.remove(id)
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.registry.clear();
    }

    /// Invoke every subscribed handler in order.
    ///
    /// Stops at, and returns, the first handler error.
    pub fn raise(&self, args: &A) -> EventResult {
        for slot in self.registry.snapshot() {
            if slot.live.load(Ordering::Acquire) {
                (slot.handler)(args)?;
            }
        }
        Ok(())
    }

    /// Number of subscribed handlers.
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether there are no subscribed handlers.
    pub fn is_empty(&self) -> bool {
        self.handler_count() == 0
    }

    /// Start an observer chain rooted at this event.
    ///
    /// The chain stays subscribed until one of its nodes is disposed.
    pub fn observe(&self) -> Observer<A>
    where
        A: Send + Sync,
    {
        Observer::root(self)
    }

    pub(crate) fn downgrade(&self) -> WeakEvent<A> {
        WeakEvent {
            registry: Arc::downgrade(&self.registry),
        }
    }
}

impl Event<()> {
    /// Raise an event that carries no payload.
    pub fn fire(&self) -> EventResult {
        self.raise(&())
    }
}

impl<A: 'static> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<A> std::fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("handler_count", &self.registry.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Asynchronous events
// ----------------------------------------------------------------------------

/// An asynchronous multicast event.
///
/// Handlers receive an owned clone of the payload and return a future.
/// `raise` awaits each handler's future before invoking the next one.
pub struct AsyncEvent<A> {
    registry: Arc<Registry<AsyncHandler<A>>>,
}

pub(crate) struct WeakAsyncEvent<A> {
    registry: Weak<Registry<AsyncHandler<A>>>,
}

impl<A> WeakAsyncEvent<A> {
    pub(crate) fn unsubscribe(&self, id: HandlerId) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.remove(id))
            .unwrap_or(false)
    }
}

impl<A> AsyncEvent<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create an event with no handlers.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
        }
    }

    /// Subscribe an async handler.
    pub fn subscribe<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = EventResult> + Send + 'static,
    {
        self.registry.add(Arc::new(move |args| handler(args).boxed()))
    }

    pub(crate) fn subscribe_handler(&self, handler: AsyncHandler<A>) -> HandlerId {
        self.registry.add(handler)
    }

    /// Remove a handler. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.registry.remove(id)
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.registry.clear();
    }

    /// Invoke every subscribed handler in order, awaiting each in turn.
    ///
    /// Stops at, and returns, the first handler error.
    pub async fn raise(&self, args: A) -> EventResult {
        for slot in self.registry.snapshot() {
            if slot.live.load(Ordering::Acquire) {
                (slot.handler)(args.clone()).await?;
            }
        }
        Ok(())
    }

    /// Number of subscribed handlers.
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether there are no subscribed handlers.
    pub fn is_empty(&self) -> bool {
        self.handler_count() == 0
    }

    /// Start an async observer chain rooted at this event.
    pub fn observe(&self) -> AsyncObserver<A> {
        AsyncObserver::root(self)
    }

    pub(crate) fn downgrade(&self) -> WeakAsyncEvent<A> {
        WeakAsyncEvent {
            registry: Arc::downgrade(&self.registry),
        }
    }
}

impl AsyncEvent<()> {
    /// Raise an event that carries no payload.
    pub async fn fire(&self) -> EventResult {
        self.raise(()).await
    }
}

impl<A> Default for AsyncEvent<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for AsyncEvent<A> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<A> std::fmt::Debug for AsyncEvent<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncEvent")
            .field("handler_count", &self.registry.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EventError;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn handlers_run_in_subscription_order() {
        let event = Event::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..5 {
            let seen = seen.clone();
            event.subscribe(move |value| {
                seen.lock().push((tag, *value));
                Ok(())
            });
        }

        event.raise(&7).unwrap();
        assert_eq!(
            *seen.lock(),
            vec![(0, 7), (1, 7), (2, 7), (3, 7), (4, 7)]
        );
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let event = Event::<()>::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let id = event.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        event.fire().unwrap();
        assert!(event.unsubscribe(id));
        assert!(!event.unsubscribe(id));
        event.fire().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(event.is_empty());
    }

    #[test]
    fn handler_added_during_raise_waits_for_next_raise() {
        let event = Event::<()>::new();
        let late_calls = Arc::new(AtomicI32::new(0));

        let event_clone = event.clone();
        let late_clone = late_calls.clone();
        event.subscribe(move |_| {
            let late = late_clone.clone();
            event_clone.subscribe(move |_| {
                late.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        event.fire().unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        event.fire().unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_removed_during_raise_is_skipped() {
        let event = Event::<()>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let victim = Arc::new(Mutex::new(None::<HandlerId>));

        let event_clone = event.clone();
        let victim_clone = victim.clone();
        let seen_a = seen.clone();
        event.subscribe(move |_| {
            seen_a.lock().push("a");
            if let Some(id) = victim_clone.lock().take() {
                event_clone.unsubscribe(id);
            }
            Ok(())
        });

        let seen_b = seen.clone();
        let id_b = event.subscribe(move |_| {
            seen_b.lock().push("b");
            Ok(())
        });
        *victim.lock() = Some(id_b);

        let seen_c = seen.clone();
        event.subscribe(move |_| {
            seen_c.lock().push("c");
            Ok(())
        });

        event.fire().unwrap();
        assert_eq!(*seen.lock(), vec!["a", "c"]);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let event = Event::<()>::new();
        let own_id = Arc::new(Mutex::new(None::<HandlerId>));
        let count = Arc::new(AtomicI32::new(0));

        let event_clone = event.clone();
        let own_clone = own_id.clone();
        let count_clone = count.clone();
        let id = event.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *own_clone.lock() {
                event_clone.unsubscribe(id);
            }
            Ok(())
        });
        *own_id.lock() = Some(id);

        event.fire().unwrap();
        event.fire().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_error_stops_the_raise() {
        let event = Event::<()>::new();
        let after = Arc::new(AtomicI32::new(0));

        event.subscribe(|_| Err(EventError::msg("handler failed")));
        let after_clone = after.clone();
        event.subscribe(move |_| {
            after_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = event.fire().unwrap_err();
        assert_eq!(err.to_string(), "handler failed");
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sender_and_args_payload() {
        let event = Event::<(&'static str, u32)>::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();

        event.subscribe(move |(sender, args)| {
            *seen_clone.lock() = Some((*sender, *args));
            Ok(())
        });

        event.raise(&("button", 3)).unwrap();
        assert_eq!(*seen.lock(), Some(("button", 3)));
    }

    #[tokio::test]
    async fn async_handlers_are_awaited_in_order() {
        let event = AsyncEvent::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = seen.clone();
        event.subscribe(move |value| {
            let seen = seen_a.clone();
            async move {
                tokio::task::yield_now().await;
                seen.lock().push(("a", value));
                Ok(())
            }
        });
        let seen_b = seen.clone();
        event.subscribe(move |value| {
            let seen = seen_b.clone();
            async move {
                seen.lock().push(("b", value));
                Ok(())
            }
        });

        event.raise(9).await.unwrap();
        assert_eq!(*seen.lock(), vec![("a", 9), ("b", 9)]);
    }

    #[tokio::test]
    async fn async_error_aborts_remaining_handlers() {
        let event = AsyncEvent::<()>::new();
        let after = Arc::new(AtomicI32::new(0));

        event.subscribe(|_| async { Err(EventError::msg("nope")) });
        let after_clone = after.clone();
        event.subscribe(move |_| {
            let after = after_clone.clone();
            async move {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert!(event.fire().await.is_err());
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }
}
