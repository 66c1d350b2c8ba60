//! Asynchronous observer chains.
//!
//! [`AsyncObserver`] mirrors [`Observer`](super::Observer) for
//! [`AsyncEvent`] sources: every stage handler returns a future, and a
//! relay completes only once every downstream handler has finished.
//!
//! Two stages only make sense here. `limit` caps how many occurrences run
//! downstream at once, and `debounce` relays through a dispatcher after a
//! cancellable delay.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;

use super::limit::{LimitGate, LimitOptions};
use super::link::Link;
use super::narrow::Narrow;
use crate::cancel::{CancellationSource, CancellationToken};
use crate::disposable::Dispose;
use crate::dispatch::{Dispatcher, ErrorHandler};
use crate::error::{EventError, EventResult};
use crate::event::{AsyncEvent, AsyncHandler, Event, HandlerId};
use crate::lifecycle::Lifecycle;

pub(crate) struct AsyncStage<B> {
    out: AsyncEvent<B>,
    link: Arc<Link>,
}

impl<B> AsyncStage<B>
where
    B: Clone + Send + Sync + 'static,
{
    fn relay(&self, args: B) -> BoxFuture<'static, EventResult> {
        let out = self.out.clone();
        async move { out.raise(args).await }.boxed()
    }

    fn dispose(&self) {
        self.link.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.link.is_disposed()
    }
}

impl<B> Clone for AsyncStage<B> {
    fn clone(&self) -> Self {
        Self {
            out: self.out.clone(),
            link: Arc::clone(&self.link),
        }
    }
}

fn done() -> BoxFuture<'static, EventResult> {
    future::ready(Ok(())).boxed()
}

/// A node in an asynchronous observer chain.
///
/// Handles behave like [`Observer`](super::Observer) handles: cloning is
/// cheap, dropping never disposes, and disposal walks toward the source.
pub struct AsyncObserver<A> {
    link: Arc<Link>,
    event: AsyncEvent<A>,
}

impl<A> Clone for AsyncObserver<A> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
            event: self.event.clone(),
        }
    }
}

impl<A> std::fmt::Debug for AsyncObserver<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncObserver")
            .field("link", &self.link)
            .field("event", &self.event)
            .finish()
    }
}

impl<A> AsyncObserver<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub(crate) fn root(source: &AsyncEvent<A>) -> Self {
        let link = Link::root();
        let event = AsyncEvent::new();
        let relay = event.clone();
        let id = source.subscribe_handler(Arc::new(move |args: A| {
            let relay = relay.clone();
            async move { relay.raise(args).await }.boxed()
        }));
        let weak = source.downgrade();
        link.set_detach(move || {
            weak.unsubscribe(id);
        });
        Self { link, event }
    }

    /// Wrap a node whose subscription was set up elsewhere.
    pub(crate) fn from_parts(link: Arc<Link>, event: AsyncEvent<A>) -> Self {
        Self { link, event }
    }

    fn attach<B, F>(&self, build: F) -> AsyncObserver<B>
    where
        B: Clone + Send + Sync + 'static,
        F: FnOnce(AsyncStage<B>) -> AsyncHandler<A>,
    {
        let link = Link::child(&self.link);
        let event = AsyncEvent::new();
        let handler = build(AsyncStage {
            out: event.clone(),
            link: Arc::clone(&link),
        });
        let id = self.event.subscribe_handler(handler);
        let weak = self.event.downgrade();
        link.set_detach(move || {
            weak.unsubscribe(id);
        });
        AsyncObserver { link, event }
    }

    fn pass_through(&self) -> AsyncObserver<A> {
        self.attach(|stage| Arc::new(move |args: A| stage.relay(args)))
    }

    /// Subscribe an async handler to this node's relayed occurrences.
    pub fn subscribe<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EventResult> + Send + 'static,
    {
        self.event.subscribe(handler)
    }

    /// Remove a handler added with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.event.unsubscribe(id)
    }

    /// Relay only occurrences matching `predicate`.
    pub fn filter<P>(&self, predicate: P) -> AsyncObserver<A>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: A| {
                if predicate(&args) {
                    stage.relay(args)
                } else {
                    done()
                }
            })
        })
    }

    /// Relay only occurrences for which the async `predicate` resolves to `true`.
    pub fn filter_async<P, Fut>(&self, predicate: P) -> AsyncObserver<A>
    where
        P: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: A| {
                let keep = predicate(args.clone());
                let stage = stage.clone();
                async move {
                    if keep.await {
                        stage.relay(args).await
                    } else {
                        Ok(())
                    }
                }
                .boxed()
            })
        })
    }

    /// Relay a new payload computed from every occurrence.
    pub fn map<B, F>(&self, selector: F) -> AsyncObserver<B>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(&A) -> B + Send + Sync + 'static,
    {
        self.attach(move |stage| Arc::new(move |args: A| stage.relay(selector(&args))))
    }

    /// Relay the payload produced by an async, fallible `selector`.
    pub fn map_async<B, F, Fut>(&self, selector: F) -> AsyncObserver<B>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EventResult<B>> + Send + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: A| {
                let selected = selector(args);
                let stage = stage.clone();
                async move {
                    let value = selected.await?;
                    stage.relay(value).await
                }
                .boxed()
            })
        })
    }

    /// Relay the payloads `selector` maps to `Some`, dropping the rest.
    pub fn filter_map<B, F>(&self, selector: F) -> AsyncObserver<B>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(&A) -> Option<B> + Send + Sync + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: A| match selector(&args) {
                Some(narrowed) => stage.relay(narrowed),
                None => done(),
            })
        })
    }

    /// Relay only the occurrences whose payload narrows to `B`.
    pub fn of_type<B>(&self) -> AsyncObserver<B>
    where
        A: Narrow<B>,
        B: Clone + Send + Sync + 'static,
    {
        self.filter_map(|args: &A| Narrow::<B>::narrow(args))
    }

    /// Run `callback` for every occurrence, then relay it.
    pub fn for_each<F>(&self, callback: F) -> AsyncObserver<A>
    where
        F: Fn(&A) -> EventResult + Send + Sync + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: A| match callback(&args) {
                Ok(()) => stage.relay(args),
                Err(err) => future::ready(Err(err)).boxed(),
            })
        })
    }

    /// Await `callback` for every occurrence, then relay it.
    pub fn for_each_async<F, Fut>(&self, callback: F) -> AsyncObserver<A>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EventResult> + Send + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: A| {
                let side_effect = callback(args.clone());
                let stage = stage.clone();
                async move {
                    side_effect.await?;
                    stage.relay(args).await
                }
                .boxed()
            })
        })
    }

    /// Intercept errors raised further down the chain.
    ///
    /// `handler` returns `true` to swallow the error and `false` to let the
    /// same error continue toward the raiser.
    pub fn catch<F>(&self, handler: F) -> AsyncObserver<A>
    where
        F: Fn(&EventError) -> bool + Send + Sync + 'static,
    {
        self.try_catch(move |err| Ok(handler(err)))
    }

    /// Like [`catch`](Self::catch) with a handler that may fail; its error
    /// passes this node untouched.
    pub fn try_catch<F>(&self, handler: F) -> AsyncObserver<A>
    where
        F: Fn(&EventError) -> EventResult<bool> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.attach(move |stage| {
            Arc::new(move |args: A| {
                let relay = stage.relay(args);
                let handler = Arc::clone(&handler);
                async move {
                    match relay.await {
                        Ok(()) => Ok(()),
                        Err(err) => {
                            if handler(&err)? {
                                Ok(())
                            } else {
                                Err(err)
                            }
                        }
                    }
                }
                .boxed()
            })
        })
    }

    /// Dispose the chain the first time `predicate` matches.
    ///
    /// With `continue_on_dispose`, the matching occurrence is still relayed
    /// before the chain is torn down.
    pub fn dispose_if<P>(&self, predicate: P, continue_on_dispose: bool) -> AsyncObserver<A>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: A| {
                if !predicate(&args) {
                    return stage.relay(args);
                }
                let stage = stage.clone();
                async move {
                    let result = if continue_on_dispose {
                        stage.relay(args).await
                    } else {
                        Ok(())
                    };
                    stage.dispose();
                    result
                }
                .boxed()
            })
        })
    }

    /// Pass occurrences through until `lifecycle` ends, then dispose.
    pub fn on(&self, lifecycle: &dyn Lifecycle) -> AsyncObserver<A> {
        let node = self.pass_through();
        node.link.bind_lifecycle(lifecycle);
        node
    }

    /// Pass occurrences through until `token` is cancelled, then dispose.
    pub fn until(&self, token: &CancellationToken) -> AsyncObserver<A> {
        let node = self.pass_through();
        node.link.bind_cancellation(token);
        node
    }

    /// Cap how many occurrences run downstream at the same time.
    ///
    /// Occurrences over the cap wait in FIFO order while the buffer has
    /// room and are dropped otherwise. Invalid options are rejected here,
    /// before any occurrence arrives.
    pub fn limit(&self, options: LimitOptions) -> EventResult<AsyncObserver<A>> {
        let gate = Arc::new(LimitGate::new(options)?);
        Ok(self.attach(move |stage| {
            Arc::new(move |args: A| {
                let gate = Arc::clone(&gate);
                let stage = stage.clone();
                async move {
                    let Some(_permit) = gate.admit().await else {
                        return Ok(());
                    };
                    stage.relay(args).await
                }
                .boxed()
            })
        }))
    }

    /// Relay only the last occurrence of each burst, `delay` after it.
    ///
    /// Each occurrence cancels the delay started by the previous one. The
    /// delay and relay run on `dispatcher`; a relay that has already begun
    /// is not interrupted by later occurrences.
    pub fn debounce(&self, delay: Duration, dispatcher: Arc<dyn Dispatcher>) -> AsyncObserver<A> {
        self.debounce_inner(delay, dispatcher, None)
    }

    /// Like [`debounce`](Self::debounce), sending relay errors to `on_error`.
    pub fn debounce_with(
        &self,
        delay: Duration,
        dispatcher: Arc<dyn Dispatcher>,
        on_error: ErrorHandler,
    ) -> AsyncObserver<A> {
        self.debounce_inner(delay, dispatcher, Some(on_error))
    }

    fn debounce_inner(
        &self,
        delay: Duration,
        dispatcher: Arc<dyn Dispatcher>,
        on_error: Option<ErrorHandler>,
    ) -> AsyncObserver<A> {
        let pending: Arc<Mutex<Option<CancellationSource>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&pending);
        let node = self.attach(move |stage| {
            Arc::new(move |args: A| {
                let source = CancellationSource::new();
                let token = source.token();
                let previous = slot.lock().replace(source);
                if let Some(previous) = previous {
                    previous.cancel();
                }

                let stage = stage.clone();
                dispatcher.run(
                    async move {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        if stage.is_disposed() {
                            return Ok(());
                        }
                        stage.relay(args).await
                    }
                    .boxed(),
                    None,
                    on_error.clone(),
                );
                done()
            })
        });
        node.link.on_disposed(move || {
            let previous = pending.lock().take();
            if let Some(previous) = previous {
                previous.cancel();
            }
        });
        node
    }

    /// Pass occurrences through and expose a notification for when this
    /// node is disposed.
    pub fn dispose_listener(&self) -> AsyncDisposeListener<A> {
        let observer = self.pass_through();
        let disposed = Event::<()>::new();
        let notify = disposed.clone();
        observer.link.on_disposed(move || {
            if let Err(err) = notify.fire() {
                tracing::error!(
                    target: "lattice_events::chain",
                    error = %err,
                    "disposed handler failed"
                );
            }
        });
        AsyncDisposeListener { observer, disposed }
    }
}

impl<A> Dispose for AsyncObserver<A> {
    fn dispose(&self) {
        self.link.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.link.is_disposed()
    }
}

/// An async pass-through node that reports its own disposal.
#[derive(Clone)]
pub struct AsyncDisposeListener<A> {
    observer: AsyncObserver<A>,
    disposed: Event<()>,
}

impl<A> AsyncDisposeListener<A> {
    /// The pass-through node, for continuing the chain.
    pub fn observer(&self) -> &AsyncObserver<A> {
        &self.observer
    }

    /// Raised once, after the node has been disposed.
    pub fn disposed(&self) -> &Event<()> {
        &self.disposed
    }

    /// Discard the notification and keep the node.
    pub fn into_observer(self) -> AsyncObserver<A> {
        self.observer
    }
}

impl<A> Dispose for AsyncDisposeListener<A> {
    fn dispose(&self) {
        self.observer.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.observer.is_disposed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::limit::BufferLimit;
    use crate::dispatch::TokioDispatcher;
    use crate::lifecycle::Lifetime;
    use std::sync::atomic::{AtomicI32, Ordering};
    use tokio::sync::Notify;

    #[tokio::test]
    async fn filter_map_and_for_each_compose() {
        let source = AsyncEvent::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let _chain = source
            .observe()
            .filter_async(|v| async move { v > 1 })
            .map(|v| v * 10)
            .for_each(move |v| {
                sink.lock().push(*v);
                Ok(())
            });

        for v in 0..4 {
            source.raise(v).await.unwrap();
        }
        assert_eq!(*seen.lock(), vec![20, 30]);
    }

    #[tokio::test]
    async fn catch_sees_downstream_error_once() {
        let source = AsyncEvent::<()>::new();
        let caught = Arc::new(AtomicI32::new(0));
        let caught_clone = caught.clone();

        let _chain = source
            .observe()
            .catch(move |_| {
                caught_clone.fetch_add(1, Ordering::SeqCst);
                false
            })
            .for_each_async(|_| async { Err(EventError::msg("async failure")) });

        let err = source.fire().await.unwrap_err();
        assert_eq!(err.to_string(), "async failure");
        assert_eq!(caught.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispose_if_unsubscribes_source() {
        let source = AsyncEvent::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let _chain = source
            .observe()
            .dispose_if(|v| *v == 2, true)
            .for_each(move |v| {
                sink.lock().push(*v);
                Ok(())
            });

        for v in 1..=3 {
            source.raise(v).await.unwrap();
        }
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn on_lifecycle_disposes_chain() {
        let source = AsyncEvent::<i32>::new();
        let lifetime = Lifetime::new();
        let chain = source.observe().on(&lifetime);

        assert_eq!(source.handler_count(), 1);
        lifetime.end().unwrap();

        assert!(chain.is_disposed());
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn limit_drops_when_busy_and_buffer_is_empty() {
        let source = AsyncEvent::<u32>::new();
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let release_clone = release.clone();
        let started_clone = started.clone();
        let sink = seen.clone();
        let _chain = source
            .observe()
            .limit(LimitOptions::new(1, BufferLimit::Bounded(0)))
            .unwrap()
            .for_each_async(move |v| {
                let release = release_clone.clone();
                let started = started_clone.clone();
                let sink = sink.clone();
                async move {
                    sink.lock().push(v);
                    if v == 1 {
                        started.notify_one();
                        release.notified().await;
                    }
                    Ok(())
                }
            });

        let first = tokio::spawn({
            let source = source.clone();
            async move { source.raise(1).await }
        });
        started.notified().await;

        source.raise(2).await.unwrap();
        release.notify_one();
        first.await.unwrap().unwrap();

        source.raise(3).await.unwrap();
        assert_eq!(*seen.lock(), vec![1, 3]);
    }

    #[tokio::test]
    async fn limit_buffers_in_wait_order() {
        let source = AsyncEvent::<u32>::new();
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let release_clone = release.clone();
        let started_clone = started.clone();
        let sink = seen.clone();
        let _chain = source
            .observe()
            .limit(LimitOptions::new(1, BufferLimit::Unlimited))
            .unwrap()
            .for_each_async(move |v| {
                let release = release_clone.clone();
                let started = started_clone.clone();
                let sink = sink.clone();
                async move {
                    sink.lock().push(v);
                    if v == 1 {
                        started.notify_one();
                        release.notified().await;
                    }
                    Ok(())
                }
            });

        let first = tokio::spawn({
            let source = source.clone();
            async move { source.raise(1).await }
        });
        started.notified().await;

        let mut queued = Vec::new();
        for v in 2..=4 {
            let source = source.clone();
            queued.push(tokio::spawn(async move { source.raise(v).await }));
            tokio::task::yield_now().await;
        }

        release.notify_one();
        first.await.unwrap().unwrap();
        for handle in queued {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*seen.lock(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn limit_drops_beyond_bounded_buffer() {
        let source = AsyncEvent::<u32>::new();
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let release_clone = release.clone();
        let started_clone = started.clone();
        let sink = seen.clone();
        let _chain = source
            .observe()
            .limit(LimitOptions::new(1, BufferLimit::Bounded(1)))
            .unwrap()
            .for_each_async(move |v| {
                let release = release_clone.clone();
                let started = started_clone.clone();
                let sink = sink.clone();
                async move {
                    sink.lock().push(v);
                    if v == 1 {
                        started.notify_one();
                        release.notified().await;
                    }
                    Ok(())
                }
            });

        let first = tokio::spawn({
            let source = source.clone();
            async move { source.raise(1).await }
        });
        started.notified().await;

        // Takes the only buffer slot.
        let second = tokio::spawn({
            let source = source.clone();
            async move { source.raise(2).await }
        });
        tokio::task::yield_now().await;

        // Buffer full: dropped without waiting.
        source.raise(3).await.unwrap();

        release.notify_one();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn limit_rejects_zero_concurrency() {
        let source = AsyncEvent::<u32>::new();
        let result = source
            .observe()
            .limit(LimitOptions::new(0, BufferLimit::Unlimited));
        assert!(matches!(result, Err(EventError::InvalidArgument { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_relays_last_of_burst() {
        let source = AsyncEvent::<u32>::new();
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(TokioDispatcher::current());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let _chain = source
            .observe()
            .debounce(Duration::from_millis(100), dispatcher)
            .for_each(move |v| {
                sink.lock().push(*v);
                Ok(())
            });

        for v in 1..=3 {
            source.raise(v).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*seen.lock(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn disposing_debounce_cancels_pending_relay() {
        let source = AsyncEvent::<u32>::new();
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(TokioDispatcher::current());
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let chain = source
            .observe()
            .debounce(Duration::from_millis(50), dispatcher)
            .for_each(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        source.raise(1).await.unwrap();
        chain.dispose();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
