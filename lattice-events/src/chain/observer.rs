//! Synchronous observer chains.
//!
//! An [`Observer`] is one node in a chain built on top of an [`Event`].
//! Each operator method creates a child node that subscribes to this
//! node's relay event, decides what to do with every occurrence, and
//! relays (possibly transformed) occurrences to its own subscribers.
//!
//! Returning without relaying stops propagation for that occurrence only;
//! the node stays subscribed.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use super::async_observer::AsyncObserver;
use super::link::Link;
use super::narrow::Narrow;
use crate::cancel::CancellationToken;
use crate::debounce::Debouncer;
use crate::disposable::Dispose;
use crate::dispatch::{Dispatcher, ErrorHandler};
use crate::error::{EventError, EventResult};
use crate::event::{AsyncEvent, Event, Handler, HandlerId};
use crate::lifecycle::Lifecycle;

/// The downstream side of a node, as seen from inside its handler.
pub(crate) struct Stage<B> {
    out: Event<B>,
    link: Arc<Link>,
}

impl<B: 'static> Stage<B> {
    fn relay(&self, args: &B) -> EventResult {
        self.out.raise(args)
    }

    fn dispose(&self) {
        self.link.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.link.is_disposed()
    }
}

impl<B> Clone for Stage<B> {
    fn clone(&self) -> Self {
        Self {
            out: self.out.clone(),
            link: Arc::clone(&self.link),
        }
    }
}

/// A node in a synchronous observer chain.
///
/// Cloning yields another handle to the same node. Dropping handles never
/// disposes the chain; call [`dispose`](Dispose::dispose) on any node to
/// unsubscribe the whole path back to the event source.
///
/// # Example
///
/// ```
/// use lattice_events::{Dispose, Event};
///
/// let clicks = Event::<u32>::new();
/// let chain = clicks
///     .observe()
///     .filter(|count| *count > 1)
///     .map(|count| format!("{count} clicks"))
///     .for_each(|label| {
///         println!("{label}");
///         Ok(())
///     });
///
/// clicks.raise(&2).unwrap();
/// chain.dispose();
/// assert!(clicks.is_empty());
/// ```
pub struct Observer<A> {
    link: Arc<Link>,
    event: Event<A>,
}

impl<A> Clone for Observer<A> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
            event: self.event.clone(),
        }
    }
}

impl<A> std::fmt::Debug for Observer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("link", &self.link)
            .field("event", &self.event)
            .finish()
    }
}

impl<A> Observer<A>
where
    A: Send + Sync + 'static,
{
    /// Subscribe the first node of a chain to `source`.
    pub(crate) fn root(source: &Event<A>) -> Self {
        let link = Link::root();
        let event = Event::new();
        let relay = event.clone();
        let id = source.subscribe(move |args| relay.raise(args));
        let weak = source.downgrade();
        link.set_detach(move || {
            weak.unsubscribe(id);
        });
        Self { link, event }
    }

    /// Attach a child node whose handler is produced by `build`.
    fn attach<B, F>(&self, build: F) -> Observer<B>
    where
        B: Send + Sync + 'static,
        F: FnOnce(Stage<B>) -> Handler<A>,
    {
        let link = Link::child(&self.link);
        let event = Event::new();
        let handler = build(Stage {
            out: event.clone(),
            link: Arc::clone(&link),
        });
        let id = self.event.subscribe_handler(handler);
        let weak = self.event.downgrade();
        link.set_detach(move || {
            weak.unsubscribe(id);
        });
        Observer { link, event }
    }

    /// Attach a same-typed child that relays whenever `hook` returns `true`.
    fn pass<H>(&self, hook: H) -> Observer<A>
    where
        H: Fn(&A) -> EventResult<bool> + Send + Sync + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: &A| {
                if hook(args)? {
                    stage.relay(args)
                } else {
                    Ok(())
                }
            })
        })
    }

    /// Subscribe a handler to this node's relayed occurrences.
    pub fn subscribe<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&A) -> EventResult + Send + Sync + 'static,
    {
        self.event.subscribe(handler)
    }

    /// Remove a handler added with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.event.unsubscribe(id)
    }

    /// Relay only occurrences matching `predicate`.
    pub fn filter<P>(&self, predicate: P) -> Observer<A>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.pass(move |args| Ok(predicate(args)))
    }

    /// Relay a new payload computed from every occurrence.
    pub fn map<B, F>(&self, selector: F) -> Observer<B>
    where
        B: Send + Sync + 'static,
        F: Fn(&A) -> B + Send + Sync + 'static,
    {
        self.attach(move |stage| Arc::new(move |args: &A| stage.relay(&selector(args))))
    }

    /// Like [`map`](Self::map) with a selector that may fail.
    pub fn try_map<B, F>(&self, selector: F) -> Observer<B>
    where
        B: Send + Sync + 'static,
        F: Fn(&A) -> EventResult<B> + Send + Sync + 'static,
    {
        self.attach(move |stage| Arc::new(move |args: &A| stage.relay(&selector(args)?)))
    }

    /// Relay the payloads `selector` maps to `Some`, dropping the rest.
    pub fn filter_map<B, F>(&self, selector: F) -> Observer<B>
    where
        B: Send + Sync + 'static,
        F: Fn(&A) -> Option<B> + Send + Sync + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: &A| match selector(args) {
                Some(narrowed) => stage.relay(&narrowed),
                None => Ok(()),
            })
        })
    }

    /// Relay only the occurrences whose payload narrows to `B`.
    ///
    /// Payloads that do not narrow are dropped silently.
    pub fn of_type<B>(&self) -> Observer<B>
    where
        A: Narrow<B>,
        B: Send + Sync + 'static,
    {
        self.filter_map(|args: &A| Narrow::<B>::narrow(args))
    }

    /// Run `callback` for every occurrence, then relay it.
    ///
    /// An error from the callback stops the occurrence and propagates.
    pub fn for_each<F>(&self, callback: F) -> Observer<A>
    where
        F: Fn(&A) -> EventResult + Send + Sync + 'static,
    {
        self.pass(move |args| {
            callback(args)?;
            Ok(true)
        })
    }

    /// Intercept errors raised further down the chain.
    ///
    /// `handler` returns `true` to swallow the error and `false` to let the
    /// same error continue toward the raiser.
    pub fn catch<F>(&self, handler: F) -> Observer<A>
    where
        F: Fn(&EventError) -> bool + Send + Sync + 'static,
    {
        self.try_catch(move |err| Ok(handler(err)))
    }

    /// Like [`catch`](Self::catch) with a handler that may fail.
    ///
    /// An error returned by `handler` replaces the caught error and passes
    /// this node untouched.
    pub fn try_catch<F>(&self, handler: F) -> Observer<A>
    where
        F: Fn(&EventError) -> EventResult<bool> + Send + Sync + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: &A| match stage.relay(args) {
                Ok(()) => Ok(()),
                Err(err) => {
                    if handler(&err)? {
                        Ok(())
                    } else {
                        Err(err)
                    }
                }
            })
        })
    }

    /// Dispose the chain the first time `predicate` matches.
    ///
    /// With `continue_on_dispose`, the matching occurrence is still relayed
    /// before the chain is torn down.
    pub fn dispose_if<P>(&self, predicate: P, continue_on_dispose: bool) -> Observer<A>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.attach(move |stage| {
            Arc::new(move |args: &A| {
                if !predicate(args) {
                    return stage.relay(args);
                }
                let result = if continue_on_dispose {
                    stage.relay(args)
                } else {
                    Ok(())
                };
                stage.dispose();
                result
            })
        })
    }

    /// Pass occurrences through until `lifecycle` ends, then dispose.
    pub fn on(&self, lifecycle: &dyn Lifecycle) -> Observer<A> {
        let node = self.pass(|_| Ok(true));
        node.link.bind_lifecycle(lifecycle);
        node
    }

    /// Pass occurrences through until `token` is cancelled, then dispose.
    pub fn until(&self, token: &CancellationToken) -> Observer<A> {
        let node = self.pass(|_| Ok(true));
        node.link.bind_cancellation(token);
        node
    }

    /// Relay only the last occurrence of each burst, `delay` after it.
    ///
    /// The relay runs on `dispatcher`; relay errors are reported by the
    /// dispatcher.
    pub fn debounce(&self, delay: Duration, dispatcher: Arc<dyn Dispatcher>) -> Observer<A>
    where
        A: Clone,
    {
        self.debounce_inner(delay, dispatcher, None)
    }

    /// Like [`debounce`](Self::debounce), sending relay errors to `on_error`.
    pub fn debounce_with(
        &self,
        delay: Duration,
        dispatcher: Arc<dyn Dispatcher>,
        on_error: ErrorHandler,
    ) -> Observer<A>
    where
        A: Clone,
    {
        self.debounce_inner(delay, dispatcher, Some(on_error))
    }

    fn debounce_inner(
        &self,
        delay: Duration,
        dispatcher: Arc<dyn Dispatcher>,
        on_error: Option<ErrorHandler>,
    ) -> Observer<A>
    where
        A: Clone,
    {
        let debouncer = Arc::new(Debouncer::new());
        let pending = Arc::clone(&debouncer);
        let node = self.attach(move |stage| {
            Arc::new(move |args: &A| {
                let args = args.clone();
                let stage = stage.clone();
                let relay = move || {
                    if stage.is_disposed() {
                        return Ok(());
                    }
                    stage.relay(&args)
                };
                match &on_error {
                    Some(on_error) => pending.debounce_with(
                        relay,
                        delay,
                        dispatcher.as_ref(),
                        Arc::clone(on_error),
                    ),
                    None => pending.debounce(relay, delay, dispatcher.as_ref()),
                }
                Ok(())
            })
        });
        node.link.on_disposed(move || debouncer.cancel());
        node
    }

    /// Continue the chain asynchronously.
    ///
    /// Every occurrence is cloned and relayed through `dispatcher`; the
    /// raiser does not wait for the async part of the chain. Errors from
    /// the async part are reported by the dispatcher.
    pub fn to_async(&self, dispatcher: Arc<dyn Dispatcher>) -> AsyncObserver<A>
    where
        A: Clone,
    {
        self.to_async_inner(dispatcher, None)
    }

    /// Like [`to_async`](Self::to_async), sending errors to `on_error`.
    pub fn to_async_with(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        on_error: ErrorHandler,
    ) -> AsyncObserver<A>
    where
        A: Clone,
    {
        self.to_async_inner(dispatcher, Some(on_error))
    }

    fn to_async_inner(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        on_error: Option<ErrorHandler>,
    ) -> AsyncObserver<A>
    where
        A: Clone,
    {
        let link = Link::child(&self.link);
        let out = AsyncEvent::<A>::new();
        let relay = out.clone();
        let id = self.event.subscribe(move |args: &A| {
            let relay = relay.clone();
            let args = args.clone();
            dispatcher.run(
                async move { relay.raise(args).await }.boxed(),
                None,
                on_error.clone(),
            );
            Ok(())
        });
        let weak = self.event.downgrade();
        link.set_detach(move || {
            weak.unsubscribe(id);
        });
        AsyncObserver::from_parts(link, out)
    }

    /// Pass occurrences through and expose a notification for when this
    /// node is disposed, whichever node started the disposal.
    pub fn dispose_listener(&self) -> DisposeListener<A> {
        let observer = self.pass(|_| Ok(true));
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
        DisposeListener { observer, disposed }
    }
}

impl<A> Dispose for Observer<A> {
    fn dispose(&self) {
        self.link.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.link.is_disposed()
    }
}

/// A pass-through node that reports its own disposal.
#[derive(Clone)]
pub struct DisposeListener<A> {
    observer: Observer<A>,
    disposed: Event<()>,
}

impl<A> DisposeListener<A> {
    /// The pass-through node, for continuing the chain.
    pub fn observer(&self) -> &Observer<A> {
        &self.observer
    }

    /// Raised once, after the node has been disposed.
    pub fn disposed(&self) -> &Event<()> {
        &self.disposed
    }

    /// Discard the notification and keep the node.
    pub fn into_observer(self) -> Observer<A> {
        self.observer
    }
}

impl<A> Dispose for DisposeListener<A> {
    fn dispose(&self) {
        self.observer.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.observer.is_disposed()
    }
}
