//! Teardown records for chain nodes.
//!
//! Every node in an observer chain owns one [`Link`]. A link knows how to
//! detach its node from the parent's event and holds the only strong
//! reference to the parent's link, so disposal walks from any node toward
//! the root, where the final detach unsubscribes from the event source.
//!
//! Links never reference events strongly. Relay closures point forward
//! (parent event -> child event) and links point backward (child link ->
//! parent link), so a chain never forms a reference cycle through its
//! links.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancel::CancellationToken;
use crate::lifecycle::Lifecycle;

type Hook = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Link {
    id: u64,
    disposed: AtomicBool,
    parent: Mutex<Option<Arc<Link>>>,
    detach: Mutex<Option<Hook>>,
    on_disposed: Mutex<Vec<Hook>>,
}

fn next_link_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

impl Link {
    /// A link with no parent; the first node of a chain.
    pub(crate) fn root() -> Arc<Self> {
        Self::with_parent(None)
    }

    /// A link whose disposal also disposes `parent`.
    pub(crate) fn child(parent: &Arc<Link>) -> Arc<Self> {
        Self::with_parent(Some(Arc::clone(parent)))
    }

    fn with_parent(parent: Option<Arc<Link>>) -> Arc<Self> {
        Arc::new(Self {
            id: next_link_id(),
            disposed: AtomicBool::new(false),
            parent: Mutex::new(parent),
            detach: Mutex::new(None),
            on_disposed: Mutex::new(Vec::new()),
        })
    }

    /// Set the action that unsubscribes this node from its parent.
    ///
    /// Runs immediately if the link is already disposed.
    pub(crate) fn set_detach<F>(&self, detach: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut slot = self.detach.lock();
            if !self.is_disposed() {
                *slot = Some(Box::new(detach));
                return;
            }
        }
        detach();
    }

    /// Register an action to run after this link is fully disposed.
    ///
    /// Runs immediately if the link is already disposed.
    pub(crate) fn on_disposed<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut hooks = self.on_disposed.lock();
            if !self.is_disposed() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Detach from the parent, dispose the parent, then run disposal hooks.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::trace!(target: "lattice_events::chain", link = self.id, "disposing chain node");

        let detach = self.detach.lock().take();
        if let Some(detach) = detach {
            detach();
        }

        let parent = self.parent.lock().take();
        if let Some(parent) = parent {
            parent.dispose();
        }

        let hooks = std::mem::take(&mut *self.on_disposed.lock());
        for hook in hooks {
            hook();
        }
    }

    /// Dispose this link when `lifecycle` ends; stop listening once disposed.
    pub(crate) fn bind_lifecycle(self: &Arc<Self>, lifecycle: &dyn Lifecycle) {
        if lifecycle.is_disposed() {
            self.dispose();
            return;
        }

        let target = Arc::clone(self);
        let id = lifecycle.disposed().subscribe(move |_| {
            target.dispose();
            Ok(())
        });
        let weak = lifecycle.disposed().downgrade();
        self.on_disposed(move || {
            weak.unsubscribe(id);
        });

        // The lifecycle may have ended between the check and the subscription.
        if lifecycle.is_disposed() {
            self.dispose();
        }
    }

    /// Dispose this link when `token` is cancelled; unregister once disposed.
    pub(crate) fn bind_cancellation(self: &Arc<Self>, token: &CancellationToken) {
        let target = Arc::clone(self);
        let registration = token.register(move || target.dispose());
        self.on_disposed(move || {
            registration.unregister();
        });
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
