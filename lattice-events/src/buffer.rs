//! Keyed deferred actions.
//!
//! An [`ActionBuffer`] collects at most one action per key and runs them all
//! on [`flush`](ActionBuffer::flush). Replacing an action keeps the key's
//! original position, so actions run in the order their keys were first
//! seen.

use std::hash::Hash;

use indexmap::IndexMap;
use parking_lot::Mutex;

type Action = Box<dyn FnOnce() + Send + 'static>;

/// A queue of deferred actions, one per key, in first-seen key order.
///
/// # Example
///
/// ```rust
/// use lattice_events::ActionBuffer;
/// use std::sync::{Arc, Mutex};
///
/// let buffer = ActionBuffer::new();
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// for (key, label) in [("x", "A"), ("y", "B"), ("x", "C")] {
///     let log = log.clone();
///     buffer.add_or_replace(key, move || log.lock().unwrap().push(label));
/// }
/// buffer.flush();
///
/// assert_eq!(*log.lock().unwrap(), vec!["C", "B"]);
/// ```
pub struct ActionBuffer<K> {
    actions: Mutex<IndexMap<K, Action>>,
}

impl<K: Hash + Eq> ActionBuffer<K> {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(IndexMap::new()),
        }
    }

    /// Queue `action` under `key`, replacing any action already queued for
    /// it in place.
    ///
    /// Returns `true` if the key was not already queued.
    pub fn add_or_replace<F>(&self, key: K, action: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut actions = self.actions.lock();
        match actions.get_mut(&key) {
            Some(slot) => {
                *slot = Box::new(action);
                false
            }
            None => {
                actions.insert(key, Box::new(action));
                true
            }
        }
    }

    /// Drop the action queued under `key` without running it.
    pub fn remove(&self, key: &K) -> bool {
        self.actions.lock().shift_remove(key).is_some()
    }

    /// Whether an action is queued under `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.actions.lock().contains_key(key)
    }

    /// Number of queued actions.
    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    /// Whether no action is queued.
    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }

    /// Run every queued action in first-seen key order.
    ///
    /// The buffer is emptied before the first action runs; actions queued
    /// while flushing wait for the next flush.
    pub fn flush(&self) {
        let actions = std::mem::take(&mut *self.actions.lock());
        if actions.is_empty() {
            return;
        }
        tracing::trace!(target: "lattice_events::buffer", count = actions.len(), "flushing actions");
        for (_, action) in actions {
            action();
        }
    }
}

impl<K: Hash + Eq> Default for ActionBuffer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for ActionBuffer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionBuffer")
            .field("len", &self.actions.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn push(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> impl FnOnce() + Send {
        let log = log.clone();
        move || log.lock().push(label)
    }

    #[test]
    fn replacement_keeps_first_position() {
        let buffer = ActionBuffer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        assert!(buffer.add_or_replace("x", push(&log, "A")));
        assert!(buffer.add_or_replace("y", push(&log, "B")));
        assert!(!buffer.add_or_replace("x", push(&log, "C")));
        assert_eq!(buffer.len(), 2);

        buffer.flush();
        assert_eq!(*log.lock(), vec!["C", "B"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn actions_added_during_flush_wait_for_next_flush() {
        let buffer = Arc::new(ActionBuffer::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_buffer = buffer.clone();
        let inner_log = log.clone();
        buffer.add_or_replace("outer", move || {
            inner_log.lock().push("outer");
            let log = inner_log.clone();
            inner_buffer.add_or_replace("later", move || log.lock().push("later"));
        });

        buffer.flush();
        assert_eq!(*log.lock(), vec!["outer"]);
        assert!(buffer.contains(&"later"));

        buffer.flush();
        assert_eq!(*log.lock(), vec!["outer", "later"]);
    }

    #[test]
    fn removed_actions_do_not_run() {
        let buffer = ActionBuffer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        buffer.add_or_replace(1, push(&log, "one"));
        buffer.add_or_replace(2, push(&log, "two"));
        buffer.add_or_replace(3, push(&log, "three"));
        assert!(buffer.remove(&2));
        assert!(!buffer.remove(&2));

        buffer.flush();
        assert_eq!(*log.lock(), vec!["one", "three"]);
    }
}
