//! Derived and mapped property index.
//!
//! A [`PropertyIndex`] records which properties depend on which. When a
//! batch of source properties changes, it yields every dependent
//! `(owner, property)` pair exactly once, in the order the pairs were first
//! registered, however many of the changed sources they depend on.

use std::hash::Hash;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use crate::error::EventResult;

/// Source-name-indexed sets of `(owner, dependent property)` pairs.
pub struct PropertyIndex<O> {
    dependents: RwLock<IndexMap<Arc<str>, IndexSet<(O, Arc<str>)>>>,
}

impl<O> PropertyIndex<O>
where
    O: Clone + Eq + Hash,
{
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            dependents: RwLock::new(IndexMap::new()),
        }
    }

    /// Record that `owner.dependent` changes whenever `source` changes.
    ///
    /// Returns `false` if the pair was already registered for `source`.
    pub fn register(&self, source: &str, owner: O, dependent: &str) -> bool {
        self.dependents
            .write()
            .entry(Arc::from(source))
            .or_default()
            .insert((owner, Arc::from(dependent)))
    }

    /// Forget every pair registered for `owner`.
    pub fn unregister_owner(&self, owner: &O) {
        let mut dependents = self.dependents.write();
        for entry in dependents.values_mut() {
            entry.retain(|(registered, _)| registered != owner);
        }
        dependents.retain(|_, entry| !entry.is_empty());
    }

    /// Every pair that depends on any of `sources`, without duplicates.
    pub fn dependents_of<I, S>(&self, sources: I) -> Vec<(O, Arc<str>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dependents = self.dependents.read();
        let mut found: IndexSet<(O, Arc<str>)> = IndexSet::new();
        for source in sources {
            if let Some(entry) = dependents.get(source.as_ref()) {
                found.extend(entry.iter().cloned());
            }
        }
        found.into_iter().collect()
    }

    /// Call `notify` once for each dependent of the changed `sources`.
    ///
    /// Stops at the first error. The index is not locked while `notify`
    /// runs, so it may register or unregister pairs.
    pub fn notify_changed<I, S, F>(&self, sources: I, mut notify: F) -> EventResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnMut(&O, &str) -> EventResult,
    {
        for (owner, dependent) in self.dependents_of(sources) {
            notify(&owner, &dependent)?;
        }
        Ok(())
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.dependents.read().is_empty()
    }
}

impl<O> Default for PropertyIndex<O>
where
    O: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<O> std::fmt::Debug for PropertyIndex<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyIndex")
            .field("sources", &self.dependents.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EventError;

    fn names(pairs: Vec<(u32, Arc<str>)>) -> Vec<(u32, String)> {
        pairs
            .into_iter()
            .map(|(owner, name)| (owner, name.to_string()))
            .collect()
    }

    #[test]
    fn shared_dependent_fires_once() {
        let index = PropertyIndex::new();
        index.register("first_name", 1, "full_name");
        index.register("last_name", 1, "full_name");
        index.register("last_name", 1, "initials");

        let found = index.dependents_of(["first_name", "last_name"]);
        assert_eq!(
            names(found),
            vec![(1, "full_name".to_string()), (1, "initials".to_string())]
        );
    }

    #[test]
    fn owners_are_distinct() {
        let index = PropertyIndex::new();
        assert!(index.register("price", 1, "total"));
        assert!(index.register("price", 2, "total"));
        assert!(!index.register("price", 1, "total"));

        assert_eq!(index.dependents_of(["price"]).len(), 2);
    }

    #[test]
    fn unknown_sources_yield_nothing() {
        let index: PropertyIndex<u32> = PropertyIndex::new();
        assert!(index.dependents_of(["missing"]).is_empty());
    }

    #[test]
    fn unregister_owner_removes_its_pairs() {
        let index = PropertyIndex::new();
        index.register("a", 1, "x");
        index.register("a", 2, "y");
        index.register("b", 1, "z");

        index.unregister_owner(&1);

        assert_eq!(names(index.dependents_of(["a", "b"])), vec![(2, "y".to_string())]);
        index.unregister_owner(&2);
        assert!(index.is_empty());
    }

    #[test]
    fn notify_stops_at_first_error() {
        let index = PropertyIndex::new();
        index.register("a", 1, "x");
        index.register("a", 1, "y");

        let mut seen = Vec::new();
        let result = index.notify_changed(["a"], |_, name| {
            seen.push(name.to_string());
            Err(EventError::msg("listener failed"))
        });

        assert!(result.is_err());
        assert_eq!(seen, vec!["x".to_string()]);
    }
}
