//! One level of the partition tree.
//!
//! A [`PartitionNode`] owns a key selector and a two-deep nest of
//! ref-counted registries: comparer identity → key value → child
//! [`MulticastHub`]. Nodes are created on first subscription through
//! their selector and removed from the parent hub the instant the last
//! subscription beneath them is disposed.
//!
//! # Bulkhead
//!
//! Key extraction runs the caller-supplied selector. If it panics during
//! a publish, only the observers reachable through this node receive the
//! resulting `on_error`; the default sink and sibling dimensions are
//! unaffected.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::binding::PartitionSelector;
use crate::comparer::{ComparerId, KeyComparer};
use crate::error::StreamError;
use crate::hub::MulticastHub;
use crate::observer::catch_panic;
use crate::registry::RefCountedRegistry;

// ---------------------------------------------------------------------------
// HashedKey
// ---------------------------------------------------------------------------

/// A partition key routed through its comparer's equality and hash.
///
/// Wrapping the key lets one hash map per comparer slot serve arbitrary
/// comparers; every `HashedKey` within a slot carries that slot's
/// comparer, so equality and hashing stay consistent.
pub struct HashedKey<K> {
    key: K,
    comparer: Arc<dyn KeyComparer<K>>,
}

impl<K> HashedKey<K> {
    /// Wraps `key` under `comparer`.
    pub(crate) fn new(key: K, comparer: Arc<dyn KeyComparer<K>>) -> Self {
        Self { key, comparer }
    }

    /// Returns the underlying key.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> PartialEq for HashedKey<K> {
    fn eq(&self, other: &Self) -> bool {
        self.comparer.eq_keys(&self.key, &other.key)
    }
}

impl<K> Eq for HashedKey<K> {}

impl<K> Hash for HashedKey<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.comparer.hash_key(&self.key));
    }
}

impl<K: Clone> Clone for HashedKey<K> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            comparer: Arc::clone(&self.comparer),
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for HashedKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashedKey({:?})", self.key)
    }
}

// ---------------------------------------------------------------------------
// ComparerSlot
// ---------------------------------------------------------------------------

/// The per-comparer registry inside a partition node: key value → child
/// hub.
pub struct ComparerSlot<T, K> {
    comparer: Arc<dyn KeyComparer<K>>,
    by_key: RefCountedRegistry<HashedKey<K>, Arc<MulticastHub<T>>>,
}

impl<T, K> ComparerSlot<T, K>
where
    K: Clone + Send + Sync + fmt::Debug + 'static,
{
    pub(crate) fn new(comparer: Arc<dyn KeyComparer<K>>) -> Self {
        Self {
            comparer,
            by_key: RefCountedRegistry::new(),
        }
    }

    pub(crate) fn comparer(&self) -> &Arc<dyn KeyComparer<K>> {
        &self.comparer
    }

    pub(crate) fn keys(&self) -> &RefCountedRegistry<HashedKey<K>, Arc<MulticastHub<T>>> {
        &self.by_key
    }
}

impl<T, K> fmt::Debug for ComparerSlot<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparerSlot")
            .field("comparer", &self.comparer.id())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PartitionDim
// ---------------------------------------------------------------------------

/// Type-erased face of a [`PartitionNode`], so nodes with different key
/// types coexist in one hub registry.
pub(crate) trait PartitionDim<T>: Send + Sync {
    /// Delivers a published value into this dimension.
    fn deliver(&self, value: &T);

    /// Broadcasts a terminal error to every branch beneath this node.
    fn deliver_error(&self, error: &StreamError);

    /// Broadcasts completion to every branch beneath this node.
    fn deliver_completed(&self);

    /// Upcast used by the dispatcher to recover the typed node.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

// ---------------------------------------------------------------------------
// PartitionNode
// ---------------------------------------------------------------------------

/// One partition dimension: a key selector plus its comparer/key
/// registries.
pub struct PartitionNode<T, K> {
    selector: PartitionSelector<T, K>,
    by_comparer: RefCountedRegistry<ComparerId, Arc<ComparerSlot<T, K>>>,
}

impl<T, K> PartitionNode<T, K>
where
    K: Clone + Send + Sync + fmt::Debug + 'static,
{
    pub(crate) fn new(selector: PartitionSelector<T, K>) -> Self {
        Self {
            selector,
            by_comparer: RefCountedRegistry::new(),
        }
    }

    pub(crate) fn comparers(&self) -> &RefCountedRegistry<ComparerId, Arc<ComparerSlot<T, K>>> {
        &self.by_comparer
    }

    /// Returns the number of comparer groupings currently live under
    /// this dimension.
    #[must_use]
    pub fn comparer_count(&self) -> usize {
        self.by_comparer.len()
    }
}

impl<T, K> PartitionDim<T> for PartitionNode<T, K>
where
    T: Send + Sync + 'static,
    K: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn deliver(&self, value: &T) {
        let key = match catch_panic(|| self.selector.extract(value)) {
            Ok(key) => key,
            Err(message) => {
                // Bulkhead: the failure terminates this subtree only.
                tracing::warn!(
                    selector = ?self.selector.id(),
                    "partition key extraction panicked: {message}"
                );
                self.deliver_error(&StreamError::KeyExtraction(message));
                return;
            }
        };

        for (_, slot) in self.by_comparer.snapshot() {
            let probe = HashedKey::new(key.clone(), Arc::clone(slot.comparer()));
            if let Some(hub) = slot.keys().get(&probe) {
                hub.publish(value);
            }
        }
    }

    fn deliver_error(&self, error: &StreamError) {
        for (_, slot) in self.by_comparer.snapshot() {
            for (_, hub) in slot.keys().snapshot() {
                hub.error(error.clone());
            }
        }
    }

    fn deliver_completed(&self) {
        for (_, slot) in self.by_comparer.snapshot() {
            for (_, hub) in slot.keys().snapshot() {
                hub.complete();
            }
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T, K> fmt::Debug for PartitionNode<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionNode")
            .field("selector", &self.selector.id())
            .field("comparers", &self.by_comparer.len())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparer::{DefaultComparer, StringComparer, StringComparison};

    // --- HashedKey tests ---

    #[test]
    fn test_hashed_key_default_comparer() {
        let comparer = DefaultComparer::<i64>::shared();
        let a = HashedKey::new(10, Arc::clone(&comparer));
        let b = HashedKey::new(10, Arc::clone(&comparer));
        let c = HashedKey::new(11, comparer);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hashed_key_ignore_case_groups() {
        let comparer = StringComparer::shared(StringComparison::OrdinalIgnoreCase);
        let reg: RefCountedRegistry<HashedKey<Arc<str>>, u32> = RefCountedRegistry::new();
        reg.acquire(
            HashedKey::new(Arc::from("West"), Arc::clone(&comparer)),
            || Ok::<_, std::convert::Infallible>(1),
        )
        .unwrap();

        // A differently cased probe finds the same entry.
        let probe = HashedKey::new(Arc::from("wEST"), comparer);
        assert_eq!(reg.get(&probe), Some(1));
    }

    // --- Node shape tests ---

    #[test]
    fn test_node_starts_empty() {
        let node: PartitionNode<i64, i64> =
            PartitionNode::new(PartitionSelector::new(|value: &i64| *value));
        assert_eq!(node.comparer_count(), 0);
    }
}
