//! Reference-counted concurrent registry.
//!
//! [`RefCountedRegistry`] is the only mutable shared structure in the
//! engine: every level of the partition tree (selector nodes, comparer
//! slots, key hubs) lives in one. It maps a key to a value plus a
//! reference count, with atomic acquire-or-create and release-or-destroy.
//!
//! # Protocol
//!
//! - [`acquire`](RefCountedRegistry::acquire) increments the count,
//!   creating the entry via a caller-supplied factory when absent. The
//!   factory runs with **no lock held**, so it may re-enter the registry
//!   without deadlocking; when a concurrent acquire wins the insertion
//!   race the freshly built value is discarded and the winner's entry is
//!   joined instead. A factory error leaves no entry behind.
//! - [`release`](RefCountedRegistry::release) decrements the count and,
//!   exactly when it reaches zero, removes the entry in the same critical
//!   section and hands the value back for teardown. A zero-count entry is
//!   therefore never observable.
//! - [`snapshot`](RefCountedRegistry::snapshot) yields a consistent copy
//!   in insertion order; fan-out iteration never sees a torn entry.
//!
//! # Thread safety
//!
//! One `RwLock` guards the map. The lock is held only for map operations,
//! never across factories or any other user code.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use fxhash::FxHashMap;

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// A live registry entry: the value, its reference count, and the
/// insertion sequence used to keep `snapshot()` in registration order.
#[derive(Debug)]
struct Entry<V> {
    value: V,
    count: u64,
    seq: u64,
}

// ---------------------------------------------------------------------------
// RefCountedRegistry
// ---------------------------------------------------------------------------

/// Concurrent map from key to reference-counted value.
///
/// Values must be cheap to clone (in practice `Arc`s). Entries are created
/// lazily on first acquire and destroyed the instant their count returns
/// to zero.
///
/// # Panics
///
/// All methods panic if the internal `RwLock` has been poisoned (a thread
/// panicked while holding it), and [`release`](Self::release) panics on a
/// key that is not held — see its documentation.
pub struct RefCountedRegistry<K, V> {
    entries: RwLock<FxHashMap<K, Entry<V>>>,
    next_seq: AtomicU64,
}

#[allow(clippy::missing_panics_doc)] // Lock-poisoning panics documented on the type.
impl<K, V> RefCountedRegistry<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Atomically acquires the entry for `key`, creating it via `factory`
    /// when absent.
    ///
    /// Returns a clone of the (existing or fresh) value with its count
    /// incremented. The factory runs without the registry lock held; it
    /// may be invoked and its result discarded when a concurrent acquire
    /// wins the insertion race, so factories must have no side effects
    /// beyond constructing the value.
    ///
    /// # Errors
    ///
    /// Propagates the factory error. No entry is left behind in that
    /// case.
    pub fn acquire<F, E>(&self, key: K, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        {
            let mut entries = self.entries.write().unwrap();
            if let Some(entry) = entries.get_mut(&key) {
                entry.count += 1;
                return Ok(entry.value.clone());
            }
        }

        // Absent: build the value unlocked, then race to insert it.
        let value = factory()?;
        let mut entries = self.entries.write().unwrap();
        match entries.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                // Lost the race; join the winner and drop our value.
                let entry = occupied.get_mut();
                entry.count += 1;
                Ok(entry.value.clone())
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Entry {
                    value: value.clone(),
                    count: 1,
                    seq,
                });
                Ok(value)
            }
        }
    }

    /// Atomically releases one reference to `key`.
    ///
    /// Returns `Some(value)` exactly when the count reached zero; the
    /// entry is removed in the same critical section and the caller is
    /// expected to run teardown on the returned value. Returns `None`
    /// while other references remain.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not held. Releasing an absent key means a
    /// double release, which is a ref-count protocol bug in the caller,
    /// not a recoverable runtime condition.
    pub fn release(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .get_mut(key)
            .unwrap_or_else(|| panic!("release of key {key:?} that is not held (double release?)"));
        entry.count -= 1;
        if entry.count == 0 {
            entries.remove(key).map(|entry| entry.value)
        } else {
            None
        }
    }

    /// Returns a clone of the value for `key` without touching its count.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .read()
            .unwrap()
            .get(key)
            .map(|entry| entry.value.clone())
    }

    /// Returns the current reference count for `key`, if held.
    #[must_use]
    pub fn ref_count(&self, key: &K) -> Option<u64> {
        self.entries.read().unwrap().get(key).map(|entry| entry.count)
    }

    /// Returns a consistent snapshot of all entries in insertion order.
    ///
    /// The snapshot is taken under the read lock; concurrent structural
    /// changes after the snapshot are not reflected.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(K, V)> {
        let entries = self.entries.read().unwrap();
        let mut items: Vec<(u64, K, V)> = entries
            .iter()
            .map(|(key, entry)| (entry.seq, key.clone(), entry.value.clone()))
            .collect();
        items.sort_unstable_by_key(|(seq, _, _)| *seq);
        items.into_iter().map(|(_, key, value)| (key, value)).collect()
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Returns `true` if the registry holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl<K, V> Default for RefCountedRegistry<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for RefCountedRegistry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.entries.read().map(|entries| entries.len());
        f.debug_struct("RefCountedRegistry")
            .field("len", &len.unwrap_or(0))
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
