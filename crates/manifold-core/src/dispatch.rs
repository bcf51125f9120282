//! Type-erased binding dispatch.
//!
//! A [`BindingChain`] is heterogeneous: each binding may carry a
//! different key type, while the subscribe entry point only knows the
//! element type `T`. This module bridges the two with a runtime switch on
//! the first binding's key kind: each match arm instantiates the
//! statically typed three-level acquire path (selector node → comparer
//! slot → key hub) for that kind and recurses on the chain tail. Pure
//! plumbing — no analysis, no state of its own.

use std::fmt;
use std::sync::Arc;

use crate::binding::{BindingChain, KeyBinding, OpaqueBinding, SelectorId, TypedBinding};
use crate::error::SubscribeError;
use crate::hub::MulticastHub;
use crate::observer::{Observer, Subscription};
use crate::partition::{ComparerSlot, HashedKey, PartitionDim, PartitionNode};

// ---------------------------------------------------------------------------
// Chain dispatch
// ---------------------------------------------------------------------------

/// Subscribes `observer` to `hub` through every binding of `chain`, in
/// chain order.
///
/// # Errors
///
/// Returns a [`SubscribeError`] when any level cannot be established;
/// every level acquired before the failure is released again, so failure
/// leaves no partial subscription behind.
pub fn subscribe_chain<T: Send + Sync + 'static>(
    hub: &MulticastHub<T>,
    chain: &BindingChain<T>,
    observer: Arc<dyn Observer<T>>,
) -> Result<Subscription, SubscribeError> {
    let bindings = chain.bindings();
    subscribe_bindings(hub, &bindings, observer)
}

/// Subscribes through a materialized binding slice (recursion step).
///
/// # Errors
///
/// See [`subscribe_chain`].
pub fn subscribe_bindings<T: Send + Sync + 'static>(
    hub: &MulticastHub<T>,
    bindings: &[KeyBinding<T>],
    observer: Arc<dyn Observer<T>>,
) -> Result<Subscription, SubscribeError> {
    let Some((first, rest)) = bindings.split_first() else {
        return Ok(hub.subscribe(observer));
    };

    // A terminated hub accepts no new partition branches; the observer
    // gets the terminal signal immediately instead.
    if let Some(terminal) = hub.terminal_state() {
        hub.deliver_terminal(&terminal, &observer);
        return Ok(Subscription::inert());
    }

    match first {
        KeyBinding::Int(binding) => subscribe_typed(hub, binding, rest, observer),
        KeyBinding::UInt(binding) => subscribe_typed(hub, binding, rest, observer),
        KeyBinding::Bool(binding) => subscribe_typed(hub, binding, rest, observer),
        KeyBinding::Char(binding) => subscribe_typed(hub, binding, rest, observer),
        KeyBinding::Str(binding) => subscribe_typed(hub, binding, rest, observer),
        KeyBinding::Opaque(binding) => binding.subscribe(hub, rest, observer),
    }
}

// ---------------------------------------------------------------------------
// Typed subscribe path
// ---------------------------------------------------------------------------

/// Subscribes through one statically typed binding, then recurses on the
/// remaining bindings inside the acquired key hub.
///
/// Acquires three registry levels on the way down. The returned
/// subscription's disposal first disposes the nested subscription, then
/// releases key, comparer, and selector levels in that order; each
/// release that reaches zero tears the now-empty structure down.
///
/// # Errors
///
/// [`SubscribeError::SelectorKindMismatch`] when the binding's selector
/// id already names a dimension of a different key type, or any error
/// from the recursive subscribe. All acquired levels are rolled back on
/// failure.
pub fn subscribe_typed<T, K>(
    hub: &MulticastHub<T>,
    binding: &TypedBinding<T, K>,
    rest: &[KeyBinding<T>],
    observer: Arc<dyn Observer<T>>,
) -> Result<Subscription, SubscribeError>
where
    T: Send + Sync + 'static,
    K: Clone + Send + Sync + fmt::Debug + 'static,
{
    let selector_id = binding.selector().id();
    let partitions = Arc::clone(hub.partitions());

    // Level 1: the partition dimension for this selector.
    let selector = binding.selector().clone();
    let dim = partitions.acquire::<_, SubscribeError>(selector_id, || {
        Ok(Arc::new(PartitionNode::new(selector)) as Arc<dyn PartitionDim<T>>)
    })?;
    let node: Arc<PartitionNode<T, K>> = match Arc::clone(&dim).as_any().downcast() {
        Ok(node) => node,
        Err(_) => {
            partitions.release(&selector_id);
            return Err(SubscribeError::SelectorKindMismatch {
                selector: selector_id,
            });
        }
    };

    // Level 2: the comparer grouping.
    let comparer = Arc::clone(binding.comparer());
    let comparer_id = comparer.id();
    let slot = node
        .comparers()
        .acquire::<_, SubscribeError>(comparer_id, || Ok(Arc::new(ComparerSlot::new(comparer))))?;

    // Level 3: the key's nested hub.
    let hashed = HashedKey::new(binding.key().clone(), Arc::clone(slot.comparer()));
    let leaf = slot
        .keys()
        .acquire::<_, SubscribeError>(hashed.clone(), || Ok(Arc::new(MulticastHub::new())))?;

    // Recurse with the chain tail; roll back all three levels if any
    // deeper level fails.
    let inner = match subscribe_bindings(&leaf, rest, observer) {
        Ok(subscription) => subscription,
        Err(error) => {
            slot.keys().release(&hashed);
            node.comparers().release(&comparer_id);
            partitions.release(&selector_id);
            return Err(error);
        }
    };

    Ok(Subscription::new(move || {
        inner.dispose();
        if slot.keys().release(&hashed).is_some() {
            tracing::debug!(selector = ?selector_id, "partition key hub torn down");
        }
        node.comparers().release(&comparer_id);
        if partitions.release(&selector_id).is_some() {
            tracing::debug!(selector = ?selector_id, "partition dimension torn down");
        }
    }))
}

// ---------------------------------------------------------------------------
// Opaque binding passthrough
// ---------------------------------------------------------------------------

/// Every typed binding is its own opaque handler: custom key types join
/// the chain by wrapping a [`TypedBinding`] in [`KeyBinding::Opaque`].
impl<T, K> OpaqueBinding<T> for TypedBinding<T, K>
where
    T: Send + Sync + 'static,
    K: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn selector_id(&self) -> SelectorId {
        self.selector().id()
    }

    fn subscribe(
        &self,
        hub: &MulticastHub<T>,
        rest: &[KeyBinding<T>],
        observer: Arc<dyn Observer<T>>,
    ) -> Result<Subscription, SubscribeError> {
        subscribe_typed(hub, self, rest, observer)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
