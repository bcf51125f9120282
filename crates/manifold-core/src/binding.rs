//! Key selectors, bindings, and the immutable binding chain.
//!
//! A *binding* narrows a subscription to one value of one partition
//! dimension: a key selector, a bound key, and the comparer the key is
//! grouped under. Because each binding in a chain may carry a different
//! key type, bindings are erased into the closed sum [`KeyBinding`] over
//! the fixed primitive key kinds, with an [`OpaqueBinding`] escape hatch
//! for caller-supplied key types. Dispatch back into the statically typed
//! partition tree happens by pattern match in [`crate::dispatch`].

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::comparer::{DefaultComparer, KeyComparer};
use crate::error::SubscribeError;
use crate::hub::MulticastHub;
use crate::observer::{Observer, Subscription};

// ---------------------------------------------------------------------------
// SelectorId
// ---------------------------------------------------------------------------

/// Namespace a selector id was allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorNamespace {
    /// Unique per selector instance (identity grouping).
    Unique,
    /// Derived from a dimension name (structural grouping).
    Named,
}

/// Identity under which a partition dimension is grouped inside a hub.
///
/// Two selectors with the same id are treated as the *same* dimension, so
/// every selector sharing an id must extract the same key from the same
/// values. [`SelectorId::unique`] preserves instance-identity grouping:
/// two logically identical selectors built independently fragment into
/// separate dimensions. [`SelectorId::named`] derives a stable structural
/// key from a dimension name so independently built selectors merge; the
/// pushdown rewriter names its selectors by canonical field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectorId {
    namespace: SelectorNamespace,
    code: u64,
}

static NEXT_UNIQUE_SELECTOR: AtomicU64 = AtomicU64::new(1);

impl SelectorId {
    /// Allocates a fresh instance-identity id.
    #[must_use]
    pub fn unique() -> Self {
        Self {
            namespace: SelectorNamespace::Unique,
            code: NEXT_UNIQUE_SELECTOR.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Derives a stable id from a dimension name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            namespace: SelectorNamespace::Named,
            code: fxhash::hash64(name.as_bytes()),
        }
    }

    /// Returns the namespace this id was allocated from.
    #[must_use]
    pub fn namespace(&self) -> SelectorNamespace {
        self.namespace
    }
}

// ---------------------------------------------------------------------------
// PartitionSelector
// ---------------------------------------------------------------------------

/// A pure key-extraction function tagged with its grouping identity.
pub struct PartitionSelector<T, K> {
    id: SelectorId,
    extract: Arc<dyn Fn(&T) -> K + Send + Sync>,
}

impl<T, K> PartitionSelector<T, K> {
    /// Creates a selector with instance-identity grouping.
    pub fn new(extract: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        Self {
            id: SelectorId::unique(),
            extract: Arc::new(extract),
        }
    }

    /// Creates a selector grouped under the given dimension name.
    ///
    /// Callers must ensure every selector sharing a name extracts the
    /// same key.
    pub fn named(name: &str, extract: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        Self {
            id: SelectorId::named(name),
            extract: Arc::new(extract),
        }
    }

    /// Returns the selector's grouping identity.
    #[must_use]
    pub fn id(&self) -> SelectorId {
        self.id
    }

    /// Extracts the partition key from a value.
    ///
    /// May panic if the underlying function does; the hub contains such
    /// panics as scoped key-extraction failures.
    pub fn extract(&self, value: &T) -> K {
        (self.extract)(value)
    }
}

impl<T, K> Clone for PartitionSelector<T, K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<T, K> fmt::Debug for PartitionSelector<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionSelector")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// TypedBinding
// ---------------------------------------------------------------------------

/// A statically typed binding: selector, bound key, comparer.
///
/// Immutable once constructed.
pub struct TypedBinding<T, K> {
    selector: PartitionSelector<T, K>,
    key: K,
    comparer: Arc<dyn KeyComparer<K>>,
}

impl<T, K> TypedBinding<T, K> {
    /// Creates a binding with an explicit comparer.
    pub fn new(
        selector: PartitionSelector<T, K>,
        key: K,
        comparer: Arc<dyn KeyComparer<K>>,
    ) -> Self {
        Self {
            selector,
            key,
            comparer,
        }
    }

    /// Creates a binding under the default comparer for `K`.
    pub fn with_default(selector: PartitionSelector<T, K>, key: K) -> Self
    where
        K: Eq + Hash + Send + Sync + 'static,
    {
        Self::new(selector, key, DefaultComparer::shared())
    }

    /// Returns the binding's selector.
    #[must_use]
    pub fn selector(&self) -> &PartitionSelector<T, K> {
        &self.selector
    }

    /// Returns the bound key.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the comparer the key is grouped under.
    #[must_use]
    pub fn comparer(&self) -> &Arc<dyn KeyComparer<K>> {
        &self.comparer
    }
}

impl<T, K: Clone> Clone for TypedBinding<T, K> {
    fn clone(&self) -> Self {
        Self {
            selector: self.selector.clone(),
            key: self.key.clone(),
            comparer: Arc::clone(&self.comparer),
        }
    }
}

impl<T, K: fmt::Debug> fmt::Debug for TypedBinding<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedBinding")
            .field("selector", &self.selector.id())
            .field("key", &self.key)
            .field("comparer", &self.comparer.id())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// OpaqueBinding
// ---------------------------------------------------------------------------

/// Strongly typed subscription handler for a key type outside the closed
/// primitive set.
///
/// The handler itself carries the key type: implementing this trait (for
/// most callers, by delegating to
/// [`dispatch::subscribe_typed`](crate::dispatch::subscribe_typed) with a
/// [`TypedBinding`]) is how exotic key types join a [`BindingChain`].
pub trait OpaqueBinding<T>: Send + Sync {
    /// Returns the binding's selector identity.
    fn selector_id(&self) -> SelectorId;

    /// Subscribes `observer` through this binding's partition level of
    /// `hub`, continuing with the remaining bindings of the chain.
    ///
    /// # Errors
    ///
    /// Returns a [`SubscribeError`] when any level of the chain cannot be
    /// established; every level acquired before the failure must be
    /// released again.
    fn subscribe(
        &self,
        hub: &MulticastHub<T>,
        rest: &[KeyBinding<T>],
        observer: Arc<dyn Observer<T>>,
    ) -> Result<Subscription, SubscribeError>;
}

// ---------------------------------------------------------------------------
// KeyBinding
// ---------------------------------------------------------------------------

/// Type-erased binding: a closed sum over the fixed primitive key kinds
/// plus an opaque variant for caller-supplied key types.
///
/// The discriminant is the runtime key-type tag the dispatcher switches
/// on.
pub enum KeyBinding<T> {
    /// Signed integer key (all signed widths widen into `i64`).
    Int(TypedBinding<T, i64>),
    /// Unsigned integer key (all unsigned widths widen into `u64`).
    UInt(TypedBinding<T, u64>),
    /// Boolean key.
    Bool(TypedBinding<T, bool>),
    /// Character key.
    Char(TypedBinding<T, char>),
    /// String key.
    Str(TypedBinding<T, Arc<str>>),
    /// Key type outside the closed set, with its own typed handler.
    Opaque(Arc<dyn OpaqueBinding<T>>),
}

impl<T> KeyBinding<T> {
    /// Returns the binding's selector identity.
    #[must_use]
    pub fn selector_id(&self) -> SelectorId {
        match self {
            Self::Int(binding) => binding.selector().id(),
            Self::UInt(binding) => binding.selector().id(),
            Self::Bool(binding) => binding.selector().id(),
            Self::Char(binding) => binding.selector().id(),
            Self::Str(binding) => binding.selector().id(),
            Self::Opaque(binding) => binding.selector_id(),
        }
    }

    /// Returns the name of the binding's key kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Bool(_) => "bool",
            Self::Char(_) => "char",
            Self::Str(_) => "str",
            Self::Opaque(_) => "opaque",
        }
    }
}

impl<T> Clone for KeyBinding<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Int(binding) => Self::Int(binding.clone()),
            Self::UInt(binding) => Self::UInt(binding.clone()),
            Self::Bool(binding) => Self::Bool(binding.clone()),
            Self::Char(binding) => Self::Char(binding.clone()),
            Self::Str(binding) => Self::Str(binding.clone()),
            Self::Opaque(binding) => Self::Opaque(Arc::clone(binding)),
        }
    }
}

impl<T> fmt::Debug for KeyBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBinding")
            .field("kind", &self.kind_name())
            .field("selector", &self.selector_id())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PartitionKey
// ---------------------------------------------------------------------------

mod sealed {
    use std::sync::Arc;

    pub trait Sealed {}

    impl Sealed for i64 {}
    impl Sealed for u64 {}
    impl Sealed for bool {}
    impl Sealed for char {}
    impl Sealed for Arc<str> {}
}

/// The closed set of primitive partition key types.
///
/// Provides the wrap from a [`TypedBinding`] into the [`KeyBinding`] sum;
/// key types outside this set go through [`KeyBinding::Opaque`].
pub trait PartitionKey:
    sealed::Sealed + Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static
{
    /// Wraps a typed binding of this key type into the closed sum.
    fn into_binding<T>(binding: TypedBinding<T, Self>) -> KeyBinding<T>;
}

impl PartitionKey for i64 {
    fn into_binding<T>(binding: TypedBinding<T, Self>) -> KeyBinding<T> {
        KeyBinding::Int(binding)
    }
}

impl PartitionKey for u64 {
    fn into_binding<T>(binding: TypedBinding<T, Self>) -> KeyBinding<T> {
        KeyBinding::UInt(binding)
    }
}

impl PartitionKey for bool {
    fn into_binding<T>(binding: TypedBinding<T, Self>) -> KeyBinding<T> {
        KeyBinding::Bool(binding)
    }
}

impl PartitionKey for char {
    fn into_binding<T>(binding: TypedBinding<T, Self>) -> KeyBinding<T> {
        KeyBinding::Char(binding)
    }
}

impl PartitionKey for Arc<str> {
    fn into_binding<T>(binding: TypedBinding<T, Self>) -> KeyBinding<T> {
        KeyBinding::Str(binding)
    }
}

// ---------------------------------------------------------------------------
// BindingChain
// ---------------------------------------------------------------------------

/// Immutable ordered sequence of bindings.
///
/// Implemented as a persistent cons list stored most-recent-first, so
/// [`bind`](Self::bind) is O(1), old chains remain valid, and two chains
/// extended from a common prefix share that prefix structurally.
pub struct BindingChain<T> {
    head: Option<Arc<ChainNode<T>>>,
    len: usize,
}

struct ChainNode<T> {
    binding: KeyBinding<T>,
    prev: Option<Arc<ChainNode<T>>>,
}

impl<T> BindingChain<T> {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Returns a new chain with `binding` appended.
    ///
    /// The receiver is unchanged and remains valid.
    #[must_use]
    pub fn bind(&self, binding: KeyBinding<T>) -> Self {
        Self {
            head: Some(Arc::new(ChainNode {
                binding,
                prev: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Returns the bindings in chain order (first bound first).
    #[must_use]
    pub fn bindings(&self) -> SmallVec<[KeyBinding<T>; 4]> {
        let mut out: SmallVec<[KeyBinding<T>; 4]> = SmallVec::with_capacity(self.len);
        let mut node = self.head.as_deref();
        while let Some(current) = node {
            out.push(current.binding.clone());
            node = current.prev.as_deref();
        }
        out.reverse();
        out
    }

    /// Returns the number of bindings in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for the empty chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Clone for BindingChain<T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for BindingChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BindingChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.bindings().iter()).finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
