//! Key equality comparers and comparer identity.
//!
//! Every key level of the partition tree groups its entries by a
//! [`KeyComparer`], so one dimension can simultaneously be partitioned
//! under, say, ordinal and case-insensitive string equality. Comparers
//! carry a [`ComparerId`] used to group them: built-in comparers get
//! stable ids (two independently constructed defaults for the same key
//! type land in the same branch), while custom comparers are grouped by
//! instance identity via [`ComparerId::unique`].

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fxhash::FxHasher;

// ---------------------------------------------------------------------------
// ComparerId
// ---------------------------------------------------------------------------

/// Namespace a comparer id was allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparerNamespace {
    /// Default equality comparer for a key type; stable per type.
    Default,
    /// One of the fixed [`StringComparison`] modes; stable per mode.
    StringMode,
    /// Caller-supplied comparer; unique per instance.
    Custom,
}

/// Identity under which a comparer's partition entries are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComparerId {
    namespace: ComparerNamespace,
    code: u64,
}

static NEXT_CUSTOM_COMPARER: AtomicU64 = AtomicU64::new(1);

impl ComparerId {
    /// Returns the stable id of the default comparer for key type `K`.
    #[must_use]
    pub fn default_for<K: 'static>() -> Self {
        let mut hasher = FxHasher::default();
        TypeId::of::<K>().hash(&mut hasher);
        Self {
            namespace: ComparerNamespace::Default,
            code: hasher.finish(),
        }
    }

    /// Returns the stable id of a [`StringComparison`] mode comparer.
    #[must_use]
    pub fn string_mode(mode: StringComparison) -> Self {
        Self {
            namespace: ComparerNamespace::StringMode,
            code: mode as u64,
        }
    }

    /// Allocates a fresh id for a custom comparer instance.
    ///
    /// Two custom comparers constructed independently never share an id,
    /// even when they are observably equivalent; callers wanting merged
    /// branches must share the comparer instance.
    #[must_use]
    pub fn unique() -> Self {
        Self {
            namespace: ComparerNamespace::Custom,
            code: NEXT_CUSTOM_COMPARER.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Returns the namespace this id was allocated from.
    #[must_use]
    pub fn namespace(&self) -> ComparerNamespace {
        self.namespace
    }
}

// ---------------------------------------------------------------------------
// KeyComparer
// ---------------------------------------------------------------------------

/// Equality and hashing strategy for partition keys.
///
/// `eq_keys` and `hash_key` must agree: keys that compare equal must hash
/// identically, or partition lookup will miss.
pub trait KeyComparer<K>: Send + Sync {
    /// Returns the identity this comparer's entries are grouped under.
    fn id(&self) -> ComparerId;

    /// Returns `true` if the two keys are equal under this comparer.
    fn eq_keys(&self, a: &K, b: &K) -> bool;

    /// Hashes a key consistently with [`eq_keys`](Self::eq_keys).
    fn hash_key(&self, key: &K) -> u64;
}

// ---------------------------------------------------------------------------
// DefaultComparer
// ---------------------------------------------------------------------------

/// Default equality comparer: the key type's own `Eq` and `Hash`.
pub struct DefaultComparer<K> {
    _marker: PhantomData<fn(K)>,
}

impl<K: Eq + Hash + 'static> DefaultComparer<K> {
    /// Creates the default comparer for `K`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Creates the default comparer for `K` as a shared trait object.
    #[must_use]
    pub fn shared() -> Arc<dyn KeyComparer<K>>
    where
        K: Send + Sync,
    {
        Arc::new(Self::new())
    }
}

impl<K: Eq + Hash + 'static> Default for DefaultComparer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Send + Sync + 'static> KeyComparer<K> for DefaultComparer<K> {
    fn id(&self) -> ComparerId {
        ComparerId::default_for::<K>()
    }

    fn eq_keys(&self, a: &K, b: &K) -> bool {
        a == b
    }

    fn hash_key(&self, key: &K) -> u64 {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

impl<K> fmt::Debug for DefaultComparer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DefaultComparer")
    }
}

// ---------------------------------------------------------------------------
// StringComparison
// ---------------------------------------------------------------------------

/// The fixed string-comparison mode table.
///
/// This engine carries no locale tables, so the culture-aware modes
/// compare like their ordinal counterparts; the distinction is preserved
/// in the enum (and in comparer identity) so caller intent survives.
/// Ignore-case modes compare and hash under Unicode simple lowercase
/// folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringComparison {
    /// Culture-sensitive, case-sensitive (ordinal in this engine).
    CurrentCulture,
    /// Culture-sensitive, case-insensitive.
    CurrentCultureIgnoreCase,
    /// Invariant-culture, case-sensitive (ordinal in this engine).
    InvariantCulture,
    /// Invariant-culture, case-insensitive.
    InvariantCultureIgnoreCase,
    /// Byte-wise comparison of the underlying text.
    Ordinal,
    /// Byte-wise comparison after lowercase folding.
    OrdinalIgnoreCase,
}

impl StringComparison {
    /// Returns `true` for the case-insensitive modes.
    #[must_use]
    pub fn is_ignore_case(self) -> bool {
        matches!(
            self,
            Self::CurrentCultureIgnoreCase
                | Self::InvariantCultureIgnoreCase
                | Self::OrdinalIgnoreCase
        )
    }

    /// Compares two strings under this mode.
    #[must_use]
    pub fn str_eq(self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        self.is_ignore_case() && fold(a) == fold(b)
    }

    /// Hashes a string consistently with [`str_eq`](Self::str_eq).
    #[must_use]
    pub fn hash_str(self, s: &str) -> u64 {
        if self.is_ignore_case() {
            fxhash::hash64(fold(s).as_bytes())
        } else {
            fxhash::hash64(s.as_bytes())
        }
    }
}

/// Unicode simple lowercase folding.
fn fold(s: &str) -> String {
    s.to_lowercase()
}

// ---------------------------------------------------------------------------
// StringComparer
// ---------------------------------------------------------------------------

/// [`KeyComparer`] over string keys for one [`StringComparison`] mode.
#[derive(Debug, Clone, Copy)]
pub struct StringComparer {
    mode: StringComparison,
}

impl StringComparer {
    /// Creates a comparer for the given mode.
    #[must_use]
    pub fn new(mode: StringComparison) -> Self {
        Self { mode }
    }

    /// Creates a comparer for the given mode as a shared trait object.
    #[must_use]
    pub fn shared(mode: StringComparison) -> Arc<dyn KeyComparer<Arc<str>>> {
        Arc::new(Self::new(mode))
    }

    /// Returns the comparison mode.
    #[must_use]
    pub fn mode(&self) -> StringComparison {
        self.mode
    }
}

impl KeyComparer<Arc<str>> for StringComparer {
    fn id(&self) -> ComparerId {
        ComparerId::string_mode(self.mode)
    }

    fn eq_keys(&self, a: &Arc<str>, b: &Arc<str>) -> bool {
        self.mode.str_eq(a, b)
    }

    fn hash_key(&self, key: &Arc<str>) -> u64 {
        self.mode.hash_str(key)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
