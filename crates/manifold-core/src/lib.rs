//! # Manifold Core
//!
//! Partitioned multicast stream engine: a publish/subscribe hub over
//! typed value streams where subscribers attach to the full stream or to
//! dynamically created partitions keyed by runtime values.
//!
//! This crate provides:
//! - **`RefCountedRegistry`**: atomic acquire-or-create / release-or-destroy
//! - **`MulticastHub`**: default-sink-first fan-out with nested partition hubs
//! - **`PartitionNode`**: one dimension of the ref-counted partition tree
//! - **`BindingChain`**: immutable, structurally shared binding sequences
//! - **Typed dispatch**: runtime key-kind switch from erased chains into
//!   the statically typed tree
//!
//! ## Design principles
//!
//! 1. **No scheduler of its own** — everything runs on caller threads
//! 2. **No lock across user code** — selectors, comparers, factories, and
//!    observers always run unlocked
//! 3. **Scoped failure** — a panicking selector terminates its own
//!    subtree only (bulkhead)
//! 4. **Ref-counted teardown** — every tree level dies with its last
//!    subscription
//!
//! ## Example
//!
//! ```rust,ignore
//! use manifold_core::{MulticastHub, PartitionSelector};
//!
//! let hub: MulticastHub<Event> = MulticastHub::new();
//! let sub = hub
//!     .partition(PartitionSelector::named("region", |e: &Event| e.region.clone()))
//!     .bind_default("west".into())
//!     .subscribe(observer)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod binding;
pub mod comparer;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod observer;
pub mod partition;
pub mod registry;

pub use binding::{
    BindingChain, KeyBinding, OpaqueBinding, PartitionKey, PartitionSelector, SelectorId,
    SelectorNamespace, TypedBinding,
};
pub use comparer::{
    ComparerId, ComparerNamespace, DefaultComparer, KeyComparer, StringComparer, StringComparison,
};
pub use error::{StreamError, SubscribeError};
pub use hub::{MulticastHub, PartitionBuilder, PartitionHandle};
pub use observer::{observer_fn, BroadcastSet, Observer, Subscription};
pub use partition::{HashedKey, PartitionNode};
pub use registry::RefCountedRegistry;

/// Result type for manifold-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type aggregating the crate's error surfaces.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Error delivered through a stream.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Error establishing a subscription.
    #[error("subscribe error: {0}")]
    Subscribe(#[from] SubscribeError),
}
