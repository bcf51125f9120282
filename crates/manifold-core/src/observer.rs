//! Observer contract, broadcast sink, and subscription handles.
//!
//! Observers receive values by reference (`&T`) so fan-out never requires
//! the payload to be `Clone`. Per the stream contract an observer sees
//! any number of `on_next` calls followed by exactly one terminal call
//! (`on_error` xor `on_completed`), and nothing after that.
//!
//! # Panic safety
//!
//! Observer callbacks run on the publisher's thread. A panicking observer
//! is caught via [`std::panic::catch_unwind`], logged with
//! `tracing::warn!`, and skipped — one misbehaving observer must not
//! abort delivery to the rest of the tree.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::StreamError;

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Receiver side of a subscription.
///
/// Implementations must be safe to call from arbitrary publisher threads.
pub trait Observer<T>: Send + Sync {
    /// Called for each published value that reaches this subscription.
    fn on_next(&self, value: &T);

    /// Called at most once when the stream (or the partition subtree the
    /// subscription is bound to) terminates with an error.
    ///
    /// Default implementation logs the error via `tracing::warn!`.
    fn on_error(&self, error: &StreamError) {
        tracing::warn!("unhandled stream error: {error}");
    }

    /// Called at most once when the stream completes normally.
    ///
    /// Default implementation is a no-op.
    fn on_completed(&self) {}
}

// ---------------------------------------------------------------------------
// FnObserver (private adapter)
// ---------------------------------------------------------------------------

/// Adapter that wraps a closure into an [`Observer`].
struct FnObserver<F>(F);

impl<T, F: Fn(&T) + Send + Sync> Observer<T> for FnObserver<F> {
    fn on_next(&self, value: &T) {
        (self.0)(value);
    }
}

/// Wraps a closure into an [`Observer`] that only handles `on_next`.
///
/// Terminal signals use the trait defaults (errors are logged, completion
/// is ignored).
pub fn observer_fn<T, F>(f: F) -> Arc<dyn Observer<T>>
where
    T: 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(FnObserver(f))
}

// ---------------------------------------------------------------------------
// Panic containment
// ---------------------------------------------------------------------------

/// Runs `f`, converting a panic into the panic's message.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

/// Extracts a human-readable message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Invokes one observer callback with panic containment.
pub(crate) fn notify<T>(observer: &Arc<dyn Observer<T>>, call: impl FnOnce(&dyn Observer<T>)) {
    if let Err(message) = catch_panic(|| call(observer.as_ref())) {
        tracing::warn!("observer panicked: {message}");
    }
}

// ---------------------------------------------------------------------------
// BroadcastSet
// ---------------------------------------------------------------------------

/// Ordered set of observers behind a hub's default sink.
///
/// Observers are identified by a stable token so removal is exact even
/// when the same observer object is subscribed twice. Delivery iterates a
/// snapshot taken under the read lock and invokes observers with no lock
/// held.
pub struct BroadcastSet<T> {
    observers: RwLock<Vec<(u64, Arc<dyn Observer<T>>)>>,
    next_token: AtomicU64,
}

#[allow(clippy::missing_panics_doc)] // Lock-poisoning panics only.
impl<T> BroadcastSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Adds an observer, returning its removal token.
    pub fn insert(&self, observer: Arc<dyn Observer<T>>) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.observers.write().unwrap().push((token, observer));
        token
    }

    /// Removes the observer with the given token.
    ///
    /// Returns `true` if it was still present; idempotent otherwise.
    pub fn remove(&self, token: u64) -> bool {
        let mut observers = self.observers.write().unwrap();
        let before = observers.len();
        observers.retain(|(t, _)| *t != token);
        observers.len() != before
    }

    /// Returns a snapshot of the current observers in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Observer<T>>> {
        self.observers
            .read()
            .unwrap()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    /// Removes and returns every observer in insertion order.
    ///
    /// Used by terminal broadcast: the drained list receives the terminal
    /// signal, and any observer inserted after the drain is handled by
    /// the subscribe path instead, so each observer sees the terminal
    /// exactly once.
    #[must_use]
    pub fn drain(&self) -> Vec<Arc<dyn Observer<T>>> {
        let mut observers = self.observers.write().unwrap();
        std::mem::take(&mut *observers)
            .into_iter()
            .map(|(_, observer)| observer)
            .collect()
    }

    /// Returns the number of subscribed observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.read().unwrap().len()
    }

    /// Returns `true` if no observers are subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.read().unwrap().is_empty()
    }
}

impl<T> Default for BroadcastSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BroadcastSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastSet")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle to an established subscription.
///
/// Disposal runs the subscription's teardown (removing the observer and
/// releasing every partition level it acquired, deepest first) at most
/// once, no matter how many times [`dispose`](Self::dispose) is called or
/// whether the handle is simply dropped. Disposal is safe to call from
/// within an observer callback.
pub struct Subscription {
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

#[allow(clippy::missing_panics_doc)] // Lock-poisoning panics only.
impl Subscription {
    /// Creates a subscription with the given teardown action.
    pub(crate) fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// Creates an already-disposed subscription with no teardown.
    ///
    /// Returned when subscribing to a stream that has already terminated:
    /// the observer received its terminal signal synchronously and holds
    /// no resources.
    #[must_use]
    pub fn inert() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    /// Disposes the subscription.
    ///
    /// The first call runs the teardown; later calls are no-ops.
    pub fn dispose(&self) {
        let teardown = self.teardown.lock().unwrap().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Returns `true` once the subscription has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.teardown.lock().unwrap().is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
