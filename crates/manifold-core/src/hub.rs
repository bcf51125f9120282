//! Multicast hub: the broadcast point of the engine.
//!
//! A [`MulticastHub`] fans every published value out to its default
//! (unpartitioned) sink first, then to each partition dimension in
//! registration order. Partition branches end in nested hubs, so the
//! whole tree is hubs all the way down; one hub exists per artifact and
//! element type, created lazily and torn down level by level as
//! subscriptions are disposed.
//!
//! The hub is cheaply cloneable: clones share the same sink, partition
//! registry, and terminal state, in the way a subject handle is passed
//! around by value.
//!
//! # Ordering
//!
//! For a single publisher thread, every observer present when `publish`
//! begins receives the value (or the terminal signal) in one pass before
//! `publish` returns. The default sink is delivered first, then
//! dimensions in registration order; there is no cross-partition ordering
//! beyond that. A subscription racing an in-flight publish on another
//! thread may miss that value.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::binding::{BindingChain, PartitionKey, PartitionSelector, SelectorId, TypedBinding};
use crate::comparer::KeyComparer;
use crate::dispatch;
use crate::error::{StreamError, SubscribeError};
use crate::observer::{notify, BroadcastSet, Observer, Subscription};
use crate::partition::PartitionDim;
use crate::registry::RefCountedRegistry;

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

/// Terminal state of a hub. At most one terminal is ever broadcast.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Terminal {
    Completed,
    Errored(StreamError),
}

impl Terminal {
    fn deliver<T>(&self, observer: &Arc<dyn Observer<T>>) {
        match self {
            Terminal::Completed => notify(observer, |o| o.on_completed()),
            Terminal::Errored(error) => notify(observer, |o| o.on_error(error)),
        }
    }
}

// ---------------------------------------------------------------------------
// MulticastHub
// ---------------------------------------------------------------------------

/// Publish/subscribe hub over a typed value stream with dynamically
/// created partition dimensions.
pub struct MulticastHub<T> {
    default_sink: Arc<BroadcastSet<T>>,
    partitions: Arc<RefCountedRegistry<SelectorId, Arc<dyn PartitionDim<T>>>>,
    terminal: Arc<RwLock<Option<Terminal>>>,
}

#[allow(clippy::missing_panics_doc)] // Lock-poisoning panics only.
impl<T: Send + Sync + 'static> MulticastHub<T> {
    /// Creates a hub with an empty sink and no partition dimensions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_sink: Arc::new(BroadcastSet::new()),
            partitions: Arc::new(RefCountedRegistry::new()),
            terminal: Arc::new(RwLock::new(None)),
        }
    }

    // --- Publication ---

    /// Publishes a value to the default sink and every matching
    /// partition branch.
    ///
    /// No-op once the hub has terminated. Observer panics and per-
    /// dimension key-extraction failures are contained; neither aborts
    /// delivery to the rest of the tree.
    pub fn publish(&self, value: &T) {
        if self.terminal.read().unwrap().is_some() {
            return;
        }
        for observer in self.default_sink.snapshot() {
            notify(&observer, |o| o.on_next(value));
        }
        for (_, dim) in self.partitions.snapshot() {
            dim.deliver(value);
        }
    }

    /// Terminates the hub with an error.
    ///
    /// Broadcast unconditionally to the default sink and to every
    /// partition branch that currently exists; terminal signals are not
    /// filtered by key. Only the first terminal (error or completion)
    /// is delivered.
    pub fn error(&self, error: StreamError) {
        if !self.begin_terminal(Terminal::Errored(error.clone())) {
            return;
        }
        for observer in self.default_sink.drain() {
            notify(&observer, |o| o.on_error(&error));
        }
        for (_, dim) in self.partitions.snapshot() {
            dim.deliver_error(&error);
        }
    }

    /// Completes the hub.
    ///
    /// Broadcast semantics match [`error`](Self::error).
    pub fn complete(&self) {
        if !self.begin_terminal(Terminal::Completed) {
            return;
        }
        for observer in self.default_sink.drain() {
            notify(&observer, |o| o.on_completed());
        }
        for (_, dim) in self.partitions.snapshot() {
            dim.deliver_completed();
        }
    }

    /// Records the terminal state; returns `false` if one already exists.
    fn begin_terminal(&self, terminal: Terminal) -> bool {
        let mut slot = self.terminal.write().unwrap();
        if slot.is_some() {
            return false;
        }
        *slot = Some(terminal);
        true
    }

    /// Returns `true` once the hub has received a terminal signal.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminal.read().unwrap().is_some()
    }

    // --- Subscription ---

    /// Subscribes an observer to the default (unpartitioned) sink.
    ///
    /// If the hub has already terminated, the observer receives the
    /// terminal signal immediately and an inert subscription is
    /// returned. Disposal removes the observer.
    pub fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        if let Some(sub) = self.try_subscribe_terminated(&observer) {
            return sub;
        }

        let token = self.default_sink.insert(Arc::clone(&observer));

        // A terminal may have raced in between the check and the insert.
        // The terminal path drains the sink, so exactly one side wins the
        // removal and delivers the terminal.
        if self.terminal.read().unwrap().is_some() && self.default_sink.remove(token) {
            let terminal = self.terminal.read().unwrap().clone();
            if let Some(terminal) = terminal {
                terminal.deliver(&observer);
            }
            return Subscription::inert();
        }

        let sink = Arc::clone(&self.default_sink);
        Subscription::new(move || {
            sink.remove(token);
        })
    }

    /// Subscribes an observer through a binding chain.
    ///
    /// An empty chain is a default-sink subscription. Otherwise each
    /// binding narrows the subscription one dimension further; every
    /// partition level is acquired (and lazily created) on the way down
    /// and released in reverse order on disposal.
    ///
    /// # Errors
    ///
    /// Returns a [`SubscribeError`] when the chain cannot be established;
    /// no partial state is left behind.
    pub fn subscribe_chain(
        &self,
        chain: &BindingChain<T>,
        observer: Arc<dyn Observer<T>>,
    ) -> Result<Subscription, SubscribeError> {
        dispatch::subscribe_chain(self, chain, observer)
    }

    /// Starts a binding-chain builder at this hub's root.
    ///
    /// This is the partitionable-artifact surface: `partition(selector)`
    /// opens a dimension, `bind(key, comparer)` narrows it to one key,
    /// and the result can be narrowed further or subscribed.
    pub fn partition<K>(&self, selector: PartitionSelector<T, K>) -> PartitionHandle<T, K>
    where
        K: PartitionKey,
    {
        PartitionHandle {
            hub: self.clone(),
            chain: BindingChain::new(),
            selector,
        }
    }

    /// Delivers the terminal immediately when the hub is already done.
    fn try_subscribe_terminated(&self, observer: &Arc<dyn Observer<T>>) -> Option<Subscription> {
        let terminal = self.terminal.read().unwrap().clone();
        terminal.map(|terminal| {
            terminal.deliver(observer);
            Subscription::inert()
        })
    }

    // --- Introspection ---

    /// Returns the number of live partition dimensions.
    #[must_use]
    pub fn dimension_count(&self) -> usize {
        self.partitions.len()
    }

    /// Returns the number of observers on the default sink.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.default_sink.len()
    }

    pub(crate) fn partitions(
        &self,
    ) -> &Arc<RefCountedRegistry<SelectorId, Arc<dyn PartitionDim<T>>>> {
        &self.partitions
    }

    pub(crate) fn terminal_state(&self) -> Option<Terminal> {
        self.terminal.read().unwrap().clone()
    }

    pub(crate) fn deliver_terminal(&self, terminal: &Terminal, observer: &Arc<dyn Observer<T>>) {
        terminal.deliver(observer);
    }
}

impl<T: Send + Sync + 'static> Default for MulticastHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MulticastHub<T> {
    fn clone(&self) -> Self {
        Self {
            default_sink: Arc::clone(&self.default_sink),
            partitions: Arc::clone(&self.partitions),
            terminal: Arc::clone(&self.terminal),
        }
    }
}

impl<T> fmt::Debug for MulticastHub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MulticastHub")
            .field("observers", &self.default_sink.len())
            .field("dimensions", &self.partitions.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PartitionHandle / PartitionBuilder
// ---------------------------------------------------------------------------

/// An open partition dimension awaiting its key binding.
pub struct PartitionHandle<T, K> {
    hub: MulticastHub<T>,
    chain: BindingChain<T>,
    selector: PartitionSelector<T, K>,
}

impl<T, K> PartitionHandle<T, K>
where
    T: Send + Sync + 'static,
    K: PartitionKey,
{
    /// Binds the dimension to one key under an explicit comparer.
    #[must_use]
    pub fn bind(self, key: K, comparer: Arc<dyn KeyComparer<K>>) -> PartitionBuilder<T> {
        let binding = K::into_binding(TypedBinding::new(self.selector, key, comparer));
        PartitionBuilder {
            hub: self.hub,
            chain: self.chain.bind(binding),
        }
    }

    /// Binds the dimension to one key under the default comparer for `K`.
    #[must_use]
    pub fn bind_default(self, key: K) -> PartitionBuilder<T> {
        let binding = K::into_binding(TypedBinding::with_default(self.selector, key));
        PartitionBuilder {
            hub: self.hub,
            chain: self.chain.bind(binding),
        }
    }
}

/// A bound binding chain, ready to subscribe or to narrow further.
pub struct PartitionBuilder<T> {
    hub: MulticastHub<T>,
    chain: BindingChain<T>,
}

impl<T: Send + Sync + 'static> PartitionBuilder<T> {
    /// Opens a further partition dimension beneath the current chain.
    pub fn partition<K>(self, selector: PartitionSelector<T, K>) -> PartitionHandle<T, K>
    where
        K: PartitionKey,
    {
        PartitionHandle {
            hub: self.hub,
            chain: self.chain,
            selector,
        }
    }

    /// Returns the chain built so far.
    #[must_use]
    pub fn chain(&self) -> &BindingChain<T> {
        &self.chain
    }

    /// Subscribes an observer through the built chain.
    ///
    /// # Errors
    ///
    /// Returns a [`SubscribeError`] when the chain cannot be established.
    pub fn subscribe(
        &self,
        observer: Arc<dyn Observer<T>>,
    ) -> Result<Subscription, SubscribeError> {
        self.hub.subscribe_chain(&self.chain, observer)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparer::{StringComparer, StringComparison};
    use crate::observer::observer_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Event {
        region: &'static str,
        id: i64,
    }

    fn event(region: &'static str, id: i64) -> Event {
        Event { region, id }
    }

    fn region_selector() -> PartitionSelector<Event, Arc<str>> {
        PartitionSelector::named("region", |e: &Event| Arc::from(e.region))
    }

    #[derive(Default)]
    struct Recording {
        values: Mutex<Vec<i64>>,
        errors: Mutex<Vec<StreamError>>,
        completed: AtomicUsize,
    }

    struct RecordingObserver(Arc<Recording>);

    impl Observer<Event> for RecordingObserver {
        fn on_next(&self, value: &Event) {
            self.0.values.lock().unwrap().push(value.id);
        }

        fn on_error(&self, error: &StreamError) {
            self.0.errors.lock().unwrap().push(error.clone());
        }

        fn on_completed(&self) {
            self.0.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recording() -> (Arc<Recording>, Arc<dyn Observer<Event>>) {
        let recording = Arc::new(Recording::default());
        let observer: Arc<dyn Observer<Event>> = Arc::new(RecordingObserver(Arc::clone(&recording)));
        (recording, observer)
    }

    // --- Default sink tests ---

    #[test]
    fn test_default_sink_receives_all_values() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (rec, observer) = recording();
        let _sub = hub.subscribe(observer);

        hub.publish(&event("west", 1));
        hub.publish(&event("east", 2));

        assert_eq!(*rec.values.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_default_sink_unsubscribe() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (rec, observer) = recording();
        let sub = hub.subscribe(observer);

        hub.publish(&event("west", 1));
        sub.dispose();
        hub.publish(&event("west", 2));

        assert_eq!(*rec.values.lock().unwrap(), vec![1]);
        assert_eq!(hub.observer_count(), 0);
    }

    // --- Partition delivery tests ---

    #[test]
    fn test_partitioned_delivery_end_to_end() {
        let hub: MulticastHub<Event> = MulticastHub::new();

        let (west_rec, west_observer) = recording();
        let west_sub = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .subscribe(west_observer)
            .unwrap();

        let (all_rec, all_observer) = recording();
        let _all_sub = hub.subscribe(all_observer);

        hub.publish(&event("west", 1));
        hub.publish(&event("east", 2));
        hub.publish(&event("west", 3));

        // The bound subscriber sees only its partition; the default-sink
        // subscriber sees everything.
        assert_eq!(*west_rec.values.lock().unwrap(), vec![1, 3]);
        assert_eq!(*all_rec.values.lock().unwrap(), vec![1, 2, 3]);

        west_sub.dispose();
        assert_eq!(hub.dimension_count(), 0);
    }

    #[test]
    fn test_partition_no_false_positives() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (rec, observer) = recording();
        let _sub = hub
            .partition(region_selector())
            .bind_default(Arc::from("north"))
            .subscribe(observer)
            .unwrap();

        hub.publish(&event("west", 1));
        hub.publish(&event("east", 2));

        assert!(rec.values.lock().unwrap().is_empty());
    }

    #[test]
    fn test_partition_custom_comparer_ignore_case() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (rec, observer) = recording();
        let _sub = hub
            .partition(region_selector())
            .bind(
                Arc::from("WEST"),
                StringComparer::shared(StringComparison::OrdinalIgnoreCase),
            )
            .subscribe(observer)
            .unwrap();

        hub.publish(&event("west", 1));
        hub.publish(&event("West", 2));
        hub.publish(&event("east", 3));

        assert_eq!(*rec.values.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_multi_level_chain() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let parity = PartitionSelector::named("parity", |e: &Event| e.id % 2);

        let (rec, observer) = recording();
        let _sub = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .partition(parity)
            .bind_default(1)
            .subscribe(observer)
            .unwrap();

        hub.publish(&event("west", 1));
        hub.publish(&event("west", 2));
        hub.publish(&event("east", 3));
        hub.publish(&event("west", 5));

        assert_eq!(*rec.values.lock().unwrap(), vec![1, 5]);
    }

    #[test]
    fn test_same_dimension_two_keys_share_node() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (west_rec, west_observer) = recording();
        let (east_rec, east_observer) = recording();

        let _west = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .subscribe(west_observer)
            .unwrap();
        let _east = hub
            .partition(region_selector())
            .bind_default(Arc::from("east"))
            .subscribe(east_observer)
            .unwrap();

        // Named selectors merge into one dimension.
        assert_eq!(hub.dimension_count(), 1);

        hub.publish(&event("west", 1));
        hub.publish(&event("east", 2));

        assert_eq!(*west_rec.values.lock().unwrap(), vec![1]);
        assert_eq!(*east_rec.values.lock().unwrap(), vec![2]);
    }

    // --- Bulkhead tests ---

    #[test]
    fn test_bulkhead_isolates_selector_panic() {
        let hub: MulticastHub<Event> = MulticastHub::new();

        let failing = PartitionSelector::named("failing", |e: &Event| {
            assert!(e.id != 2, "selector rejects id 2");
            e.id
        });
        let (bad_rec, bad_observer) = recording();
        let _bad = hub
            .partition(failing)
            .bind_default(2)
            .subscribe(bad_observer)
            .unwrap();

        let (good_rec, good_observer) = recording();
        let _good = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .subscribe(good_observer)
            .unwrap();

        let (all_rec, all_observer) = recording();
        let _all = hub.subscribe(all_observer);

        hub.publish(&event("west", 2));

        // The failing dimension's subscriber got the scoped error...
        let errors = bad_rec.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], StreamError::KeyExtraction(_)));
        assert!(bad_rec.values.lock().unwrap().is_empty());

        // ...while the sibling dimension and the default sink were
        // unaffected.
        assert_eq!(*good_rec.values.lock().unwrap(), vec![2]);
        assert_eq!(*all_rec.values.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_observer_panic_does_not_abort_fanout() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let _panicking = hub.subscribe(observer_fn(|_: &Event| panic!("observer bug")));

        let (rec, observer) = recording();
        let _sub = hub.subscribe(observer);
        let (west_rec, west_observer) = recording();
        let _west = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .subscribe(west_observer)
            .unwrap();

        hub.publish(&event("west", 1));

        assert_eq!(*rec.values.lock().unwrap(), vec![1]);
        assert_eq!(*west_rec.values.lock().unwrap(), vec![1]);
    }

    // --- Terminal tests ---

    #[test]
    fn test_complete_broadcasts_to_all_branches() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (sink_rec, sink_observer) = recording();
        let _sink = hub.subscribe(sink_observer);
        let (west_rec, west_observer) = recording();
        let _west = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .subscribe(west_observer)
            .unwrap();

        hub.complete();

        assert_eq!(sink_rec.completed.load(Ordering::SeqCst), 1);
        assert_eq!(west_rec.completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_after_terminal_is_noop() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (rec, observer) = recording();
        let _sub = hub.subscribe(observer);

        hub.complete();
        hub.publish(&event("west", 1));

        assert!(rec.values.lock().unwrap().is_empty());
        assert_eq!(rec.completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_first_terminal_wins() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (rec, observer) = recording();
        let _sub = hub.subscribe(observer);

        hub.error(StreamError::Internal("first".into()));
        hub.complete();
        hub.error(StreamError::Internal("second".into()));

        assert_eq!(rec.errors.lock().unwrap().len(), 1);
        assert_eq!(rec.completed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_late_subscriber_gets_terminal() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        hub.complete();

        let (rec, observer) = recording();
        let sub = hub.subscribe(observer);

        assert_eq!(rec.completed.load(Ordering::SeqCst), 1);
        assert!(sub.is_disposed());
    }

    // --- Teardown tests ---

    #[test]
    fn test_partition_teardown_cascades() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (_, observer) = recording();
        let sub = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .subscribe(observer)
            .unwrap();

        assert_eq!(hub.dimension_count(), 1);
        sub.dispose();
        assert_eq!(hub.dimension_count(), 0);
    }

    #[test]
    fn test_shared_dimension_survives_partial_teardown() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (_, a_observer) = recording();
        let (b_rec, b_observer) = recording();

        let a = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .subscribe(a_observer)
            .unwrap();
        let _b = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .subscribe(b_observer)
            .unwrap();

        a.dispose();

        // The second subscription still holds the dimension and key.
        assert_eq!(hub.dimension_count(), 1);
        hub.publish(&event("west", 9));
        assert_eq!(*b_rec.values.lock().unwrap(), vec![9]);
    }

    #[test]
    fn test_idempotent_partition_disposal() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let (_, a_observer) = recording();
        let (_, b_observer) = recording();

        let a = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .subscribe(a_observer)
            .unwrap();
        let _b = hub
            .partition(region_selector())
            .bind_default(Arc::from("west"))
            .subscribe(b_observer)
            .unwrap();

        // Disposing twice must release the tree levels exactly once, or
        // the second subscription's refs would be stolen.
        a.dispose();
        a.dispose();
        assert_eq!(hub.dimension_count(), 1);
    }

    #[test]
    fn test_dispose_from_observer_callback() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let seen = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&seen);

        let sub = hub.subscribe(observer_fn(move |_: &Event| {
            count.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = inner.lock().unwrap().take() {
                sub.dispose();
            }
        }));
        *slot.lock().unwrap() = Some(sub);

        hub.publish(&event("west", 1));
        hub.publish(&event("west", 2));

        // Disposal from within the callback takes effect by the next
        // publish.
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    // --- Concurrency tests ---

    #[test]
    fn test_concurrent_publish_and_subscribe() {
        let hub: MulticastHub<Event> = MulticastHub::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let hub = hub.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..200 {
                    hub.publish(&event("west", i));
                }
            }));
        }
        for _ in 0..2 {
            let hub = hub.clone();
            let delivered = Arc::clone(&delivered);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let count = Arc::clone(&delivered);
                    let sub = hub
                        .partition(PartitionSelector::named("region", |e: &Event| {
                            Arc::from(e.region)
                        }))
                        .bind_default(Arc::<str>::from("west"))
                        .subscribe(observer_fn(move |_: &Event| {
                            count.fetch_add(1, Ordering::SeqCst);
                        }))
                        .unwrap();
                    sub.dispose();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // All subscriptions were disposed; the tree is fully torn down.
        assert_eq!(hub.dimension_count(), 0);
    }
}
