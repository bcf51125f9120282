//! End-to-end pushdown subscription tests.
//!
//! Drives the full path: predicate → decomposition → binding chain →
//! partition tree → delivery, with a default-sink witness alongside.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use manifold_core::{observer_fn, MulticastHub, Observer, StreamError, StringComparison};
use manifold_expr::{subscribe_where, Expr, FieldValue, Record};

#[derive(Debug, Clone)]
struct Event {
    region: &'static str,
    tier: &'static str,
    id: i64,
}

impl Record for Event {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "region" => Some(FieldValue::Str(Arc::from(self.region))),
            "tier" => Some(FieldValue::Str(Arc::from(self.tier))),
            "id" => Some(FieldValue::Int(self.id)),
            _ => None,
        }
    }
}

fn event(region: &'static str, id: i64) -> Event {
    Event {
        region,
        tier: "gold",
        id,
    }
}

fn collecting() -> (Arc<Mutex<Vec<i64>>>, Arc<dyn Observer<Event>>) {
    let values: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&values);
    let observer = observer_fn(move |e: &Event| sink.lock().unwrap().push(e.id));
    (values, observer)
}

#[test]
fn test_bound_subscriber_sees_only_its_partition() {
    let hub: MulticastHub<Event> = MulticastHub::new();

    let (west_values, west_observer) = collecting();
    let _west = subscribe_where(
        &hub,
        &Expr::field("region").eq_const("west"),
        west_observer,
    )
    .unwrap();

    let (all_values, all_observer) = collecting();
    let _all = hub.subscribe(all_observer);

    hub.publish(&event("west", 1));
    hub.publish(&event("east", 2));
    hub.publish(&event("west", 3));

    assert_eq!(*west_values.lock().unwrap(), vec![1, 3]);
    assert_eq!(*all_values.lock().unwrap(), vec![1, 2, 3]);

    // The subscription binds into the tree instead of filtering at the
    // sink: exactly one partition dimension exists.
    assert_eq!(hub.dimension_count(), 1);
    assert_eq!(hub.observer_count(), 1);
}

#[test]
fn test_residual_runs_downstream_of_binding() {
    let hub: MulticastHub<Event> = MulticastHub::new();

    // region == "west" && id > 1 && tier == "gold": extraction stops at
    // the opaque comparison, so tier stays in the residual too.
    let predicate = Expr::field("region")
        .eq_const("west")
        .and(Expr::other_bool("id > 1", |e: &Event| e.id > 1))
        .and(Expr::field("tier").eq_const("gold"));

    let (values, observer) = collecting();
    let _sub = subscribe_where(&hub, &predicate, observer).unwrap();

    hub.publish(&event("west", 1));
    hub.publish(&event("west", 2));
    hub.publish(&event("east", 9));
    hub.publish(&event("west", 3));

    assert_eq!(*values.lock().unwrap(), vec![2, 3]);
    assert_eq!(hub.dimension_count(), 1);
}

#[test]
fn test_unextractable_predicate_falls_back_to_runtime_filter() {
    let hub: MulticastHub<Event> = MulticastHub::new();
    let predicate = Expr::other_bool("id % 2 == 0", |e: &Event| e.id % 2 == 0);

    let (values, observer) = collecting();
    let _sub = subscribe_where(&hub, &predicate, observer).unwrap();

    for id in 0..5 {
        hub.publish(&event("west", id));
    }

    assert_eq!(*values.lock().unwrap(), vec![0, 2, 4]);
    // No bindings were synthesized: the observer sits on the default
    // sink behind a runtime filter.
    assert_eq!(hub.dimension_count(), 0);
    assert_eq!(hub.observer_count(), 1);
}

#[test]
fn test_ignore_case_mode_binds_folded_key() {
    let hub: MulticastHub<Event> = MulticastHub::new();
    let predicate = Expr::str_eq(
        Expr::field("region"),
        Expr::constant("WEST"),
        StringComparison::OrdinalIgnoreCase,
    );

    let (values, observer) = collecting();
    let _sub = subscribe_where(&hub, &predicate, observer).unwrap();

    hub.publish(&event("west", 1));
    hub.publish(&event("West", 2));
    hub.publish(&event("east", 3));

    assert_eq!(*values.lock().unwrap(), vec![1, 2]);
}

#[test]
fn test_two_predicates_share_one_dimension() {
    let hub: MulticastHub<Event> = MulticastHub::new();

    let (west_values, west_observer) = collecting();
    let (east_values, east_observer) = collecting();
    let _west = subscribe_where(&hub, &Expr::field("region").eq_const("west"), west_observer)
        .unwrap();
    let _east = subscribe_where(&hub, &Expr::field("region").eq_const("east"), east_observer)
        .unwrap();

    // Both rewrites name the selector by the same canonical path, so the
    // dimension is shared and only the keys differ.
    assert_eq!(hub.dimension_count(), 1);

    hub.publish(&event("west", 1));
    hub.publish(&event("east", 2));

    assert_eq!(*west_values.lock().unwrap(), vec![1]);
    assert_eq!(*east_values.lock().unwrap(), vec![2]);
}

#[test]
fn test_disposal_tears_partition_down() {
    let hub: MulticastHub<Event> = MulticastHub::new();
    let (_, observer) = collecting();
    let sub = subscribe_where(&hub, &Expr::field("region").eq_const("west"), observer).unwrap();

    assert_eq!(hub.dimension_count(), 1);
    sub.dispose();
    sub.dispose();
    assert_eq!(hub.dimension_count(), 0);
}

#[test]
fn test_completion_reaches_bound_subscriber() {
    let hub: MulticastHub<Event> = MulticastHub::new();
    let completed = Arc::new(AtomicUsize::new(0));

    struct CompletionProbe(Arc<AtomicUsize>);

    impl Observer<Event> for CompletionProbe {
        fn on_next(&self, _value: &Event) {}

        fn on_completed(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let _sub = subscribe_where(
        &hub,
        &Expr::field("region").eq_const("west"),
        Arc::new(CompletionProbe(Arc::clone(&completed))),
    )
    .unwrap();

    hub.complete();
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_type_mismatch_predicate_surfaces_as_partition_error() {
    let hub: MulticastHub<Event> = MulticastHub::new();
    // The predicate compares a string field against an integer constant;
    // the synthesized integer selector cannot extract a key.
    let predicate = Expr::field("region").eq_const(7i64);

    let errors: Arc<Mutex<Vec<StreamError>>> = Arc::new(Mutex::new(Vec::new()));

    struct ErrorProbe(Arc<Mutex<Vec<StreamError>>>);

    impl Observer<Event> for ErrorProbe {
        fn on_next(&self, _value: &Event) {}

        fn on_error(&self, error: &StreamError) {
            self.0.lock().unwrap().push(error.clone());
        }
    }

    let _sub = subscribe_where(&hub, &predicate, Arc::new(ErrorProbe(Arc::clone(&errors))))
        .unwrap();

    hub.publish(&event("west", 1));

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], StreamError::KeyExtraction(_)));
}
