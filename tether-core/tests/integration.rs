//! Integration Tests for the Reactive Engine
//!
//! These tests drive signals, monitors and the scheduler together through the
//! public API only.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use tether_core::{
    Compare, CompareError, Emitter, FlushMode, MonitorState, ReactiveError, Readable, Runtime,
    RuntimeConfig, SignalOptions,
};

fn counter() -> (Arc<AtomicI32>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicI32::new(0));
    let c = count.clone();
    (count, move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

/// Several writes in one block reach a dependent monitor once, with the
/// final value.
#[test]
fn monitor_notified_once_per_flush() {
    let runtime = Runtime::new();
    let count = runtime.signal(0);
    let monitor = runtime.monitor();
    let (hits, bump) = counter();
    let _sub = monitor.subscribe(bump);

    monitor.run(|m| count.read(m));
    for value in 1..=10 {
        count.write(value).unwrap();
    }
    let report = runtime.flush().unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(report.panicked, 0);
    assert_eq!(monitor.run(|m| count.read(m)), 10);
}

/// Writing an equal value schedules nothing.
#[test]
fn equal_write_schedules_nothing() {
    let runtime = Runtime::new();
    let signal = runtime.signal(5);
    let monitor = runtime.monitor();
    let (hits, bump) = counter();
    let _sub = monitor.subscribe(bump);
    monitor.run(|m| signal.read(m));

    assert!(!signal.write(5).unwrap());
    assert!(!runtime.has_pending());
    assert_eq!(runtime.flush().unwrap().jobs, 0);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(monitor.state(), MonitorState::Idle);
}

/// A derived signal over two sources recomputes once when both change.
#[test]
fn derived_recomputes_once_for_batch() {
    let runtime = Runtime::new();
    let a = runtime.signal(1);
    let b = runtime.signal(2);
    let (computes, bump) = counter();

    let (a2, b2) = (a.clone(), b.clone());
    let sum = runtime.derived(move |m| {
        bump();
        a2.read(m) + b2.read(m)
    });
    let monitor = runtime.monitor();
    assert_eq!(monitor.run(|m| sum.read(m)), 3);

    a.write(10).unwrap();
    b.write(20).unwrap();
    runtime.flush().unwrap();

    assert!(monitor.is_stale());
    assert_eq!(monitor.run(|m| sum.read(m)), 30);
    assert_eq!(monitor.run(|m| sum.read(m)), 30);
    assert_eq!(computes.load(Ordering::SeqCst), 2);
}

/// Reads inside `untracked` never notify the monitor.
#[test]
fn untracked_reads_do_not_notify() {
    let runtime = Runtime::new();
    let hidden = runtime.signal(1);
    let monitor = runtime.monitor();
    let (hits, bump) = counter();
    let _sub = monitor.subscribe(bump);

    let value = monitor.run(|m| m.untracked(|_| hidden.read(m)));
    assert_eq!(value, 1);
    assert_eq!(monitor.dependency_count(), 0);

    hidden.write(2).unwrap();
    runtime.flush().unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(monitor.state(), MonitorState::Idle);

    // The standalone form behaves the same way.
    assert_eq!(runtime.untracked(|m| hidden.read(m)), 2);
    assert_eq!(hidden.dependent_count(), 0);
}

/// Dependencies from a previous run do not linger.
#[test]
fn dependency_sets_are_exact() {
    let runtime = Runtime::new();
    let use_a = runtime.signal(true);
    let a = runtime.signal(1);
    let b = runtime.signal(2);

    let runs = Arc::new(AtomicI32::new(0));
    let (flag, a2, b2, r) = (use_a.clone(), a.clone(), b.clone(), runs.clone());
    let effect = runtime.effect(move |m| {
        r.fetch_add(1, Ordering::SeqCst);
        if flag.read(m) {
            a2.read(m);
        } else {
            b2.read(m);
        }
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    use_a.write(false).unwrap();
    runtime.flush().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    a.write(100).unwrap();
    runtime.flush().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(a.dependent_count(), 0);
    assert_eq!(effect.dependency_count(), 2);
}

/// `read(write(x))` is `x`, unless the comparator called `x` equal, in which
/// case the old value is kept.
#[test]
fn write_read_round_trip_keeps_old_value_when_equal() {
    let runtime = Runtime::new();
    let original: Arc<Vec<i32>> = Arc::new(vec![1, 2, 3]);
    let structural = Compare::new(|left: &Arc<Vec<i32>>, right: &Arc<Vec<i32>>| left == right);
    let signal = runtime.signal_with(original.clone(), structural);

    let equal_copy = Arc::new(vec![1, 2, 3]);
    assert!(!signal.write(equal_copy.clone()).unwrap());
    let stored = signal.read_untracked();
    assert!(Arc::ptr_eq(&stored, &original));
    assert!(!Arc::ptr_eq(&stored, &equal_copy));

    let different = Arc::new(vec![4]);
    assert!(signal.write(different.clone()).unwrap());
    assert!(Arc::ptr_eq(&signal.read_untracked(), &different));
}

/// With the default identity comparator an equal-but-distinct `Arc` is a
/// change.
#[test]
fn identity_compare_sees_new_allocation() {
    let runtime = Runtime::new();
    let signal = runtime.signal(Arc::new(String::from("same")));

    assert!(signal.write(Arc::new(String::from("same"))).unwrap());
    assert_eq!(signal.version(), 1);
}

/// One panicking listener does not stop the next.
#[test]
fn listener_panic_is_isolated() {
    let emitter: Emitter<i32, i32> = Emitter::new();
    let _first = emitter.subscribe(|_| panic!("listener failed"));
    let _second = emitter.subscribe(|value| value * 2);

    let results = emitter.emit(&21);
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], Err(ReactiveError::ListenerPanicked(_))));
    assert_eq!(results[1].as_ref().ok(), Some(&42));
}

/// A panicking signal listener neither blocks other listeners nor leaves
/// work behind in the queue.
#[test]
fn flush_survives_panicking_listener() {
    let runtime = Runtime::new();
    let a = runtime.signal(0);
    let (hits, bump) = counter();
    let _bad = a.subscribe(|| panic!("listener failed"));
    let _good = a.subscribe(bump);

    a.write(1).unwrap();
    runtime.flush().unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!runtime.has_pending());
}

/// Dropping every handle to a derived signal returns the upstream dependent
/// count to its earlier value.
#[test]
fn weak_dependency_cleanup() {
    let runtime = Runtime::new();
    let source = runtime.signal(1);
    let keeper = runtime.monitor();
    keeper.run(|m| source.read(m));
    let before = source.dependent_count();

    {
        let s = source.clone();
        let derived = runtime.derived(move |m| s.read(m) * 2);
        let consumer = runtime.monitor();
        assert_eq!(consumer.run(|m| derived.read(m)), 2);
        assert_eq!(source.dependent_count(), before + 1);
    }

    source.collect_garbage();
    assert_eq!(source.dependent_count(), before);

    source.write(2).unwrap();
    assert_eq!(runtime.flush().unwrap().panicked, 0);
}

/// A comparator that fails leaves the value alone and surfaces the error.
#[test]
fn comparator_error_propagates_to_writer() {
    let runtime = Runtime::new();
    let signal = runtime.signal_with_options(
        String::from("draft"),
        SignalOptions::with_compare(Compare::fallible(|_: &String, _: &String| {
            Err(CompareError::new("locked"))
        }))
        .label("document"),
    );

    match signal.write(String::from("final")) {
        Err(ReactiveError::Compare(err)) => assert_eq!(err.message(), "locked"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(signal.read_untracked(), "draft");
    assert!(!runtime.has_pending());
}

/// Union comparison: a tag change is caught without the payload comparator.
#[test]
fn union_compare_short_circuits_on_primary() {
    #[derive(Clone, Debug, PartialEq)]
    enum Field {
        Empty,
        Text(String),
    }

    impl tether_core::Identity for Field {
        fn identical(&self, other: &Self) -> bool {
            match (self, other) {
                (Field::Empty, Field::Empty) => true,
                (Field::Text(a), Field::Text(b)) => a.as_ptr() == b.as_ptr(),
                _ => false,
            }
        }
    }

    let payload_checks = Arc::new(AtomicI32::new(0));
    let p = payload_checks.clone();
    let compare = Compare::union(
        |field: &Field| matches!(field, Field::Empty),
        Compare::new(move |left: &Field, right: &Field| {
            p.fetch_add(1, Ordering::SeqCst);
            left == right
        }),
    );

    let runtime = Runtime::new();
    let field = runtime.signal_with(Field::Empty, compare);

    assert!(field.write(Field::Text("a".into())).unwrap());
    assert_eq!(payload_checks.load(Ordering::SeqCst), 0);

    assert!(!field.write(Field::Text("a".into())).unwrap());
    assert_eq!(payload_checks.load(Ordering::SeqCst), 1);
}

/// Writing during a tracked computation does not re-enter the writer.
#[test]
fn write_inside_computation_is_deferred() {
    let runtime = Runtime::new();
    let input = runtime.signal(1);
    let output = runtime.signal(0);
    let monitor = runtime.monitor();
    let (hits, bump) = counter();
    let _sub = monitor.subscribe(bump);

    monitor.run(|m| {
        let value = input.read(m);
        output.write(value * 10).unwrap();
        input.write(value + 1).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    });

    assert_eq!(output.read_untracked(), 10);
    runtime.flush().unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

/// Flush-time writes go to a later pass by default and can be coalesced into
/// the running pass instead.
#[test]
fn flush_mode_controls_writes_during_flush() {
    for mode in [FlushMode::Deferred, FlushMode::Coalesce] {
        let runtime = Runtime::with_config(RuntimeConfig::default().with_flush_mode(mode));
        let a = runtime.signal(0);
        let b = runtime.signal(0);
        let b2 = b.clone();
        let _forward = a.subscribe(move || {
            b2.update(|v| v + 1).unwrap();
        });
        let (hits, bump) = counter();
        let _sub = b.subscribe(bump);

        a.write(1).unwrap();
        let report = runtime.flush().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1, "{mode:?}");
        assert_eq!(report.jobs, 2, "{mode:?}");
        let expected_rounds = match mode {
            FlushMode::Deferred => 2,
            FlushMode::Coalesce => 1,
        };
        assert_eq!(report.rounds, expected_rounds, "{mode:?}");
    }
}

/// The factory bridges a monitor into an external subscribe callback.
#[test]
fn factory_drives_external_store() {
    let runtime = Runtime::new();
    let items = runtime.signal_with(Vec::<i32>::new(), Compare::partial_eq());
    let i = items.clone();
    let total = runtime.derived(move |m| i.read(m).iter().sum::<i32>());

    let factory = runtime.monitor_factory();
    let snapshots = Arc::new(Mutex::new(Vec::new()));
    let (renders, bump) = counter();
    let _connection = factory.connect(bump);

    let render = |snapshots: &Arc<Mutex<Vec<i32>>>| {
        let monitor = factory.create();
        let value = monitor.run(|m| total.read(m));
        snapshots.lock().unwrap().push(value);
    };

    render(&snapshots);
    items
        .update(|v| {
            let mut next = v.clone();
            next.push(3);
            next
        })
        .unwrap();
    runtime.flush().unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    render(&snapshots);
    // Structurally equal write: no change, no render.
    items.write(vec![3]).unwrap();
    runtime.flush().unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    assert_eq!(*snapshots.lock().unwrap(), vec![0, 3]);
}

/// A runtime configured from JSON behaves like the builder form.
#[test]
fn runtime_from_json_config() {
    let config = RuntimeConfig::from_json(r#"{ "auto_flush": true }"#).unwrap();
    let runtime = Runtime::with_config(config);
    let a = runtime.signal(0);
    let (hits, bump) = counter();
    let _sub = a.subscribe(bump);

    a.write(1).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(RuntimeConfig::from_json("{ not json").is_err());
}

/// Signals and derived signals share the `Readable` capability.
#[test]
fn readable_is_shared_by_both_variants() {
    fn read_all(sources: &[&dyn Readable<i32>], runtime: &Runtime) -> i32 {
        runtime.untracked(|m| sources.iter().map(|s| s.read(m)).sum())
    }

    let runtime = Runtime::new();
    let a = runtime.signal(2);
    let a2 = a.clone();
    let squared = runtime.derived(move |m| a2.read(m) * a2.read(m));

    let sources: [&dyn Readable<i32>; 2] = [&a, &squared];
    assert_eq!(read_all(&sources, &runtime), 6);
}
