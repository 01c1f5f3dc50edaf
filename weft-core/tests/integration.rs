//! End-to-end scenarios for the tracking runtime.
//!
//! Each test wires real containers, watchers, and the flush scheduler
//! together the way a host would, driving the deferred flush through a
//! captured tick queue.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use weft_core::reactive::{
    callback, del, observe, observe_root, set, set_error_sink, set_tick, set_warn_sink, Job,
    Watcher, WatcherOptions,
};
use weft_core::value::{List, Object, Value};

/// Captures deferred flush jobs so the test decides when a tick happens.
struct Tick {
    jobs: Rc<RefCell<Vec<Job>>>,
}

impl Tick {
    fn install() -> Tick {
        let jobs: Rc<RefCell<Vec<Job>>> = Rc::default();
        let queue = jobs.clone();
        set_tick(Some(move |job: Job| queue.borrow_mut().push(job)));
        Tick { jobs }
    }

    fn advance(&self) {
        let pending: Vec<Job> = self.jobs.borrow_mut().drain(..).collect();
        for job in pending {
            job();
        }
    }
}

impl Drop for Tick {
    fn drop(&mut self) {
        set_tick(None::<fn(Job)>);
    }
}

fn tracked(fields: &[(&str, Value)]) -> Object {
    let object = Object::from_entries(fields.iter().map(|(k, v)| (k.to_string(), v.clone())));
    observe(&Value::Object(object.clone()));
    object
}

#[test]
fn writes_coalesce_into_one_callback_per_flush() {
    let tick = Tick::install();
    let state = tracked(&[("a", Value::Int(1)), ("b", Value::Int(2))]);

    let deliveries: Arc<Mutex<Vec<(i64, i64)>>> = Arc::default();
    let log = deliveries.clone();
    let source = state.clone();
    let _watcher = Watcher::new(
        move || {
            let a = source.get("a").as_i64().unwrap_or(0);
            let b = source.get("b").as_i64().unwrap_or(0);
            Ok(Value::Int(a + b))
        },
        Some(callback(move |new, old| {
            log.lock()
                .unwrap()
                .push((old.as_i64().unwrap_or(-1), new.as_i64().unwrap_or(-1)));
            Ok(())
        })),
        WatcherOptions::default(),
    );

    state.set("a", 10);
    state.set("b", 20);
    assert!(deliveries.lock().unwrap().is_empty());

    tick.advance();
    assert_eq!(*deliveries.lock().unwrap(), vec![(3, 30)]);
}

#[test]
fn path_watcher_survives_intermediate_replacement() {
    let tick = Tick::install();

    let profile = Object::new();
    profile.insert_untracked("name", "ada");
    let state = tracked(&[("profile", Value::Object(profile))]);

    let names: Arc<Mutex<Vec<String>>> = Arc::default();
    let log = names.clone();
    let _watcher = Watcher::for_path(
        &state,
        "profile.name",
        Some(callback(move |new, _| {
            log.lock()
                .unwrap()
                .push(new.as_str().unwrap_or_default().to_string());
            Ok(())
        })),
        WatcherOptions::default(),
    );

    // Replacing the whole intermediate object still reaches the watcher
    // because the read path re-collects deps on every run.
    let replacement = Object::new();
    replacement.insert_untracked("name", "grace");
    state.set("profile", replacement);
    tick.advance();
    assert_eq!(*names.lock().unwrap(), vec!["grace".to_string()]);

    // And the new intermediate is tracked in turn.
    state
        .get_untracked("profile")
        .as_object()
        .expect("object")
        .set("name", "edsger");
    tick.advance();
    assert_eq!(
        *names.lock().unwrap(),
        vec!["grace".to_string(), "edsger".to_string()]
    );
}

#[test]
fn computed_values_recompute_only_on_demand() {
    let state = tracked(&[("n", Value::Int(2))]);

    let evaluations = Arc::new(AtomicUsize::new(0));
    let hits = evaluations.clone();
    let source = state.clone();
    let doubled = Watcher::new(
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(source.get("n").as_i64().unwrap_or(0) * 2))
        },
        None,
        WatcherOptions {
            lazy: true,
            ..Default::default()
        },
    );

    // Lazy watchers do not evaluate at construction.
    assert_eq!(evaluations.load(Ordering::SeqCst), 0);
    assert!(doubled.is_dirty());

    doubled.evaluate().expect("evaluate");
    assert_eq!(doubled.value().as_i64(), Some(4));
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);

    // A write only marks dirty; no recompute until asked.
    state.set("n", 5);
    assert!(doubled.is_dirty());
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);

    doubled.evaluate().expect("evaluate");
    assert_eq!(doubled.value().as_i64(), Some(10));
    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
}

#[test]
fn list_of_records_drives_an_aggregate() {
    let tick = Tick::install();

    let first = Object::new();
    first.insert_untracked("qty", 2);
    let items = List::from_values([Value::Object(first.clone())]);
    observe(&Value::List(items.clone()));

    let totals: Arc<Mutex<Vec<i64>>> = Arc::default();
    let log = totals.clone();
    let source = items.clone();
    let _watcher = Watcher::new(
        move || {
            let total: i64 = source
                .snapshot()
                .iter()
                .filter_map(|item| item.as_object().map(|o| o.get("qty")))
                .filter_map(|qty| qty.as_i64())
                .sum();
            Ok(Value::Int(total))
        },
        Some(callback(move |new, _| {
            log.lock().unwrap().push(new.as_i64().unwrap_or(-1));
            Ok(())
        })),
        WatcherOptions::default(),
    );

    // Structural change.
    let second = Object::new();
    second.insert_untracked("qty", 3);
    items.push(Value::Object(second.clone()));
    tick.advance();
    assert_eq!(*totals.lock().unwrap(), vec![5]);

    // The pushed element was wrapped on insert, so its fields are live.
    second.set("qty", 10);
    tick.advance();
    assert_eq!(*totals.lock().unwrap(), vec![5, 12]);

    // Splicing out the first record.
    items.splice(0, 1, Vec::new());
    tick.advance();
    assert_eq!(*totals.lock().unwrap(), vec![5, 12, 10]);
}

#[test]
fn conditional_reads_prune_stale_subscriptions() {
    let tick = Tick::install();
    let state = tracked(&[
        ("use_a", Value::Bool(true)),
        ("a", Value::Int(1)),
        ("b", Value::Int(100)),
    ]);

    let runs = Arc::new(AtomicUsize::new(0));
    let hits = runs.clone();
    let source = state.clone();
    let _watcher = Watcher::new(
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
            if source.get("use_a").as_bool().unwrap_or(false) {
                Ok(source.get("a"))
            } else {
                Ok(source.get("b"))
            }
        },
        None,
        WatcherOptions::default(),
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    state.set("use_a", false);
    tick.advance();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // `a` is no longer read; writes to it must not re-run the watcher.
    state.set("a", 2);
    tick.advance();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    state.set("b", 200);
    tick.advance();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[test]
fn dynamic_fields_arrive_and_leave_through_set_and_del() {
    let tick = Tick::install();
    let state = tracked(&[("present", Value::Int(1))]);

    let shapes: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
    let log = shapes.clone();
    let source = state.clone();
    let _watcher = Watcher::new(
        move || {
            log.lock().unwrap().push(source.keys());
            Ok(Value::Int(source.len() as i64))
        },
        None,
        WatcherOptions::default(),
    );

    set(&Value::Object(state.clone()), "extra", 2);
    tick.advance();
    del(&Value::Object(state.clone()), "present");
    tick.advance();

    let seen = shapes.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], vec!["present".to_string()]);
    assert_eq!(seen[1], vec!["present".to_string(), "extra".to_string()]);
    assert_eq!(seen[2], vec!["extra".to_string()]);
}

#[test]
fn protected_roots_refuse_shape_changes() {
    let warnings: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = warnings.clone();
    set_warn_sink(Some(move |msg: &str| sink.borrow_mut().push(msg.to_string())));

    let root = Object::new();
    root.insert_untracked("declared", 0);
    observe_root(&Value::Object(root.clone())).expect("wrapped");

    set(&Value::Object(root.clone()), "later", 1);
    del(&Value::Object(root.clone()), "declared");

    assert!(!root.contains_key("later"));
    assert!(root.contains_key("declared"));
    assert_eq!(warnings.borrow().len(), 2);

    // Existing declared fields stay writable.
    root.set("declared", 7);
    assert_eq!(root.get_untracked("declared").as_i64(), Some(7));

    set_warn_sink(None::<fn(&str)>);
}

#[test]
fn torn_down_watchers_receive_nothing() {
    let tick = Tick::install();
    let state = tracked(&[("n", Value::Int(0))]);

    let runs = Arc::new(AtomicUsize::new(0));
    let hits = runs.clone();
    let source = state.clone();
    let watcher = Watcher::new(
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(source.get("n"))
        },
        None,
        WatcherOptions::default(),
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    watcher.teardown();
    assert!(!watcher.is_active());

    state.set("n", 1);
    tick.advance();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn failing_user_watchers_report_and_do_not_poison_the_flush() {
    let tick = Tick::install();
    let state = tracked(&[("n", Value::Int(0))]);

    let errors: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = errors.clone();
    set_error_sink(Some(move |error: &weft_core::Error| {
        sink.borrow_mut().push(error.to_string());
    }));

    let source = state.clone();
    let failing = Watcher::new(
        move || {
            if source.get("n").as_i64().unwrap_or(0) > 0 {
                Err("boom".into())
            } else {
                Ok(source.get("n"))
            }
        },
        None,
        WatcherOptions {
            user: true,
            ..Default::default()
        },
    );

    let runs = Arc::new(AtomicUsize::new(0));
    let hits = runs.clone();
    let source = state.clone();
    let _healthy = Watcher::new(
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(source.get("n"))
        },
        None,
        WatcherOptions::default(),
    );

    state.set("n", 1);
    tick.advance();

    // The failure reached the sink, the failing watcher settled on Null,
    // and the healthy watcher still ran in the same flush.
    assert_eq!(errors.borrow().len(), 1);
    assert!(failing.value().is_null());
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    set_error_sink(None::<fn(&weft_core::Error)>);
}

#[test]
fn nan_rewrites_are_quiescent() {
    let tick = Tick::install();
    let state = tracked(&[("ratio", Value::Float(f64::NAN))]);

    let runs = Arc::new(AtomicUsize::new(0));
    let hits = runs.clone();
    let source = state.clone();
    let _watcher = Watcher::new(
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(source.get("ratio"))
        },
        None,
        WatcherOptions::default(),
    );

    state.set("ratio", f64::NAN);
    tick.advance();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn deep_watch_reaches_freshly_nested_containers() {
    let tick = Tick::install();
    let state = tracked(&[("tree", Value::Object(Object::new()))]);

    let runs = Arc::new(AtomicUsize::new(0));
    let hits = runs.clone();
    let source = state.clone();
    let _watcher = Watcher::new(
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(source.get("tree"))
        },
        None,
        WatcherOptions {
            deep: true,
            ..Default::default()
        },
    );

    // Graft a new subtree, then mutate inside it: both notify.
    let leaf = Object::new();
    leaf.insert_untracked("x", 1);
    state
        .get_untracked("tree")
        .as_object()
        .expect("object")
        .set("leaf", Value::Object(leaf.clone()));
    tick.advance();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    leaf.set("x", 2);
    tick.advance();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}
