//! Watchers
//!
//! A `Watcher` is one tracked computation: a render pass, a user-supplied
//! watch expression, or a lazy derived value. It evaluates a getter over
//! current state, records exactly the dependencies read during that
//! evaluation, and re-runs (directly, lazily, or through the scheduler)
//! when any of them notifies.
//!
//! # Evaluation protocol
//!
//! `get` pushes the watcher onto the thread-local target stack, runs the
//! getter, optionally force-reads the whole result subtree (deep mode),
//! pops the stack, and reconciles dependency sets: deps touched this time
//! but not last time are newly subscribed, deps from the previous
//! evaluation that were not touched are unsubscribed. The sets are
//! double-buffered ("current" and "pending") and swapped in O(1) after
//! every evaluation, so a branch change in the getter re-binds
//! dependencies without ever missing a notification.
//!
//! # Update modes
//!
//! - lazy: a notification only flips the dirty flag; consumers call
//!   `evaluate` when they actually need the value (computed values).
//! - sync: re-run immediately inside the notification.
//! - default: hand off to the scheduler for batched, deduplicated,
//!   id-ordered execution.
//!
//! # Error policy
//!
//! Failures from user-defined watchers (getter or callback) are caught here
//! and reported through the error sink so one broken listener cannot
//! corrupt a flush. Failures from internal watchers propagate to the flush
//! driver.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DynError, Error};
use crate::value::{Object, Value};

use super::dep::{self, Dep, DepId};
use super::runtime;
use super::scheduler;
use super::traverse::traverse;

/// Unique identifier for a watcher.
///
/// Strictly increasing in creation order; the scheduler's flush order is
/// ascending id, which is what guarantees parent-before-child execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Evaluation function: reads current state, produces a value.
pub type Getter = Arc<dyn Fn() -> Result<Value, DynError> + Send + Sync>;

/// Change callback, invoked with `(new_value, old_value)`.
pub type Callback = Arc<dyn Fn(&Value, &Value) -> Result<(), DynError> + Send + Sync>;

/// Wrap a closure as a [`Callback`].
pub fn callback(
    f: impl Fn(&Value, &Value) -> Result<(), DynError> + Send + Sync + 'static,
) -> Callback {
    Arc::new(f)
}

/// Mode flags and hooks for a new watcher.
#[derive(Default)]
pub struct WatcherOptions {
    /// Force-read the entire result subtree after every evaluation so
    /// nested mutations are observed.
    pub deep: bool,
    /// User-defined watcher: its failures are reported, never propagated.
    pub user: bool,
    /// Lazy watcher: notifications mark it dirty instead of re-running.
    pub lazy: bool,
    /// Synchronous watcher: re-runs inside the notification, skipping the
    /// scheduler.
    pub sync: bool,
    /// Hook invoked by the scheduler right before this watcher runs in a
    /// flush.
    pub before: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Double-buffered dependency bookkeeping plus the last computed value.
struct TrackedState {
    value: Value,
    deps: Vec<Arc<Dep>>,
    new_deps: Vec<Arc<Dep>>,
    dep_ids: HashSet<DepId>,
    new_dep_ids: HashSet<DepId>,
}

/// A tracked computation with dynamic dependency re-binding.
pub struct Watcher {
    id: WatcherId,
    deep: bool,
    user: bool,
    lazy: bool,
    sync: bool,
    getter: Getter,
    cb: Option<Callback>,
    before: Option<Box<dyn Fn() + Send + Sync>>,
    active: AtomicBool,
    dirty: AtomicBool,
    state: Mutex<TrackedState>,
}

impl Watcher {
    /// Create a watcher.
    ///
    /// Eager watchers (the default) evaluate immediately to establish their
    /// initial dependency set; lazy watchers start dirty with a `Null`
    /// value and evaluate on first demand. A construction-time evaluation
    /// failure of an internal watcher is reported to the error sink, since
    /// there is no flush to abort yet.
    pub fn new<G>(getter: G, cb: Option<Callback>, options: WatcherOptions) -> Arc<Watcher>
    where
        G: Fn() -> Result<Value, DynError> + Send + Sync + 'static,
    {
        let lazy = options.lazy;
        let watcher = Arc::new(Watcher {
            id: WatcherId::new(),
            deep: options.deep,
            user: options.user,
            lazy,
            sync: options.sync,
            getter: Arc::new(getter),
            cb,
            before: options.before,
            active: AtomicBool::new(true),
            dirty: AtomicBool::new(lazy),
            state: Mutex::new(TrackedState {
                value: Value::Null,
                deps: Vec::new(),
                new_deps: Vec::new(),
                dep_ids: HashSet::new(),
                new_dep_ids: HashSet::new(),
            }),
        });

        if !lazy {
            match watcher.get() {
                Ok(value) => watcher.state.lock().value = value,
                Err(error) => runtime::report_error(&error),
            }
        }

        watcher
    }

    /// Create a watcher over a dot-delimited field path rooted at `root`.
    ///
    /// The getter walks the path through tracked reads, yielding `Null`
    /// when an intermediate segment is missing or not an object. An invalid
    /// path (empty, or containing non-identifier segments) warns and
    /// produces a getter that always yields `Null`.
    pub fn for_path(
        root: &Object,
        path: &str,
        cb: Option<Callback>,
        options: WatcherOptions,
    ) -> Arc<Watcher> {
        match parse_path(path) {
            Some(segments) => {
                let root = root.clone();
                Watcher::new(
                    move || {
                        let mut current = Value::Object(root.clone());
                        for segment in &segments {
                            match current.as_object() {
                                Some(object) => current = object.get(segment),
                                None => return Ok(Value::Null),
                            }
                        }
                        Ok(current)
                    },
                    cb,
                    options,
                )
            }
            None => {
                runtime::warn(&format!(
                    "failed watching path {path:?}: only dot-delimited identifier paths are supported"
                ));
                Watcher::new(|| Ok(Value::Null), cb, options)
            }
        }
    }

    /// This watcher's unique ID.
    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// Whether this watcher is user-defined.
    pub fn is_user(&self) -> bool {
        self.user
    }

    /// Whether this watcher is still active (not torn down).
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether a lazy watcher needs re-evaluation.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// The value from the most recent evaluation.
    pub fn value(&self) -> Value {
        self.state.lock().value.clone()
    }

    /// Number of dependencies held after the last evaluation.
    pub fn dep_count(&self) -> usize {
        self.state.lock().deps.len()
    }

    /// Evaluate the getter and re-collect dependencies.
    pub(crate) fn get(self: &Arc<Self>) -> Result<Value, Error> {
        dep::push_target(self.clone());
        let outcome = match (self.getter)() {
            Ok(value) => {
                // "Touch" every nested property so the whole subtree is
                // tracked for deep watchers.
                if self.deep {
                    traverse(&value);
                }
                Ok(value)
            }
            Err(source) => {
                let error = Error::Getter {
                    id: self.id.raw(),
                    source,
                };
                if self.user {
                    runtime::report_error(&error);
                    Ok(Value::Null)
                } else {
                    Err(error)
                }
            }
        };
        dep::pop_target();
        self.cleanup_deps();
        outcome
    }

    /// Record a dependency touched during the current evaluation.
    ///
    /// Called by `Dep::depend`. Subscribes this watcher to the dep unless
    /// the previous evaluation already did.
    pub(crate) fn add_dep(self: &Arc<Self>, dep: &Arc<Dep>) {
        let subscribe = {
            let mut state = self.state.lock();
            if state.new_dep_ids.contains(&dep.id()) {
                false
            } else {
                state.new_dep_ids.insert(dep.id());
                state.new_deps.push(dep.clone());
                !state.dep_ids.contains(&dep.id())
            }
        };
        if subscribe {
            dep.add_sub(self);
        }
    }

    /// Reconcile dependency sets after an evaluation.
    ///
    /// Unsubscribes from deps the getter no longer reads, then swaps the
    /// current and pending buffers.
    fn cleanup_deps(&self) {
        let stale: Vec<Arc<Dep>> = {
            let mut state = self.state.lock();
            let stale = state
                .deps
                .iter()
                .filter(|dep| !state.new_dep_ids.contains(&dep.id()))
                .cloned()
                .collect();
            let TrackedState {
                deps,
                new_deps,
                dep_ids,
                new_dep_ids,
                ..
            } = &mut *state;
            std::mem::swap(dep_ids, new_dep_ids);
            new_dep_ids.clear();
            std::mem::swap(deps, new_deps);
            new_deps.clear();
            stale
        };
        for dep in stale {
            dep.remove_sub(self.id);
        }
    }

    /// Notification entry point, invoked by a `Dep`.
    ///
    /// Ignored after teardown.
    pub fn update(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        if self.lazy {
            self.dirty.store(true, Ordering::SeqCst);
        } else if self.sync {
            if let Err(error) = self.run() {
                runtime::report_error(&error);
            }
        } else {
            scheduler::queue_watcher(self.clone());
        }
    }

    /// Scheduler entry point: re-evaluate and fire the callback on change.
    ///
    /// Container-typed and deep results are always re-delivered, since
    /// internal mutation is invisible to identity comparison.
    pub(crate) fn run(self: &Arc<Self>) -> Result<(), Error> {
        if !self.is_active() {
            return Ok(());
        }
        let value = self.get()?;
        let old = self.state.lock().value.clone();
        if !value.same(&old) || value.is_container() || self.deep {
            self.state.lock().value = value.clone();
            if let Some(cb) = &self.cb {
                if let Err(source) = cb(&value, &old) {
                    let error = Error::Callback {
                        id: self.id.raw(),
                        source,
                    };
                    if self.user {
                        runtime::report_error(&error);
                    } else {
                        return Err(error);
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-evaluate a lazy watcher and clear its dirty flag.
    pub fn evaluate(self: &Arc<Self>) -> Result<(), Error> {
        let value = self.get()?;
        self.state.lock().value = value;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Re-register every held dep against the currently active watcher.
    ///
    /// Lets a lazy (computed) watcher's dependencies bubble into whichever
    /// watcher is consuming its value.
    pub fn depend(&self) {
        let deps = self.state.lock().deps.clone();
        for dep in &deps {
            dep.depend();
        }
    }

    /// Unsubscribe from every dep and go inactive. Idempotent; later
    /// `update` calls are ignored.
    pub fn teardown(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            let deps = {
                let mut state = self.state.lock();
                state.dep_ids.clear();
                std::mem::take(&mut state.deps)
            };
            for dep in deps {
                dep.remove_sub(self.id);
            }
        }
    }

    /// Invoke the before-flush hook, if any.
    pub(crate) fn call_before(&self) {
        if let Some(before) = &self.before {
            before();
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("lazy", &self.lazy)
            .field("active", &self.is_active())
            .field("dep_count", &self.dep_count())
            .finish()
    }
}

/// Split a dot-delimited path into identifier segments.
fn parse_path(path: &str) -> Option<Vec<String>> {
    if path.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    for segment in path.split('.') {
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            return None;
        }
        segments.push(segment.to_string());
    }
    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_getter(dep: Arc<Dep>, count: Arc<AtomicUsize>) -> impl Fn() -> Result<Value, DynError> + Send + Sync {
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            dep.depend();
            Ok(Value::Int(count.load(Ordering::SeqCst) as i64))
        }
    }

    #[test]
    fn watcher_ids_increase_with_creation_order() {
        let a = Watcher::new(|| Ok(Value::Null), None, WatcherOptions::default());
        let b = Watcher::new(|| Ok(Value::Null), None, WatcherOptions::default());
        assert!(a.id() < b.id());
    }

    #[test]
    fn eager_watcher_evaluates_on_creation() {
        let count = Arc::new(AtomicUsize::new(0));
        let dep = Dep::new();
        let watcher = Watcher::new(
            counting_getter(dep.clone(), count.clone()),
            None,
            WatcherOptions::default(),
        );

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.dep_count(), 1);
        assert_eq!(dep.subscriber_count(), 1);
    }

    #[test]
    fn lazy_watcher_defers_evaluation() {
        let count = Arc::new(AtomicUsize::new(0));
        let dep = Dep::new();
        let watcher = Watcher::new(
            counting_getter(dep.clone(), count.clone()),
            None,
            WatcherOptions {
                lazy: true,
                ..Default::default()
            },
        );

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(watcher.is_dirty());
        assert!(watcher.value().is_null());

        watcher.evaluate().expect("evaluate");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!watcher.is_dirty());
        assert_eq!(watcher.value().as_i64(), Some(1));
    }

    #[test]
    fn notification_marks_lazy_watcher_dirty_without_running() {
        let count = Arc::new(AtomicUsize::new(0));
        let dep = Dep::new();
        let watcher = Watcher::new(
            counting_getter(dep.clone(), count.clone()),
            None,
            WatcherOptions {
                lazy: true,
                ..Default::default()
            },
        );
        watcher.evaluate().expect("evaluate");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        dep.notify();
        assert!(watcher.is_dirty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_watcher_reruns_inside_notification() {
        let count = Arc::new(AtomicUsize::new(0));
        let dep = Dep::new();
        let _watcher = Watcher::new(
            counting_getter(dep.clone(), count.clone()),
            None,
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);

        dep.notify();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stale_dependencies_are_pruned_after_rebinding() {
        let dep_a = Dep::new();
        let dep_b = Dep::new();
        let use_a = Arc::new(AtomicBool::new(true));

        let flag = use_a.clone();
        let (a, b) = (dep_a.clone(), dep_b.clone());
        let watcher = Watcher::new(
            move || {
                if flag.load(Ordering::SeqCst) {
                    a.depend();
                } else {
                    b.depend();
                }
                Ok(Value::Null)
            },
            None,
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );

        assert_eq!(dep_a.subscriber_count(), 1);
        assert_eq!(dep_b.subscriber_count(), 0);

        use_a.store(false, Ordering::SeqCst);
        dep_a.notify();

        assert_eq!(dep_a.subscriber_count(), 0);
        assert_eq!(dep_b.subscriber_count(), 1);
        assert_eq!(watcher.dep_count(), 1);
    }

    #[test]
    fn callback_receives_new_and_old_values() {
        let source = Arc::new(AtomicUsize::new(1));
        let dep = Dep::new();
        let seen: Arc<Mutex<Vec<(Value, Value)>>> = Arc::new(Mutex::new(Vec::new()));

        let (src, d) = (source.clone(), dep.clone());
        let log = seen.clone();
        let _watcher = Watcher::new(
            move || {
                d.depend();
                Ok(Value::Int(src.load(Ordering::SeqCst) as i64))
            },
            Some(callback(move |new, old| {
                log.lock().push((new.clone(), old.clone()));
                Ok(())
            })),
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );

        source.store(2, Ordering::SeqCst);
        dep.notify();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_i64(), Some(2));
        assert_eq!(seen[0].1.as_i64(), Some(1));
    }

    #[test]
    fn unchanged_primitive_value_skips_callback() {
        let dep = Dep::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let d = dep.clone();
        let hits = fired.clone();
        let _watcher = Watcher::new(
            move || {
                d.depend();
                Ok(Value::Int(7))
            },
            Some(callback(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );

        dep.notify();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn teardown_unsubscribes_and_ignores_updates() {
        let count = Arc::new(AtomicUsize::new(0));
        let dep = Dep::new();
        let watcher = Watcher::new(
            counting_getter(dep.clone(), count.clone()),
            None,
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );
        assert_eq!(dep.subscriber_count(), 1);

        watcher.teardown();
        watcher.teardown();
        assert!(!watcher.is_active());
        assert_eq!(dep.subscriber_count(), 0);

        watcher.update();
        dep.notify();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn user_getter_failure_reports_and_yields_null() {
        let errors: std::rc::Rc<std::cell::RefCell<Vec<u64>>> = Default::default();
        let sink = errors.clone();
        runtime::set_error_sink(Some(move |error: &Error| {
            sink.borrow_mut().push(error.watcher_id());
        }));

        let watcher = Watcher::new(
            || Err("broken expression".into()),
            None,
            WatcherOptions {
                user: true,
                ..Default::default()
            },
        );

        assert!(watcher.value().is_null());
        assert_eq!(errors.borrow().as_slice(), [watcher.id().raw()]);
        runtime::set_error_sink(None::<fn(&Error)>);
    }

    #[test]
    fn internal_getter_failure_propagates_from_evaluate() {
        let watcher = Watcher::new(
            || Err("render defect".into()),
            None,
            WatcherOptions {
                lazy: true,
                ..Default::default()
            },
        );
        let error = watcher.evaluate().expect_err("should propagate");
        assert!(matches!(error, Error::Getter { .. }));
    }

    #[test]
    fn computed_dependencies_bubble_into_consumer() {
        let dep = Dep::new();

        let d = dep.clone();
        let computed = Watcher::new(
            move || {
                d.depend();
                Ok(Value::Int(10))
            },
            None,
            WatcherOptions {
                lazy: true,
                ..Default::default()
            },
        );

        let inner = computed.clone();
        let consumer = Watcher::new(
            move || {
                if inner.is_dirty() {
                    inner.evaluate()?;
                }
                inner.depend();
                Ok(inner.value())
            },
            None,
            WatcherOptions::default(),
        );

        // Both the computed watcher and its consumer now subscribe to dep.
        assert_eq!(dep.subscriber_count(), 2);
        assert_eq!(consumer.value().as_i64(), Some(10));
    }

    #[test]
    fn invalid_path_warns_and_yields_null() {
        let warnings: std::rc::Rc<std::cell::RefCell<Vec<String>>> = Default::default();
        let sink = warnings.clone();
        runtime::set_warn_sink(Some(move |msg: &str| sink.borrow_mut().push(msg.to_string())));

        let root = Object::new();
        let watcher = Watcher::for_path(&root, "a..b", None, WatcherOptions::default());

        assert!(watcher.value().is_null());
        assert_eq!(warnings.borrow().len(), 1);
        assert!(warnings.borrow()[0].contains("a..b"));
        runtime::set_warn_sink(None::<fn(&str)>);
    }
}
