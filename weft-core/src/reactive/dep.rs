//! Dependencies
//!
//! A `Dep` is a publish point representing interest in one piece of state:
//! one tracked field, one container's shape, or one list's structure. It
//! holds the watchers subscribed to that piece of state and notifies them
//! when it changes.
//!
//! # The target stack
//!
//! Dependency collection is driven by an implicit "currently evaluating
//! watcher" register, modeled as a thread-local stack so nested evaluations
//! (a computed read inside another watcher's getter) restore the outer
//! watcher when the inner one finishes. The stack is pushed and popped only
//! by the watcher evaluation protocol; nothing else touches it.
//!
//! # Subscriber list
//!
//! Subscribers are held as weak references in subscription order. The
//! watcher-side id sets guarantee a watcher appears at most once per dep, so
//! `add_sub` is a plain O(1) push; `remove_sub` is an O(n) retain, which is
//! fine at the small subscriber counts seen in practice.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::watcher::{Watcher, WatcherId};

/// Unique identifier for a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    /// Generate a new unique dep ID.
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Clone)]
struct Sub {
    id: WatcherId,
    watcher: Weak<Watcher>,
}

/// A publish point for one piece of tracked state.
pub struct Dep {
    id: DepId,
    subs: Mutex<SmallVec<[Sub; 4]>>,
}

thread_local! {
    /// Stack of watchers currently being evaluated on this thread.
    static TARGET_STACK: RefCell<Vec<Arc<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// Make `watcher` the active dependency-collection target.
pub(crate) fn push_target(watcher: Arc<Watcher>) {
    TARGET_STACK.with(|stack| stack.borrow_mut().push(watcher));
}

/// Restore the previously active target.
pub(crate) fn pop_target() {
    TARGET_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
}

/// The watcher currently collecting dependencies, if any.
pub fn target() -> Option<Arc<Watcher>> {
    TARGET_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Whether any watcher is currently collecting dependencies.
pub fn has_target() -> bool {
    TARGET_STACK.with(|stack| !stack.borrow().is_empty())
}

impl Dep {
    /// Create a new dependency.
    pub fn new() -> Arc<Dep> {
        Arc::new(Dep {
            id: DepId::new(),
            subs: Mutex::new(SmallVec::new()),
        })
    }

    /// This dependency's unique ID.
    pub fn id(&self) -> DepId {
        self.id
    }

    /// Register the currently active watcher as a subscriber.
    ///
    /// No-op when no watcher is evaluating. The watcher's pending dep set
    /// dedupes, so reading the same state twice in one evaluation subscribes
    /// once.
    pub fn depend(self: &Arc<Self>) {
        if let Some(watcher) = target() {
            watcher.add_dep(self);
        }
    }

    /// Add a subscriber. Caller guarantees it is not already subscribed.
    pub(crate) fn add_sub(&self, watcher: &Arc<Watcher>) {
        self.subs.lock().push(Sub {
            id: watcher.id(),
            watcher: Arc::downgrade(watcher),
        });
    }

    /// Remove a subscriber by watcher id.
    pub(crate) fn remove_sub(&self, id: WatcherId) {
        self.subs.lock().retain(|sub| sub.id != id);
    }

    /// Notify every current subscriber, in subscription order.
    ///
    /// Iterates over a snapshot so that unsubscription during notification
    /// (teardown from inside a sync watcher, dep reconciliation) cannot skip
    /// or duplicate a subscriber.
    pub(crate) fn notify(&self) {
        let snapshot: SmallVec<[Sub; 4]> = self.subs.lock().clone();
        let mut saw_dead = false;
        for sub in &snapshot {
            match sub.watcher.upgrade() {
                Some(watcher) => watcher.update(),
                None => saw_dead = true,
            }
        }
        if saw_dead {
            self.subs.lock().retain(|sub| sub.watcher.strong_count() > 0);
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs
            .lock()
            .iter()
            .filter(|sub| sub.watcher.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
