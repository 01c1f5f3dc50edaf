//! Flush scheduler
//!
//! Queued watchers are batched into a single flush per tick. The queue
//! dedupes by watcher id while a watcher is waiting, sorts ascending by id
//! before running (creation order, so producers run before the consumers
//! created after them), and is walked by a live cursor so watchers queued
//! mid-flush still run in the same cycle.
//!
//! A watcher that re-dirties itself (or an already-processed watcher)
//! during the flush is appended to the end of the queue; one that has not
//! run yet is inserted in id order past the cursor. Per-watcher re-entry
//! counters cut off runaway cycles after [`MAX_UPDATE_COUNT`] re-queues
//! with a warning instead of hanging the host.
//!
//! With no tick hook installed the flush runs synchronously as soon as the
//! first watcher of a cycle is queued.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::error::Error;

use super::runtime;
use super::watcher::{Watcher, WatcherId};

/// Maximum times one watcher may be re-queued within a single flush before
/// the cycle is declared circular and cut off.
pub const MAX_UPDATE_COUNT: usize = 100;

type PostFlushHook = Box<dyn FnOnce()>;

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Arc<Watcher>>,
    /// Ids currently queued and not yet run; the dedup set.
    has: HashSet<WatcherId>,
    /// Re-queue counts within the current flush.
    circular: HashMap<WatcherId, usize>,
    waiting: bool,
    flushing: bool,
    /// Cursor into `queue`; points at the watcher currently running.
    index: usize,
    timestamp: Option<Instant>,
    post_flush: Vec<PostFlushHook>,
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Enqueue a watcher for the next flush.
///
/// Ids already waiting are dropped. During a flush, a watcher whose turn
/// has passed (or that is currently running) goes to the end of the queue;
/// one still ahead of the cursor is inserted in id order.
pub(crate) fn queue_watcher(watcher: Arc<Watcher>) {
    let schedule = STATE.with(|state| {
        let mut state = state.borrow_mut();
        let id = watcher.id();
        if !state.has.insert(id) {
            return false;
        }
        if !state.flushing {
            state.queue.push(watcher);
        } else if state.index >= state.queue.len()
            || id <= state.queue[state.index].id()
        {
            state.queue.push(watcher);
        } else {
            let start = state.index + 1;
            let offset = state.queue[start..].partition_point(|queued| queued.id() < id);
            state.queue.insert(start + offset, watcher);
        }
        if state.waiting {
            false
        } else {
            state.waiting = true;
            true
        }
    });
    if schedule {
        runtime::defer(Box::new(|| {
            if let Err(error) = flush_queue() {
                runtime::report_error(&error);
            }
        }));
    }
}

/// Run every queued watcher, then reset scheduler state, run post-flush
/// hooks, and notify the flush listener with the processed watchers.
///
/// Failures of internal (non-user) watchers abort the flush and propagate;
/// user watcher failures were already routed to the error sink by the
/// watcher itself and do not surface here.
pub fn flush_queue() -> Result<(), Error> {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.flushing = true;
        state.timestamp = Some(Instant::now());
        state.queue.sort_by_key(|watcher| watcher.id());
    });

    let mut result = Ok(());
    loop {
        let watcher = STATE.with(|state| {
            let state = state.borrow();
            state.queue.get(state.index).cloned()
        });
        let Some(watcher) = watcher else { break };

        // The pending mark stays until after the hook, so a hook that
        // dirties this watcher's own deps dedups instead of re-queueing.
        watcher.call_before();
        STATE.with(|state| {
            state.borrow_mut().has.remove(&watcher.id());
        });
        if let Err(error) = watcher.run() {
            result = Err(error);
            break;
        }

        // A watcher back in the dedup set re-queued itself while running.
        let runaway = STATE.with(|state| {
            let mut state = state.borrow_mut();
            let id = watcher.id();
            if state.has.contains(&id) {
                let count = state.circular.entry(id).or_insert(0);
                *count += 1;
                *count > MAX_UPDATE_COUNT
            } else {
                false
            }
        });
        if runaway {
            runtime::warn(&format!(
                "possible infinite update loop in watcher {:?}",
                watcher.id()
            ));
            break;
        }

        STATE.with(|state| state.borrow_mut().index += 1);
    }

    let (processed, hooks) = STATE.with(|state| {
        let mut state = state.borrow_mut();
        let processed = std::mem::take(&mut state.queue);
        let hooks = std::mem::take(&mut state.post_flush);
        state.has.clear();
        state.circular.clear();
        state.waiting = false;
        state.flushing = false;
        state.index = 0;
        state.timestamp = None;
        (processed, hooks)
    });

    // State is fully reset first, so hooks and the listener may queue new
    // watchers and start a fresh cycle.
    for hook in hooks {
        hook();
    }
    runtime::notify_flushed(&processed);
    result
}

/// Start time of the flush currently in progress, if any.
pub fn current_flush_timestamp() -> Option<Instant> {
    STATE.with(|state| state.borrow().timestamp)
}

/// Run `hook` once the current flush finishes. Outside a flush it runs
/// immediately.
pub fn queue_post_flush(hook: PostFlushHook) {
    let run_now = STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state.flushing || state.waiting {
            state.post_flush.push(hook);
            None
        } else {
            Some(hook)
        }
    });
    if let Some(hook) = run_now {
        hook();
    }
}
