//! Host integration points
//!
//! The reactive core runs embedded in a host program (a renderer, a state
//! layer, a test harness). The host supplies a few collaborators through
//! thread-local hooks:
//!
//! - a **warning sink** for invalid mutations and diagnostics
//!   (default: `tracing::warn!`),
//! - an **error sink** for failures from user-defined watchers
//!   (default: `tracing::error!`),
//! - a **tick** primitive that schedules one deferred callback, the
//!   microtask abstraction the flush batches behind. With no tick installed,
//!   a scheduled flush runs synchronously at schedule time,
//! - a **flush listener** invoked with the processed watcher list after
//!   every flush.
//!
//! The module also owns the tracking toggle: the component-construction
//! path can suspend automatic wrapping while it builds internal bookkeeping
//! containers that must never become reactive.
//!
//! Everything here is thread-local, matching the single-threaded
//! cooperative execution model of the rest of the engine. Hooks are held
//! behind `Rc` so a hook can be invoked without keeping the slot borrowed;
//! a hook is therefore free to schedule more work re-entrantly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use crate::error::Error;

use super::watcher::Watcher;

/// A deferred job handed to the host's tick primitive.
pub type Job = Box<dyn FnOnce()>;

type WarnSink = Rc<dyn Fn(&str)>;
type ErrorSink = Rc<dyn Fn(&Error)>;
type TickFn = Rc<dyn Fn(Job)>;
type FlushListener = Rc<dyn Fn(&[Arc<Watcher>])>;

thread_local! {
    static TRACKING: Cell<bool> = const { Cell::new(true) };
    static WARN_SINK: RefCell<Option<WarnSink>> = const { RefCell::new(None) };
    static ERROR_SINK: RefCell<Option<ErrorSink>> = const { RefCell::new(None) };
    static TICK: RefCell<Option<TickFn>> = const { RefCell::new(None) };
    static FLUSH_LISTENER: RefCell<Option<FlushListener>> = const { RefCell::new(None) };
}

/// Enable or disable automatic wrapping of containers.
///
/// Returns the previous setting so callers can restore it.
pub fn set_tracking_enabled(enabled: bool) -> bool {
    TRACKING.with(|cell| cell.replace(enabled))
}

/// Whether `observe` currently wraps new containers.
pub fn tracking_enabled() -> bool {
    TRACKING.with(Cell::get)
}

/// Replace the warning sink. `None` restores the `tracing` default.
pub fn set_warn_sink(sink: Option<impl Fn(&str) + 'static>) {
    WARN_SINK.with(|slot| {
        *slot.borrow_mut() = sink.map(|f| Rc::new(f) as WarnSink);
    });
}

/// Report an invalid mutation or diagnostic condition.
pub(crate) fn warn(message: &str) {
    let sink = WARN_SINK.with(|slot| slot.borrow().clone());
    match sink {
        Some(sink) => sink(message),
        None => tracing::warn!(target: "weft", "{message}"),
    }
}

/// Replace the error sink. `None` restores the `tracing` default.
pub fn set_error_sink(sink: Option<impl Fn(&Error) + 'static>) {
    ERROR_SINK.with(|slot| {
        *slot.borrow_mut() = sink.map(|f| Rc::new(f) as ErrorSink);
    });
}

/// Deliver a caught watcher failure to the host.
pub(crate) fn report_error(error: &Error) {
    let sink = ERROR_SINK.with(|slot| slot.borrow().clone());
    match sink {
        Some(sink) => sink(error),
        None => tracing::error!(target: "weft", "{error}"),
    }
}

/// Install the deferred-callback primitive used to schedule flushes.
///
/// The hook receives one job per scheduled flush and must eventually run
/// it. `None` removes the hook; flushes then run synchronously as soon as
/// the first watcher of a cycle is queued.
pub fn set_tick(tick: Option<impl Fn(Job) + 'static>) {
    TICK.with(|slot| {
        *slot.borrow_mut() = tick.map(|f| Rc::new(f) as TickFn);
    });
}

/// Hand `job` to the tick hook, or run it immediately if none is set.
pub(crate) fn defer(job: Job) {
    let tick = TICK.with(|slot| slot.borrow().clone());
    match tick {
        Some(tick) => tick(job),
        None => job(),
    }
}

/// Install a listener invoked with the processed watcher list after every
/// flush. Scheduler state is already reset when it runs, so the listener
/// may trigger a brand-new flush. `None` removes the listener.
pub fn set_flush_listener(listener: Option<impl Fn(&[Arc<Watcher>]) + 'static>) {
    FLUSH_LISTENER.with(|slot| {
        *slot.borrow_mut() = listener.map(|f| Rc::new(f) as FlushListener);
    });
}

/// Invoke the flush listener, if any.
pub(crate) fn notify_flushed(processed: &[Arc<Watcher>]) {
    let listener = FLUSH_LISTENER.with(|slot| slot.borrow().clone());
    if let Some(listener) = listener {
        listener(processed);
    }
}
