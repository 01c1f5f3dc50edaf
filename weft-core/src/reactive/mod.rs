//! Reactive Engine
//!
//! This module implements the dependency-tracking core: observers, deps,
//! watchers, and the flush scheduler.
//!
//! # Concepts
//!
//! ## Observers
//!
//! An Observer wraps a container (object or list) so that field reads
//! register the currently evaluating watcher and writes notify it. Wrapping
//! is recursive and idempotent; primitives are tracked through the field
//! that holds them.
//!
//! ## Deps
//!
//! A Dep is the publish point for one piece of tracked state: one field,
//! one object's shape, or one list's structure. Watchers subscribe to deps
//! during evaluation and are notified when the state behind them changes.
//!
//! ## Watchers
//!
//! A Watcher evaluates a getter, records every dep touched, and reacts when
//! any of them fires: immediately (sync), on the next flush (the default),
//! or by merely marking itself dirty until someone asks for the value
//! (lazy, the computed-value protocol).
//!
//! ## The scheduler
//!
//! Queued watchers are deduped and batched into one flush per tick, run in
//! creation order, with circuit breaking for watchers that keep re-dirtying
//! themselves.
//!
//! # Implementation Notes
//!
//! Dependency collection uses a thread-local stack of evaluating watchers.
//! A tracked read consults the top of the stack and registers it; nested
//! evaluations (a computed read inside another watcher's getter) restore
//! the outer watcher when the inner one finishes.

mod dep;
mod list;
mod observer;
mod runtime;
mod scheduler;
mod traverse;
mod watcher;

pub use dep::{has_target, target, Dep, DepId};
pub use observer::{
    define_reactive, del, get, observe, observe_root, set, Observer, WriteHook,
};
pub use runtime::{
    set_error_sink, set_flush_listener, set_tick, set_tracking_enabled, set_warn_sink,
    tracking_enabled, Job,
};
pub use scheduler::{
    current_flush_timestamp, flush_queue, queue_post_flush, MAX_UPDATE_COUNT,
};
pub use traverse::traverse;
pub use watcher::{callback, Callback, Getter, Watcher, WatcherId, WatcherOptions};
