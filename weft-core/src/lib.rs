//! Weft Core
//!
//! This crate provides the state-tracking runtime for the Weft framework.
//! It implements:
//!
//! - Observable wrappers over dynamic containers (objects and lists)
//! - Automatic dependency tracking with per-field granularity
//! - Watchers: eager, lazy (computed), sync, and deep
//! - A batching flush scheduler with circular-update protection
//!
//! # Architecture
//!
//! The crate is organized into a few modules:
//!
//! - `value`: the dynamic value model (`Value`, `Object`, `List`)
//! - `reactive`: observers, deps, watchers, and the flush scheduler
//! - `error`: watcher failure types
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::reactive::{observe, Watcher, WatcherOptions, callback};
//! use weft_core::value::{Object, Value};
//!
//! // Wrap a container for tracking.
//! let state = Object::new();
//! state.insert_untracked("count", 0);
//! observe(&Value::Object(state.clone()));
//!
//! // Watch a read over it.
//! let source = state.clone();
//! let _watcher = Watcher::new(
//!     move || Ok(source.get("count")),
//!     Some(callback(|new, old| {
//!         println!("count: {old:?} -> {new:?}");
//!         Ok(())
//!     })),
//!     WatcherOptions::default(),
//! );
//!
//! // The write notifies; the callback fires on the next flush.
//! state.set("count", 5);
//! ```

pub mod error;
pub mod reactive;
pub mod value;

pub use error::Error;
pub use reactive::{observe, observe_root, Watcher, WatcherOptions};
pub use value::{Key, List, Object, Value};
