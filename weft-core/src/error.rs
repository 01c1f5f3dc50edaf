//! Error types for the reactive runtime.
//!
//! Only watcher evaluation and callback invocation produce `Error` values.
//! Invalid mutations (adding a field to a protected root, calling `set` on a
//! primitive) never error: they report through the warning sink and leave
//! state untouched, since they mirror programming mistakes the host can
//! recover from.

use thiserror::Error;

/// Boxed source error produced by user-supplied closures.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Failures surfaced by the reactive runtime.
///
/// Errors from user-defined watchers are caught at the point of invocation
/// and handed to the error sink (see [`crate::reactive::set_error_sink`]);
/// they never abort a flush. Errors from internal watchers propagate out of
/// the flush, since a failure there indicates a defect the host cannot
/// safely paper over.
#[derive(Debug, Error)]
pub enum Error {
    /// A watcher's getter failed during evaluation.
    #[error("getter for watcher #{id} failed: {source}")]
    Getter {
        /// Id of the watcher whose getter failed.
        id: u64,
        #[source]
        source: DynError,
    },

    /// A watcher's change callback failed.
    #[error("callback for watcher #{id} failed: {source}")]
    Callback {
        /// Id of the watcher whose callback failed.
        id: u64,
        #[source]
        source: DynError,
    },
}

impl Error {
    /// Id of the watcher the failure originated from.
    pub fn watcher_id(&self) -> u64 {
        match self {
            Error::Getter { id, .. } | Error::Callback { id, .. } => *id,
        }
    }
}
