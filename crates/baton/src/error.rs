//! Error types for baton.
//!
//! The crate owns exactly one failure mode: an acquisition that was not
//! granted within the configured timeout. Everything a worker produces
//! inside `run_exclusive` belongs to the worker and is passed through.

use thiserror::Error;

/// Crate-level result alias. The error side is always [`TimeoutError`];
/// fallible workers carry their own `Result` in the success side.
pub type Result<T> = std::result::Result<T, TimeoutError>;

/// An acquisition was not granted within the configured timeout.
///
/// Carries no data beyond its kind, so callers can branch on it
/// distinctly from worker errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("async mutex acquisition timed out")]
pub struct TimeoutError;

impl TimeoutError {
    /// Create a new timeout error.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Stable machine-readable code for this error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        "MUTEX_TIMEOUT"
    }
}
