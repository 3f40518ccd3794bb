//! Error sum type for the cache engine.
//!
//! Collapses the distinct failure modes the engine can produce — I/O, timed-out
//! waits, interruption of a blocking call, broken invariants, and bad
//! configuration — into one enum so callers match a single type instead of
//! threading several checked/unchecked exception hierarchies through the call
//! chain.

use std::fmt;

/// The error type returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem or stream I/O failure, propagated as-is.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A per-resource mutex or cluster-lock wait exceeded its bound.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The calling task was interrupted (cancelled) during a blocking wait.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// A transaction, rollback, or collaborator contract was violated.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Missing or invalid configuration/argument.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}

impl CacheError {
    pub fn timeout(msg: impl Into<String>) -> Self {
        CacheError::Timeout(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        CacheError::IllegalState(msg.into())
    }

    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        CacheError::IllegalArgument(msg.into())
    }

    pub fn interrupted(msg: impl Into<String>) -> Self {
        CacheError::Interrupted(msg.into())
    }

    /// True for the `Interrupted` kind that a caller typically maps to a
    /// quiet "no result" rather than propagating as a hard failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CacheError::Interrupted(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Classifier used by logging/metrics call sites that want the kind without
/// matching on the full error (and its captured message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Timeout,
    Interrupted,
    IllegalState,
    IllegalArgument,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Io => "io",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::IllegalState => "illegal_state",
            ErrorKind::IllegalArgument => "illegal_argument",
        };
        write!(f, "{}", s)
    }
}

impl From<&CacheError> for ErrorKind {
    fn from(e: &CacheError) -> Self {
        match e {
            CacheError::Io(_) => ErrorKind::Io,
            CacheError::Timeout(_) => ErrorKind::Timeout,
            CacheError::Interrupted(_) => ErrorKind::Interrupted,
            CacheError::IllegalState(_) => ErrorKind::IllegalState,
            CacheError::IllegalArgument(_) => ErrorKind::IllegalArgument,
        }
    }
}
