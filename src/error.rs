//! Error types for the Strata library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`StrataError`] enum. The variants separate the failure classes a caller
//! reacts to differently:
//!
//! * [`StrataError::Corrupt`]: a checksum or structural check failed; the
//!   affected segment should be dropped or rebuilt, never retried.
//! * [`StrataError::InvalidState`]: misuse such as writing through a
//!   committed writer or reading an exhausted matcher.
//! * [`StrataError::IndexLocked`]: another writer holds the index; retryable.
//! * [`StrataError::SearchTerminated`]: raised by limiting collectors and
//!   converted by the searcher into a partial result.
//!
//! Absent terms, fields and documents are not errors: they are reported
//! through `Option` or empty iterators.
//!
//! # Examples
//!
//! ```
//! use strata::error::{Result, StrataError};
//!
//! fn example_operation() -> Result<()> {
//!     Err(StrataError::invalid_argument("Invalid input"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::fmt;
use std::io;

use thiserror::Error;

/// Why a search stopped before visiting every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The collector's deadline passed.
    TimeLimit,
    /// The collector saw its maximum number of candidates.
    CountLimit,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::TimeLimit => write!(f, "time limit reached"),
            Termination::CountLimit => write!(f, "count limit reached"),
        }
    }
}

/// The main error type for Strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    /// I/O errors from the storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Checksum mismatch or malformed on-disk structure.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Operation not permitted in the current state of the object.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The index write lock is held by someone else.
    #[error("Index locked: {0}")]
    IndexLocked(String),

    /// Schema-related errors (unknown field, duplicate field, bad config).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Query-related errors (query cannot be evaluated against the schema).
    #[error("Query error: {0}")]
    Query(String),

    /// Storage-related errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A document id that was never assigned.
    #[error("No such document: {0}")]
    NoSuchDocument(u64),

    /// Invalid argument passed by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A collector asked the search driver to stop.
    #[error("Search terminated: {0}")]
    SearchTerminated(Termination),

    /// Binary serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

impl StrataError {
    /// Create a new corruption error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        StrataError::Corrupt(msg.into())
    }

    /// Create a new invalid state error.
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        StrataError::InvalidState(msg.into())
    }

    /// Create a new index locked error.
    pub fn index_locked<S: Into<String>>(msg: S) -> Self {
        StrataError::IndexLocked(msg.into())
    }

    /// Create a new schema error.
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        StrataError::Schema(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        StrataError::Query(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        StrataError::Storage(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        StrataError::InvalidArgument(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        StrataError::Serialization(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        StrataError::Other(msg.into())
    }

    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrataError::IndexLocked(_))
    }

    /// Whether the error reports damaged on-disk data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StrataError::Corrupt(_))
    }
}

impl From<bincode::Error> for StrataError {
    fn from(err: bincode::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = StrataError::corrupt("bad block");
        assert_eq!(error.to_string(), "Corrupt data: bad block");

        let error = StrataError::invalid_state("writer closed");
        assert_eq!(error.to_string(), "Invalid state: writer closed");

        let error = StrataError::index_locked("WRITELOCK");
        assert_eq!(error.to_string(), "Index locked: WRITELOCK");

        let error = StrataError::NoSuchDocument(42);
        assert_eq!(error.to_string(), "No such document: 42");

        let error = StrataError::SearchTerminated(Termination::TimeLimit);
        assert_eq!(error.to_string(), "Search terminated: time limit reached");
    }

    #[test]
    fn test_error_classes() {
        assert!(StrataError::index_locked("x").is_retryable());
        assert!(!StrataError::corrupt("x").is_retryable());
        assert!(StrataError::corrupt("x").is_corruption());
        assert!(!StrataError::invalid_state("x").is_corruption());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = StrataError::from(io_error);

        match error {
            StrataError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }
    }
}
