//! Error types for archive operations.
//!
//! This module defines [`Error`], the error type for every archive
//! operation, along with a convenient [`Result`] type alias.
//!
//! A key that is not present anywhere is *not* an error; lookups return
//! `Option::None` for that.

use common::StorageError;

/// Error type for archive operations.
///
/// # Error Categories
///
/// - [`Storage`](Error::Storage): a backing store (document store or object
///   store) failed. The message is prefixed with the operation that hit it.
/// - [`Encoding`](Error::Encoding): a stored record, document or blob could
///   not be encoded or decoded.
/// - [`InvalidInput`](Error::InvalidInput): the caller passed bad arguments.
/// - [`Internal`](Error::Internal): stored state violates an invariant, for
///   example a corrupt active-memtable pointer.
/// - [`Conflict`](Error::Conflict): a compare-and-swap lost a race with
///   another writer.
/// - [`FlushInProgress`](Error::FlushInProgress): another flush is already
///   running on this archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A backing store failed.
    Storage(String),

    /// Encoding or decoding errors.
    Encoding(String),

    /// Invalid input or parameter errors.
    InvalidInput(String),

    /// Stored state violates an invariant. Not recoverable locally.
    Internal(String),

    /// A concurrent writer changed state this operation depended on.
    Conflict(String),

    /// A flush was requested while another flush was still running.
    FlushInProgress,
}

impl Error {
    /// Prefixes the error message with the name of the failed operation,
    /// keeping the category.
    pub(crate) fn context(self, op: &str) -> Self {
        match self {
            Error::Storage(msg) => Error::Storage(format!("{}: {}", op, msg)),
            Error::Encoding(msg) => Error::Encoding(format!("{}: {}", op, msg)),
            Error::InvalidInput(msg) => Error::InvalidInput(format!("{}: {}", op, msg)),
            Error::Internal(msg) => Error::Internal(format!("{}: {}", op, msg)),
            Error::Conflict(msg) => Error::Conflict(format!("{}: {}", op, msg)),
            Error::FlushInProgress => Error::FlushInProgress,
        }
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
            Error::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Error::FlushInProgress => write!(f, "Flush already in progress"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Storage(msg) => Error::Storage(msg),
            StorageError::Internal(msg) => Error::Internal(msg),
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_prefix_operation_and_keep_category() {
        // given
        let err = Error::from(StorageError::Storage("connection refused".to_string()));

        // when
        let err = err.context("memtable.put");

        // then
        assert_eq!(
            err,
            Error::Storage("memtable.put: connection refused".to_string())
        );
        assert_eq!(
            err.to_string(),
            "Storage error: memtable.put: connection refused"
        );
    }

    #[test]
    fn should_map_internal_storage_errors_to_internal() {
        let err = Error::from(StorageError::Internal("bad pointer".to_string()));
        assert!(matches!(err, Error::Internal(_)));
    }
}
