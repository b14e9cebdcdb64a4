//! Error types for destination-db
//!
//! Every driver failure is normalized into one [`DbError`] variant so callers
//! can branch on [`DbError::kind`] without looking at sqlx internals.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

/// Boxed error passed through from an adapter
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type alias for executor operations
pub type Result<T> = std::result::Result<T, DbError>;

/// Database error type
#[derive(Error, Debug)]
pub enum DbError {
    /// The statement legitimately produced no rows
    #[error("no rows in result set")]
    NotFound,

    /// The caller's scope was canceled
    #[error("query canceled")]
    Canceled,

    /// The scope deadline elapsed before the operation finished
    #[error("query deadline exceeded")]
    DeadlineExceeded,

    /// Low-level I/O timeout reported by the transport
    #[error("network timeout: {0}")]
    NetworkTimeout(#[source] BoxError),

    /// A column could not be converted into the requested type
    #[error("cannot decode column '{column}': {reason}")]
    Decode { column: String, reason: String },

    /// Statement issued on a transaction that was already discarded
    #[error("transaction is closed")]
    TransactionClosed,

    /// Invalid connection parameters
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other upstream failure, passed through unchanged
    #[error(transparent)]
    Other(BoxError),
}

/// Stable classification of a [`DbError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Canceled,
    DeadlineExceeded,
    NetworkTimeout,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Canceled => "canceled",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::NetworkTimeout => "network_timeout",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DbError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::NotFound => ErrorKind::NotFound,
            DbError::Canceled => ErrorKind::Canceled,
            DbError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            DbError::NetworkTimeout(_) => ErrorKind::NetworkTimeout,
            DbError::Decode { .. }
            | DbError::TransactionClosed
            | DbError::Config(_)
            | DbError::Other(_) => ErrorKind::Other,
        }
    }

    /// Wrap an arbitrary error, promoting buried I/O timeouts.
    pub fn other(err: impl Into<BoxError>) -> Self {
        let err = err.into();
        if is_network_timeout(err.as_ref()) {
            DbError::NetworkTimeout(err)
        } else {
            DbError::Other(err)
        }
    }

    pub fn decode(column: impl Into<String>, reason: impl Into<String>) -> Self {
        DbError::Decode {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure should be recorded as an error on the span.
    ///
    /// An empty result is an expected outcome, not a fault.
    pub(crate) fn is_fault(&self) -> bool {
        !matches!(self, DbError::NotFound)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::PoolTimedOut => DbError::DeadlineExceeded,
            sqlx::Error::Configuration(e) => DbError::Config(e.to_string()),
            other => DbError::other(other),
        }
    }
}

/// Walk the source chain looking for an I/O timeout.
fn is_network_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        if let Some(sqlx::Error::Io(io_err)) = e.downcast_ref::<sqlx::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_is_distinct() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_fault());
    }

    #[test]
    fn io_timeout_is_network_timeout() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "read timed out");
        let err: DbError = sqlx::Error::Io(io_err).into();
        assert_eq!(err.kind(), ErrorKind::NetworkTimeout);
    }

    #[test]
    fn other_io_errors_pass_through() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err: DbError = sqlx::Error::Io(io_err).into();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.to_string().contains("reset by peer"));
    }

    #[test]
    fn pool_timeout_is_deadline() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }

    #[test]
    fn decode_errors_classify_as_other() {
        let err = DbError::decode("population", "expected int, found text");
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(
            err.to_string(),
            "cannot decode column 'population': expected int, found text"
        );
    }
}
