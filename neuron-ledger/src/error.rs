//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Every user-facing operation fails with exactly one of these. The
/// infrastructure variants (`Storage`, `Serialization`, `Config`, `Io`,
/// `Metrics`) all classify as [`ErrorKind::StorageFailure`].
#[derive(Error, Debug)]
pub enum Error {
    /// Non-positive amount, malformed identifier, wrong target role
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown actor, classroom, or membership
    #[error("Not found: {0}")]
    NotFound(String),

    /// Role mismatch or non-owner acting on a classroom
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Debited balance is smaller than the requested amount
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Requested amount
        required: u64,
        /// Balance at the time of the conditional debit
        available: u64,
    },

    /// Transaction lost a race and did not commit; safe to retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Caller-visible classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected before any store access
    InvalidArgument,
    /// Rejected after a lookup
    NotFound,
    /// Rejected after role/ownership resolution
    Forbidden,
    /// Rejected at the atomic conditional debit
    InsufficientBalance,
    /// Transaction aborted by a concurrent writer
    Conflict,
    /// Transaction layer failure, rolled back in full
    StorageFailure,
}

impl ErrorKind {
    /// Stable label, used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::Conflict => "conflict",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Metrics(_) => ErrorKind::StorageFailure,
        }
    }

    /// Whether the operation provably did not commit and may be retried
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind as RocksKind;

        match err.kind() {
            RocksKind::Busy | RocksKind::TimedOut | RocksKind::TryAgain | RocksKind::Expired => {
                Error::Conflict(err.to_string())
            }
            _ => Error::Storage(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Storage(format!("Storage task failed: {}", err))
    }
}
