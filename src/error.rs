//! Error types for SciMaterials.

use thiserror::Error;

/// Common error type for SciMaterials.
#[derive(Error, Debug)]
pub enum SciError {
    /// Database error.
    ///
    /// This is a generic persistence failure that wraps errors from any database backend.
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection error.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Entity not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The configured provider has no usable driver.
    #[error("unsupported database provider: {0}")]
    UnsupportedProvider(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// A stale concurrency token rejected the write.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Retrying after concurrency conflicts did not succeed in time.
    #[error("concurrency retries exhausted after {attempts} attempts")]
    ConcurrencyExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// A transaction is already open and joining it was not requested.
    #[error("a transaction is already in progress")]
    TransactionInProgress,

    /// Commit or rollback was requested without an open transaction.
    #[error("no transaction in progress")]
    NoTransaction,

    /// The unit of work was already disposed.
    #[error("unit of work has been disposed")]
    Disposed,
}

impl SciError {
    /// Whether this error is a persistence failure the compatibility save path
    /// reports as zero affected rows.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            SciError::Database(_)
                | SciError::DatabaseConnection(_)
                | SciError::UniqueViolation(_)
                | SciError::NotFound(_)
        )
    }

    /// Whether this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SciError::Cancelled)
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for SciError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                SciError::UniqueViolation(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                SciError::DatabaseConnection(e.to_string())
            }
            _ => SciError::Database(e.to_string()),
        }
    }
}

/// Result type alias for SciMaterials operations.
pub type Result<T> = std::result::Result<T, SciError>;
