//! Error types for SQLite operations.

use strata_migrate::MigrationError;
use thiserror::Error;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Error type for SQLite operations.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite driver error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A catalog or history row could not be read.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Rows left without their referenced parent when a migration ended.
    #[error("{0} foreign key violation(s) found before commit")]
    ForeignKeyViolations(i64),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SqliteError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

impl From<SqliteError> for MigrationError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Config(msg) => MigrationError::config(msg),
            SqliteError::Io(e) => MigrationError::Io(e),
            other => MigrationError::database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SqliteError::config("invalid path");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("invalid path"));
    }

    #[test]
    fn test_error_conversion() {
        let err: MigrationError = SqliteError::from(rusqlite::Error::InvalidQuery).into();
        assert!(matches!(err, MigrationError::Database(_)));

        let err: MigrationError = SqliteError::config("bad").into();
        assert!(matches!(err, MigrationError::Config(_)));
    }
}
