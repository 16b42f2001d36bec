//! Error types for MySQL operations.

use strata_migrate::MigrationError;
use thiserror::Error;

/// Result type for MySQL operations.
pub type MysqlResult<T> = Result<T, MysqlError>;

/// Error type for MySQL operations.
#[derive(Debug, Error)]
pub enum MysqlError {
    /// MySQL driver error.
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// Malformed connection URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] mysql_async::UrlError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A history row could not be read.
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl MysqlError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    /// The server error code, if the server reported one.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Self::Mysql(mysql_async::Error::Server(e)) => Some(e.code),
            _ => None,
        }
    }
}

impl From<MysqlError> for MigrationError {
    fn from(err: MysqlError) -> Self {
        match err {
            MysqlError::Config(msg) => MigrationError::config(msg),
            MysqlError::Url(e) => MigrationError::config(e.to_string()),
            other => MigrationError::database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MysqlError::config("missing database");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.server_code().is_none());
    }

    #[test]
    fn test_error_conversion() {
        let err: MigrationError = MysqlError::config("x").into();
        assert!(matches!(err, MigrationError::Config(_)));

        let err: MigrationError = MysqlError::deserialization("bad timestamp").into();
        assert!(matches!(err, MigrationError::Database(_)));
    }
}
