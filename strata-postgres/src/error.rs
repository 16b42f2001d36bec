//! Error types for PostgreSQL operations.

use strata_migrate::MigrationError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// The SQLSTATE code, if the server reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Postgres(e) => e.code().map(|c| c.code()),
            _ => None,
        }
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Postgres(e) => e.is_closed(),
            Self::Config(_) => false,
        }
    }
}

impl From<PgError> for MigrationError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Config(msg) => MigrationError::config(msg),
            // Keep the server's message; Display on tokio_postgres::Error is just "db error".
            PgError::Postgres(e) => match e.as_db_error() {
                Some(db) => MigrationError::database(format!("{}: {}", db.code().code(), db.message())),
                None => MigrationError::database(e.to_string()),
            },
            other => MigrationError::database(other.to_string()),
        }
    }
}
