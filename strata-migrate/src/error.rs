//! Error types for the migration engine.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// A schema snapshot violated one of its structural invariants.
    #[error("Invalid schema: {0}")]
    SchemaModel(String),

    /// New tables reference each other in a cycle.
    #[error("Cyclic foreign key dependency between tables: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Tables forming the cycle, first table repeated at the end.
        cycle: Vec<String>,
    },

    /// The generator was handed a change its dialect cannot express.
    #[error("Unsupported change for {dialect}: {message}")]
    UnsupportedChange {
        /// Dialect name.
        dialect: String,
        /// What could not be rendered.
        message: String,
    },

    /// A statement in a batch failed.
    #[error("Statement {index} failed: {message}\n  statement: {statement}")]
    StatementExecution {
        /// 1-based position of the statement in its batch.
        index: usize,
        /// The failing statement.
        statement: String,
        /// Underlying database error.
        message: String,
        /// Earlier statements were committed and could not be undone.
        partially_applied: bool,
    },

    /// Migration checksum mismatch.
    #[error("Checksum mismatch for migration '{name}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Migration name.
        name: String,
        /// Checksum stored in history.
        expected: String,
        /// Checksum of the current source.
        actual: String,
    },

    /// Migration already applied.
    #[error("Migration '{0}' has already been applied")]
    AlreadyApplied(String),

    /// Migration already rolled back.
    #[error("Migration '{0}' has already been rolled back")]
    AlreadyRolledBack(String),

    /// Migration not found.
    #[error("Migration '{0}' not found")]
    NotFound(String),

    /// The stored rollback script has no statements.
    #[error("Rollback for migration '{0}' is empty and must be handled manually")]
    EmptyRollback(String),

    /// Rollback not possible.
    #[error("Cannot rollback: {0}")]
    RollbackFailed(String),

    /// Data loss would occur.
    #[error("Data loss would occur: {0}")]
    DataLoss(String),

    /// Shadow database error.
    #[error("Shadow database error: {0}")]
    ShadowDatabase(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resolution file error.
    #[error("Resolution file error: {0}")]
    ResolutionFile(String),

    /// A stored migration is malformed or has an unusable name.
    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    /// Execution was cancelled between statements.
    #[error("Migration '{0}' was cancelled")]
    Cancelled(String),

    /// General migration error.
    #[error("Migration error: {0}")]
    Other(String),
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a schema model error.
    pub fn schema_model(msg: impl Into<String>) -> Self {
        Self::SchemaModel(msg.into())
    }

    /// Create an unsupported change error.
    pub fn unsupported(dialect: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::UnsupportedChange {
            dialect: dialect.into(),
            message: msg.into(),
        }
    }

    /// Create a data loss error.
    pub fn data_loss(msg: impl Into<String>) -> Self {
        Self::DataLoss(msg.into())
    }

    /// Create a shadow database error.
    pub fn shadow_database(msg: impl Into<String>) -> Self {
        Self::ShadowDatabase(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a resolution file error.
    pub fn resolution_file(msg: impl Into<String>) -> Self {
        Self::ResolutionFile(msg.into())
    }

    /// Create an other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this is a recoverable error.
    ///
    /// Rollback-path user errors are reported directly and never retried,
    /// so only "nothing to do" conditions count as recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AlreadyApplied(_) | Self::Cancelled(_))
    }
}
