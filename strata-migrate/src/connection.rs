//! The database boundary used by the executor and history tracker.

use chrono::{DateTime, Utc};

use crate::error::MigrateResult;
use crate::flavor::Dialect;
use crate::history::{HistoryEntry, MigrationRecord};
use crate::schema::DatabaseSchema;

/// A connection that migrations run on.
///
/// The connection is owned exclusively by one executing call at a time.
/// Drivers implement history persistence with the statements from
/// [`HistorySql::for_dialect`](crate::history::HistorySql::for_dialect),
/// binding parameters the way their client library does.
#[async_trait::async_trait]
pub trait MigrationConnection: Send {
    /// The dialect spoken by this connection.
    fn dialect(&self) -> Dialect;

    /// Execute one statement that returns no rows.
    async fn execute(&mut self, sql: &str) -> MigrateResult<()>;

    /// Open a transaction.
    async fn begin(&mut self) -> MigrateResult<()> {
        self.execute("BEGIN").await
    }

    /// Commit the open transaction.
    async fn commit(&mut self) -> MigrateResult<()> {
        self.execute("COMMIT").await
    }

    /// Abort the open transaction.
    async fn rollback(&mut self) -> MigrateResult<()> {
        self.execute("ROLLBACK").await
    }

    /// Read every row of the history table, oldest first.
    async fn load_history(&mut self) -> MigrateResult<Vec<MigrationRecord>>;

    /// Insert a history row, replacing an earlier failed attempt with the same name.
    async fn save_history(&mut self, entry: &HistoryEntry) -> MigrateResult<()>;

    /// Flag a history row as rolled back.
    async fn mark_rolled_back(&mut self, name: &str, at: DateTime<Utc>) -> MigrateResult<()>;
}

/// Reads a live database's catalog into a [`DatabaseSchema`].
#[async_trait::async_trait]
pub trait SchemaIntrospector<C: MigrationConnection + ?Sized>: Send + Sync {
    /// Introspect the schema visible through `conn`.
    async fn introspect(&self, conn: &mut C) -> MigrateResult<DatabaseSchema>;
}
