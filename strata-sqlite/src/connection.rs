//! SQLite connection wrapper.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use strata_migrate::history::{HistorySql, parse_timestamp};
use strata_migrate::{Dialect, HistoryEntry, MigrateResult, MigrationConnection, MigrationRecord};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::error::{SqliteError, SqliteResult};

/// A history row as stored, timestamps still in text form.
type RawRecord = (i64, String, String, String, i64, bool, Option<String>, bool, Option<String>);

/// A migration connection to one SQLite database.
pub struct SqliteConnection {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteConnection {
    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<Path>) -> SqliteResult<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "Opening SQLite database");
        let conn = Connection::open(&path).await?;
        let this = Self { conn, path: Some(path) };
        this.enable_foreign_keys().await?;
        Ok(this)
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory().await?;
        let this = Self { conn, path: None };
        this.enable_foreign_keys().await?;
        Ok(this)
    }

    async fn enable_foreign_keys(&self) -> SqliteResult<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// The database file, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The underlying tokio-rusqlite connection.
    pub fn inner(&self) -> &Connection {
        &self.conn
    }

    /// Run a statement batch.
    pub async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Close the connection, waiting for the background thread to finish.
    pub async fn close(self) -> SqliteResult<()> {
        self.conn.close().await?;
        Ok(())
    }

    fn record(raw: RawRecord) -> SqliteResult<MigrationRecord> {
        let (id, migration_name, checksum, applied_at, execution_time_ms, success, error_message, rolled_back, rolled_back_at) =
            raw;
        let timestamp = |raw: &str| parse_timestamp(raw).map_err(|e| SqliteError::deserialization(e.to_string()));

        Ok(MigrationRecord {
            id,
            migration_name,
            checksum,
            applied_at: timestamp(&applied_at)?,
            execution_time_ms,
            success,
            error_message,
            rolled_back,
            rolled_back_at: rolled_back_at.as_deref().map(timestamp).transpose()?,
        })
    }
}

#[async_trait::async_trait]
impl MigrationConnection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        debug!(sql = %sql, "Executing statement");
        Ok(self.execute_batch(sql).await?)
    }

    // Table rebuilds drop and recreate referenced tables, so enforcement is
    // suspended for the transaction and checked once before it commits.
    // The pragma is a no-op inside a transaction and must precede BEGIN.
    async fn begin(&mut self) -> MigrateResult<()> {
        Ok(self.execute_batch("PRAGMA foreign_keys = OFF; BEGIN;").await?)
    }

    async fn commit(&mut self) -> MigrateResult<()> {
        let violations = self
            .conn
            .call(|conn| {
                let violations: i64 =
                    conn.query_row("SELECT COUNT(*) FROM pragma_foreign_key_check", [], |row| row.get(0))?;
                Ok(violations)
            })
            .await
            .map_err(SqliteError::from)?;
        if violations > 0 {
            return Err(SqliteError::ForeignKeyViolations(violations).into());
        }
        self.execute_batch("COMMIT;").await?;
        Ok(self.enable_foreign_keys().await?)
    }

    async fn rollback(&mut self) -> MigrateResult<()> {
        let aborted = self.execute_batch("ROLLBACK;").await;
        self.enable_foreign_keys().await?;
        Ok(aborted?)
    }

    async fn load_history(&mut self) -> MigrateResult<Vec<MigrationRecord>> {
        let select = HistorySql::for_dialect(Dialect::Sqlite).select_all;
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(select)?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                })?;
                let rows: Result<Vec<RawRecord>, _> = rows.collect();
                Ok(rows?)
            })
            .await
            .map_err(SqliteError::from)?;

        Ok(rows
            .into_iter()
            .map(Self::record)
            .collect::<SqliteResult<Vec<_>>>()?)
    }

    async fn save_history(&mut self, entry: &HistoryEntry) -> MigrateResult<()> {
        let upsert = HistorySql::for_dialect(Dialect::Sqlite).upsert;
        let entry = entry.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    upsert,
                    rusqlite::params![
                        entry.migration_name,
                        entry.checksum,
                        entry.applied_at.to_rfc3339(),
                        entry.execution_time_ms,
                        entry.success,
                        entry.error_message,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }

    async fn mark_rolled_back(&mut self, name: &str, at: DateTime<Utc>) -> MigrateResult<()> {
        let update = HistorySql::for_dialect(Dialect::Sqlite).mark_rolled_back;
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(update, rusqlite::params![at.to_rfc3339(), name])?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }
}
