//! Migration history tracking.
//!
//! Every attempt to apply a migration leaves a row in the `_migrations` table:
//! successes, failures and rollbacks alike. Rows are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::connection::MigrationConnection;
use crate::error::{MigrateResult, MigrationError};
use crate::flavor::Dialect;
use crate::statement::split_statements_for;

/// Name of the history table. Fixed, and ignored by every flavor.
pub const MIGRATIONS_TABLE: &str = "_migrations";

/// A row of the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Row id.
    pub id: i64,
    /// Unique migration name.
    pub migration_name: String,
    /// Checksum of the applied statements.
    pub checksum: String,
    /// When the attempt finished.
    pub applied_at: DateTime<Utc>,
    /// Duration of the attempt in milliseconds.
    pub execution_time_ms: i64,
    /// Whether every statement succeeded.
    pub success: bool,
    /// Error of a failed attempt.
    pub error_message: Option<String>,
    /// Whether the migration was rolled back.
    pub rolled_back: bool,
    /// When it was rolled back.
    pub rolled_back_at: Option<DateTime<Utc>>,
}

/// Where a migration stands, derived from its history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationState {
    /// No row yet, or only failed attempts.
    Pending,
    /// Applied and still in effect.
    Applied,
    /// The last attempt failed.
    Failed,
    /// Applied, then rolled back. Terminal.
    RolledBack,
}

impl MigrationRecord {
    /// State of this migration.
    pub fn state(&self) -> MigrationState {
        match (self.success, self.rolled_back) {
            (_, true) => MigrationState::RolledBack,
            (true, false) => MigrationState::Applied,
            (false, false) => MigrationState::Failed,
        }
    }

    /// Applied and not rolled back.
    pub fn is_applied(&self) -> bool {
        self.state() == MigrationState::Applied
    }
}

/// Data written for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Migration name.
    pub migration_name: String,
    /// Checksum of the statements.
    pub checksum: String,
    /// When the attempt finished.
    pub applied_at: DateTime<Utc>,
    /// Duration in milliseconds.
    pub execution_time_ms: i64,
    /// Whether it succeeded.
    pub success: bool,
    /// Error of a failed attempt.
    pub error_message: Option<String>,
}

/// History table statements for one dialect.
///
/// `upsert` binds, in order: migration name, checksum, applied-at, execution
/// time, success, error message. `mark_rolled_back` binds the rolled-back-at
/// timestamp, then the migration name.
#[derive(Debug, Clone, Copy)]
pub struct HistorySql {
    /// Idempotent table creation.
    pub create_table: &'static str,
    /// Every row, oldest first.
    pub select_all: &'static str,
    /// Insert, or overwrite a previous attempt with the same name.
    pub upsert: &'static str,
    /// Flag a row as rolled back.
    pub mark_rolled_back: &'static str,
}

/// PostgreSQL history statements.
pub const POSTGRES_HISTORY: HistorySql = HistorySql {
    create_table: r#"CREATE TABLE IF NOT EXISTS _migrations (
    id SERIAL PRIMARY KEY,
    migration_name VARCHAR(255) NOT NULL UNIQUE,
    checksum VARCHAR(64) NOT NULL,
    applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    execution_time_ms BIGINT NOT NULL,
    success BOOLEAN NOT NULL DEFAULT TRUE,
    error_message TEXT,
    rolled_back BOOLEAN NOT NULL DEFAULT FALSE,
    rolled_back_at TIMESTAMP WITH TIME ZONE
)"#,
    select_all: "SELECT id, migration_name, checksum, applied_at, execution_time_ms, success, \
                 error_message, rolled_back, rolled_back_at FROM _migrations ORDER BY id",
    upsert: "INSERT INTO _migrations (migration_name, checksum, applied_at, execution_time_ms, success, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (migration_name) DO UPDATE SET checksum = EXCLUDED.checksum, \
             applied_at = EXCLUDED.applied_at, execution_time_ms = EXCLUDED.execution_time_ms, \
             success = EXCLUDED.success, error_message = EXCLUDED.error_message",
    mark_rolled_back: "UPDATE _migrations SET rolled_back = TRUE, rolled_back_at = $1 WHERE migration_name = $2",
};

/// MySQL history statements. Timestamps travel as `YYYY-MM-DD HH:MM:SS.ffffff` UTC text.
pub const MYSQL_HISTORY: HistorySql = HistorySql {
    create_table: r#"CREATE TABLE IF NOT EXISTS _migrations (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    migration_name VARCHAR(255) NOT NULL UNIQUE,
    checksum VARCHAR(64) NOT NULL,
    applied_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
    execution_time_ms BIGINT NOT NULL,
    success BOOLEAN NOT NULL DEFAULT TRUE,
    error_message TEXT NULL,
    rolled_back BOOLEAN NOT NULL DEFAULT FALSE,
    rolled_back_at DATETIME(6) NULL
)"#,
    select_all: "SELECT id, migration_name, checksum, \
                 DATE_FORMAT(applied_at, '%Y-%m-%d %H:%i:%s.%f'), execution_time_ms, success, \
                 error_message, rolled_back, DATE_FORMAT(rolled_back_at, '%Y-%m-%d %H:%i:%s.%f') \
                 FROM _migrations ORDER BY id",
    upsert: "INSERT INTO _migrations (migration_name, checksum, applied_at, execution_time_ms, success, error_message) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE checksum = VALUES(checksum), applied_at = VALUES(applied_at), \
             execution_time_ms = VALUES(execution_time_ms), success = VALUES(success), \
             error_message = VALUES(error_message)",
    mark_rolled_back: "UPDATE _migrations SET rolled_back = TRUE, rolled_back_at = ? WHERE migration_name = ?",
};

/// SQLite history statements. Timestamps are RFC 3339 text.
pub const SQLITE_HISTORY: HistorySql = HistorySql {
    create_table: r#"CREATE TABLE IF NOT EXISTS _migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    migration_name TEXT NOT NULL UNIQUE,
    checksum TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    execution_time_ms INTEGER NOT NULL,
    success BOOLEAN NOT NULL DEFAULT 1,
    error_message TEXT,
    rolled_back BOOLEAN NOT NULL DEFAULT 0,
    rolled_back_at TEXT
)"#,
    select_all: "SELECT id, migration_name, checksum, applied_at, execution_time_ms, success, \
                 error_message, rolled_back, rolled_back_at FROM _migrations ORDER BY id",
    upsert: "INSERT INTO _migrations (migration_name, checksum, applied_at, execution_time_ms, success, error_message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (migration_name) DO UPDATE SET checksum = excluded.checksum, \
             applied_at = excluded.applied_at, execution_time_ms = excluded.execution_time_ms, \
             success = excluded.success, error_message = excluded.error_message",
    mark_rolled_back: "UPDATE _migrations SET rolled_back = 1, rolled_back_at = ?1 WHERE migration_name = ?2",
};

impl HistorySql {
    /// Statements for a dialect.
    pub const fn for_dialect(dialect: Dialect) -> &'static HistorySql {
        match dialect {
            Dialect::Postgres => &POSTGRES_HISTORY,
            Dialect::MySql => &MYSQL_HISTORY,
            Dialect::Sqlite => &SQLITE_HISTORY,
        }
    }
}

/// SHA-256 over the statements joined by newlines, hex encoded.
pub fn checksum<S: AsRef<str>>(statements: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, statement) in statements.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(statement.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Checksum of a script written for `dialect`, computed over its split statements.
pub fn script_checksum(dialect: Dialect, script: &str) -> String {
    checksum(&split_statements_for(dialect, script))
}

/// Names from `known` that still need to run, in `known` order.
///
/// Applied and rolled-back migrations are excluded; a rolled-back name is
/// never reused. Failed attempts stay pending.
pub fn pending_migrations<S: AsRef<str>>(known: &[S], records: &[MigrationRecord]) -> Vec<String> {
    known
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| {
            !records.iter().any(|r| {
                r.migration_name == *name && matches!(r.state(), MigrationState::Applied | MigrationState::RolledBack)
            })
        })
        .map(str::to_string)
        .collect()
}

/// Reads and writes the history table through a connection.
///
/// Carries no state of its own between calls.
pub struct HistoryTracker<'c, C: MigrationConnection + ?Sized> {
    conn: &'c mut C,
}

impl<'c, C: MigrationConnection + ?Sized> HistoryTracker<'c, C> {
    /// Create a tracker on a connection.
    pub fn new(conn: &'c mut C) -> Self {
        Self { conn }
    }

    /// Create the history table if it does not exist.
    pub async fn ensure_table(&mut self) -> MigrateResult<()> {
        let sql = HistorySql::for_dialect(self.conn.dialect());
        self.conn.execute(sql.create_table).await
    }

    /// Every history row, oldest first.
    pub async fn records(&mut self) -> MigrateResult<Vec<MigrationRecord>> {
        self.conn.load_history().await
    }

    /// The row for one migration.
    pub async fn find(&mut self, name: &str) -> MigrateResult<Option<MigrationRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .find(|r| r.migration_name == name))
    }

    /// Names of applied migrations, in application order.
    pub async fn applied(&mut self) -> MigrateResult<Vec<String>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(MigrationRecord::is_applied)
            .map(|r| r.migration_name)
            .collect())
    }

    /// Record an attempt, success or failure.
    ///
    /// `migration_name` is unique, so a retry replaces the row left by a
    /// failed attempt. The replaced failure is logged at warn level.
    pub async fn record_attempt(&mut self, entry: &HistoryEntry) -> MigrateResult<()> {
        if let Some(previous) = self.find(&entry.migration_name).await? {
            if previous.state() == MigrationState::Failed {
                tracing::warn!(
                    migration = %previous.migration_name,
                    failed_at = %previous.applied_at,
                    error = previous.error_message.as_deref().unwrap_or_default(),
                    "Replacing failed migration attempt"
                );
            }
        }
        tracing::debug!(
            migration = %entry.migration_name,
            success = entry.success,
            duration_ms = entry.execution_time_ms,
            "Recording migration attempt"
        );
        self.conn.save_history(entry).await
    }

    /// Mark a migration rolled back.
    pub async fn record_rollback(&mut self, name: &str) -> MigrateResult<()> {
        tracing::debug!(migration = %name, "Recording rollback");
        self.conn.mark_rolled_back(name, Utc::now()).await
    }

    /// Migrations from `known` that still need to run.
    pub async fn get_pending<S: AsRef<str> + Sync>(&mut self, known: &[S]) -> MigrateResult<Vec<String>> {
        let records = self.records().await?;
        Ok(pending_migrations(known, &records))
    }

    /// Compare the stored checksum of `name` with the checksum of `source`.
    pub async fn validate_checksum(&mut self, name: &str, source: &str) -> MigrateResult<()> {
        let record = self
            .find(name)
            .await?
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))?;
        let actual = script_checksum(self.conn.dialect(), source);
        if record.checksum != actual {
            tracing::warn!(migration = %name, expected = %record.checksum, actual = %actual, "Checksum mismatch");
            return Err(MigrationError::ChecksumMismatch {
                name: name.to_string(),
                expected: record.checksum,
                actual,
            });
        }
        Ok(())
    }
}

/// Format used for MySQL history timestamps.
pub const MYSQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Parse a timestamp read back from a history table.
///
/// Accepts RFC 3339 and the naive `YYYY-MM-DD HH:MM:SS[.fff]` forms, which
/// are taken as UTC.
pub fn parse_timestamp(raw: &str) -> MigrateResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| MigrationError::database(format!("invalid history timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingConnection;

    fn record(name: &str, success: bool, rolled_back: bool) -> MigrationRecord {
        MigrationRecord {
            id: 1,
            migration_name: name.to_string(),
            checksum: "abc".to_string(),
            applied_at: Utc::now(),
            execution_time_ms: 5,
            success,
            error_message: None,
            rolled_back,
            rolled_back_at: None,
        }
    }

    fn entry(name: &str, checksum: &str, success: bool) -> HistoryEntry {
        HistoryEntry {
            migration_name: name.to_string(),
            checksum: checksum.to_string(),
            applied_at: Utc::now(),
            execution_time_ms: 3,
            success,
            error_message: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_record_state() {
        assert_eq!(record("m", true, false).state(), MigrationState::Applied);
        assert_eq!(record("m", false, false).state(), MigrationState::Failed);
        assert_eq!(record("m", true, true).state(), MigrationState::RolledBack);
    }

    #[test]
    fn test_checksum_is_stable() {
        let a = checksum(&["CREATE TABLE a (id INT);", "DROP TABLE b;"]);
        let b = checksum(&["CREATE TABLE a (id INT);", "DROP TABLE b;"]);
        let c = checksum(&["CREATE TABLE a (id INT);"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_script_checksum_matches_statements() {
        let statements = vec!["CREATE TABLE a (id INT);".to_string(), "DROP TABLE b;".to_string()];
        let script = "-- generated\nCREATE TABLE a (id INT);\n\nDROP TABLE b;\n";
        assert_eq!(script_checksum(Dialect::Postgres, script), checksum(&statements));
    }

    #[test]
    fn test_pending_computation() {
        let records = vec![record("m1", true, false)];
        assert_eq!(pending_migrations(&["m1", "m2", "m3"], &records), vec!["m2", "m3"]);
    }

    #[test]
    fn test_pending_keeps_failed_and_skips_rolled_back() {
        let records = vec![record("m1", false, false), record("m2", true, true)];
        assert_eq!(pending_migrations(&["m1", "m2", "m3"], &records), vec!["m1", "m3"]);
    }

    #[test]
    fn test_history_sql_per_dialect() {
        for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::Sqlite] {
            let sql = HistorySql::for_dialect(dialect);
            assert!(sql.create_table.contains("IF NOT EXISTS _migrations"));
            assert!(sql.create_table.contains("rolled_back_at"));
            assert!(sql.upsert.contains("migration_name"));
        }
        assert!(POSTGRES_HISTORY.upsert.contains("$6"));
        assert!(MYSQL_HISTORY.upsert.contains("ON DUPLICATE KEY UPDATE"));
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2024-03-01T10:20:30.123456+00:00").unwrap();
        assert_eq!(ts.timestamp(), 1709288430);
        let ts = parse_timestamp("2024-03-01 10:20:30.123456").unwrap();
        assert_eq!(ts.timestamp(), 1709288430);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_retry_replaces_failed_attempt() {
        let mut conn = RecordingConnection::new(Dialect::Postgres);
        let mut tracker = HistoryTracker::new(&mut conn);

        tracker.record_attempt(&entry("m1", "x", false)).await.unwrap();
        assert_eq!(tracker.find("m1").await.unwrap().unwrap().state(), MigrationState::Failed);

        tracker.record_attempt(&entry("m1", "x", true)).await.unwrap();
        let records = tracker.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state(), MigrationState::Applied);
        assert_eq!(records[0].error_message, None);
    }

    #[tokio::test]
    async fn test_tracker_round_trip() {
        let mut conn = RecordingConnection::new(Dialect::Sqlite);
        let mut tracker = HistoryTracker::new(&mut conn);

        tracker.ensure_table().await.unwrap();
        tracker
            .record_attempt(&entry("m1", &script_checksum(Dialect::Sqlite, "DROP TABLE a;"), true))
            .await
            .unwrap();
        tracker.record_attempt(&entry("m2", "x", false)).await.unwrap();

        assert_eq!(tracker.applied().await.unwrap(), vec!["m1"]);
        assert_eq!(tracker.get_pending(&["m1", "m2", "m3"]).await.unwrap(), vec!["m2", "m3"]);
        assert!(tracker.find("m2").await.unwrap().unwrap().error_message.is_some());

        tracker.record_rollback("m1").await.unwrap();
        let m1 = tracker.find("m1").await.unwrap().unwrap();
        assert!(m1.rolled_back);
        assert!(m1.rolled_back_at.is_some());

        assert!(conn.executed()[0].contains("CREATE TABLE IF NOT EXISTS _migrations"));
    }

    #[tokio::test]
    async fn test_checksum_drift() {
        let mut conn = RecordingConnection::new(Dialect::Postgres);
        let mut tracker = HistoryTracker::new(&mut conn);
        let original = "ALTER TABLE users ADD COLUMN name VARCHAR(255);";

        tracker
            .record_attempt(&entry("m1", &script_checksum(Dialect::Postgres, original), true))
            .await
            .unwrap();

        tracker.validate_checksum("m1", original).await.unwrap();

        let edited = "ALTER TABLE users ADD COLUMN name TEXT;";
        let err = tracker.validate_checksum("m1", edited).await.unwrap_err();
        assert!(matches!(err, MigrationError::ChecksumMismatch { ref name, .. } if name == "m1"));

        let err = tracker.validate_checksum("missing", original).await.unwrap_err();
        assert!(matches!(err, MigrationError::NotFound(_)));
    }
}
