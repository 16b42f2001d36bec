//! Migration execution.
//!
//! A migration attempt moves from pending to applying, then to applied or
//! failed. An applied migration can be rolled back once; a rolled-back
//! migration is never applied again under the same name.
//!
//! Statements run inside one transaction together with the history row. In
//! dialects that commit DDL implicitly (MySQL) a failure leaves the earlier
//! statements in place; the error reports this through
//! [`MigrationError::StatementExecution::partially_applied`].

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::MigrationConnection;
use crate::error::{MigrateResult, MigrationError};
use crate::file::MigrationStore;
use crate::history::{HistoryEntry, HistoryTracker, MigrationState, checksum};
use crate::statement::split_statements_for;

/// Outcome of a successful apply or rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Migration name.
    pub migration_name: String,
    /// Checksum of the statements that ran.
    pub checksum: String,
    /// Number of statements executed.
    pub statements: usize,
    /// Wall-clock duration.
    pub duration: Duration,
}

/// Runs migration statements and records them in history.
pub struct MigrationExecutor<'c, C: MigrationConnection + ?Sized> {
    conn: &'c mut C,
    cancel: Option<CancellationToken>,
}

impl<'c, C: MigrationConnection + ?Sized> MigrationExecutor<'c, C> {
    /// Create an executor that exclusively uses `conn`.
    pub fn new(conn: &'c mut C) -> Self {
        Self { conn, cancel: None }
    }

    /// Stop between statements once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn tracker(&mut self) -> HistoryTracker<'_, C> {
        HistoryTracker::new(&mut *self.conn)
    }

    /// Apply `statements` as migration `name`.
    ///
    /// Every attempt is recorded. A failure aborts the batch and returns the
    /// first failing statement with its 1-based position.
    pub async fn execute<S: AsRef<str> + Sync>(&mut self, statements: &[S], name: &str) -> MigrateResult<ExecutionReport> {
        self.tracker().ensure_table().await?;

        if let Some(record) = self.tracker().find(name).await? {
            match record.state() {
                MigrationState::Applied => return Err(MigrationError::AlreadyApplied(name.to_string())),
                MigrationState::RolledBack => return Err(MigrationError::AlreadyRolledBack(name.to_string())),
                MigrationState::Pending | MigrationState::Failed => {}
            }
        }

        let checksum = checksum(statements);
        let transactional = self.conn.dialect().flavor().supports_transactional_ddl();
        info!(migration = %name, statements = statements.len(), "Applying migration");

        let start = Instant::now();
        self.conn.begin().await?;

        let outcome = match self.run_statements(statements, name, transactional).await {
            Ok(()) => {
                let entry = HistoryEntry {
                    migration_name: name.to_string(),
                    checksum: checksum.clone(),
                    applied_at: Utc::now(),
                    execution_time_ms: elapsed_ms(start),
                    success: true,
                    error_message: None,
                };
                match self.tracker().record_attempt(&entry).await {
                    Ok(()) => self.conn.commit().await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                let duration = start.elapsed();
                info!(migration = %name, duration_ms = duration.as_millis() as u64, "Migration applied");
                Ok(ExecutionReport {
                    migration_name: name.to_string(),
                    checksum,
                    statements: statements.len(),
                    duration,
                })
            }
            Err(error) => {
                if let Err(e) = self.conn.rollback().await {
                    warn!(migration = %name, error = %e, "Failed to abort migration transaction");
                }
                let entry = HistoryEntry {
                    migration_name: name.to_string(),
                    checksum,
                    applied_at: Utc::now(),
                    execution_time_ms: elapsed_ms(start),
                    success: false,
                    error_message: Some(error.to_string()),
                };
                self.tracker().record_attempt(&entry).await?;
                warn!(migration = %name, error = %error, "Migration failed");
                Err(error)
            }
        }
    }

    /// Roll back migration `name` using the rollback script in `store`.
    pub async fn rollback(&mut self, name: &str, store: &dyn MigrationStore) -> MigrateResult<ExecutionReport> {
        self.tracker().ensure_table().await?;

        let record = self
            .tracker()
            .find(name)
            .await?
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))?;
        match record.state() {
            MigrationState::RolledBack => return Err(MigrationError::AlreadyRolledBack(name.to_string())),
            MigrationState::Failed | MigrationState::Pending => {
                return Err(MigrationError::RollbackFailed(format!(
                    "migration '{}' was never applied successfully",
                    name
                )));
            }
            MigrationState::Applied => {}
        }

        let script = store.load_down(name).await?.unwrap_or_default();
        let statements = split_statements_for(self.conn.dialect(), &script);
        if statements.is_empty() {
            return Err(MigrationError::EmptyRollback(name.to_string()));
        }

        let transactional = self.conn.dialect().flavor().supports_transactional_ddl();
        info!(migration = %name, statements = statements.len(), "Rolling back migration");

        let start = Instant::now();
        self.conn.begin().await?;

        let outcome = match self.run_statements(&statements, name, transactional).await {
            Ok(()) => match self.tracker().record_rollback(name).await {
                Ok(()) => self.conn.commit().await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(error) = outcome {
            if let Err(e) = self.conn.rollback().await {
                warn!(migration = %name, error = %e, "Failed to abort rollback transaction");
            }
            warn!(migration = %name, error = %error, "Rollback failed");
            return Err(error);
        }

        let duration = start.elapsed();
        info!(migration = %name, duration_ms = duration.as_millis() as u64, "Migration rolled back");
        Ok(ExecutionReport {
            migration_name: name.to_string(),
            checksum: checksum(&statements),
            statements: statements.len(),
            duration,
        })
    }

    async fn run_statements<S: AsRef<str> + Sync>(
        &mut self,
        statements: &[S],
        name: &str,
        transactional: bool,
    ) -> MigrateResult<()> {
        for (i, statement) in statements.iter().enumerate() {
            if self.is_cancelled() {
                warn!(migration = %name, completed = i, "Cancelled between statements");
                return Err(MigrationError::Cancelled(name.to_string()));
            }

            let sql = statement.as_ref();
            debug!(migration = %name, index = i + 1, statement = %sql, "Executing migration statement");
            if let Err(e) = self.conn.execute(sql).await {
                return Err(MigrationError::StatementExecution {
                    index: i + 1,
                    statement: sql.to_string(),
                    message: e.to_string(),
                    partially_applied: !transactional && i > 0,
                });
            }
        }
        Ok(())
    }
}

fn elapsed_ms(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingConnection;
    use crate::file::{MemoryStore, MigrationFile};
    use crate::flavor::Dialect;

    const FORWARD: [&str; 2] = [
        "CREATE TABLE a (id INTEGER);",
        "CREATE TABLE b (id INTEGER);",
    ];

    async fn store_with(name: &str, down: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .save(&MigrationFile::from_scripts(name, FORWARD.join("\n\n"), down))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_execute_records_success() {
        let mut conn = RecordingConnection::new(Dialect::Postgres);
        let report = MigrationExecutor::new(&mut conn).execute(&FORWARD, "m1").await.unwrap();

        assert_eq!(report.statements, 2);
        assert_eq!(report.checksum, checksum(&FORWARD));
        assert_eq!(&conn.executed()[1..], &FORWARD);
        assert_eq!(conn.commits, 1);

        let record = &conn.history()[0];
        assert_eq!(record.state(), MigrationState::Applied);
        assert_eq!(record.checksum, report.checksum);
    }

    #[tokio::test]
    async fn test_failure_reports_position_and_records_attempt() {
        let mut conn = RecordingConnection::new(Dialect::Postgres).fail_on("TABLE b");
        let err = MigrationExecutor::new(&mut conn)
            .execute(&FORWARD, "m1")
            .await
            .unwrap_err();

        match err {
            MigrationError::StatementExecution {
                index,
                statement,
                partially_applied,
                ..
            } => {
                assert_eq!(index, 2);
                assert_eq!(statement, FORWARD[1]);
                assert!(!partially_applied);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(conn.rollbacks, 1);
        assert_eq!(conn.commits, 0);
        let record = &conn.history()[0];
        assert!(!record.success);
        assert!(record.error_message.as_deref().unwrap().contains("Statement 2 failed"));
    }

    #[tokio::test]
    async fn test_mysql_failure_is_partial() {
        let mut conn = RecordingConnection::new(Dialect::MySql).fail_on("TABLE b");
        let err = MigrationExecutor::new(&mut conn)
            .execute(&FORWARD, "m1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::StatementExecution {
                partially_applied: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_attempt_can_be_retried() {
        let mut conn = RecordingConnection::new(Dialect::Sqlite).fail_on("TABLE b");
        assert!(MigrationExecutor::new(&mut conn).execute(&FORWARD, "m1").await.is_err());
        conn.clear_failures();

        let mut executor = MigrationExecutor::new(&mut conn);
        executor.execute(&FORWARD, "m1").await.unwrap();
        let err = executor.execute(&FORWARD, "m1").await.unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyApplied(_)));

        assert_eq!(conn.history().len(), 1);
        assert!(conn.history()[0].success);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_statement() {
        let token = CancellationToken::new();
        token.cancel();

        let mut conn = RecordingConnection::new(Dialect::Postgres);
        let err = MigrationExecutor::new(&mut conn)
            .with_cancellation(token)
            .execute(&FORWARD, "m1")
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Cancelled(_)));
        // Only the history table creation ran.
        assert_eq!(conn.executed().len(), 1);
        assert_eq!(conn.history()[0].state(), MigrationState::Failed);
    }

    #[tokio::test]
    async fn test_rollback_lifecycle() {
        let store = store_with("m1", "DROP TABLE b;\nDROP TABLE a;").await;
        let mut conn = RecordingConnection::new(Dialect::Postgres);
        let mut executor = MigrationExecutor::new(&mut conn);

        executor.execute(&FORWARD, "m1").await.unwrap();
        let report = executor.rollback("m1", &store).await.unwrap();
        assert_eq!(report.statements, 2);

        let err = executor.rollback("m1", &store).await.unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyRolledBack(_)));

        let err = executor.execute(&FORWARD, "m1").await.unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyRolledBack(_)));

        let record = &conn.history()[0];
        assert_eq!(record.state(), MigrationState::RolledBack);
        assert!(record.rolled_back_at.is_some());
        assert!(conn.executed().iter().any(|s| s == "DROP TABLE a;"));
    }

    #[tokio::test]
    async fn test_rollback_errors() {
        let mut conn = RecordingConnection::new(Dialect::Postgres);
        let store = store_with("m1", "-- no safe inverse\n").await;
        let mut executor = MigrationExecutor::new(&mut conn);

        let err = executor.rollback("unknown", &store).await.unwrap_err();
        assert!(matches!(err, MigrationError::NotFound(_)));

        executor.execute(&FORWARD, "m1").await.unwrap();
        let err = executor.rollback("m1", &store).await.unwrap_err();
        assert!(matches!(err, MigrationError::EmptyRollback(_)));
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_migration_applied() {
        let store = store_with("m1", "DROP TABLE b;\nDROP TABLE a;").await;
        let mut conn = RecordingConnection::new(Dialect::Postgres).fail_on("DROP TABLE a");
        let mut executor = MigrationExecutor::new(&mut conn);

        executor.execute(&FORWARD, "m1").await.unwrap();
        let err = executor.rollback("m1", &store).await.unwrap_err();
        assert!(matches!(err, MigrationError::StatementExecution { index: 2, .. }));
        assert_eq!(conn.history()[0].state(), MigrationState::Applied);
    }
}
