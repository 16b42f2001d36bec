//! PostgreSQL connection wrapper.

use chrono::{DateTime, Utc};
use strata_migrate::history::HistorySql;
use strata_migrate::{Dialect, HistoryEntry, MigrateResult, MigrationConnection, MigrationRecord};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, warn};

use crate::config::PgConfig;
use crate::error::{PgError, PgResult};

const HISTORY: &HistorySql = HistorySql::for_dialect(Dialect::Postgres);

/// A migration connection to one PostgreSQL database.
///
/// The protocol runs on a spawned task; [`close`](Self::close) waits for it.
pub struct PgConnection {
    client: Client,
    task: JoinHandle<()>,
    database: String,
}

impl PgConnection {
    /// Connect with `config`.
    pub async fn connect(config: &PgConfig) -> PgResult<Self> {
        debug!(host = %config.host, database = %config.database, "Connecting to PostgreSQL");
        let (client, connection) = config.to_pg_config().connect(NoTls).await?;
        let database = config.database.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection closed with an error");
            }
        });

        Ok(Self { client, task, database })
    }

    /// Connect with a `postgres://` URL.
    pub async fn connect_url(url: &str) -> PgResult<Self> {
        Self::connect(&PgConfig::from_url(url)?).await
    }

    /// Name of the connected database.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Get the underlying tokio-postgres client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Close the connection and wait until the server side is gone.
    pub async fn close(self) -> PgResult<()> {
        drop(self.client);
        if let Err(e) = self.task.await {
            warn!(error = %e, "PostgreSQL connection task failed");
        }
        Ok(())
    }

    fn record(row: &Row) -> PgResult<MigrationRecord> {
        Ok(MigrationRecord {
            id: i64::from(row.try_get::<_, i32>(0)?),
            migration_name: row.try_get(1)?,
            checksum: row.try_get(2)?,
            applied_at: row.try_get(3)?,
            execution_time_ms: row.try_get(4)?,
            success: row.try_get(5)?,
            error_message: row.try_get(6)?,
            rolled_back: row.try_get(7)?,
            rolled_back_at: row.try_get(8)?,
        })
    }
}

#[async_trait::async_trait]
impl MigrationConnection for PgConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        debug!(sql = %sql, "Executing statement");
        self.client.batch_execute(sql).await.map_err(PgError::from)?;
        Ok(())
    }

    async fn load_history(&mut self) -> MigrateResult<Vec<MigrationRecord>> {
        let rows = self
            .client
            .query(HISTORY.select_all, &[])
            .await
            .map_err(PgError::from)?;
        Ok(rows.iter().map(Self::record).collect::<PgResult<Vec<_>>>()?)
    }

    async fn save_history(&mut self, entry: &HistoryEntry) -> MigrateResult<()> {
        self.client
            .execute(
                HISTORY.upsert,
                &[
                    &entry.migration_name,
                    &entry.checksum,
                    &entry.applied_at,
                    &entry.execution_time_ms,
                    &entry.success,
                    &entry.error_message,
                ],
            )
            .await
            .map_err(PgError::from)?;
        Ok(())
    }

    async fn mark_rolled_back(&mut self, name: &str, at: DateTime<Utc>) -> MigrateResult<()> {
        self.client
            .execute(HISTORY.mark_rolled_back, &[&at, &name])
            .await
            .map_err(PgError::from)?;
        Ok(())
    }
}
