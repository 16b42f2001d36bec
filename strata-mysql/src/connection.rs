//! MySQL connection wrapper.

use chrono::{DateTime, Utc};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts};
use strata_migrate::history::{HistorySql, MYSQL_TIMESTAMP_FORMAT, parse_timestamp};
use strata_migrate::{Dialect, HistoryEntry, MigrateResult, MigrationConnection, MigrationRecord};
use tracing::debug;

use crate::error::{MysqlError, MysqlResult};

const HISTORY: &HistorySql = HistorySql::for_dialect(Dialect::MySql);

/// A history row as selected, timestamps formatted as text.
type RawRecord = (i64, String, String, String, i64, bool, Option<String>, bool, Option<String>);

/// A migration connection to one MySQL database.
///
/// MySQL commits DDL implicitly, so a failed batch can leave earlier
/// statements in place.
pub struct MysqlConnection {
    conn: Conn,
}

impl MysqlConnection {
    /// Create a new connection wrapper.
    pub fn new(conn: Conn) -> Self {
        Self { conn }
    }

    /// Connect with parsed options.
    pub async fn connect(opts: Opts) -> MysqlResult<Self> {
        debug!(host = %opts.ip_or_hostname(), database = ?opts.db_name(), "Connecting to MySQL");
        Ok(Self::new(Conn::new(opts).await?))
    }

    /// Connect with a `mysql://` URL.
    pub async fn connect_url(url: &str) -> MysqlResult<Self> {
        Self::connect(Opts::from_url(url)?).await
    }

    /// Get the underlying mysql_async connection.
    pub fn inner(&mut self) -> &mut Conn {
        &mut self.conn
    }

    /// Disconnect gracefully.
    pub async fn close(self) -> MysqlResult<()> {
        self.conn.disconnect().await?;
        Ok(())
    }

    fn record(raw: RawRecord) -> MysqlResult<MigrationRecord> {
        let (id, migration_name, checksum, applied_at, execution_time_ms, success, error_message, rolled_back, rolled_back_at) =
            raw;
        let timestamp = |raw: &str| parse_timestamp(raw).map_err(|e| MysqlError::deserialization(e.to_string()));

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

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(MYSQL_TIMESTAMP_FORMAT).to_string()
}

#[async_trait::async_trait]
impl MigrationConnection for MysqlConnection {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        debug!(sql = %sql, "Executing statement");
        self.conn.query_drop(sql).await.map_err(MysqlError::from)?;
        Ok(())
    }

    async fn load_history(&mut self) -> MigrateResult<Vec<MigrationRecord>> {
        let rows: Vec<RawRecord> = self
            .conn
            .query(HISTORY.select_all)
            .await
            .map_err(MysqlError::from)?;
        Ok(rows
            .into_iter()
            .map(Self::record)
            .collect::<MysqlResult<Vec<_>>>()?)
    }

    async fn save_history(&mut self, entry: &HistoryEntry) -> MigrateResult<()> {
        self.conn
            .exec_drop(
                HISTORY.upsert,
                (
                    entry.migration_name.as_str(),
                    entry.checksum.as_str(),
                    format_timestamp(&entry.applied_at),
                    entry.execution_time_ms,
                    entry.success,
                    entry.error_message.as_deref(),
                ),
            )
            .await
            .map_err(MysqlError::from)?;
        Ok(())
    }

    async fn mark_rolled_back(&mut self, name: &str, at: DateTime<Utc>) -> MigrateResult<()> {
        self.conn
            .exec_drop(HISTORY.mark_rolled_back, (format_timestamp(&at), name))
            .await
            .map_err(MysqlError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap();
        let formatted = format_timestamp(&at);
        assert_eq!(formatted, "2024-03-01 10:20:30.000000");
        assert_eq!(parse_timestamp(&formatted).unwrap(), at);
    }

    #[test]
    fn test_record_from_row() {
        let record = MysqlConnection::record((
            1,
            "m1".to_string(),
            "abc".to_string(),
            "2024-03-01 10:20:30.000000".to_string(),
            12,
            true,
            None,
            true,
            Some("2024-03-02 08:00:00.000000".to_string()),
        ))
        .unwrap();
        assert!(record.rolled_back_at.is_some());
        assert_eq!(record.state(), strata_migrate::MigrationState::RolledBack);

        let bad = MysqlConnection::record((
            1,
            "m1".to_string(),
            "abc".to_string(),
            "yesterday".to_string(),
            12,
            true,
            None,
            false,
            None,
        ));
        assert!(bad.is_err());
    }
}
