//! Shadow databases for PostgreSQL.
//!
//! Shadows are created and dropped over an administrative connection to a
//! different database on the same server (`postgres` unless
//! `shadow.admin_url` says otherwise).

use strata_migrate::{Dialect, MigrateResult, ShadowConfig, ShadowDriver};
use tokio_postgres::error::SqlState;
use tracing::debug;

use crate::config::{DEFAULT_ADMIN_DATABASE, PgConfig};
use crate::connection::PgConnection;
use crate::error::{PgError, PgResult};

/// Creates and drops PostgreSQL shadow databases.
#[derive(Debug, Clone)]
pub struct PgShadowDriver {
    admin: PgConfig,
    shadow: PgConfig,
}

impl PgShadowDriver {
    /// Shadow of the database `main` points at.
    pub fn new(main: &PgConfig, config: &ShadowConfig) -> PgResult<Self> {
        let admin = match &config.admin_url {
            Some(url) => PgConfig::from_url(url)?,
            None => main.with_database(DEFAULT_ADMIN_DATABASE),
        };
        let shadow = main.with_database(config.shadow_name(&main.database));
        if shadow.database == admin.database || shadow.database == main.database {
            return Err(PgError::config(format!(
                "shadow database name '{}' collides with a real database",
                shadow.database
            )));
        }
        Ok(Self { admin, shadow })
    }

    /// Name of the shadow database.
    pub fn database(&self) -> &str {
        &self.shadow.database
    }

    async fn admin_execute(&self, sql: &str) -> PgResult<()> {
        let conn = PgConnection::connect(&self.admin).await?;
        let outcome = conn.inner().batch_execute(sql).await;
        conn.close().await?;
        Ok(outcome?)
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait::async_trait]
impl ShadowDriver for PgShadowDriver {
    type Connection = PgConnection;

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn location(&self) -> String {
        format!("{}:{}/{}", self.shadow.host, self.shadow.port, self.shadow.database)
    }

    async fn create(&self) -> MigrateResult<()> {
        let sql = format!("CREATE DATABASE {}", quote_identifier(&self.shadow.database));
        match self.admin_execute(&sql).await {
            Err(e) if e.code() == Some(SqlState::DUPLICATE_DATABASE.code()) => {
                debug!(shadow = %self.shadow.database, "Shadow database already exists");
                Ok(())
            }
            other => Ok(other?),
        }
    }

    async fn connect(&self) -> MigrateResult<PgConnection> {
        Ok(PgConnection::connect(&self.shadow).await?)
    }

    async fn close(&self, conn: PgConnection) -> MigrateResult<()> {
        // DROP DATABASE fails while a session is still attached.
        Ok(conn.close().await?)
    }

    async fn drop_database(&self) -> MigrateResult<()> {
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_identifier(&self.shadow.database));
        Ok(self.admin_execute(&sql).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_names() {
        let main = PgConfig::from_url("postgres://app@localhost/shop").unwrap();
        let driver = PgShadowDriver::new(&main, &ShadowConfig::default()).unwrap();
        assert_eq!(driver.database(), "shop_shadow");
        assert_eq!(driver.location(), "localhost:5432/shop_shadow");
    }

    #[test]
    fn test_admin_url_override() {
        let main = PgConfig::from_url("postgres://localhost/shop").unwrap();
        let config = ShadowConfig::new()
            .with_suffix("_verify")
            .with_admin_url("postgres://admin@localhost/template1");
        let driver = PgShadowDriver::new(&main, &config).unwrap();
        assert_eq!(driver.admin.database, "template1");
        assert_eq!(driver.database(), "shop_verify");
    }

    #[test]
    fn test_empty_suffix_rejected() {
        let main = PgConfig::from_url("postgres://localhost/shop").unwrap();
        assert!(PgShadowDriver::new(&main, &ShadowConfig::new().with_suffix("")).is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
