//! Shadow databases for MySQL.

use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder};
use strata_migrate::{Dialect, MigrateResult, ShadowConfig, ShadowDriver};

use crate::connection::MysqlConnection;
use crate::error::{MysqlError, MysqlResult};

/// Creates and drops MySQL shadow databases.
#[derive(Debug, Clone)]
pub struct MysqlShadowDriver {
    admin: Opts,
    shadow: Opts,
    database: String,
}

impl MysqlShadowDriver {
    /// Shadow of the database `main_url` points at.
    pub fn new(main_url: &str, config: &ShadowConfig) -> MysqlResult<Self> {
        let main = Opts::from_url(main_url)?;
        let main_database = main
            .db_name()
            .ok_or_else(|| MysqlError::config("database URL names no database"))?
            .to_string();
        let database = config.shadow_name(&main_database);
        if database == main_database {
            return Err(MysqlError::config(format!(
                "shadow database name '{}' collides with the real database",
                database
            )));
        }

        // The admin connection needs no default database.
        let admin = match &config.admin_url {
            Some(url) => Opts::from_url(url)?,
            None => Opts::from(OptsBuilder::from_opts(main.clone()).db_name(None::<String>)),
        };
        let shadow = Opts::from(OptsBuilder::from_opts(main).db_name(Some(database.clone())));

        Ok(Self { admin, shadow, database })
    }

    /// Name of the shadow database.
    pub fn database(&self) -> &str {
        &self.database
    }

    async fn admin_execute(&self, sql: &str) -> MysqlResult<()> {
        let mut conn = MysqlConnection::connect(self.admin.clone()).await?;
        let outcome = conn.inner().query_drop(sql).await;
        conn.close().await?;
        Ok(outcome?)
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[async_trait::async_trait]
impl ShadowDriver for MysqlShadowDriver {
    type Connection = MysqlConnection;

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn location(&self) -> String {
        format!("{}:{}/{}", self.shadow.ip_or_hostname(), self.shadow.tcp_port(), self.database)
    }

    async fn create(&self) -> MigrateResult<()> {
        let sql = format!("CREATE DATABASE IF NOT EXISTS {}", quote_identifier(&self.database));
        Ok(self.admin_execute(&sql).await?)
    }

    async fn connect(&self) -> MigrateResult<MysqlConnection> {
        Ok(MysqlConnection::connect(self.shadow.clone()).await?)
    }

    async fn close(&self, conn: MysqlConnection) -> MigrateResult<()> {
        Ok(conn.close().await?)
    }

    async fn drop_database(&self) -> MigrateResult<()> {
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_identifier(&self.database));
        Ok(self.admin_execute(&sql).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_names() {
        let driver = MysqlShadowDriver::new("mysql://root@localhost:3306/shop", &ShadowConfig::default()).unwrap();
        assert_eq!(driver.database(), "shop_shadow");
        assert_eq!(driver.location(), "localhost:3306/shop_shadow");
        assert_eq!(driver.admin.db_name(), None);
        assert_eq!(driver.shadow.db_name(), Some("shop_shadow"));
    }

    #[test]
    fn test_missing_database_rejected() {
        assert!(MysqlShadowDriver::new("mysql://root@localhost", &ShadowConfig::default()).is_err());
        assert!(MysqlShadowDriver::new("mysql://root@localhost/shop", &ShadowConfig::new().with_suffix("")).is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("a`b"), "`a``b`");
    }
}
