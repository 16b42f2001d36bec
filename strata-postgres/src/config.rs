//! PostgreSQL connection configuration.

use std::time::Duration;

use crate::error::{PgError, PgResult};

/// Database used for administrative connections.
pub const DEFAULT_ADMIN_DATABASE: &str = "postgres";

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgConfig {
    /// Host.
    pub host: String,
    /// Port (default: 5432).
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Username.
    pub user: String,
    /// Password.
    pub password: Option<String>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Application name (shown in pg_stat_activity).
    pub application_name: String,
}

impl PgConfig {
    /// Create a new configuration from a database URL.
    pub fn from_url(url: &str) -> PgResult<Self> {
        let parsed = url::Url::parse(url).map_err(|e| PgError::config(format!("invalid database URL: {}", e)))?;

        if parsed.scheme() != "postgresql" && parsed.scheme() != "postgres" {
            return Err(PgError::config(format!(
                "invalid scheme: expected 'postgresql' or 'postgres', got '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| PgError::config("missing host in URL"))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(PgError::config("missing database name in URL"));
        }

        let user = if parsed.username().is_empty() {
            "postgres".to_string()
        } else {
            parsed.username().to_string()
        };

        let mut connect_timeout = Duration::from_secs(30);
        let mut application_name = "strata".to_string();
        for (key, value) in parsed.query_pairs() {
            match &*key {
                "connect_timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| PgError::config("invalid connect_timeout"))?;
                    connect_timeout = Duration::from_secs(secs);
                }
                "application_name" => application_name = value.into_owned(),
                _ => {}
            }
        }

        Ok(Self {
            host,
            port: parsed.port().unwrap_or(5432),
            database,
            user,
            password: parsed.password().map(String::from),
            connect_timeout,
            application_name,
        })
    }

    /// The same server and credentials, on another database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    /// Convert to tokio-postgres config.
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.dbname(&self.database);
        config.user(&self.user);
        if let Some(ref password) = self.password {
            config.password(password);
        }
        config.application_name(&self.application_name);
        config.connect_timeout(self.connect_timeout);
        config
    }
}
