//! Shadow databases for SQLite.
//!
//! A shadow is a sibling file of the main database: `app.db` gets
//! `app_shadow.db`. Without a main file the shadow lives in memory.

use std::path::{Path, PathBuf};

use strata_migrate::{Dialect, MigrateResult, ShadowConfig, ShadowDriver};

use crate::connection::SqliteConnection;
use crate::error::SqliteError;

/// Files SQLite may leave next to a database.
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Creates and removes SQLite shadow files.
#[derive(Debug, Clone)]
pub struct SqliteShadowDriver {
    path: Option<PathBuf>,
}

impl SqliteShadowDriver {
    /// Shadow next to the database at `database`, named with the configured suffix.
    pub fn new(database: impl AsRef<Path>, config: &ShadowConfig) -> Self {
        Self {
            path: Some(shadow_path(database.as_ref(), &config.suffix)),
        }
    }

    /// Shadow at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: Some(path.into()) }
    }

    /// Shadow held in memory by its connection.
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    /// The shadow file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// `dir/app.db` with suffix `_shadow` becomes `dir/app_shadow.db`.
pub fn shadow_path(database: &Path, suffix: &str) -> PathBuf {
    let stem = database
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database".to_string());
    let file_name = match database.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    database.with_file_name(file_name)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[async_trait::async_trait]
impl ShadowDriver for SqliteShadowDriver {
    type Connection = SqliteConnection;

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn location(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => ":memory:".to_string(),
        }
    }

    async fn create(&self) -> MigrateResult<()> {
        if let Some(parent) = self.path.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    async fn connect(&self) -> MigrateResult<SqliteConnection> {
        let conn = match &self.path {
            Some(path) => SqliteConnection::open(path).await?,
            None => SqliteConnection::open_in_memory().await?,
        };
        Ok(conn)
    }

    async fn close(&self, conn: SqliteConnection) -> MigrateResult<()> {
        Ok(conn.close().await?)
    }

    async fn drop_database(&self) -> MigrateResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        remove_if_exists(path).await.map_err(SqliteError::from)?;
        for suffix in SIDECAR_SUFFIXES {
            let mut sidecar = path.clone().into_os_string();
            sidecar.push(suffix);
            remove_if_exists(Path::new(&sidecar)).await.map_err(SqliteError::from)?;
        }
        Ok(())
    }
}
