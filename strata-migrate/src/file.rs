//! Migration artifact storage.
//!
//! Every migration is stored under its name as a forward script (`up.sql`)
//! and a rollback script (`down.sql`). Rollback reads `down.sql` back by name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};
use crate::flavor::Dialect;
use crate::history::script_checksum;
use crate::sql::MigrationSql;

const UP_FILE: &str = "up.sql";
const DOWN_FILE: &str = "down.sql";

/// A stored migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFile {
    /// Unique migration name.
    pub name: String,
    /// Forward script.
    pub up_sql: String,
    /// Rollback script.
    pub down_sql: String,
}

impl MigrationFile {
    /// Build a migration from generated SQL.
    pub fn new(name: impl Into<String>, sql: &MigrationSql) -> Self {
        Self::from_scripts(name, sql.forward_script(), sql.rollback_script())
    }

    /// Build a migration from scripts.
    pub fn from_scripts(name: impl Into<String>, up_sql: impl Into<String>, down_sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up_sql: up_sql.into(),
            down_sql: down_sql.into(),
        }
    }

    /// Checksum of the forward statements as `dialect` splits them.
    pub fn checksum(&self, dialect: Dialect) -> String {
        script_checksum(dialect, &self.up_sql)
    }
}

/// Where migration scripts live, keyed by migration name.
#[async_trait::async_trait]
pub trait MigrationStore: Send + Sync {
    /// Store both scripts of a migration, replacing earlier content.
    async fn save(&self, migration: &MigrationFile) -> MigrateResult<()>;

    /// The forward script, if the migration is known.
    async fn load_up(&self, name: &str) -> MigrateResult<Option<String>>;

    /// The rollback script, if one was stored.
    async fn load_down(&self, name: &str) -> MigrateResult<Option<String>>;

    /// Every stored migration name, in order.
    async fn list(&self) -> MigrateResult<Vec<String>>;

    /// Load a whole migration.
    async fn load(&self, name: &str) -> MigrateResult<MigrationFile> {
        let up = self
            .load_up(name)
            .await?
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))?;
        let down = self.load_down(name).await?.unwrap_or_default();
        Ok(MigrationFile::from_scripts(name, up, down))
    }
}

/// Reject names that would escape the migrations directory.
pub fn validate_name(name: &str) -> MigrateResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(MigrationError::InvalidMigration(format!("unusable migration name '{}'", name)))
    }
}

/// A timestamp-prefixed migration name: `20240301102030_add_users`.
pub fn timestamped_name(description: &str) -> String {
    let slug: String = description
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}_{}", Utc::now().format("%Y%m%d%H%M%S"), slug.trim_matches('_'))
}

/// Stores migrations as `<dir>/<name>/up.sql` and `<dir>/<name>/down.sql`.
#[derive(Debug, Clone)]
pub struct MigrationFileManager {
    migrations_dir: PathBuf,
}

impl MigrationFileManager {
    /// Create a file manager rooted at `migrations_dir`.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// The migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Ensure the migrations directory exists.
    pub async fn ensure_dir(&self) -> MigrateResult<()> {
        tokio::fs::create_dir_all(&self.migrations_dir).await?;
        Ok(())
    }

    fn migration_dir(&self, name: &str) -> MigrateResult<PathBuf> {
        validate_name(name)?;
        Ok(self.migrations_dir.join(name))
    }

    async fn read_optional(path: &Path) -> MigrateResult<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl MigrationStore for MigrationFileManager {
    async fn save(&self, migration: &MigrationFile) -> MigrateResult<()> {
        let dir = self.migration_dir(&migration.name)?;
        tokio::fs::create_dir_all(&dir).await?;

        tokio::fs::write(dir.join(UP_FILE), &migration.up_sql).await?;
        tokio::fs::write(dir.join(DOWN_FILE), &migration.down_sql).await?;

        tracing::debug!(migration = %migration.name, path = %dir.display(), "Wrote migration files");
        Ok(())
    }

    async fn load_up(&self, name: &str) -> MigrateResult<Option<String>> {
        let dir = self.migration_dir(name)?;
        Self::read_optional(&dir.join(UP_FILE)).await
    }

    async fn load_down(&self, name: &str) -> MigrateResult<Option<String>> {
        let dir = self.migration_dir(name)?;
        Self::read_optional(&dir.join(DOWN_FILE)).await
    }

    async fn list(&self) -> MigrateResult<Vec<String>> {
        let mut names = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.migrations_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // A migration directory must hold an up.sql.
            if !tokio::fs::try_exists(path.join(UP_FILE)).await? {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }

        // Timestamp prefixes sort chronologically.
        names.sort();
        Ok(names)
    }
}

/// Keeps migrations in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    migrations: RwLock<BTreeMap<String, MigrationFile>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rollback script of a stored migration.
    pub fn set_down(&self, name: &str, down_sql: impl Into<String>) -> MigrateResult<()> {
        let mut migrations = self.migrations.write();
        let migration = migrations
            .get_mut(name)
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))?;
        migration.down_sql = down_sql.into();
        Ok(())
    }
}

#[async_trait::async_trait]
impl MigrationStore for MemoryStore {
    async fn save(&self, migration: &MigrationFile) -> MigrateResult<()> {
        validate_name(&migration.name)?;
        self.migrations
            .write()
            .insert(migration.name.clone(), migration.clone());
        Ok(())
    }

    async fn load_up(&self, name: &str) -> MigrateResult<Option<String>> {
        Ok(self.migrations.read().get(name).map(|m| m.up_sql.clone()))
    }

    async fn load_down(&self, name: &str) -> MigrateResult<Option<String>> {
        Ok(self.migrations.read().get(name).map(|m| m.down_sql.clone()))
    }

    async fn list(&self) -> MigrateResult<Vec<String>> {
        Ok(self.migrations.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::checksum;
    use tempfile::TempDir;

    fn sample() -> MigrationSql {
        MigrationSql {
            forward: vec![
                "CREATE TABLE users (\n    id INTEGER NOT NULL\n);".to_string(),
                "CREATE INDEX users_id_idx ON users(id);".to_string(),
            ],
            rollback: vec!["DROP TABLE users;".to_string()],
            warnings: vec![],
        }
    }

    #[test]
    fn test_file_checksum_matches_statements() {
        let sql = sample();
        let file = MigrationFile::new("20240101000000_init", &sql);
        assert_eq!(file.checksum(Dialect::MySql), checksum(&sql.forward));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("20240101000000_init").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_timestamped_name() {
        let name = timestamped_name("Add users table");
        let (stamp, slug) = name.split_at(14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(slug, "_add_users_table");
    }

    #[tokio::test]
    async fn test_file_manager_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = MigrationFileManager::new(temp.path().join("migrations"));

        assert!(store.list().await.unwrap().is_empty());

        let file = MigrationFile::new("20240101000000_init", &sample());
        store.save(&file).await.unwrap();
        store
            .save(&MigrationFile::from_scripts("20240102000000_more", "SELECT 1;", ""))
            .await
            .unwrap();

        assert_eq!(
            store.list().await.unwrap(),
            vec!["20240101000000_init", "20240102000000_more"]
        );
        assert_eq!(store.load("20240101000000_init").await.unwrap(), file);
        assert_eq!(
            store.load_down("20240101000000_init").await.unwrap().as_deref(),
            Some("DROP TABLE users;\n")
        );
        assert!(store.load_up("missing").await.unwrap().is_none());
        assert!(matches!(
            store.load("missing").await,
            Err(MigrationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_manager_skips_stray_directories() {
        let temp = TempDir::new().unwrap();
        let store = MigrationFileManager::new(temp.path());
        tokio::fs::create_dir_all(temp.path().join("notes")).await.unwrap();
        store
            .save(&MigrationFile::from_scripts("m1", "SELECT 1;", ""))
            .await
            .unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        store
            .save(&MigrationFile::from_scripts("m1", "CREATE TABLE a (id INT);", "DROP TABLE a;"))
            .await
            .unwrap();
        store.set_down("m1", "-- nothing").unwrap();

        assert_eq!(store.load_down("m1").await.unwrap().as_deref(), Some("-- nothing"));
        assert_eq!(store.list().await.unwrap(), vec!["m1"]);
        assert!(store.set_down("m2", "").is_err());
    }
}
