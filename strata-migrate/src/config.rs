//! Configuration file parsing for `strata.toml`.
//!
//! ```toml
//! [database]
//! provider = "postgres"
//! url = "${DATABASE_URL}"
//!
//! [migrations]
//! directory = "./migrations"
//! allow_data_loss = false
//!
//! [shadow]
//! suffix = "_shadow"
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::engine::MigrationConfig;
use crate::error::{MigrateResult, MigrationError};
use crate::flavor::Dialect;
use crate::shadow::ShadowConfig;

/// Main configuration structure for `strata.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StrataConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Shadow database settings.
    #[serde(default)]
    pub shadow: ShadowConfig,
}

impl StrataConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| MigrationError::config(format!("failed to read {}: {}", path.display(), e)))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> MigrateResult<Self> {
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| MigrationError::config(format!("invalid configuration: {}", e)))
    }

    /// Get the database URL.
    pub fn database_url(&self) -> Option<&str> {
        self.database.url.as_deref()
    }

    /// The dialect: the explicit provider, or the one implied by the URL.
    pub fn dialect(&self) -> MigrateResult<Dialect> {
        match (self.database.provider, self.database.url.as_deref()) {
            (Some(provider), _) => Ok(provider),
            (None, Some(url)) => Dialect::from_url(url),
            (None, None) => Err(MigrationError::config(
                "set database.provider or database.url",
            )),
        }
    }

    /// Engine settings derived from the `[migrations]` section.
    pub fn migration_config(&self) -> MigrationConfig {
        let resolutions_file = self
            .migrations
            .resolutions_file
            .clone()
            .unwrap_or_else(|| self.migrations.directory.join("resolutions.toml"));

        MigrationConfig::new()
            .migrations_dir(&self.migrations.directory)
            .resolutions_file(resolutions_file)
            .allow_data_loss(self.migrations.allow_data_loss)
            .fail_on_checksum_mismatch(self.migrations.fail_on_checksum_mismatch)
    }

    /// Shadow settings.
    pub fn shadow_config(&self) -> &ShadowConfig {
        &self.shadow
    }
}

/// Database configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database provider. Inferred from `url` when unset.
    pub provider: Option<Dialect>,

    /// Connection URL (supports `${ENV_VAR}` interpolation).
    pub url: Option<String>,
}

/// Migration settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsConfig {
    /// Directory holding one subdirectory per migration.
    #[serde(default = "default_migrations_dir")]
    pub directory: PathBuf,

    /// Apply plans that can lose data.
    #[serde(default)]
    pub allow_data_loss: bool,

    /// Refuse to run when an applied migration was edited.
    #[serde(default = "default_true")]
    pub fail_on_checksum_mismatch: bool,

    /// Resolutions file. Defaults to `resolutions.toml` in `directory`.
    pub resolutions_file: Option<PathBuf>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: default_migrations_dir(),
            allow_data_loss: false,
            fail_on_checksum_mismatch: true,
            resolutions_file: None,
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("./migrations")
}

fn default_true() -> bool {
    true
}

fn env_var_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([^}]+)\}").ok())
        .as_ref()
}

/// Replace `${NAME}` with the value of environment variable `NAME`.
///
/// Unset variables are left as written.
fn expand_env_vars(content: &str) -> String {
    let Some(re) = env_var_pattern() else {
        return content.to_string();
    };

    re.replace_all(content, |cap: &regex_lite::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| cap[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = StrataConfig::default();
        assert_eq!(config.migrations.directory, PathBuf::from("./migrations"));
        assert!(config.migrations.fail_on_checksum_mismatch);
        assert!(!config.shadow.skip);
        assert!(config.dialect().is_err());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [database]
            provider = "postgresql"
            url = "postgres://localhost/app"

            [migrations]
            directory = "db/migrations"
            allow_data_loss = true

            [shadow]
            suffix = "_verify"
            auto_cleanup = false
        "#;

        let config = StrataConfig::from_str(toml).unwrap();
        assert_eq!(config.dialect().unwrap(), Dialect::Postgres);
        assert_eq!(config.database_url(), Some("postgres://localhost/app"));
        assert_eq!(config.shadow.shadow_name("app"), "app_verify");
        assert!(!config.shadow_config().auto_cleanup);

        let engine = config.migration_config();
        assert!(engine.allow_data_loss);
        assert_eq!(engine.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(
            engine.resolutions_file,
            PathBuf::from("db/migrations").join("resolutions.toml")
        );
    }

    #[test]
    fn test_dialect_from_url() {
        let config = StrataConfig::from_str(
            r#"
            [database]
            url = "sqlite://app.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.dialect().unwrap(), Dialect::Sqlite);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = StrataConfig::from_str(
            r#"
            [migrations]
            dir = "x"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn test_env_var_expansion() {
        // SAFETY: This test runs single-threaded and we clean up after
        unsafe {
            std::env::set_var("STRATA_TEST_DB_URL", "mysql://test");
        }
        let expanded = expand_env_vars("url = \"${STRATA_TEST_DB_URL}\"");
        assert_eq!(expanded, "url = \"mysql://test\"");
        unsafe {
            std::env::remove_var("STRATA_TEST_DB_URL");
        }

        assert_eq!(
            expand_env_vars("url = \"${STRATA_TEST_UNSET_VAR}\""),
            "url = \"${STRATA_TEST_UNSET_VAR}\""
        );
    }
}
