//! Shadow database support for verifying migrations.
//!
//! A shadow database is a disposable database of the same engine as the
//! real one. Verification seeds it with the current schema, applies the
//! candidate forward SQL, introspects the result and diffs it against the
//! target schema. Anything left over is drift: the generated SQL does not
//! produce the structure it claims to.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_migrate::shadow::{ShadowConfig, ShadowDatabase};
//!
//! let mut shadow = ShadowDatabase::new(driver, Box::new(introspector), ShadowConfig::default());
//! let outcome = shadow.verify(&current, &sql.forward, &target).await?;
//! if let Some(drift) = outcome.drift() {
//!     eprintln!("shadow drift: {}", drift.summary());
//! }
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::connection::{MigrationConnection, SchemaIntrospector};
use crate::diff::{Change, DiffResult, SchemaDiffer};
use crate::error::{MigrateResult, MigrationError};
use crate::executor::MigrationExecutor;
use crate::flavor::Dialect;
use crate::schema::DatabaseSchema;
use crate::sql::generator;

/// Default suffix appended to the database name.
pub const DEFAULT_SHADOW_SUFFIX: &str = "_shadow";

/// Configuration for shadow database operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShadowConfig {
    /// Turn every shadow operation into a no-op.
    pub skip: bool,
    /// Suffix appended to the main database name.
    pub suffix: String,
    /// Administrative connection URL used to create and drop the shadow.
    pub admin_url: Option<String>,
    /// Drop the shadow once verification finishes.
    pub auto_cleanup: bool,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            skip: false,
            suffix: DEFAULT_SHADOW_SUFFIX.to_string(),
            admin_url: None,
            auto_cleanup: true,
        }
    }
}

impl ShadowConfig {
    /// Create a default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that skips shadow verification.
    pub fn skipped() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    /// Set the name suffix.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Set the administrative connection URL.
    pub fn with_admin_url(mut self, url: impl Into<String>) -> Self {
        self.admin_url = Some(url.into());
        self
    }

    /// Keep the shadow around after verification.
    pub fn no_auto_cleanup(mut self) -> Self {
        self.auto_cleanup = false;
        self
    }

    /// Name of the shadow for a database called `database`.
    pub fn shadow_name(&self, database: &str) -> String {
        format!("{}{}", database, self.suffix)
    }
}

/// Provisions shadow databases for one engine.
#[async_trait::async_trait]
pub trait ShadowDriver: Send + Sync {
    /// Connection type opened on the shadow.
    type Connection: MigrationConnection;

    /// Dialect of the shadow.
    fn dialect(&self) -> Dialect;

    /// Database name or file path, for logs.
    fn location(&self) -> String;

    /// Create the shadow. An existing shadow counts as success.
    async fn create(&self) -> MigrateResult<()>;

    /// Open a connection to the shadow.
    async fn connect(&self) -> MigrateResult<Self::Connection>;

    /// Close a connection before the shadow is dropped.
    async fn close(&self, conn: Self::Connection) -> MigrateResult<()> {
        drop(conn);
        Ok(())
    }

    /// Remove the shadow if it exists.
    async fn drop_database(&self) -> MigrateResult<()>;
}

/// Current state of a shadow database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowState {
    /// Shadow database not yet created.
    NotCreated,
    /// Shadow database exists and is connected.
    Ready,
    /// Shadow database has been dropped.
    Dropped,
}

/// Differences between the migrated shadow and the target schema.
#[derive(Debug, Clone)]
pub struct SchemaDrift {
    diff: DiffResult,
}

impl SchemaDrift {
    /// Check if there's any drift.
    pub fn has_drift(&self) -> bool {
        !self.diff.is_empty()
    }

    /// Tables the target has but the shadow lacks.
    pub fn missing_tables(&self) -> Vec<&str> {
        self.diff.tables_to_create().iter().map(|t| t.name()).collect()
    }

    /// Tables the shadow has but the target lacks.
    pub fn extra_tables(&self) -> Vec<&str> {
        self.diff.tables_to_drop().iter().map(|t| t.name()).collect()
    }

    /// Per-table differences.
    pub fn changes(&self) -> &[Change] {
        self.diff.changes()
    }

    /// The underlying diff from shadow to target.
    pub fn diff(&self) -> &DiffResult {
        &self.diff
    }

    /// Get a summary of the drift.
    pub fn summary(&self) -> String {
        if self.has_drift() {
            self.diff.summary()
        } else {
            "No drift detected".to_string()
        }
    }
}

/// Result of a shadow verification.
#[derive(Debug, Clone)]
pub enum ShadowVerification {
    /// Shadow verification is disabled.
    Skipped,
    /// The shadow matches the target after migrating.
    Verified,
    /// The shadow does not match the target.
    Drift(SchemaDrift),
}

impl ShadowVerification {
    /// The drift, if any was found.
    pub fn drift(&self) -> Option<&SchemaDrift> {
        match self {
            Self::Drift(drift) => Some(drift),
            _ => None,
        }
    }

    /// Whether verification ran and found no drift.
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// A shadow database instance.
pub struct ShadowDatabase<D: ShadowDriver> {
    driver: D,
    introspector: Box<dyn SchemaIntrospector<D::Connection>>,
    config: ShadowConfig,
    state: ShadowState,
    conn: Option<D::Connection>,
    applied_migrations: Vec<String>,
}

impl<D: ShadowDriver> ShadowDatabase<D> {
    /// Create a shadow manager. Nothing is provisioned until [`create`](Self::create).
    pub fn new(driver: D, introspector: Box<dyn SchemaIntrospector<D::Connection>>, config: ShadowConfig) -> Self {
        Self {
            driver,
            introspector,
            config,
            state: ShadowState::NotCreated,
            conn: None,
            applied_migrations: Vec::new(),
        }
    }

    /// Get the current state.
    pub fn state(&self) -> ShadowState {
        self.state
    }

    /// The configuration in use.
    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Names under which batches were applied to the shadow.
    pub fn applied_migrations(&self) -> &[String] {
        &self.applied_migrations
    }

    /// Create the shadow database and connect to it.
    pub async fn create(&mut self) -> MigrateResult<()> {
        if self.config.skip {
            return Ok(());
        }
        if self.state == ShadowState::Ready {
            return Err(MigrationError::shadow_database(format!(
                "shadow database {} already exists",
                self.driver.location()
            )));
        }

        self.driver.create().await?;
        self.conn = Some(self.driver.connect().await?);
        self.applied_migrations.clear();
        self.state = ShadowState::Ready;
        info!(shadow = %self.driver.location(), "Created shadow database");
        Ok(())
    }

    /// Run `statements` on the shadow through the migration executor.
    pub async fn apply_migrations<S: AsRef<str> + Sync>(&mut self, statements: &[S]) -> MigrateResult<()> {
        if self.config.skip {
            return Ok(());
        }
        let name = format!("shadow_{:04}", self.applied_migrations.len() + 1);
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| MigrationError::shadow_database("shadow database has not been created"))?;

        MigrationExecutor::new(conn).execute(statements, &name).await?;
        debug!(shadow = %self.driver.location(), batch = %name, "Applied batch to shadow database");
        self.applied_migrations.push(name);
        Ok(())
    }

    /// Introspect the shadow. `None` when shadow operations are skipped.
    pub async fn introspect(&mut self) -> MigrateResult<Option<DatabaseSchema>> {
        if self.config.skip {
            return Ok(None);
        }
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| MigrationError::shadow_database("shadow database has not been created"))?;
        self.introspector.introspect(conn).await.map(Some)
    }

    /// Drop the shadow database. Failures are logged, never returned.
    pub async fn drop(&mut self) {
        if self.config.skip || self.state != ShadowState::Ready {
            return;
        }
        if let Some(conn) = self.conn.take() {
            if let Err(e) = self.driver.close(conn).await {
                warn!(shadow = %self.driver.location(), error = %e, "Failed to close shadow connection");
            }
        }
        match self.driver.drop_database().await {
            Ok(()) => debug!(shadow = %self.driver.location(), "Dropped shadow database"),
            Err(e) => warn!(shadow = %self.driver.location(), error = %e, "Failed to drop shadow database"),
        }
        self.applied_migrations.clear();
        self.state = ShadowState::Dropped;
    }

    /// Check that `forward` turns `current` into `target`.
    pub async fn verify<S: AsRef<str> + Sync>(
        &mut self,
        current: &DatabaseSchema,
        forward: &[S],
        target: &DatabaseSchema,
    ) -> MigrateResult<ShadowVerification> {
        if self.config.skip {
            debug!("Shadow verification skipped");
            return Ok(ShadowVerification::Skipped);
        }

        // A shadow left behind by an earlier run would skew the result.
        if self.state != ShadowState::Ready {
            if let Err(e) = self.driver.drop_database().await {
                debug!(shadow = %self.driver.location(), error = %e, "No leftover shadow removed");
            }
        }

        let outcome = self.verify_inner(current, forward, target).await;
        if self.config.auto_cleanup {
            self.drop().await;
        }

        let verification = outcome?;
        match &verification {
            ShadowVerification::Drift(drift) => {
                warn!(shadow = %self.driver.location(), drift = %drift.summary(), "Shadow database drift detected");
            }
            _ => info!(shadow = %self.driver.location(), "Shadow verification passed"),
        }
        Ok(verification)
    }

    async fn verify_inner<S: AsRef<str> + Sync>(
        &mut self,
        current: &DatabaseSchema,
        forward: &[S],
        target: &DatabaseSchema,
    ) -> MigrateResult<ShadowVerification> {
        let dialect = self.driver.dialect();
        let differ = SchemaDiffer::new(dialect.flavor());

        if self.state != ShadowState::Ready {
            self.create().await?;
        }

        let seed = generator(dialect).create_schema(current)?;
        if !seed.is_empty() {
            self.apply_migrations(&seed).await?;
        }
        if !forward.is_empty() {
            self.apply_migrations(forward).await?;
        }

        let actual = self
            .introspect()
            .await?
            .ok_or_else(|| MigrationError::shadow_database("shadow introspection returned nothing"))?;
        let diff = differ.diff(&actual, target)?;

        if diff.is_empty() {
            Ok(ShadowVerification::Verified)
        } else {
            Ok(ShadowVerification::Drift(SchemaDrift { diff }))
        }
    }
}

impl<D: ShadowDriver> Drop for ShadowDatabase<D> {
    fn drop(&mut self) {
        if self.config.auto_cleanup && self.state == ShadowState::Ready {
            warn!(
                shadow = %self.driver.location(),
                "Shadow database was not explicitly dropped"
            );
        }
    }
}
