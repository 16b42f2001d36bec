//! Migration engine implementation.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::MigrationConnection;
use crate::diff::{DiffResult, SchemaDiffer};
use crate::error::{MigrateResult, MigrationError};
use crate::executor::{ExecutionReport, MigrationExecutor};
use crate::file::{MigrationFile, MigrationStore, validate_name};
use crate::flavor::Dialect;
use crate::history::{HistoryTracker, MigrationState, script_checksum};
use crate::resolution::{Resolution, ResolutionConfig};
use crate::schema::DatabaseSchema;
use crate::shadow::{ShadowDatabase, ShadowDriver, ShadowVerification};
use crate::sql::{MigrationSql, generator};
use crate::statement::split_statements_for;

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Path to the migrations directory.
    pub migrations_dir: PathBuf,
    /// Path to the resolutions file.
    pub resolutions_file: PathBuf,
    /// Report what would run without running it.
    pub dry_run: bool,
    /// Whether to apply plans with unsafe changes.
    pub allow_data_loss: bool,
    /// Whether to fail on unresolved checksum mismatches.
    pub fail_on_checksum_mismatch: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("./migrations"),
            resolutions_file: PathBuf::from("./migrations/resolutions.toml"),
            dry_run: false,
            allow_data_loss: false,
            fail_on_checksum_mismatch: true,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the resolutions file path.
    pub fn resolutions_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.resolutions_file = path.into();
        self
    }

    /// Enable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Allow data loss operations.
    pub fn allow_data_loss(mut self, allow: bool) -> Self {
        self.allow_data_loss = allow;
        self
    }

    /// Set whether to fail on checksum mismatches.
    pub fn fail_on_checksum_mismatch(mut self, fail: bool) -> Self {
        self.fail_on_checksum_mismatch = fail;
        self
    }
}

/// A generated migration, not yet applied.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Name the migration will be stored and recorded under.
    pub name: String,
    /// Dialect the SQL was generated for.
    pub dialect: Dialect,
    /// The structural changes.
    pub diff: DiffResult,
    /// Forward and rollback SQL.
    pub sql: MigrationSql,
    /// Warnings from the diff and the generator.
    pub warnings: Vec<String>,
}

impl MigrationPlan {
    /// Check if there's anything to migrate.
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }

    /// Whether applying the plan can lose data.
    pub fn is_destructive(&self) -> bool {
        self.diff.is_destructive()
    }

    /// Get a summary of the plan.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} ({} statements, {} warnings)",
            self.name,
            self.diff.summary(),
            self.sql.forward.len(),
            self.warnings.len()
        )
    }
}

/// Result of a migration operation.
#[derive(Debug, Default)]
pub struct MigrationResult {
    /// Names of applied migrations.
    pub applied_migrations: Vec<String>,
    /// Names of skipped migrations.
    pub skipped_migrations: Vec<String>,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
    /// Warnings generated during migration.
    pub warnings: Vec<String>,
}

impl MigrationResult {
    /// Check if any migrations were applied.
    pub fn has_changes(&self) -> bool {
        !self.applied_migrations.is_empty()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.applied_migrations.is_empty() {
            parts.push(format!("{} applied", self.applied_migrations.len()));
        }
        if !self.skipped_migrations.is_empty() {
            parts.push(format!("{} skipped", self.skipped_migrations.len()));
        }

        if parts.is_empty() {
            "No migrations applied".to_string()
        } else {
            format!("{} in {}ms", parts.join(", "), self.duration_ms)
        }
    }
}

/// Where one migration stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Migration name.
    pub name: String,
    /// Current state.
    pub state: MigrationState,
    /// When the last attempt finished.
    pub applied_at: Option<DateTime<Utc>>,
    /// Whether the stored source is still present.
    pub has_source: bool,
    /// Skipped by a resolution.
    pub skipped: bool,
}

/// A checksum mismatch an operator accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumResolution {
    /// Migration name.
    pub name: String,
    /// Checksum in history.
    pub expected: String,
    /// Checksum of the stored source.
    pub actual: String,
    /// Reason for accepting the change.
    pub reason: String,
}

/// A checksum mismatch nobody accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumMismatch {
    /// Migration name.
    pub name: String,
    /// Checksum in history.
    pub expected: String,
    /// Checksum of the stored source.
    pub actual: String,
}

/// Integrity of applied migrations against their stored sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Migrations whose source matches history.
    pub verified: Vec<String>,
    /// Mismatches covered by a resolution.
    pub resolved: Vec<ChecksumResolution>,
    /// Mismatches without a resolution.
    pub unresolved: Vec<ChecksumMismatch>,
    /// Applied migrations whose source is gone.
    pub missing: Vec<String>,
}

impl VerifyReport {
    /// Check if there are blocking issues.
    pub fn has_blocking_issues(&self) -> bool {
        !self.unresolved.is_empty()
    }
}

/// Plans, applies, rolls back and audits migrations.
///
/// The engine owns the migration store and resolutions. Connections are
/// passed per call and used exclusively for its duration.
pub struct MigrationEngine<S: MigrationStore> {
    config: MigrationConfig,
    store: S,
    resolutions: ResolutionConfig,
    cancel: Option<CancellationToken>,
}

impl<S: MigrationStore> MigrationEngine<S> {
    /// Create a new migration engine.
    pub fn new(config: MigrationConfig, store: S) -> Self {
        Self {
            config,
            store,
            resolutions: ResolutionConfig::new(),
            cancel: None,
        }
    }

    /// Use `resolutions` instead of loading them.
    pub fn with_resolutions(mut self, resolutions: ResolutionConfig) -> Self {
        self.resolutions = resolutions;
        self
    }

    /// Stop between statements once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The migration store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load resolutions from the configured file.
    pub async fn load_resolutions(&mut self) -> MigrateResult<()> {
        self.resolutions = ResolutionConfig::load(&self.config.resolutions_file).await?;
        Ok(())
    }

    /// Add a resolution and save.
    pub async fn add_resolution(&mut self, resolution: Resolution) -> MigrateResult<()> {
        self.resolutions.add(resolution);
        self.resolutions.save(&self.config.resolutions_file).await
    }

    /// Get the current resolutions.
    pub fn resolutions(&self) -> &ResolutionConfig {
        &self.resolutions
    }

    fn executor<'c, C: MigrationConnection + ?Sized>(&self, conn: &'c mut C) -> MigrationExecutor<'c, C> {
        let executor = MigrationExecutor::new(conn);
        match &self.cancel {
            Some(token) => executor.with_cancellation(token.clone()),
            None => executor,
        }
    }

    /// Diff `current` against `target` and generate the SQL.
    pub fn plan(
        &self,
        dialect: Dialect,
        current: &DatabaseSchema,
        target: &DatabaseSchema,
        name: impl Into<String>,
    ) -> MigrateResult<MigrationPlan> {
        let name = name.into();
        validate_name(&name)?;

        let diff = SchemaDiffer::new(dialect.flavor()).diff(current, target)?;
        let sql = generator(dialect).generate(&diff)?;

        let mut warnings: Vec<String> = diff.warnings().into_iter().map(String::from).collect();
        warnings.extend(sql.warnings.iter().cloned());
        if diff.is_destructive() && !self.config.allow_data_loss {
            warnings.push(format!(
                "{} contains changes that can lose data. Set allow_data_loss=true to apply it.",
                name
            ));
        }

        let plan = MigrationPlan {
            name,
            dialect,
            diff,
            sql,
            warnings,
        };
        info!(plan = %plan.summary(), "Planned migration");
        Ok(plan)
    }

    /// Check a plan's forward SQL on a shadow database.
    pub async fn verify_plan<D: ShadowDriver>(
        &self,
        plan: &MigrationPlan,
        current: &DatabaseSchema,
        target: &DatabaseSchema,
        shadow: &mut ShadowDatabase<D>,
    ) -> MigrateResult<ShadowVerification> {
        if shadow.config().skip || plan.is_empty() {
            return Ok(ShadowVerification::Skipped);
        }
        shadow.verify(current, &plan.sql.forward, target).await
    }

    /// Store a plan's scripts and apply it.
    pub async fn apply<C: MigrationConnection + ?Sized>(
        &self,
        conn: &mut C,
        plan: &MigrationPlan,
    ) -> MigrateResult<MigrationResult> {
        let mut result = MigrationResult {
            warnings: plan.warnings.clone(),
            ..Default::default()
        };
        if plan.is_empty() {
            return Ok(result);
        }
        if conn.dialect() != plan.dialect {
            return Err(MigrationError::config(format!(
                "plan {} targets {} but the connection speaks {}",
                plan.name,
                plan.dialect,
                conn.dialect()
            )));
        }
        if plan.is_destructive() && !self.config.allow_data_loss {
            let unsafe_changes: Vec<String> = plan
                .diff
                .tables_to_drop()
                .iter()
                .map(|t| format!("drop table {}", t.name()))
                .chain(plan.diff.enums_to_drop().iter().map(|e| format!("drop enum {}", e.name)))
                .chain(
                    plan.diff
                        .sequences_to_drop()
                        .iter()
                        .map(|s| format!("drop sequence {}", s.name)),
                )
                .chain(plan.diff.unsafe_changes().map(ToString::to_string))
                .collect();
            return Err(MigrationError::data_loss(unsafe_changes.join("; ")));
        }
        if self.config.dry_run {
            result.warnings.push(format!("[DRY RUN] Would apply: {}", plan.name));
            return Ok(result);
        }

        self.store.save(&MigrationFile::new(&plan.name, &plan.sql)).await?;

        let report = self.executor(conn).execute(&plan.sql.forward, &plan.name).await?;
        result.applied_migrations.push(report.migration_name);
        result.duration_ms = i64::try_from(report.duration.as_millis()).unwrap_or(i64::MAX);
        Ok(result)
    }

    /// Apply every stored migration that has not run yet, in order.
    pub async fn migrate<C: MigrationConnection + ?Sized>(&self, conn: &mut C) -> MigrateResult<MigrationResult> {
        let start = Instant::now();
        let mut result = MigrationResult::default();

        HistoryTracker::new(&mut *conn).ensure_table().await?;
        let records = HistoryTracker::new(&mut *conn).records().await?;

        for name in self.store.list().await? {
            if self.resolutions.should_skip(&name) {
                result.skipped_migrations.push(name);
                continue;
            }

            let source = self
                .store
                .load_up(&name)
                .await?
                .ok_or_else(|| MigrationError::NotFound(name.clone()))?;

            match records.iter().find(|r| r.migration_name == name) {
                Some(record) if record.state() == MigrationState::Applied => {
                    let actual = script_checksum(conn.dialect(), &source);
                    if record.checksum != actual
                        && !self.resolutions.accepts_checksum(&name, &record.checksum, &actual)
                    {
                        if self.config.fail_on_checksum_mismatch {
                            return Err(MigrationError::ChecksumMismatch {
                                name,
                                expected: record.checksum.clone(),
                                actual,
                            });
                        }
                        result
                            .warnings
                            .push(format!("Migration '{}' has been modified since it was applied", name));
                    }
                    continue;
                }
                Some(record) if record.state() == MigrationState::RolledBack => continue,
                _ => {}
            }

            if self.config.dry_run {
                result.warnings.push(format!("[DRY RUN] Would apply: {}", name));
                continue;
            }

            let statements = split_statements_for(conn.dialect(), &source);
            self.executor(&mut *conn).execute(&statements, &name).await?;
            result.applied_migrations.push(name);
        }

        result.duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
        info!(result = %result.summary(), "Migration run finished");
        Ok(result)
    }

    /// Roll back migration `name`.
    pub async fn rollback<C: MigrationConnection + ?Sized>(
        &self,
        conn: &mut C,
        name: &str,
    ) -> MigrateResult<ExecutionReport> {
        self.executor(conn).rollback(name, &self.store).await
    }

    /// Roll back the most recently applied migration.
    pub async fn rollback_last<C: MigrationConnection + ?Sized>(&self, conn: &mut C) -> MigrateResult<ExecutionReport> {
        HistoryTracker::new(&mut *conn).ensure_table().await?;
        let last = HistoryTracker::new(&mut *conn)
            .applied()
            .await?
            .pop()
            .ok_or_else(|| MigrationError::RollbackFailed("no applied migrations".to_string()))?;
        self.rollback(conn, &last).await
    }

    /// Stored migrations that still need to run.
    pub async fn pending<C: MigrationConnection + ?Sized>(&self, conn: &mut C) -> MigrateResult<Vec<String>> {
        let known: Vec<String> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|name| !self.resolutions.should_skip(name))
            .collect();
        let mut tracker = HistoryTracker::new(conn);
        tracker.ensure_table().await?;
        tracker.get_pending(&known).await
    }

    /// State of every stored or recorded migration.
    pub async fn status<C: MigrationConnection + ?Sized>(&self, conn: &mut C) -> MigrateResult<Vec<MigrationStatus>> {
        let mut tracker = HistoryTracker::new(conn);
        tracker.ensure_table().await?;
        let records = tracker.records().await?;
        let stored = self.store.list().await?;

        let mut statuses: Vec<MigrationStatus> = stored
            .iter()
            .map(|name| {
                let record = records.iter().find(|r| &r.migration_name == name);
                MigrationStatus {
                    name: name.clone(),
                    state: record.map_or(MigrationState::Pending, |r| r.state()),
                    applied_at: record.map(|r| r.applied_at),
                    has_source: true,
                    skipped: self.resolutions.should_skip(name),
                }
            })
            .collect();

        for record in records.iter().filter(|r| !stored.contains(&r.migration_name)) {
            statuses.push(MigrationStatus {
                name: record.migration_name.clone(),
                state: record.state(),
                applied_at: Some(record.applied_at),
                has_source: false,
                skipped: self.resolutions.should_skip(&record.migration_name),
            });
        }
        Ok(statuses)
    }

    /// Compare the stored source of `name` with its recorded checksum.
    ///
    /// A mismatch passes only when a resolution accepts that exact change.
    pub async fn validate_checksum<C: MigrationConnection + ?Sized>(&self, conn: &mut C, name: &str) -> MigrateResult<()> {
        let source = self
            .store
            .load_up(name)
            .await?
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))?;

        match HistoryTracker::new(conn).validate_checksum(name, &source).await {
            Err(MigrationError::ChecksumMismatch {
                name,
                expected,
                actual,
            }) if self.resolutions.accepts_checksum(&name, &expected, &actual) => {
                info!(migration = %name, "Checksum change accepted by resolution");
                Ok(())
            }
            other => other,
        }
    }

    /// Check every applied migration against its stored source.
    pub async fn verify<C: MigrationConnection + ?Sized>(&self, conn: &mut C) -> MigrateResult<VerifyReport> {
        let dialect = conn.dialect();
        let mut tracker = HistoryTracker::new(conn);
        tracker.ensure_table().await?;
        let mut report = VerifyReport::default();

        for record in tracker.records().await?.into_iter().filter(|r| r.is_applied()) {
            let name = record.migration_name;
            let Some(source) = self.store.load_up(&name).await? else {
                warn!(migration = %name, "Applied migration has no stored source");
                report.missing.push(name);
                continue;
            };

            let actual = script_checksum(dialect, &source);
            if actual == record.checksum {
                report.verified.push(name);
            } else if self.resolutions.accepts_checksum(&name, &record.checksum, &actual) {
                let reason = self
                    .resolutions
                    .get(&name)
                    .map(|r| r.reason.clone())
                    .unwrap_or_default();
                report.resolved.push(ChecksumResolution {
                    name,
                    expected: record.checksum,
                    actual,
                    reason,
                });
            } else {
                warn!(migration = %name, "Applied migration was modified");
                report.unresolved.push(ChecksumMismatch {
                    name,
                    expected: record.checksum,
                    actual,
                });
            }
        }
        Ok(report)
    }
}
