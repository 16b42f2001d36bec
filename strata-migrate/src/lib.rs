//! # strata-migrate
//!
//! Schema migration engine for PostgreSQL, MySQL and SQLite.
//!
//! This crate provides functionality for:
//! - Diffing two schema snapshots with dialect-aware equivalence rules
//! - Generating forward and rollback SQL per dialect
//! - Verifying generated SQL against a disposable shadow database
//! - Applying migrations statement by statement, transactionally where possible
//! - Tracking applied, failed and rolled-back migrations in a `_migrations` table
//! - **Resolutions** for accepting edited migrations or skipping them
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────┐
//! │ Schema pair  │────▶│ Schema Differ  │────▶│ SQL Gen     │
//! └──────────────┘     └────────────────┘     └─────────────┘
//!                              │                     │
//!                              ▼                     ▼
//!                      ┌────────────────┐     ┌─────────────┐
//!                      │ Shadow verify  │     │ Executor    │
//!                      └────────────────┘     └─────────────┘
//!                                                    │
//!                                                    ▼
//!                                            ┌─────────────┐
//!                                            │ _migrations │
//!                                            └─────────────┘
//! ```
//!
//! Each dialect has a [`Flavor`](flavor::Flavor) that decides what counts as
//! a change (type aliases, index and foreign key renames, table rebuilds) and
//! a [`SqlGenerator`](sql::SqlGenerator) that renders changes as SQL.
//! Database drivers live in the `strata-postgres`, `strata-mysql` and
//! `strata-sqlite` crates and implement [`MigrationConnection`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_migrate::{Dialect, MigrationConfig, MigrationEngine, MigrationFileManager};
//!
//! let config = MigrationConfig::new().migrations_dir("./migrations");
//! let store = MigrationFileManager::new(&config.migrations_dir);
//! let engine = MigrationEngine::new(config, store);
//!
//! let plan = engine.plan(Dialect::Postgres, &current, &target, "20240101000000_init")?;
//! println!("Plan: {}", plan.summary());
//!
//! let result = engine.apply(&mut conn, &plan).await?;
//! println!("{}", result.summary());
//! ```
//!
//! ## Migration Files
//!
//! ```text
//! migrations/
//! ├── 20231215120000_create_users/
//! │   ├── up.sql
//! │   └── down.sql
//! └── resolutions.toml
//! ```

pub mod config;
pub mod connection;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod file;
pub mod flavor;
pub mod history;
pub mod logging;
pub mod resolution;
pub mod schema;
pub mod shadow;
pub mod sql;
pub mod statement;

// Re-exports
pub use config::StrataConfig;
pub use connection::{MigrationConnection, SchemaIntrospector};
pub use diff::{Change, ChangeKind, DiffResult, SchemaDiffer, diff};
pub use engine::{
    ChecksumMismatch, ChecksumResolution, MigrationConfig, MigrationEngine, MigrationPlan, MigrationResult,
    MigrationStatus, VerifyReport,
};
pub use error::{MigrateResult, MigrationError};
pub use executor::{ExecutionReport, MigrationExecutor};
pub use file::{MemoryStore, MigrationFile, MigrationFileManager, MigrationStore, timestamped_name};
pub use flavor::{Dialect, Flavor};
pub use history::{
    HistoryEntry, HistorySql, HistoryTracker, MIGRATIONS_TABLE, MigrationRecord, MigrationState, checksum,
};
pub use resolution::{Resolution, ResolutionAction, ResolutionConfig};
pub use schema::{
    Column, DatabaseSchema, EnumType, ForeignKey, Index, PrimaryKey, ReferentialAction, SchemaItem, Sequence, Table,
};
pub use shadow::{SchemaDrift, ShadowConfig, ShadowDatabase, ShadowDriver, ShadowState, ShadowVerification};
pub use sql::{MigrationSql, SqlGenerator, generator};
pub use statement::{split_statements, split_statements_for};
