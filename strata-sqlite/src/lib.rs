//! # strata-sqlite
//!
//! SQLite driver for strata migrations, built on `tokio-rusqlite`.
//!
//! Provides:
//! - [`SqliteConnection`], a [`MigrationConnection`](strata_migrate::MigrationConnection)
//!   with foreign keys enabled and history stored in `_migrations`
//! - [`SqliteIntrospector`], which reads the catalog back into a schema
//! - [`SqliteShadowDriver`], which keeps shadow databases in sibling files
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_migrate::{MigrationConfig, MigrationEngine, MigrationFileManager};
//! use strata_sqlite::{SqliteConnection, SqliteIntrospector};
//!
//! let mut conn = SqliteConnection::open("app.db").await?;
//! let current = SqliteIntrospector::new().introspect(&mut conn).await?;
//!
//! let engine = MigrationEngine::new(MigrationConfig::new(), MigrationFileManager::new("./migrations"));
//! let plan = engine.plan(Dialect::Sqlite, &current, &target, "20240101000000_init")?;
//! engine.apply(&mut conn, &plan).await?;
//! ```

pub mod connection;
pub mod error;
pub mod introspect;
pub mod shadow;

pub use connection::SqliteConnection;
pub use error::{SqliteError, SqliteResult};
pub use introspect::SqliteIntrospector;
pub use shadow::{SqliteShadowDriver, shadow_path};
