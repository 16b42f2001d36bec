//! # strata
//!
//! Flavor-aware schema migrations for PostgreSQL, MySQL and SQLite.
//!
//! strata compares the schema a database has with the schema it should have,
//! generates forward and rollback SQL for the database's dialect, optionally
//! proves that SQL on a throwaway shadow database, and applies it while
//! recording every attempt in a `_migrations` table.
//!
//! Drivers are enabled with features:
//!
//! | Feature    | Driver                     |
//! |------------|----------------------------|
//! | `sqlite`   | `sqlite` (default)         |
//! | `postgres` | `postgres`                 |
//! | `mysql`    | `mysql`                    |
//! | `logging`  | installs a tracing subscriber from `STRATA_*` variables |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata::prelude::*;
//! use strata::sqlite::{SqliteConnection, SqliteIntrospector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), strata::MigrationError> {
//!     let config = StrataConfig::from_file("strata.toml")?;
//!     let mut conn = SqliteConnection::open("app.db").await?;
//!
//!     let current = SqliteIntrospector::new().introspect(&mut conn).await?;
//!     let engine = MigrationEngine::new(
//!         config.migration_config(),
//!         MigrationFileManager::new(&config.migrations.directory),
//!     );
//!
//!     let plan = engine.plan(Dialect::Sqlite, &current, &target_schema(), timestamped_name("init"))?;
//!     for warning in &plan.warnings {
//!         eprintln!("warning: {}", warning);
//!     }
//!     engine.apply(&mut conn, &plan).await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use strata_migrate as migrate;
pub use strata_migrate::*;

/// SQLite driver.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use strata_sqlite::*;
}

/// PostgreSQL driver.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use strata_postgres::*;
}

/// MySQL driver.
#[cfg(feature = "mysql")]
#[cfg_attr(docsrs, doc(cfg(feature = "mysql")))]
pub mod mysql {
    pub use strata_mysql::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use strata_migrate::{
        Column, DatabaseSchema, Dialect, ForeignKey, Index, MigrateResult, MigrationConfig, MigrationConnection,
        MigrationEngine, MigrationError, MigrationFileManager, MigrationStore, PrimaryKey, ReferentialAction,
        SchemaIntrospector, ShadowConfig, ShadowDatabase, StrataConfig, Table, timestamped_name,
    };
}
