//! Reads a SQLite catalog into a [`DatabaseSchema`].
//!
//! Everything comes from `sqlite_master` and the `table_info`, `index_list`,
//! `index_info` and `foreign_key_list` pragmas. Internal `sqlite_*` tables,
//! the `_migrations` history table and indexes SQLite creates on its own
//! (for inline `UNIQUE` and `PRIMARY KEY`) are left out.

use std::collections::BTreeMap;

use strata_migrate::{
    Column, DatabaseSchema, ForeignKey, Index, MIGRATIONS_TABLE, MigrateResult, PrimaryKey, ReferentialAction,
    SchemaIntrospector, Table,
};
use tracing::debug;

use crate::connection::SqliteConnection;
use crate::error::SqliteError;

#[derive(Debug)]
struct RawColumn {
    name: String,
    data_type: String,
    not_null: bool,
    default_value: Option<String>,
    pk_position: i64,
}

#[derive(Debug)]
struct RawForeignKey {
    id: i64,
    referenced_table: String,
    from: String,
    to: Option<String>,
    on_update: String,
    on_delete: String,
}

#[derive(Debug)]
struct RawTable {
    name: String,
    autoincrement: bool,
    columns: Vec<RawColumn>,
    indexes: Vec<Index>,
    foreign_keys: Vec<RawForeignKey>,
}

fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn read_catalog(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<RawTable>> {
    let mut tables = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT name, COALESCE(sql, '') FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
    )?;
    let entries = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (name, sql) in entries {
        if name.eq_ignore_ascii_case(MIGRATIONS_TABLE) {
            continue;
        }

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quoted(&name)))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(RawColumn {
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                    not_null: row.get(3)?,
                    default_value: row.get(4)?,
                    pk_position: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quoted(&name)))?;
        let listed = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut indexes = Vec::new();
        for (index_name, unique, origin) in listed {
            // "c" is CREATE INDEX; "u" and "pk" are implicit.
            if origin != "c" {
                continue;
            }
            let mut stmt = conn.prepare(&format!("PRAGMA index_info({})", quoted(&index_name)))?;
            let columns = stmt
                .query_map([], |row| row.get::<_, Option<String>>(2))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let columns: Vec<String> = columns.into_iter().flatten().collect();
            indexes.push(if unique {
                Index::unique(index_name, columns)
            } else {
                Index::new(index_name, columns)
            });
        }
        indexes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quoted(&name)))?;
        let foreign_keys = stmt
            .query_map([], |row| {
                Ok(RawForeignKey {
                    id: row.get(0)?,
                    referenced_table: row.get(2)?,
                    from: row.get(3)?,
                    to: row.get(4)?,
                    on_update: row.get(5)?,
                    on_delete: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        tables.push(RawTable {
            name,
            autoincrement: sql.to_ascii_uppercase().contains("AUTOINCREMENT"),
            columns,
            indexes,
            foreign_keys,
        });
    }

    Ok(tables)
}

/// Primary key columns of a raw table, in key order.
fn primary_key_columns(table: &RawTable) -> Vec<String> {
    let mut key: Vec<&RawColumn> = table.columns.iter().filter(|c| c.pk_position > 0).collect();
    key.sort_by_key(|c| c.pk_position);
    key.into_iter().map(|c| c.name.clone()).collect()
}

fn build_table(raw: &RawTable, catalog: &[RawTable]) -> MigrateResult<Table> {
    let key = primary_key_columns(raw);
    let autoincrement_column = (raw.autoincrement && key.len() == 1).then(|| key[0].as_str());

    let mut builder = Table::builder(&raw.name);
    for column in &raw.columns {
        let mut built = Column::new(&column.name, &column.data_type).nullable(!column.not_null);
        if autoincrement_column == Some(column.name.as_str()) {
            built = built.auto_increment();
        }
        if let Some(default) = &column.default_value {
            built = built.default_value(default);
        }
        builder = builder.column(built);
    }

    if !key.is_empty() {
        builder = builder.primary_key(PrimaryKey::new(key));
    }
    for index in &raw.indexes {
        builder = builder.index(index.clone());
    }

    // One constraint spans every row sharing an id.
    let mut grouped: BTreeMap<i64, Vec<&RawForeignKey>> = BTreeMap::new();
    for fk in &raw.foreign_keys {
        grouped.entry(fk.id).or_default().push(fk);
    }
    for parts in grouped.values() {
        let first = parts[0];
        let columns: Vec<String> = parts.iter().map(|p| p.from.clone()).collect();
        let referenced_columns: Vec<String> = if parts.iter().all(|p| p.to.is_some()) {
            parts.iter().filter_map(|p| p.to.clone()).collect()
        } else {
            // REFERENCES t without columns targets t's primary key.
            catalog
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(&first.referenced_table))
                .map(primary_key_columns)
                .unwrap_or_default()
        };

        let name = format!("{}_{}_fkey", raw.name, columns.join("_"));
        let fk = ForeignKey::new(name, columns, &first.referenced_table, referenced_columns)
            .on_delete(first.on_delete.parse().unwrap_or(ReferentialAction::NoAction))
            .on_update(first.on_update.parse().unwrap_or(ReferentialAction::NoAction));
        builder = builder.foreign_key(fk);
    }

    builder.build()
}

/// PRAGMA-based introspection for SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteIntrospector;

impl SqliteIntrospector {
    /// Create an introspector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl SchemaIntrospector<SqliteConnection> for SqliteIntrospector {
    async fn introspect(&self, conn: &mut SqliteConnection) -> MigrateResult<DatabaseSchema> {
        let catalog = conn
            .inner()
            .call(|conn| Ok(read_catalog(conn)?))
            .await
            .map_err(SqliteError::from)?;
        debug!(tables = catalog.len(), "Introspected SQLite catalog");

        let mut builder = DatabaseSchema::builder();
        for raw in &catalog {
            builder = builder.table(build_table(raw, &catalog)?);
        }
        builder.build()
    }
}
