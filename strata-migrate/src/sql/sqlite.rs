//! SQLite DDL.
//!
//! SQLite alters tables only by adding, dropping or renaming. The flavor
//! routes every other change through a table rebuild, so the hooks for
//! those changes stay unsupported here.

use super::SqlGenerator;
use crate::error::MigrateResult;
use crate::flavor::Dialect;
use crate::schema::{Column, DatabaseSchema, ForeignKey, Table};

/// SQL generator for SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteGenerator;

impl SqliteGenerator {
    fn autoincrement_key<'t>(table: &'t Table) -> Option<&'t Column> {
        let pk = table.primary_key()?;
        let column = table.column(pk.columns.first()?)?;
        (column.auto_increment && table.is_sole_primary_key(&column.name)).then_some(column)
    }
}

impl SqlGenerator for SqliteGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn quote_char(&self) -> char {
        '"'
    }

    fn inline_primary_key(&self, table: &Table) -> bool {
        Self::autoincrement_key(table).is_some()
    }

    fn column_definition(&self, table: &Table, column: &Column) -> String {
        let name = self.quote_identifier(&column.name);
        if Self::autoincrement_key(table).is_some_and(|c| c.name == column.name) {
            // AUTOINCREMENT is only accepted on an INTEGER PRIMARY KEY.
            return format!("{} INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT", name);
        }

        let mut def = format!("{} {}", name, column.data_type);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default_value {
            def.push_str(&format!(" DEFAULT {}", default));
        }
        def
    }

    // REFERENCES is resolved when rows are written, so tables may name
    // tables created after them.
    fn create_schema(&self, schema: &DatabaseSchema) -> MigrateResult<Vec<String>> {
        Ok(schema
            .tables()
            .iter()
            .flat_map(|table| super::create_with_indexes(self, table))
            .collect())
    }

    fn drop_foreign_key(&self, table: &Table, fk: &ForeignKey) -> MigrateResult<String> {
        super::unsupported(
            self.dialect(),
            format!("dropping foreign key {} on {} outside a rebuild", fk.name, table.name()),
        )
    }

    fn add_foreign_key(&self, table: &Table, fk: &ForeignKey) -> MigrateResult<String> {
        super::unsupported(
            self.dialect(),
            format!("adding foreign key {} on {} outside a rebuild", fk.name, table.name()),
        )
    }
}
