//! MySQL DDL.

use super::{SqlGenerator, unsupported};
use crate::error::MigrateResult;
use crate::flavor::Dialect;
use crate::schema::{Column, ForeignKey, Index, PrimaryKey, Table};

/// SQL generator for MySQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlGenerator;

impl SqlGenerator for MySqlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn column_definition(&self, _table: &Table, column: &Column) -> String {
        let mut def = format!("{} {}", self.quote_identifier(&column.name), column.data_type);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if column.auto_increment {
            def.push_str(" AUTO_INCREMENT");
        } else if let Some(default) = &column.default_value {
            def.push_str(&format!(" DEFAULT {}", default));
        }
        def
    }

    fn alter_column(&self, table: &Table, _previous: &Column, next: &Column) -> MigrateResult<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} MODIFY COLUMN {};",
            self.table_name(table),
            self.column_definition(table, next)
        )])
    }

    fn drop_index(&self, table: &Table, index: &Index) -> String {
        format!(
            "DROP INDEX {} ON {};",
            self.quote_identifier(&index.name),
            self.table_name(table)
        )
    }

    fn rename_index(&self, table: &Table, previous: &Index, next: &Index) -> MigrateResult<String> {
        Ok(format!(
            "ALTER TABLE {} RENAME INDEX {} TO {};",
            self.table_name(table),
            self.quote_identifier(&previous.name),
            self.quote_identifier(&next.name)
        ))
    }

    fn drop_foreign_key(&self, table: &Table, fk: &ForeignKey) -> MigrateResult<String> {
        Ok(format!(
            "ALTER TABLE {} DROP FOREIGN KEY {};",
            self.table_name(table),
            self.quote_identifier(&fk.name)
        ))
    }

    fn rename_foreign_key(&self, table: &Table, previous: &ForeignKey, _next: &ForeignKey) -> MigrateResult<String> {
        unsupported(
            self.dialect(),
            format!(
                "foreign key {} on {} cannot be renamed in place",
                previous.name,
                table.name()
            ),
        )
    }

    fn alter_primary_key(
        &self,
        table: &Table,
        previous: Option<&PrimaryKey>,
        next: Option<&PrimaryKey>,
    ) -> MigrateResult<Vec<String>> {
        let mut parts = Vec::new();
        if previous.is_some() {
            parts.push("DROP PRIMARY KEY".to_string());
        }
        if let Some(pk) = next {
            parts.push(format!("ADD PRIMARY KEY ({})", self.column_list(&pk.columns)));
        }
        if parts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![format!(
            "ALTER TABLE {} {};",
            self.table_name(table),
            parts.join(", ")
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::flavor::MySqlFlavor;
    use crate::schema::DatabaseSchema;
    use pretty_assertions::assert_eq;

    fn orders(extra_index: Option<Index>, status_type: &str) -> DatabaseSchema {
        let mut builder = Table::builder("orders")
            .column(Column::new("id", "BIGINT").auto_increment())
            .column(Column::new("status", status_type).not_null())
            .primary_key(PrimaryKey::new(["id"]));
        if let Some(index) = extra_index {
            builder = builder.index(index);
        }
        DatabaseSchema::builder().table(builder.build().unwrap()).build().unwrap()
    }

    #[test]
    fn test_create_table_uses_backticks_when_needed() {
        let t = Table::builder("order")
            .column(Column::new("id", "INT").auto_increment())
            .primary_key(PrimaryKey::new(["id"]))
            .build()
            .unwrap();
        assert_eq!(
            MySqlGenerator.create_table(&t),
            "CREATE TABLE `order` (\n    id INT NOT NULL AUTO_INCREMENT,\n    PRIMARY KEY (id)\n);"
        );
    }

    #[test]
    fn test_modify_column_round_trip() {
        let current = orders(None, "VARCHAR(20)");
        let target = orders(None, "VARCHAR(64)");
        let d = diff(&current, &target, &MySqlFlavor).unwrap();
        let sql = MySqlGenerator.generate(&d).unwrap();

        assert_eq!(sql.forward, vec!["ALTER TABLE orders MODIFY COLUMN status VARCHAR(64) NOT NULL;"]);
        assert_eq!(sql.rollback, vec!["ALTER TABLE orders MODIFY COLUMN status VARCHAR(20) NOT NULL;"]);
    }

    #[test]
    fn test_index_statements() {
        let current = orders(None, "VARCHAR(20)");
        let target = orders(Some(Index::new("orders_status_idx", ["status"])), "VARCHAR(20)");
        let d = diff(&current, &target, &MySqlFlavor).unwrap();
        let sql = MySqlGenerator.generate(&d).unwrap();

        assert_eq!(sql.forward, vec!["CREATE INDEX orders_status_idx ON orders(status);"]);
        assert_eq!(sql.rollback, vec!["DROP INDEX orders_status_idx ON orders;"]);
    }

    #[test]
    fn test_primary_key_swap_is_one_statement() {
        let t = Table::builder("orders")
            .column(Column::new("id", "BIGINT").not_null())
            .column(Column::new("code", "CHAR(8)").not_null())
            .build()
            .unwrap();
        let statements = MySqlGenerator
            .alter_primary_key(&t, Some(&PrimaryKey::new(["id"])), Some(&PrimaryKey::new(["code"])))
            .unwrap();
        assert_eq!(statements, vec!["ALTER TABLE orders DROP PRIMARY KEY, ADD PRIMARY KEY (code);"]);
    }

    #[test]
    fn test_foreign_key_rename_is_unsupported() {
        let t = Table::builder("orders")
            .column(Column::new("user_id", "BIGINT"))
            .build()
            .unwrap();
        let fk = ForeignKey::new("a", ["user_id"], "users", ["id"]);
        let renamed = ForeignKey::new("b", ["user_id"], "users", ["id"]);
        assert!(MySqlGenerator.rename_foreign_key(&t, &fk, &renamed).is_err());
        assert_eq!(
            MySqlGenerator.drop_foreign_key(&t, &fk).unwrap(),
            "ALTER TABLE orders DROP FOREIGN KEY a;"
        );
    }
}
