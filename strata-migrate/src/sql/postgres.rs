//! PostgreSQL DDL.

use super::{SqlGenerator, quote_literal};
use crate::error::MigrateResult;
use crate::flavor::{Dialect, Flavor, PostgresFlavor};
use crate::schema::{Column, EnumType, ForeignKey, Index, PrimaryKey, Sequence, Table};

/// SQL generator for PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresGenerator;

impl PostgresGenerator {
    fn column_type(column: &Column) -> String {
        if !column.auto_increment {
            return column.data_type.clone();
        }
        match PostgresFlavor.normalize_type(&column.data_type).as_str() {
            "BIGINT" => "BIGSERIAL".to_string(),
            "SMALLINT" => "SMALLSERIAL".to_string(),
            _ => "SERIAL".to_string(),
        }
    }

    fn primary_key_name(table: &Table, pk: &PrimaryKey) -> String {
        pk.name
            .clone()
            .unwrap_or_else(|| format!("{}_pkey", table.name()))
    }
}

impl SqlGenerator for PostgresGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn quote_char(&self) -> char {
        '"'
    }

    // Unquoted identifiers fold to lower case.
    fn is_plain_identifier(&self, name: &str) -> bool {
        let mut chars = name.chars();
        matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_lowercase())
            && chars.all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit())
    }

    fn column_definition(&self, _table: &Table, column: &Column) -> String {
        let mut def = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            Self::column_type(column)
        );
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if !column.auto_increment {
            if let Some(default) = &column.default_value {
                def.push_str(&format!(" DEFAULT {}", default));
            }
        }
        def
    }

    fn alter_column(&self, table: &Table, previous: &Column, next: &Column) -> MigrateResult<Vec<String>> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.table_name(table),
            self.quote_identifier(&next.name)
        );
        let mut statements = Vec::new();

        if PostgresFlavor.column_type_change(previous, next).is_some() {
            statements.push(format!(
                "{prefix} TYPE {ty} USING {col}::{ty};",
                ty = next.data_type,
                col = self.quote_identifier(&next.name)
            ));
        }
        if previous.nullable != next.nullable {
            let action = if next.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
            statements.push(format!("{prefix} {action};"));
        }
        if !previous.auto_increment
            && !next.auto_increment
            && !PostgresFlavor.defaults_match(previous.default_value.as_deref(), next.default_value.as_deref())
        {
            statements.push(match &next.default_value {
                Some(default) => format!("{prefix} SET DEFAULT {default};"),
                None => format!("{prefix} DROP DEFAULT;"),
            });
        }
        Ok(statements)
    }

    fn rename_index(&self, table: &Table, previous: &Index, next: &Index) -> MigrateResult<String> {
        Ok(format!(
            "ALTER INDEX {} RENAME TO {};",
            self.qualified(table.schema(), &previous.name),
            self.quote_identifier(&next.name)
        ))
    }

    fn rename_foreign_key(&self, table: &Table, previous: &ForeignKey, next: &ForeignKey) -> MigrateResult<String> {
        Ok(format!(
            "ALTER TABLE {} RENAME CONSTRAINT {} TO {};",
            self.table_name(table),
            self.quote_identifier(&previous.name),
            self.quote_identifier(&next.name)
        ))
    }

    fn alter_primary_key(
        &self,
        table: &Table,
        previous: Option<&PrimaryKey>,
        next: Option<&PrimaryKey>,
    ) -> MigrateResult<Vec<String>> {
        let name = self.table_name(table);
        let mut statements = Vec::new();
        if let Some(pk) = previous {
            statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT {};",
                name,
                self.quote_identifier(&Self::primary_key_name(table, pk))
            ));
        }
        if let Some(pk) = next {
            statements.push(format!("ALTER TABLE {} ADD {};", name, self.primary_key_clause(pk)));
        }
        Ok(statements)
    }

    fn create_enum(&self, enum_type: &EnumType) -> MigrateResult<String> {
        let values: Vec<String> = enum_type.values.iter().map(|v| quote_literal(v)).collect();
        Ok(format!(
            "CREATE TYPE {} AS ENUM ({});",
            self.quote_identifier(&enum_type.name),
            values.join(", ")
        ))
    }

    fn drop_enum(&self, enum_type: &EnumType) -> MigrateResult<String> {
        Ok(format!("DROP TYPE {};", self.quote_identifier(&enum_type.name)))
    }

    fn add_enum_value(&self, enum_type: &EnumType, value: &str) -> MigrateResult<String> {
        Ok(format!(
            "ALTER TYPE {} ADD VALUE {};",
            self.quote_identifier(&enum_type.name),
            quote_literal(value)
        ))
    }

    fn create_sequence(&self, sequence: &Sequence) -> MigrateResult<String> {
        Ok(format!(
            "CREATE SEQUENCE {} START WITH {} INCREMENT BY {};",
            self.quote_identifier(&sequence.name),
            sequence.start,
            sequence.increment
        ))
    }

    fn drop_sequence(&self, sequence: &Sequence) -> MigrateResult<String> {
        Ok(format!("DROP SEQUENCE {};", self.quote_identifier(&sequence.name)))
    }

    fn alter_sequence(&self, _previous: &Sequence, next: &Sequence) -> MigrateResult<String> {
        Ok(format!(
            "ALTER SEQUENCE {} INCREMENT BY {} START WITH {};",
            self.quote_identifier(&next.name),
            next.increment,
            next.start
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::schema::{DatabaseSchema, ReferentialAction};
    use pretty_assertions::assert_eq;

    fn table(columns: Vec<Column>) -> Table {
        let mut builder = Table::builder("accounts");
        for column in columns {
            builder = builder.column(column);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_create_table() {
        let users = Table::builder("users")
            .column(Column::new("id", "BIGINT").auto_increment())
            .column(Column::new("email", "VARCHAR(255)").not_null())
            .column(Column::new("active", "BOOLEAN").default_value("true"))
            .primary_key(PrimaryKey::new(["id"]))
            .build()
            .unwrap();

        assert_eq!(
            PostgresGenerator.create_table(&users),
            "CREATE TABLE users (\n    id BIGSERIAL NOT NULL,\n    email VARCHAR(255) NOT NULL,\n    active BOOLEAN DEFAULT true,\n    PRIMARY KEY (id)\n);"
        );
    }

    #[test]
    fn test_foreign_key_clause() {
        let posts = Table::builder("posts")
            .column(Column::new("author_id", "INTEGER"))
            .foreign_key(
                ForeignKey::new("posts_author_fkey", ["author_id"], "users", ["id"])
                    .on_delete(ReferentialAction::Cascade),
            )
            .build()
            .unwrap();

        let sql = PostgresGenerator
            .add_foreign_key(&posts, &posts.foreign_keys()[0])
            .unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE posts ADD CONSTRAINT posts_author_fkey FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE;"
        );
    }

    #[test]
    fn test_alter_column_statements() {
        let previous = Column::new("balance", "INTEGER");
        let next = Column::new("balance", "BIGINT").not_null().default_value("0");
        let t = table(vec![next.clone()]);

        let statements = PostgresGenerator.alter_column(&t, &previous, &next).unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE accounts ALTER COLUMN balance TYPE BIGINT USING balance::BIGINT;",
                "ALTER TABLE accounts ALTER COLUMN balance SET NOT NULL;",
                "ALTER TABLE accounts ALTER COLUMN balance SET DEFAULT 0;",
            ]
        );

        let back = PostgresGenerator.alter_column(&t, &next, &previous).unwrap();
        assert_eq!(back[1], "ALTER TABLE accounts ALTER COLUMN balance DROP NOT NULL;");
        assert_eq!(back[2], "ALTER TABLE accounts ALTER COLUMN balance DROP DEFAULT;");
    }

    #[test]
    fn test_primary_key_replacement() {
        let current = DatabaseSchema::builder()
            .table(
                Table::builder("tags")
                    .column(Column::new("id", "INTEGER").not_null())
                    .column(Column::new("slug", "TEXT").not_null())
                    .primary_key(PrimaryKey::new(["id"]))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let target = DatabaseSchema::builder()
            .table(
                Table::builder("tags")
                    .column(Column::new("id", "INTEGER").not_null())
                    .column(Column::new("slug", "TEXT").not_null())
                    .primary_key(PrimaryKey::new(["slug"]))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        let sql = PostgresGenerator.generate(&d).unwrap();
        assert_eq!(
            sql.forward,
            vec![
                "ALTER TABLE tags DROP CONSTRAINT tags_pkey;",
                "ALTER TABLE tags ADD PRIMARY KEY (slug);",
            ]
        );
        assert_eq!(
            sql.rollback,
            vec![
                "ALTER TABLE tags DROP CONSTRAINT tags_pkey;",
                "ALTER TABLE tags ADD PRIMARY KEY (id);",
            ]
        );
    }

    #[test]
    fn test_index_rename() {
        let t = table(vec![Column::new("email", "TEXT")]);
        let sql = PostgresGenerator
            .rename_index(
                &t,
                &Index::new("accounts_email", ["email"]),
                &Index::new("accounts_email_idx", ["email"]),
            )
            .unwrap();
        assert_eq!(sql, "ALTER INDEX accounts_email RENAME TO accounts_email_idx;");
    }

    #[test]
    fn test_enums_and_sequences() {
        let mood = EnumType::new("mood", ["happy", "it's fine"]);
        assert_eq!(
            PostgresGenerator.create_enum(&mood).unwrap(),
            "CREATE TYPE mood AS ENUM ('happy', 'it''s fine');"
        );
        assert_eq!(
            PostgresGenerator.add_enum_value(&mood, "sad").unwrap(),
            "ALTER TYPE mood ADD VALUE 'sad';"
        );

        let seq = Sequence::new("order_numbers").start(1000).increment(5);
        assert_eq!(
            PostgresGenerator.create_sequence(&seq).unwrap(),
            "CREATE SEQUENCE order_numbers START WITH 1000 INCREMENT BY 5;"
        );
    }

    #[test]
    fn test_enum_extension_has_no_rollback() {
        let current = DatabaseSchema::builder()
            .enum_type(EnumType::new("mood", ["happy"]))
            .build()
            .unwrap();
        let target = DatabaseSchema::builder()
            .enum_type(EnumType::new("mood", ["happy", "sad"]))
            .build()
            .unwrap();

        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        let sql = PostgresGenerator.generate(&d).unwrap();
        assert_eq!(sql.forward, vec!["ALTER TYPE mood ADD VALUE 'sad';"]);
        assert!(sql.rollback.is_empty());
        assert_eq!(sql.warnings.len(), 1);
    }

    #[test]
    fn test_schema_qualified_names() {
        let t = Table::builder("events")
            .schema("audit")
            .column(Column::new("id", "INTEGER"))
            .index(Index::new("events_id_idx", ["id"]))
            .build()
            .unwrap();
        assert_eq!(PostgresGenerator.drop_table(&t), "DROP TABLE audit.events;");
        assert_eq!(
            PostgresGenerator.drop_index(&t, &t.indexes()[0]),
            "DROP INDEX audit.events_id_idx;"
        );
    }
}
