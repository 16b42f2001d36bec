//! SQL generation for migrations.
//!
//! A [`SqlGenerator`] renders a [`DiffResult`] into forward statements and the
//! rollback statements that undo them. Generation works in steps: each step
//! holds its forward statements and the statements that invert exactly that
//! step. The forward script is every step in order; the rollback script is
//! every step's inverse, last step first.

mod mysql;
mod postgres;
mod sqlite;

use crate::diff::{ChangeDetail, DiffResult, TableAlter};
use crate::error::{MigrateResult, MigrationError};
use crate::flavor::Dialect;
use crate::schema::{
    Column, DatabaseSchema, EnumType, ForeignKey, Index, PrimaryKey, ReferentialAction, Sequence, Table,
};

pub use mysql::MySqlGenerator;
pub use postgres::PostgresGenerator;
pub use sqlite::SqliteGenerator;

/// Prefix of the temporary table used while rebuilding a table.
pub const REBUILD_PREFIX: &str = "_strata_new_";

/// Generated SQL for a migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSql {
    /// Statements that apply the migration.
    pub forward: Vec<String>,
    /// Statements that undo it, already in execution order.
    pub rollback: Vec<String>,
    /// Caveats about the generated SQL, e.g. steps that cannot be undone.
    pub warnings: Vec<String>,
}

impl MigrationSql {
    /// Check if there is anything to apply.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Forward statements as a script.
    pub fn forward_script(&self) -> String {
        render_script(&self.forward)
    }

    /// Rollback statements as a script.
    pub fn rollback_script(&self) -> String {
        render_script(&self.rollback)
    }
}

fn render_script(statements: &[String]) -> String {
    if statements.is_empty() {
        return String::new();
    }
    let mut script = statements.join("\n\n");
    script.push('\n');
    script
}

/// The generator for a dialect.
pub fn generator(dialect: Dialect) -> &'static dyn SqlGenerator {
    match dialect {
        Dialect::Postgres => &PostgresGenerator,
        Dialect::MySql => &MySqlGenerator,
        Dialect::Sqlite => &SqliteGenerator,
    }
}

/// Words that must be quoted when used as identifiers.
const RESERVED_WORDS: &[&str] = &[
    "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CHECK", "COLUMN",
    "CONSTRAINT", "CREATE", "CROSS", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP",
    "CURRENT_USER", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "END", "EXISTS",
    "FALSE", "FOR", "FOREIGN", "FROM", "FULL", "GRANT", "GROUP", "HAVING", "IN", "INDEX",
    "INNER", "INSERT", "INTO", "IS", "JOIN", "KEY", "LEFT", "LIKE", "LIMIT", "NOT", "NULL",
    "OFFSET", "ON", "OR", "ORDER", "OUTER", "PRIMARY", "REFERENCES", "RIGHT", "SELECT",
    "SESSION_USER", "SET", "TABLE", "THEN", "TO", "TRUE", "UNION", "UNIQUE", "UPDATE", "USER",
    "USING", "VALUES", "WHEN", "WHERE", "WITH",
];

/// Whether a word is reserved in any supported dialect.
pub fn is_reserved_word(word: &str) -> bool {
    RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(word))
}

pub(crate) fn unsupported<T>(dialect: Dialect, what: impl Into<String>) -> MigrateResult<T> {
    Err(MigrationError::unsupported(dialect.name(), what))
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Per-dialect DDL rendering.
///
/// Statement templates that every dialect shares have default bodies; the
/// capability-dependent ones default to [`MigrationError::UnsupportedChange`],
/// which signals a differ and flavor mismatch.
pub trait SqlGenerator: Send + Sync {
    /// The dialect rendered.
    fn dialect(&self) -> Dialect;

    /// Character used to quote identifiers.
    fn quote_char(&self) -> char;

    /// Whether `name` can appear unquoted.
    fn is_plain_identifier(&self, name: &str) -> bool {
        let mut chars = name.chars();
        matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
            && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
    }

    /// Quote an identifier if it needs quoting.
    fn quote_identifier(&self, name: &str) -> String {
        if self.is_plain_identifier(name) && !is_reserved_word(name) {
            return name.to_string();
        }
        let q = self.quote_char();
        let escaped = name.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// Quoted, comma-separated column list.
    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Qualified name of a table.
    fn table_name(&self, table: &Table) -> String {
        self.qualified(table.schema(), table.name())
    }

    /// Qualify `name` with a namespace, if one is given.
    fn qualified(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote_identifier(schema), self.quote_identifier(name)),
            None => self.quote_identifier(name),
        }
    }

    /// A column definition as used in `CREATE TABLE` and `ADD COLUMN`.
    fn column_definition(&self, table: &Table, column: &Column) -> String;

    /// Whether the primary key is declared on its column rather than the table.
    fn inline_primary_key(&self, _table: &Table) -> bool {
        false
    }

    /// Table-level primary key clause.
    fn primary_key_clause(&self, pk: &PrimaryKey) -> String {
        let clause = format!("PRIMARY KEY ({})", self.column_list(&pk.columns));
        match &pk.name {
            Some(name) => format!("CONSTRAINT {} {}", self.quote_identifier(name), clause),
            None => clause,
        }
    }

    /// Table-level foreign key clause.
    fn foreign_key_clause(&self, table: &Table, fk: &ForeignKey) -> String {
        let mut clause = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
            self.quote_identifier(&fk.name),
            self.column_list(&fk.columns),
            self.qualified(table.schema(), &fk.referenced_table),
            self.column_list(&fk.referenced_columns),
        );
        if fk.on_delete != ReferentialAction::NoAction {
            clause.push_str(&format!(" ON DELETE {}", fk.on_delete));
        }
        if fk.on_update != ReferentialAction::NoAction {
            clause.push_str(&format!(" ON UPDATE {}", fk.on_update));
        }
        clause
    }

    /// `CREATE TABLE` with columns, primary key and foreign keys. Indexes are separate.
    fn create_table(&self, table: &Table) -> String {
        let mut lines: Vec<String> = table
            .columns()
            .iter()
            .map(|c| self.column_definition(table, c))
            .collect();
        if let Some(pk) = table.primary_key() {
            if !self.inline_primary_key(table) {
                lines.push(self.primary_key_clause(pk));
            }
        }
        lines.extend(table.foreign_keys().iter().map(|fk| self.foreign_key_clause(table, fk)));

        format!(
            "CREATE TABLE {} (\n    {}\n);",
            self.table_name(table),
            lines.join(",\n    ")
        )
    }

    /// `DROP TABLE`.
    fn drop_table(&self, table: &Table) -> String {
        format!("DROP TABLE {};", self.table_name(table))
    }

    /// Rename a table within its namespace.
    fn rename_table(&self, table: &Table, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {};",
            self.table_name(table),
            self.quote_identifier(to)
        )
    }

    /// Add a column.
    fn add_column(&self, table: &Table, column: &Column) -> MigrateResult<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {};",
            self.table_name(table),
            self.column_definition(table, column)
        ))
    }

    /// Drop a column.
    fn drop_column(&self, table: &Table, column: &Column) -> MigrateResult<String> {
        Ok(format!(
            "ALTER TABLE {} DROP COLUMN {};",
            self.table_name(table),
            self.quote_identifier(&column.name)
        ))
    }

    /// Turn column `previous` into `next`.
    fn alter_column(&self, table: &Table, previous: &Column, _next: &Column) -> MigrateResult<Vec<String>> {
        unsupported(
            self.dialect(),
            format!("altering column {}.{}", table.name(), previous.name),
        )
    }

    /// `CREATE INDEX`.
    fn create_index(&self, table: &Table, index: &Index) -> String {
        format!(
            "CREATE {}INDEX {} ON {}({});",
            if index.is_unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            self.table_name(table),
            self.column_list(&index.columns)
        )
    }

    /// `DROP INDEX`.
    fn drop_index(&self, table: &Table, index: &Index) -> String {
        format!("DROP INDEX {};", self.qualified(table.schema(), &index.name))
    }

    /// Rename an index.
    fn rename_index(&self, table: &Table, previous: &Index, _next: &Index) -> MigrateResult<String> {
        unsupported(
            self.dialect(),
            format!("renaming index {} on {}", previous.name, table.name()),
        )
    }

    /// Add a foreign key to an existing table.
    fn add_foreign_key(&self, table: &Table, fk: &ForeignKey) -> MigrateResult<String> {
        Ok(format!(
            "ALTER TABLE {} ADD {};",
            self.table_name(table),
            self.foreign_key_clause(table, fk)
        ))
    }

    /// Drop a foreign key.
    fn drop_foreign_key(&self, table: &Table, fk: &ForeignKey) -> MigrateResult<String> {
        Ok(format!(
            "ALTER TABLE {} DROP CONSTRAINT {};",
            self.table_name(table),
            self.quote_identifier(&fk.name)
        ))
    }

    /// Rename a foreign key.
    fn rename_foreign_key(&self, table: &Table, previous: &ForeignKey, _next: &ForeignKey) -> MigrateResult<String> {
        unsupported(
            self.dialect(),
            format!("renaming foreign key {} on {}", previous.name, table.name()),
        )
    }

    /// Replace a table's primary key.
    fn alter_primary_key(
        &self,
        table: &Table,
        _previous: Option<&PrimaryKey>,
        _next: Option<&PrimaryKey>,
    ) -> MigrateResult<Vec<String>> {
        unsupported(self.dialect(), format!("altering the primary key of {}", table.name()))
    }

    /// Create a named enum type.
    fn create_enum(&self, enum_type: &EnumType) -> MigrateResult<String> {
        unsupported(self.dialect(), format!("creating enum {}", enum_type.name))
    }

    /// Drop a named enum type.
    fn drop_enum(&self, enum_type: &EnumType) -> MigrateResult<String> {
        unsupported(self.dialect(), format!("dropping enum {}", enum_type.name))
    }

    /// Add one value to an enum type.
    fn add_enum_value(&self, enum_type: &EnumType, value: &str) -> MigrateResult<String> {
        unsupported(
            self.dialect(),
            format!("adding value {} to enum {}", value, enum_type.name),
        )
    }

    /// Create a sequence.
    fn create_sequence(&self, sequence: &Sequence) -> MigrateResult<String> {
        unsupported(self.dialect(), format!("creating sequence {}", sequence.name))
    }

    /// Drop a sequence.
    fn drop_sequence(&self, sequence: &Sequence) -> MigrateResult<String> {
        unsupported(self.dialect(), format!("dropping sequence {}", sequence.name))
    }

    /// Change a sequence's parameters.
    fn alter_sequence(&self, previous: &Sequence, _next: &Sequence) -> MigrateResult<String> {
        unsupported(self.dialect(), format!("altering sequence {}", previous.name))
    }

    /// Statements that build `schema` in an empty database.
    ///
    /// Foreign keys are added once every table exists, so tables that
    /// reference each other need no creation order.
    fn create_schema(&self, schema: &DatabaseSchema) -> MigrateResult<Vec<String>> {
        let flavor = self.dialect().flavor();
        let mut statements = Vec::new();
        if flavor.supports_named_enums() {
            for enum_type in schema.enums() {
                statements.push(self.create_enum(enum_type)?);
            }
        }
        if flavor.supports_sequences() {
            for sequence in schema.sequences() {
                statements.push(self.create_sequence(sequence)?);
            }
        }
        for table in schema.tables() {
            statements.extend(create_with_indexes(self, &table.without_foreign_keys()));
        }
        for table in schema.tables() {
            for fk in table.foreign_keys() {
                statements.push(self.add_foreign_key(table, fk)?);
            }
        }
        Ok(statements)
    }

    /// Render a diff into forward and rollback statements.
    fn generate(&self, diff: &DiffResult) -> MigrateResult<MigrationSql> {
        Plan::build(self, diff)
    }
}

/// Forward statements plus the statements that undo exactly them.
#[derive(Debug, Default)]
struct Step {
    forward: Vec<String>,
    rollback: Vec<String>,
}

#[derive(Default)]
struct Plan {
    steps: Vec<Step>,
    warnings: Vec<String>,
}

impl Plan {
    fn push(&mut self, forward: Vec<String>, rollback: Vec<String>) {
        self.steps.push(Step { forward, rollback });
    }

    fn build<G: SqlGenerator + ?Sized>(g: &G, diff: &DiffResult) -> MigrateResult<MigrationSql> {
        let mut plan = Plan::default();

        for enum_type in diff.enums_to_create() {
            plan.push(vec![g.create_enum(enum_type)?], vec![g.drop_enum(enum_type)?]);
        }
        for alter in diff.enums_to_alter() {
            let forward = alter
                .added_values
                .iter()
                .map(|v| g.add_enum_value(&alter.next, v))
                .collect::<MigrateResult<Vec<_>>>()?;
            plan.warnings.push(format!(
                "values added to enum {} are not removed on rollback",
                alter.next.name
            ));
            plan.push(forward, Vec::new());
        }
        for sequence in diff.sequences_to_create() {
            plan.push(vec![g.create_sequence(sequence)?], vec![g.drop_sequence(sequence)?]);
        }
        for alter in diff.sequences_to_alter() {
            plan.push(
                vec![g.alter_sequence(&alter.previous, &alter.next)?],
                vec![g.alter_sequence(&alter.next, &alter.previous)?],
            );
        }

        let incremental: Vec<&TableAlter> = diff.tables_to_alter().iter().filter(|a| !a.redefine).collect();

        for alter in &incremental {
            for change in &alter.changes {
                if let ChangeDetail::DropForeignKey { foreign_key, .. } = &change.detail {
                    plan.push(
                        vec![g.drop_foreign_key(&alter.previous, foreign_key)?],
                        vec![g.add_foreign_key(&alter.previous, foreign_key)?],
                    );
                }
            }
        }
        for alter in &incremental {
            for change in &alter.changes {
                if let ChangeDetail::DropIndex { index, .. } = &change.detail {
                    plan.push(
                        vec![g.drop_index(&alter.previous, index)],
                        vec![g.create_index(&alter.previous, index)],
                    );
                }
            }
        }
        for alter in &incremental {
            for change in &alter.changes {
                match &change.detail {
                    ChangeDetail::RenameIndex { previous, next } => plan.push(
                        vec![g.rename_index(&alter.next, previous, next)?],
                        vec![g.rename_index(&alter.next, next, previous)?],
                    ),
                    ChangeDetail::RenameForeignKey { previous, next } => plan.push(
                        vec![g.rename_foreign_key(&alter.next, previous, next)?],
                        vec![g.rename_foreign_key(&alter.next, next, previous)?],
                    ),
                    _ => {}
                }
            }
        }

        for alter in diff.tables_to_alter().iter().filter(|a| a.redefine) {
            for column in alter.previous.columns() {
                if alter.next.column(&column.name).is_none() {
                    plan.warnings.push(dropped_column_warning(alter.name(), &column.name));
                }
            }
            plan.push(
                rebuild(g, &alter.previous, &alter.next),
                rebuild(g, &alter.next, &alter.previous),
            );
        }

        for alter in &incremental {
            for change in &alter.changes {
                if let ChangeDetail::AddColumn(column) = &change.detail {
                    plan.push(
                        vec![g.add_column(&alter.next, column)?],
                        vec![g.drop_column(&alter.next, column)?],
                    );
                }
            }
        }
        for alter in &incremental {
            for change in &alter.changes {
                if let ChangeDetail::AlterColumn { previous, next, .. } = &change.detail {
                    plan.push(
                        g.alter_column(&alter.next, previous, next)?,
                        g.alter_column(&alter.next, next, previous)?,
                    );
                }
            }
        }
        for alter in &incremental {
            for change in &alter.changes {
                if let ChangeDetail::AlterPrimaryKey { previous, next } = &change.detail {
                    plan.push(
                        g.alter_primary_key(&alter.next, previous.as_ref(), next.as_ref())?,
                        g.alter_primary_key(&alter.next, next.as_ref(), previous.as_ref())?,
                    );
                }
            }
        }
        for alter in &incremental {
            for change in &alter.changes {
                if let ChangeDetail::DropColumn(column) = &change.detail {
                    plan.warnings.push(dropped_column_warning(alter.name(), &column.name));
                    plan.push(
                        vec![g.drop_column(&alter.previous, column)?],
                        vec![g.add_column(&alter.previous, column)?],
                    );
                }
            }
        }
        for alter in &incremental {
            for change in &alter.changes {
                if let ChangeDetail::CreateIndex(index) = &change.detail {
                    plan.push(
                        vec![g.create_index(&alter.next, index)],
                        vec![g.drop_index(&alter.next, index)],
                    );
                }
            }
        }
        // New tables come after the columns and indexes their foreign keys
        // may reference, and before foreign keys added to existing tables.
        for table in diff.tables_to_create() {
            plan.push(create_with_indexes(g, table), vec![g.drop_table(table)]);
        }
        for alter in &incremental {
            for change in &alter.changes {
                if let ChangeDetail::CreateForeignKey(fk) = &change.detail {
                    plan.push(
                        vec![g.add_foreign_key(&alter.next, fk)?],
                        vec![g.drop_foreign_key(&alter.next, fk)?],
                    );
                }
            }
        }

        for table in diff.tables_to_drop() {
            plan.warnings.push(format!(
                "rolling back the drop of {} recreates the table empty",
                table.name()
            ));
            plan.push(vec![g.drop_table(table)], create_with_indexes(g, table));
        }

        for sequence in diff.sequences_to_drop() {
            plan.push(vec![g.drop_sequence(sequence)?], vec![g.create_sequence(sequence)?]);
        }
        for enum_type in diff.enums_to_drop() {
            plan.push(vec![g.drop_enum(enum_type)?], vec![g.create_enum(enum_type)?]);
        }

        Ok(plan.finish())
    }

    fn finish(self) -> MigrationSql {
        let forward = self.steps.iter().flat_map(|s| s.forward.iter().cloned()).collect();
        let rollback = self
            .steps
            .iter()
            .rev()
            .flat_map(|s| s.rollback.iter().cloned())
            .collect();
        MigrationSql {
            forward,
            rollback,
            warnings: self.warnings,
        }
    }
}

fn dropped_column_warning(table: &str, column: &str) -> String {
    format!(
        "rolling back the drop of {}.{} restores the column but not its data",
        table, column
    )
}

fn create_with_indexes<G: SqlGenerator + ?Sized>(g: &G, table: &Table) -> Vec<String> {
    let mut statements = vec![g.create_table(table)];
    statements.extend(table.indexes().iter().map(|i| g.create_index(table, i)));
    statements
}

/// Create a new table with `to`'s structure, copy shared columns from
/// `from`, drop `from` and move the new table into place.
fn rebuild<G: SqlGenerator + ?Sized>(g: &G, from: &Table, to: &Table) -> Vec<String> {
    let temp = to.renamed(format!("{}{}", REBUILD_PREFIX, to.name()));
    let mut statements = vec![g.create_table(&temp)];

    let shared: Vec<String> = to
        .columns()
        .iter()
        .filter(|c| from.column(&c.name).is_some())
        .map(|c| c.name.clone())
        .collect();
    if !shared.is_empty() {
        let columns = g.column_list(&shared);
        statements.push(format!(
            "INSERT INTO {} ({}) SELECT {} FROM {};",
            g.table_name(&temp),
            columns,
            columns,
            g.table_name(from)
        ));
    }

    statements.push(g.drop_table(from));
    statements.push(g.rename_table(&temp, to.name()));
    statements.extend(to.indexes().iter().map(|i| g.create_index(to, i)));
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::flavor::{PostgresFlavor, SqliteFlavor};
    use crate::schema::{DatabaseSchema, PrimaryKey};
    use pretty_assertions::assert_eq;

    fn users_with(extra: Vec<Column>, indexes: Vec<Index>) -> DatabaseSchema {
        let mut builder = Table::builder("users")
            .column(Column::new("id", "INTEGER").not_null())
            .column(Column::new("email", "VARCHAR(255)"))
            .primary_key(PrimaryKey::new(["id"]));
        for column in extra {
            builder = builder.column(column);
        }
        for index in indexes {
            builder = builder.index(index);
        }
        DatabaseSchema::builder().table(builder.build().unwrap()).build().unwrap()
    }

    #[test]
    fn test_quote_identifier() {
        let g = PostgresGenerator;
        assert_eq!(g.quote_identifier("users"), "users");
        assert_eq!(g.quote_identifier("user"), "\"user\"");
        assert_eq!(g.quote_identifier("Users"), "\"Users\"");
        assert_eq!(g.quote_identifier("odd\"name"), "\"odd\"\"name\"");
        assert_eq!(MySqlGenerator.quote_identifier("order"), "`order`");
        assert_eq!(SqliteGenerator.quote_identifier("my table"), "\"my table\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_end_to_end_postgres() {
        let current = users_with(vec![], vec![]);
        let target = users_with(
            vec![Column::new("name", "VARCHAR(255)")],
            vec![Index::unique("users_email_key", ["email"])],
        );
        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        let sql = PostgresGenerator.generate(&d).unwrap();

        assert_eq!(
            sql.forward,
            vec![
                "ALTER TABLE users ADD COLUMN name VARCHAR(255);",
                "CREATE UNIQUE INDEX users_email_key ON users(email);",
            ]
        );
        assert_eq!(
            sql.rollback,
            vec!["DROP INDEX users_email_key;", "ALTER TABLE users DROP COLUMN name;"]
        );
    }

    #[test]
    fn test_sqlite_rebuild_sequence() {
        let current = users_with(vec![], vec![]);
        let target = users_with(vec![Column::new("name", "TEXT")], vec![]);
        let d = diff(&current, &target, &SqliteFlavor).unwrap();
        let sql = SqliteGenerator.generate(&d).unwrap();

        assert!(sql.forward[0].starts_with("CREATE TABLE _strata_new_users ("));
        assert_eq!(
            sql.forward[1],
            "INSERT INTO _strata_new_users (id, email) SELECT id, email FROM users;"
        );
        assert_eq!(sql.forward[2], "DROP TABLE users;");
        assert_eq!(sql.forward[3], "ALTER TABLE _strata_new_users RENAME TO users;");
        assert!(sql.forward.iter().all(|s| !s.contains("ALTER COLUMN")));

        assert!(sql.rollback[0].starts_with("CREATE TABLE _strata_new_users ("));
        assert!(!sql.rollback[0].contains("name"));
        assert_eq!(sql.rollback[3], "ALTER TABLE _strata_new_users RENAME TO users;");
    }

    #[test]
    fn test_create_tables_roll_back_in_reverse() {
        let users = Table::builder("users")
            .column(Column::new("id", "INTEGER").auto_increment())
            .primary_key(PrimaryKey::new(["id"]))
            .build()
            .unwrap();
        let posts = Table::builder("posts")
            .column(Column::new("id", "INTEGER").auto_increment())
            .column(Column::new("user_id", "INTEGER").not_null())
            .primary_key(PrimaryKey::new(["id"]))
            .index(Index::new("posts_user_id_idx", ["user_id"]))
            .foreign_key(ForeignKey::new("posts_user_id_fkey", ["user_id"], "users", ["id"]))
            .build()
            .unwrap();
        let target = DatabaseSchema::builder().table(posts).table(users).build().unwrap();

        let d = diff(&DatabaseSchema::empty(), &target, &PostgresFlavor).unwrap();
        let sql = PostgresGenerator.generate(&d).unwrap();

        assert!(sql.forward[0].starts_with("CREATE TABLE users"));
        assert!(sql.forward[1].starts_with("CREATE TABLE posts"));
        assert_eq!(sql.forward[2], "CREATE INDEX posts_user_id_idx ON posts(user_id);");
        assert_eq!(sql.rollback, vec!["DROP TABLE posts;", "DROP TABLE users;"]);
    }

    #[test]
    fn test_create_schema_adds_foreign_keys_last() {
        let table = |name: &str, other: &str| {
            Table::builder(name)
                .column(Column::new("id", "INTEGER").not_null())
                .column(Column::new("peer_id", "INTEGER"))
                .primary_key(PrimaryKey::new(["id"]))
                .foreign_key(ForeignKey::new(format!("{name}_peer_id_fkey"), ["peer_id"], other, ["id"]))
                .build()
                .unwrap()
        };
        let cyclic = DatabaseSchema::builder()
            .table(table("a", "b"))
            .table(table("b", "a"))
            .build()
            .unwrap();
        assert!(diff(&DatabaseSchema::empty(), &cyclic, &PostgresFlavor).is_err());

        let statements = PostgresGenerator.create_schema(&cyclic).unwrap();
        assert_eq!(statements.len(), 4);
        assert!(statements[..2].iter().all(|s| s.starts_with("CREATE TABLE") && !s.contains("FOREIGN KEY")));
        assert_eq!(
            statements[2],
            "ALTER TABLE a ADD CONSTRAINT a_peer_id_fkey FOREIGN KEY (peer_id) REFERENCES b(id);"
        );

        let inline = SqliteGenerator.create_schema(&cyclic).unwrap();
        assert_eq!(inline.len(), 2);
        assert!(inline.iter().all(|s| s.contains("FOREIGN KEY")));
    }

    #[test]
    fn test_rebuild_warns_about_dropped_columns() {
        let current = users_with(vec![Column::new("bio", "TEXT")], vec![]);
        let target = users_with(vec![], vec![]);
        let sql = SqliteGenerator.generate(&diff(&current, &target, &SqliteFlavor).unwrap()).unwrap();

        assert!(sql.forward[0].starts_with("CREATE TABLE _strata_new_users ("));
        assert_eq!(
            sql.warnings,
            vec!["rolling back the drop of users.bio restores the column but not its data"]
        );
    }

    #[test]
    fn test_drop_table_rollback_recreates_definition() {
        let current = users_with(vec![], vec![Index::new("users_email_idx", ["email"])]);
        let d = diff(&current, &DatabaseSchema::empty(), &PostgresFlavor).unwrap();
        let sql = PostgresGenerator.generate(&d).unwrap();

        assert_eq!(sql.forward, vec!["DROP TABLE users;"]);
        assert!(sql.rollback[0].starts_with("CREATE TABLE users ("));
        assert_eq!(sql.rollback[1], "CREATE INDEX users_email_idx ON users(email);");
        assert!(sql.warnings.iter().any(|w| w.contains("recreates the table empty")));
    }

    #[test]
    fn test_script_rendering() {
        let sql = MigrationSql {
            forward: vec!["DROP TABLE a;".into(), "DROP TABLE b;".into()],
            rollback: vec![],
            warnings: vec![],
        };
        assert_eq!(sql.forward_script(), "DROP TABLE a;\n\nDROP TABLE b;\n");
        assert_eq!(sql.rollback_script(), "");
        assert!(!sql.is_empty());
    }

    #[test]
    fn test_generator_lookup() {
        for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::Sqlite] {
            assert_eq!(generator(dialect).dialect(), dialect);
        }
    }
}
