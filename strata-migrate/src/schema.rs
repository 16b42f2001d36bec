//! Structural schema model.
//!
//! These are the values the differ compares. A [`DatabaseSchema`] is produced
//! either by introspecting a live database or by converting a parsed schema
//! definition, and is never mutated after it has been built. All structural
//! invariants are checked by the builders here, before any diffing happens.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Action taken by a foreign key when the referenced row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    /// No action (the SQL default).
    #[default]
    NoAction,
    /// Reject the change.
    Restrict,
    /// Propagate the change.
    Cascade,
    /// Set referencing columns to NULL.
    SetNull,
    /// Set referencing columns to their default.
    SetDefault,
}

impl ReferentialAction {
    /// SQL keyword form of the action.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for ReferentialAction {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('_', " ");
        match normalized.as_str() {
            "NO ACTION" | "" => Ok(Self::NoAction),
            "RESTRICT" => Ok(Self::Restrict),
            "CASCADE" => Ok(Self::Cascade),
            "SET NULL" => Ok(Self::SetNull),
            "SET DEFAULT" => Ok(Self::SetDefault),
            other => Err(MigrationError::schema_model(format!(
                "unknown referential action '{}'",
                other
            ))),
        }
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Dialect-native type, e.g. `VARCHAR(255)`.
    pub data_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether values are generated by the database.
    pub auto_increment: bool,
    /// Default value expression, as SQL text.
    pub default_value: Option<String>,
}

impl Column {
    /// Create a nullable column with no default.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            auto_increment: false,
            default_value: None,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set nullability explicitly.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Mark the column as database generated. Implies NOT NULL.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.nullable = false;
        self
    }

    /// Set the default value expression.
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default_value = Some(expr.into());
        self
    }
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub is_unique: bool,
}

impl Index {
    /// Create a non-unique index.
    pub fn new(name: impl Into<String>, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            is_unique: false,
        }
    }

    /// Create a unique index.
    pub fn unique(name: impl Into<String>, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            is_unique: true,
            ..Self::new(name, columns)
        }
    }
}

/// A primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    /// Constraint name, if the database reports one.
    pub name: Option<String>,
    /// Key columns, in order.
    pub columns: Vec<String>,
}

impl PrimaryKey {
    /// Create an unnamed primary key.
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Set the constraint name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Referencing columns, in order.
    pub columns: Vec<String>,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced columns, in order.
    pub referenced_columns: Vec<String>,
    /// Action on delete of the referenced row.
    pub on_delete: ReferentialAction,
    /// Action on update of the referenced key.
    pub on_update: ReferentialAction,
}

impl ForeignKey {
    /// Create a foreign key with `NO ACTION` for both actions.
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
        referenced_table: impl Into<String>,
        referenced_columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            referenced_table: referenced_table.into(),
            referenced_columns: referenced_columns.into_iter().map(Into::into).collect(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    /// Set the delete action.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Set the update action.
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }
}

/// A named enum type (PostgreSQL `CREATE TYPE ... AS ENUM`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    /// Type name.
    pub name: String,
    /// Values, in declaration order.
    pub values: Vec<String>,
}

impl EnumType {
    /// Create an enum type.
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// A standalone sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// Sequence name.
    pub name: String,
    /// First value.
    pub start: i64,
    /// Step between values.
    pub increment: i64,
}

impl Sequence {
    /// Create a sequence starting at 1 with step 1.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: 1,
            increment: 1,
        }
    }

    /// Set the start value.
    pub fn start(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    /// Set the increment.
    pub fn increment(mut self, increment: i64) -> Self {
        self.increment = increment;
        self
    }
}

/// A table. Build one with [`Table::builder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    schema: Option<String>,
    columns: Vec<Column>,
    primary_key: Option<PrimaryKey>,
    indexes: Vec<Index>,
    foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Start building a table.
    pub fn builder(name: impl Into<String>) -> TableBuilder {
        TableBuilder::new(name)
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace (PostgreSQL schema, MySQL database), if any.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Look up a column by exact name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The primary key, if any.
    pub fn primary_key(&self) -> Option<&PrimaryKey> {
        self.primary_key.as_ref()
    }

    /// Secondary indexes.
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Foreign keys.
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Whether `column` is the table's only primary key column.
    pub fn is_sole_primary_key(&self, column: &str) -> bool {
        self.primary_key
            .as_ref()
            .is_some_and(|pk| pk.columns.len() == 1 && pk.columns[0] == column)
    }

    /// The same structure under another name. Used for table rebuilds.
    pub(crate) fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub(crate) fn without_foreign_keys(&self) -> Self {
        Self {
            foreign_keys: Vec::new(),
            ..self.clone()
        }
    }
}

/// Builder for [`Table`] that checks structural invariants on [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct TableBuilder {
    name: String,
    schema: Option<String>,
    columns: Vec<Column>,
    primary_keys: Vec<PrimaryKey>,
    indexes: Vec<Index>,
    foreign_keys: Vec<ForeignKey>,
}

impl TableBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            primary_keys: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Set the namespace.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key.
    pub fn primary_key(mut self, primary_key: PrimaryKey) -> Self {
        self.primary_keys.push(primary_key);
        self
    }

    /// Add an index.
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a foreign key.
    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Validate and build the table.
    pub fn build(mut self) -> MigrateResult<Table> {
        if self.name.trim().is_empty() {
            return Err(MigrationError::schema_model("table name must not be empty"));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(MigrationError::schema_model(format!(
                    "table '{}' has a column with an empty name",
                    self.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(MigrationError::schema_model(format!(
                    "duplicate column '{}' in table '{}'",
                    column.name, self.name
                )));
            }
        }

        if self.primary_keys.len() > 1 {
            return Err(MigrationError::schema_model(format!(
                "table '{}' declares {} primary keys",
                self.name,
                self.primary_keys.len()
            )));
        }
        let primary_key = self.primary_keys.pop();

        if let Some(pk) = &primary_key {
            self.check_columns("primary key", &pk.columns, &seen)?;
        }

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            if !index_names.insert(index.name.as_str()) {
                return Err(MigrationError::schema_model(format!(
                    "duplicate index '{}' on table '{}'",
                    index.name, self.name
                )));
            }
            self.check_columns(&format!("index '{}'", index.name), &index.columns, &seen)?;
        }

        for fk in &self.foreign_keys {
            self.check_columns(&format!("foreign key '{}'", fk.name), &fk.columns, &seen)?;
            if fk.columns.len() != fk.referenced_columns.len() {
                return Err(MigrationError::schema_model(format!(
                    "foreign key '{}' on table '{}' maps {} columns to {} referenced columns",
                    fk.name,
                    self.name,
                    fk.columns.len(),
                    fk.referenced_columns.len()
                )));
            }
        }

        Ok(Table {
            name: self.name,
            schema: self.schema,
            columns: self.columns,
            primary_key,
            indexes: self.indexes,
            foreign_keys: self.foreign_keys,
        })
    }

    fn check_columns(
        &self,
        what: &str,
        columns: &[String],
        known: &HashSet<&str>,
    ) -> MigrateResult<()> {
        if columns.is_empty() {
            return Err(MigrationError::schema_model(format!(
                "{} on table '{}' has no columns",
                what, self.name
            )));
        }
        match columns.iter().find(|c| !known.contains(c.as_str())) {
            Some(missing) => Err(MigrationError::schema_model(format!(
                "{} on table '{}' references unknown column '{}'",
                what, self.name, missing
            ))),
            None => Ok(()),
        }
    }
}

/// One top-level declaration of a schema.
///
/// Converters from a parsed schema definition emit these; matching on them
/// is exhaustive, so a new kind of declaration cannot be dropped silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaItem {
    /// A table.
    Table(Table),
    /// A named enum type.
    Enum(EnumType),
    /// A sequence.
    Sequence(Sequence),
}

/// A complete structural snapshot of a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSchema {
    tables: Vec<Table>,
    enums: Vec<EnumType>,
    sequences: Vec<Sequence>,
}

impl DatabaseSchema {
    /// A schema with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Build a schema from a sequence of declarations.
    pub fn from_items(items: impl IntoIterator<Item = SchemaItem>) -> MigrateResult<Self> {
        items
            .into_iter()
            .fold(SchemaBuilder::default(), |builder, item| match item {
                SchemaItem::Table(table) => builder.table(table),
                SchemaItem::Enum(enum_type) => builder.enum_type(enum_type),
                SchemaItem::Sequence(sequence) => builder.sequence(sequence),
            })
            .build()
    }

    /// Tables in declaration order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Look up a table by exact name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Named enum types.
    pub fn enums(&self) -> &[EnumType] {
        &self.enums
    }

    /// Sequences.
    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    /// Whether the schema declares nothing.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.enums.is_empty() && self.sequences.is_empty()
    }
}

/// Builder for [`DatabaseSchema`].
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    tables: Vec<Table>,
    enums: Vec<EnumType>,
    sequences: Vec<Sequence>,
}

impl SchemaBuilder {
    /// Add a table.
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Add an enum type.
    pub fn enum_type(mut self, enum_type: EnumType) -> Self {
        self.enums.push(enum_type);
        self
    }

    /// Add a sequence.
    pub fn sequence(mut self, sequence: Sequence) -> Self {
        self.sequences.push(sequence);
        self
    }

    /// Validate and build the schema.
    pub fn build(self) -> MigrateResult<DatabaseSchema> {
        let mut tables = HashSet::new();
        for table in &self.tables {
            if !tables.insert((table.schema(), table.name())) {
                return Err(MigrationError::schema_model(format!(
                    "duplicate table '{}'",
                    table.name()
                )));
            }
        }

        let mut enums = HashSet::new();
        for enum_type in &self.enums {
            if !enums.insert(enum_type.name.as_str()) {
                return Err(MigrationError::schema_model(format!(
                    "duplicate enum '{}'",
                    enum_type.name
                )));
            }
            let mut values = HashSet::new();
            if let Some(dup) = enum_type.values.iter().find(|v| !values.insert(v.as_str())) {
                return Err(MigrationError::schema_model(format!(
                    "enum '{}' repeats value '{}'",
                    enum_type.name, dup
                )));
            }
        }

        let mut sequences = HashSet::new();
        for sequence in &self.sequences {
            if !sequences.insert(sequence.name.as_str()) {
                return Err(MigrationError::schema_model(format!(
                    "duplicate sequence '{}'",
                    sequence.name
                )));
            }
            if sequence.increment == 0 {
                return Err(MigrationError::schema_model(format!(
                    "sequence '{}' has a zero increment",
                    sequence.name
                )));
            }
        }

        Ok(DatabaseSchema {
            tables: self.tables,
            enums: self.enums,
            sequences: self.sequences,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableBuilder {
        Table::builder("users")
            .column(Column::new("id", "INTEGER").auto_increment())
            .column(Column::new("email", "VARCHAR(255)").not_null())
            .primary_key(PrimaryKey::new(["id"]))
    }

    #[test]
    fn test_build_table() {
        let table = users().index(Index::unique("users_email_key", ["email"])).build().unwrap();
        assert_eq!(table.name(), "users");
        assert_eq!(table.columns().len(), 2);
        assert!(table.is_sole_primary_key("id"));
        assert!(!table.column("id").unwrap().nullable);
        assert!(table.column("missing").is_none());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = users().column(Column::new("email", "TEXT")).build().unwrap_err();
        assert!(matches!(err, MigrationError::SchemaModel(_)));
        assert!(err.to_string().contains("duplicate column 'email'"));
    }

    #[test]
    fn test_second_primary_key_rejected() {
        let err = users().primary_key(PrimaryKey::new(["email"])).build().unwrap_err();
        assert!(err.to_string().contains("2 primary keys"));
    }

    #[test]
    fn test_unknown_index_column_rejected() {
        let err = users().index(Index::new("idx_name", ["name"])).build().unwrap_err();
        assert!(err.to_string().contains("unknown column 'name'"));
    }

    #[test]
    fn test_foreign_key_arity_checked() {
        let err = users()
            .foreign_key(ForeignKey::new("fk", ["id"], "accounts", ["id", "region"]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("maps 1 columns to 2"));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let table = users().build().unwrap();
        let err = DatabaseSchema::builder()
            .table(table.clone())
            .table(table)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate table 'users'"));
    }

    #[test]
    fn test_same_name_in_different_namespaces() {
        let a = users().schema("a").build().unwrap();
        let b = users().schema("b").build().unwrap();
        assert!(DatabaseSchema::builder().table(a).table(b).build().is_ok());
    }

    #[test]
    fn test_from_items() {
        let schema = DatabaseSchema::from_items([
            SchemaItem::Enum(EnumType::new("status", ["active", "banned"])),
            SchemaItem::Table(users().build().unwrap()),
            SchemaItem::Sequence(Sequence::new("order_seq").start(100)),
        ])
        .unwrap();

        assert_eq!(schema.tables().len(), 1);
        assert_eq!(schema.enums()[0].values, vec!["active", "banned"]);
        assert_eq!(schema.sequences()[0].start, 100);
        assert!(!schema.is_empty());
    }

    #[test]
    fn test_enum_values_unique() {
        let err = DatabaseSchema::builder()
            .enum_type(EnumType::new("mood", ["ok", "ok"]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("repeats value 'ok'"));
    }

    #[test]
    fn test_referential_action_parse() {
        assert_eq!("cascade".parse::<ReferentialAction>().unwrap(), ReferentialAction::Cascade);
        assert_eq!("SET NULL".parse::<ReferentialAction>().unwrap(), ReferentialAction::SetNull);
        assert_eq!("set_default".parse::<ReferentialAction>().unwrap(), ReferentialAction::SetDefault);
        assert!("explode".parse::<ReferentialAction>().is_err());
    }
}
