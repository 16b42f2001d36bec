//! Dialect strategies.
//!
//! A [`Flavor`] answers the structural-equivalence and capability questions
//! the differ asks while comparing two snapshots. Every method has a shared
//! default; each dialect overrides only what differs.

mod mysql;
mod postgres;
mod sqlite;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diff::Change;
use crate::error::{MigrateResult, MigrationError};
use crate::history::MIGRATIONS_TABLE;
use crate::schema::{Column, ForeignKey, Index};

pub use mysql::MySqlFlavor;
pub use postgres::PostgresFlavor;
pub use sqlite::{Affinity, SqliteFlavor};

/// Supported database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL.
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    /// MySQL and MariaDB.
    #[serde(alias = "mariadb")]
    MySql,
    /// SQLite.
    #[serde(alias = "sqlite3")]
    Sqlite,
}

impl Dialect {
    /// Infer the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> MigrateResult<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" | "file" => Ok(Self::Sqlite),
            _ if url.ends_with(".db") || url.ends_with(".sqlite") || url.ends_with(".sqlite3") => {
                Ok(Self::Sqlite)
            }
            _ => Err(MigrationError::config(format!(
                "cannot infer database dialect from URL '{}'",
                url
            ))),
        }
    }

    /// Lowercase name of the dialect.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    /// The flavor for this dialect.
    pub fn flavor(self) -> &'static dyn Flavor {
        match self {
            Self::Postgres => &PostgresFlavor,
            Self::MySql => &MySqlFlavor,
            Self::Sqlite => &SqliteFlavor,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(MigrationError::config(format!("unknown dialect '{}'", other))),
        }
    }
}

/// A column type difference, as judged by a flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTypeChange {
    /// Type before the change.
    pub from_type: String,
    /// Type after the change.
    pub to_type: String,
    /// Whether every existing value is representable in the new type.
    pub is_safe: bool,
}

/// Dialect-specific structural comparison and capability queries.
pub trait Flavor: Send + Sync {
    /// The dialect this flavor describes.
    fn dialect(&self) -> Dialect;

    /// Canonical form of a type, used only for comparison.
    fn normalize_type(&self, data_type: &str) -> String {
        TypeName::parse(data_type).to_string()
    }

    /// Whether converting `from` to `to` keeps every value intact.
    fn is_widening(&self, from: &str, to: &str) -> bool {
        is_known_widening(&TypeName::parse(from), &TypeName::parse(to))
    }

    /// Indexes match when their columns (in order) and uniqueness match.
    fn indexes_match(&self, a: &Index, b: &Index) -> bool {
        a.columns == b.columns && a.is_unique == b.is_unique
    }

    /// Foreign keys match on everything but their name.
    fn foreign_keys_match(&self, a: &ForeignKey, b: &ForeignKey) -> bool {
        a.columns == b.columns
            && self.table_names_equal(&a.referenced_table, &b.referenced_table)
            && a.referenced_columns == b.referenced_columns
            && a.on_delete == b.on_delete
            && a.on_update == b.on_update
    }

    /// `None` when the two column types are equivalent in this dialect.
    fn column_type_change(&self, previous: &Column, next: &Column) -> Option<ColumnTypeChange> {
        let from = self.normalize_type(&previous.data_type);
        let to = self.normalize_type(&next.data_type);
        if from == to {
            return None;
        }
        Some(ColumnTypeChange {
            is_safe: self.is_widening(&previous.data_type, &next.data_type),
            from_type: previous.data_type.clone(),
            to_type: next.data_type.clone(),
        })
    }

    /// Whether two default expressions are equivalent.
    fn defaults_match(&self, a: Option<&str>, b: Option<&str>) -> bool {
        a.map(normalize_default) == b.map(normalize_default)
    }

    /// Whether a table's pending changes need a full rebuild instead of
    /// incremental `ALTER TABLE` statements.
    fn should_redefine_table(&self, _table: &str, _changes: &[Change]) -> bool {
        false
    }

    /// Whether `ALTER INDEX ... RENAME` (or equivalent) exists.
    fn can_rename_index(&self) -> bool {
        true
    }

    /// Whether foreign key constraints can be renamed in place.
    fn can_rename_foreign_key(&self) -> bool {
        false
    }

    /// True exactly when the indexes match structurally, their names differ,
    /// and the dialect can rename indexes.
    fn index_should_be_renamed(&self, previous: &Index, next: &Index) -> bool {
        self.can_rename_index() && previous.name != next.name && self.indexes_match(previous, next)
    }

    /// Foreign key counterpart of [`index_should_be_renamed`](Self::index_should_be_renamed).
    fn foreign_key_should_be_renamed(&self, previous: &ForeignKey, next: &ForeignKey) -> bool {
        self.can_rename_foreign_key()
            && previous.name != next.name
            && self.foreign_keys_match(previous, next)
    }

    /// Whether the catalog reports the names given to foreign keys.
    ///
    /// When it does not, a name-only difference is not a change.
    fn tracks_foreign_key_names(&self) -> bool {
        true
    }

    /// Whether table names are compared case-insensitively.
    fn lowercases_table_names(&self) -> bool {
        false
    }

    /// Tables the differ must never touch.
    fn table_should_be_ignored(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(MIGRATIONS_TABLE)
    }

    /// Whether DDL participates in transactions.
    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    /// Whether named enum types exist as schema objects.
    fn supports_named_enums(&self) -> bool {
        false
    }

    /// Whether standalone sequences exist as schema objects.
    fn supports_sequences(&self) -> bool {
        false
    }

    /// Key used to match table names across snapshots.
    fn table_key(&self, name: &str) -> String {
        if self.lowercases_table_names() {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    /// Compare two table names the way the dialect does.
    fn table_names_equal(&self, a: &str, b: &str) -> bool {
        self.table_key(a) == self.table_key(b)
    }
}

/// A parsed type name: `NUMERIC(10, 2)` becomes base `NUMERIC`, params `["10", "2"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TypeName {
    pub base: String,
    pub params: Vec<String>,
}

impl TypeName {
    pub(crate) fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        let (base, params) = match (upper.find('('), upper.rfind(')')) {
            (Some(open), Some(close)) if close > open => {
                let params = upper[open + 1..close]
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                (format!("{} {}", &upper[..open], &upper[close + 1..]), params)
            }
            _ => (upper, Vec::new()),
        };

        Self {
            base: base.split_whitespace().collect::<Vec<_>>().join(" "),
            params,
        }
    }

    pub(crate) fn param(&self, i: usize) -> Option<u32> {
        self.params.get(i).and_then(|p| p.parse().ok())
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            f.write_str(&self.base)
        } else {
            write!(f, "{}({})", self.base, self.params.join(","))
        }
    }
}

fn integer_rank(base: &str) -> Option<u8> {
    match base {
        "TINYINT" => Some(1),
        "SMALLINT" => Some(2),
        "MEDIUMINT" => Some(3),
        "INT" | "INTEGER" => Some(4),
        "BIGINT" => Some(5),
        _ => None,
    }
}

fn text_rank(base: &str) -> Option<u8> {
    match base {
        "TINYTEXT" => Some(1),
        "TEXT" => Some(2),
        "MEDIUMTEXT" => Some(3),
        "LONGTEXT" => Some(4),
        _ => None,
    }
}

fn is_float(base: &str) -> bool {
    matches!(base, "REAL" | "FLOAT" | "FLOAT4")
}

fn is_double(base: &str) -> bool {
    matches!(base, "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8")
}

/// Widening rules shared by every dialect. Anything not listed is unsafe.
pub(crate) fn is_known_widening(from: &TypeName, to: &TypeName) -> bool {
    let (f, t) = (from.base.as_str(), to.base.as_str());

    if let (Some(a), Some(b)) = (integer_rank(f), integer_rank(t)) {
        return a <= b;
    }

    if let (Some(a), Some(b)) = (text_rank(f), text_rank(t)) {
        return a <= b;
    }

    match (f, t) {
        ("VARCHAR" | "CHAR", "VARCHAR") => match (from.param(0), to.param(0)) {
            (Some(a), Some(b)) => a <= b,
            (_, None) => true,
            (None, Some(_)) => false,
        },
        ("VARCHAR" | "CHAR", _) if text_rank(t).is_some() => true,
        ("CHAR", "CHAR") => matches!((from.param(0), to.param(0)), (Some(a), Some(b)) if a <= b),
        ("DECIMAL", "DECIMAL") => match (from.param(0), to.param(0)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(p1), Some(p2)) => {
                let s1 = from.param(1).unwrap_or(0);
                let s2 = to.param(1).unwrap_or(0);
                s2 >= s1 && p2.saturating_sub(s2) >= p1.saturating_sub(s1)
            }
        },
        _ if is_float(f) && (is_double(t) || is_float(t)) => true,
        _ if is_double(f) && is_double(t) => true,
        _ => false,
    }
}

/// Strip cosmetic differences from a default expression.
pub(crate) fn normalize_default(expr: &str) -> String {
    let mut s = expr.trim();
    while s.len() >= 2 && s.starts_with('(') && s.ends_with(')') && balanced(&s[1..s.len() - 1]) {
        s = s[1..s.len() - 1].trim();
    }
    if s.starts_with('\'') {
        s.to_string()
    } else {
        s.to_ascii_uppercase()
    }
}

fn balanced(s: &str) -> bool {
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}
