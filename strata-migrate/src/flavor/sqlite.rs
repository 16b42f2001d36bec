//! SQLite flavor.

use crate::diff::Change;
use crate::schema::Column;

use super::{ColumnTypeChange, Dialect, Flavor, TypeName, is_known_widening};

/// Prefix SQLite reserves for its internal tables.
const SQLITE_INTERNAL_PREFIX: &str = "sqlite_";

/// SQLite: limited `ALTER TABLE`, so every table change is a rebuild.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteFlavor;

/// Storage affinity of a declared type, following SQLite's rules in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// Declared type contains `INT`.
    Integer,
    /// Contains `CHAR`, `CLOB` or `TEXT`.
    Text,
    /// Contains `BLOB`, or no type at all.
    Blob,
    /// Contains `REAL`, `FLOA` or `DOUB`.
    Real,
    /// Anything else.
    Numeric,
}

impl Affinity {
    /// Determine the affinity of a declared column type.
    pub fn of(data_type: &str) -> Self {
        let t = data_type.to_ascii_uppercase();
        if t.contains("INT") {
            Self::Integer
        } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
            Self::Text
        } else if t.contains("BLOB") || t.trim().is_empty() {
            Self::Blob
        } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
            Self::Real
        } else {
            Self::Numeric
        }
    }
}

impl Flavor for SqliteFlavor {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn is_widening(&self, from: &str, to: &str) -> bool {
        Affinity::of(from) == Affinity::of(to)
            || is_known_widening(&TypeName::parse(from), &TypeName::parse(to))
    }

    // An AUTOINCREMENT key is stored as INTEGER whatever integer type was declared.
    fn column_type_change(&self, previous: &Column, next: &Column) -> Option<ColumnTypeChange> {
        let integer_keys = previous.auto_increment
            && next.auto_increment
            && Affinity::of(&previous.data_type) == Affinity::Integer
            && Affinity::of(&next.data_type) == Affinity::Integer;
        if integer_keys || self.normalize_type(&previous.data_type) == self.normalize_type(&next.data_type) {
            return None;
        }
        Some(ColumnTypeChange {
            is_safe: self.is_widening(&previous.data_type, &next.data_type),
            from_type: previous.data_type.clone(),
            to_type: next.data_type.clone(),
        })
    }

    fn should_redefine_table(&self, _table: &str, changes: &[Change]) -> bool {
        !changes.is_empty()
    }

    fn can_rename_index(&self) -> bool {
        false
    }

    fn tracks_foreign_key_names(&self) -> bool {
        false
    }

    fn table_should_be_ignored(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(crate::history::MIGRATIONS_TABLE)
            || name.to_ascii_lowercase().starts_with(SQLITE_INTERNAL_PREFIX)
    }
}
