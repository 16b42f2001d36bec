//! PostgreSQL flavor.

use super::{Dialect, Flavor, TypeName, is_known_widening, normalize_default};

/// PostgreSQL: transactional DDL, renamable indexes and constraints,
/// named enums and sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresFlavor;

impl PostgresFlavor {
    fn canonical(data_type: &str) -> TypeName {
        let parsed = TypeName::parse(data_type);
        let base = match parsed.base.as_str() {
            "INT" | "INT4" | "SERIAL" | "SERIAL4" => "INTEGER",
            "INT2" | "SMALLSERIAL" | "SERIAL2" => "SMALLINT",
            "INT8" | "BIGSERIAL" | "SERIAL8" => "BIGINT",
            "BOOL" => "BOOLEAN",
            "CHARACTER VARYING" => "VARCHAR",
            "CHARACTER" | "BPCHAR" => "CHAR",
            "NUMERIC" => "DECIMAL",
            "FLOAT4" => "REAL",
            "FLOAT8" | "DOUBLE" => "DOUBLE PRECISION",
            "FLOAT" if parsed.param(0).is_none_or(|p| p > 24) => "DOUBLE PRECISION",
            "FLOAT" => "REAL",
            "TIMESTAMPTZ" => "TIMESTAMP WITH TIME ZONE",
            "TIMESTAMP WITHOUT TIME ZONE" => "TIMESTAMP",
            "TIMETZ" => "TIME WITH TIME ZONE",
            "TIME WITHOUT TIME ZONE" => "TIME",
            _ => return parsed,
        };
        let params = if base == "DOUBLE PRECISION" || base == "REAL" {
            Vec::new()
        } else {
            parsed.params
        };
        TypeName {
            base: base.to_string(),
            params,
        }
    }
}

/// Drop a trailing `::type` cast that the catalog adds to literal defaults.
fn strip_casts(expr: &str) -> &str {
    let mut s = expr.trim();
    while let Some(pos) = s.rfind("::") {
        let tail = &s[pos + 2..];
        if tail.contains('\'') || (tail.contains(')') && !tail.contains('(')) {
            break;
        }
        s = s[..pos].trim_end();
    }
    s
}

impl Flavor for PostgresFlavor {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn normalize_type(&self, data_type: &str) -> String {
        Self::canonical(data_type).to_string()
    }

    fn is_widening(&self, from: &str, to: &str) -> bool {
        is_known_widening(&Self::canonical(from), &Self::canonical(to))
    }

    fn defaults_match(&self, a: Option<&str>, b: Option<&str>) -> bool {
        a.map(|d| normalize_default(strip_casts(d))) == b.map(|d| normalize_default(strip_casts(d)))
    }

    fn can_rename_foreign_key(&self) -> bool {
        true
    }

    fn supports_named_enums(&self) -> bool {
        true
    }

    fn supports_sequences(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ForeignKey, Index};

    #[test]
    fn test_type_aliases_are_equivalent() {
        let f = PostgresFlavor;
        assert_eq!(f.normalize_type("int4"), "INTEGER");
        assert_eq!(f.normalize_type("SERIAL"), "INTEGER");
        assert_eq!(f.normalize_type("character varying(255)"), "VARCHAR(255)");
        assert_eq!(f.normalize_type("timestamptz"), "TIMESTAMP WITH TIME ZONE");
        assert_eq!(f.normalize_type("float8"), "DOUBLE PRECISION");
        assert_eq!(f.normalize_type("numeric(10,2)"), "DECIMAL(10,2)");

        let a = Column::new("n", "int8");
        let b = Column::new("n", "BIGINT");
        assert!(f.column_type_change(&a, &b).is_none());
    }

    #[test]
    fn test_type_change_safety() {
        let f = PostgresFlavor;
        let change = f
            .column_type_change(&Column::new("c", "VARCHAR(50)"), &Column::new("c", "varchar(255)"))
            .unwrap();
        assert!(change.is_safe);
        assert_eq!(change.from_type, "VARCHAR(50)");

        let change = f
            .column_type_change(&Column::new("c", "VARCHAR(50)"), &Column::new("c", "INTEGER"))
            .unwrap();
        assert!(!change.is_safe);

        let change = f
            .column_type_change(&Column::new("c", "int2"), &Column::new("c", "int8"))
            .unwrap();
        assert!(change.is_safe);
    }

    #[test]
    fn test_defaults_ignore_casts() {
        let f = PostgresFlavor;
        assert!(f.defaults_match(Some("'active'::character varying"), Some("'active'")));
        assert!(f.defaults_match(Some("now()"), Some("NOW()")));
        assert!(!f.defaults_match(Some("'a'"), Some("'b'")));
        assert!(!f.defaults_match(Some("0"), None));
    }

    #[test]
    fn test_capabilities() {
        let f = PostgresFlavor;
        assert!(f.can_rename_index());
        assert!(f.can_rename_foreign_key());
        assert!(!f.lowercases_table_names());
        assert!(f.supports_transactional_ddl());
        assert!(f.table_should_be_ignored("_migrations"));
        assert!(!f.table_should_be_ignored("users"));
    }

    #[test]
    fn test_rename_decisions() {
        let f = PostgresFlavor;
        let old = Index::unique("idx_old", ["email"]);
        let new = Index::unique("idx_new", ["email"]);
        assert!(f.index_should_be_renamed(&old, &new));
        assert!(!f.index_should_be_renamed(&old, &Index::new("idx_new", ["email"])));

        let a = ForeignKey::new("fk_a", ["user_id"], "users", ["id"]);
        let b = ForeignKey::new("fk_b", ["user_id"], "users", ["id"]);
        assert!(f.foreign_key_should_be_renamed(&a, &b));
    }
}
