//! MySQL flavor.

use super::{Dialect, Flavor, TypeName, is_known_widening};

/// MySQL: case-folded table names, auto-committed DDL, no constraint renames.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlFlavor;

impl MySqlFlavor {
    fn canonical(data_type: &str) -> TypeName {
        let mut parsed = TypeName::parse(data_type);
        let unsigned = parsed.base.ends_with(" UNSIGNED");
        let base = parsed.base.trim_end_matches(" UNSIGNED").to_string();

        let base = match base.as_str() {
            "INTEGER" => "INT".to_string(),
            "BOOL" | "BOOLEAN" => "TINYINT".to_string(),
            "NUMERIC" => "DECIMAL".to_string(),
            "REAL" | "DOUBLE PRECISION" => "DOUBLE".to_string(),
            "CHARACTER VARYING" => "VARCHAR".to_string(),
            "CHARACTER" => "CHAR".to_string(),
            _ => base,
        };

        // Integer display widths carry no meaning for storage.
        if matches!(base.as_str(), "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT") {
            parsed.params.clear();
        }

        parsed.base = if unsigned {
            format!("{} UNSIGNED", base)
        } else {
            base
        };
        parsed
    }
}

impl Flavor for MySqlFlavor {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn normalize_type(&self, data_type: &str) -> String {
        Self::canonical(data_type).to_string()
    }

    fn is_widening(&self, from: &str, to: &str) -> bool {
        let from = Self::canonical(from);
        let to = Self::canonical(to);
        // Signedness changes are never widening.
        if from.base.ends_with(" UNSIGNED") != to.base.ends_with(" UNSIGNED") {
            return false;
        }
        let strip = |t: TypeName| {
            let base = t.base.trim_end_matches(" UNSIGNED").to_string();
            TypeName { base, ..t }
        };
        is_known_widening(&strip(from), &strip(to))
    }

    fn lowercases_table_names(&self) -> bool {
        true
    }

    fn supports_transactional_ddl(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    #[test]
    fn test_type_aliases() {
        let f = MySqlFlavor;
        assert_eq!(f.normalize_type("integer"), "INT");
        assert_eq!(f.normalize_type("int(11)"), "INT");
        assert_eq!(f.normalize_type("bool"), "TINYINT");
        assert_eq!(f.normalize_type("tinyint(1)"), "TINYINT");
        assert_eq!(f.normalize_type("int(10) unsigned"), "INT UNSIGNED");
        assert_eq!(f.normalize_type("varchar(191)"), "VARCHAR(191)");
    }

    #[test]
    fn test_signedness_change_is_unsafe() {
        let f = MySqlFlavor;
        let change = f
            .column_type_change(&Column::new("n", "INT UNSIGNED"), &Column::new("n", "BIGINT"))
            .unwrap();
        assert!(!change.is_safe);

        let change = f
            .column_type_change(&Column::new("n", "INT"), &Column::new("n", "BIGINT"))
            .unwrap();
        assert!(change.is_safe);

        let change = f
            .column_type_change(&Column::new("n", "TEXT"), &Column::new("n", "LONGTEXT"))
            .unwrap();
        assert!(change.is_safe);
    }

    #[test]
    fn test_table_names_fold_case() {
        let f = MySqlFlavor;
        assert!(f.lowercases_table_names());
        assert!(f.table_names_equal("Users", "users"));
        assert!(f.table_should_be_ignored("_MIGRATIONS"));
    }

    #[test]
    fn test_capabilities() {
        let f = MySqlFlavor;
        assert!(f.can_rename_index());
        assert!(!f.can_rename_foreign_key());
        assert!(!f.supports_transactional_ddl());
        assert!(!f.supports_named_enums());
    }
}
