//! Schema diffing.
//!
//! [`SchemaDiffer`] compares a current snapshot with a target snapshot under a
//! [`Flavor`] and produces a [`DiffResult`]. Every change carries the prior
//! structure it replaces, so rollback SQL can be generated without looking at
//! the database again.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{MigrateResult, MigrationError};
use crate::flavor::{ColumnTypeChange, Flavor};
use crate::schema::{Column, DatabaseSchema, EnumType, ForeignKey, Index, PrimaryKey, Sequence, Table};

/// The kind of a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Column added.
    AddColumn,
    /// Column removed.
    DropColumn,
    /// Column type, nullability or default changed.
    AlterColumn,
    /// Index added.
    CreateIndex,
    /// Index removed.
    DropIndex,
    /// Index renamed in place.
    RenameIndex,
    /// Foreign key added.
    CreateForeignKey,
    /// Foreign key removed.
    DropForeignKey,
    /// Foreign key renamed in place.
    RenameForeignKey,
    /// Primary key columns changed.
    AlterPrimaryKey,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AddColumn => "add column",
            Self::DropColumn => "drop column",
            Self::AlterColumn => "alter column",
            Self::CreateIndex => "create index",
            Self::DropIndex => "drop index",
            Self::RenameIndex => "rename index",
            Self::CreateForeignKey => "create foreign key",
            Self::DropForeignKey => "drop foreign key",
            Self::RenameForeignKey => "rename foreign key",
            Self::AlterPrimaryKey => "alter primary key",
        };
        f.write_str(s)
    }
}

/// What a change does, with the structure needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDetail {
    /// Add a column.
    AddColumn(Column),
    /// Drop a column; holds its full prior definition.
    DropColumn(Column),
    /// Alter a column.
    AlterColumn {
        /// Definition before.
        previous: Column,
        /// Definition after.
        next: Column,
        /// Set when the type itself changed.
        type_change: Option<ColumnTypeChange>,
    },
    /// Create an index.
    CreateIndex(Index),
    /// Drop an index.
    DropIndex {
        /// The index being dropped.
        index: Index,
        /// Part of a drop and create pair emulating a rename.
        emulates_rename: bool,
    },
    /// Rename an index.
    RenameIndex {
        /// Index before.
        previous: Index,
        /// Index after.
        next: Index,
    },
    /// Create a foreign key.
    CreateForeignKey(ForeignKey),
    /// Drop a foreign key.
    DropForeignKey {
        /// The foreign key being dropped.
        foreign_key: ForeignKey,
        /// Part of a drop and create pair emulating a rename.
        emulates_rename: bool,
    },
    /// Rename a foreign key.
    RenameForeignKey {
        /// Constraint before.
        previous: ForeignKey,
        /// Constraint after.
        next: ForeignKey,
    },
    /// Replace the primary key.
    AlterPrimaryKey {
        /// Key before.
        previous: Option<PrimaryKey>,
        /// Key after.
        next: Option<PrimaryKey>,
    },
}

/// One structural change to one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Owning table.
    pub table: String,
    /// What changes.
    pub detail: ChangeDetail,
    /// False when applying the change can discard data or integrity.
    pub is_safe: bool,
    /// Human-readable warnings.
    pub warnings: Vec<String>,
}

impl Change {
    fn new(table: &str, detail: ChangeDetail) -> Self {
        Self {
            table: table.to_string(),
            detail,
            is_safe: true,
            warnings: Vec::new(),
        }
    }

    fn unsafe_because(mut self, warning: String) -> Self {
        self.is_safe = false;
        self.warnings.push(warning);
        self
    }

    fn warn(mut self, warning: String) -> Self {
        self.warnings.push(warning);
        self
    }

    /// The change kind.
    pub fn kind(&self) -> ChangeKind {
        match &self.detail {
            ChangeDetail::AddColumn(_) => ChangeKind::AddColumn,
            ChangeDetail::DropColumn(_) => ChangeKind::DropColumn,
            ChangeDetail::AlterColumn { .. } => ChangeKind::AlterColumn,
            ChangeDetail::CreateIndex(_) => ChangeKind::CreateIndex,
            ChangeDetail::DropIndex { .. } => ChangeKind::DropIndex,
            ChangeDetail::RenameIndex { .. } => ChangeKind::RenameIndex,
            ChangeDetail::CreateForeignKey(_) => ChangeKind::CreateForeignKey,
            ChangeDetail::DropForeignKey { .. } => ChangeKind::DropForeignKey,
            ChangeDetail::RenameForeignKey { .. } => ChangeKind::RenameForeignKey,
            ChangeDetail::AlterPrimaryKey { .. } => ChangeKind::AlterPrimaryKey,
        }
    }

    /// Name of the affected column, index or foreign key.
    pub fn subject(&self) -> &str {
        match &self.detail {
            ChangeDetail::AddColumn(c) | ChangeDetail::DropColumn(c) => &c.name,
            ChangeDetail::AlterColumn { next, .. } => &next.name,
            ChangeDetail::CreateIndex(i) | ChangeDetail::DropIndex { index: i, .. } => &i.name,
            ChangeDetail::RenameIndex { next, .. } => &next.name,
            ChangeDetail::CreateForeignKey(fk) | ChangeDetail::DropForeignKey { foreign_key: fk, .. } => {
                &fk.name
            }
            ChangeDetail::RenameForeignKey { next, .. } => &next.name,
            ChangeDetail::AlterPrimaryKey { .. } => "PRIMARY KEY",
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.kind(), self.table, self.subject())?;
        if !self.is_safe {
            f.write_str(" (unsafe)")?;
        }
        Ok(())
    }
}

/// All changes to a table present in both snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAlter {
    /// The table as it is.
    pub previous: Table,
    /// The table as it should be.
    pub next: Table,
    /// Incremental changes, also kept for reporting when `redefine` is set.
    pub changes: Vec<Change>,
    /// Rebuild the table instead of rendering `changes` one by one.
    pub redefine: bool,
}

impl TableAlter {
    /// Table name in the target schema.
    pub fn name(&self) -> &str {
        self.next.name()
    }
}

/// Changes to a named enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumAlter {
    /// Enum before.
    pub previous: EnumType,
    /// Enum after.
    pub next: EnumType,
    /// Values to add, in target order.
    pub added_values: Vec<String>,
    /// Values present before but not after. Reported, never dropped.
    pub removed_values: Vec<String>,
}

/// Changes to a sequence's parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceAlter {
    /// Sequence before.
    pub previous: Sequence,
    /// Sequence after.
    pub next: Sequence,
}

/// The result of comparing two schemas. Immutable once computed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    tables_to_create: Vec<Table>,
    tables_to_drop: Vec<Table>,
    tables_to_alter: Vec<TableAlter>,
    enums_to_create: Vec<EnumType>,
    enums_to_drop: Vec<EnumType>,
    enums_to_alter: Vec<EnumAlter>,
    sequences_to_create: Vec<Sequence>,
    sequences_to_drop: Vec<Sequence>,
    sequences_to_alter: Vec<SequenceAlter>,
    changes: Vec<Change>,
    warnings: Vec<String>,
}

impl DiffResult {
    /// New tables, ordered so referenced tables come first.
    pub fn tables_to_create(&self) -> &[Table] {
        &self.tables_to_create
    }

    /// Removed tables with their full definitions, dependents first.
    pub fn tables_to_drop(&self) -> &[Table] {
        &self.tables_to_drop
    }

    /// Tables present in both snapshots that changed.
    pub fn tables_to_alter(&self) -> &[TableAlter] {
        &self.tables_to_alter
    }

    /// New enum types.
    pub fn enums_to_create(&self) -> &[EnumType] {
        &self.enums_to_create
    }

    /// Removed enum types.
    pub fn enums_to_drop(&self) -> &[EnumType] {
        &self.enums_to_drop
    }

    /// Changed enum types.
    pub fn enums_to_alter(&self) -> &[EnumAlter] {
        &self.enums_to_alter
    }

    /// New sequences.
    pub fn sequences_to_create(&self) -> &[Sequence] {
        &self.sequences_to_create
    }

    /// Removed sequences.
    pub fn sequences_to_drop(&self) -> &[Sequence] {
        &self.sequences_to_drop
    }

    /// Sequences with new parameters.
    pub fn sequences_to_alter(&self) -> &[SequenceAlter] {
        &self.sequences_to_alter
    }

    /// Every table-level change, flattened.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Every warning: diff-level ones first, then per change.
    pub fn warnings(&self) -> Vec<&str> {
        self.warnings
            .iter()
            .chain(self.changes.iter().flat_map(|c| c.warnings.iter()))
            .map(String::as_str)
            .collect()
    }

    /// Changes that can discard data or integrity.
    pub fn unsafe_changes(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| !c.is_safe)
    }

    /// Whether applying this diff can lose data.
    pub fn is_destructive(&self) -> bool {
        self.unsafe_changes().next().is_some()
            || !self.tables_to_drop.is_empty()
            || !self.enums_to_drop.is_empty()
            || !self.sequences_to_drop.is_empty()
    }

    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.tables_to_create.is_empty()
            && self.tables_to_drop.is_empty()
            && self.tables_to_alter.is_empty()
            && self.enums_to_create.is_empty()
            && self.enums_to_drop.is_empty()
            && self.enums_to_alter.is_empty()
            && self.sequences_to_create.is_empty()
            && self.sequences_to_drop.is_empty()
            && self.sequences_to_alter.is_empty()
    }

    /// Get a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.tables_to_create.is_empty() {
            parts.push(format!("Create {} tables", self.tables_to_create.len()));
        }
        if !self.tables_to_drop.is_empty() {
            parts.push(format!("Drop {} tables", self.tables_to_drop.len()));
        }
        if !self.tables_to_alter.is_empty() {
            parts.push(format!(
                "Alter {} tables ({} changes)",
                self.tables_to_alter.len(),
                self.changes.len()
            ));
        }
        let enums = self.enums_to_create.len() + self.enums_to_drop.len() + self.enums_to_alter.len();
        if enums > 0 {
            parts.push(format!("{} enum changes", enums));
        }
        let sequences =
            self.sequences_to_create.len() + self.sequences_to_drop.len() + self.sequences_to_alter.len();
        if sequences > 0 {
            parts.push(format!("{} sequence changes", sequences));
        }

        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Compares two schema snapshots under a flavor.
pub struct SchemaDiffer<'f> {
    flavor: &'f dyn Flavor,
}

impl<'f> SchemaDiffer<'f> {
    /// Create a differ for a flavor.
    pub fn new(flavor: &'f dyn Flavor) -> Self {
        Self { flavor }
    }

    /// Compute the changes that turn `current` into `target`.
    pub fn diff(&self, current: &DatabaseSchema, target: &DatabaseSchema) -> MigrateResult<DiffResult> {
        let mut result = DiffResult::default();

        let current_tables = self.keyed(current)?;
        let target_tables = self.keyed(target)?;

        let mut created = Vec::new();
        for table in self.tracked(target) {
            match current_tables.get(&self.key(table)) {
                None => created.push(table),
                Some(previous) => {
                    if let Some(alter) = self.diff_table(previous, table) {
                        result.changes.extend(alter.changes.iter().cloned());
                        result.tables_to_alter.push(alter);
                    }
                }
            }
        }
        result.tables_to_create = self.creation_order(&created)?;

        let dropped: Vec<&Table> = self
            .tracked(current)
            .filter(|t| !target_tables.contains_key(&self.key(t)))
            .collect();
        result.tables_to_drop = self.drop_order(&dropped);
        for table in &result.tables_to_drop {
            result.warnings.push(format!(
                "dropping table {} will discard all of its data",
                table.name()
            ));
        }

        if self.flavor.supports_named_enums() {
            self.diff_enums(current, target, &mut result);
        }
        if self.flavor.supports_sequences() {
            self.diff_sequences(current, target, &mut result);
        }

        tracing::debug!(
            dialect = %self.flavor.dialect(),
            summary = %result.summary(),
            "Computed schema diff"
        );

        Ok(result)
    }

    fn tracked<'s>(&self, schema: &'s DatabaseSchema) -> impl Iterator<Item = &'s Table> {
        schema
            .tables()
            .iter()
            .filter(|t| !self.flavor.table_should_be_ignored(t.name()))
    }

    /// Tracked tables by key. Names the dialect folds together are rejected.
    fn keyed<'s>(&self, schema: &'s DatabaseSchema) -> MigrateResult<HashMap<String, &'s Table>> {
        let mut tables: HashMap<String, &Table> = HashMap::new();
        for table in self.tracked(schema) {
            if let Some(other) = tables.insert(self.key(table), table) {
                return Err(MigrationError::schema_model(format!(
                    "tables {} and {} have the same name in {}",
                    other.name(),
                    table.name(),
                    self.flavor.dialect().name()
                )));
            }
        }
        Ok(tables)
    }

    fn key(&self, table: &Table) -> String {
        let name = self.flavor.table_key(table.name());
        match table.schema() {
            Some(schema) => format!("{}.{}", schema, name),
            None => name,
        }
    }

    fn diff_table(&self, previous: &Table, next: &Table) -> Option<TableAlter> {
        let name = next.name();
        let mut changes = Vec::new();

        self.diff_columns(name, previous, next, &mut changes);
        self.diff_primary_key(name, previous, next, &mut changes);
        self.diff_indexes(name, previous.indexes(), next.indexes(), &mut changes);
        self.diff_foreign_keys(name, previous.foreign_keys(), next.foreign_keys(), &mut changes);

        if changes.is_empty() {
            return None;
        }

        let redefine = self.flavor.should_redefine_table(name, &changes);
        Some(TableAlter {
            previous: previous.clone(),
            next: next.clone(),
            changes,
            redefine,
        })
    }

    fn diff_columns(&self, table: &str, previous: &Table, next: &Table, changes: &mut Vec<Change>) {
        for column in next.columns() {
            match previous.column(&column.name) {
                None => {
                    let mut change = Change::new(table, ChangeDetail::AddColumn(column.clone()));
                    if !column.nullable && column.default_value.is_none() && !column.auto_increment {
                        change = change.warn(format!(
                            "adding NOT NULL column {}.{} without a default fails if the table has rows",
                            table, column.name
                        ));
                    }
                    changes.push(change);
                }
                Some(old) => {
                    if let Some(change) = self.diff_column(table, old, column) {
                        changes.push(change);
                    }
                }
            }
        }

        for column in previous.columns() {
            if next.column(&column.name).is_none() {
                changes.push(
                    Change::new(table, ChangeDetail::DropColumn(column.clone())).unsafe_because(format!(
                        "dropping column {}.{} will discard its data",
                        table, column.name
                    )),
                );
            }
        }
    }

    fn diff_column(&self, table: &str, previous: &Column, next: &Column) -> Option<Change> {
        let type_change = self.flavor.column_type_change(previous, next);
        let nullability_changed = previous.nullable != next.nullable;
        // Generated columns carry catalog-assigned defaults.
        let default_changed = !previous.auto_increment
            && !next.auto_increment
            && !self
                .flavor
                .defaults_match(previous.default_value.as_deref(), next.default_value.as_deref());

        if type_change.is_none() && !nullability_changed && !default_changed {
            return None;
        }

        let mut change = Change::new(
            table,
            ChangeDetail::AlterColumn {
                previous: previous.clone(),
                next: next.clone(),
                type_change: type_change.clone(),
            },
        );
        if let Some(tc) = type_change.filter(|tc| !tc.is_safe) {
            change = change.unsafe_because(format!(
                "changing {}.{} from {} to {} may discard or truncate data",
                table, next.name, tc.from_type, tc.to_type
            ));
        }
        if previous.nullable && !next.nullable {
            change = change.warn(format!(
                "setting {}.{} NOT NULL fails if existing rows contain NULL",
                table, next.name
            ));
        }
        Some(change)
    }

    fn diff_primary_key(&self, table: &str, previous: &Table, next: &Table, changes: &mut Vec<Change>) {
        let old = previous.primary_key().map(|pk| &pk.columns);
        let new = next.primary_key().map(|pk| &pk.columns);
        if old == new {
            return;
        }
        changes.push(
            Change::new(
                table,
                ChangeDetail::AlterPrimaryKey {
                    previous: previous.primary_key().cloned(),
                    next: next.primary_key().cloned(),
                },
            )
            .unsafe_because(format!(
                "changing the primary key of {} fails if the new key columns contain duplicates",
                table
            )),
        );
    }

    fn diff_indexes(&self, table: &str, previous: &[Index], next: &[Index], changes: &mut Vec<Change>) {
        let mut consumed = vec![false; previous.len()];
        let mut unmatched = Vec::new();

        for index in next {
            let same_name = previous
                .iter()
                .position(|p| p.name == index.name && self.flavor.indexes_match(p, index));
            match same_name {
                Some(pos) => consumed[pos] = true,
                None => unmatched.push(index),
            }
        }

        for index in unmatched {
            let candidate = previous
                .iter()
                .enumerate()
                .find(|(pos, p)| !consumed[*pos] && self.flavor.indexes_match(p, index));

            let Some((pos, old)) = candidate else {
                changes.push(Change::new(table, ChangeDetail::CreateIndex(index.clone())));
                continue;
            };
            consumed[pos] = true;

            if self.flavor.index_should_be_renamed(old, index) {
                changes.push(Change::new(
                    table,
                    ChangeDetail::RenameIndex {
                        previous: old.clone(),
                        next: index.clone(),
                    },
                ));
            } else {
                let warning = format!(
                    "renaming index {} to {} on {} is emulated by dropping and recreating it",
                    old.name, index.name, table
                );
                changes.push(
                    Change::new(
                        table,
                        ChangeDetail::DropIndex {
                            index: old.clone(),
                            emulates_rename: true,
                        },
                    )
                    .warn(warning),
                );
                changes.push(Change::new(table, ChangeDetail::CreateIndex(index.clone())));
            }
        }

        for (pos, old) in previous.iter().enumerate() {
            if !consumed[pos] {
                changes.push(
                    Change::new(
                        table,
                        ChangeDetail::DropIndex {
                            index: old.clone(),
                            emulates_rename: false,
                        },
                    )
                    .unsafe_because(format!("dropping index {} on {}", old.name, table)),
                );
            }
        }
    }

    fn diff_foreign_keys(
        &self,
        table: &str,
        previous: &[ForeignKey],
        next: &[ForeignKey],
        changes: &mut Vec<Change>,
    ) {
        let mut consumed = vec![false; previous.len()];
        let mut unmatched = Vec::new();

        for fk in next {
            let same = previous.iter().position(|p| {
                self.flavor.foreign_keys_match(p, fk)
                    && (p.name == fk.name || !self.flavor.tracks_foreign_key_names())
            });
            match same {
                Some(pos) if !consumed[pos] => consumed[pos] = true,
                _ => unmatched.push(fk),
            }
        }

        for fk in unmatched {
            let candidate = previous
                .iter()
                .enumerate()
                .find(|(pos, p)| !consumed[*pos] && self.flavor.foreign_keys_match(p, fk));

            let Some((pos, old)) = candidate else {
                changes.push(Change::new(table, ChangeDetail::CreateForeignKey(fk.clone())));
                continue;
            };
            consumed[pos] = true;

            if self.flavor.foreign_key_should_be_renamed(old, fk) {
                changes.push(Change::new(
                    table,
                    ChangeDetail::RenameForeignKey {
                        previous: old.clone(),
                        next: fk.clone(),
                    },
                ));
            } else {
                let warning = format!(
                    "renaming foreign key {} to {} on {} is emulated by dropping and recreating it",
                    old.name, fk.name, table
                );
                changes.push(
                    Change::new(
                        table,
                        ChangeDetail::DropForeignKey {
                            foreign_key: old.clone(),
                            emulates_rename: true,
                        },
                    )
                    .warn(warning),
                );
                changes.push(Change::new(table, ChangeDetail::CreateForeignKey(fk.clone())));
            }
        }

        for (pos, old) in previous.iter().enumerate() {
            if !consumed[pos] {
                changes.push(
                    Change::new(
                        table,
                        ChangeDetail::DropForeignKey {
                            foreign_key: old.clone(),
                            emulates_rename: false,
                        },
                    )
                    .unsafe_because(format!(
                        "dropping foreign key {} on {} removes referential integrity checks",
                        old.name, table
                    )),
                );
            }
        }
    }

    fn diff_enums(&self, current: &DatabaseSchema, target: &DatabaseSchema, result: &mut DiffResult) {
        for next in target.enums() {
            match current.enums().iter().find(|e| e.name == next.name) {
                None => result.enums_to_create.push(next.clone()),
                Some(previous) if previous.values != next.values => {
                    let added_values: Vec<String> = next
                        .values
                        .iter()
                        .filter(|v| !previous.values.contains(v))
                        .cloned()
                        .collect();
                    let removed_values: Vec<String> = previous
                        .values
                        .iter()
                        .filter(|v| !next.values.contains(v))
                        .cloned()
                        .collect();
                    if !removed_values.is_empty() {
                        result.warnings.push(format!(
                            "enum {} no longer declares {}; values cannot be removed and are kept",
                            next.name,
                            removed_values.join(", ")
                        ));
                    }
                    if added_values.is_empty() {
                        // Reordering or removal only; nothing to render.
                        continue;
                    }
                    result.enums_to_alter.push(EnumAlter {
                        previous: previous.clone(),
                        next: next.clone(),
                        added_values,
                        removed_values,
                    });
                }
                Some(_) => {}
            }
        }

        for previous in current.enums() {
            if !target.enums().iter().any(|e| e.name == previous.name) {
                result
                    .warnings
                    .push(format!("dropping enum {} fails if a column still uses it", previous.name));
                result.enums_to_drop.push(previous.clone());
            }
        }
    }

    fn diff_sequences(&self, current: &DatabaseSchema, target: &DatabaseSchema, result: &mut DiffResult) {
        for next in target.sequences() {
            match current.sequences().iter().find(|s| s.name == next.name) {
                None => result.sequences_to_create.push(next.clone()),
                Some(previous) if previous != next => result.sequences_to_alter.push(SequenceAlter {
                    previous: previous.clone(),
                    next: next.clone(),
                }),
                Some(_) => {}
            }
        }

        for previous in current.sequences() {
            if !target.sequences().iter().any(|s| s.name == previous.name) {
                result.sequences_to_drop.push(previous.clone());
            }
        }
    }

    /// Topologically sort new tables so referenced tables are created first.
    fn creation_order(&self, tables: &[&Table]) -> MigrateResult<Vec<Table>> {
        let graph = DependencyGraph::new(self, tables);
        let order = graph.sort().map_err(|cycle| MigrationError::CyclicDependency {
            cycle: cycle.into_iter().map(|i| tables[i].name().to_string()).collect(),
        })?;
        Ok(order.into_iter().map(|i| tables[i].clone()).collect())
    }

    /// Dependents first. Cycles are broken arbitrarily; their foreign keys
    /// are dropped along with the tables.
    fn drop_order(&self, tables: &[&Table]) -> Vec<Table> {
        let graph = DependencyGraph::new(self, tables);
        let mut order = graph.sort_lenient();
        order.reverse();
        order.into_iter().map(|i| tables[i].clone()).collect()
    }
}

/// Foreign key dependencies among a set of tables, by position.
struct DependencyGraph {
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    fn new(differ: &SchemaDiffer<'_>, tables: &[&Table]) -> Self {
        let positions: HashMap<String, usize> = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (differ.flavor.table_key(t.name()), i))
            .collect();

        let edges = tables
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut deps = Vec::new();
                let mut seen = HashSet::new();
                for fk in t.foreign_keys() {
                    if let Some(&dep) = positions.get(&differ.flavor.table_key(&fk.referenced_table)) {
                        if dep != i && seen.insert(dep) {
                            deps.push(dep);
                        }
                    }
                }
                deps
            })
            .collect();

        Self { edges }
    }

    /// Dependencies first, ties kept in input order. Returns the cycle on failure.
    fn sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut state = vec![Visit::New; self.edges.len()];
        let mut order = Vec::with_capacity(self.edges.len());
        let mut stack = Vec::new();
        for node in 0..self.edges.len() {
            self.visit(node, &mut state, &mut stack, &mut order, true)?;
        }
        Ok(order)
    }

    fn sort_lenient(&self) -> Vec<usize> {
        let mut state = vec![Visit::New; self.edges.len()];
        let mut order = Vec::with_capacity(self.edges.len());
        let mut stack = Vec::new();
        for node in 0..self.edges.len() {
            // Back edges are skipped rather than reported.
            let _ = self.visit(node, &mut state, &mut stack, &mut order, false);
        }
        order
    }

    fn visit(
        &self,
        node: usize,
        state: &mut [Visit],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
        strict: bool,
    ) -> Result<(), Vec<usize>> {
        match state[node] {
            Visit::Done => return Ok(()),
            Visit::Active if strict => {
                let start = stack.iter().position(|&n| n == node).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(node);
                return Err(cycle);
            }
            Visit::Active => return Ok(()),
            Visit::New => {}
        }

        state[node] = Visit::Active;
        stack.push(node);
        for &dep in &self.edges[node] {
            self.visit(dep, state, stack, order, strict)?;
        }
        stack.pop();
        state[node] = Visit::Done;
        order.push(node);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

/// Diff two schemas under a flavor.
pub fn diff(current: &DatabaseSchema, target: &DatabaseSchema, flavor: &dyn Flavor) -> MigrateResult<DiffResult> {
    SchemaDiffer::new(flavor).diff(current, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flavor::{Dialect, MySqlFlavor, PostgresFlavor, SqliteFlavor};
    use crate::schema::{Column, ForeignKey, Index, PrimaryKey, ReferentialAction};
    use pretty_assertions::assert_eq;

    fn users(extra: impl FnOnce(crate::schema::TableBuilder) -> crate::schema::TableBuilder) -> Table {
        extra(
            Table::builder("users")
                .column(Column::new("id", "INTEGER").auto_increment())
                .column(Column::new("email", "VARCHAR(255)").not_null())
                .primary_key(PrimaryKey::new(["id"])),
        )
        .build()
        .unwrap()
    }

    fn posts(fk_name: &str) -> Table {
        Table::builder("posts")
            .column(Column::new("id", "INTEGER").auto_increment())
            .column(Column::new("user_id", "INTEGER").not_null())
            .primary_key(PrimaryKey::new(["id"]))
            .foreign_key(
                ForeignKey::new(fk_name, ["user_id"], "users", ["id"]).on_delete(ReferentialAction::Cascade),
            )
            .build()
            .unwrap()
    }

    fn schema(tables: Vec<Table>) -> DatabaseSchema {
        tables
            .into_iter()
            .fold(DatabaseSchema::builder(), |b, t| b.table(t))
            .build()
            .unwrap()
    }

    fn kinds(diff: &DiffResult) -> Vec<ChangeKind> {
        diff.changes().iter().map(Change::kind).collect()
    }

    #[test]
    fn test_self_diff_is_empty() {
        let s = DatabaseSchema::builder()
            .table(users(|t| t.index(Index::unique("users_email_key", ["email"]))))
            .table(posts("posts_user_id_fkey"))
            .enum_type(EnumType::new("mood", ["happy", "sad"]))
            .sequence(Sequence::new("invoice_seq"))
            .build()
            .unwrap();

        for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::Sqlite] {
            let d = diff(&s, &s, dialect.flavor()).unwrap();
            assert!(d.is_empty(), "{dialect}: {}", d.summary());
            assert!(d.warnings().is_empty());
        }
    }

    #[test]
    fn test_add_column_and_unique_index() {
        let current = schema(vec![users(|t| t)]);
        let target = schema(vec![users(|t| {
            t.column(Column::new("name", "VARCHAR(255)"))
                .index(Index::unique("users_email_key", ["email"]))
        })]);

        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        assert_eq!(kinds(&d), vec![ChangeKind::AddColumn, ChangeKind::CreateIndex]);
        assert!(d.changes().iter().all(|c| c.is_safe));
        assert_eq!(d.changes()[0].subject(), "name");
        assert!(!d.tables_to_alter()[0].redefine);
        assert!(!d.is_destructive());
    }

    #[test]
    fn test_drop_column_is_unsafe() {
        let current = schema(vec![users(|t| t.column(Column::new("name", "TEXT")))]);
        let target = schema(vec![users(|t| t)]);

        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        let change = &d.changes()[0];
        assert_eq!(change.kind(), ChangeKind::DropColumn);
        assert!(!change.is_safe);
        assert!(change.warnings[0].contains("discard"));
        assert!(d.is_destructive());
    }

    #[test]
    fn test_alter_column_safety() {
        let current = schema(vec![users(|t| t.column(Column::new("bio", "VARCHAR(50)")))]);
        let widened = schema(vec![users(|t| t.column(Column::new("bio", "VARCHAR(500)")))]);
        let narrowed = schema(vec![users(|t| t.column(Column::new("bio", "INTEGER")))]);

        let d = diff(&current, &widened, &PostgresFlavor).unwrap();
        assert_eq!(kinds(&d), vec![ChangeKind::AlterColumn]);
        assert!(d.changes()[0].is_safe);

        let d = diff(&current, &narrowed, &PostgresFlavor).unwrap();
        assert!(!d.changes()[0].is_safe);
    }

    #[test]
    fn test_not_null_change_warns_but_is_safe() {
        let current = schema(vec![users(|t| t.column(Column::new("bio", "TEXT")))]);
        let target = schema(vec![users(|t| t.column(Column::new("bio", "TEXT").not_null()))]);

        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        let change = &d.changes()[0];
        assert!(change.is_safe);
        assert!(change.warnings[0].contains("NOT NULL"));
    }

    #[test]
    fn test_default_change_detected() {
        let current = schema(vec![users(|t| t.column(Column::new("status", "TEXT").default_value("'new'")))]);
        let target = schema(vec![users(|t| t.column(Column::new("status", "TEXT").default_value("'active'")))]);
        let d = diff(&current, &target, &SqliteFlavor).unwrap();
        assert_eq!(kinds(&d), vec![ChangeKind::AlterColumn]);
    }

    #[test]
    fn test_index_rename_postgres() {
        let current = schema(vec![users(|t| t.index(Index::unique("idx_old", ["email"])))]);
        let target = schema(vec![users(|t| t.index(Index::unique("idx_new", ["email"])))]);

        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        assert_eq!(kinds(&d), vec![ChangeKind::RenameIndex]);
        assert!(d.changes()[0].is_safe);
    }

    #[test]
    fn test_index_rename_emulated_on_sqlite() {
        let current = schema(vec![users(|t| t.index(Index::unique("idx_old", ["email"])))]);
        let target = schema(vec![users(|t| t.index(Index::unique("idx_new", ["email"])))]);

        let d = diff(&current, &target, &SqliteFlavor).unwrap();
        assert_eq!(kinds(&d), vec![ChangeKind::DropIndex, ChangeKind::CreateIndex]);
        assert!(d.changes()[0].warnings[0].contains("emulated"));
        assert!(d.tables_to_alter()[0].redefine);
    }

    #[test]
    fn test_index_structure_change_under_same_name() {
        let current = schema(vec![users(|t| t.index(Index::new("users_idx", ["email"])))]);
        let target = schema(vec![users(|t| t.index(Index::unique("users_idx", ["email"])))]);

        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        assert_eq!(kinds(&d), vec![ChangeKind::CreateIndex, ChangeKind::DropIndex]);
        assert!(!d.changes()[1].is_safe);
    }

    #[test]
    fn test_foreign_key_rename_by_flavor() {
        let current = schema(vec![users(|t| t), posts("fk_old")]);
        let target = schema(vec![users(|t| t), posts("fk_new")]);

        let pg = diff(&current, &target, &PostgresFlavor).unwrap();
        assert_eq!(kinds(&pg), vec![ChangeKind::RenameForeignKey]);

        let mysql = diff(&current, &target, &MySqlFlavor).unwrap();
        assert_eq!(kinds(&mysql), vec![ChangeKind::DropForeignKey, ChangeKind::CreateForeignKey]);
        assert!(mysql.changes()[0].is_safe);

        let sqlite = diff(&current, &target, &SqliteFlavor).unwrap();
        assert!(sqlite.is_empty());
    }

    #[test]
    fn test_drop_foreign_key_is_unsafe() {
        let bare_posts = Table::builder("posts")
            .column(Column::new("id", "INTEGER").auto_increment())
            .column(Column::new("user_id", "INTEGER").not_null())
            .primary_key(PrimaryKey::new(["id"]))
            .build()
            .unwrap();
        let current = schema(vec![users(|t| t), posts("fk")]);
        let target = schema(vec![users(|t| t), bare_posts]);

        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        assert_eq!(kinds(&d), vec![ChangeKind::DropForeignKey]);
        assert!(!d.changes()[0].is_safe);
    }

    #[test]
    fn test_primary_key_change() {
        let current = schema(vec![users(|t| t)]);
        let target = schema(vec![
            Table::builder("users")
                .column(Column::new("id", "INTEGER").auto_increment())
                .column(Column::new("email", "VARCHAR(255)").not_null())
                .primary_key(PrimaryKey::new(["id", "email"]))
                .build()
                .unwrap(),
        ]);
        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        assert_eq!(kinds(&d), vec![ChangeKind::AlterPrimaryKey]);
        assert!(!d.changes()[0].is_safe);
    }

    #[test]
    fn test_creation_order_follows_foreign_keys() {
        let target = schema(vec![posts("fk"), users(|t| t)]);
        let d = diff(&DatabaseSchema::empty(), &target, &PostgresFlavor).unwrap();
        let names: Vec<&str> = d.tables_to_create().iter().map(Table::name).collect();
        assert_eq!(names, vec!["users", "posts"]);
    }

    #[test]
    fn test_drop_order_is_reversed() {
        let current = schema(vec![users(|t| t), posts("fk")]);
        let d = diff(&current, &DatabaseSchema::empty(), &PostgresFlavor).unwrap();
        let names: Vec<&str> = d.tables_to_drop().iter().map(Table::name).collect();
        assert_eq!(names, vec!["posts", "users"]);
        assert_eq!(d.warnings().len(), 2);
        assert!(d.is_destructive());
    }

    #[test]
    fn test_cycle_is_reported() {
        let a = Table::builder("a")
            .column(Column::new("b_id", "INTEGER"))
            .foreign_key(ForeignKey::new("a_b", ["b_id"], "b", ["id"]))
            .build()
            .unwrap();
        let b = Table::builder("b")
            .column(Column::new("a_id", "INTEGER"))
            .foreign_key(ForeignKey::new("b_a", ["a_id"], "a", ["id"]))
            .build()
            .unwrap();

        let err = diff(&DatabaseSchema::empty(), &schema(vec![a, b]), &PostgresFlavor).unwrap_err();
        match err {
            MigrationError::CyclicDependency { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_reference_is_not_a_cycle() {
        let tree = Table::builder("nodes")
            .column(Column::new("id", "INTEGER").not_null())
            .column(Column::new("parent_id", "INTEGER"))
            .primary_key(PrimaryKey::new(["id"]))
            .foreign_key(ForeignKey::new("nodes_parent", ["parent_id"], "nodes", ["id"]))
            .build()
            .unwrap();
        let d = diff(&DatabaseSchema::empty(), &schema(vec![tree]), &SqliteFlavor).unwrap();
        assert_eq!(d.tables_to_create().len(), 1);
    }

    #[test]
    fn test_history_table_ignored() {
        let history = Table::builder("_migrations")
            .column(Column::new("id", "INTEGER"))
            .build()
            .unwrap();
        let current = schema(vec![history]);
        let d = diff(&current, &DatabaseSchema::empty(), &PostgresFlavor).unwrap();
        assert!(d.is_empty());
    }

    #[test]
    fn test_mysql_table_names_fold_case() {
        let upper = Table::builder("Users")
            .column(Column::new("id", "INT").not_null())
            .build()
            .unwrap();
        let lower = Table::builder("users")
            .column(Column::new("id", "INT").not_null())
            .build()
            .unwrap();

        let d = diff(&schema(vec![upper.clone()]), &schema(vec![lower.clone()]), &MySqlFlavor).unwrap();
        assert!(d.is_empty());

        let d = diff(&schema(vec![upper.clone()]), &schema(vec![lower.clone()]), &PostgresFlavor).unwrap();
        assert_eq!(d.tables_to_create().len(), 1);
        assert_eq!(d.tables_to_drop().len(), 1);

        // Both spellings in one schema name a single MySQL table.
        let both = schema(vec![upper, lower]);
        let err = diff(&DatabaseSchema::empty(), &both, &MySqlFlavor).unwrap_err();
        assert!(matches!(err, MigrationError::SchemaModel(_)));
        assert!(diff(&both, &DatabaseSchema::empty(), &MySqlFlavor).is_err());
        assert_eq!(
            diff(&DatabaseSchema::empty(), &both, &PostgresFlavor).unwrap().tables_to_create().len(),
            2
        );
    }

    #[test]
    fn test_enum_changes() {
        let current = DatabaseSchema::builder()
            .enum_type(EnumType::new("mood", ["happy", "sad"]))
            .enum_type(EnumType::new("legacy", ["x"]))
            .build()
            .unwrap();
        let target = DatabaseSchema::builder()
            .enum_type(EnumType::new("mood", ["happy", "ok"]))
            .enum_type(EnumType::new("color", ["red"]))
            .build()
            .unwrap();

        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        assert_eq!(d.enums_to_create()[0].name, "color");
        assert_eq!(d.enums_to_drop()[0].name, "legacy");
        assert_eq!(d.enums_to_alter()[0].added_values, vec!["ok"]);
        assert_eq!(d.enums_to_alter()[0].removed_values, vec!["sad"]);
        assert!(d.warnings().iter().any(|w| w.contains("cannot be removed")));

        // Enums are column types in MySQL, not schema objects.
        assert!(diff(&current, &target, &MySqlFlavor).unwrap().is_empty());
    }

    #[test]
    fn test_sequence_changes() {
        let current = DatabaseSchema::builder()
            .sequence(Sequence::new("a"))
            .sequence(Sequence::new("b"))
            .build()
            .unwrap();
        let target = DatabaseSchema::builder()
            .sequence(Sequence::new("a").increment(10))
            .sequence(Sequence::new("c"))
            .build()
            .unwrap();

        let d = diff(&current, &target, &PostgresFlavor).unwrap();
        assert_eq!(d.sequences_to_alter()[0].next.increment, 10);
        assert_eq!(d.sequences_to_create()[0].name, "c");
        assert_eq!(d.sequences_to_drop()[0].name, "b");
    }

    #[test]
    fn test_summary() {
        assert_eq!(DiffResult::default().summary(), "No changes");
        let d = diff(&DatabaseSchema::empty(), &schema(vec![users(|t| t)]), &PostgresFlavor).unwrap();
        assert_eq!(d.summary(), "Create 1 tables");
    }
}
