use crate::types::{Column, ReferentialAction, Value};
use std::collections::{BTreeMap, HashMap};

pub type TableName = String;
pub type TableId = u64;
pub type ColId = usize;
pub type ConstraintId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    /// Parent-side mirror of a foreign key; shares the foreign key's id.
    Main,
    Check,
}

#[derive(Clone, Debug)]
pub struct PrimaryKeyMeta {
    pub name: String,
    pub columns: Vec<ColId>,
}

#[derive(Clone, Debug)]
pub struct UniqueMeta {
    pub name: String,
    pub columns: Vec<ColId>,
}

/// Which parent key a foreign key resolves against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferencedKey {
    PrimaryKey,
    Unique(String),
}

#[derive(Clone, Debug)]
pub struct ForeignKeyMeta {
    pub id: ConstraintId,
    pub name: String,
    pub table: TableId,
    pub table_name: TableName,
    pub local_columns: Vec<ColId>,
    pub referenced_table: TableId,
    pub referenced_table_name: TableName,
    pub referenced_columns: Vec<ColId>,
    pub referenced_key: ReferencedKey,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl ForeignKeyMeta {
    pub fn is_self_referencing(&self) -> bool {
        self.table == self.referenced_table
    }

    pub fn touches_local(&self, changed: &[ColId]) -> bool {
        self.local_columns.iter().any(|c| changed.contains(c))
    }

    pub fn touches_referenced(&self, changed: &[ColId]) -> bool {
        self.referenced_columns.iter().any(|c| changed.contains(c))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CheckPredicate {
    NotNull(ColId),
    Compare {
        column: ColId,
        op: CompareOp,
        value: Value,
    },
    OneOf {
        column: ColId,
        values: Vec<Value>,
    },
}

#[derive(Clone, Debug)]
pub struct CheckMeta {
    pub name: String,
    pub predicate: CheckPredicate,
}

#[derive(Clone, Debug)]
pub struct TableMeta {
    pub id: TableId,
    pub name: TableName,
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKeyMeta>,
    pub unique_keys: Vec<UniqueMeta>,
    pub foreign_keys: Vec<ForeignKeyMeta>,
    pub checks: Vec<CheckMeta>,
}

impl TableMeta {
    pub fn column_index(&self, name: &str) -> Option<ColId> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn constraint_kind(&self, name: &str) -> Option<ConstraintKind> {
        if self.primary_key.as_ref().is_some_and(|pk| pk.name == name) {
            return Some(ConstraintKind::PrimaryKey);
        }
        if self.unique_keys.iter().any(|u| u.name == name) {
            return Some(ConstraintKind::Unique);
        }
        if self.foreign_keys.iter().any(|fk| fk.name == name) {
            return Some(ConstraintKind::ForeignKey);
        }
        if self.checks.iter().any(|c| c.name == name) {
            return Some(ConstraintKind::Check);
        }
        None
    }
}

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub tables_by_id: BTreeMap<TableId, TableMeta>,
    by_name: HashMap<TableName, TableId>,
    // parent table -> (child table, index into the child's foreign_keys)
    mains: HashMap<TableId, Vec<(TableId, usize)>>,
    next_constraint_id: ConstraintId,
}

impl Catalog {
    pub fn get_table(&self, name: &str) -> Option<&TableMeta> {
        self.by_name
            .get(name)
            .and_then(|id| self.tables_by_id.get(id))
    }

    pub fn get_table_by_id(&self, id: TableId) -> Option<&TableMeta> {
        self.tables_by_id.get(&id)
    }

    pub(crate) fn alloc_constraint_id(&mut self) -> ConstraintId {
        self.next_constraint_id += 1;
        self.next_constraint_id
    }

    pub(crate) fn insert_table(&mut self, meta: TableMeta) {
        for (idx, fk) in meta.foreign_keys.iter().enumerate() {
            self.mains
                .entry(fk.referenced_table)
                .or_default()
                .push((meta.id, idx));
        }
        self.by_name.insert(meta.name.clone(), meta.id);
        self.tables_by_id.insert(meta.id, meta);
    }

    /// Installs a foreign key on an existing child table together with its
    /// MAIN mirror on the parent.
    pub(crate) fn attach_foreign_key(&mut self, fk: ForeignKeyMeta) {
        let Some(meta) = self.tables_by_id.get_mut(&fk.table) else {
            return;
        };
        self.mains
            .entry(fk.referenced_table)
            .or_default()
            .push((fk.table, meta.foreign_keys.len()));
        meta.foreign_keys.push(fk);
    }

    /// Foreign keys that reference `table`, i.e. its MAIN constraints, in
    /// creation order.
    pub fn main_constraints(&self, table: TableId) -> impl Iterator<Item = &ForeignKeyMeta> {
        self.mains
            .get(&table)
            .into_iter()
            .flat_map(|entries| entries.iter())
            .filter_map(|(child, idx)| {
                self.tables_by_id
                    .get(child)
                    .and_then(|meta| meta.foreign_keys.get(*idx))
            })
    }
}
