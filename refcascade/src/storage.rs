use crate::catalog::{ConstraintId, TableId};
use crate::txn::TxId;
use crate::types::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type RowId = u64;

pub type Row = Vec<Value>;

/// Stable identity of a row for the lifetime of the database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowPointer {
    pub table_id: TableId,
    pub row_id: RowId,
}

impl RowPointer {
    pub fn new(table_id: TableId, row_id: RowId) -> Self {
        Self { table_id, row_id }
    }
}

#[derive(Clone, Debug)]
pub struct VersionedRow {
    pub xmin: TxId,
    pub xmax: Option<TxId>,
    pub data: Row,
}

#[derive(Clone, Debug)]
pub struct IdentityRuntime {
    pub next_value: i128,
    pub increment_by: i128,
}

#[derive(Clone, Debug)]
pub struct Table {
    pub rows_by_id: BTreeMap<RowId, Vec<VersionedRow>>,
    pub next_rowid: RowId,
    pub pk_map: Option<HashMap<Vec<Value>, RowId>>,
    pub unique_maps: HashMap<String, HashMap<Vec<Value>, RowId>>,
    // reverse foreign key index: (constraint, referenced key) -> referencing rows
    pub fk_rev: HashMap<(ConstraintId, Vec<Value>), BTreeSet<RowId>>,
    pub identities: Vec<Option<IdentityRuntime>>,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            rows_by_id: BTreeMap::new(),
            next_rowid: 1,
            pk_map: None,
            unique_maps: HashMap::new(),
            fk_rev: HashMap::new(),
            identities: Vec::new(),
        }
    }
}

impl Table {
    pub fn with_pk(has_pk: bool, identities: Vec<Option<IdentityRuntime>>) -> Self {
        let mut tbl = Self::default();
        if has_pk {
            tbl.pk_map = Some(HashMap::new());
        }
        tbl.identities = identities;
        tbl
    }

    pub fn scan_all(&self) -> impl Iterator<Item = (&RowId, &Vec<VersionedRow>)> {
        self.rows_by_id.iter()
    }

    // simple per-table counter for hidden rowids
    pub fn alloc_rowid(&mut self) -> RowId {
        let id = self.next_rowid;
        self.next_rowid += 1;
        id
    }

    pub fn referencing_rows(
        &self,
        constraint: ConstraintId,
        key: &[Value],
    ) -> impl Iterator<Item = RowId> + '_ {
        self.fk_rev
            .get(&(constraint, key.to_vec()))
            .into_iter()
            .flat_map(|rows| rows.iter().copied())
    }
}
