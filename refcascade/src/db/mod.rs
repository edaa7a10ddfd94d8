use crate::catalog::{Catalog, ColId, TableId, TableMeta};
use crate::errors::{conflict_err, sql_err};
use crate::storage::{Row, RowId, RowPointer, Table, VersionedRow};
use crate::trigger::{TriggerAction, TriggerBatch, TriggerEvent, TriggerLevel, TriggerRegistry};
use crate::txn::{TxId, TxnStatus, VisibilityContext};
use crate::types::{CellInput, Value};
use std::collections::HashMap;
use std::sync::Arc;

mod cascade;
mod coerce;
mod constraints;
mod create;
mod dml_delete;
mod dml_insert;
mod dml_merge;
mod dml_update;
mod locks;
mod merge;
mod mvcc;
mod statement;
mod visibility;

use cascade::{Cascade, CascadeMode};
use coerce::{coerce_value_for_column, column_default};
use constraints::*;
use locks::LockRegistry;
use merge::{ChangeSet, PendingRow, merge_keep_update};
use mvcc::{delete_version, insert_version, update_version};
use visibility::{select_visible_version_idx, visible_row_clone, visible_rows};

pub use create::{CheckExpr, CheckSpec, ForeignKeySpec, PrimaryKeySpec, TableSpec, UniqueSpec};
pub use dml_merge::{MergeRow, MergeTemplate, MergeValue};
pub use dml_update::RowUpdate;
pub use locks::{LockHandle, LockOwner};
pub use mvcc::UndoEntry;
pub use statement::Phase;
pub(crate) use statement::StatementContext;

#[derive(Debug)]
pub struct Db {
    pub catalog: Catalog,
    pub tables: HashMap<TableId, Table>,
    next_table_id: TableId,
    locks: Arc<LockRegistry>,
    triggers: TriggerRegistry,
}

impl Default for Db {
    fn default() -> Self {
        Self {
            catalog: Catalog::default(),
            tables: HashMap::new(),
            next_table_id: 0,
            locks: Arc::new(LockRegistry::new()),
            triggers: TriggerRegistry::default(),
        }
    }
}

impl Db {
    pub fn release_locks(&self, owner: LockOwner) {
        self.locks.release_owner(owner);
    }

    pub fn lock_handle(&self) -> LockHandle {
        LockHandle::new(Arc::clone(&self.locks))
    }

    pub fn table_meta(&self, name: &str) -> anyhow::Result<&TableMeta> {
        self.catalog
            .get_table(name)
            .ok_or_else(|| sql_err("42P01", format!("no such table {name}")))
    }

    pub(crate) fn storage(&self, id: TableId) -> anyhow::Result<&Table> {
        self.tables
            .get(&id)
            .ok_or_else(|| sql_err("XX000", format!("missing storage for table id {id}")))
    }

    /// Visible rows of `name`, ordered by row id.
    pub fn scan(
        &self,
        name: &str,
        visibility: &VisibilityContext,
    ) -> anyhow::Result<Vec<(RowId, Row)>> {
        let meta = self.table_meta(name)?;
        Ok(visible_rows(self.storage(meta.id)?, visibility))
    }

    /// Visible row whose primary key equals `key`.
    pub fn find_by_key(
        &self,
        name: &str,
        key: &[Value],
        visibility: &VisibilityContext,
    ) -> anyhow::Result<Option<(RowId, Row)>> {
        let meta = self.table_meta(name)?;
        if meta.primary_key.is_none() {
            return Err(sql_err(
                "42P10",
                format!("table {name} has no primary key"),
            ));
        }
        let table = self.storage(meta.id)?;
        Ok(table
            .pk_map
            .as_ref()
            .and_then(|map| map.get(key))
            .and_then(|row_id| {
                visible_row_clone(table, *row_id, visibility).map(|row| (*row_id, row))
            }))
    }

    pub fn register_trigger(
        &mut self,
        table: &str,
        name: &str,
        event: TriggerEvent,
        level: TriggerLevel,
        action: Arc<dyn TriggerAction>,
    ) -> anyhow::Result<()> {
        let table_id = self.table_meta(table)?.id;
        if self.triggers.contains(table_id, name) {
            return Err(sql_err(
                "42710",
                format!("trigger {name} for relation {table} already exists"),
            ));
        }
        self.triggers
            .register(table_id, name.to_string(), event, level, action);
        Ok(())
    }

    /// Writes the cascade's decisions: every other table first, then
    /// `top`. Within a table deletes go before updates, and rows the
    /// cascade also deletes are not updated.
    fn apply_cascade(
        &mut self,
        changes: &mut ChangeSet,
        top: TableId,
        stmt: &mut StatementContext<'_>,
    ) -> anyhow::Result<()> {
        let mut order: Vec<TableId> = changes
            .tables()
            .into_iter()
            .filter(|table| *table != top)
            .collect();
        order.push(top);
        for table_id in order {
            let deletes = changes.take_deletes(table_id);
            let updates: Vec<PendingRow> = changes
                .take_updates(table_id)
                .into_iter()
                .filter(|pending| !changes.is_doomed(RowPointer::new(table_id, pending.row_id)))
                .collect();
            if deletes.is_empty() && updates.is_empty() {
                continue;
            }
            let Db {
                catalog, tables, ..
            } = &mut *self;
            let meta = catalog
                .get_table_by_id(table_id)
                .ok_or_else(|| sql_err("XX000", format!("unknown table id {table_id}")))?;
            let table = tables.get_mut(&table_id).ok_or_else(|| {
                sql_err("XX000", format!("missing storage for table id {table_id}"))
            })?;
            for (row_id, _) in deletes {
                if let Some(old) = delete_version(table, meta, row_id, stmt)? {
                    stmt.triggers.deleted(table_id, &meta.name, old);
                }
            }
            for pending in updates {
                check_row_constraints(meta, &pending.new)?;
                if let Some(old) =
                    update_version(table, meta, pending.row_id, pending.new.clone(), stmt)?
                {
                    stmt.triggers.updated(table_id, &meta.name, old, pending.new);
                }
            }
        }
        Ok(())
    }

    /// Value a `CellInput::Default` stands for: the next identity value for
    /// identity columns, the column default otherwise.
    fn default_for_column(&mut self, meta: &TableMeta, idx: ColId) -> anyhow::Result<Value> {
        let col = &meta.columns[idx];
        if col.identity.is_none() {
            return Ok(column_default(meta, idx));
        }
        let table = self
            .tables
            .get_mut(&meta.id)
            .ok_or_else(|| sql_err("XX000", format!("missing storage for table id {}", meta.id)))?;
        let runtime = table
            .identities
            .get_mut(idx)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| {
                sql_err(
                    "XX000",
                    format!("missing identity state for column {}", col.name),
                )
            })?;
        let current = runtime.next_value;
        runtime.next_value = runtime
            .next_value
            .checked_add(runtime.increment_by)
            .ok_or_else(|| {
                sql_err(
                    "22003",
                    format!("identity column {} increment overflowed", col.name),
                )
            })?;
        i64::try_from(current).map(Value::Int64).map_err(|_| {
            sql_err(
                "22003",
                format!(
                    "identity column {} produced value {} out of range",
                    col.name, current
                ),
            )
        })
    }

    /// Resolves one input cell for column `idx` and coerces it to the column
    /// type. `GENERATED ALWAYS` identity columns only accept DEFAULT.
    fn resolve_cell(
        &mut self,
        meta: &TableMeta,
        idx: ColId,
        cell: CellInput,
    ) -> anyhow::Result<Value> {
        let col = &meta.columns[idx];
        let value = match cell {
            CellInput::Default => self.default_for_column(meta, idx)?,
            CellInput::Value(_) if col.identity.as_ref().is_some_and(|spec| spec.always) => {
                return Err(sql_err(
                    "428C9",
                    format!(
                        "column {} is GENERATED ALWAYS and only accepts DEFAULT",
                        col.name
                    ),
                ));
            }
            CellInput::Value(value) => value,
        };
        coerce_value_for_column(value, col, idx, meta)
    }
}
