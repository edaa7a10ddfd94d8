use std::collections::{BTreeSet, HashMap, HashSet};

use crate::catalog::{ColId, TableId, TableMeta};
use crate::errors::sql_err;
use crate::storage::{Row, RowId, RowPointer};
use crate::types::format_key;

/// A row some cascade path will rewrite: the image it was read with and
/// the image it will be written as.
#[derive(Clone, Debug)]
pub(crate) struct PendingRow {
    pub(crate) row_id: RowId,
    pub(crate) old: Row,
    pub(crate) new: Row,
}

/// Pending updates of one table, in the order rows were first reached.
#[derive(Debug, Default)]
pub(crate) struct PendingUpdates {
    rows: Vec<PendingRow>,
    index: HashMap<RowId, usize>,
}

fn triggered_change(meta: &TableMeta, row: &PendingRow, col: ColId) -> anyhow::Error {
    sql_err(
        "27000",
        format!(
            "triggered data change violation on table {}: column {} of row {} is written twice with different values",
            meta.name,
            meta.columns.get(col).map(|c| c.name.as_str()).unwrap_or("?"),
            format_key(&row.old),
        ),
    )
}

impl PendingUpdates {
    pub(crate) fn get(&self, row_id: RowId) -> Option<&PendingRow> {
        self.index.get(&row_id).map(|pos| &self.rows[*pos])
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    /// Registers `new` as the image of `row_id`, or folds the `changed`
    /// columns of `new` into the image already registered. A column an
    /// earlier path already rewrote may only be written again with the
    /// same value.
    pub(crate) fn merge_update(
        &mut self,
        meta: &TableMeta,
        row_id: RowId,
        old: &Row,
        new: &Row,
        changed: &[ColId],
    ) -> anyhow::Result<&PendingRow> {
        let pos = match self.index.get(&row_id).copied() {
            Some(pos) => {
                let existing = &mut self.rows[pos];
                for col in changed {
                    let written = existing.new[*col] != existing.old[*col];
                    if written && existing.new[*col] != new[*col] {
                        return Err(triggered_change(meta, existing, *col));
                    }
                }
                for col in changed {
                    existing.new[*col] = new[*col].clone();
                }
                pos
            }
            None => {
                self.rows.push(PendingRow {
                    row_id,
                    old: old.clone(),
                    new: new.clone(),
                });
                self.index.insert(row_id, self.rows.len() - 1);
                self.rows.len() - 1
            }
        };
        Ok(&self.rows[pos])
    }

    pub(crate) fn remove(&mut self, row_id: RowId) -> Option<PendingRow> {
        let pos = self.index.remove(&row_id)?;
        let removed = self.rows.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &PendingRow> {
        self.rows.iter()
    }

    pub(crate) fn into_rows(self) -> Vec<PendingRow> {
        self.rows
    }
}

/// Reconciles a row the statement updates directly with the image a cascade
/// produced for the same row. Each directly changed column must either be
/// untouched by the cascade or agree with `new_data`; the cascade's other
/// rewritten columns are carried into `new_data`.
pub(crate) fn merge_keep_update(
    meta: &TableMeta,
    pending: &PendingRow,
    changed: &[ColId],
    new_data: &mut Row,
) -> anyhow::Result<()> {
    for col in changed {
        let cascaded = pending.new[*col] != pending.old[*col];
        if cascaded && pending.new[*col] != new_data[*col] {
            return Err(triggered_change(meta, pending, *col));
        }
    }
    for (col, value) in pending.new.iter().enumerate() {
        if changed.contains(&col) || *value == pending.old[col] {
            continue;
        }
        new_data[col] = value.clone();
    }
    Ok(())
}

/// Everything one statement's cascade decided to do, grouped by table in
/// first-touched order.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    order: Vec<TableId>,
    updates: HashMap<TableId, PendingUpdates>,
    deletes: HashMap<TableId, Vec<(RowId, Row)>>,
    doomed: HashSet<RowPointer>,
    reached: BTreeSet<RowPointer>,
}

impl ChangeSet {
    fn touch_table(&mut self, table: TableId) {
        if !self.order.contains(&table) {
            self.order.push(table);
        }
    }

    pub(crate) fn pending(&self, row: RowPointer) -> Option<&PendingRow> {
        self.updates
            .get(&row.table_id)
            .and_then(|updates| updates.get(row.row_id))
    }

    /// Merges a cascade-produced image and returns the resulting full image.
    pub(crate) fn merge_update(
        &mut self,
        meta: &TableMeta,
        row_id: RowId,
        old: &Row,
        new: &Row,
        changed: &[ColId],
    ) -> anyhow::Result<Row> {
        self.touch_table(meta.id);
        let merged = self
            .updates
            .entry(meta.id)
            .or_default()
            .merge_update(meta, row_id, old, new, changed)?;
        Ok(merged.new.clone())
    }

    /// Removes the pending image of `row`, for a row the statement writes
    /// itself.
    pub(crate) fn take_pending(&mut self, row: RowPointer) -> Option<PendingRow> {
        self.updates
            .get_mut(&row.table_id)
            .and_then(|updates| updates.remove(row.row_id))
    }

    pub(crate) fn is_doomed(&self, row: RowPointer) -> bool {
        self.doomed.contains(&row)
    }

    /// Adds `row` to the delete set. Returns false if it was already there.
    pub(crate) fn doom(&mut self, row: RowPointer) -> bool {
        self.doomed.insert(row)
    }

    pub(crate) fn record_delete(&mut self, row: RowPointer, data: Row) {
        self.touch_table(row.table_id);
        self.deletes
            .entry(row.table_id)
            .or_default()
            .push((row.row_id, data));
    }

    pub(crate) fn reach(&mut self, row: RowPointer) {
        self.reached.insert(row);
    }

    /// Every row the statement would lock: reached, rewritten or deleted.
    pub(crate) fn touched(&self) -> BTreeSet<RowPointer> {
        let mut rows = self.reached.clone();
        rows.extend(self.doomed.iter().copied());
        for (table, updates) in &self.updates {
            rows.extend(
                updates
                    .iter()
                    .map(|pending| RowPointer::new(*table, pending.row_id)),
            );
        }
        rows
    }

    pub(crate) fn tables(&self) -> Vec<TableId> {
        self.order.clone()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.updates.values().map(PendingUpdates::len).sum()
    }

    pub(crate) fn delete_count(&self) -> usize {
        self.deletes.values().map(Vec::len).sum()
    }

    pub(crate) fn take_updates(&mut self, table: TableId) -> Vec<PendingRow> {
        self.updates
            .remove(&table)
            .map(PendingUpdates::into_rows)
            .unwrap_or_default()
    }

    pub(crate) fn take_deletes(&mut self, table: TableId) -> Vec<(RowId, Row)> {
        self.deletes.remove(&table).unwrap_or_default()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.updates.clear();
        self.deletes.clear();
        self.doomed.clear();
        self.reached.clear();
    }
}
