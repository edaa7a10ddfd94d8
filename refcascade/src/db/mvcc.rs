use super::*;

/// One physical change made by a statement. Replaying entries in reverse
/// order restores storage and indexes exactly.
#[derive(Clone, Debug)]
pub enum UndoEntry {
    Inserted { row: RowPointer },
    Deleted { row: RowPointer, version: usize },
    Updated { row: RowPointer, version: usize },
}

/// Stores `row` as a new version owned by the statement's transaction.
pub(crate) fn insert_version(
    table: &mut Table,
    meta: &TableMeta,
    row: Row,
    stmt: &mut StatementContext<'_>,
) -> anyhow::Result<RowId> {
    let entries = IndexEntries::for_row(meta, &row)?;
    check_index_conflicts(table, meta, &entries, None)?;
    let row_id = table.alloc_rowid();
    table.rows_by_id.insert(
        row_id,
        vec![VersionedRow {
            xmin: stmt.txid,
            xmax: None,
            data: row,
        }],
    );
    add_index_entries(table, meta, &entries, row_id);
    stmt.undo.push(UndoEntry::Inserted {
        row: RowPointer::new(meta.id, row_id),
    });
    Ok(row_id)
}

/// Ends the visible version of `row_id`. Returns the deleted image, or None
/// if the row is no longer visible to the statement.
pub(crate) fn delete_version(
    table: &mut Table,
    meta: &TableMeta,
    row_id: RowId,
    stmt: &mut StatementContext<'_>,
) -> anyhow::Result<Option<Row>> {
    let Some(versions) = table.rows_by_id.get_mut(&row_id) else {
        return Ok(None);
    };
    let Some(idx) = select_visible_version_idx(versions, &stmt.visibility) else {
        return Ok(None);
    };
    versions[idx].xmax = Some(stmt.txid);
    let row = versions[idx].data.clone();
    let entries = IndexEntries::for_row(meta, &row)?;
    remove_index_entries(table, meta, &entries, row_id);
    stmt.undo.push(UndoEntry::Deleted {
        row: RowPointer::new(meta.id, row_id),
        version: idx,
    });
    Ok(Some(row))
}

/// Replaces the visible version of `row_id` with `new`. Returns the image it
/// replaced, or None if the row is no longer visible to the statement.
pub(crate) fn update_version(
    table: &mut Table,
    meta: &TableMeta,
    row_id: RowId,
    new: Row,
    stmt: &mut StatementContext<'_>,
) -> anyhow::Result<Option<Row>> {
    let Some(idx) = table
        .rows_by_id
        .get(&row_id)
        .and_then(|versions| select_visible_version_idx(versions, &stmt.visibility))
    else {
        return Ok(None);
    };
    let old = table.rows_by_id[&row_id][idx].data.clone();
    let old_entries = IndexEntries::for_row(meta, &old)?;
    let new_entries = IndexEntries::for_row(meta, &new)?;
    check_index_conflicts(table, meta, &new_entries, Some(row_id))?;
    if let Some(versions) = table.rows_by_id.get_mut(&row_id) {
        versions[idx].xmax = Some(stmt.txid);
        versions.push(VersionedRow {
            xmin: stmt.txid,
            xmax: None,
            data: new,
        });
    }
    remove_index_entries(table, meta, &old_entries, row_id);
    add_index_entries(table, meta, &new_entries, row_id);
    stmt.undo.push(UndoEntry::Updated {
        row: RowPointer::new(meta.id, row_id),
        version: idx,
    });
    Ok(Some(old))
}

impl Db {
    pub(crate) fn rollback_changes(&mut self, undo: &[UndoEntry]) -> anyhow::Result<()> {
        for entry in undo.iter().rev() {
            self.undo_entry(entry)?;
        }
        Ok(())
    }

    fn undo_entry(&mut self, entry: &UndoEntry) -> anyhow::Result<()> {
        let ptr = match entry {
            UndoEntry::Inserted { row }
            | UndoEntry::Deleted { row, .. }
            | UndoEntry::Updated { row, .. } => *row,
        };
        let meta = self
            .catalog
            .get_table_by_id(ptr.table_id)
            .ok_or_else(|| sql_err("XX000", format!("unknown table id {}", ptr.table_id)))?;
        let table = self.tables.get_mut(&ptr.table_id).ok_or_else(|| {
            sql_err(
                "XX000",
                format!("missing storage for table id {}", ptr.table_id),
            )
        })?;
        let versions = table.rows_by_id.get_mut(&ptr.row_id).ok_or_else(|| {
            sql_err(
                "XX000",
                format!("undo references missing row {} of {}", ptr.row_id, meta.name),
            )
        })?;
        match entry {
            UndoEntry::Inserted { .. } => {
                let removed = versions.pop();
                if versions.is_empty() {
                    table.rows_by_id.remove(&ptr.row_id);
                }
                if let Some(version) = removed {
                    let entries = IndexEntries::for_row(meta, &version.data)?;
                    remove_index_entries(table, meta, &entries, ptr.row_id);
                }
            }
            UndoEntry::Deleted { version, .. } => {
                let restored = versions.get_mut(*version).ok_or_else(|| {
                    sql_err("XX000", format!("undo references missing version of {}", meta.name))
                })?;
                restored.xmax = None;
                let entries = IndexEntries::for_row(meta, &restored.data)?;
                add_index_entries(table, meta, &entries, ptr.row_id);
            }
            UndoEntry::Updated { version, .. } => {
                let replaced = versions.pop();
                let restored = versions.get_mut(*version).ok_or_else(|| {
                    sql_err("XX000", format!("undo references missing version of {}", meta.name))
                })?;
                restored.xmax = None;
                let old_entries = IndexEntries::for_row(meta, &restored.data)?;
                if let Some(replaced) = replaced {
                    let new_entries = IndexEntries::for_row(meta, &replaced.data)?;
                    remove_index_entries(table, meta, &new_entries, ptr.row_id);
                }
                add_index_entries(table, meta, &old_entries, ptr.row_id);
            }
        }
        Ok(())
    }
}
