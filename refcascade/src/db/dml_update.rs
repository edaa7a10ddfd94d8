use std::collections::HashSet;

use tracing::debug;

use super::*;

/// New values for one row, aligned with the statement's changed columns.
#[derive(Clone, Debug)]
pub struct RowUpdate {
    pub row_id: RowId,
    pub values: Vec<CellInput>,
}

impl RowUpdate {
    pub fn new(row_id: RowId, values: Vec<CellInput>) -> Self {
        Self { row_id, values }
    }
}

struct UpdateTarget {
    row_id: RowId,
    old: Row,
    new: Row,
}

impl Db {
    /// Rewrites `changed` columns of the rows in `updates` and carries the
    /// key changes through every foreign key referencing `table`.
    pub(crate) fn update_rows(
        &mut self,
        table: &str,
        changed: &[String],
        updates: Vec<RowUpdate>,
        stmt: &mut StatementContext<'_>,
    ) -> anyhow::Result<usize> {
        let meta = self.table_meta(table)?.clone();
        let changed = resolve_changed_columns(&meta, changed)?;
        self.run_statement(stmt, |db, stmt| {
            db.update_statement(&meta, &changed, updates, stmt)
        })
    }

    pub(super) fn update_statement(
        &mut self,
        meta: &TableMeta,
        changed: &[ColId],
        updates: Vec<RowUpdate>,
        stmt: &mut StatementContext<'_>,
    ) -> anyhow::Result<usize> {
        let mut targets: Vec<UpdateTarget> = Vec::with_capacity(updates.len());
        let mut seen = HashSet::new();
        for update in updates {
            if !seen.insert(update.row_id) {
                return Err(sql_err(
                    "21000",
                    format!(
                        "command cannot affect row {} of table {} a second time",
                        update.row_id, meta.name
                    ),
                ));
            }
            if update.values.len() != changed.len() {
                return Err(sql_err(
                    "42601",
                    format!(
                        "update of row {} has {} values for {} columns",
                        update.row_id,
                        update.values.len(),
                        changed.len()
                    ),
                ));
            }
            let Some(old) = visible_row_clone(self.storage(meta.id)?, update.row_id, &stmt.visibility)
            else {
                continue;
            };
            let mut new = old.clone();
            for (col, cell) in changed.iter().zip(update.values) {
                new[*col] = self.resolve_cell(meta, *col, cell)?;
            }
            check_row_constraints(meta, &new)?;
            targets.push(UpdateTarget {
                row_id: update.row_id,
                old,
                new,
            });
        }
        if targets.is_empty() {
            return Ok(0);
        }

        let mut changes = ChangeSet::default();
        self.walk_updates(meta, &targets, changed, CascadeMode::Validate, &mut changes, stmt)?;
        for target in &targets {
            if let Some(pending) = changes.pending(RowPointer::new(meta.id, target.row_id)) {
                let mut probe = target.new.clone();
                merge_keep_update(meta, pending, changed, &mut probe)?;
            }
        }

        stmt.enter(Phase::ConflictCheck);
        let mut touched = changes.touched();
        touched.extend(
            targets
                .iter()
                .map(|target| RowPointer::new(meta.id, target.row_id)),
        );
        self.certify_no_conflict(&touched, stmt)?;

        stmt.enter(Phase::Apply);
        changes.clear();
        self.walk_updates(meta, &targets, changed, CascadeMode::Apply, &mut changes, stmt)?;
        let mut writes = Vec::with_capacity(targets.len());
        for target in targets {
            let mut new = target.new;
            if let Some(pending) = changes.take_pending(RowPointer::new(meta.id, target.row_id)) {
                merge_keep_update(meta, &pending, changed, &mut new)?;
            }
            writes.push((target.row_id, new));
        }
        debug!(
            table = %meta.name,
            rows = writes.len(),
            cascaded_updates = changes.pending_count(),
            "applying update"
        );
        self.apply_cascade(&mut changes, meta.id, stmt)?;
        changes.clear();

        let table = self
            .tables
            .get_mut(&meta.id)
            .ok_or_else(|| sql_err("XX000", format!("missing storage for table id {}", meta.id)))?;
        let mut updated = 0usize;
        for (row_id, new) in writes {
            if let Some(old) = update_version(table, meta, row_id, new.clone(), stmt)? {
                stmt.triggers.updated(meta.id, &meta.name, old, new);
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn walk_updates(
        &self,
        meta: &TableMeta,
        targets: &[UpdateTarget],
        changed: &[ColId],
        mode: CascadeMode,
        changes: &mut ChangeSet,
        stmt: &StatementContext<'_>,
    ) -> anyhow::Result<()> {
        let removed = HashSet::new();
        let mut cascade = Cascade::new(
            &self.catalog,
            &self.tables,
            &stmt.visibility,
            mode,
            stmt.max_cascade_depth,
            changes,
            &removed,
        );
        for target in targets {
            cascade.note_rewrite(meta.id, target.row_id, &target.new);
        }
        for target in targets {
            cascade.check_cascade_update(meta.id, target.row_id, &target.old, &target.new, changed)?;
        }
        Ok(())
    }
}

pub(super) fn resolve_changed_columns(
    meta: &TableMeta,
    names: &[String],
) -> anyhow::Result<Vec<ColId>> {
    if names.is_empty() {
        return Err(sql_err(
            "42601",
            format!("update of {} must change at least one column", meta.name),
        ));
    }
    let mut changed = Vec::with_capacity(names.len());
    for name in names {
        let idx = meta.column_index(name).ok_or_else(|| {
            sql_err(
                "42703",
                format!("column {name} of relation {} does not exist", meta.name),
            )
        })?;
        if changed.contains(&idx) {
            return Err(sql_err(
                "42601",
                format!("multiple assignments to same column {name}"),
            ));
        }
        changed.push(idx);
    }
    Ok(changed)
}
