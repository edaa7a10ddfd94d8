use std::collections::HashSet;

use tracing::debug;

use super::*;

impl Db {
    /// Deletes `row_ids` from `table` together with everything the foreign
    /// keys referencing it imply. Ids that are not visible are ignored.
    /// Returns the number of rows deleted from `table` itself.
    pub(crate) fn delete_rows(
        &mut self,
        table: &str,
        row_ids: &[RowId],
        stmt: &mut StatementContext<'_>,
    ) -> anyhow::Result<usize> {
        let meta = self.table_meta(table)?.clone();
        self.run_statement(stmt, |db, stmt| db.delete_statement(&meta, row_ids, stmt))
    }

    fn delete_statement(
        &mut self,
        meta: &TableMeta,
        row_ids: &[RowId],
        stmt: &mut StatementContext<'_>,
    ) -> anyhow::Result<usize> {
        let storage = self.storage(meta.id)?;
        let mut removed = HashSet::new();
        let mut candidates: Vec<(RowId, Row)> = Vec::with_capacity(row_ids.len());
        for row_id in row_ids {
            let ptr = RowPointer::new(meta.id, *row_id);
            if removed.contains(&ptr) {
                continue;
            }
            if let Some(row) = visible_row_clone(storage, *row_id, &stmt.visibility) {
                removed.insert(ptr);
                candidates.push((*row_id, row));
            }
        }
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut changes = ChangeSet::default();
        self.walk_deletes(meta, &candidates, &removed, CascadeMode::Validate, &mut changes, stmt)?;

        stmt.enter(Phase::ConflictCheck);
        let mut touched = changes.touched();
        touched.extend(removed.iter().copied());
        self.certify_no_conflict(&touched, stmt)?;

        stmt.enter(Phase::Apply);
        changes.clear();
        self.walk_deletes(meta, &candidates, &removed, CascadeMode::Apply, &mut changes, stmt)?;
        debug!(
            table = %meta.name,
            rows = candidates.len(),
            cascaded_deletes = changes.delete_count(),
            cascaded_updates = changes.pending_count(),
            "applying delete"
        );
        self.apply_cascade(&mut changes, meta.id, stmt)?;
        changes.clear();

        let table = self
            .tables
            .get_mut(&meta.id)
            .ok_or_else(|| sql_err("XX000", format!("missing storage for table id {}", meta.id)))?;
        let mut deleted = 0usize;
        for (row_id, _) in &candidates {
            if let Some(old) = delete_version(table, meta, *row_id, stmt)? {
                stmt.triggers.deleted(meta.id, &meta.name, old);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn walk_deletes(
        &self,
        meta: &TableMeta,
        candidates: &[(RowId, Row)],
        removed: &HashSet<RowPointer>,
        mode: CascadeMode,
        changes: &mut ChangeSet,
        stmt: &StatementContext<'_>,
    ) -> anyhow::Result<()> {
        let mut cascade = Cascade::new(
            &self.catalog,
            &self.tables,
            &stmt.visibility,
            mode,
            stmt.max_cascade_depth,
            changes,
            removed,
        );
        cascade.check_cascade_delete(meta.id, candidates)
    }
}
