use tracing::debug;

use crate::types::format_key;

use super::*;

impl Db {
    pub(crate) fn insert_rows(
        &mut self,
        table: &str,
        rows: Vec<Vec<CellInput>>,
        stmt: &mut StatementContext<'_>,
    ) -> anyhow::Result<usize> {
        let meta = self.table_meta(table)?.clone();
        self.run_statement(stmt, |db, stmt| db.insert_statement(&meta, rows, stmt))
    }

    /// Inserts rows one at a time, so a row may reference a row inserted
    /// earlier by the same statement. New rows are invisible to other
    /// transactions and need no conflict check.
    pub(super) fn insert_statement(
        &mut self,
        meta: &TableMeta,
        rows: Vec<Vec<CellInput>>,
        stmt: &mut StatementContext<'_>,
    ) -> anyhow::Result<usize> {
        let ncols = meta.columns.len();
        let mut materialized = Vec::with_capacity(rows.len());
        for (ridx, cells) in rows.into_iter().enumerate() {
            if cells.len() != ncols {
                return Err(sql_err(
                    "21P01",
                    format!(
                        "insert has wrong number of values at row {}: expected {}, got {}",
                        ridx + 1,
                        ncols,
                        cells.len()
                    ),
                ));
            }
            let mut row = Vec::with_capacity(ncols);
            for (idx, cell) in cells.into_iter().enumerate() {
                row.push(self.resolve_cell(meta, idx, cell)?);
            }
            check_row_constraints(meta, &row)?;
            materialized.push(row);
        }
        if materialized.is_empty() {
            return Ok(0);
        }

        if stmt.phase() == Phase::Validate {
            stmt.enter(Phase::ConflictCheck);
            stmt.enter(Phase::Apply);
        }
        debug!(table = %meta.name, rows = materialized.len(), "applying insert");
        let mut inserted = 0usize;
        for row in materialized {
            self.check_outbound_references(meta, &row, stmt)?;
            let table = self.tables.get_mut(&meta.id).ok_or_else(|| {
                sql_err("XX000", format!("missing storage for table id {}", meta.id))
            })?;
            insert_version(table, meta, row.clone(), stmt)?;
            stmt.triggers.inserted(meta.id, &meta.name, row);
            inserted += 1;
        }
        Ok(inserted)
    }

    fn check_outbound_references(
        &self,
        meta: &TableMeta,
        row: &Row,
        stmt: &StatementContext<'_>,
    ) -> anyhow::Result<()> {
        for fk in &meta.foreign_keys {
            let Some(key) = build_fk_parent_key(row, fk) else {
                continue;
            };
            // a row may reference itself
            if fk.is_self_referencing()
                && build_referenced_parent_key(row, fk).as_deref() == Some(key.as_slice())
            {
                continue;
            }
            if find_parent_row(&self.tables, fk, &key, &stmt.visibility)?.is_none() {
                return Err(sql_err(
                    "23503",
                    format!(
                        "insert or update on table {} violates foreign key constraint {}: key {} is not present in table {}",
                        meta.name,
                        fk.name,
                        format_key(&key),
                        fk.referenced_table_name
                    ),
                ));
            }
        }
        Ok(())
    }
}
