use std::collections::HashSet;

use super::dml_update::resolve_changed_columns;
use super::*;

/// Where a MERGE action takes a column value from.
#[derive(Clone, Debug)]
pub enum MergeValue {
    /// Column of the source row, by position.
    Source(usize),
    Literal(Value),
    Default,
}

/// Column assignments of a WHEN MATCHED UPDATE or WHEN NOT MATCHED INSERT
/// action. Columns an insert template leaves out get their default.
#[derive(Clone, Debug, Default)]
pub struct MergeTemplate {
    pub assignments: Vec<(String, MergeValue)>,
}

impl MergeTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: &str, value: MergeValue) -> Self {
        self.assignments.push((column.to_string(), value));
        self
    }
}

/// One row of the join between source and target. `target` is the matched
/// target row, if any.
#[derive(Clone, Debug)]
pub struct MergeRow {
    pub target: Option<RowId>,
    pub source: Row,
}

impl MergeRow {
    pub fn matched(target: RowId, source: Row) -> Self {
        Self {
            target: Some(target),
            source,
        }
    }

    pub fn unmatched(source: Row) -> Self {
        Self {
            target: None,
            source,
        }
    }
}

fn source_cell(value: &MergeValue, source: &Row) -> anyhow::Result<CellInput> {
    Ok(match value {
        MergeValue::Source(idx) => CellInput::Value(source.get(*idx).cloned().ok_or_else(|| {
            sql_err(
                "42703",
                format!(
                    "source column {idx} out of range for source row of {} columns",
                    source.len()
                ),
            )
        })?),
        MergeValue::Literal(value) => CellInput::Value(value.clone()),
        MergeValue::Default => CellInput::Default,
    })
}

impl Db {
    /// Matched rows go through the update path with full cascade handling,
    /// unmatched rows are inserted, all within one statement.
    pub(crate) fn merge_rows(
        &mut self,
        table: &str,
        rows: Vec<MergeRow>,
        insert: Option<&MergeTemplate>,
        update: Option<&MergeTemplate>,
        stmt: &mut StatementContext<'_>,
    ) -> anyhow::Result<usize> {
        let meta = self.table_meta(table)?.clone();
        let update_plan = match update {
            Some(template) => {
                let names: Vec<String> = template
                    .assignments
                    .iter()
                    .map(|(name, _)| name.clone())
                    .collect();
                Some(resolve_changed_columns(&meta, &names)?)
            }
            None => None,
        };
        let insert_plan = match insert {
            Some(template) => {
                let mut plan = Vec::with_capacity(template.assignments.len());
                for (name, value) in &template.assignments {
                    let idx = meta.column_index(name).ok_or_else(|| {
                        sql_err(
                            "42703",
                            format!("column {name} of relation {} does not exist", meta.name),
                        )
                    })?;
                    plan.push((idx, value));
                }
                Some(plan)
            }
            None => None,
        };

        let mut matched = HashSet::new();
        let mut updates = Vec::new();
        let mut inserts = Vec::new();
        for row in rows {
            match row.target {
                Some(row_id) => {
                    if !matched.insert(row_id) {
                        return Err(sql_err(
                            "21000",
                            format!(
                                "MERGE command cannot affect row {} of table {} a second time",
                                row_id, meta.name
                            ),
                        ));
                    }
                    if let Some(template) = update {
                        let values = template
                            .assignments
                            .iter()
                            .map(|(_, value)| source_cell(value, &row.source))
                            .collect::<anyhow::Result<Vec<_>>>()?;
                        updates.push(RowUpdate::new(row_id, values));
                    }
                }
                None => {
                    if let Some(plan) = insert_plan.as_ref() {
                        let mut cells = vec![CellInput::Default; meta.columns.len()];
                        for (idx, value) in plan {
                            cells[*idx] = source_cell(value, &row.source)?;
                        }
                        inserts.push(cells);
                    }
                }
            }
        }

        self.run_statement(stmt, |db, stmt| {
            let updated = match update_plan.as_deref() {
                Some(changed) if !updates.is_empty() => {
                    db.update_statement(&meta, changed, updates, stmt)?
                }
                _ => 0,
            };
            let inserted = db.insert_statement(&meta, inserts, stmt)?;
            tracing::debug!(
                table = %meta.name,
                updated,
                inserted,
                "merge finished"
            );
            Ok(updated + inserted)
        })
    }
}
