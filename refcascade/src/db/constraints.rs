use std::cmp::Ordering;
use std::collections::HashMap;

use crate::catalog::{
    CheckMeta, CheckPredicate, CompareOp, ForeignKeyMeta, ReferencedKey, TableId, TableMeta,
};
use crate::errors::sql_err;
use crate::storage::{Row, RowId, Table};
use crate::txn::VisibilityContext;
use crate::types::Value;

use super::visibility::visible_row_clone;

/// Index keys a row contributes to its table: primary key, unique keys
/// (None when a column is NULL) and one reverse-index key per foreign key.
#[derive(Clone, Debug, Default)]
pub(crate) struct IndexEntries {
    pub(crate) pk: Option<Vec<Value>>,
    pub(crate) unique: Vec<(String, Option<Vec<Value>>)>,
    pub(crate) fks: Vec<Option<Vec<Value>>>,
}

impl IndexEntries {
    pub(crate) fn for_row(meta: &TableMeta, row: &[Value]) -> anyhow::Result<Self> {
        Ok(Self {
            pk: build_primary_key(meta, row)?,
            unique: build_unique_index_values(meta, row),
            fks: meta
                .foreign_keys
                .iter()
                .map(|fk| build_fk_parent_key(row, fk))
                .collect(),
        })
    }
}

pub(crate) fn build_primary_key(meta: &TableMeta, row: &[Value]) -> anyhow::Result<Option<Vec<Value>>> {
    let Some(pk) = meta.primary_key.as_ref() else {
        return Ok(None);
    };
    let mut values = Vec::with_capacity(pk.columns.len());
    for idx in &pk.columns {
        let value = row.get(*idx).cloned().unwrap_or(Value::Null);
        if matches!(value, Value::Null) {
            return Err(sql_err(
                "23502",
                format!(
                    "primary key column {} cannot be null",
                    meta.columns[*idx].name
                ),
            ));
        }
        values.push(value);
    }
    Ok(Some(values))
}

fn project_non_null(row: &[Value], columns: &[usize]) -> Option<Vec<Value>> {
    let mut values = Vec::with_capacity(columns.len());
    for idx in columns {
        let value = row.get(*idx).cloned().unwrap_or(Value::Null);
        if matches!(value, Value::Null) {
            return None;
        }
        values.push(value);
    }
    Some(values)
}

/// The child's foreign key value, or None if any column is NULL.
pub(crate) fn build_fk_parent_key(row: &[Value], fk: &ForeignKeyMeta) -> Option<Vec<Value>> {
    project_non_null(row, &fk.local_columns)
}

/// The parent's referenced key value, or None if any column is NULL.
pub(crate) fn build_referenced_parent_key(
    row: &[Value],
    fk: &ForeignKeyMeta,
) -> Option<Vec<Value>> {
    project_non_null(row, &fk.referenced_columns)
}

pub(crate) fn build_unique_index_values(
    meta: &TableMeta,
    row: &[Value],
) -> Vec<(String, Option<Vec<Value>>)> {
    meta.unique_keys
        .iter()
        .map(|uk| (uk.name.clone(), project_non_null(row, &uk.columns)))
        .collect()
}

/// Fails with 23505 if `entries` collide with a row other than `row_id`.
pub(crate) fn check_index_conflicts(
    table: &Table,
    meta: &TableMeta,
    entries: &IndexEntries,
    row_id: Option<RowId>,
) -> anyhow::Result<()> {
    let other = |existing: &RowId| row_id.is_none_or(|rid| *existing != rid);
    if let (Some(pk), Some(pk_map), Some(pk_meta)) =
        (entries.pk.as_ref(), table.pk_map.as_ref(), meta.primary_key.as_ref())
        && pk_map.get(pk).is_some_and(other)
    {
        return Err(sql_err(
            "23505",
            format!(
                "duplicate key value violates unique constraint {}",
                pk_meta.name
            ),
        ));
    }
    for (index_name, maybe_values) in &entries.unique {
        let Some(values) = maybe_values else {
            continue;
        };
        if table
            .unique_maps
            .get(index_name)
            .and_then(|map| map.get(values))
            .is_some_and(other)
        {
            return Err(sql_err(
                "23505",
                format!("duplicate key value violates unique constraint {index_name}"),
            ));
        }
    }
    Ok(())
}

pub(crate) fn add_index_entries(
    table: &mut Table,
    meta: &TableMeta,
    entries: &IndexEntries,
    row_id: RowId,
) {
    if let (Some(pk), Some(pk_map)) = (entries.pk.as_ref(), table.pk_map.as_mut()) {
        pk_map.insert(pk.clone(), row_id);
    }
    for (index_name, maybe_values) in &entries.unique {
        if let Some(values) = maybe_values {
            table
                .unique_maps
                .entry(index_name.clone())
                .or_insert_with(HashMap::new)
                .insert(values.clone(), row_id);
        }
    }
    for (fk, key) in meta.foreign_keys.iter().zip(entries.fks.iter()) {
        if let Some(values) = key {
            table
                .fk_rev
                .entry((fk.id, values.clone()))
                .or_default()
                .insert(row_id);
        }
    }
}

pub(crate) fn remove_index_entries(
    table: &mut Table,
    meta: &TableMeta,
    entries: &IndexEntries,
    row_id: RowId,
) {
    if let (Some(pk), Some(pk_map)) = (entries.pk.as_ref(), table.pk_map.as_mut())
        && pk_map.get(pk) == Some(&row_id)
    {
        pk_map.remove(pk);
    }
    for (index_name, maybe_values) in &entries.unique {
        let Some(values) = maybe_values else {
            continue;
        };
        let mut remove_entry = false;
        if let Some(map) = table.unique_maps.get_mut(index_name) {
            if map.get(values) == Some(&row_id) {
                map.remove(values);
            }
            remove_entry = map.is_empty();
        }
        if remove_entry {
            table.unique_maps.remove(index_name);
        }
    }
    for (fk, key) in meta.foreign_keys.iter().zip(entries.fks.iter()) {
        let Some(values) = key else {
            continue;
        };
        let map_key = (fk.id, values.clone());
        if let Some(set) = table.fk_rev.get_mut(&map_key) {
            set.remove(&row_id);
            if set.is_empty() {
                table.fk_rev.remove(&map_key);
            }
        }
    }
}

/// NOT NULL and CHECK constraints of a complete row image.
pub(crate) fn check_row_constraints(meta: &TableMeta, row: &[Value]) -> anyhow::Result<()> {
    for (idx, col) in meta.columns.iter().enumerate() {
        if !col.nullable && row.get(idx).is_none_or(Value::is_null) {
            return Err(sql_err(
                "23502",
                format!(
                    "null value in column {} of table {} violates not-null constraint",
                    col.name, meta.name
                ),
            ));
        }
    }
    for check in &meta.checks {
        if !check_passes(check, row) {
            return Err(sql_err(
                "23514",
                format!(
                    "new row for table {} violates check constraint {}",
                    meta.name, check.name
                ),
            ));
        }
    }
    Ok(())
}

// unknown (NULL) satisfies a check, as in SQL
fn check_passes(check: &CheckMeta, row: &[Value]) -> bool {
    let cell = |idx: usize| row.get(idx).unwrap_or(&Value::Null);
    match &check.predicate {
        CheckPredicate::NotNull(col) => !cell(*col).is_null(),
        CheckPredicate::Compare { column, op, value } => {
            let lhs = cell(*column);
            if lhs.is_null() || value.is_null() {
                return true;
            }
            let Some(ord) = compare_values(lhs, value) else {
                return false;
            };
            match op {
                CompareOp::Eq => ord == Ordering::Equal,
                CompareOp::NotEq => ord != Ordering::Equal,
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::LtEq => ord != Ordering::Greater,
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::GtEq => ord != Ordering::Less,
            }
        }
        CheckPredicate::OneOf { column, values } => {
            let lhs = cell(*column);
            lhs.is_null() || values.contains(lhs)
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => Some(x.cmp(y)),
        (Value::Float64Bits(_), Value::Float64Bits(_))
        | (Value::Float64Bits(_), Value::Int64(_))
        | (Value::Int64(_), Value::Float64Bits(_)) => {
            let x = a.as_f64().or_else(|| a.as_i64().map(|v| v as f64))?;
            let y = b.as_f64().or_else(|| b.as_i64().map(|v| v as f64))?;
            x.partial_cmp(&y)
        }
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::TimestampMicros(x), Value::TimestampMicros(y)) => Some(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn storage_for(tables: &HashMap<TableId, Table>, id: TableId) -> anyhow::Result<&Table> {
    tables
        .get(&id)
        .ok_or_else(|| sql_err("XX000", format!("missing storage for table id {id}")))
}

/// Visible parent row whose referenced key equals `key`.
pub(crate) fn find_parent_row(
    tables: &HashMap<TableId, Table>,
    fk: &ForeignKeyMeta,
    key: &[Value],
    visibility: &VisibilityContext,
) -> anyhow::Result<Option<(RowId, Row)>> {
    let parent = storage_for(tables, fk.referenced_table)?;
    let candidate = match &fk.referenced_key {
        ReferencedKey::PrimaryKey => parent.pk_map.as_ref().and_then(|map| map.get(key)),
        ReferencedKey::Unique(name) => parent.unique_maps.get(name).and_then(|map| map.get(key)),
    };
    Ok(candidate.and_then(|row_id| {
        visible_row_clone(parent, *row_id, visibility).map(|row| (*row_id, row))
    }))
}

/// Visible child rows whose foreign key value equals `key`, by row id.
pub(crate) fn find_child_rows(
    tables: &HashMap<TableId, Table>,
    fk: &ForeignKeyMeta,
    key: &[Value],
    visibility: &VisibilityContext,
) -> anyhow::Result<Vec<(RowId, Row)>> {
    let child = storage_for(tables, fk.table)?;
    Ok(child
        .referencing_rows(fk.id, key)
        .filter_map(|row_id| visible_row_clone(child, row_id, visibility).map(|row| (row_id, row)))
        .collect())
}
