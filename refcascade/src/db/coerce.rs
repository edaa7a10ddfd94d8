use crate::catalog::{ColId, TableMeta};
use crate::errors::sql_err;
use crate::types::{Column, DataType, Value};

fn cast_value_to_type(val: Value, target: DataType) -> Result<Value, (&'static str, String)> {
    match (target, val) {
        (DataType::Int4, Value::Int64(v)) => {
            if v < i32::MIN as i64 || v > i32::MAX as i64 {
                return Err(("22003", format!("value {v} out of range for integer")));
            }
            Ok(Value::Int64(v))
        }
        (DataType::Int8, Value::Int64(v)) => Ok(Value::Int64(v)),
        (DataType::Float8, Value::Float64Bits(bits)) => Ok(Value::Float64Bits(bits)),
        (DataType::Float8, Value::Int64(v)) => Ok(Value::from_f64(v as f64)),
        (DataType::Text, Value::Text(s)) => Ok(Value::Text(s)),
        (DataType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (DataType::Date, Value::Date(d)) => Ok(Value::Date(d)),
        (DataType::Timestamp, Value::TimestampMicros(m)) => Ok(Value::TimestampMicros(m)),
        (DataType::Bytea, Value::Bytes(bytes)) => Ok(Value::Bytes(bytes)),
        (dt, got) => Err(("42804", format!("expected {dt}, got {got}"))),
    }
}

pub(crate) fn coerce_value_for_column(
    val: Value,
    col: &Column,
    idx: ColId,
    meta: &TableMeta,
) -> anyhow::Result<Value> {
    if let Value::Null = val {
        if let Some(pk) = &meta.primary_key
            && pk.columns.contains(&idx)
        {
            return Err(sql_err(
                "23502",
                format!("primary key column {} cannot be null", col.name),
            ));
        }
        if !col.nullable {
            return Err(sql_err(
                "23502",
                format!(
                    "null value in column {} of table {} violates not-null constraint",
                    col.name, meta.name
                ),
            ));
        }
        return Ok(Value::Null);
    }
    cast_value_to_type(val, col.data_type).map_err(|(code, message)| {
        sql_err(
            code,
            format!("column {} (index {}): {}", col.name, idx, message),
        )
    })
}

/// Default for `col`, as SET DEFAULT and `CellInput::Default` see it.
pub(crate) fn column_default(meta: &TableMeta, idx: ColId) -> Value {
    meta.columns
        .get(idx)
        .and_then(|col| col.default.clone())
        .unwrap_or(Value::Null)
}

/// Casts a literal default to the column type once, at creation.
pub(crate) fn normalize_column_default(col: &mut Column) -> anyhow::Result<()> {
    let Some(value) = col.default.take() else {
        return Ok(());
    };
    if value.is_null() {
        if !col.nullable {
            return Err(sql_err(
                "23502",
                format!("default NULL not allowed for NOT NULL column {}", col.name),
            ));
        }
        col.default = Some(Value::Null);
        return Ok(());
    }
    let cast = cast_value_to_type(value, col.data_type).map_err(|(code, message)| {
        sql_err(code, format!("default for column {}: {}", col.name, message))
    })?;
    col.default = Some(cast);
    Ok(())
}
