use crate::catalog::{
    CheckMeta, CheckPredicate, ColId, CompareOp, ForeignKeyMeta, PrimaryKeyMeta, ReferencedKey,
    TableId, TableMeta, UniqueMeta,
};
use crate::storage::{IdentityRuntime, Table};
use crate::txn::VisibilityContext;
use crate::types::{Column, ReferentialAction, Value, format_key};

use super::coerce::normalize_column_default;
use super::constraints::{build_fk_parent_key, build_referenced_parent_key, find_parent_row};
use super::visibility::visible_rows;
use super::{Db, sql_err};

#[derive(Clone, Debug)]
pub struct PrimaryKeySpec {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct UniqueSpec {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ForeignKeySpec {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: String,
    /// Defaults to the referenced table's primary key.
    pub referenced_columns: Option<Vec<String>>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl ForeignKeySpec {
    pub fn new(columns: &[&str], referenced_table: &str) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_table: referenced_table.to_string(),
            referenced_columns: None,
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn references(mut self, columns: &[&str]) -> Self {
        self.referenced_columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }
}

/// CHECK predicate over column names.
#[derive(Clone, Debug)]
pub enum CheckExpr {
    NotNull(String),
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    OneOf {
        column: String,
        values: Vec<Value>,
    },
}

#[derive(Clone, Debug)]
pub struct CheckSpec {
    pub name: Option<String>,
    pub expr: CheckExpr,
}

#[derive(Clone, Debug)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKeySpec>,
    pub unique_keys: Vec<UniqueSpec>,
    pub foreign_keys: Vec<ForeignKeySpec>,
    pub checks: Vec<CheckSpec>,
}

impl TableSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: None,
            unique_keys: Vec::new(),
            foreign_keys: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = Some(PrimaryKeySpec {
            name: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique_keys.push(UniqueSpec {
            name: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKeySpec) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn check(mut self, name: &str, expr: CheckExpr) -> Self {
        self.checks.push(CheckSpec {
            name: Some(name.to_string()),
            expr,
        });
        self
    }
}

fn resolve_columns(
    columns: &[Column],
    names: &[String],
    table: &str,
    what: &str,
) -> anyhow::Result<Vec<ColId>> {
    if names.is_empty() {
        return Err(sql_err(
            "42P16",
            format!("{what} on {table} must reference at least one column"),
        ));
    }
    let mut positions = Vec::with_capacity(names.len());
    for name in names {
        let idx = columns
            .iter()
            .position(|c| &c.name == name)
            .ok_or_else(|| {
                sql_err(
                    "42703",
                    format!("{what} column {name} does not exist on {table}"),
                )
            })?;
        if positions.contains(&idx) {
            return Err(sql_err(
                "42P16",
                format!("column {name} referenced multiple times in {what} on {table}"),
            ));
        }
        positions.push(idx);
    }
    Ok(positions)
}

fn same_column_set(a: &[ColId], b: &[ColId]) -> bool {
    a.len() == b.len() && a.iter().all(|c| b.contains(c))
}

impl Db {
    fn alloc_table_id(&mut self) -> TableId {
        self.next_table_id += 1;
        self.next_table_id
    }

    pub fn create_table(&mut self, spec: TableSpec) -> anyhow::Result<TableId> {
        let TableSpec {
            name,
            columns: specified,
            primary_key,
            unique_keys,
            foreign_keys,
            checks,
        } = spec;
        if self.catalog.get_table(&name).is_some() {
            return Err(sql_err("42P07", format!("table already exists: {name}")));
        }
        if specified.is_empty() {
            return Err(sql_err(
                "42P16",
                format!("table {name} must have at least one column"),
            ));
        }

        let mut columns: Vec<Column> = Vec::with_capacity(specified.len());
        let mut identities: Vec<Option<IdentityRuntime>> = Vec::with_capacity(specified.len());
        for mut col in specified {
            if columns.iter().any(|c| c.name == col.name) {
                return Err(sql_err(
                    "42701",
                    format!("column {} specified more than once", col.name),
                ));
            }
            if col.identity.is_some() {
                if col.default.is_some() {
                    return Err(sql_err(
                        "0A000",
                        format!("identity column {} cannot specify a DEFAULT", col.name),
                    ));
                }
                col.nullable = false;
            }
            normalize_column_default(&mut col)?;
            identities.push(col.identity.as_ref().map(|spec| IdentityRuntime {
                next_value: spec.start_with,
                increment_by: spec.increment_by,
            }));
            columns.push(col);
        }

        let pk_meta = match primary_key {
            Some(pk) => {
                let positions = resolve_columns(&columns, &pk.columns, &name, "primary key")?;
                for idx in &positions {
                    columns[*idx].nullable = false;
                }
                Some(PrimaryKeyMeta {
                    name: pk.name.unwrap_or_else(|| format!("{name}_pkey")),
                    columns: positions,
                })
            }
            None => None,
        };

        let mut unique_metas = Vec::with_capacity(unique_keys.len());
        for uk in unique_keys {
            let positions = resolve_columns(&columns, &uk.columns, &name, "unique key")?;
            let uk_name = uk
                .name
                .unwrap_or_else(|| format!("{}_{}_key", name, uk.columns.join("_")));
            unique_metas.push(UniqueMeta {
                name: uk_name,
                columns: positions,
            });
        }

        let id = self.alloc_table_id();
        let mut meta = TableMeta {
            id,
            name: name.clone(),
            columns,
            primary_key: pk_meta,
            unique_keys: unique_metas,
            foreign_keys: Vec::new(),
            checks: Vec::new(),
        };
        for fk in foreign_keys {
            let fk_meta = self.build_foreign_key(&meta, fk)?;
            meta.foreign_keys.push(fk_meta);
        }
        for check in checks {
            let check_meta = self.build_check(&meta, check)?;
            meta.checks.push(check_meta);
        }

        let mut names: Vec<&str> = Vec::new();
        for constraint in meta
            .primary_key
            .iter()
            .map(|pk| pk.name.as_str())
            .chain(meta.unique_keys.iter().map(|u| u.name.as_str()))
            .chain(meta.foreign_keys.iter().map(|f| f.name.as_str()))
            .chain(meta.checks.iter().map(|c| c.name.as_str()))
        {
            if names.contains(&constraint) {
                return Err(sql_err(
                    "42710",
                    format!("constraint {constraint} for relation {name} already exists"),
                ));
            }
            names.push(constraint);
        }

        let has_pk = meta.primary_key.is_some();
        tracing::debug!(
            table = %name,
            columns = meta.columns.len(),
            foreign_keys = meta.foreign_keys.len(),
            "created table"
        );
        self.catalog.insert_table(meta);
        self.tables.insert(id, Table::with_pk(has_pk, identities));
        Ok(id)
    }

    /// Adds a foreign key to an existing table. Every visible row must
    /// already satisfy it. This is the only way to close a reference cycle
    /// between two tables.
    pub fn add_foreign_key(
        &mut self,
        table: &str,
        spec: ForeignKeySpec,
        visibility: &VisibilityContext,
    ) -> anyhow::Result<()> {
        let meta = self.table_meta(table)?.clone();
        if let Some(name) = spec.name.as_deref()
            && meta.constraint_kind(name).is_some()
        {
            return Err(sql_err(
                "42710",
                format!("constraint {name} for relation {table} already exists"),
            ));
        }
        let fk = self.build_foreign_key(&meta, spec)?;
        if meta.constraint_kind(&fk.name).is_some() {
            return Err(sql_err(
                "42710",
                format!("constraint {} for relation {table} already exists", fk.name),
            ));
        }

        let storage = self.storage(meta.id)?;
        for (_, row) in visible_rows(storage, visibility) {
            let Some(key) = build_fk_parent_key(&row, &fk) else {
                continue;
            };
            if fk.is_self_referencing()
                && build_referenced_parent_key(&row, &fk).as_deref() == Some(key.as_slice())
            {
                continue;
            }
            if find_parent_row(&self.tables, &fk, &key, visibility)?.is_none() {
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

        let storage = self
            .tables
            .get_mut(&meta.id)
            .ok_or_else(|| sql_err("XX000", format!("missing storage for table id {}", meta.id)))?;
        // the reverse index tracks the newest live version of each row
        for (row_id, versions) in &storage.rows_by_id {
            let Some(live) = versions.iter().rev().find(|v| v.xmax.is_none()) else {
                continue;
            };
            if let Some(key) = build_fk_parent_key(&live.data, &fk) {
                storage
                    .fk_rev
                    .entry((fk.id, key))
                    .or_default()
                    .insert(*row_id);
            }
        }
        tracing::debug!(
            table = %meta.name,
            constraint = %fk.name,
            referenced = %fk.referenced_table_name,
            "added foreign key"
        );
        self.catalog.attach_foreign_key(fk);
        Ok(())
    }

    fn build_foreign_key(
        &mut self,
        child: &TableMeta,
        spec: ForeignKeySpec,
    ) -> anyhow::Result<ForeignKeyMeta> {
        let local = resolve_columns(&child.columns, &spec.columns, &child.name, "foreign key")?;
        let self_reference = spec.referenced_table == child.name;
        let parent = if self_reference {
            child
        } else {
            self.catalog.get_table(&spec.referenced_table).ok_or_else(|| {
                sql_err(
                    "42P01",
                    format!(
                        "referenced table {} for foreign key on {} does not exist",
                        spec.referenced_table, child.name
                    ),
                )
            })?
        };

        let referenced = match spec.referenced_columns.as_ref() {
            Some(names) => resolve_columns(
                &parent.columns,
                names,
                &parent.name,
                "referenced key",
            )?,
            None => parent
                .primary_key
                .as_ref()
                .map(|pk| pk.columns.clone())
                .ok_or_else(|| {
                    sql_err(
                        "42830",
                        format!(
                            "there is no primary key for referenced table {}",
                            parent.name
                        ),
                    )
                })?,
        };
        if referenced.len() != local.len() {
            return Err(sql_err(
                "42830",
                format!(
                    "foreign key on {} has {} columns but references {}",
                    child.name,
                    local.len(),
                    referenced.len()
                ),
            ));
        }

        // the referenced columns must be exactly a key of the parent; keys are
        // looked up in that key's column order
        let (referenced_key, key_columns) = match parent
            .primary_key
            .as_ref()
            .filter(|pk| same_column_set(&pk.columns, &referenced))
        {
            Some(pk) => (ReferencedKey::PrimaryKey, pk.columns.clone()),
            None => {
                let uk = parent
                    .unique_keys
                    .iter()
                    .find(|uk| same_column_set(&uk.columns, &referenced))
                    .ok_or_else(|| {
                        sql_err(
                            "42830",
                            format!(
                                "there is no unique constraint matching given keys for referenced table {}",
                                parent.name
                            ),
                        )
                    })?;
                (ReferencedKey::Unique(uk.name.clone()), uk.columns.clone())
            }
        };
        let mut local_columns = Vec::with_capacity(key_columns.len());
        for key_col in &key_columns {
            let pos = referenced
                .iter()
                .position(|c| c == key_col)
                .ok_or_else(|| sql_err("XX000", "referenced key column lost during alignment"))?;
            local_columns.push(local[pos]);
        }

        for (local_idx, parent_idx) in local_columns.iter().zip(key_columns.iter()) {
            let local_col = &child.columns[*local_idx];
            let parent_col = &parent.columns[*parent_idx];
            if local_col.data_type != parent_col.data_type {
                return Err(sql_err(
                    "42804",
                    format!(
                        "foreign key column {} type {} does not match referenced column {} type {}",
                        local_col.name, local_col.data_type, parent_col.name, parent_col.data_type
                    ),
                ));
            }
        }

        let sets_null = spec.on_delete == ReferentialAction::SetNull
            || spec.on_update == ReferentialAction::SetNull;
        if sets_null
            && let Some(col) = local_columns
                .iter()
                .map(|idx| &child.columns[*idx])
                .find(|col| !col.nullable)
        {
            return Err(sql_err(
                "42P16",
                format!(
                    "SET NULL action on {} requires nullable column {}",
                    child.name, col.name
                ),
            ));
        }

        let name = spec
            .name
            .unwrap_or_else(|| format!("{}_{}_fkey", child.name, spec.columns.join("_")));
        let (referenced_table, referenced_table_name) = (parent.id, parent.name.clone());
        Ok(ForeignKeyMeta {
            id: self.catalog.alloc_constraint_id(),
            name,
            table: child.id,
            table_name: child.name.clone(),
            local_columns,
            referenced_table,
            referenced_table_name,
            referenced_columns: key_columns,
            referenced_key,
            on_delete: spec.on_delete,
            on_update: spec.on_update,
        })
    }

    fn build_check(&self, meta: &TableMeta, spec: CheckSpec) -> anyhow::Result<CheckMeta> {
        let column = |name: &str| {
            meta.column_index(name).ok_or_else(|| {
                sql_err(
                    "42703",
                    format!("check column {name} does not exist on {}", meta.name),
                )
            })
        };
        let (first_col, predicate) = match spec.expr {
            CheckExpr::NotNull(col) => {
                let idx = column(&col)?;
                (col, CheckPredicate::NotNull(idx))
            }
            CheckExpr::Compare { column: col, op, value } => {
                let idx = column(&col)?;
                (
                    col,
                    CheckPredicate::Compare {
                        column: idx,
                        op,
                        value,
                    },
                )
            }
            CheckExpr::OneOf { column: col, values } => {
                let idx = column(&col)?;
                (col, CheckPredicate::OneOf { column: idx, values })
            }
        };
        Ok(CheckMeta {
            name: spec
                .name
                .unwrap_or_else(|| format!("{}_{}_check", meta.name, first_col)),
            predicate,
        })
    }
}
