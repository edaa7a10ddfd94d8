#![allow(dead_code)]

use std::sync::Arc;

use refcascade::session::Session;
use refcascade::storage::RowId;
use refcascade::{
    Column, DataType, Engine, EngineConfig, ForeignKeySpec, ReferentialAction, TableSpec, Value,
    sqlstate,
};

pub struct TestCtx {
    pub engine: Engine,
    pub session: Arc<Session>,
}

pub fn start() -> TestCtx {
    start_with(EngineConfig::default())
}

pub fn start_with(config: EngineConfig) -> TestCtx {
    let engine = Engine::new(config);
    let session = engine.create_session();
    TestCtx { engine, session }
}

pub fn int(v: i64) -> Value {
    Value::Int64(v)
}

pub fn text(s: &str) -> Value {
    Value::text(s)
}

pub fn int_col(name: &str) -> Column {
    Column::new(name, DataType::Int8)
}

pub fn text_col(name: &str) -> Column {
    Column::new(name, DataType::Text)
}

pub fn code(err: &anyhow::Error) -> &'static str {
    sqlstate(err).unwrap_or("none")
}

impl TestCtx {
    /// `name(id int8 primary key)`.
    pub fn create_parent(&self, name: &str) {
        self.engine
            .create_table(
                TableSpec::new(name)
                    .column(int_col("id"))
                    .primary_key(&["id"]),
            )
            .expect("create parent");
    }

    /// `name(id int8 primary key, parent_id int8 references parent(id))`.
    pub fn create_child(
        &self,
        name: &str,
        parent: &str,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
    ) {
        self.engine
            .create_table(
                TableSpec::new(name)
                    .column(int_col("id"))
                    .column(int_col("parent_id"))
                    .primary_key(&["id"])
                    .foreign_key(
                        ForeignKeySpec::new(&["parent_id"], parent)
                            .on_delete(on_delete)
                            .on_update(on_update),
                    ),
            )
            .expect("create child");
    }

    pub async fn insert(&self, table: &str, rows: Vec<Vec<Value>>) {
        self.engine
            .insert_values(&self.session, table, rows)
            .await
            .expect("insert rows");
    }

    pub fn rows(&self, table: &str) -> Vec<Vec<Value>> {
        let mut rows: Vec<Vec<Value>> = self
            .engine
            .scan(&self.session, table)
            .expect("scan")
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        rows.sort_by_key(|row| row.first().and_then(Value::as_i64));
        rows
    }

    /// First column of every visible row, sorted.
    pub fn ids(&self, table: &str) -> Vec<i64> {
        self.rows(table)
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_i64))
            .collect()
    }

    pub fn count(&self, table: &str) -> usize {
        self.engine.scan(&self.session, table).expect("scan").len()
    }

    pub fn row_id(&self, table: &str, key: i64) -> RowId {
        self.engine
            .find_by_key(&self.session, table, &[int(key)])
            .expect("lookup")
            .map(|(row_id, _)| row_id)
            .unwrap_or_else(|| panic!("{table} has no row with key {key}"))
    }

    pub fn row(&self, table: &str, key: i64) -> Option<Vec<Value>> {
        self.engine
            .find_by_key(&self.session, table, &[int(key)])
            .expect("lookup")
            .map(|(_, row)| row)
    }

    pub async fn delete_keys(&self, table: &str, keys: &[i64]) -> anyhow::Result<usize> {
        let ids: Vec<RowId> = keys.iter().map(|key| self.row_id(table, *key)).collect();
        self.engine.execute_delete(&self.session, table, &ids).await
    }
}
