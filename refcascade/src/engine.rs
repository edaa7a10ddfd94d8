use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::catalog::TableId;
use crate::config::{ConflictPolicy, EngineConfig};
use crate::db::{
    Db, ForeignKeySpec, LockHandle, LockOwner, MergeRow, MergeTemplate, RowUpdate, StatementContext,
    TableSpec,
};
use crate::errors::{SqlError, sql_err};
use crate::session::{Session, SessionManager};
use crate::storage::{Row, RowId, RowPointer};
use crate::trigger::{TriggerAction, TriggerEvent, TriggerLevel};
use crate::txn::{SYSTEM_TXID, TransactionManager, TxId, VisibilityContext};
use crate::types::{CellInput, Value};

/// Shared handle to one in-memory database. Cheap to clone; every clone
/// sees the same tables, transactions and sessions.
#[derive(Clone)]
pub struct Engine {
    db: Arc<RwLock<Db>>,
    txn_manager: Arc<TransactionManager>,
    sessions: Arc<SessionManager>,
    config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            db: Arc::new(RwLock::new(Db::default())),
            txn_manager: Arc::new(TransactionManager::new()),
            sessions: Arc::new(SessionManager::new()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn create_session(&self) -> Arc<Session> {
        self.sessions.create_session()
    }

    /// Ends the session, rolling back its open transaction.
    pub fn close_session(&self, session: &Session) -> anyhow::Result<()> {
        if session.in_transaction() {
            self.rollback(session)?;
        }
        self.sessions.remove(session.id());
        Ok(())
    }

    pub fn create_table(&self, spec: TableSpec) -> anyhow::Result<TableId> {
        self.db.write().create_table(spec)
    }

    /// Adds a foreign key to an existing table, checked against committed
    /// rows.
    pub fn add_foreign_key(&self, table: &str, spec: ForeignKeySpec) -> anyhow::Result<()> {
        let visibility = VisibilityContext::new(
            &self.txn_manager,
            self.txn_manager.snapshot_xid(),
            SYSTEM_TXID,
        );
        self.db.write().add_foreign_key(table, spec, &visibility)
    }

    pub fn register_trigger(
        &self,
        table: &str,
        name: &str,
        event: TriggerEvent,
        level: TriggerLevel,
        action: impl TriggerAction + 'static,
    ) -> anyhow::Result<()> {
        self.db
            .write()
            .register_trigger(table, name, event, level, Arc::new(action))
    }

    pub fn begin(&self, session: &Session) -> anyhow::Result<()> {
        if session.in_transaction() {
            return Err(sql_err("25001", "there is already a transaction in progress"));
        }
        let txid = self.txn_manager.begin();
        session.begin_transaction(txid);
        debug!(session = session.id(), txid, "begin");
        Ok(())
    }

    pub fn commit(&self, session: &Session) -> anyhow::Result<()> {
        let (txid, owner, _) = session.end_transaction();
        let Some(txid) = txid else {
            return Err(sql_err("25P01", "there is no transaction in progress"));
        };
        self.txn_manager.commit(txid);
        if let Some(owner) = owner {
            self.db.read().release_locks(owner);
        }
        debug!(session = session.id(), txid, "commit");
        Ok(())
    }

    pub fn rollback(&self, session: &Session) -> anyhow::Result<()> {
        let (txid, owner, changes) = session.end_transaction();
        let Some(txid) = txid else {
            return Err(sql_err("25P01", "there is no transaction in progress"));
        };
        let mut db = self.db.write();
        let undone = db.rollback_changes(&changes.undo);
        self.txn_manager.abort(txid);
        if let Some(owner) = owner {
            db.release_locks(owner);
        }
        debug!(
            session = session.id(),
            txid,
            changes = changes.undo.len(),
            "rollback"
        );
        undone
    }

    /// Visibility for a read by `session`: its own transaction's view, or
    /// the latest committed data outside a transaction.
    fn read_visibility(&self, session: &Session) -> VisibilityContext<'_> {
        let current = session.current_tx().unwrap_or(SYSTEM_TXID);
        VisibilityContext::new(&self.txn_manager, self.txn_manager.snapshot_xid(), current)
    }

    pub fn scan(&self, session: &Session, table: &str) -> anyhow::Result<Vec<(RowId, Row)>> {
        let visibility = self.read_visibility(session);
        self.db.read().scan(table, &visibility)
    }

    pub fn find_by_key(
        &self,
        session: &Session,
        table: &str,
        key: &[Value],
    ) -> anyhow::Result<Option<(RowId, Row)>> {
        let visibility = self.read_visibility(session);
        self.db.read().find_by_key(table, key, &visibility)
    }

    pub async fn insert(
        &self,
        session: &Session,
        table: &str,
        rows: Vec<Vec<CellInput>>,
    ) -> anyhow::Result<usize> {
        self.execute(session, "insert", |db, stmt| {
            db.insert_rows(table, rows.clone(), stmt)
        })
        .await
    }

    /// `insert` with every cell given explicitly.
    pub async fn insert_values(
        &self,
        session: &Session,
        table: &str,
        rows: Vec<Row>,
    ) -> anyhow::Result<usize> {
        let cells = rows
            .into_iter()
            .map(|row| row.into_iter().map(CellInput::Value).collect())
            .collect();
        self.insert(session, table, cells).await
    }

    pub async fn execute_delete(
        &self,
        session: &Session,
        table: &str,
        rows: &[RowId],
    ) -> anyhow::Result<usize> {
        self.execute(session, "delete", |db, stmt| db.delete_rows(table, rows, stmt))
            .await
    }

    pub async fn execute_update(
        &self,
        session: &Session,
        table: &str,
        changed: &[&str],
        rows: Vec<RowUpdate>,
    ) -> anyhow::Result<usize> {
        let changed: Vec<String> = changed.iter().map(|c| c.to_string()).collect();
        self.execute(session, "update", |db, stmt| {
            db.update_rows(table, &changed, rows.clone(), stmt)
        })
        .await
    }

    pub async fn execute_merge(
        &self,
        session: &Session,
        table: &str,
        rows: Vec<MergeRow>,
        insert: Option<&MergeTemplate>,
        update: Option<&MergeTemplate>,
    ) -> anyhow::Result<usize> {
        self.execute(session, "merge", |db, stmt| {
            db.merge_rows(table, rows.clone(), insert, update, stmt)
        })
        .await
    }

    /// The session's transaction, or a fresh autocommit one.
    fn statement_txn(&self, session: &Session) -> (TxId, LockOwner, bool) {
        if let (Some(txid), Some(owner)) = (session.current_tx(), session.lock_owner()) {
            return (txid, owner, false);
        }
        let txid = self.txn_manager.begin();
        let owner = session.begin_transaction(txid);
        (txid, owner, true)
    }

    fn run_once<T>(
        &self,
        session: &Session,
        kind: &'static str,
        txid: TxId,
        owner: LockOwner,
        statement: &impl Fn(&mut Db, &mut StatementContext<'_>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let visibility =
            VisibilityContext::new(&self.txn_manager, self.txn_manager.snapshot_xid(), txid);
        let mut stmt = StatementContext::new(kind, visibility, owner, self.config.max_cascade_depth);
        let mut db = self.db.write();
        let value = statement(&mut *db, &mut stmt)?;
        session.record_changes(std::mem::take(&mut stmt.undo));
        Ok(value)
    }

    /// Row to wait for before re-running a statement that lost a conflict.
    fn contested_row(&self, err: &anyhow::Error, attempt: usize) -> Option<RowPointer> {
        if self.config.conflict_policy != ConflictPolicy::Wait
            || attempt >= self.config.max_conflict_retries
        {
            return None;
        }
        err.downcast_ref::<SqlError>()
            .filter(|sql| sql.is_retriable())
            .and_then(|sql| sql.conflict)
    }

    async fn execute<T>(
        &self,
        session: &Session,
        kind: &'static str,
        statement: impl Fn(&mut Db, &mut StatementContext<'_>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let (txid, owner, autocommit) = self.statement_txn(session);
        let locks: LockHandle = self.db.read().lock_handle();
        let mut attempt = 0usize;
        loop {
            match self.run_once(session, kind, txid, owner, &statement) {
                Ok(value) => {
                    if autocommit {
                        self.commit(session)?;
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if let Some(row) = self.contested_row(&err, attempt) {
                        attempt += 1;
                        warn!(
                            session = session.id(),
                            statement = kind,
                            attempt,
                            table_id = row.table_id,
                            row = row.row_id,
                            error = %err,
                            "statement conflict, waiting for row lock"
                        );
                        if let Err(deadlock) = locks.lock_row_blocking(row, owner).await {
                            warn!(
                                session = session.id(),
                                statement = kind,
                                table_id = row.table_id,
                                row = row.row_id,
                                error = %deadlock,
                                "deadlock, rolling back transaction"
                            );
                            self.rollback(session)?;
                            return Err(deadlock);
                        }
                        continue;
                    }
                    if autocommit {
                        self.rollback(session)?;
                    }
                    return Err(err);
                }
            }
        }
    }
}
