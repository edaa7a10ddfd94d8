use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, warn};

use super::*;

/// Lifecycle of one data-changing statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Validate,
    ConflictCheck,
    Apply,
    Trigger,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Validate => "validate",
            Phase::ConflictCheck => "conflict_check",
            Phase::Apply => "apply",
            Phase::Trigger => "trigger",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub(crate) struct StatementContext<'v> {
    pub(crate) visibility: VisibilityContext<'v>,
    pub(crate) txid: TxId,
    pub(crate) lock_owner: LockOwner,
    pub(crate) max_cascade_depth: usize,
    kind: &'static str,
    phase: Phase,
    pub(crate) undo: Vec<UndoEntry>,
    pub(crate) triggers: TriggerBatch,
}

impl<'v> StatementContext<'v> {
    pub(crate) fn new(
        kind: &'static str,
        visibility: VisibilityContext<'v>,
        lock_owner: LockOwner,
        max_cascade_depth: usize,
    ) -> Self {
        Self {
            txid: visibility.current_tx,
            visibility,
            lock_owner,
            max_cascade_depth,
            kind,
            phase: Phase::Validate,
            undo: Vec::new(),
            triggers: TriggerBatch::default(),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn enter(&mut self, next: Phase) {
        debug!(statement = self.kind, from = %self.phase, to = %next, "statement phase");
        self.phase = next;
    }
}

impl Db {
    /// Runs `body` as one atomic statement. `body` validates, certifies and
    /// applies, queueing trigger work on the context; triggers fire after
    /// it returns. Any failure replays the statement's undo log.
    pub(crate) fn run_statement<'v, T>(
        &mut self,
        stmt: &mut StatementContext<'v>,
        body: impl FnOnce(&mut Db, &mut StatementContext<'v>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let result = body(self, stmt).and_then(|value| {
            stmt.enter(Phase::Trigger);
            stmt.triggers.fire_all(&self.triggers)?;
            Ok(value)
        });
        match result {
            Ok(value) => {
                stmt.enter(Phase::Done);
                Ok(value)
            }
            Err(err) => {
                let failed_in = stmt.phase();
                stmt.enter(Phase::Failed);
                if let Err(undo_err) = self.rollback_changes(&stmt.undo) {
                    warn!(
                        statement = stmt.kind,
                        phase = %failed_in,
                        error = %err,
                        undo_error = %undo_err,
                        "statement undo failed"
                    );
                    stmt.undo.clear();
                    return Err(err.context(format!(
                        "undo after failed {} statement also failed: {undo_err}",
                        stmt.kind
                    )));
                }
                stmt.undo.clear();
                debug!(
                    statement = stmt.kind,
                    phase = %failed_in,
                    error = %err,
                    "statement rolled back"
                );
                Err(err)
            }
        }
    }

    /// Locks every row the statement touches and verifies no other
    /// transaction deleted or replaced the version this statement read.
    /// On failure the locks taken here are released again; locks the
    /// transaction already held stay.
    pub(crate) fn certify_no_conflict(
        &self,
        touched: &BTreeSet<RowPointer>,
        stmt: &StatementContext<'_>,
    ) -> anyhow::Result<()> {
        let mut acquired = Vec::new();
        let certified = self.lock_and_certify(touched, stmt, &mut acquired);
        if certified.is_err() {
            self.locks.release_rows(stmt.lock_owner, &acquired);
        }
        certified
    }

    fn lock_and_certify(
        &self,
        touched: &BTreeSet<RowPointer>,
        stmt: &StatementContext<'_>,
        acquired: &mut Vec<RowPointer>,
    ) -> anyhow::Result<()> {
        for ptr in touched {
            if self.locks.acquire_nowait(*ptr, stmt.lock_owner)? {
                acquired.push(*ptr);
            }
            let table = self.storage(ptr.table_id)?;
            let Some(versions) = table.rows_by_id.get(&ptr.row_id) else {
                continue;
            };
            let Some(idx) = select_visible_version_idx(versions, &stmt.visibility) else {
                continue;
            };
            if let Some(xmax) = versions[idx].xmax
                && xmax != stmt.txid
                && stmt.visibility.txn_manager().status(xmax) != Some(TxnStatus::Aborted)
            {
                return Err(conflict_err(
                    "40001",
                    format!(
                        "could not serialize access due to concurrent update of row {} in table id {}",
                        ptr.row_id, ptr.table_id
                    ),
                    *ptr,
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::sqlstate;
    use crate::txn::TransactionManager;

    #[test]
    fn failed_undo_keeps_statement_error() {
        let mut db = Db::default();
        let txns = TransactionManager::new();
        let txid = txns.begin();
        let visibility = VisibilityContext::new(&txns, txns.snapshot_xid(), txid);
        let mut stmt = StatementContext::new("delete", visibility, LockOwner::new(1, 1), 8);

        let err = db
            .run_statement(&mut stmt, |_, stmt| -> anyhow::Result<()> {
                stmt.undo.push(UndoEntry::Inserted {
                    row: RowPointer::new(42, 1),
                });
                Err(sql_err("23503", "child row still references parent"))
            })
            .unwrap_err();

        assert_eq!(sqlstate(&err), Some("23503"));
        let rendered = format!("{err:#}");
        assert!(rendered.contains("undo after failed delete statement also failed"));
        assert!(rendered.contains("child row still references parent"));
        assert!(stmt.undo.is_empty());
        assert_eq!(stmt.phase(), Phase::Failed);
    }
}
