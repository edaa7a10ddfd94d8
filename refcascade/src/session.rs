use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::db::{LockOwner, UndoEntry};
use crate::txn::TxId;

pub type SessionId = i32;

/// Undo entries of every successful statement of the open transaction, in
/// execution order.
#[derive(Clone, Debug, Default)]
pub struct TxnChanges {
    pub undo: Vec<UndoEntry>,
}

#[derive(Debug)]
pub struct SessionState {
    pub current_tx: Option<TxId>,
    pub changes: TxnChanges,
    pub next_epoch: u64,
    pub txn_epoch: Option<u64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            current_tx: None,
            changes: TxnChanges::default(),
            next_epoch: 1,
            txn_epoch: None,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn current_tx(&self) -> Option<TxId> {
        self.state.lock().current_tx
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().current_tx.is_some()
    }

    /// Binds `txid` to the session and opens a fresh lock epoch for it.
    pub(crate) fn begin_transaction(&self, txid: TxId) -> LockOwner {
        let mut guard = self.state.lock();
        let epoch = guard.next_epoch;
        guard.next_epoch += 1;
        guard.txn_epoch = Some(epoch);
        guard.current_tx = Some(txid);
        guard.changes = TxnChanges::default();
        LockOwner::new(self.id, epoch)
    }

    pub(crate) fn lock_owner(&self) -> Option<LockOwner> {
        let guard = self.state.lock();
        guard.txn_epoch.map(|epoch| LockOwner::new(self.id, epoch))
    }

    pub(crate) fn record_changes(&self, mut undo: Vec<UndoEntry>) {
        if undo.is_empty() {
            return;
        }
        let mut guard = self.state.lock();
        guard.changes.undo.append(&mut undo);
    }

    /// Clears the transaction binding and returns its recorded changes.
    pub(crate) fn end_transaction(&self) -> (Option<TxId>, Option<LockOwner>, TxnChanges) {
        let mut guard = self.state.lock();
        let txid = guard.current_tx.take();
        let owner = guard
            .txn_epoch
            .take()
            .map(|epoch| LockOwner::new(self.id, epoch));
        (txid, owner, std::mem::take(&mut guard.changes))
    }
}

#[derive(Debug, Default)]
pub struct SessionManager {
    next_id: AtomicI32,
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1),
            sessions: DashMap::new(),
        }
    }

    pub fn create_session(&self) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id));
        self.sessions.insert(id, session.clone());
        session
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }
}
