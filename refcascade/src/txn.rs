use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::storage::VersionedRow;

pub type TxId = u64;
pub const SYSTEM_TXID: TxId = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    InProgress,
    Committed,
    Aborted,
}

#[derive(Debug, Default)]
pub struct TransactionManager {
    next_xid: AtomicU64,
    // entries are never evicted so row versions never reference an unknown xid
    statuses: DashMap<TxId, TxnStatus>,
}

impl TransactionManager {
    pub fn new() -> Self {
        let statuses = DashMap::new();
        statuses.insert(SYSTEM_TXID, TxnStatus::Committed);
        Self {
            next_xid: AtomicU64::new(0),
            statuses,
        }
    }

    pub fn begin(&self) -> TxId {
        let txid = self.next_xid.fetch_add(1, Ordering::SeqCst) + 1;
        self.statuses.insert(txid, TxnStatus::InProgress);
        txid
    }

    pub fn snapshot_xid(&self) -> TxId {
        self.next_xid.load(Ordering::SeqCst)
    }

    pub fn commit(&self, txid: TxId) {
        self.statuses.insert(txid, TxnStatus::Committed);
    }

    pub fn abort(&self, txid: TxId) {
        self.statuses.insert(txid, TxnStatus::Aborted);
    }

    pub fn status(&self, txid: TxId) -> Option<TxnStatus> {
        self.statuses.get(&txid).map(|entry| *entry)
    }

    pub fn is_committed(&self, txid: TxId) -> bool {
        if txid == SYSTEM_TXID {
            return true;
        }
        // unknown txids are considered uncommitted
        matches!(self.status(txid), Some(TxnStatus::Committed))
    }
}

#[derive(Clone, Copy)]
pub struct VisibilityContext<'a> {
    txn_manager: &'a TransactionManager,
    pub snapshot_xid: TxId,
    pub current_tx: TxId,
}

impl<'a> VisibilityContext<'a> {
    pub fn new(txn_manager: &'a TransactionManager, snapshot_xid: TxId, current_tx: TxId) -> Self {
        Self {
            txn_manager,
            snapshot_xid,
            current_tx,
        }
    }

    pub fn txn_manager(&self) -> &'a TransactionManager {
        self.txn_manager
    }

    pub fn is_visible(&self, version: &VersionedRow) -> bool {
        if version.xmin == self.current_tx {
            return version.xmax != Some(self.current_tx);
        }
        if version.xmax == Some(self.current_tx) {
            return false;
        }
        if !self.txn_manager.is_committed(version.xmin) {
            return false;
        }
        if version.xmin > self.snapshot_xid {
            return false;
        }
        if let Some(xmax) = version.xmax
            && self.txn_manager.is_committed(xmax)
            && xmax <= self.snapshot_xid
        {
            return false;
        }
        true
    }
}
