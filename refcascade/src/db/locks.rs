use crate::errors::conflict_err;
use crate::session::SessionId;
use crate::storage::RowPointer;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LockOwner {
    pub session_id: SessionId,
    pub epoch: u64,
}

impl LockOwner {
    pub fn new(session_id: SessionId, epoch: u64) -> Self {
        Self { session_id, epoch }
    }
}

#[derive(Debug)]
pub(crate) struct LockRegistry {
    inner: Mutex<LockState>,
    notify: Notify,
}

#[derive(Debug)]
struct LockState {
    holders: HashMap<RowPointer, LockOwner>,
    owned: HashMap<LockOwner, HashSet<RowPointer>>,
    // row each blocked owner is waiting for
    waiting: HashMap<LockOwner, RowPointer>,
}

impl LockState {
    fn grant(&mut self, key: RowPointer, owner: LockOwner) {
        self.holders.insert(key, owner);
        self.owned.entry(owner).or_default().insert(key);
    }

    /// Whether `from` is, directly or through other waiters, waiting for a
    /// row held by `target`.
    fn waits_for(&self, from: LockOwner, target: LockOwner) -> bool {
        let mut current = from;
        let mut seen = HashSet::new();
        while seen.insert(current) {
            if current == target {
                return true;
            }
            let Some(holder) = self
                .waiting
                .get(&current)
                .and_then(|row| self.holders.get(row))
            else {
                return false;
            };
            current = *holder;
        }
        false
    }
}

/// Clears the owner's waits-for edge however the wait ends.
struct WaitGuard<'r> {
    registry: &'r LockRegistry,
    owner: LockOwner,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.registry.inner.lock().waiting.remove(&self.owner);
    }
}

impl LockRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(LockState {
                holders: HashMap::new(),
                owned: HashMap::new(),
                waiting: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Takes the row lock or fails with `55P03`. Returns whether the lock
    /// is new to `owner`.
    pub(crate) fn acquire_nowait(
        &self,
        key: RowPointer,
        owner: LockOwner,
    ) -> anyhow::Result<bool> {
        let mut state = self.inner.lock();
        if let Some(existing) = state.holders.get(&key) {
            if *existing == owner {
                return Ok(false);
            }
            return Err(conflict_err(
                "55P03",
                format!(
                    "could not obtain lock on row {} of table id {}: held by session {}",
                    key.row_id, key.table_id, existing.session_id
                ),
                key,
            ));
        }
        state.grant(key, owner);
        Ok(true)
    }

    /// Waits until `owner` holds the row lock. Fails with `40P01` instead of
    /// waiting when the holder is itself waiting, directly or transitively,
    /// for a row `owner` holds.
    async fn acquire_blocking(&self, key: RowPointer, owner: LockOwner) -> anyhow::Result<()> {
        let _guard = WaitGuard {
            registry: self,
            owner,
        };
        loop {
            // register interest before checking so a release between the
            // check and the await is not missed
            let notified = self.notify.notified();
            {
                let mut state = self.inner.lock();
                match state.holders.get(&key).copied() {
                    Some(existing) if existing == owner => return Ok(()),
                    Some(existing) => {
                        if state.waits_for(existing, owner) {
                            return Err(conflict_err(
                                "40P01",
                                format!(
                                    "deadlock detected: session {} waits for row {} of table id {} held by session {}, which waits for session {}",
                                    owner.session_id,
                                    key.row_id,
                                    key.table_id,
                                    existing.session_id,
                                    owner.session_id
                                ),
                                key,
                            ));
                        }
                        state.waiting.insert(owner, key);
                    }
                    None => {
                        state.grant(key, owner);
                        return Ok(());
                    }
                }
            }
            notified.await;
        }
    }

    /// Drops locks `owner` took for a statement that then failed.
    pub(crate) fn release_rows(&self, owner: LockOwner, rows: &[RowPointer]) {
        if rows.is_empty() {
            return;
        }
        let mut state = self.inner.lock();
        for key in rows {
            if state.holders.get(key) == Some(&owner) {
                state.holders.remove(key);
            }
            if let Some(keys) = state.owned.get_mut(&owner) {
                keys.remove(key);
            }
        }
        drop(state);
        self.notify.notify_waiters();
    }

    pub(crate) fn release_owner(&self, owner: LockOwner) {
        let mut state = self.inner.lock();
        state.waiting.remove(&owner);
        if let Some(keys) = state.owned.remove(&owner) {
            for key in keys {
                if let Some(existing) = state.holders.get(&key)
                    && *existing == owner
                {
                    state.holders.remove(&key);
                }
            }
        }
        self.notify.notify_waiters();
    }
}

#[derive(Clone, Debug)]
pub struct LockHandle {
    inner: Arc<LockRegistry>,
}

impl LockHandle {
    pub(crate) fn new(inner: Arc<LockRegistry>) -> Self {
        Self { inner }
    }

    pub async fn lock_row_blocking(&self, row: RowPointer, owner: LockOwner) -> anyhow::Result<()> {
        self.inner.acquire_blocking(row, owner).await
    }
}
