//! Shared-cache table locking.
//!
//! Mirrors the format's `BtLock` model: each table (identified by its root
//! page) tracks the set of connections holding a `Read` lock and at most one
//! connection holding a `Write` lock. A connection wanting `Write` while
//! other readers are attached is parked in `Pending` until they detach, the
//! same "upgrade politely, don't starve existing readers" rule the format
//! applies before granting `BTS_EXCLUSIVE`.

use crate::error::{Result, StorageError};
use crate::types::PageId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// A lock a connection can hold on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

#[derive(Default)]
struct TableLockState {
    readers: HashSet<u64>,
    writer: Option<u64>,
    /// A writer waiting for the last reader to detach (`BTS_PENDING`).
    pending_writer: Option<u64>,
}

/// Tracks per-table locks across every connection attached to a shared
/// cache. One instance is shared by every `Connection` opened against the
/// same backing file.
pub struct LockManager {
    tables: Mutex<HashMap<PageId, TableLockState>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self { tables: Mutex::new(HashMap::new()) }
    }

    /// Acquire `kind` on `table` for `conn_id`. Blocking callers should
    /// retry on `StorageError::LockedSharedCache`; this crate has no
    /// background wakeup so callers poll.
    pub fn lock(&self, conn_id: u64, table: PageId, kind: LockKind) -> Result<()> {
        let mut tables = self.tables.lock();
        let state = tables.entry(table).or_default();

        match kind {
            LockKind::Read => {
                if let Some(w) = state.writer {
                    if w != conn_id {
                        log::debug!("conn {} denied read lock on {:?}: held by writer {}", conn_id, table, w);
                        return Err(StorageError::LockedSharedCache);
                    }
                }
                state.readers.insert(conn_id);
                Ok(())
            }
            LockKind::Write => {
                if let Some(w) = state.writer {
                    if w == conn_id {
                        return Ok(());
                    }
                    log::debug!("conn {} denied write lock on {:?}: held by writer {}", conn_id, table, w);
                    return Err(StorageError::LockedSharedCache);
                }
                let only_reader = state.readers.is_empty()
                    || (state.readers.len() == 1 && state.readers.contains(&conn_id));
                if !only_reader {
                    state.pending_writer = Some(conn_id);
                    log::debug!(
                        "conn {} parked pending write lock on {:?}: {} other reader(s) attached",
                        conn_id,
                        table,
                        state.readers.len()
                    );
                    return Err(StorageError::LockedSharedCache);
                }
                state.readers.remove(&conn_id);
                state.writer = Some(conn_id);
                state.pending_writer = None;
                Ok(())
            }
        }
    }

    /// Release every lock `conn_id` holds on `table`.
    pub fn unlock(&self, conn_id: u64, table: PageId) {
        let mut tables = self.tables.lock();
        if let Some(state) = tables.get_mut(&table) {
            state.readers.remove(&conn_id);
            if state.writer == Some(conn_id) {
                state.writer = None;
            }
            if state.readers.is_empty() && state.writer.is_none() {
                tables.remove(&table);
            }
        }
    }

    /// Release every lock `conn_id` holds across all tables (end of
    /// transaction).
    pub fn unlock_all(&self, conn_id: u64) {
        let mut tables = self.tables.lock();
        tables.retain(|_, state| {
            state.readers.remove(&conn_id);
            if state.writer == Some(conn_id) {
                state.writer = None;
            }
            !(state.readers.is_empty() && state.writer.is_none())
        });
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_readers_allowed() {
        let mgr = LockManager::new();
        let t = PageId::new(2);
        mgr.lock(1, t, LockKind::Read).unwrap();
        mgr.lock(2, t, LockKind::Read).unwrap();
    }

    #[test]
    fn test_writer_excludes_other_readers() {
        let mgr = LockManager::new();
        let t = PageId::new(2);
        mgr.lock(1, t, LockKind::Write).unwrap();
        assert!(mgr.lock(2, t, LockKind::Read).is_err());
    }

    #[test]
    fn test_writer_upgrade_from_sole_reader() {
        let mgr = LockManager::new();
        let t = PageId::new(2);
        mgr.lock(1, t, LockKind::Read).unwrap();
        mgr.lock(1, t, LockKind::Write).unwrap();
    }

    #[test]
    fn test_unlock_releases_for_others() {
        let mgr = LockManager::new();
        let t = PageId::new(2);
        mgr.lock(1, t, LockKind::Write).unwrap();
        mgr.unlock(1, t);
        mgr.lock(2, t, LockKind::Write).unwrap();
    }
}
