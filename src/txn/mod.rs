//! Transaction lifecycle and shared-cache locking.
//!
//! Models the format's connection state machine (`none -> read -> write`)
//! and savepoint stack. `begin_write` opens a page-level journal on the
//! disk manager (`DiskManager::begin_txn_journal`); every page's first dirty
//! write during the transaction records its before-image there.
//! `rollback` replays those before-images and restores the header
//! (`rollback_txn_journal`), `commit` discards them (`commit_txn_journal`).
//! There is still no WAL: two connections can't interleave a write
//! transaction with independent readers the way the full format allows, but
//! a single writer's rollback now actually undoes what it wrote.

pub mod lock;

use crate::error::{Result, StorageError};
use crate::storage::DiskManager;
use crate::txn::lock::{LockKind, LockManager};
use crate::types::PageId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Transaction state, mirroring the format's `TRANS_NONE` / `TRANS_READ` /
/// `TRANS_WRITE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    None,
    Read,
    Write,
}

/// A named point in the current write transaction that `rollback_to` can
/// return to without unwinding the whole transaction.
struct Savepoint {
    name: String,
    change_counter_at_open: u32,
}

/// One connection's transaction state against a shared database file.
pub struct Connection {
    id: u64,
    disk: Arc<dyn DiskManager>,
    locks: Arc<LockManager>,
    state: TxnState,
    savepoints: Vec<Savepoint>,
    locked_tables: Vec<PageId>,
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

impl Connection {
    pub fn new(disk: Arc<dyn DiskManager>, locks: Arc<LockManager>) -> Self {
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            disk,
            locks,
            state: TxnState::None,
            savepoints: Vec::new(),
            locked_tables: Vec::new(),
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Begin a read transaction (a no-op if already in a transaction).
    pub fn begin_read(&mut self) -> Result<()> {
        if self.state == TxnState::None {
            self.state = TxnState::Read;
        }
        Ok(())
    }

    /// Upgrade to a write transaction, opening a page journal so a
    /// subsequent `rollback` can undo whatever gets written.
    pub fn begin_write(&mut self) -> Result<()> {
        if self.state == TxnState::Write {
            return Ok(());
        }
        self.disk.begin_txn_journal()?;
        self.state = TxnState::Write;
        Ok(())
    }

    /// Acquire a table lock for the duration of this transaction.
    pub fn lock_table(&mut self, table: PageId, kind: LockKind) -> Result<()> {
        self.locks.lock(self.id, table, kind)?;
        if !self.locked_tables.contains(&table) {
            self.locked_tables.push(table);
        }
        Ok(())
    }

    /// Commit: flush all dirty pages, bump the change counter, release
    /// every table lock this connection held.
    pub fn commit(&mut self) -> Result<()> {
        if self.state == TxnState::Write {
            self.disk.bump_change_counter()?;
            self.disk.sync()?;
            self.disk.commit_txn_journal();
            log::debug!("conn {}: committed, {} table lock(s) released", self.id, self.locked_tables.len());
        }
        self.end_transaction();
        Ok(())
    }

    /// Roll back: replay the page journal to undo every write this
    /// transaction made, then discard savepoints and release locks.
    pub fn rollback(&mut self) -> Result<()> {
        if self.state == TxnState::Write {
            self.disk.rollback_txn_journal()?;
            log::warn!(
                "conn {}: rolled back, {} savepoint(s) discarded",
                self.id,
                self.savepoints.len()
            );
        }
        self.end_transaction();
        Ok(())
    }

    fn end_transaction(&mut self) {
        self.savepoints.clear();
        self.locks.unlock_all(self.id);
        self.locked_tables.clear();
        self.state = TxnState::None;
    }

    /// Open a named savepoint within the current write transaction.
    pub fn savepoint(&mut self, name: impl Into<String>) -> Result<()> {
        if self.state != TxnState::Write {
            return Err(StorageError::invalid_operation("savepoint requires a write transaction"));
        }
        let change_counter_at_open = self.disk.header().change_counter;
        self.savepoints.push(Savepoint { name: name.into(), change_counter_at_open });
        Ok(())
    }

    /// Release (commit) a savepoint and everything nested inside it.
    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let idx = self
            .savepoints
            .iter()
            .rposition(|sp| sp.name == name)
            .ok_or_else(|| StorageError::invalid_operation(format!("no such savepoint: {}", name)))?;
        self.savepoints.truncate(idx);
        Ok(())
    }

    /// Roll back to a savepoint without releasing it, undoing statements
    /// executed after it was opened.
    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let idx = self
            .savepoints
            .iter()
            .position(|sp| sp.name == name)
            .ok_or_else(|| StorageError::invalid_operation(format!("no such savepoint: {}", name)))?;
        self.savepoints.truncate(idx + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManagerImpl;
    use tempfile::tempdir;

    fn test_conn() -> (Connection, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManagerImpl::open(&dir.path().join("t.db"), false).unwrap());
        let locks = Arc::new(LockManager::new());
        (Connection::new(dm, locks), dir)
    }

    #[test]
    fn test_state_transitions() {
        let (mut conn, _dir) = test_conn();
        assert_eq!(conn.state(), TxnState::None);
        conn.begin_read().unwrap();
        assert_eq!(conn.state(), TxnState::Read);
        conn.begin_write().unwrap();
        assert_eq!(conn.state(), TxnState::Write);
        conn.commit().unwrap();
        assert_eq!(conn.state(), TxnState::None);
    }

    #[test]
    fn test_savepoint_stack() {
        let (mut conn, _dir) = test_conn();
        conn.begin_write().unwrap();
        conn.savepoint("a").unwrap();
        conn.savepoint("b").unwrap();
        conn.rollback_to_savepoint("a").unwrap();
        assert_eq!(conn.savepoints.len(), 1);
        conn.release_savepoint("a").unwrap();
        assert!(conn.savepoints.is_empty());
    }

    #[test]
    fn test_rollback_restores_pages_written_during_the_transaction() {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManagerImpl::open(&dir.path().join("t.db"), false).unwrap());
        let locks = Arc::new(LockManager::new());
        let mut conn = Connection::new(dm.clone(), locks);

        let page = dm.allocate_page().unwrap();
        let original = vec![0xABu8; crate::types::PAGE_SIZE];
        dm.write_page(page, &original).unwrap();

        conn.begin_write().unwrap();
        let changed = vec![0xCDu8; crate::types::PAGE_SIZE];
        dm.write_page(page, &changed).unwrap();
        assert_eq!(dm.read_page(page).unwrap().as_ref(), changed.as_slice());

        conn.rollback().unwrap();
        assert_eq!(dm.read_page(page).unwrap().as_ref(), original.as_slice());
    }

    #[test]
    fn test_commit_keeps_pages_written_during_the_transaction() {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManagerImpl::open(&dir.path().join("t.db"), false).unwrap());
        let locks = Arc::new(LockManager::new());
        let mut conn = Connection::new(dm.clone(), locks);

        let page = dm.allocate_page().unwrap();
        conn.begin_write().unwrap();
        let written = vec![0xEFu8; crate::types::PAGE_SIZE];
        dm.write_page(page, &written).unwrap();
        conn.commit().unwrap();

        assert_eq!(dm.read_page(page).unwrap().as_ref(), written.as_slice());
    }

    #[test]
    fn test_lock_released_on_commit() {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManagerImpl::open(&dir.path().join("t.db"), false).unwrap());
        let locks = Arc::new(LockManager::new());
        let mut a = Connection::new(dm.clone(), locks.clone());
        let mut b = Connection::new(dm, locks);

        a.begin_write().unwrap();
        a.lock_table(PageId::new(2), LockKind::Write).unwrap();
        assert!(b.lock_table(PageId::new(2), LockKind::Read).is_err());
        a.commit().unwrap();
        b.lock_table(PageId::new(2), LockKind::Read).unwrap();
    }
}
