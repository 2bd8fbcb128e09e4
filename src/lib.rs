//! # BTree Storage Engine
//!
//! An embedded, page-backed B-tree storage engine for relational tables.
//!
//! ## Architecture
//!
//! The storage engine is composed of modular, swappable components:
//!
//! - **Page Layer** (`page`): Slotted page format with cell-based layout,
//!   the free-list, pointer-map, and overflow chains
//! - **Storage Layer** (`storage`): Disk I/O abstraction and the file header
//! - **Buffer Pool** (`buffer`): LRU page cache with dirty tracking
//! - **B-Tree Layer** (`btree`): Table B-tree operations and cursor iteration
//! - **Transaction Layer** (`txn`): Connection state machine and shared-cache
//!   table locking
//! - **Sort Layer** (`sort`): External merge sort for index builds
//!
//! ## Usage
//!
//! ```rust,ignore
//! use btree_storage::{Db, Config};
//!
//! let config = Config::new("my_database.db");
//! let db = Db::open(config)?;
//!
//! db.put(1, b"hello")?;
//! let value = db.get(1)?;
//! db.delete(1)?;
//!
//! for (rowid, value) in db.range(Some(1), Some(100))? {
//!     println!("{} -> {:?}", rowid, value);
//! }
//! ```

pub mod buffer;
pub mod btree;
pub mod error;
pub mod page;
pub mod sort;
pub mod storage;
pub mod txn;
pub mod types;

pub use error::{Result, StorageError};
pub use types::{PageId, PAGE_SIZE};

// Re-export main public API
pub use btree::{BTree, IndexTree};
pub use buffer::{BufferPool, BufferPoolImpl};
pub use storage::{DiskManager, DiskManagerImpl};
pub use txn::{lock::LockManager, Connection, TxnState};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use parking_lot::RwLock;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the database file.
    pub path: PathBuf,
    /// Buffer pool size in number of pages (default: 1000).
    pub buffer_pool_size: usize,
    /// Whether to sync writes immediately (default: false for performance).
    pub sync_on_write: bool,
}

impl Config {
    /// Create a new configuration with default settings.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), buffer_pool_size: 1000, sync_on_write: false }
    }

    /// Set buffer pool size.
    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    /// Enable sync on write for durability.
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }
}

/// Node type for visualization, built from the live page tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub page_id: u32,
    pub is_leaf: bool,
    /// Rowids in this node (empty for an interior node's right-child slot).
    pub rowids: Vec<u64>,
    /// Local payload bytes, only populated for leaf cells.
    pub values: Vec<String>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Render this subtree as pretty-printed JSON, for tools that want to
    /// inspect tree shape without linking against this crate directly.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Which kind of tree a cataloged table uses: `Table` rows are keyed by a
/// 64-bit rowid and carry a value, `Index` rows are keyed by the raw bytes
/// given to `index_insert` and carry no separate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Table,
    Index,
}

/// A catalog row: everything needed to reopen a cataloged table's tree
/// without it owning the file header's single root-page slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogEntry {
    name: String,
    kind: TableKind,
    root_page: u32,
    height: u32,
}

/// A cataloged table's live tree handle, cached once opened.
enum TableHandle {
    Table(BTree),
    Index(IndexTree),
}

impl TableHandle {
    fn kind(&self) -> TableKind {
        match self {
            TableHandle::Table(_) => TableKind::Table,
            TableHandle::Index(_) => TableKind::Index,
        }
    }

    fn root_and_height(&self) -> (PageId, usize) {
        match self {
            TableHandle::Table(bt) => (bt.root_page(), bt.height()),
            TableHandle::Index(ix) => (ix.root(), ix.height()),
        }
    }

    fn clear(&mut self) -> Result<()> {
        match self {
            TableHandle::Table(bt) => bt.clear(),
            TableHandle::Index(ix) => ix.clear(),
        }
    }

    fn integrity_check(&self) -> Result<Vec<String>> {
        match self {
            TableHandle::Table(bt) => bt.integrity_check(),
            TableHandle::Index(ix) => ix.integrity_check(),
        }
    }
}

/// Stable catalog id for a table name. Derived with the standard library's
/// default hasher rather than a crate, since this is internal bookkeeping
/// (not a logging/error/config/serialization concern) and only needs to be
/// stable within one build of this crate — see DESIGN.md for the tradeoff
/// (a changed std hasher algorithm across a Rust toolchain upgrade would
/// orphan an existing catalog; acceptable for this crate's scope).
fn table_catalog_id(name: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Main database handle: a catalog of named tables, each its own table or
/// index B-tree, sharing one buffer pool and disk manager.
///
/// The catalog itself is the one tree that owns the file header's root-page
/// slot (`BTree::new`); every other table is opened with `BTree::open`/
/// `IndexTree::new` against a root page recorded in its catalog row instead.
/// For compatibility with single-table callers, `get`/`put`/`delete`/
/// `contains`/`iter`/`range` operate on a table named `"main"`, created on
/// first write.
pub struct Db {
    catalog: Arc<RwLock<BTree>>,
    tables: RwLock<HashMap<String, Arc<RwLock<TableHandle>>>>,
    buffer_pool: Arc<BufferPoolImpl>,
    disk_manager: Arc<DiskManagerImpl>,
    locks: Arc<LockManager>,
}

const DEFAULT_TABLE: &str = "main";

impl Db {
    /// Open or create a database at the given path.
    pub fn open(config: Config) -> Result<Self> {
        let disk_manager = Arc::new(DiskManagerImpl::open(&config.path, config.sync_on_write)?);
        let buffer_pool =
            Arc::new(BufferPoolImpl::new(disk_manager.clone(), config.buffer_pool_size));
        let catalog = Arc::new(RwLock::new(BTree::new(buffer_pool.clone(), disk_manager.clone())?));
        let locks = Arc::new(LockManager::new());

        Ok(Self { catalog, tables: RwLock::new(HashMap::new()), buffer_pool, disk_manager, locks })
    }

    /// Open a new connection against this database's shared cache.
    pub fn connect(&self) -> Connection {
        Connection::new(self.disk_manager.clone(), self.locks.clone())
    }

    /// Create a table or index, failing if the name is already in use.
    pub fn create_table(&self, name: &str, kind: TableKind) -> Result<()> {
        let id = table_catalog_id(name);
        {
            let catalog = self.catalog.read();
            if let Some(bytes) = catalog.get(id)? {
                let existing: CatalogEntry = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageError::Corrupt(format!("catalog row: {}", e)))?;
                if existing.name == name {
                    return Err(StorageError::Constraint(format!("table '{}' already exists", name)));
                }
            }
        }

        let handle = match kind {
            TableKind::Table => {
                TableHandle::Table(BTree::open(self.buffer_pool.clone(), self.disk_manager.clone(), PageId::INVALID, 0))
            }
            TableKind::Index => {
                TableHandle::Index(IndexTree::new(self.buffer_pool.clone(), self.disk_manager.clone(), PageId::INVALID, 0))
            }
        };
        self.write_catalog_entry(id, name, kind, PageId::INVALID, 0)?;
        self.tables.write().insert(name.to_string(), Arc::new(RwLock::new(handle)));
        Ok(())
    }

    /// Drop a table: frees every page it owns and removes its catalog row.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let handle = self.table_handle(name)?;
        handle.write().clear()?;
        let id = table_catalog_id(name);
        self.catalog.write().delete(id)?;
        self.tables.write().remove(name);
        Ok(())
    }

    /// Remove every row from a table without dropping it.
    pub fn clear_table(&self, name: &str) -> Result<()> {
        let handle = self.table_handle(name)?;
        let kind = handle.read().kind();
        handle.write().clear()?;
        self.persist_table_meta(name, kind)
    }

    /// Read caller-managed metadata slot `i` (1..=15).
    pub fn get_meta(&self, i: usize) -> Result<u32> {
        if i == 0 || i > 15 {
            return Err(StorageError::InvalidOperation(format!("meta index {} out of range (1..=15)", i)));
        }
        Ok(self.disk_manager.get_meta(i))
    }

    /// Write caller-managed metadata slot `i` (1..=15).
    pub fn update_meta(&self, i: usize, value: u32) -> Result<()> {
        if i == 0 || i > 15 {
            return Err(StorageError::InvalidOperation(format!("meta index {} out of range (1..=15)", i)));
        }
        self.disk_manager.set_meta(i, value)
    }

    /// Walk every cataloged table's tree, checking key ordering and
    /// interior-bound invariants, and return every problem found (an empty
    /// list means the database is structurally sound).
    pub fn integrity_check(&self) -> Result<Vec<String>> {
        let mut errors = Vec::new();
        let rows = self.catalog.read().scan(None, None)?;
        for (_, bytes) in rows {
            let entry: CatalogEntry = serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Corrupt(format!("catalog row: {}", e)))?;
            let handle = self.table_handle(&entry.name)?;
            for err in handle.read().integrity_check()? {
                errors.push(format!("{}: {}", entry.name, err));
            }
        }
        Ok(errors)
    }

    /// Insert (or overwrite) a row into a table named `name`.
    pub fn table_put(&self, name: &str, rowid: u64, value: &[u8]) -> Result<()> {
        let handle = self.table_handle(name)?;
        let mut guard = handle.write();
        match &mut *guard {
            TableHandle::Table(bt) => bt.put(rowid, value)?,
            TableHandle::Index(_) => return Err(StorageError::InvalidOperation(format!("'{}' is an index, not a table", name))),
        }
        drop(guard);
        self.persist_table_meta(name, TableKind::Table)
    }

    /// Fetch a row from a table named `name`.
    pub fn table_get(&self, name: &str, rowid: u64) -> Result<Option<Vec<u8>>> {
        let handle = self.table_handle(name)?;
        let guard = handle.read();
        match &*guard {
            TableHandle::Table(bt) => bt.get(rowid),
            TableHandle::Index(_) => Err(StorageError::InvalidOperation(format!("'{}' is an index, not a table", name))),
        }
    }

    /// Insert a key into an index named `name`; a no-op if already present.
    pub fn index_insert(&self, name: &str, key: &[u8]) -> Result<()> {
        let handle = self.table_handle(name)?;
        let mut guard = handle.write();
        match &mut *guard {
            TableHandle::Index(ix) => ix.insert(key)?,
            TableHandle::Table(_) => return Err(StorageError::InvalidOperation(format!("'{}' is a table, not an index", name))),
        }
        drop(guard);
        self.persist_table_meta(name, TableKind::Index)
    }

    /// Check whether `key` is present in an index named `name`.
    pub fn index_contains(&self, name: &str, key: &[u8]) -> Result<bool> {
        let handle = self.table_handle(name)?;
        let guard = handle.read();
        match &*guard {
            TableHandle::Index(ix) => ix.contains(key),
            TableHandle::Table(_) => Err(StorageError::InvalidOperation(format!("'{}' is a table, not an index", name))),
        }
    }

    /// Remove a key from an index named `name`. Returns whether it was present.
    pub fn index_remove(&self, name: &str, key: &[u8]) -> Result<bool> {
        let handle = self.table_handle(name)?;
        let mut guard = handle.write();
        let removed = match &mut *guard {
            TableHandle::Index(ix) => ix.remove(key)?,
            TableHandle::Table(_) => return Err(StorageError::InvalidOperation(format!("'{}' is a table, not an index", name))),
        };
        drop(guard);
        self.persist_table_meta(name, TableKind::Index)?;
        Ok(removed)
    }

    /// In-order scan of every key in an index named `name`.
    pub fn index_scan(&self, name: &str) -> Result<Vec<Vec<u8>>> {
        let handle = self.table_handle(name)?;
        let guard = handle.read();
        match &*guard {
            TableHandle::Index(ix) => ix.scan(),
            TableHandle::Table(_) => Err(StorageError::InvalidOperation(format!("'{}' is a table, not an index", name))),
        }
    }

    fn write_catalog_entry(&self, id: u64, name: &str, kind: TableKind, root_page: PageId, height: usize) -> Result<()> {
        let entry = CatalogEntry { name: name.to_string(), kind, root_page: root_page.value(), height: height as u32 };
        let bytes = serde_json::to_vec(&entry).map_err(|e| StorageError::Corrupt(format!("catalog row: {}", e)))?;
        self.catalog.write().put(id, &bytes)
    }

    /// Re-read `name`'s current root/height from its live handle and
    /// rewrite its catalog row, since only the catalog persists those
    /// fields for non-default tables.
    fn persist_table_meta(&self, name: &str, kind: TableKind) -> Result<()> {
        let handle = self.table_handle(name)?;
        let (root_page, height) = handle.read().root_and_height();
        self.write_catalog_entry(table_catalog_id(name), name, kind, root_page, height)
    }

    /// Resolve a cataloged table name to its cached (or freshly opened) handle.
    fn table_handle(&self, name: &str) -> Result<Arc<RwLock<TableHandle>>> {
        if let Some(handle) = self.tables.read().get(name) {
            return Ok(handle.clone());
        }

        let id = table_catalog_id(name);
        let bytes = self.catalog.read().get(id)?;
        let Some(bytes) = bytes else {
            return Err(StorageError::InvalidOperation(format!("no such table: {}", name)));
        };
        let entry: CatalogEntry = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("catalog row: {}", e)))?;
        if entry.name != name {
            return Err(StorageError::InvalidOperation(format!("no such table: {}", name)));
        }

        let handle = match entry.kind {
            TableKind::Table => TableHandle::Table(BTree::open(
                self.buffer_pool.clone(),
                self.disk_manager.clone(),
                PageId::new(entry.root_page),
                entry.height as usize,
            )),
            TableKind::Index => TableHandle::Index(IndexTree::new(
                self.buffer_pool.clone(),
                self.disk_manager.clone(),
                PageId::new(entry.root_page),
                entry.height as usize,
            )),
        };
        let handle = Arc::new(RwLock::new(handle));
        self.tables.write().insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    fn ensure_default_table(&self) -> Result<()> {
        match self.table_handle(DEFAULT_TABLE) {
            Ok(_) => Ok(()),
            Err(StorageError::InvalidOperation(_)) => self.create_table(DEFAULT_TABLE, TableKind::Table),
            Err(e) => Err(e),
        }
    }

    /// Get a value by rowid. Returns `None` if the rowid does not exist.
    pub fn get(&self, rowid: u64) -> Result<Option<Vec<u8>>> {
        self.ensure_default_table()?;
        self.table_get(DEFAULT_TABLE, rowid)
    }

    /// Insert or update the row at `rowid`.
    pub fn put(&self, rowid: u64, value: &[u8]) -> Result<()> {
        self.ensure_default_table()?;
        self.table_put(DEFAULT_TABLE, rowid, value)
    }

    /// Delete a row. Returns `true` if it existed.
    pub fn delete(&self, rowid: u64) -> Result<bool> {
        self.ensure_default_table()?;
        let handle = self.table_handle(DEFAULT_TABLE)?;
        let mut guard = handle.write();
        let deleted = match &mut *guard {
            TableHandle::Table(bt) => bt.delete(rowid)?,
            TableHandle::Index(_) => {
                return Err(StorageError::InvalidOperation(
                    "'main' was created as an index, not a table".to_string(),
                ))
            }
        };
        drop(guard);
        self.persist_table_meta(DEFAULT_TABLE, TableKind::Table)?;
        Ok(deleted)
    }

    /// Check if a rowid exists.
    pub fn contains(&self, rowid: u64) -> Result<bool> {
        Ok(self.get(rowid)?.is_some())
    }

    /// Iterate over all rows in rowid order.
    pub fn iter(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        self.ensure_default_table()?;
        self.with_default_btree(|bt| bt.scan(None, None))
    }

    /// Iterate over rows in a rowid range. Both bounds are optional; `None`
    /// means unbounded on that side. `end` is exclusive.
    pub fn range(&self, start: Option<u64>, end: Option<u64>) -> Result<Vec<(u64, Vec<u8>)>> {
        self.ensure_default_table()?;
        self.with_default_btree(|bt| bt.scan(start, end))
    }

    fn with_default_btree<T>(&self, f: impl FnOnce(&BTree) -> Result<T>) -> Result<T> {
        let handle = self.table_handle(DEFAULT_TABLE)?;
        let guard = handle.read();
        match &*guard {
            TableHandle::Table(bt) => f(bt),
            TableHandle::Index(_) => {
                return Err(StorageError::InvalidOperation(
                    "'main' was created as an index, not a table".to_string(),
                ))
            }
        }
    }

    /// Flush all dirty pages to disk.
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }

    /// Get statistics about the database.
    pub fn stats(&self) -> DbStats {
        let tree_height = self
            .tables
            .read()
            .get(DEFAULT_TABLE)
            .map(|h| h.read().root_and_height().1)
            .unwrap_or(0);
        DbStats {
            page_count: self.buffer_pool.page_count(),
            buffer_pool_size: self.buffer_pool.capacity(),
            tree_height,
        }
    }

    /// Export the default table's tree structure for visualization.
    pub fn export_tree(&self) -> Result<Option<TreeNode>> {
        self.ensure_default_table()?;
        let root_page = self.with_default_btree(|bt| Ok(bt.root_page()))?;
        if !root_page.is_valid() {
            return Ok(None);
        }
        self.export_node(root_page)
    }

    fn export_node(&self, page_id: PageId) -> Result<Option<TreeNode>> {
        let usable = self.buffer_pool.usable_size();
        let is_leaf = {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = guard.read();
            page.is_leaf()
        };

        if is_leaf {
            self.export_leaf_node(page_id, usable)
        } else {
            self.export_interior_node(page_id, usable)
        }
    }

    fn export_leaf_node(&self, page_id: PageId, usable: usize) -> Result<Option<TreeNode>> {
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page = guard.read();

        let mut rowids = Vec::new();
        let mut values = Vec::new();
        for i in 0..page.cell_count() {
            let cell = page.get_cell(i, usable)?;
            rowids.push(cell.rowid);
            values.push(String::from_utf8_lossy(&cell.local).to_string());
        }

        Ok(Some(TreeNode {
            page_id: page_id.value(),
            is_leaf: true,
            rowids,
            values,
            children: Vec::new(),
        }))
    }

    fn export_interior_node(&self, page_id: PageId, usable: usize) -> Result<Option<TreeNode>> {
        let (rowids, child_ids) = {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = guard.read();
            let mut rowids = Vec::new();
            let mut child_ids = Vec::new();
            for i in 0..page.cell_count() {
                let cell = page.get_cell(i, usable)?;
                rowids.push(cell.rowid);
                child_ids.push(cell.left_child);
            }
            child_ids.push(page.right_child());
            (rowids, child_ids)
        };

        let mut children = Vec::new();
        for child_id in child_ids {
            if let Some(child_node) = self.export_node(child_id)? {
                children.push(child_node);
            }
        }

        Ok(Some(TreeNode {
            page_id: page_id.value(),
            is_leaf: false,
            rowids,
            values: Vec::new(),
            children,
        }))
    }
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DbStats {
    pub page_count: usize,
    pub buffer_pool_size: usize,
    pub tree_height: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_basic_operations() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path))?;

        db.put(1, b"value1")?;
        assert_eq!(db.get(1)?, Some(b"value1".to_vec()));

        db.put(1, b"value2")?;
        assert_eq!(db.get(1)?, Some(b"value2".to_vec()));

        assert!(db.delete(1)?);
        assert_eq!(db.get(1)?, None);

        assert_eq!(db.get(999)?, None);
        assert!(!db.delete(999)?);

        Ok(())
    }

    #[test]
    fn test_range_scan() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path))?;

        for i in 1..=4u64 {
            db.put(i, format!("v{}", i).as_bytes())?;
        }

        let all = db.iter()?;
        assert_eq!(all.len(), 4);

        let range = db.range(Some(2), Some(4))?;
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].0, 2);
        assert_eq!(range[1].0, 3);

        Ok(())
    }

    #[test]
    fn test_connections_share_locks() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path))?;

        let mut a = db.connect();
        let mut b = db.connect();
        a.begin_write()?;
        a.lock_table(PageId::new(2), txn::lock::LockKind::Write)?;
        assert!(b.lock_table(PageId::new(2), txn::lock::LockKind::Read).is_err());
        a.commit()?;
        b.lock_table(PageId::new(2), txn::lock::LockKind::Read)?;

        Ok(())
    }

    #[test]
    fn test_export_tree_shape() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path))?;

        assert!(db.export_tree()?.is_none());

        for i in 0..200u64 {
            db.put(i, format!("value-{}", i).as_bytes())?;
        }
        let root = db.export_tree()?.expect("tree should be non-empty");
        assert!(db.stats().tree_height >= 1);
        if !root.is_leaf {
            assert!(!root.children.is_empty());
        }

        let json = root.to_json().unwrap();
        assert!(json.contains("\"pageId\""));

        Ok(())
    }

    #[test]
    fn test_create_table_and_use_it_independently_of_main() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::open(Config::new(dir.path().join("test.db")))?;

        db.put(1, b"in main")?;
        db.create_table("orders", TableKind::Table)?;
        db.table_put("orders", 1, b"in orders")?;

        assert_eq!(db.get(1)?, Some(b"in main".to_vec()));
        assert_eq!(db.table_get("orders", 1)?, Some(b"in orders".to_vec()));
        Ok(())
    }

    #[test]
    fn test_create_table_rejects_duplicate_name() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::open(Config::new(dir.path().join("test.db")))?;

        db.create_table("accounts", TableKind::Table)?;
        assert!(matches!(db.create_table("accounts", TableKind::Table), Err(StorageError::Constraint(_))));
        Ok(())
    }

    #[test]
    fn test_drop_table_removes_it_from_the_catalog() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::open(Config::new(dir.path().join("test.db")))?;

        db.create_table("scratch", TableKind::Table)?;
        db.table_put("scratch", 1, b"x")?;
        db.drop_table("scratch")?;

        assert!(matches!(db.table_get("scratch", 1), Err(StorageError::InvalidOperation(_))));
        Ok(())
    }

    #[test]
    fn test_clear_table_empties_but_keeps_the_catalog_row() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::open(Config::new(dir.path().join("test.db")))?;

        db.create_table("events", TableKind::Table)?;
        for i in 0..50u64 {
            db.table_put("events", i, b"v")?;
        }
        db.clear_table("events")?;
        assert_eq!(db.table_get("events", 0)?, None);

        db.table_put("events", 0, b"fresh")?;
        assert_eq!(db.table_get("events", 0)?, Some(b"fresh".to_vec()));
        Ok(())
    }

    #[test]
    fn test_index_table_insert_contains_remove_scan() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::open(Config::new(dir.path().join("test.db")))?;

        db.create_table("by_name", TableKind::Index)?;
        for name in ["zebra", "apple", "mango"] {
            db.index_insert("by_name", name.as_bytes())?;
        }
        assert!(db.index_contains("by_name", b"apple")?);
        assert!(!db.index_contains("by_name", b"kiwi")?);

        assert!(db.index_remove("by_name", b"apple")?);
        assert!(!db.index_contains("by_name", b"apple")?);

        let scanned = db.index_scan("by_name")?;
        assert_eq!(scanned, vec![b"mango".to_vec(), b"zebra".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_index_table_state_survives_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let db = Db::open(Config::new(&path))?;
            db.create_table("by_name", TableKind::Index)?;
            db.index_insert("by_name", b"hello")?;
            db.flush()?;
        }
        let db = Db::open(Config::new(&path))?;
        assert!(db.index_contains("by_name", b"hello")?);
        Ok(())
    }

    #[test]
    fn test_get_meta_defaults_to_zero_and_round_trips() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::open(Config::new(dir.path().join("test.db")))?;

        assert_eq!(db.get_meta(1)?, 0);
        db.update_meta(1, 7)?;
        assert_eq!(db.get_meta(1)?, 7);
        assert!(db.get_meta(0).is_err());
        assert!(db.get_meta(16).is_err());
        Ok(())
    }

    #[test]
    fn test_integrity_check_is_clean_across_multiple_tables() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::open(Config::new(dir.path().join("test.db")))?;

        db.put(1, b"main row")?;
        db.create_table("secondary", TableKind::Table)?;
        db.table_put("secondary", 1, b"secondary row")?;
        db.create_table("by_name", TableKind::Index)?;
        db.index_insert("by_name", b"key")?;

        assert_eq!(db.integrity_check()?, Vec::<String>::new());
        Ok(())
    }
}
