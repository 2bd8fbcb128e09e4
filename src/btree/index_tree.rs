//! Index (zerodata) B-tree: keys are opaque byte strings carrying no
//! separate payload, ordered bytewise — the same ordering `SlottedPage`
//! already uses to place `IndexLeaf`/`IndexInterior` cells
//! (`SlottedPage::sort_key_of` compares `cell.local` directly for
//! non-table pages).
//!
//! This tree splits overfull pages exactly like the table tree's leaf/
//! interior splits, but deliberately does not rebalance on delete: an
//! underfull index leaf is left underfull rather than merged with a
//! sibling. The table tree's three-sibling `balance::redistribute_siblings`
//! is keyed by `Cell::rowid`, which index cells don't carry, and building a
//! second rebalance path for byte keys was cut from this build (see
//! DESIGN.md); the tree still shrinks correctly on delete, just without
//! reclaiming sparse pages until the whole tree is cleared or dropped.

use crate::btree::balance;
use crate::buffer::{BufferPool, BufferPoolImpl};
use crate::error::Result;
use crate::page::{overflow, Cell};
use crate::storage::DiskManager;
use crate::types::{self, PageId};
use std::sync::Arc;

/// A disk-based index B-tree, rows keyed by raw byte strings with no value.
///
/// Unlike `BTree`, an `IndexTree` never writes its root/height into the
/// shared file header — callers (the table catalog) persist those fields
/// themselves, since a database can hold many index trees but the header
/// only has room for one root pointer.
pub struct IndexTree {
    buffer_pool: Arc<BufferPoolImpl>,
    disk: Arc<dyn DiskManager>,
    root: PageId,
    height: usize,
}

impl IndexTree {
    pub fn new(buffer_pool: Arc<BufferPoolImpl>, disk: Arc<dyn DiskManager>, root: PageId, height: usize) -> Self {
        Self { buffer_pool, disk, root, height }
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn usable(&self) -> usize {
        self.buffer_pool.usable_size()
    }

    fn make_leaf_cell(&self, owner: PageId, key: &[u8]) -> Result<Cell> {
        let usable = self.usable();
        let min_local = types::min_local(usable);
        let max_local = types::max_local_leaf(usable);
        let (local, total_size, overflow_page) =
            overflow::split_and_store(self.disk.as_ref(), owner, min_local, max_local, usable, key)?;
        Ok(Cell::new_index_leaf(local, total_size, overflow_page))
    }

    fn key_of(&self, cell: &Cell) -> Result<Vec<u8>> {
        if cell.has_overflow() {
            overflow::materialize(self.disk.as_ref(), cell, self.usable())
        } else {
            Ok(cell.local.clone())
        }
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        if !self.root.is_valid() {
            return Ok(false);
        }
        self.find_leaf_index(self.root, key).map(|idx| idx.is_some())
    }

    fn find_leaf_index(&self, mut page_id: PageId, key: &[u8]) -> Result<Option<usize>> {
        let usable = self.usable();
        loop {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = guard.read();
            if page.is_leaf() {
                for i in 0..page.cell_count() {
                    let cell = page.get_cell(i, usable)?;
                    if self.key_of(&cell)? == key {
                        return Ok(Some(i));
                    }
                }
                return Ok(None);
            }
            page_id = self.child_for_key(&page, usable, key)?;
        }
    }

    fn child_for_key(&self, page: &crate::page::SlottedPage, usable: usize, key: &[u8]) -> Result<PageId> {
        for i in 0..page.cell_count() {
            let cell = page.get_cell(i, usable)?;
            let cell_key = self.key_of(&cell)?;
            if key <= cell_key.as_slice() {
                return Ok(cell.left_child);
            }
        }
        Ok(page.right_child())
    }

    /// Insert `key`; a no-op if it is already present.
    pub fn insert(&mut self, key: &[u8]) -> Result<()> {
        if !self.root.is_valid() {
            let (page_id, guard) = self.buffer_pool.new_page(false, true)?;
            {
                let mut page = guard.write();
                let cell = self.make_leaf_cell(page_id, key)?;
                page.insert_cell(&cell, self.usable())?;
            }
            self.root = page_id;
            self.height = 1;
            self.buffer_pool.flush_page(page_id)?;
            return Ok(());
        }

        if let Some((sep_key, new_page_id)) = self.insert_recursive(self.root, key)? {
            self.split_root(sep_key, new_page_id)?;
        }
        Ok(())
    }

    fn insert_recursive(&mut self, page_id: PageId, key: &[u8]) -> Result<Option<(Vec<u8>, PageId)>> {
        let usable = self.usable();
        let is_leaf = self.buffer_pool.fetch_page(page_id)?.read().is_leaf();

        if is_leaf {
            return self.insert_into_leaf(page_id, key);
        }

        let child_id = {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = guard.read();
            self.child_for_key(&page, usable, key)?
        };

        if let Some((sep_key, new_child)) = self.insert_recursive(child_id, key)? {
            return self.insert_into_interior(page_id, sep_key, new_child);
        }
        Ok(None)
    }

    fn insert_into_leaf(&mut self, page_id: PageId, key: &[u8]) -> Result<Option<(Vec<u8>, PageId)>> {
        let usable = self.usable();
        if self.find_leaf_index(page_id, key)?.is_some() {
            return Ok(None);
        }
        let cell = self.make_leaf_cell(page_id, key)?;

        {
            let guard = self.buffer_pool.fetch_page_mut(page_id)?;
            let mut page = guard.write();
            if page.can_fit(cell.encoded_size(), usable) {
                page.insert_cell(&cell, usable)?;
                return Ok(None);
            }
            page.insert_cell(&cell, usable)?;
        }

        let mut page_owned = {
            let g = self.buffer_pool.fetch_page(page_id)?;
            let page = g.read();
            page.clone()
        };
        let (new_page_id, sep_cell) = split_index_leaf(self.buffer_pool.as_ref(), &mut page_owned, usable)?;
        self.buffer_pool.fetch_page_mut(page_id)?.write().clone_from(&page_owned);
        Ok(Some((self.key_of(&sep_cell)?, new_page_id)))
    }

    fn insert_into_interior(&mut self, page_id: PageId, sep_key: Vec<u8>, new_child: PageId) -> Result<Option<(Vec<u8>, PageId)>> {
        let usable = self.usable();
        let owner = page_id;
        let min_local = types::min_local(usable);
        let max_local = types::max_local_interior(usable);
        let (local, total_size, overflow_page) =
            overflow::split_and_store(self.disk.as_ref(), owner, min_local, max_local, usable, &sep_key)?;
        let cell = Cell::new_index_interior(new_child, local, total_size, overflow_page);

        {
            let guard = self.buffer_pool.fetch_page_mut(page_id)?;
            let fits = guard.read().can_fit(cell.encoded_size(), usable);
            let mut page = guard.write();
            page.insert_cell(&cell, usable)?;
            if fits {
                return Ok(None);
            }
        }

        let mut page_owned = {
            let g = self.buffer_pool.fetch_page(page_id)?;
            let page = g.read();
            page.clone()
        };
        let (new_page_id, promoted) = split_index_interior(self.buffer_pool.as_ref(), &mut page_owned, usable)?;
        self.buffer_pool.fetch_page_mut(page_id)?.write().clone_from(&page_owned);
        Ok(Some((self.key_of(&promoted)?, new_page_id)))
    }

    fn split_root(&mut self, sep_key: Vec<u8>, new_child: PageId) -> Result<()> {
        let old_root = self.root;
        let usable = self.usable();
        let min_local = types::min_local(usable);
        let max_local = types::max_local_interior(usable);
        let (local, total_size, overflow_page) =
            overflow::split_and_store(self.disk.as_ref(), old_root, min_local, max_local, usable, &sep_key)?;

        let (new_root_id, guard) = self.buffer_pool.new_page(false, false)?;
        {
            let mut new_root = guard.write();
            new_root.set_right_child(new_child);
            new_root.insert_cell(&Cell::new_index_interior(old_root, local, total_size, overflow_page), usable)?;
        }
        self.root = new_root_id;
        self.height += 1;
        self.buffer_pool.flush_page(new_root_id)?;
        Ok(())
    }

    /// Remove `key`, returning whether it was present. Does not rebalance:
    /// the vacated leaf is simply left sparser.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        if !self.root.is_valid() {
            return Ok(false);
        }
        self.remove_recursive(self.root, key)
    }

    fn remove_recursive(&mut self, page_id: PageId, key: &[u8]) -> Result<bool> {
        let usable = self.usable();
        let is_leaf = self.buffer_pool.fetch_page(page_id)?.read().is_leaf();

        if is_leaf {
            let idx = self.find_leaf_index(page_id, key)?;
            match idx {
                Some(idx) => {
                    let guard = self.buffer_pool.fetch_page_mut(page_id)?;
                    let mut page = guard.write();
                    let cell = page.delete_cell(idx, usable)?;
                    drop(page);
                    if cell.has_overflow() {
                        overflow::free_chain(self.disk.as_ref(), cell.overflow_page)?;
                    }
                    Ok(true)
                }
                None => Ok(false),
            }
        } else {
            let child_id = {
                let guard = self.buffer_pool.fetch_page(page_id)?;
                let page = guard.read();
                self.child_for_key(&page, usable, key)?
            };
            self.remove_recursive(child_id, key)
        }
    }

    /// In-order traversal of every key currently stored.
    pub fn scan(&self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        if self.root.is_valid() {
            self.scan_into(self.root, &mut out)?;
        }
        Ok(out)
    }

    fn scan_into(&self, page_id: PageId, out: &mut Vec<Vec<u8>>) -> Result<()> {
        let usable = self.usable();
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page = guard.read();
        if page.is_leaf() {
            for i in 0..page.cell_count() {
                let cell = page.get_cell(i, usable)?;
                out.push(self.key_of(&cell)?);
            }
            return Ok(());
        }
        let children: Vec<PageId> = {
            let mut kids = Vec::with_capacity(page.cell_count() + 1);
            for i in 0..page.cell_count() {
                kids.push(page.get_cell(i, usable)?.left_child);
            }
            kids.push(page.right_child());
            kids
        };
        drop(page);
        for child in children {
            self.scan_into(child, out)?;
        }
        Ok(())
    }

    /// Walk the whole tree verifying keys are strictly increasing bytewise,
    /// accumulating human-readable problem descriptions.
    pub fn integrity_check(&self) -> Result<Vec<String>> {
        let mut errors = Vec::new();
        if self.root.is_valid() {
            self.check_recursive(self.root, &mut errors)?;
        }
        Ok(errors)
    }

    fn check_recursive(&self, page_id: PageId, errors: &mut Vec<String>) -> Result<()> {
        let usable = self.usable();
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page = guard.read();

        let mut prev: Option<Vec<u8>> = None;
        let mut children = Vec::new();
        for i in 0..page.cell_count() {
            let cell = page.get_cell(i, usable)?;
            let key = self.key_of(&cell)?;
            if let Some(p) = &prev {
                if &key <= p {
                    errors.push(format!("page {:?}: key out of order after previous key", page_id));
                }
            }
            if !page.is_leaf() {
                children.push(cell.left_child);
            }
            prev = Some(key);
        }
        if !page.is_leaf() {
            children.push(page.right_child());
        }
        drop(page);
        drop(guard);

        for child in children {
            self.check_recursive(child, errors)?;
        }
        Ok(())
    }

    /// Free every page belonging to this tree (used by `drop_table`/
    /// `clear_table`); resets this handle back to an empty tree.
    pub fn clear(&mut self) -> Result<()> {
        if self.root.is_valid() {
            self.free_subtree(self.root)?;
        }
        self.root = PageId::INVALID;
        self.height = 0;
        Ok(())
    }

    fn free_subtree(&mut self, page_id: PageId) -> Result<()> {
        let usable = self.usable();
        let (is_leaf, children): (bool, Vec<PageId>) = {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = guard.read();
            if page.is_leaf() {
                for i in 0..page.cell_count() {
                    let cell = page.get_cell(i, usable)?;
                    if cell.has_overflow() {
                        overflow::free_chain(self.disk.as_ref(), cell.overflow_page)?;
                    }
                }
                (true, Vec::new())
            } else {
                let mut kids = Vec::with_capacity(page.cell_count() + 1);
                for i in 0..page.cell_count() {
                    let cell = page.get_cell(i, usable)?;
                    if cell.has_overflow() {
                        overflow::free_chain(self.disk.as_ref(), cell.overflow_page)?;
                    }
                    kids.push(cell.left_child);
                }
                kids.push(page.right_child());
                (false, kids)
            }
        };
        if !is_leaf {
            for child in children {
                self.free_subtree(child)?;
            }
        }
        self.buffer_pool.free_page(page_id)?;
        Ok(())
    }
}

fn split_index_leaf(
    pool: &dyn BufferPool,
    page: &mut crate::page::SlottedPage,
    usable: usize,
) -> Result<(PageId, Cell)> {
    let count = page.cell_count();
    let split_at = count / 2;

    let mut moved = Vec::with_capacity(count - split_at);
    for i in (split_at..count).rev() {
        moved.push(page.delete_cell(i, usable)?);
    }
    moved.reverse();

    let (new_page_id, guard) = pool.new_page(false, true)?;
    {
        let mut new_page = guard.write();
        for cell in &moved {
            new_page.insert_cell(cell, usable)?;
        }
    }
    let separator = moved[0].clone();
    log::debug!("split index leaf: {} cell(s) moved to new page {:?}", moved.len(), new_page_id);
    Ok((new_page_id, separator))
}

fn split_index_interior(
    pool: &dyn BufferPool,
    page: &mut crate::page::SlottedPage,
    usable: usize,
) -> Result<(PageId, Cell)> {
    let count = page.cell_count();
    let mid = count / 2;

    let mid_cell = page.get_cell(mid, usable)?;
    let promoted_child = mid_cell.left_child;

    let mut right_cells = Vec::with_capacity(count - mid - 1);
    for i in (mid + 1..count).rev() {
        right_cells.push(page.delete_cell(i, usable)?);
    }
    right_cells.reverse();
    page.delete_cell(mid, usable)?;

    let old_right_child = page.right_child();
    page.set_right_child(promoted_child);

    let (new_page_id, guard) = pool.new_page(false, false)?;
    {
        let mut new_page = guard.write();
        new_page.set_right_child(old_right_child);
        for cell in &right_cells {
            new_page.insert_cell(cell, usable)?;
        }
    }
    log::debug!("split index interior: promoted cell kept aside, new page {:?} holds {} cell(s)", new_page_id, right_cells.len());
    Ok((new_page_id, mid_cell))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolImpl;
    use crate::storage::DiskManagerImpl;
    use tempfile::tempdir;

    fn new_tree() -> (IndexTree, Arc<BufferPoolImpl>, Arc<dyn DiskManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk: Arc<dyn DiskManager> = Arc::new(DiskManagerImpl::open(&dir.path().join("idx.db"), false).unwrap());
        let pool = Arc::new(BufferPoolImpl::new(disk.clone(), 64));
        let tree = IndexTree::new(pool.clone(), disk.clone(), PageId::INVALID, 0);
        (tree, pool, disk, dir)
    }

    #[test]
    fn test_insert_and_contains() {
        let (mut tree, _pool, _disk, _dir) = new_tree();
        tree.insert(b"apple").unwrap();
        tree.insert(b"banana").unwrap();
        tree.insert(b"cherry").unwrap();

        assert!(tree.contains(b"banana").unwrap());
        assert!(!tree.contains(b"durian").unwrap());
    }

    #[test]
    fn test_scan_returns_keys_in_order() {
        let (mut tree, _pool, _disk, _dir) = new_tree();
        for k in ["pear", "apple", "mango", "kiwi", "banana"] {
            tree.insert(k.as_bytes()).unwrap();
        }
        let scanned = tree.scan().unwrap();
        let mut expected: Vec<Vec<u8>> = scanned.clone();
        expected.sort();
        assert_eq!(scanned, expected);
        assert_eq!(scanned.len(), 5);
    }

    #[test]
    fn test_insert_many_keys_forces_splits() {
        let (mut tree, _pool, _disk, _dir) = new_tree();
        let keys: Vec<String> = (0..500).map(|i| format!("key-{:06}", i)).collect();
        for k in &keys {
            tree.insert(k.as_bytes()).unwrap();
        }
        assert!(tree.height() > 1, "500 keys should have forced at least one split");
        let scanned = tree.scan().unwrap();
        assert_eq!(scanned.len(), keys.len());
        for k in &keys {
            assert!(tree.contains(k.as_bytes()).unwrap());
        }
    }

    #[test]
    fn test_remove_then_scan_drops_the_key() {
        let (mut tree, _pool, _disk, _dir) = new_tree();
        tree.insert(b"one").unwrap();
        tree.insert(b"two").unwrap();
        tree.insert(b"three").unwrap();

        assert!(tree.remove(b"two").unwrap());
        assert!(!tree.remove(b"two").unwrap());
        assert!(!tree.contains(b"two").unwrap());
        assert_eq!(tree.scan().unwrap().len(), 2);
    }

    #[test]
    fn test_clear_frees_every_page_and_resets_to_empty() {
        let (mut tree, _pool, _disk, _dir) = new_tree();
        for i in 0..300 {
            tree.insert(format!("k{:05}", i).as_bytes()).unwrap();
        }
        tree.clear().unwrap();
        assert!(!tree.root().is_valid());
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.scan().unwrap().len(), 0);
    }
}
