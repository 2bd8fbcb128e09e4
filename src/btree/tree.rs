//! Table B-tree: rows keyed by a 64-bit integer rowid, following the
//! format's table/index split. Secondary index trees share the same page
//! and cell machinery (`CellKind::Index*`) but get their own tree-level
//! traversal and split logic in `btree::index_tree`, since their sort key
//! lives in `Cell::local` rather than `Cell::rowid` (see DESIGN.md).
//!
//! Pointer-map maintenance here (`PtrMapType::RootPage`/`BTreeChild`) is
//! applied at the points a page is first attached as a root or as a direct
//! child — it does not walk down and refresh the entries of grandchildren
//! left in place by a split (their own page numbers don't move, only their
//! reachability path does), a known gap noted in DESIGN.md.

use crate::btree::balance::{self};
use crate::buffer::{BufferPool, BufferPoolImpl};
use crate::error::{Result, StorageError};
use crate::page::overflow;
use crate::page::{Cell, SlottedPage};
use crate::storage::pointer_map::PtrMapType;
use crate::storage::DiskManager;
use crate::types::{self, PageId, MAX_VALUE_SIZE};
use std::sync::Arc;

/// A disk-based table B-tree, rows keyed by rowid.
///
/// `persist_root` controls whether root/height changes are written into the
/// file header's single root slot. Exactly one tree in a database — the
/// catalog — owns that slot; every table the catalog tracks is opened with
/// `persist_root: false` and has its own root/height persisted as a row in
/// the catalog tree instead.
pub struct BTree {
    buffer_pool: Arc<BufferPoolImpl>,
    disk: Arc<dyn DiskManager>,
    root_page: PageId,
    height: usize,
    persist_root: bool,
}

impl BTree {
    pub fn new(buffer_pool: Arc<BufferPoolImpl>, disk: Arc<dyn DiskManager>) -> Result<Self> {
        let root_page = buffer_pool.root_page();
        let height = buffer_pool.tree_height() as usize;
        Ok(Self { buffer_pool, disk, root_page, height, persist_root: true })
    }

    /// Open a table whose root isn't the file header's root slot — its
    /// root/height live in a catalog row managed by the caller.
    pub fn open(buffer_pool: Arc<BufferPoolImpl>, disk: Arc<dyn DiskManager>, root_page: PageId, height: usize) -> Self {
        Self { buffer_pool, disk, root_page, height, persist_root: false }
    }

    fn persist_root_if_owned(&self) -> Result<()> {
        if self.persist_root {
            self.buffer_pool.set_root_page(self.root_page, self.height as u32)?;
        }
        Ok(())
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn root_page(&self) -> PageId {
        self.root_page
    }

    fn usable(&self) -> usize {
        self.buffer_pool.usable_size()
    }

    pub fn get(&self, rowid: u64) -> Result<Option<Vec<u8>>> {
        if !self.root_page.is_valid() {
            return Ok(None);
        }
        self.search(self.root_page, rowid)
    }

    fn search(&self, page_id: PageId, rowid: u64) -> Result<Option<Vec<u8>>> {
        let usable = self.usable();
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page = guard.read();

        if page.is_leaf() {
            if let Some(idx) = page.search_rowid(rowid, usable)? {
                let cell = page.get_cell(idx, usable)?;
                let value = overflow::materialize(self.disk.as_ref(), &cell, usable)?;
                return Ok(Some(value));
            }
            return Ok(None);
        }

        let child = page.find_child_by_rowid(rowid, usable)?;
        drop(page);
        drop(guard);
        self.search(child, rowid)
    }

    pub fn put(&mut self, rowid: u64, value: &[u8]) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(StorageError::ValueTooLarge { size: value.len(), max: MAX_VALUE_SIZE });
        }

        if !self.root_page.is_valid() {
            let (page_id, guard) = self.buffer_pool.new_page(true, true)?;
            {
                let mut page = guard.write();
                let cell = self.make_leaf_cell(page_id, rowid, value)?;
                page.insert_cell(&cell, self.usable())?;
            }
            self.root_page = page_id;
            self.height = 1;
            self.persist_root_if_owned()?;
            self.disk.ptrmap_set(page_id, PtrMapType::RootPage, PageId::INVALID)?;
            self.buffer_pool.flush_page(page_id)?;
            return Ok(());
        }

        if let Some((sep_rowid, new_page_id)) = self.insert_recursive(self.root_page, rowid, value)? {
            self.split_root(sep_rowid, new_page_id)?;
        }
        Ok(())
    }

    fn make_leaf_cell(&self, owner: PageId, rowid: u64, value: &[u8]) -> Result<Cell> {
        let usable = self.usable();
        let min_local = types::min_local(usable);
        let max_local = types::max_local_leaf(usable);
        let (local, total_size, overflow_page) =
            overflow::split_and_store(self.disk.as_ref(), owner, min_local, max_local, usable, value)?;
        Ok(Cell::new_table_leaf(rowid, local, total_size, overflow_page))
    }

    /// Returns `Some((separator_rowid, new_sibling_page))` if `page_id`
    /// split and the caller (its parent) must insert the separator.
    fn insert_recursive(
        &mut self,
        page_id: PageId,
        rowid: u64,
        value: &[u8],
    ) -> Result<Option<(u64, PageId)>> {
        let usable = self.usable();
        let is_leaf = {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = guard.read();
            page.is_leaf()
        };

        if is_leaf {
            let cell = self.make_leaf_cell(page_id, rowid, value)?;
            return self.insert_into_leaf(page_id, cell);
        }

        let child_id = {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = guard.read();
            page.find_child_by_rowid(rowid, usable)?
        };

        if let Some((sep_rowid, new_child)) = self.insert_recursive(child_id, rowid, value)? {
            return self.insert_into_interior(page_id, sep_rowid, new_child);
        }
        Ok(None)
    }

    fn insert_into_leaf(&mut self, page_id: PageId, cell: Cell) -> Result<Option<(u64, PageId)>> {
        let usable = self.usable();
        let guard = self.buffer_pool.fetch_page_mut(page_id)?;

        let existing = {
            let page = guard.read();
            page.search_rowid(cell.rowid, usable)?
        };

        {
            let mut page = guard.write();
            if let Some(idx) = existing {
                let old = page.delete_cell(idx, usable)?;
                if old.has_overflow() {
                    overflow::free_chain(self.disk.as_ref(), old.overflow_page)?;
                }
            }
            if page.can_fit(cell.encoded_size(), usable) {
                page.insert_cell(&cell, usable)?;
                return Ok(None);
            }
            page.insert_cell(&cell, usable)?;
        }

        // Overfull: split.
        let mut page_owned = {
            let g = self.buffer_pool.fetch_page(page_id)?;
            let page = g.read();
            page.clone()
        };
        let (new_page_id, sep_rowid) = balance::split_leaf(self.buffer_pool.as_ref(), true, &mut page_owned, usable)?;
        self.buffer_pool.fetch_page_mut(page_id)?.write().clone_from(&page_owned);
        Ok(Some((sep_rowid, new_page_id)))
    }

    fn insert_into_interior(
        &mut self,
        page_id: PageId,
        sep_rowid: u64,
        new_child: PageId,
    ) -> Result<Option<(u64, PageId)>> {
        let usable = self.usable();
        let cell = Cell::new_table_interior(sep_rowid, new_child);
        self.disk.ptrmap_set(new_child, PtrMapType::BTreeChild, page_id)?;

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
        let (new_page_id, promoted) =
            balance::split_interior(self.buffer_pool.as_ref(), true, &mut page_owned, usable)?;
        self.buffer_pool.fetch_page_mut(page_id)?.write().clone_from(&page_owned);
        Ok(Some((promoted, new_page_id)))
    }

    fn split_root(&mut self, sep_rowid: u64, new_child: PageId) -> Result<()> {
        let old_root = self.root_page;
        let (new_root_id, guard) = self.buffer_pool.new_page(true, false)?;
        {
            let mut new_root = guard.write();
            new_root.set_right_child(new_child);
            new_root.insert_cell(&Cell::new_table_interior(sep_rowid, old_root), self.usable())?;
        }
        self.root_page = new_root_id;
        self.height += 1;
        self.persist_root_if_owned()?;
        self.disk.ptrmap_set(new_root_id, PtrMapType::RootPage, PageId::INVALID)?;
        self.disk.ptrmap_set(old_root, PtrMapType::BTreeChild, new_root_id)?;
        self.disk.ptrmap_set(new_child, PtrMapType::BTreeChild, new_root_id)?;
        self.buffer_pool.flush_page(new_root_id)?;
        Ok(())
    }

    pub fn delete(&mut self, rowid: u64) -> Result<bool> {
        if !self.root_page.is_valid() {
            return Ok(false);
        }
        let deleted = self.delete_recursive(self.root_page, rowid)?;
        if deleted {
            self.collapse_root_if_needed()?;
        }
        Ok(deleted)
    }

    /// If deletes have left the root an interior page with only its
    /// `right_child` and no cells, that child is now the whole tree;
    /// replace the root with it and shrink the recorded height.
    fn collapse_root_if_needed(&mut self) -> Result<()> {
        if self.height <= 1 {
            return Ok(());
        }
        let (is_interior, is_empty, only_child) = {
            let guard = self.buffer_pool.fetch_page(self.root_page)?;
            let page = guard.read();
            (page.is_interior(), page.cell_count() == 0, page.right_child())
        };
        if is_interior && is_empty {
            let old_root = self.root_page;
            self.root_page = only_child;
            self.height -= 1;
            self.persist_root_if_owned()?;
            self.disk.ptrmap_set(self.root_page, PtrMapType::RootPage, PageId::INVALID)?;
            self.buffer_pool.free_page(old_root)?;
            log::debug!("collapsed root {:?} into its sole child {:?}, height now {}", old_root, self.root_page, self.height);
        }
        Ok(())
    }

    fn delete_recursive(&mut self, page_id: PageId, rowid: u64) -> Result<bool> {
        let usable = self.usable();
        let is_leaf = self.buffer_pool.fetch_page(page_id)?.read().is_leaf();

        if is_leaf {
            let guard = self.buffer_pool.fetch_page_mut(page_id)?;
            let idx = guard.read().search_rowid(rowid, usable)?;
            match idx {
                Some(idx) => {
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
            let (count, child_index, child_id) = {
                let guard = self.buffer_pool.fetch_page(page_id)?;
                let page = guard.read();
                let count = page.cell_count();
                let mut child_index = count;
                let mut child_id = page.right_child();
                for i in 0..count {
                    let cell = page.get_cell(i, usable)?;
                    if rowid <= cell.rowid {
                        child_index = i;
                        child_id = cell.left_child;
                        break;
                    }
                }
                (count, child_index, child_id)
            };

            let deleted = self.delete_recursive(child_id, rowid)?;
            if deleted {
                self.rebalance_child(page_id, count, child_index, child_id)?;
            }
            Ok(deleted)
        }
    }

    /// After a delete left `child_id` (at position `child_index` among
    /// `parent_id`'s children) underfull, gather it with up to one sibling
    /// on each side and repack all of their cells into as few pages as will
    /// hold them, per `balance::redistribute_siblings`. Only rebalances one
    /// level; a merge that leaves `parent_id` itself underfull is picked up
    /// the next time a delete passes back through it, except at the root,
    /// which `collapse_root_if_needed` handles directly.
    fn rebalance_child(
        &mut self,
        parent_id: PageId,
        count: usize,
        child_index: usize,
        child_id: PageId,
    ) -> Result<()> {
        let usable = self.usable();
        let underfull = balance::is_underfull(&self.buffer_pool.fetch_page(child_id)?.read(), usable);
        if !underfull {
            return Ok(());
        }

        let lo = child_index.saturating_sub(1);
        let hi = (child_index + 1).min(count);
        if lo == hi {
            return Ok(());
        }

        let (sibling_ids, separators, next_cell) = {
            let guard = self.buffer_pool.fetch_page(parent_id)?;
            let page = guard.read();
            let mut sibling_ids = Vec::with_capacity(hi - lo + 1);
            for p in lo..=hi {
                let id = if p < count { page.get_cell(p, usable)?.left_child } else { page.right_child() };
                sibling_ids.push(id);
            }
            let mut separators = Vec::with_capacity(hi - lo);
            for p in lo..hi {
                separators.push(page.get_cell(p, usable)?.rowid);
            }
            let next_cell = if hi < count { Some(page.get_cell(hi, usable)?) } else { None };
            (sibling_ids, separators, next_cell)
        };

        let sibling_pages: Vec<SlottedPage> = sibling_ids
            .iter()
            .map(|&id| Ok(self.buffer_pool.fetch_page(id)?.read().clone()))
            .collect::<Result<_>>()?;

        let redist = balance::redistribute_siblings(&sibling_pages, &separators, usable)?;
        let kept = redist.pages.len();

        for (i, page) in redist.pages.iter().enumerate() {
            self.buffer_pool.fetch_page_mut(sibling_ids[i])?.write().clone_from(page);
        }
        for &extra in &sibling_ids[kept..] {
            self.buffer_pool.free_page(extra)?;
        }

        let parent_guard = self.buffer_pool.fetch_page_mut(parent_id)?;
        let mut parent = parent_guard.write();
        for _ in lo..hi {
            parent.delete_cell(lo, usable)?;
        }
        for (i, &sep) in redist.separators.iter().enumerate() {
            parent.insert_cell(&Cell::new_table_interior(sep, sibling_ids[i]), usable)?;
        }
        match next_cell {
            Some(cell) => {
                parent.delete_cell(lo + kept - 1, usable)?;
                parent.insert_cell(&Cell::new_table_interior(cell.rowid, sibling_ids[kept - 1]), usable)?;
            }
            None => parent.set_right_child(sibling_ids[kept - 1]),
        }

        log::debug!(
            "rebalanced {} sibling(s) around child {:?} into {} page(s)",
            sibling_ids.len(),
            child_id,
            kept
        );
        Ok(())
    }

    pub fn scan(&self, start: Option<u64>, end: Option<u64>) -> Result<Vec<(u64, Vec<u8>)>> {
        if !self.root_page.is_valid() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        self.scan_recursive(self.root_page, start, end, &mut results)?;
        Ok(results)
    }

    fn scan_recursive(
        &self,
        page_id: PageId,
        start: Option<u64>,
        end: Option<u64>,
        results: &mut Vec<(u64, Vec<u8>)>,
    ) -> Result<()> {
        let usable = self.usable();
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page = guard.read();

        if page.is_leaf() {
            for i in 0..page.cell_count() {
                let cell = page.get_cell(i, usable)?;
                if let Some(s) = start {
                    if cell.rowid < s {
                        continue;
                    }
                }
                if let Some(e) = end {
                    if cell.rowid >= e {
                        break;
                    }
                }
                let value = overflow::materialize(self.disk.as_ref(), &cell, usable)?;
                results.push((cell.rowid, value));
            }
            return Ok(());
        }

        let count = page.cell_count();
        let mut children = Vec::with_capacity(count + 1);
        for i in 0..count {
            children.push(page.get_cell(i, usable)?.left_child);
        }
        children.push(page.right_child());
        drop(page);
        drop(guard);

        for child in children {
            self.scan_recursive(child, start, end, results)?;
        }
        Ok(())
    }

    /// Free every page in this tree and reset it to empty. Used by
    /// `clearTable`/`dropTable`.
    pub fn clear(&mut self) -> Result<()> {
        if self.root_page.is_valid() {
            self.free_subtree(self.root_page)?;
        }
        self.root_page = PageId::INVALID;
        self.height = 0;
        self.persist_root_if_owned()?;
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

    /// Walk the whole tree verifying rowids are strictly increasing and that
    /// every interior separator correctly bounds its subtree, accumulating
    /// human-readable problem descriptions rather than failing on the first
    /// one found.
    pub fn integrity_check(&self) -> Result<Vec<String>> {
        let mut errors = Vec::new();
        if self.root_page.is_valid() {
            self.check_recursive(self.root_page, None, None, &mut errors)?;
        }
        Ok(errors)
    }

    fn check_recursive(
        &self,
        page_id: PageId,
        lower: Option<u64>,
        upper: Option<u64>,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        let usable = self.usable();
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page = guard.read();

        let mut prev: Option<u64> = None;
        let mut children = Vec::new();
        for i in 0..page.cell_count() {
            let cell = page.get_cell(i, usable)?;
            if let Some(p) = prev {
                if cell.rowid <= p {
                    errors.push(format!(
                        "page {:?}: rowid {} out of order after {}",
                        page_id, cell.rowid, p
                    ));
                }
            }
            if let Some(lo) = lower {
                if cell.rowid < lo {
                    errors.push(format!("page {:?}: rowid {} below lower bound {}", page_id, cell.rowid, lo));
                }
            }
            if let Some(hi) = upper {
                if cell.rowid > hi {
                    errors.push(format!("page {:?}: rowid {} above upper bound {}", page_id, cell.rowid, hi));
                }
            }
            if !page.is_leaf() {
                let child_lower = prev;
                children.push((cell.left_child, child_lower, Some(cell.rowid)));
            }
            prev = Some(cell.rowid);
        }
        if !page.is_leaf() {
            children.push((page.right_child(), prev, upper));
        }
        drop(page);
        drop(guard);

        for (child, child_lower, child_upper) in children {
            self.check_recursive(child, child_lower, child_upper, errors)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManagerImpl;
    use tempfile::tempdir;

    fn create_test_btree() -> Result<(BTree, tempfile::TempDir)> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let dm = Arc::new(DiskManagerImpl::open(&path, false)?);
        let pool = Arc::new(BufferPoolImpl::new(dm.clone(), 100));
        let btree = BTree::new(pool, dm)?;
        Ok((btree, dir))
    }

    #[test]
    fn test_btree_empty() -> Result<()> {
        let (btree, _dir) = create_test_btree()?;
        assert_eq!(btree.get(1)?, None);
        Ok(())
    }

    #[test]
    fn test_btree_single_insert() -> Result<()> {
        let (mut btree, _dir) = create_test_btree()?;
        btree.put(1, b"world")?;
        assert_eq!(btree.get(1)?, Some(b"world".to_vec()));
        assert_eq!(btree.get(2)?, None);
        Ok(())
    }

    #[test]
    fn test_btree_update() -> Result<()> {
        let (mut btree, _dir) = create_test_btree()?;
        btree.put(1, b"value1")?;
        btree.put(1, b"value2")?;
        assert_eq!(btree.get(1)?, Some(b"value2".to_vec()));
        Ok(())
    }

    #[test]
    fn test_btree_delete() -> Result<()> {
        let (mut btree, _dir) = create_test_btree()?;
        btree.put(1, b"value")?;
        assert!(btree.delete(1)?);
        assert_eq!(btree.get(1)?, None);
        assert!(!btree.delete(1)?);
        Ok(())
    }

    #[test]
    fn test_btree_scan() -> Result<()> {
        let (mut btree, _dir) = create_test_btree()?;
        for i in 1..=4u64 {
            btree.put(i, format!("v{}", i).as_bytes())?;
        }
        let all = btree.scan(None, None)?;
        assert_eq!(all.len(), 4);
        let range = btree.scan(Some(2), Some(4))?;
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].0, 2);
        Ok(())
    }

    #[test]
    fn test_btree_many_inserts_cause_splits() -> Result<()> {
        let (mut btree, _dir) = create_test_btree()?;
        for i in 0..500u64 {
            btree.put(i, format!("value-{}", i).repeat(4).as_bytes())?;
        }
        for i in 0..500u64 {
            let expected = format!("value-{}", i).repeat(4);
            assert_eq!(btree.get(i)?, Some(expected.into_bytes()), "key {}", i);
        }
        assert!(btree.height() >= 2);
        Ok(())
    }

    #[test]
    fn test_btree_large_value_uses_overflow() -> Result<()> {
        let (mut btree, _dir) = create_test_btree()?;
        let big = vec![0xABu8; 10_000];
        btree.put(1, &big)?;
        assert_eq!(btree.get(1)?, Some(big));
        Ok(())
    }

    #[test]
    fn test_btree_delete_all_keeps_tree_queryable() -> Result<()> {
        let (mut btree, _dir) = create_test_btree()?;
        for i in 0..300u64 {
            btree.put(i, format!("value-{}", i).repeat(4).as_bytes())?;
        }
        assert!(btree.height() >= 2);

        for i in 0..300u64 {
            assert!(btree.delete(i)?, "key {} should have existed", i);
        }
        for i in 0..300u64 {
            assert_eq!(btree.get(i)?, None);
        }

        btree.put(1000, b"after full delete")?;
        assert_eq!(btree.get(1000)?, Some(b"after full delete".to_vec()));
        Ok(())
    }

    #[test]
    fn test_btree_delete_triggers_sibling_merge() -> Result<()> {
        let (mut btree, _dir) = create_test_btree()?;
        for i in 0..300u64 {
            btree.put(i, format!("value-{}", i).repeat(4).as_bytes())?;
        }
        for i in 0..250u64 {
            assert!(btree.delete(i)?);
        }
        for i in 250..300u64 {
            let expected = format!("value-{}", i).repeat(4);
            assert_eq!(btree.get(i)?, Some(expected.into_bytes()), "key {}", i);
        }
        Ok(())
    }

    #[test]
    fn test_btree_clear_frees_pages_and_resets_to_empty() -> Result<()> {
        let (mut btree, _dir) = create_test_btree()?;
        for i in 0..300u64 {
            btree.put(i, format!("value-{}", i).as_bytes())?;
        }
        assert!(btree.height() >= 1);

        btree.clear()?;
        assert!(!btree.root_page().is_valid());
        assert_eq!(btree.height(), 0);
        assert_eq!(btree.get(5)?, None);
        assert_eq!(btree.scan(None, None)?.len(), 0);

        btree.put(1, b"still works")?;
        assert_eq!(btree.get(1)?, Some(b"still works".to_vec()));
        Ok(())
    }

    #[test]
    fn test_btree_integrity_check_is_clean_for_a_well_formed_tree() -> Result<()> {
        let (mut btree, _dir) = create_test_btree()?;
        for i in 0..300u64 {
            btree.put(i, format!("value-{}", i).as_bytes())?;
        }
        assert!(btree.integrity_check()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_btree_open_with_explicit_root_does_not_touch_file_header() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let dm = Arc::new(DiskManagerImpl::open(&path, false)?);
        let pool = Arc::new(BufferPoolImpl::new(dm.clone(), 100));

        let mut secondary = BTree::open(pool.clone(), dm.clone(), PageId::INVALID, 0);
        secondary.put(1, b"secondary row")?;
        assert_eq!(secondary.get(1)?, Some(b"secondary row".to_vec()));

        // A secondary tree must never claim the header's root slot.
        assert!(!dm.header().root_page.is_valid());
        Ok(())
    }
}
