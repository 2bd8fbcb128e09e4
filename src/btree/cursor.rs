//! B-tree cursor for ordered iteration over a table's rows.
//!
//! The cursor holds a path from root to current leaf as a stack of
//! `(page_id, cell_index)` pairs. When a cursor's position is saved before
//! the tree may move under it (a balance triggered by another cursor's
//! insert/delete, since pages are addressed by id and ids get reused by the
//! free list once a page is freed), its current rowid is cached and the
//! stack is torn down, moving it to `RequiresSeek`. The next call that needs
//! a position re-seeks by that cached rowid before doing anything else,
//! mirroring the format's `CURSOR_VALID` / `CURSOR_REQUIRESEEK` /
//! `CURSOR_FAULT` states.
//!
//! A re-seek can land past the cached rowid if that exact row was deleted
//! while the cursor was saved; when that happens the landing row already
//! *is* the next row, so the following `next()` must not advance again, and
//! symmetrically for `prev()` landing just before a deleted row. That single
//! pending skip is `skip_next`.

use crate::buffer::BufferPool;
use crate::error::Result;
use crate::page::overflow;
use crate::storage::DiskManager;
use crate::types::PageId;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum CursorState {
    /// `stack` points at a live cell; safe to read or step from directly.
    Valid,
    /// The tree moved since this cursor was last positioned; `saved_rowid`
    /// must be re-seeked before the cursor can be read or stepped.
    RequiresSeek,
    /// Positioned on an empty tree, or stepped off either end.
    Invalid,
}

/// A cursor for iterating over table-tree rows in rowid order.
pub struct Cursor<P: BufferPool> {
    buffer_pool: Arc<P>,
    disk: Arc<dyn DiskManager>,
    root_page: PageId,
    stack: Vec<(PageId, usize)>,
    state: CursorState,
    saved_rowid: Option<u64>,
    /// +1: the landing row from the last re-seek already *is* the row a
    /// pending `next()` was asked for, so that call should not step again.
    /// -1: same, for a pending `prev()`. 0: no pending skip.
    skip_next: i8,
}

impl<P: BufferPool> Cursor<P> {
    pub fn new(buffer_pool: Arc<P>, disk: Arc<dyn DiskManager>, root_page: PageId) -> Result<Self> {
        let mut cursor = Self {
            buffer_pool,
            disk,
            root_page,
            stack: Vec::new(),
            state: CursorState::Invalid,
            saved_rowid: None,
            skip_next: 0,
        };
        if root_page.is_valid() {
            cursor.descend_to_leftmost(root_page)?;
        }
        Ok(cursor)
    }

    pub fn seek(
        buffer_pool: Arc<P>,
        disk: Arc<dyn DiskManager>,
        root_page: PageId,
        rowid: u64,
    ) -> Result<Self> {
        let mut cursor = Self {
            buffer_pool,
            disk,
            root_page,
            stack: Vec::new(),
            state: CursorState::Invalid,
            saved_rowid: None,
            skip_next: 0,
        };
        if root_page.is_valid() {
            cursor.seek_to_rowid(root_page, rowid)?;
        }
        Ok(cursor)
    }

    /// Reposition on the first row of the tree.
    pub fn first(&mut self) -> Result<bool> {
        self.skip_next = 0;
        self.saved_rowid = None;
        self.stack.clear();
        if !self.root_page.is_valid() {
            self.state = CursorState::Invalid;
            return Ok(false);
        }
        self.descend_to_leftmost(self.root_page)
    }

    /// Reposition on the last row of the tree.
    pub fn last(&mut self) -> Result<bool> {
        self.skip_next = 0;
        self.saved_rowid = None;
        self.stack.clear();
        if !self.root_page.is_valid() {
            self.state = CursorState::Invalid;
            return Ok(false);
        }
        self.descend_to_rightmost(self.root_page)
    }

    pub fn is_valid(&self) -> bool {
        self.state == CursorState::Valid
    }

    /// Whether the row this cursor is now on is a different on-disk cell
    /// than the one it pointed to before its last save/restore cycle — the
    /// format exposes this so callers that cached values by position (not
    /// by rowid) know to refresh them.
    pub fn has_moved(&self) -> bool {
        self.skip_next != 0
    }

    /// The current row as `(rowid, value)`, with overflow payloads fully
    /// materialized.
    pub fn current(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        self.restore_position()?;
        if self.state != CursorState::Valid {
            return Ok(None);
        }
        let (page_id, idx) = *self.stack.last().unwrap();
        let usable = self.buffer_pool.usable_size();
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page = guard.read();
        if idx >= page.cell_count() {
            return Ok(None);
        }
        let cell = page.get_cell(idx, usable)?;
        let value = overflow::materialize(self.disk.as_ref(), &cell, usable)?;
        Ok(Some((cell.rowid, value)))
    }

    /// Tear the cursor's page stack down to just its current rowid, so it
    /// survives a balance that may reshuffle or free the pages it was
    /// pointing into. Callers that mutate the tree through one handle while
    /// holding cursors on another must call this first.
    pub fn save_position(&mut self) -> Result<()> {
        if self.state != CursorState::Valid {
            return Ok(());
        }
        let (page_id, idx) = *self.stack.last().unwrap();
        let usable = self.buffer_pool.usable_size();
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page = guard.read();
        self.saved_rowid =
            if idx < page.cell_count() { Some(page.get_cell(idx, usable)?.rowid) } else { None };
        drop(page);
        drop(guard);
        self.stack.clear();
        self.state = CursorState::RequiresSeek;
        Ok(())
    }

    fn restore_position(&mut self) -> Result<()> {
        if self.state != CursorState::RequiresSeek {
            return Ok(());
        }
        match self.saved_rowid {
            Some(rowid) => {
                let root = self.root_page;
                self.stack.clear();
                self.seek_to_rowid(root, rowid)?;
                if self.state == CursorState::Valid {
                    let landed = self.current_rowid()?;
                    self.skip_next = if landed == Some(rowid) { 0 } else { 1 };
                } else {
                    self.skip_next = 0;
                }
            }
            None => {
                self.state = CursorState::Invalid;
                self.skip_next = 0;
            }
        }
        Ok(())
    }

    fn current_rowid(&self) -> Result<Option<u64>> {
        if self.state != CursorState::Valid {
            return Ok(None);
        }
        let (page_id, idx) = *self.stack.last().unwrap();
        let usable = self.buffer_pool.usable_size();
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page = guard.read();
        if idx >= page.cell_count() {
            return Ok(None);
        }
        Ok(Some(page.get_cell(idx, usable)?.rowid))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<bool> {
        self.restore_position()?;
        if self.state != CursorState::Valid {
            return Ok(false);
        }
        if self.skip_next == 1 {
            self.skip_next = 0;
            return Ok(true);
        }
        self.skip_next = 0;

        let (page_id, idx) = self.stack.pop().unwrap();
        let next_idx = idx + 1;
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page = guard.read();
        if next_idx < page.cell_count() {
            drop(page);
            drop(guard);
            self.stack.push((page_id, next_idx));
            return Ok(true);
        }
        drop(page);
        drop(guard);

        while let Some((parent_id, parent_idx)) = self.stack.pop() {
            let guard = self.buffer_pool.fetch_page(parent_id)?;
            let page = guard.read();
            let next_parent_idx = parent_idx + 1;
            if next_parent_idx < page.cell_count() {
                let cell = page.get_cell(next_parent_idx, self.buffer_pool.usable_size())?;
                drop(page);
                drop(guard);
                self.stack.push((parent_id, next_parent_idx));
                return self.descend_to_leftmost(cell.left_child);
            } else if next_parent_idx == page.cell_count() {
                let right_child = page.right_child();
                drop(page);
                drop(guard);
                self.stack.push((parent_id, next_parent_idx));
                return self.descend_to_leftmost(right_child);
            }
            drop(page);
            drop(guard);
        }

        self.state = CursorState::Invalid;
        Ok(false)
    }

    /// Step to the row preceding the current one, in rowid order.
    pub fn prev(&mut self) -> Result<bool> {
        self.restore_position()?;
        if self.state != CursorState::Valid {
            return Ok(false);
        }
        if self.skip_next == -1 {
            self.skip_next = 0;
            return Ok(true);
        }
        self.skip_next = 0;

        let (page_id, idx) = self.stack.pop().unwrap();
        if idx > 0 {
            self.stack.push((page_id, idx - 1));
            return Ok(true);
        }

        while let Some((parent_id, parent_idx)) = self.stack.pop() {
            if parent_idx > 0 {
                let guard = self.buffer_pool.fetch_page(parent_id)?;
                let page = guard.read();
                let usable = self.buffer_pool.usable_size();
                let prev_idx = parent_idx - 1;
                let child = if prev_idx < page.cell_count() {
                    page.get_cell(prev_idx, usable)?.left_child
                } else {
                    page.right_child()
                };
                drop(page);
                drop(guard);
                self.stack.push((parent_id, prev_idx));
                return self.descend_to_rightmost(child);
            }
        }

        self.state = CursorState::Invalid;
        Ok(false)
    }

    fn descend_to_leftmost(&mut self, start: PageId) -> Result<bool> {
        let mut current = start;
        loop {
            let guard = self.buffer_pool.fetch_page(current)?;
            let page = guard.read();
            if page.is_leaf() {
                if page.cell_count() > 0 {
                    self.stack.push((current, 0));
                    self.state = CursorState::Valid;
                    return Ok(true);
                }
                self.state = CursorState::Invalid;
                return Ok(false);
            }
            let usable = self.buffer_pool.usable_size();
            if page.cell_count() > 0 {
                let child = page.get_cell(0, usable)?.left_child;
                self.stack.push((current, 0));
                drop(page);
                drop(guard);
                current = child;
            } else {
                let child = page.right_child();
                drop(page);
                drop(guard);
                current = child;
            }
        }
    }

    fn descend_to_rightmost(&mut self, start: PageId) -> Result<bool> {
        let mut current = start;
        loop {
            let guard = self.buffer_pool.fetch_page(current)?;
            let page = guard.read();
            let count = page.cell_count();
            if page.is_leaf() {
                if count > 0 {
                    self.stack.push((current, count - 1));
                    self.state = CursorState::Valid;
                    return Ok(true);
                }
                self.state = CursorState::Invalid;
                return Ok(false);
            }
            let right_child = page.right_child();
            self.stack.push((current, count));
            drop(page);
            drop(guard);
            current = right_child;
        }
    }

    fn seek_to_rowid(&mut self, root_page: PageId, rowid: u64) -> Result<()> {
        let mut current = root_page;
        loop {
            let guard = self.buffer_pool.fetch_page(current)?;
            let page = guard.read();
            let usable = self.buffer_pool.usable_size();

            if page.is_leaf() {
                let count = page.cell_count();
                for i in 0..count {
                    let cell = page.get_cell(i, usable)?;
                    if cell.rowid >= rowid {
                        self.stack.push((current, i));
                        self.state = CursorState::Valid;
                        return Ok(());
                    }
                }
                self.state = CursorState::Invalid;
                return Ok(());
            }

            let child = page.find_child_by_rowid(rowid, usable)?;
            let count = page.cell_count();
            let mut pos = count;
            for i in 0..count {
                let cell = page.get_cell(i, usable)?;
                if rowid <= cell.rowid {
                    pos = i;
                    break;
                }
            }
            self.stack.push((current, pos));
            drop(page);
            drop(guard);
            current = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::BTree;
    use crate::buffer::BufferPoolImpl;
    use crate::storage::DiskManagerImpl;
    use tempfile::tempdir;

    fn populated(count: u64) -> (Arc<BufferPoolImpl>, Arc<dyn DiskManager>, PageId, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManagerImpl::open(&dir.path().join("t.db"), false).unwrap());
        let pool = Arc::new(BufferPoolImpl::new(dm.clone(), 100));
        let mut btree = BTree::new(pool.clone(), dm.clone()).unwrap();
        for i in 0..count {
            btree.put(i, format!("v{}", i).as_bytes()).unwrap();
        }
        (pool, dm as Arc<dyn DiskManager>, btree.root_page(), dir)
    }

    #[test]
    fn test_cursor_visits_rows_in_order() {
        let (pool, disk, root, _dir) = populated(50);
        let mut cursor = Cursor::new(pool, disk, root).unwrap();
        let mut seen = Vec::new();
        while let Some((rowid, _)) = cursor.current().unwrap() {
            seen.push(rowid);
            if !cursor.next().unwrap() {
                break;
            }
        }
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_cursor_seek_lands_on_or_after_rowid() {
        let (pool, disk, root, _dir) = populated(50);
        let mut cursor = Cursor::seek(pool, disk, root, 25).unwrap();
        let (rowid, _) = cursor.current().unwrap().unwrap();
        assert_eq!(rowid, 25);
    }

    #[test]
    fn test_cursor_on_empty_tree_is_invalid() {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManagerImpl::open(&dir.path().join("t.db"), false).unwrap());
        let pool = Arc::new(BufferPoolImpl::new(dm.clone(), 10));
        let mut cursor = Cursor::new(pool, dm as Arc<dyn DiskManager>, PageId::INVALID).unwrap();
        assert!(!cursor.is_valid());
        assert!(cursor.current().unwrap().is_none());
    }

    #[test]
    fn test_cursor_prev_walks_rows_backward() {
        let (pool, disk, root, _dir) = populated(50);
        let mut cursor = Cursor::new(pool, disk, root).unwrap();
        assert!(cursor.last().unwrap());
        let mut seen = Vec::new();
        loop {
            let (rowid, _) = cursor.current().unwrap().unwrap();
            seen.push(rowid);
            if !cursor.prev().unwrap() {
                break;
            }
        }
        assert_eq!(seen, (0..50).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_cursor_first_and_last_bracket_the_tree() {
        let (pool, disk, root, _dir) = populated(30);
        let mut cursor = Cursor::new(pool, disk, root).unwrap();
        assert!(cursor.first().unwrap());
        assert_eq!(cursor.current().unwrap().unwrap().0, 0);
        assert!(cursor.last().unwrap());
        assert_eq!(cursor.current().unwrap().unwrap().0, 29);
    }

    #[test]
    fn test_save_restore_survives_when_the_row_is_untouched() {
        let (pool, disk, root, _dir) = populated(50);
        let mut cursor = Cursor::seek(pool, disk, root, 20).unwrap();
        cursor.save_position().unwrap();
        assert!(!cursor.is_valid());
        let (rowid, _) = cursor.current().unwrap().unwrap();
        assert_eq!(rowid, 20);
        assert!(!cursor.has_moved());
    }

    #[test]
    fn test_save_restore_after_row_deleted_skips_the_pending_next() {
        let (pool, disk, root, _dir) = populated(50);
        let mut cursor = Cursor::seek(pool.clone(), disk.clone(), root, 20).unwrap();
        cursor.save_position().unwrap();

        let mut btree = BTree::new(pool, disk).unwrap();
        btree.delete(20).unwrap();

        // The caller was mid-iteration and asks to move past the saved row;
        // the re-seek already lands one row past it, so this `next()` must
        // not advance a second time.
        assert!(cursor.next().unwrap());
        assert!(cursor.has_moved());
        let (rowid, _) = cursor.current().unwrap().unwrap();
        assert_eq!(rowid, 21);

        assert!(cursor.next().unwrap());
        let (rowid, _) = cursor.current().unwrap().unwrap();
        assert_eq!(rowid, 22);
    }
}
