//! Disk manager: reads and writes fixed-size pages to the database file and
//! owns the on-disk free-list.
//!
//! Page 0 holds the database header (see `file_header` for why it gets its
//! own page rather than sharing page 1). Pages `1..page_count` are ordinary
//! B-tree, overflow, free-list, or pointer-map pages, one `PAGE_SIZE` slot
//! each.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::freelist::{self, RawPageIo};
use crate::storage::pointer_map::{self, PtrMapEntry, PtrMapType};
use crate::storage::FileHeader;
use crate::types::{PageId, PAGE_SIZE};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Before-images captured for the active write transaction, keyed by page
/// number. A page's first write each transaction records its prior bytes
/// here (or `None` if the page didn't exist yet); `rollback_txn_journal`
/// replays them in reverse of how the pager's journal would.
struct Journal {
    header_before: FileHeader,
    pages_before: HashMap<u32, Option<Vec<u8>>>,
}

/// Disk I/O abstraction the rest of the engine consumes; lets tests swap in
/// a mock and keeps the buffer pool decoupled from file-system details.
pub trait DiskManager: Send + Sync {
    fn read_page(&self, page_id: PageId) -> Result<PageBuf>;
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;
    fn allocate_page(&self) -> Result<PageId>;
    /// Like `allocate_page`, but prefers a page close to `nearby` (Manhattan
    /// distance on page numbers) when one is free, to keep chains of
    /// related pages clustered on disk.
    fn allocate_page_near(&self, nearby: Option<PageId>) -> Result<PageId>;
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;
    fn sync(&self) -> Result<()>;
    fn header(&self) -> FileHeader;
    fn set_root_page(&self, page_id: PageId, height: u32) -> Result<()>;
    fn bump_change_counter(&self) -> Result<()>;

    /// Read caller-managed metadata slot `i` (1..=15; 0 is reserved/unused).
    fn get_meta(&self, i: usize) -> u32;
    /// Write caller-managed metadata slot `i` (1..=15) and persist the header.
    fn set_meta(&self, i: usize, value: u32) -> Result<()>;

    /// Whether auto-vacuum (and its pointer-map maintenance) is active.
    fn auto_vacuum_enabled(&self) -> bool;
    /// Turn auto-vacuum on or off. Only meaningful before any pages besides
    /// the header exist; callers enable it right after creating a fresh file.
    fn set_auto_vacuum(&self, enabled: bool) -> Result<()>;
    /// Record (or overwrite) `page`'s pointer-map entry. No-op if auto-vacuum
    /// is disabled.
    fn ptrmap_set(&self, page: PageId, kind: PtrMapType, parent: PageId) -> Result<()>;
    /// Look up `page`'s pointer-map entry, if any (and if auto-vacuum is on).
    fn ptrmap_get(&self, page: PageId) -> Result<Option<PtrMapEntry>>;

    /// Begin journaling before-images of every page this transaction
    /// writes, so `rollback_txn_journal` can restore them.
    fn begin_txn_journal(&self) -> Result<()>;
    /// Discard the active journal; the transaction committed successfully.
    fn commit_txn_journal(&self);
    /// Write back every journaled before-image and restore the header to
    /// its pre-transaction state.
    fn rollback_txn_journal(&self) -> Result<()>;
}

/// File-backed disk manager.
pub struct DiskManagerImpl {
    file: RwLock<File>,
    header: RwLock<FileHeader>,
    sync_on_write: bool,
    journal: Mutex<Option<Journal>>,
}

impl DiskManagerImpl {
    pub fn open(path: &Path, sync_on_write: bool) -> Result<Self> {
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header = if exists && file.metadata()?.len() >= PAGE_SIZE as u64 {
            let mut file_ref = &file;
            let mut buf = vec![0u8; PAGE_SIZE];
            file_ref.seek(SeekFrom::Start(0))?;
            file_ref.read_exact(&mut buf)?;
            let header = match FileHeader::read(&buf) {
                Ok(h) => h,
                Err(e) => {
                    log::error!("{}: failed to read database header: {}", path.display(), e);
                    return Err(e);
                }
            };
            log::debug!(
                "{}: opened existing database, {} pages, root={:?}",
                path.display(),
                header.page_count,
                header.root_page
            );
            header
        } else {
            let header = FileHeader::new();
            let mut buf = vec![0u8; PAGE_SIZE];
            header.write(&mut buf);

            let mut file_ref = &file;
            file_ref.seek(SeekFrom::Start(0))?;
            file_ref.write_all(&buf)?;
            file_ref.sync_all()?;

            log::debug!("{}: initialized new database", path.display());
            header
        };

        Ok(Self {
            file: RwLock::new(file),
            header: RwLock::new(header),
            sync_on_write,
            journal: Mutex::new(None),
        })
    }

    /// Record `page_id`'s current on-disk bytes in the active journal, if
    /// one is open and this is the first time this transaction touches the
    /// page. Called from every raw write path so free-list and pointer-map
    /// writes are journaled along with ordinary B-tree pages.
    fn capture_before_image(&self, page_id: PageId) -> Result<()> {
        let mut guard = self.journal.lock();
        let journal = match guard.as_mut() {
            Some(j) => j,
            None => return Ok(()),
        };
        if journal.pages_before.contains_key(&page_id.value()) {
            return Ok(());
        }
        let offset = Self::page_offset(page_id);
        let mut file = self.file.write();
        let before = if file.metadata()?.len() >= offset + PAGE_SIZE as u64 {
            let mut buf = vec![0u8; PAGE_SIZE];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
            Some(buf)
        } else {
            None
        };
        journal.pages_before.insert(page_id.value(), before);
        Ok(())
    }

    fn flush_header(&self) -> Result<()> {
        let header = self.header.read();
        let mut buf = vec![0u8; PAGE_SIZE];
        header.write(&mut buf);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;

        if self.sync_on_write {
            file.sync_data()?;
        }
        Ok(())
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.value() as u64 * PAGE_SIZE as u64
    }

    fn extend_file_to_contain(&self, page_id: PageId) -> Result<()> {
        let needed_len = Self::page_offset(page_id) + PAGE_SIZE as u64;
        let mut file = self.file.write();
        if file.metadata()?.len() < needed_len {
            file.set_len(needed_len)?;
        }
        Ok(())
    }
}

impl RawPageIo for DiskManagerImpl {
    fn read_raw(&self, id: PageId) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut file = self.file.write();
        let offset = Self::page_offset(id);
        if file.metadata()?.len() < offset + PAGE_SIZE as u64 {
            return Ok(buf);
        }
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_raw(&self, id: PageId, data: &[u8]) -> Result<()> {
        self.capture_before_image(id)?;
        drop(self.extend_file_to_contain(id));
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(Self::page_offset(id)))?;
        file.write_all(data)?;
        Ok(())
    }

    fn usable_size(&self) -> usize {
        PAGE_SIZE
    }
}

impl DiskManager for DiskManagerImpl {
    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        if page_id == PageId::HEADER {
            return Err(StorageError::invalid_operation("page 0 is the header page"));
        }
        let header = self.header.read();
        if page_id.value() >= header.page_count {
            return Err(StorageError::PageNotFound(page_id));
        }
        drop(header);

        let mut buf = vec![0u8; PAGE_SIZE];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(Self::page_offset(page_id)))?;
        file.read_exact(&mut buf)?;
        Ok(PageBuf::from_bytes(&buf))
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if page_id == PageId::HEADER {
            return Err(StorageError::invalid_operation("page 0 is the header page"));
        }
        if data.len() != PAGE_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "page data must be {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }

        self.capture_before_image(page_id)?;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(Self::page_offset(page_id)))?;
        file.write_all(data)?;
        if self.sync_on_write {
            file.sync_data()?;
        }
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        self.allocate_page_near(None)
    }

    fn allocate_page_near(&self, nearby: Option<PageId>) -> Result<PageId> {
        let mut header = self.header.write();
        let page_id = match freelist::allocate_near(&mut header, self, nearby)? {
            Some(id) => id,
            None => header.allocate_at_eof(),
        };
        drop(header);
        self.extend_file_to_contain(page_id)?;
        self.flush_header()?;
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if page_id == PageId::HEADER {
            return Err(StorageError::invalid_operation("cannot free the header page"));
        }
        let mut header = self.header.write();
        freelist::free(&mut header, self, page_id)?;
        let auto_vacuum = header.auto_vacuum;
        drop(header);
        if auto_vacuum {
            pointer_map::set_entry(
                self,
                page_id,
                PtrMapEntry { kind: PtrMapType::FreePage, parent: PageId::INVALID },
            )?;
        }
        self.flush_header()
    }

    fn sync(&self) -> Result<()> {
        self.flush_header()?;
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn header(&self) -> FileHeader {
        *self.header.read()
    }

    fn set_root_page(&self, page_id: PageId, height: u32) -> Result<()> {
        {
            let mut header = self.header.write();
            header.root_page = page_id;
            header.tree_height = height;
        }
        self.flush_header()
    }

    fn get_meta(&self, i: usize) -> u32 {
        self.header.read().meta.get(i).copied().unwrap_or(0)
    }

    fn set_meta(&self, i: usize, value: u32) -> Result<()> {
        {
            let mut header = self.header.write();
            if let Some(slot) = header.meta.get_mut(i) {
                *slot = value;
            }
        }
        self.flush_header()
    }

    fn bump_change_counter(&self) -> Result<()> {
        {
            let mut header = self.header.write();
            header.change_counter = header.change_counter.wrapping_add(1);
        }
        self.flush_header()
    }

    fn auto_vacuum_enabled(&self) -> bool {
        self.header.read().auto_vacuum
    }

    fn set_auto_vacuum(&self, enabled: bool) -> Result<()> {
        {
            let mut header = self.header.write();
            header.auto_vacuum = enabled;
            header.incremental_vacuum = header.incremental_vacuum && enabled;
        }
        self.flush_header()
    }

    fn ptrmap_set(&self, page: PageId, kind: PtrMapType, parent: PageId) -> Result<()> {
        if !self.auto_vacuum_enabled() {
            return Ok(());
        }
        pointer_map::set_entry(self, page, PtrMapEntry { kind, parent })
    }

    fn ptrmap_get(&self, page: PageId) -> Result<Option<PtrMapEntry>> {
        if !self.auto_vacuum_enabled() {
            return Ok(None);
        }
        pointer_map::get_entry(self, page)
    }

    fn begin_txn_journal(&self) -> Result<()> {
        let header_before = *self.header.read();
        *self.journal.lock() = Some(Journal { header_before, pages_before: HashMap::new() });
        Ok(())
    }

    fn commit_txn_journal(&self) {
        *self.journal.lock() = None;
    }

    fn rollback_txn_journal(&self) -> Result<()> {
        let journal = match self.journal.lock().take() {
            Some(j) => j,
            None => return Ok(()),
        };
        for (page_num, before) in &journal.pages_before {
            // A page with no before-image didn't exist prior to this
            // transaction; shrinking the header's page count below.
            if let Some(bytes) = before {
                let page_id = PageId::new(*page_num);
                let offset = Self::page_offset(page_id);
                let mut file = self.file.write();
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(bytes)?;
            }
        }
        *self.header.write() = journal.header_before;
        self.flush_header()?;
        let file = self.file.write();
        if self.sync_on_write {
            file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_new_database() -> Result<()> {
        let dir = tempdir().unwrap();
        let dm = DiskManagerImpl::open(&dir.path().join("test.db"), false)?;
        let header = dm.header();
        assert_eq!(header.page_count, 1);
        assert!(!header.root_page.is_valid());
        Ok(())
    }

    #[test]
    fn test_allocate_and_write_page() -> Result<()> {
        let dir = tempdir().unwrap();
        let dm = DiskManagerImpl::open(&dir.path().join("test.db"), false)?;

        let page_id = dm.allocate_page()?;
        assert_eq!(page_id, PageId::new(1));

        let mut data = vec![0u8; PAGE_SIZE];
        data[0..5].copy_from_slice(b"hello");
        dm.write_page(page_id, &data)?;

        let read_data = dm.read_page(page_id)?;
        assert_eq!(&read_data[0..5], b"hello");
        Ok(())
    }

    #[test]
    fn test_reopen_database_preserves_root() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let dm = DiskManagerImpl::open(&path, true)?;
            let page_id = dm.allocate_page()?;
            let mut data = vec![0u8; PAGE_SIZE];
            data[0..4].copy_from_slice(b"test");
            dm.write_page(page_id, &data)?;
            dm.set_root_page(page_id, 1)?;
        }
        {
            let dm = DiskManagerImpl::open(&path, false)?;
            let header = dm.header();
            assert_eq!(header.page_count, 2);
            assert_eq!(header.root_page, PageId::new(1));
            let data = dm.read_page(PageId::new(1))?;
            assert_eq!(&data[0..4], b"test");
        }
        Ok(())
    }

    #[test]
    fn test_free_list_reuse() -> Result<()> {
        let dir = tempdir().unwrap();
        let dm = DiskManagerImpl::open(&dir.path().join("test.db"), false)?;

        let p1 = dm.allocate_page()?;
        let p2 = dm.allocate_page()?;
        let _p3 = dm.allocate_page()?;
        assert_eq!(p1, PageId::new(1));
        assert_eq!(p2, PageId::new(2));

        dm.deallocate_page(p2)?;
        let p4 = dm.allocate_page()?;
        assert_eq!(p4, PageId::new(2));
        Ok(())
    }
}
