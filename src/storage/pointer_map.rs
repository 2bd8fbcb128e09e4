//! Pointer-map: auto-vacuum-only side structure mapping each tracked page
//! to `{type, parent}`, so a page can be relocated (swapped with one nearer
//! the end of the file) without doing a full-tree scan to fix up whoever
//! points at it.
//!
//! One pointer-map page precedes every `floor(usable/5) + 1` data pages;
//! each page holds 5-byte entries (`type(1) | parent(4)`) for the data
//! pages that follow it, until the next pointer-map page.

use crate::error::Result;
use crate::storage::freelist::RawPageIo;
use crate::types::PageId;

/// Kind of relationship a pointer-map entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrMapType {
    RootPage = 1,
    FreePage = 2,
    BTreeChild = 3,
    OverflowHead = 4,
    OverflowContinuation = 5,
}

impl PtrMapType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::RootPage),
            2 => Some(Self::FreePage),
            3 => Some(Self::BTreeChild),
            4 => Some(Self::OverflowHead),
            5 => Some(Self::OverflowContinuation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PtrMapEntry {
    pub kind: PtrMapType,
    pub parent: PageId,
}

const ENTRY_SIZE: usize = 5;

/// How many data pages one pointer-map page describes.
pub fn entries_per_map_page(usable: usize) -> usize {
    usable / ENTRY_SIZE
}

/// Whether `page` is itself a pointer-map page (page 1's header page, `0`,
/// is never a data page and never tracked).
pub fn is_ptrmap_page(page: PageId, usable: usize) -> bool {
    let per_page = entries_per_map_page(usable) as u32;
    let cycle = per_page + 1;
    page.value() >= 1 && (page.value() - 1) % cycle == 0
}

/// The pointer-map page that would hold `page`'s entry.
pub fn ptrmap_page_for(page: PageId, usable: usize) -> PageId {
    let per_page = entries_per_map_page(usable) as u32;
    let cycle = per_page + 1;
    let offset_in_cycle = (page.value() - 1) % cycle;
    PageId::new(page.value() - offset_in_cycle)
}

pub fn get_entry(io: &dyn RawPageIo, page: PageId) -> Result<Option<PtrMapEntry>> {
    let usable = io.usable_size();
    if is_ptrmap_page(page, usable) {
        return Ok(None);
    }
    let map_page = ptrmap_page_for(page, usable);
    let per_page = entries_per_map_page(usable) as u32;
    let index = (page.value() - map_page.value() - 1) as usize;
    if index >= per_page as usize {
        return Ok(None);
    }
    let bytes = io.read_raw(map_page)?;
    let off = index * ENTRY_SIZE;
    if off + ENTRY_SIZE > bytes.len() {
        return Ok(None);
    }
    let kind = match PtrMapType::from_byte(bytes[off]) {
        Some(k) => k,
        None => return Ok(None),
    };
    let parent = PageId::new(u32::from_be_bytes(bytes[off + 1..off + 5].try_into().unwrap()));
    Ok(Some(PtrMapEntry { kind, parent }))
}

pub fn set_entry(io: &dyn RawPageIo, page: PageId, entry: PtrMapEntry) -> Result<()> {
    let usable = io.usable_size();
    let map_page = ptrmap_page_for(page, usable);
    let per_page = entries_per_map_page(usable) as u32;
    let index = (page.value() - map_page.value() - 1) as usize;
    assert!(index < per_page as usize, "page does not map onto this ptrmap page");

    let mut bytes = io.read_raw(map_page)?;
    if bytes.len() < usable {
        bytes.resize(usable, 0);
    }
    let off = index * ENTRY_SIZE;
    bytes[off] = entry.kind as u8;
    bytes[off + 1..off + 5].copy_from_slice(&entry.parent.value().to_be_bytes());
    io.write_raw(map_page, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct MemIo {
        pages: Mutex<HashMap<u32, Vec<u8>>>,
        usable: usize,
    }
    impl RawPageIo for MemIo {
        fn read_raw(&self, id: PageId) -> Result<Vec<u8>> {
            Ok(self
                .pages
                .lock()
                .get(&id.value())
                .cloned()
                .unwrap_or_else(|| vec![0u8; self.usable]))
        }
        fn write_raw(&self, id: PageId, data: &[u8]) -> Result<()> {
            self.pages.lock().insert(id.value(), data.to_vec());
            Ok(())
        }
        fn usable_size(&self) -> usize {
            self.usable
        }
    }

    #[test]
    fn test_ptrmap_page_location_and_roundtrip() {
        let io = MemIo { pages: Mutex::new(HashMap::new()), usable: 4096 };
        // Page 2 is the first data page after ptrmap page 1.
        assert!(is_ptrmap_page(PageId::new(1), 4096));
        assert!(!is_ptrmap_page(PageId::new(2), 4096));
        assert_eq!(ptrmap_page_for(PageId::new(2), 4096), PageId::new(1));

        set_entry(
            &io,
            PageId::new(2),
            PtrMapEntry { kind: PtrMapType::RootPage, parent: PageId::new(0) },
        )
        .unwrap();

        let entry = get_entry(&io, PageId::new(2)).unwrap().unwrap();
        assert_eq!(entry.kind, PtrMapType::RootPage);
    }
}
