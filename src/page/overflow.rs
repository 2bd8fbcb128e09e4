//! Overflow chains: payloads (or index keys) too large to fit locally spill
//! into a linked chain of dedicated pages, each carrying a 4-byte
//! next-pointer followed by `usable-4` bytes of payload.
//!
//! Overflow pages bypass the buffer pool and go straight through
//! `DiskManager` — unlike B-tree pages they are never binary-searched or
//! re-balanced, only ever walked start-to-end, so caching them gains little
//! and this keeps the buffer pool's page type to exactly `SlottedPage`. A
//! real engine applies this same "direct from file" shortcut only to
//! reads when the page isn't dirty and there's no WAL in play; this build
//! always does it in both directions, which is simpler and still correct
//! because the chain has no concurrent readers/writers within one mutation.

use crate::error::Result;
use crate::page::Cell;
use crate::storage::pointer_map::PtrMapType;
use crate::storage::DiskManager;
use crate::types::PageId;

const LINK_SIZE: usize = 4;

/// Split `payload` into a local prefix (at most `max_local` bytes, per the
/// split-point formula) and, if anything remains, write the remainder to a
/// freshly allocated overflow chain. Returns `(local, total_size, first_overflow_page)`.
pub fn split_and_store(
    disk: &dyn DiskManager,
    owner: PageId,
    min_local: usize,
    max_local: usize,
    usable: usize,
    payload: &[u8],
) -> Result<(Vec<u8>, u64, PageId)> {
    let local_size = crate::types::local_payload_size(payload.len(), min_local, max_local, usable);
    let local = payload[..local_size].to_vec();
    let overflow_page = if payload.len() > local_size {
        write_chain(disk, owner, usable, &payload[local_size..])?
    } else {
        PageId::INVALID
    };
    Ok((local, payload.len() as u64, overflow_page))
}

/// Allocate and populate an overflow chain holding `bytes`. `bytes` must be
/// non-empty. `owner` is the page whose cell points at this chain (recorded
/// in the pointer-map, when auto-vacuum is on, as the head page's parent);
/// each later page in the chain allocates near its predecessor to keep the
/// chain clustered on disk.
pub fn write_chain(disk: &dyn DiskManager, owner: PageId, usable: usize, bytes: &[u8]) -> Result<PageId> {
    let chunk = usable - LINK_SIZE;
    let n_pages = (bytes.len() + chunk - 1) / chunk;
    let mut pages = Vec::with_capacity(n_pages);
    let mut nearby = Some(owner);
    for _ in 0..n_pages {
        let pid = disk.allocate_page_near(nearby)?;
        nearby = Some(pid);
        pages.push(pid);
    }
    for (i, &pid) in pages.iter().enumerate() {
        let start = i * chunk;
        let end = (start + chunk).min(bytes.len());
        let next = if i + 1 < pages.len() { pages[i + 1].value() } else { 0 };

        let mut buf = vec![0u8; usable];
        buf[0..LINK_SIZE].copy_from_slice(&next.to_be_bytes());
        buf[LINK_SIZE..LINK_SIZE + (end - start)].copy_from_slice(&bytes[start..end]);
        disk.write_page(pid, &buf)?;

        if i == 0 {
            disk.ptrmap_set(pid, PtrMapType::OverflowHead, owner)?;
        } else {
            disk.ptrmap_set(pid, PtrMapType::OverflowContinuation, pages[i - 1])?;
        }
    }
    Ok(pages[0])
}

/// Release every page in the chain back to the free-list.
pub fn free_chain(disk: &dyn DiskManager, first: PageId) -> Result<()> {
    let mut cur = first;
    while cur.is_valid() {
        let buf = disk.read_page(cur)?;
        let next = u32::from_be_bytes(buf[0..LINK_SIZE].try_into().unwrap());
        disk.deallocate_page(cur)?;
        cur = if next == 0 { PageId::INVALID } else { PageId::new(next) };
    }
    Ok(())
}

/// Read the `amt` bytes starting at logical `offset` within a cell's full
/// payload (local bytes followed by the overflow chain).
pub fn read_range(disk: &dyn DiskManager, cell: &Cell, usable: usize, offset: usize, amt: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(amt);
    let local_len = cell.local.len();

    if offset < local_len {
        let end = (offset + amt).min(local_len);
        out.extend_from_slice(&cell.local[offset..end]);
    }
    let remaining = (offset + amt).saturating_sub(local_len.max(offset));
    if remaining == 0 || !cell.has_overflow() {
        return Ok(out);
    }

    let chunk = usable - LINK_SIZE;
    let overflow_offset = offset.saturating_sub(local_len);
    let skip_pages = overflow_offset / chunk;
    let mut cur = cell.overflow_page;
    for _ in 0..skip_pages {
        if !cur.is_valid() {
            return Ok(out);
        }
        let buf = disk.read_page(cur)?;
        let next = u32::from_be_bytes(buf[0..LINK_SIZE].try_into().unwrap());
        cur = if next == 0 { PageId::INVALID } else { PageId::new(next) };
    }

    let mut pos_in_page = overflow_offset % chunk;
    while out.len() < amt && cur.is_valid() {
        let buf = disk.read_page(cur)?;
        let next = u32::from_be_bytes(buf[0..LINK_SIZE].try_into().unwrap());
        let take = (chunk - pos_in_page).min(amt - out.len());
        out.extend_from_slice(&buf[LINK_SIZE + pos_in_page..LINK_SIZE + pos_in_page + take]);
        pos_in_page = 0;
        cur = if next == 0 { PageId::INVALID } else { PageId::new(next) };
    }
    Ok(out)
}

/// Materialize a cell's full local+overflow payload (used for index-key
/// comparisons that straddle the local/overflow boundary, and by callers
/// that just want the whole value).
pub fn materialize(disk: &dyn DiskManager, cell: &Cell, usable: usize) -> Result<Vec<u8>> {
    if !cell.has_overflow() {
        return Ok(cell.local.clone());
    }
    read_range(disk, cell, usable, 0, cell.total_size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManagerImpl;
    use tempfile::tempdir;

    #[test]
    fn test_overflow_roundtrip_small_usable() {
        let dir = tempdir().unwrap();
        let dm = DiskManagerImpl::open(&dir.path().join("t.db"), false).unwrap();
        let usable = 64;
        let payload: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();

        let first = write_chain(&dm, PageId::new(1), usable, &payload).unwrap();
        assert!(first.is_valid());

        let cell = Cell::new_table_leaf(1, Vec::new(), payload.len() as u64, first);
        let read_back = materialize(&dm, &cell, usable).unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn test_overflow_partial_reads_match_full_read() {
        let dir = tempdir().unwrap();
        let dm = DiskManagerImpl::open(&dir.path().join("t.db"), false).unwrap();
        let usable = 32;
        let payload: Vec<u8> = (0..200u32).map(|i| (i % 200) as u8).collect();
        let first = write_chain(&dm, PageId::new(1), usable, &payload).unwrap();
        let cell = Cell::new_table_leaf(1, Vec::new(), payload.len() as u64, first);

        let mut reconstructed = Vec::new();
        let mut off = 0;
        while off < payload.len() {
            let amt = 17.min(payload.len() - off);
            reconstructed.extend(read_range(&dm, &cell, usable, off, amt).unwrap());
            off += amt;
        }
        assert_eq!(reconstructed, payload);
    }
}
