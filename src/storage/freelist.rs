//! File-wide free-list: a linked list of trunk pages, each holding a capped
//! array of free leaf page numbers.
//!
//! Trunk page layout: `nextTrunk(4) | leafCount(4) | leaf[0..leafCount](4 each)`.
//! A free-list *leaf* page carries no payload of its own — it is simply a
//! page number recorded in a trunk's array, the trunk itself is the only
//! structure read back. Plain `allocate` always takes the head trunk's last
//! leaf, or the trunk page itself once its leaf array is empty; `allocate_near`
//! walks the whole chain instead, picking whichever candidate sits closest
//! (by `PageId::distance`) to a caller-supplied page number, used by overflow
//! chains and auto-vacuum relocation to keep related pages clustered.

use crate::error::Result;
use crate::storage::FileHeader;
use crate::types::PageId;

/// Trunk capacity cap. The theoretical maximum entries a trunk could hold
/// is `usable/4 - 2` (after its own 8-byte header); this crate retains the
/// smaller, compatibility-motivated cap named in DESIGN.md's open-question
/// log instead.
pub fn trunk_capacity(usable: usize) -> usize {
    usable / 4 - 8
}

/// Minimal page I/O surface the free-list needs: raw, unparsed page bytes.
/// Implemented by `DiskManagerImpl` so the free-list never depends on the
/// B-tree page codec (a free-list trunk is not itself a B-tree page).
pub trait RawPageIo: Send + Sync {
    fn read_raw(&self, id: PageId) -> Result<Vec<u8>>;
    fn write_raw(&self, id: PageId, data: &[u8]) -> Result<()>;
    fn usable_size(&self) -> usize;
}

struct Trunk {
    next: PageId,
    leaves: Vec<PageId>,
}

impl Trunk {
    fn decode(bytes: &[u8]) -> Self {
        let next = PageId::new(u32::from_be_bytes(bytes[0..4].try_into().unwrap()));
        let count = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let mut leaves = Vec::with_capacity(count);
        for i in 0..count {
            let off = 8 + i * 4;
            leaves.push(PageId::new(u32::from_be_bytes(
                bytes[off..off + 4].try_into().unwrap(),
            )));
        }
        Self { next, leaves }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        buf[0..4].copy_from_slice(&self.next.value().to_be_bytes());
        buf[4..8].copy_from_slice(&(self.leaves.len() as u32).to_be_bytes());
        for (i, leaf) in self.leaves.iter().enumerate() {
            let off = 8 + i * 4;
            buf[off..off + 4].copy_from_slice(&leaf.value().to_be_bytes());
        }
    }
}

/// Pop a page off the free-list, or `None` if it is empty (the caller then
/// extends the file).
pub fn allocate(header: &mut FileHeader, io: &dyn RawPageIo) -> Result<Option<PageId>> {
    if !header.first_freelist_trunk.is_valid() {
        return Ok(None);
    }

    let trunk_id = header.first_freelist_trunk;
    let bytes = io.read_raw(trunk_id)?;
    let mut trunk = Trunk::decode(&bytes);

    if let Some(leaf) = trunk.leaves.pop() {
        let mut buf = vec![0u8; bytes.len()];
        trunk.encode(&mut buf);
        io.write_raw(trunk_id, &buf)?;
        header.free_page_count -= 1;
        return Ok(Some(leaf));
    }

    // Leaf array empty: the trunk page itself becomes the allocated page.
    header.first_freelist_trunk = trunk.next;
    header.free_page_count -= 1;
    Ok(Some(trunk_id))
}

/// Pop the free-list page nearest `nearby`, walking the whole trunk chain
/// rather than only the head trunk. Falls back to plain `allocate` when
/// `nearby` is `None`.
pub fn allocate_near(
    header: &mut FileHeader,
    io: &dyn RawPageIo,
    nearby: Option<PageId>,
) -> Result<Option<PageId>> {
    let target = match nearby {
        Some(target) => target,
        None => return allocate(header, io),
    };
    if !header.first_freelist_trunk.is_valid() {
        return Ok(None);
    }

    // `leaf_index == None` means the candidate is the trunk page itself,
    // handed out whole because its leaf array is empty.
    let mut best: Option<(PageId, PageId, Option<usize>, u32)> = None;
    let mut trunk_id = header.first_freelist_trunk;
    loop {
        let bytes = io.read_raw(trunk_id)?;
        let trunk = Trunk::decode(&bytes);

        if trunk.leaves.is_empty() {
            let dist = trunk_id.distance(target);
            if best.as_ref().map_or(true, |&(_, _, _, d)| dist < d) {
                best = Some((trunk_id, trunk_id, None, dist));
            }
        } else {
            for (i, &leaf) in trunk.leaves.iter().enumerate() {
                let dist = leaf.distance(target);
                if best.as_ref().map_or(true, |&(_, _, _, d)| dist < d) {
                    best = Some((leaf, trunk_id, Some(i), dist));
                }
            }
        }

        let next = trunk.next;
        if !next.is_valid() {
            break;
        }
        trunk_id = next;
    }

    let (chosen, owner_trunk, leaf_index, _) = match best {
        Some(b) => b,
        None => return Ok(None),
    };

    match leaf_index {
        Some(idx) => {
            let bytes = io.read_raw(owner_trunk)?;
            let mut trunk = Trunk::decode(&bytes);
            trunk.leaves.swap_remove(idx);
            let mut buf = vec![0u8; bytes.len()];
            trunk.encode(&mut buf);
            io.write_raw(owner_trunk, &buf)?;
        }
        None => unlink_trunk(header, io, owner_trunk)?,
    }
    header.free_page_count -= 1;
    Ok(Some(chosen))
}

/// Remove `trunk_id` from the trunk chain, relinking its predecessor (or the
/// header's head pointer) to whatever it pointed to next.
fn unlink_trunk(header: &mut FileHeader, io: &dyn RawPageIo, trunk_id: PageId) -> Result<()> {
    let bytes = io.read_raw(trunk_id)?;
    let trunk = Trunk::decode(&bytes);

    if header.first_freelist_trunk == trunk_id {
        header.first_freelist_trunk = trunk.next;
        return Ok(());
    }

    let mut cur = header.first_freelist_trunk;
    while cur.is_valid() {
        let cur_bytes = io.read_raw(cur)?;
        let mut cur_trunk = Trunk::decode(&cur_bytes);
        if cur_trunk.next == trunk_id {
            cur_trunk.next = trunk.next;
            let mut buf = vec![0u8; cur_bytes.len()];
            cur_trunk.encode(&mut buf);
            io.write_raw(cur, &buf)?;
            return Ok(());
        }
        cur = cur_trunk.next;
    }
    Ok(())
}

/// Return `page_id` to the free-list.
pub fn free(header: &mut FileHeader, io: &dyn RawPageIo, page_id: PageId) -> Result<()> {
    let cap = trunk_capacity(io.usable_size());

    if header.first_freelist_trunk.is_valid() {
        let trunk_id = header.first_freelist_trunk;
        let bytes = io.read_raw(trunk_id)?;
        let mut trunk = Trunk::decode(&bytes);
        if trunk.leaves.len() < cap {
            trunk.leaves.push(page_id);
            let mut buf = vec![0u8; bytes.len()];
            trunk.encode(&mut buf);
            io.write_raw(trunk_id, &buf)?;
            header.free_page_count += 1;
            return Ok(());
        }
    }

    // No room (or no trunk yet): the freed page becomes the new head trunk.
    let new_trunk = Trunk {
        next: header.first_freelist_trunk,
        leaves: Vec::new(),
    };
    let mut buf = vec![0u8; io.usable_size()];
    new_trunk.encode(&mut buf);
    io.write_raw(page_id, &buf)?;
    header.first_freelist_trunk = page_id;
    header.free_page_count += 1;
    Ok(())
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
    fn test_free_then_allocate_returns_same_page() {
        let io = MemIo {
            pages: Mutex::new(HashMap::new()),
            usable: 4096,
        };
        let mut header = FileHeader::new();

        assert_eq!(allocate(&mut header, &io).unwrap(), None);

        free(&mut header, &io, PageId::new(5)).unwrap();
        assert_eq!(header.free_page_count, 1);
        assert_eq!(header.first_freelist_trunk, PageId::new(5));

        let got = allocate(&mut header, &io).unwrap();
        assert_eq!(got, Some(PageId::new(5)));
        assert_eq!(header.free_page_count, 0);
        assert!(!header.first_freelist_trunk.is_valid());
    }

    #[test]
    fn test_multiple_frees_stay_in_one_trunk_until_capacity() {
        let io = MemIo {
            pages: Mutex::new(HashMap::new()),
            usable: 4096,
        };
        let mut header = FileHeader::new();

        free(&mut header, &io, PageId::new(10)).unwrap();
        free(&mut header, &io, PageId::new(20)).unwrap();
        free(&mut header, &io, PageId::new(30)).unwrap();

        assert_eq!(header.first_freelist_trunk, PageId::new(10));
        assert_eq!(header.free_page_count, 3);

        // Leaves pop LIFO from the head trunk.
        assert_eq!(allocate(&mut header, &io).unwrap(), Some(PageId::new(30)));
        assert_eq!(allocate(&mut header, &io).unwrap(), Some(PageId::new(20)));
        // Trunk's leaf array now empty: trunk page itself is handed out.
        assert_eq!(allocate(&mut header, &io).unwrap(), Some(PageId::new(10)));
        assert_eq!(allocate(&mut header, &io).unwrap(), None);
    }

    #[test]
    fn test_allocate_near_picks_closest_leaf_across_trunks() {
        let io = MemIo { pages: Mutex::new(HashMap::new()), usable: 4096 };
        let mut header = FileHeader::new();

        // Head trunk's own leaves are far from the target; a later trunk
        // holds a much closer one.
        free(&mut header, &io, PageId::new(500_000)).unwrap();
        free(&mut header, &io, PageId::new(600_000)).unwrap();
        for p in 900_000..(900_000 + trunk_capacity(4096) as u32) {
            free(&mut header, &io, PageId::new(p)).unwrap();
        }
        free(&mut header, &io, PageId::new(100)).unwrap();

        let got = allocate_near(&mut header, &io, Some(PageId::new(101))).unwrap();
        assert_eq!(got, Some(PageId::new(100)));
    }

    #[test]
    fn test_allocate_near_with_no_hint_behaves_like_allocate() {
        let io = MemIo { pages: Mutex::new(HashMap::new()), usable: 4096 };
        let mut header = FileHeader::new();
        free(&mut header, &io, PageId::new(7)).unwrap();

        assert_eq!(allocate_near(&mut header, &io, None).unwrap(), Some(PageId::new(7)));
    }

    #[test]
    fn test_allocate_near_can_claim_an_empty_trunk_page_itself() {
        let io = MemIo { pages: Mutex::new(HashMap::new()), usable: 4096 };
        let mut header = FileHeader::new();

        free(&mut header, &io, PageId::new(50)).unwrap();
        // Drain its one leaf so the trunk page itself is the only candidate.
        assert_eq!(allocate(&mut header, &io).unwrap(), Some(PageId::new(50)));

        free(&mut header, &io, PageId::new(9000)).unwrap();
        let got = allocate_near(&mut header, &io, Some(PageId::new(9001))).unwrap();
        assert_eq!(got, Some(PageId::new(9000)));
        assert!(!header.first_freelist_trunk.is_valid());
    }
}
