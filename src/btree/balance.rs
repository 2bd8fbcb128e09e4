//! Page-level balancing: splitting an overfull page on insert, and
//! repacking up to three siblings around an underfull page on delete.
//!
//! The delete-side routine gathers the underfull child plus its immediate
//! left and/or right sibling, flattens their cells (synthesizing the
//! parent's separator cells back into the sequence for interior pages so
//! the flattened list reads as one contiguous run of children), then
//! first-fit repacks that run into as few pages as will hold it. That
//! covers the two shapes `tree::rebalance_child` needs: a 2-sibling
//! redistribution at the tree's edges and a 3-sibling one everywhere else.

use crate::error::Result;
use crate::page::{Cell, SlottedPage, INTERIOR_HEADER_SIZE, LEAF_HEADER_SIZE};
use crate::types::PageId;

/// A page counts as underfull once more than two-thirds of its usable space
/// sits empty — not merely when it has emptied out completely.
pub fn is_underfull(page: &SlottedPage, usable: usize) -> bool {
    page.total_free_space(usable) * 3 > usable * 2
}

/// Split `page` (already containing the inserted cell, so it is overfull)
/// roughly in half. Returns the new right sibling's page id and the
/// separator rowid the caller (the parent) must insert, pointing at `page`
/// (retained as the left/lower half) as its left child.
pub fn split_leaf(
    pool: &dyn crate::buffer::BufferPool,
    table: bool,
    page: &mut SlottedPage,
    usable: usize,
) -> Result<(PageId, u64)> {
    let count = page.cell_count();
    let split_at = count / 2;

    let mut moved = Vec::with_capacity(count - split_at);
    for i in (split_at..count).rev() {
        moved.push(page.delete_cell(i, usable)?);
    }
    moved.reverse();

    let (new_page_id, guard) = pool.new_page(table, true)?;
    {
        let mut new_page = guard.write();
        for cell in &moved {
            new_page.insert_cell(cell, usable)?;
        }
    }

    let separator = moved[0].rowid;
    log::debug!("split leaf: {} cell(s) moved to new page {:?}, separator rowid {}", moved.len(), new_page_id, separator);
    Ok((new_page_id, separator))
}

/// Split an overfull interior page. The middle cell's separator is promoted
/// to the parent (removed from both halves, per classic B+-tree interior
/// splits); its `left_child` becomes the new right page's `right_child`.
pub fn split_interior(
    pool: &dyn crate::buffer::BufferPool,
    table: bool,
    page: &mut SlottedPage,
    usable: usize,
) -> Result<(PageId, u64)> {
    let count = page.cell_count();
    let mid = count / 2;

    let mid_cell = page.get_cell(mid, usable)?;
    let promoted_rowid = mid_cell.rowid;
    let promoted_child = mid_cell.left_child;

    let mut right_cells = Vec::with_capacity(count - mid - 1);
    for i in (mid + 1..count).rev() {
        right_cells.push(page.delete_cell(i, usable)?);
    }
    right_cells.reverse();
    page.delete_cell(mid, usable)?;

    let old_right_child = page.right_child();
    page.set_right_child(promoted_child);

    let (new_page_id, guard) = pool.new_page(table, false)?;
    {
        let mut new_page = guard.write();
        new_page.set_right_child(old_right_child);
        for cell in &right_cells {
            new_page.insert_cell(cell, usable)?;
        }
    }

    log::debug!(
        "split interior: promoted rowid {} to parent, new page {:?} holds {} cell(s)",
        promoted_rowid,
        new_page_id,
        right_cells.len()
    );
    Ok((new_page_id, promoted_rowid))
}

/// The result of repacking a run of siblings: the pages to write back (in
/// left-to-right order, reusing as many of the original sibling page ids as
/// there are output pages) and the separators between them that the parent
/// must carry.
pub struct Redistribution {
    pub pages: Vec<SlottedPage>,
    pub separators: Vec<u64>,
}

/// Flatten `siblings` (2 or 3 pages, left to right) and the parent
/// separators between them into one cell run, then first-fit repack that
/// run into as few output pages as will hold it (never more than
/// `siblings.len()`, since that many pages already held the same cells plus
/// whatever was just deleted).
///
/// For interior siblings, `separators[i]` and `siblings[i].right_child()`
/// are spliced back into the run as a regular cell so the flattened
/// sequence reads as an uninterrupted list of (separator, left-subtree)
/// pairs; the true rightmost subtree of the whole run is carried
/// separately and only ever lands on the last output page.
pub fn redistribute_siblings(
    siblings: &[SlottedPage],
    separators: &[u64],
    usable: usize,
) -> Result<Redistribution> {
    debug_assert_eq!(separators.len() + 1, siblings.len());
    let table = siblings[0].is_table();
    let is_leaf = siblings[0].is_leaf();
    let final_right_child = siblings.last().unwrap().right_child();

    let mut run = Vec::new();
    for (i, sibling) in siblings.iter().enumerate() {
        run.extend(sibling.get_all_cells(usable)?);
        if !is_leaf && i + 1 < siblings.len() {
            run.push(Cell::new_table_interior(separators[i], sibling.right_child()));
        }
    }

    let header_size = if is_leaf { LEAF_HEADER_SIZE } else { INTERIOR_HEADER_SIZE };
    let capacity = usable.saturating_sub(header_size);

    let mut chunks: Vec<Vec<Cell>> = Vec::new();
    let mut current: Vec<Cell> = Vec::new();
    let mut current_size = 0usize;
    for cell in run {
        let cell_size = cell.encoded_size() + 2;
        let would_overflow = current_size + cell_size > capacity;
        let room_to_open_another = chunks.len() + 1 < siblings.len();
        if !current.is_empty() && would_overflow && room_to_open_another {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += cell_size;
        current.push(cell);
    }
    chunks.push(current);

    let out_count = chunks.len();
    let mut separators_out = Vec::with_capacity(out_count.saturating_sub(1));
    let mut right_children = vec![PageId::INVALID; out_count];

    if is_leaf {
        for i in 0..out_count.saturating_sub(1) {
            separators_out.push(chunks[i + 1][0].rowid);
        }
    } else {
        for i in 0..out_count.saturating_sub(1) {
            let promoted = chunks[i].pop().expect("non-final chunk always ends in a promotable separator");
            right_children[i] = promoted.left_child;
            separators_out.push(promoted.rowid);
        }
        right_children[out_count - 1] = final_right_child;
    }

    let mut pages = Vec::with_capacity(out_count);
    for (idx, chunk) in chunks.into_iter().enumerate() {
        let mut page = if is_leaf { SlottedPage::new_leaf(table) } else { SlottedPage::new_interior(table) };
        if !is_leaf {
            page.set_right_child(right_children[idx]);
        }
        for cell in &chunk {
            page.insert_cell(cell, usable)?;
        }
        pages.push(page);
    }

    log::debug!(
        "redistributed {} sibling(s) into {} page(s), {} separator(s) promoted",
        siblings.len(),
        out_count,
        separators_out.len()
    );
    Ok(Redistribution { pages, separators: separators_out })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PAGE_SIZE;

    const USABLE: usize = PAGE_SIZE;

    fn leaf_with(rowids: &[u64]) -> SlottedPage {
        let mut page = SlottedPage::new_leaf(true);
        for &rowid in rowids {
            page.insert_cell(&Cell::new_table_leaf(rowid, vec![0u8; 20], 20, PageId::INVALID), USABLE).unwrap();
        }
        page
    }

    #[test]
    fn two_sparse_leaves_repack_into_one_page() {
        let left = leaf_with(&[1, 2]);
        let right = leaf_with(&[10, 11]);
        let out = redistribute_siblings(&[left, right], &[10], USABLE).unwrap();

        assert_eq!(out.pages.len(), 1);
        assert!(out.separators.is_empty());
        assert_eq!(out.pages[0].cell_count(), 4);
    }

    #[test]
    fn a_full_page_sibling_keeps_both_output_pages() {
        let mut full = SlottedPage::new_leaf(true);
        let mut rowid = 0u64;
        while full.can_fit(Cell::new_table_leaf(rowid, vec![0u8; 200], 200, PageId::INVALID).encoded_size(), USABLE) {
            full.insert_cell(&Cell::new_table_leaf(rowid, vec![0u8; 200], 200, PageId::INVALID), USABLE).unwrap();
            rowid += 1;
        }
        let sparse = leaf_with(&[rowid + 1000]);

        let out = redistribute_siblings(&[full, sparse], &[rowid + 1000], USABLE).unwrap();
        assert_eq!(out.pages.len(), 2);
        assert_eq!(out.separators.len(), 1);
    }

    #[test]
    fn threshold_only_fires_well_before_completely_empty() {
        let mut page = SlottedPage::new_leaf(true);
        page.insert_cell(&Cell::new_table_leaf(1, vec![0u8; 20], 20, PageId::INVALID), USABLE).unwrap();
        assert!(is_underfull(&page, USABLE));

        let empty = SlottedPage::new_leaf(true);
        assert!(is_underfull(&empty, USABLE));
    }
}
