//! Cell encoding and decoding.
//!
//! A cell is one key (and optional payload) stored in a B-tree page. Layout
//! depends on whether the page is a table or index tree and whether it is a
//! leaf or interior page:
//!
//! - table interior: `left_child(4) | rowid(varint)`
//! - table leaf:      `payloadSize(varint) | rowid(varint) | localPayload | [overflowPage(4)]`
//! - index interior:  `left_child(4) | payloadSize(varint) | localKey | [overflowPage(4)]`
//! - index leaf:      `payloadSize(varint) | localKey | [overflowPage(4)]`
//!
//! `payloadSize` is the *total* logical size (local + overflow); a cell only
//! carries an overflow page number when `local.len() < payloadSize`. This
//! module only encodes/decodes the cell shape; deciding the local/overflow
//! split point and walking the overflow chain is `page::overflow`'s job, and
//! choosing where to place the resulting bytes on a page is `page::slotted`'s.

use crate::types::{decode_varint, encode_varint, PageId};

/// Which tree kind and page role a cell belongs to; determines its wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    TableInterior,
    TableLeaf,
    IndexInterior,
    IndexLeaf,
}

impl CellKind {
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::TableLeaf | Self::IndexLeaf)
    }

    pub fn is_table(self) -> bool {
        matches!(self, Self::TableInterior | Self::TableLeaf)
    }
}

/// A decoded B-tree cell. `local` holds exactly the bytes stored on this
/// page; if `total_size > local.len()`, the remaining `total_size -
/// local.len()` bytes live in the overflow chain starting at `overflow_page`.
#[derive(Debug, Clone)]
pub struct Cell {
    pub kind: CellKind,
    /// Left child page (interior cells only).
    pub left_child: PageId,
    /// Integer rowid (table cells only; the cell's sort key).
    pub rowid: u64,
    /// Locally-stored payload/key bytes. For index cells this is a prefix
    /// of the index key; for table leaf cells, a prefix of the row value.
    pub local: Vec<u8>,
    /// Total logical size of the payload/key (local + overflow).
    pub total_size: u64,
    /// First overflow page, or `PageId::INVALID` if nothing overflowed.
    pub overflow_page: PageId,
}

impl Cell {
    pub fn new_table_interior(rowid: u64, left_child: PageId) -> Self {
        Self {
            kind: CellKind::TableInterior,
            left_child,
            rowid,
            local: Vec::new(),
            total_size: 0,
            overflow_page: PageId::INVALID,
        }
    }

    pub fn new_table_leaf(rowid: u64, local: Vec<u8>, total_size: u64, overflow_page: PageId) -> Self {
        Self {
            kind: CellKind::TableLeaf,
            left_child: PageId::INVALID,
            rowid,
            local,
            total_size,
            overflow_page,
        }
    }

    pub fn new_index_interior(
        left_child: PageId,
        local: Vec<u8>,
        total_size: u64,
        overflow_page: PageId,
    ) -> Self {
        Self {
            kind: CellKind::IndexInterior,
            left_child,
            rowid: 0,
            local,
            total_size,
            overflow_page,
        }
    }

    pub fn new_index_leaf(local: Vec<u8>, total_size: u64, overflow_page: PageId) -> Self {
        Self {
            kind: CellKind::IndexLeaf,
            left_child: PageId::INVALID,
            rowid: 0,
            local,
            total_size,
            overflow_page,
        }
    }

    /// Whether this cell's key/payload spills into an overflow chain.
    pub fn has_overflow(&self) -> bool {
        self.overflow_page.is_valid()
    }

    /// Size of this cell as encoded on a page (the minimum cell size
    /// mandated by the format is 4 bytes, satisfied by every variant here).
    pub fn encoded_size(&self) -> usize {
        self.encode().len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.local.len() + 9);
        match self.kind {
            CellKind::TableInterior => {
                buf.extend(self.left_child.value().to_be_bytes());
                buf.extend(encode_varint(self.rowid));
            }
            CellKind::TableLeaf => {
                buf.extend(encode_varint(self.total_size));
                buf.extend(encode_varint(self.rowid));
                buf.extend(&self.local);
                if self.has_overflow() {
                    buf.extend(self.overflow_page.value().to_be_bytes());
                }
            }
            CellKind::IndexInterior => {
                buf.extend(self.left_child.value().to_be_bytes());
                buf.extend(encode_varint(self.total_size));
                buf.extend(&self.local);
                if self.has_overflow() {
                    buf.extend(self.overflow_page.value().to_be_bytes());
                }
            }
            CellKind::IndexLeaf => {
                buf.extend(encode_varint(self.total_size));
                buf.extend(&self.local);
                if self.has_overflow() {
                    buf.extend(self.overflow_page.value().to_be_bytes());
                }
            }
        }
        buf
    }

    /// Decode a cell of the given kind, given the page's precomputed
    /// `max_local` bound (needed to know whether a trailing overflow page
    /// number is present: a cell overflows iff `total_size` exceeds what
    /// could have been stored locally).
    pub fn decode(kind: CellKind, bytes: &[u8], max_local: usize) -> Option<(Self, usize)> {
        let mut off = 0;
        let left_child = if matches!(kind, CellKind::TableInterior | CellKind::IndexInterior) {
            if bytes.len() < 4 {
                return None;
            }
            let v = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
            off += 4;
            PageId::new(v)
        } else {
            PageId::INVALID
        };

        if kind == CellKind::TableInterior {
            let (rowid, n) = decode_varint(&bytes[off..])?;
            off += n;
            return Some((Self::new_table_interior(rowid, left_child), off));
        }

        let (total_size, n) = decode_varint(&bytes[off..])?;
        off += n;

        let rowid = if kind == CellKind::TableLeaf {
            let (r, n) = decode_varint(&bytes[off..])?;
            off += n;
            r
        } else {
            0
        };

        let local_len = (total_size as usize).min(max_local);
        if off + local_len > bytes.len() {
            return None;
        }
        let local = bytes[off..off + local_len].to_vec();
        off += local_len;

        let overflow_page = if (total_size as usize) > local_len {
            if off + 4 > bytes.len() {
                return None;
            }
            let v = u32::from_be_bytes(bytes[off..off + 4].try_into().ok()?);
            off += 4;
            PageId::new(v)
        } else {
            PageId::INVALID
        };

        let cell = Self {
            kind,
            left_child,
            rowid,
            local,
            total_size,
            overflow_page,
        };
        Some((cell, off))
    }
}
