//! The inode table: fixed-size records spread across a bounded range of
//! reserved heap offsets.
//!
//! The table is logically one growable array of 256-byte record slots,
//! physically partitioned into pages of [`PAGE_BYTES`] bytes, one page per
//! reserved offset. Every lookup is a linear scan in a fixed order:
//! ascending page offset, then ascending slot index; first match wins.
//! Capacity is bounded and small, so O(capacity) per call is the deliberate
//! tradeoff.
//!
//! Mutations (allocate, update, delete) hold the heap device's advisory
//! lock on the target page for the duration of the scan-and-write. That
//! gives at-most-one-writer-per-page, not whole-table atomicity: a `find`
//! followed by a separate `allocate` can race another allocator, so
//! (parent, leaf) uniqueness is best-effort at this layer.

use crate::config::HeapFsConfig;
use crate::path;
use heapfs_error::{HeapFsError, Result};
use heapfs_heap::{HeapDevice, HeapLockGuard};
use heapfs_types::{
    HeapOffset, InodeRecord, LeafName, ParentPath, SlotIndex, PAGE_BYTES, RECORDS_PER_PAGE,
    RECORD_SIZE,
};
use std::sync::Arc;
use tracing::debug;

/// Stable address of one record slot: page offset plus in-page index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId {
    pub page: HeapOffset,
    pub index: SlotIndex,
}

pub struct InodeTable {
    heap: Arc<dyn HeapDevice>,
    base: u64,
    pages: u32,
}

impl InodeTable {
    #[must_use]
    pub fn new(heap: Arc<dyn HeapDevice>, config: &HeapFsConfig) -> Self {
        Self {
            heap,
            base: config.inode_base,
            pages: config.inode_pages,
        }
    }

    fn page_offsets(&self) -> impl Iterator<Item = HeapOffset> {
        let base = self.base;
        (0..u64::from(self.pages)).map(move |i| HeapOffset(base + i))
    }

    fn read_page(&self, page: HeapOffset) -> Result<Vec<u8>> {
        if self.heap.size_of(page)? < PAGE_BYTES {
            return Err(HeapFsError::Corruption {
                offset: page.0,
                detail: "inode table page missing or truncated".to_owned(),
            });
        }
        let mut buf = vec![0_u8; PAGE_BYTES as usize];
        self.heap.read_at(page, 0, &mut buf)?;
        Ok(buf)
    }

    fn decode_slot(page: HeapOffset, buf: &[u8], index: u32) -> Result<Option<InodeRecord>> {
        let start = index as usize * RECORD_SIZE;
        InodeRecord::decode(&buf[start..start + RECORD_SIZE]).map_err(|err| {
            HeapFsError::Corruption {
                offset: page.0,
                detail: format!("slot {index}: {err}"),
            }
        })
    }

    /// Exact-match lookup on the (parent, leaf) pair.
    ///
    /// Lookups for the literal leaf `"/"` never succeed; the root sentinel
    /// is reachable only through [`InodeTable::root`].
    pub fn find(&self, parent: &ParentPath, leaf: &LeafName) -> Result<(SlotId, InodeRecord)> {
        if leaf.is_root() {
            return Err(HeapFsError::NotFound(path::join_display(parent, leaf)));
        }
        for page in self.page_offsets() {
            let buf = self.read_page(page)?;
            for index in 0..RECORDS_PER_PAGE {
                if let Some(record) = Self::decode_slot(page, &buf, index)? {
                    if record.parent == *parent && record.leaf == *leaf {
                        return Ok((
                            SlotId {
                                page,
                                index: SlotIndex(index),
                            },
                            record,
                        ));
                    }
                }
            }
        }
        Err(HeapFsError::NotFound(path::join_display(parent, leaf)))
    }

    /// Whether a live slot holds the pair.
    pub fn contains(&self, parent: &ParentPath, leaf: &LeafName) -> Result<bool> {
        match self.find(parent, leaf) {
            Ok(_) => Ok(true),
            Err(HeapFsError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// The sentinel `("/", "/")` record created by bootstrap.
    pub fn root(&self) -> Result<(SlotId, InodeRecord)> {
        let page = HeapOffset(self.base);
        let buf = self.read_page(page)?;
        let record = Self::decode_slot(page, &buf, 0)?.ok_or_else(|| HeapFsError::Corruption {
            offset: page.0,
            detail: "root inode slot is empty".to_owned(),
        })?;
        if !record.leaf.is_root() || !record.parent.is_root() {
            return Err(HeapFsError::Corruption {
                offset: page.0,
                detail: "root slot does not hold the sentinel pair".to_owned(),
            });
        }
        Ok((
            SlotId {
                page,
                index: SlotIndex(0),
            },
            record,
        ))
    }

    /// Reserve the first free slot in scan order and write `record` into it.
    ///
    /// The free-slot scan and the write happen under the page's heap lock,
    /// so two allocators cannot claim the same slot.
    pub fn allocate(&self, record: &InodeRecord) -> Result<SlotId> {
        for page in self.page_offsets() {
            let _guard = HeapLockGuard::acquire(&*self.heap, page);
            let buf = self.read_page(page)?;
            for index in 0..RECORDS_PER_PAGE {
                if Self::decode_slot(page, &buf, index)?.is_none() {
                    self.write_slot(page, index, record)?;
                    debug!(
                        page = page.0,
                        index,
                        parent = %record.parent,
                        leaf = %record.leaf,
                        "allocated inode slot"
                    );
                    return Ok(SlotId {
                        page,
                        index: SlotIndex(index),
                    });
                }
            }
        }
        Err(HeapFsError::OutOfInodes)
    }

    /// Rewrite an occupied slot in place.
    pub fn update(&self, slot: SlotId, record: &InodeRecord) -> Result<()> {
        let _guard = HeapLockGuard::acquire(&*self.heap, slot.page);
        self.write_slot(slot.page, slot.index.0, record)
    }

    /// Zero the slot, tombstoning the record. Idempotent.
    pub fn delete(&self, slot: SlotId) -> Result<()> {
        let _guard = HeapLockGuard::acquire(&*self.heap, slot.page);
        let zeros = [0_u8; RECORD_SIZE];
        self.heap
            .write_at(slot.page, slot.index.byte_offset(), &zeros)
    }

    /// All live records whose `parent_path` equals `parent`, excluding the
    /// root self-entry, in scan order.
    pub fn list(&self, parent: &ParentPath) -> Result<Vec<InodeRecord>> {
        let mut out = Vec::new();
        for (_, record) in self.live_records()? {
            if record.parent == *parent && !record.leaf.is_root() {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Every occupied slot in scan order, the root sentinel included.
    pub fn live_records(&self) -> Result<Vec<(SlotId, InodeRecord)>> {
        let mut out = Vec::new();
        for page in self.page_offsets() {
            let buf = self.read_page(page)?;
            for index in 0..RECORDS_PER_PAGE {
                if let Some(record) = Self::decode_slot(page, &buf, index)? {
                    out.push((
                        SlotId {
                            page,
                            index: SlotIndex(index),
                        },
                        record,
                    ));
                }
            }
        }
        Ok(out)
    }

    /// Total slot capacity of the reserved range.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        u64::from(self.pages) * u64::from(RECORDS_PER_PAGE)
    }

    fn write_slot(&self, page: HeapOffset, index: u32, record: &InodeRecord) -> Result<()> {
        let mut slot = [0_u8; RECORD_SIZE];
        record
            .encode_into(&mut slot)
            .map_err(|err| HeapFsError::Corruption {
                offset: page.0,
                detail: err.to_string(),
            })?;
        self.heap
            .write_at(page, u64::from(index) * RECORD_SIZE as u64, &slot)
    }
}
