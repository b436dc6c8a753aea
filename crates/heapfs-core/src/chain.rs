//! Chained multi-block data store.
//!
//! A regular file's content is a singly linked sequence of fixed-size heap
//! blocks. The inode stores only the first block's offset; successor links
//! live in a process-local side table populated as chains grow. An offset
//! absent from the side table is its chain's tail.
//!
//! The side table and the allocation watermark are shared across all
//! request threads and are guarded by one exclusive lock. Contention is
//! expected to be low, so chain operations simply hold it for their
//! duration.
//!
//! Being process-local, the side table does not survive a restart: a
//! remounted engine can still reach every file's first block, but links
//! past it are gone. This is a known limitation of the design, surfaced at
//! mount time rather than silently repaired.

use crate::config::HeapFsConfig;
use heapfs_error::{HeapFsError, Result};
use heapfs_heap::HeapDevice;
use heapfs_types::HeapOffset;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of a chain write, applied to the inode record by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainWrite {
    /// First block of the chain (newly allocated if the file had none).
    pub first_block: HeapOffset,
    /// Logical size after the write: bytes newly appended extend it, bytes
    /// overwriting an existing range do not.
    pub new_size: u64,
    /// Bytes written.
    pub written: usize,
}

struct ChainState {
    /// `next_block[b]` is the successor of block `b`; absent means tail.
    next_block: HashMap<u64, u64>,
    /// Next candidate offset for a new block. Monotonic for the process
    /// lifetime; already-allocated offsets are probed past, never reissued.
    watermark: u64,
}

pub struct BlockChainStore {
    heap: Arc<dyn HeapDevice>,
    block_size: u64,
    state: Mutex<ChainState>,
}

impl BlockChainStore {
    #[must_use]
    pub fn new(heap: Arc<dyn HeapDevice>, config: &HeapFsConfig) -> Self {
        Self {
            heap,
            block_size: config.block_size,
            state: Mutex::new(ChainState {
                next_block: HashMap::new(),
                watermark: config.data_base,
            }),
        }
    }

    /// Read up to `len` bytes of file content starting at byte `offset`.
    ///
    /// Copies forward across block boundaries until `len` bytes are read,
    /// the logical `size` is reached, or the chain ends; the last two are
    /// short reads, not errors. A chain link to an unallocated offset fails
    /// with `NoSuchBlock`.
    pub fn read(
        &self,
        first_block: HeapOffset,
        size: u64,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>> {
        if len == 0 || first_block.is_none() || offset >= size {
            return Ok(Vec::new());
        }
        // Fits usize: bounded by `len`.
        let want = (size - offset).min(len as u64) as usize;
        let mut out = vec![0_u8; want];
        let mut filled = 0_usize;

        let state = self.state.lock();
        let mut cur = first_block;

        // Skip whole blocks to the one covering the starting byte. A chain
        // that ends first yields a short (empty) read.
        for _ in 0..offset / self.block_size {
            match state.next_block.get(&cur.0) {
                Some(&next) => cur = HeapOffset(next),
                None => return Ok(Vec::new()),
            }
        }

        let mut pos = offset % self.block_size;
        loop {
            let allocated = self.heap.size_of(cur)?;
            if allocated == 0 {
                return Err(HeapFsError::NoSuchBlock { offset: cur.0 });
            }
            let readable = allocated.min(self.block_size);
            if pos < readable {
                // Fits usize: bounded by `want`.
                let n = (readable - pos).min((want - filled) as u64) as usize;
                self.heap.read_at(cur, pos, &mut out[filled..filled + n])?;
                filled += n;
            }
            if filled == want {
                break;
            }
            match state.next_block.get(&cur.0) {
                Some(&next) => {
                    cur = HeapOffset(next);
                    pos = 0;
                }
                None => break,
            }
        }

        out.truncate(filled);
        trace!(first = first_block.0, offset, want, got = filled, "chain read");
        Ok(out)
    }

    /// Write `data` at byte `offset`, allocating and linking new blocks as
    /// the write extends past the current chain's end. Writes beyond the
    /// end of file zero-fill the gap.
    pub fn write(
        &self,
        first_block: HeapOffset,
        size: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<ChainWrite> {
        if data.is_empty() {
            return Ok(ChainWrite {
                first_block,
                new_size: size,
                written: 0,
            });
        }
        let len = data.len() as u64;
        let end = offset
            .checked_add(len)
            .ok_or(HeapFsError::OutOfBlocks)?;
        let bs = self.block_size;
        // After this write every block before the last content block must be
        // full-size; only the final tail may carry a short allocation.
        let content_end = end.max(size);
        let needed_in_block = |index: u64| (content_end - index * bs).min(bs);

        let mut state = self.state.lock();
        let mut first = first_block;
        if first.is_none() {
            first = self.probe_free_offset(&mut state)?;
        }

        let start_block = offset / bs;
        let last_block = (end - 1) / bs;
        let mut cur = first;
        let mut index = 0_u64;

        // Walk (and if necessary grow) the chain up to the block covering
        // the starting byte. Existing short tails are grown to full size in
        // passing, since they are no longer the tail afterwards.
        while index < start_block {
            self.heap.alloc(cur, needed_in_block(index))?;
            cur = self.successor(&mut state, cur)?;
            index += 1;
        }

        let mut written = 0_usize;
        loop {
            self.heap.alloc(cur, needed_in_block(index))?;
            let block_start = index * bs;
            let pos = offset.saturating_sub(block_start);
            // Fits usize: bounded by data.len().
            let n = (bs - pos).min(len - written as u64) as usize;
            self.heap.write_at(cur, pos, &data[written..written + n])?;
            written += n;
            if written == data.len() {
                break;
            }
            cur = self.successor(&mut state, cur)?;
            index += 1;
        }
        debug_assert!(index <= last_block);

        let new_size = size.max(end);
        debug!(
            first = first.0,
            offset,
            len = data.len(),
            new_size,
            "chain write"
        );
        Ok(ChainWrite {
            first_block: first,
            new_size,
            written,
        })
    }

    /// Release every block of the chain, from the heap and from the side
    /// table. A missed link would leak heap space permanently, so the walk
    /// continues until the tail.
    pub fn release(&self, first_block: HeapOffset) -> Result<()> {
        if first_block.is_none() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let mut visited = HashSet::new();
        let mut cur = first_block;
        loop {
            if !visited.insert(cur.0) {
                return Err(HeapFsError::Corruption {
                    offset: cur.0,
                    detail: "cycle in block chain".to_owned(),
                });
            }
            let next = state.next_block.remove(&cur.0);
            self.heap.delete(cur)?;
            match next {
                Some(next) => cur = HeapOffset(next),
                None => break,
            }
        }
        debug!(first = first_block.0, blocks = visited.len(), "chain released");
        Ok(())
    }

    /// Number of blocks reachable from `first_block` through the side
    /// table. Fails on a cycle, which is an invariant violation.
    pub fn chain_len(&self, first_block: HeapOffset) -> Result<u64> {
        if first_block.is_none() {
            return Ok(0);
        }
        let state = self.state.lock();
        let mut visited = HashSet::new();
        let mut cur = first_block.0;
        loop {
            if !visited.insert(cur) {
                return Err(HeapFsError::Corruption {
                    offset: cur,
                    detail: "cycle in block chain".to_owned(),
                });
            }
            match state.next_block.get(&cur) {
                Some(&next) => cur = next,
                None => break,
            }
        }
        Ok(visited.len() as u64)
    }

    /// Follow the link from `cur`, allocating a fresh block and linking it
    /// when `cur` is the tail.
    fn successor(&self, state: &mut ChainState, cur: HeapOffset) -> Result<HeapOffset> {
        if let Some(&next) = state.next_block.get(&cur.0) {
            return Ok(HeapOffset(next));
        }
        let fresh = self.probe_free_offset(state)?;
        state.next_block.insert(cur.0, fresh.0);
        trace!(from = cur.0, to = fresh.0, "chain extended");
        Ok(fresh)
    }

    /// Probe ascending offsets from the watermark, skipping any that are
    /// already allocated, and advance the watermark past the issued offset.
    fn probe_free_offset(&self, state: &mut ChainState) -> Result<HeapOffset> {
        loop {
            let candidate = state.watermark;
            state.watermark = state
                .watermark
                .checked_add(1)
                .ok_or(HeapFsError::OutOfBlocks)?;
            if self.heap.size_of(HeapOffset(candidate))? == 0 {
                return Ok(HeapOffset(candidate));
            }
        }
    }
}
