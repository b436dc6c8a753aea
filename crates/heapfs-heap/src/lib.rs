#![forbid(unsafe_code)]
//! The heap-device collaborator boundary.
//!
//! The storage engine is built on an external offset-addressable persistent
//! heap: a block-granular store that allocates a buffer for any non-negative
//! offset, can grow it, report its current size, release it, and arbitrate
//! advisory per-offset locks. [`HeapDevice`] is that contract; the engine
//! never touches a backend directly.
//!
//! The original device exposes its buffers by mapping; here the buffer
//! access is expressed as bounds-checked positional reads and writes
//! (`pread`/`pwrite` semantics), which is how a safe Rust caller consumes
//! the same contract.
//!
//! Two implementations ship with the workspace: [`MemHeap`] for tests and
//! demos, and [`DirHeap`], a persistent backend keeping one file per offset
//! under a root directory.

use heapfs_error::{HeapFsError, Result};
use heapfs_types::HeapOffset;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Offset-addressable persistent heap.
///
/// Contract:
/// - `alloc(offset, size)` ensures the allocation at `offset` holds at least
///   `size` bytes, allocating on first use and growing in place otherwise.
///   New bytes read as zero; existing content is preserved across growth.
/// - `size_of(offset)` is 0 for a never-allocated (or deleted) offset.
/// - `delete(offset)` releases the allocation; deleting an unallocated
///   offset is a no-op.
/// - `lock`/`unlock` give advisory mutual exclusion scoped to one offset.
///   Prefer [`HeapLockGuard::acquire`] over calling the pair directly.
pub trait HeapDevice: Send + Sync {
    fn alloc(&self, offset: HeapOffset, size: u64) -> Result<()>;

    fn size_of(&self, offset: HeapOffset) -> Result<u64>;

    fn delete(&self, offset: HeapOffset) -> Result<()>;

    /// Read exactly `buf.len()` bytes starting at byte `pos` of the
    /// allocation. Fails if the range extends past the allocated size.
    fn read_at(&self, offset: HeapOffset, pos: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `data` starting at byte `pos` of the allocation.
    /// Fails if the range extends past the allocated size.
    fn write_at(&self, offset: HeapOffset, pos: u64, data: &[u8]) -> Result<()>;

    /// Block until the advisory lock on `offset` is held by this caller.
    fn lock(&self, offset: HeapOffset);

    /// Release the advisory lock on `offset`.
    fn unlock(&self, offset: HeapOffset);
}

/// RAII wrapper for the advisory per-offset lock.
pub struct HeapLockGuard<'a> {
    dev: &'a dyn HeapDevice,
    offset: HeapOffset,
}

impl<'a> HeapLockGuard<'a> {
    pub fn acquire(dev: &'a dyn HeapDevice, offset: HeapOffset) -> Self {
        dev.lock(offset);
        Self { dev, offset }
    }
}

impl Drop for HeapLockGuard<'_> {
    fn drop(&mut self) {
        self.dev.unlock(self.offset);
    }
}

fn out_of_bounds(offset: HeapOffset, pos: u64, len: usize, size: u64) -> HeapFsError {
    HeapFsError::Corruption {
        offset: offset.0,
        detail: format!("access out of bounds: pos={pos} len={len} allocated={size}"),
    }
}

fn unallocated(offset: HeapOffset) -> HeapFsError {
    HeapFsError::Corruption {
        offset: offset.0,
        detail: "access to unallocated offset".to_owned(),
    }
}

fn end_of(pos: u64, len: usize) -> Result<u64> {
    u64::try_from(len)
        .ok()
        .and_then(|l| pos.checked_add(l))
        .ok_or(HeapFsError::Corruption {
            offset: 0,
            detail: "access range overflows u64".to_owned(),
        })
}

/// Per-offset advisory lock table shared by the in-process backends.
#[derive(Default)]
struct LockTable {
    held: Mutex<HashSet<u64>>,
    available: Condvar,
}

impl LockTable {
    fn lock(&self, offset: HeapOffset) {
        let mut held = self.held.lock();
        while held.contains(&offset.0) {
            self.available.wait(&mut held);
        }
        held.insert(offset.0);
    }

    fn unlock(&self, offset: HeapOffset) {
        let mut held = self.held.lock();
        held.remove(&offset.0);
        self.available.notify_all();
    }
}

/// In-memory heap device.
#[derive(Default)]
pub struct MemHeap {
    allocs: Mutex<HashMap<u64, Vec<u8>>>,
    locks: LockTable,
}

impl MemHeap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations. Test hook for leak checks.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocs.lock().len()
    }
}

impl HeapDevice for MemHeap {
    fn alloc(&self, offset: HeapOffset, size: u64) -> Result<()> {
        let len = usize::try_from(size).map_err(|_| HeapFsError::Corruption {
            offset: offset.0,
            detail: "allocation size overflows usize".to_owned(),
        })?;
        let mut allocs = self.allocs.lock();
        let buf = allocs.entry(offset.0).or_default();
        if buf.len() < len {
            buf.resize(len, 0);
        }
        Ok(())
    }

    fn size_of(&self, offset: HeapOffset) -> Result<u64> {
        Ok(self
            .allocs
            .lock()
            .get(&offset.0)
            .map_or(0, |b| b.len() as u64))
    }

    fn delete(&self, offset: HeapOffset) -> Result<()> {
        self.allocs.lock().remove(&offset.0);
        Ok(())
    }

    fn read_at(&self, offset: HeapOffset, pos: u64, buf: &mut [u8]) -> Result<()> {
        let end = end_of(pos, buf.len())?;
        let allocs = self.allocs.lock();
        let alloc = allocs.get(&offset.0).ok_or_else(|| unallocated(offset))?;
        if end > alloc.len() as u64 {
            return Err(out_of_bounds(offset, pos, buf.len(), alloc.len() as u64));
        }
        let start = pos as usize;
        buf.copy_from_slice(&alloc[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: HeapOffset, pos: u64, data: &[u8]) -> Result<()> {
        let end = end_of(pos, data.len())?;
        let mut allocs = self.allocs.lock();
        let alloc = allocs
            .get_mut(&offset.0)
            .ok_or_else(|| unallocated(offset))?;
        if end > alloc.len() as u64 {
            return Err(out_of_bounds(offset, pos, data.len(), alloc.len() as u64));
        }
        let start = pos as usize;
        alloc[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn lock(&self, offset: HeapOffset) {
        self.locks.lock(offset);
    }

    fn unlock(&self, offset: HeapOffset) {
        self.locks.unlock(offset);
    }
}

/// Directory-backed persistent heap device: one file per offset.
///
/// Allocation growth uses `set_len`, which zero-fills, matching the
/// contract's fresh-bytes-read-as-zero requirement. The advisory lock is
/// process-scoped; cross-process arbitration belongs to the real device.
pub struct DirHeap {
    root: PathBuf,
    locks: LockTable,
}

impl DirHeap {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: LockTable::default(),
        })
    }

    fn path_for(&self, offset: HeapOffset) -> PathBuf {
        self.root.join(format!("{:016x}.blk", offset.0))
    }
}

impl HeapDevice for DirHeap {
    fn alloc(&self, offset: HeapOffset, size: u64) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path_for(offset))?;
        if file.metadata()?.len() < size {
            file.set_len(size)?;
        }
        Ok(())
    }

    fn size_of(&self, offset: HeapOffset) -> Result<u64> {
        match fs::metadata(self.path_for(offset)) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, offset: HeapOffset) -> Result<()> {
        match fs::remove_file(self.path_for(offset)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn read_at(&self, offset: HeapOffset, pos: u64, buf: &mut [u8]) -> Result<()> {
        let end = end_of(pos, buf.len())?;
        let file = match OpenOptions::new().read(true).open(self.path_for(offset)) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(unallocated(offset));
            }
            Err(err) => return Err(err.into()),
        };
        let size = file.metadata()?.len();
        if end > size {
            return Err(out_of_bounds(offset, pos, buf.len(), size));
        }
        file.read_exact_at(buf, pos)?;
        Ok(())
    }

    fn write_at(&self, offset: HeapOffset, pos: u64, data: &[u8]) -> Result<()> {
        let end = end_of(pos, data.len())?;
        let file = match OpenOptions::new().write(true).open(self.path_for(offset)) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(unallocated(offset));
            }
            Err(err) => return Err(err.into()),
        };
        let size = file.metadata()?.len();
        if end > size {
            return Err(out_of_bounds(offset, pos, data.len(), size));
        }
        file.write_all_at(data, pos)?;
        Ok(())
    }

    fn lock(&self, offset: HeapOffset) {
        self.locks.lock(offset);
    }

    fn unlock(&self, offset: HeapOffset) {
        self.locks.unlock(offset);
    }
}
