#![forbid(unsafe_code)]
//! heapfs public API facade.
//!
//! Re-exports the storage engine through a stable external interface. This
//! is the crate a call adapter (or an embedding host) depends on.

pub use heapfs_core::{
    BlockChainStore, BootstrapOutcome, Credentials, DirEntry, FsStats, HeapFs, HeapFsConfig,
    HeapFsError, InodeTable, Result, SlotId,
};
pub use heapfs_heap::{DirHeap, HeapDevice, HeapLockGuard, MemHeap};
pub use heapfs_types::{
    FileKind, HeapOffset, InodeRecord, LeafName, ParentPath, TimeSpec, BLOCK_SIZE, NAME_MAX,
    PARENT_MAX,
};
