#![forbid(unsafe_code)]
//! Error types for heapfs.
//!
//! A single user-facing enum, [`HeapFsError`], is returned by every engine
//! operation. Codec-level failures (`LayoutError` in `heapfs-types`) are
//! converted at the `heapfs-core` boundary; this crate stays independent of
//! `heapfs-types` to keep the dependency graph acyclic.
//!
//! No variant is retried internally: the heap device is assumed
//! always-available, so there are no transient-failure classes. The call
//! adapter maps variants onto its host's status surface via
//! [`HeapFsError::to_errno`]; the mapping is exhaustive (no wildcard arm),
//! so adding a variant without assigning an errno is a compile error.

use thiserror::Error;

/// Unified error type for all heapfs operations.
#[derive(Debug, Error)]
pub enum HeapFsError {
    /// I/O failure in a heap-device backend (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No inode matches the requested (parent, leaf) pair.
    #[error("not found: {0}")]
    NotFound(String),

    /// AccessControl rejected the caller for this inode.
    #[error("permission denied")]
    PermissionDenied,

    /// Every slot in the reserved inode-table range is occupied.
    #[error("inode table full")]
    OutOfInodes,

    /// The data-block offset range is exhausted.
    #[error("no data block offsets left")]
    OutOfBlocks,

    /// Malformed or non-absolute path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A chain references a heap offset with no backing allocation.
    ///
    /// Internal-consistency failure: fatal to the operation, not to the
    /// process. Other inodes and chains are unaffected.
    #[error("chain references unallocated block at offset {offset}")]
    NoSuchBlock { offset: u64 },

    /// Operation not implemented by this minimal engine.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Target (parent, leaf) pair already occupied.
    #[error("file exists")]
    Exists,

    /// A path component that must be a directory is not one.
    #[error("not a directory")]
    NotDirectory,

    /// File operation attempted on a directory.
    #[error("is a directory")]
    IsDirectory,

    /// rmdir on a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,

    /// Leaf name or parent path exceeds its record bound.
    #[error("name too long")]
    NameTooLong,

    /// Superblock or mount geometry does not match this engine.
    #[error("invalid on-heap format: {0}")]
    Format(String),

    /// On-heap metadata failed to decode at a known offset.
    #[error("corrupt metadata at offset {offset}: {detail}")]
    Corruption { offset: u64, detail: String },
}

impl HeapFsError {
    /// Convert this error into a POSIX errno suitable for an adapter reply.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::NotFound(_) => libc::ENOENT,
            Self::PermissionDenied => libc::EACCES,
            Self::OutOfInodes | Self::OutOfBlocks => libc::ENOSPC,
            Self::InvalidPath(_) | Self::Format(_) => libc::EINVAL,
            Self::NoSuchBlock { .. } | Self::Corruption { .. } => libc::EIO,
            Self::Unsupported(_) => libc::EOPNOTSUPP,
            Self::Exists => libc::EEXIST,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NameTooLong => libc::ENAMETOOLONG,
        }
    }
}

/// Result alias using `HeapFsError`.
pub type Result<T> = std::result::Result<T, HeapFsError>;
