#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;

mod record;

pub use record::{InodeRecord, Superblock, RECORD_SIZE, SUPERBLOCK_BYTES};

/// Fixed data-block size in bytes. Tail blocks of short files may carry a
/// smaller heap allocation; every other block in a chain is this size.
pub const BLOCK_SIZE: u64 = 8192;

/// Size of one inode-table page in bytes (one page per reserved heap offset).
pub const PAGE_BYTES: u64 = 8192;

/// Records per inode-table page.
#[allow(clippy::cast_possible_truncation)] // 8192 / 256 = 32
pub const RECORDS_PER_PAGE: u32 = (PAGE_BYTES / RECORD_SIZE as u64) as u32;

/// Heap offset of the superblock.
pub const SUPERBLOCK_OFFSET: u64 = 0;

/// First heap offset of the inode-table range.
pub const INODE_BASE: u64 = 1;

/// Number of reserved inode-table pages; the table occupies
/// `[INODE_BASE, INODE_BASE + INODE_PAGES)`.
pub const INODE_PAGES: u32 = 16;

/// First heap offset eligible for file data blocks. The allocation watermark
/// starts here, keeping data offsets disjoint from the reserved metadata
/// range.
pub const DATA_BASE: u64 = 0x1_0000;

/// Maximum byte length of a leaf name stored in an inode record.
///
/// Over-long components are rejected, never truncated.
pub const NAME_MAX: usize = 56;

/// Maximum byte length of a normalized parent path stored in an inode record.
pub const PARENT_MAX: usize = 120;

/// Superblock magic ("HEAPFS01").
pub const HEAPFS_MAGIC: u64 = u64::from_be_bytes(*b"HEAPFS01");

/// On-heap format version covered by this crate.
pub const FORMAT_VERSION: u32 = 1;

// ── POSIX file mode constants ───────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;

/// Permission-bit mask (everything below the file type bits).
pub const MODE_PERM_MASK: u16 = 0o007_777;

/// Offset of an allocation on the heap device.
///
/// Unit-carrying wrapper to keep heap offsets from mixing with byte
/// positions inside an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HeapOffset(pub u64);

impl HeapOffset {
    pub const SUPERBLOCK: Self = Self(SUPERBLOCK_OFFSET);

    /// Sentinel for "no data block" in an inode record. Valid because data
    /// offsets start at [`DATA_BASE`], well above zero.
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Add an offset count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }
}

impl fmt::Display for HeapOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a record slot within one inode-table page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotIndex(pub u32);

impl SlotIndex {
    /// Byte offset of this slot within its page.
    #[must_use]
    pub fn byte_offset(self) -> u64 {
        u64::from(self.0) * RECORD_SIZE as u64
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// File kind stored in an inode record's mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Regular,
    Directory,
}

impl FileKind {
    /// Extract the kind from a full mode word.
    #[must_use]
    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(Self::Regular),
            S_IFDIR => Some(Self::Directory),
            _ => None,
        }
    }

    /// The file-type bits for this kind.
    #[must_use]
    pub fn type_bits(self) -> u16 {
        match self {
            Self::Regular => S_IFREG,
            Self::Directory => S_IFDIR,
        }
    }
}

/// Wall-clock timestamp split into seconds and nanoseconds since the epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TimeSpec {
    pub secs: u64,
    pub nanos: u32,
}

impl TimeSpec {
    /// Current wall-clock time. Clamps to zero before the epoch.
    #[must_use]
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }
}

impl From<SystemTime> for TimeSpec {
    fn from(t: SystemTime) -> Self {
        let d = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            secs: d.as_secs(),
            nanos: d.subsec_nanos(),
        }
    }
}

impl From<TimeSpec> for SystemTime {
    fn from(t: TimeSpec) -> Self {
        SystemTime::UNIX_EPOCH + Duration::new(t.secs, t.nanos)
    }
}

/// Errors from the fixed-layout codecs and bounded-string constructors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("{field} too long: {len} bytes exceeds {max}")]
    NameTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], LayoutError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(LayoutError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(LayoutError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, LayoutError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, LayoutError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, LayoutError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
fn writable_slice(
    data: &mut [u8],
    offset: usize,
    len: usize,
) -> Result<&mut [u8], LayoutError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(LayoutError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };
    let actual = data.len();
    data.get_mut(offset..end)
        .ok_or(LayoutError::InsufficientData {
            needed: len,
            offset,
            actual,
        })
}

#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) -> Result<(), LayoutError> {
    writable_slice(data, offset, 2)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), LayoutError> {
    writable_slice(data, offset, 4)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u64(data: &mut [u8], offset: usize, value: u64) -> Result<(), LayoutError> {
    writable_slice(data, offset, 8)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// A validated leaf name: non-empty, at most [`NAME_MAX`] bytes, and free of
/// path separators. The literal `"/"` is the one exception, reserved as the
/// root sentinel leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeafName(String);

impl LeafName {
    pub fn new(name: &str) -> Result<Self, LayoutError> {
        if name == "/" {
            return Ok(Self(name.to_owned()));
        }
        if name.is_empty() {
            return Err(LayoutError::InvalidField {
                field: "leaf_name",
                reason: "empty",
            });
        }
        if name.contains('/') {
            return Err(LayoutError::InvalidField {
                field: "leaf_name",
                reason: "contains path separator",
            });
        }
        if name.len() > NAME_MAX {
            return Err(LayoutError::NameTooLong {
                field: "leaf_name",
                len: name.len(),
                max: NAME_MAX,
            });
        }
        Ok(Self(name.to_owned()))
    }

    /// The reserved root sentinel leaf.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeafName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated, normalized parent path: absolute, at most [`PARENT_MAX`]
/// bytes, no trailing slash unless it is the root `"/"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentPath(String);

impl ParentPath {
    pub fn new(path: &str) -> Result<Self, LayoutError> {
        if path == "/" {
            return Ok(Self(path.to_owned()));
        }
        if !path.starts_with('/') {
            return Err(LayoutError::InvalidField {
                field: "parent_path",
                reason: "not absolute",
            });
        }
        if path.ends_with('/') {
            return Err(LayoutError::InvalidField {
                field: "parent_path",
                reason: "trailing slash",
            });
        }
        if path.len() > PARENT_MAX {
            return Err(LayoutError::NameTooLong {
                field: "parent_path",
                len: path.len(),
                max: PARENT_MAX,
            });
        }
        Ok(Self(path.to_owned()))
    }

    #[must_use]
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_helpers_round_trip() {
        let mut buf = [0_u8; 16];
        write_le_u16(&mut buf, 0, 0x1234).unwrap();
        write_le_u32(&mut buf, 2, 0x5678_9ABC).unwrap();
        write_le_u64(&mut buf, 6, 0xDEAD_BEEF_CAFE_F00D).unwrap();

        assert_eq!(read_le_u16(&buf, 0).unwrap(), 0x1234);
        assert_eq!(read_le_u32(&buf, 2).unwrap(), 0x5678_9ABC);
        assert_eq!(read_le_u64(&buf, 6).unwrap(), 0xDEAD_BEEF_CAFE_F00D);
    }

    #[test]
    fn read_out_of_bounds_reports_actual() {
        let buf = [0_u8; 4];
        let err = read_le_u64(&buf, 2).unwrap_err();
        assert_eq!(
            err,
            LayoutError::InsufficientData {
                needed: 8,
                offset: 2,
                actual: 2,
            }
        );
    }

    #[test]
    fn write_out_of_bounds_fails() {
        let mut buf = [0_u8; 4];
        assert!(write_le_u64(&mut buf, 0, 1).is_err());
        assert!(write_le_u16(&mut buf, usize::MAX, 1).is_err());
    }

    #[test]
    fn file_kind_mode_round_trip() {
        assert_eq!(FileKind::from_mode(S_IFREG | 0o644), Some(FileKind::Regular));
        assert_eq!(
            FileKind::from_mode(S_IFDIR | 0o755),
            Some(FileKind::Directory)
        );
        // Symlink bits are not a supported kind.
        assert_eq!(FileKind::from_mode(0o120_777), None);
        assert_eq!(FileKind::Regular.type_bits(), S_IFREG);
        assert_eq!(FileKind::Directory.type_bits(), S_IFDIR);
    }

    #[test]
    fn leaf_name_validation() {
        assert!(LeafName::new("a").is_ok());
        assert!(LeafName::new(&"x".repeat(NAME_MAX)).is_ok());
        assert!(matches!(
            LeafName::new(&"x".repeat(NAME_MAX + 1)),
            Err(LayoutError::NameTooLong { .. })
        ));
        assert!(LeafName::new("").is_err());
        assert!(LeafName::new("a/b").is_err());
        // The sentinel is the one name allowed to contain a slash.
        assert!(LeafName::new("/").unwrap().is_root());
    }

    #[test]
    fn parent_path_validation() {
        assert!(ParentPath::new("/").unwrap().is_root());
        assert!(ParentPath::new("/a/b").is_ok());
        assert!(ParentPath::new("relative").is_err());
        assert!(ParentPath::new("/a/").is_err());
        let long = format!("/{}", "y".repeat(PARENT_MAX));
        assert!(matches!(
            ParentPath::new(&long),
            Err(LayoutError::NameTooLong { .. })
        ));
    }

    #[test]
    fn heap_offset_none_sentinel() {
        assert!(HeapOffset::NONE.is_none());
        assert!(!HeapOffset(DATA_BASE).is_none());
        assert_eq!(HeapOffset(u64::MAX).checked_add(1), None);
        assert_eq!(HeapOffset(1).checked_add(2), Some(HeapOffset(3)));
    }

    #[test]
    fn slot_index_byte_offset() {
        assert_eq!(SlotIndex(0).byte_offset(), 0);
        assert_eq!(SlotIndex(1).byte_offset(), RECORD_SIZE as u64);
        assert_eq!(SlotIndex(31).byte_offset(), 31 * RECORD_SIZE as u64);
    }

    #[test]
    fn geometry_constants_are_consistent() {
        // The record grid must tile the page exactly.
        assert_eq!(u64::from(RECORDS_PER_PAGE) * RECORD_SIZE as u64, PAGE_BYTES);
        // Data offsets must be disjoint from the reserved metadata range.
        assert!(DATA_BASE > INODE_BASE + u64::from(INODE_PAGES));
        // Name regions plus the fixed header fit the slot.
        assert!(NAME_MAX + PARENT_MAX < RECORD_SIZE);
    }

    #[test]
    fn timespec_from_system_time() {
        let t = TimeSpec::from(SystemTime::UNIX_EPOCH + Duration::new(5, 7));
        assert_eq!(t, TimeSpec { secs: 5, nanos: 7 });
        let back: SystemTime = t.into();
        assert_eq!(back, SystemTime::UNIX_EPOCH + Duration::new(5, 7));
        // Pre-epoch clamps instead of panicking.
        let before = SystemTime::UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(TimeSpec::from(before), TimeSpec::default());
    }
}
