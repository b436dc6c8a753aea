//! Fixed-layout codecs for the on-heap structures: the 256-byte inode
//! record slot and the superblock.
//!
//! All fields are little-endian. A slot is free iff its `leaf_len` field is
//! zero; `delete` zeroes the whole slot, so a freshly allocated (zeroed)
//! page reads back as all-free.

use crate::{
    ensure_slice, read_le_u16, read_le_u32, read_le_u64, write_le_u16, write_le_u32,
    write_le_u64, FileKind, HeapOffset, LayoutError, LeafName, ParentPath, TimeSpec,
    FORMAT_VERSION, HEAPFS_MAGIC, NAME_MAX, PARENT_MAX,
};

/// Size of one inode record slot in bytes.
pub const RECORD_SIZE: usize = 256;

/// Bytes reserved for the superblock allocation.
pub const SUPERBLOCK_BYTES: u64 = 64;

// Record field offsets.
const OFF_LEAF_LEN: usize = 0;
const OFF_PARENT_LEN: usize = 2;
const OFF_MODE: usize = 4;
const OFF_UID: usize = 8;
const OFF_GID: usize = 12;
const OFF_NLINK: usize = 16;
const OFF_SIZE: usize = 24;
const OFF_FIRST_BLOCK: usize = 32;
const OFF_ATIME_SECS: usize = 40;
const OFF_MTIME_SECS: usize = 48;
const OFF_CTIME_SECS: usize = 56;
const OFF_ATIME_NANOS: usize = 64;
const OFF_MTIME_NANOS: usize = 68;
const OFF_CTIME_NANOS: usize = 72;
const OFF_LEAF: usize = 80;
const OFF_PARENT: usize = OFF_LEAF + NAME_MAX;

/// One inode-table entry: the denormalized (parent, leaf) pair plus the
/// standard file-status metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeRecord {
    pub parent: ParentPath,
    pub leaf: LeafName,
    /// Full mode word: file-type bits plus permission bits.
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    /// Logical file size in bytes; 0 for directories.
    pub size: u64,
    /// First block of the data chain; [`HeapOffset::NONE`] when the file has
    /// no content yet. Meaningful only for regular files.
    pub first_block: HeapOffset,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

impl InodeRecord {
    /// Build a fresh record for a newly created entry.
    #[must_use]
    pub fn new(
        parent: ParentPath,
        leaf: LeafName,
        kind: FileKind,
        perm: u16,
        uid: u32,
        gid: u32,
        now: TimeSpec,
    ) -> Self {
        let nlink = match kind {
            FileKind::Regular => 1,
            FileKind::Directory => 2,
        };
        Self {
            parent,
            leaf,
            mode: kind.type_bits() | (perm & crate::MODE_PERM_MASK),
            uid,
            gid,
            nlink,
            size: 0,
            first_block: HeapOffset::NONE,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        // The mode bits are validated at decode and construction time.
        if self.mode & crate::S_IFMT == crate::S_IFDIR {
            FileKind::Directory
        } else {
            FileKind::Regular
        }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    /// Serialize into a record slot. `slot` must be at least
    /// [`RECORD_SIZE`] bytes; the slot is fully overwritten.
    pub fn encode_into(&self, slot: &mut [u8]) -> Result<(), LayoutError> {
        if slot.len() < RECORD_SIZE {
            return Err(LayoutError::InsufficientData {
                needed: RECORD_SIZE,
                offset: 0,
                actual: slot.len(),
            });
        }
        let leaf = self.leaf.as_str().as_bytes();
        let parent = self.parent.as_str().as_bytes();
        debug_assert!(leaf.len() <= NAME_MAX && parent.len() <= PARENT_MAX);

        let slot = &mut slot[..RECORD_SIZE];
        slot.fill(0);
        // Lengths fit their fields: NAME_MAX and PARENT_MAX are far below u16::MAX.
        write_le_u16(slot, OFF_LEAF_LEN, leaf.len() as u16)?;
        write_le_u16(slot, OFF_PARENT_LEN, parent.len() as u16)?;
        write_le_u16(slot, OFF_MODE, self.mode)?;
        write_le_u32(slot, OFF_UID, self.uid)?;
        write_le_u32(slot, OFF_GID, self.gid)?;
        write_le_u32(slot, OFF_NLINK, self.nlink)?;
        write_le_u64(slot, OFF_SIZE, self.size)?;
        write_le_u64(slot, OFF_FIRST_BLOCK, self.first_block.0)?;
        write_le_u64(slot, OFF_ATIME_SECS, self.atime.secs)?;
        write_le_u64(slot, OFF_MTIME_SECS, self.mtime.secs)?;
        write_le_u64(slot, OFF_CTIME_SECS, self.ctime.secs)?;
        write_le_u32(slot, OFF_ATIME_NANOS, self.atime.nanos)?;
        write_le_u32(slot, OFF_MTIME_NANOS, self.mtime.nanos)?;
        write_le_u32(slot, OFF_CTIME_NANOS, self.ctime.nanos)?;
        slot[OFF_LEAF..OFF_LEAF + leaf.len()].copy_from_slice(leaf);
        slot[OFF_PARENT..OFF_PARENT + parent.len()].copy_from_slice(parent);
        Ok(())
    }

    /// Deserialize a record slot. Returns `Ok(None)` for a free slot
    /// (`leaf_len == 0`).
    pub fn decode(slot: &[u8]) -> Result<Option<Self>, LayoutError> {
        let leaf_len = usize::from(read_le_u16(slot, OFF_LEAF_LEN)?);
        if leaf_len == 0 {
            return Ok(None);
        }
        if leaf_len > NAME_MAX {
            return Err(LayoutError::InvalidField {
                field: "leaf_len",
                reason: "exceeds NAME_MAX",
            });
        }
        let parent_len = usize::from(read_le_u16(slot, OFF_PARENT_LEN)?);
        if parent_len > PARENT_MAX {
            return Err(LayoutError::InvalidField {
                field: "parent_len",
                reason: "exceeds PARENT_MAX",
            });
        }

        let mode = read_le_u16(slot, OFF_MODE)?;
        if FileKind::from_mode(mode).is_none() {
            return Err(LayoutError::InvalidField {
                field: "mode",
                reason: "unknown file-type bits",
            });
        }

        let leaf_bytes = ensure_slice(slot, OFF_LEAF, leaf_len)?;
        let leaf_str = std::str::from_utf8(leaf_bytes).map_err(|_| LayoutError::InvalidField {
            field: "leaf_name",
            reason: "not utf-8",
        })?;
        let parent_bytes = ensure_slice(slot, OFF_PARENT, parent_len)?;
        let parent_str =
            std::str::from_utf8(parent_bytes).map_err(|_| LayoutError::InvalidField {
                field: "parent_path",
                reason: "not utf-8",
            })?;

        Ok(Some(Self {
            parent: ParentPath::new(parent_str)?,
            leaf: LeafName::new(leaf_str)?,
            mode,
            uid: read_le_u32(slot, OFF_UID)?,
            gid: read_le_u32(slot, OFF_GID)?,
            nlink: read_le_u32(slot, OFF_NLINK)?,
            size: read_le_u64(slot, OFF_SIZE)?,
            first_block: HeapOffset(read_le_u64(slot, OFF_FIRST_BLOCK)?),
            atime: TimeSpec {
                secs: read_le_u64(slot, OFF_ATIME_SECS)?,
                nanos: read_le_u32(slot, OFF_ATIME_NANOS)?,
            },
            mtime: TimeSpec {
                secs: read_le_u64(slot, OFF_MTIME_SECS)?,
                nanos: read_le_u32(slot, OFF_MTIME_NANOS)?,
            },
            ctime: TimeSpec {
                secs: read_le_u64(slot, OFF_CTIME_SECS)?,
                nanos: read_le_u32(slot, OFF_CTIME_NANOS)?,
            },
        }))
    }
}

// Superblock field offsets.
const SB_OFF_MAGIC: usize = 0;
const SB_OFF_VERSION: usize = 8;
const SB_OFF_INODE_PAGES: usize = 12;
const SB_OFF_BLOCK_SIZE: usize = 16;
const SB_OFF_INODE_BASE: usize = 24;
const SB_OFF_DATA_BASE: usize = 32;
const SB_ENCODED_LEN: usize = 40;

/// The superblock stored at [`crate::SUPERBLOCK_OFFSET`]: magic, format
/// version, and the layout geometry the table and chain store were built
/// with. A remount validates it against the mount configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub block_size: u64,
    pub inode_base: u64,
    pub inode_pages: u32,
    pub data_base: u64,
}

impl Superblock {
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<(), LayoutError> {
        if buf.len() < SB_ENCODED_LEN {
            return Err(LayoutError::InsufficientData {
                needed: SB_ENCODED_LEN,
                offset: 0,
                actual: buf.len(),
            });
        }
        buf[..SB_ENCODED_LEN].fill(0);
        write_le_u64(buf, SB_OFF_MAGIC, HEAPFS_MAGIC)?;
        write_le_u32(buf, SB_OFF_VERSION, FORMAT_VERSION)?;
        write_le_u32(buf, SB_OFF_INODE_PAGES, self.inode_pages)?;
        write_le_u64(buf, SB_OFF_BLOCK_SIZE, self.block_size)?;
        write_le_u64(buf, SB_OFF_INODE_BASE, self.inode_base)?;
        write_le_u64(buf, SB_OFF_DATA_BASE, self.data_base)?;
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        let magic = read_le_u64(buf, SB_OFF_MAGIC)?;
        if magic != HEAPFS_MAGIC {
            return Err(LayoutError::InvalidMagic {
                expected: HEAPFS_MAGIC,
                actual: magic,
            });
        }
        let version = read_le_u32(buf, SB_OFF_VERSION)?;
        if version != FORMAT_VERSION {
            return Err(LayoutError::InvalidField {
                field: "version",
                reason: "unsupported format version",
            });
        }
        Ok(Self {
            inode_pages: read_le_u32(buf, SB_OFF_INODE_PAGES)?,
            block_size: read_le_u64(buf, SB_OFF_BLOCK_SIZE)?,
            inode_base: read_le_u64(buf, SB_OFF_INODE_BASE)?,
            data_base: read_le_u64(buf, SB_OFF_DATA_BASE)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{S_IFDIR, S_IFREG};

    fn sample_record() -> InodeRecord {
        InodeRecord::new(
            ParentPath::new("/srv").unwrap(),
            LeafName::new("report.txt").unwrap(),
            FileKind::Regular,
            0o640,
            1000,
            100,
            TimeSpec {
                secs: 1_700_000_000,
                nanos: 123,
            },
        )
    }

    #[test]
    fn record_round_trip() {
        let mut rec = sample_record();
        rec.size = 20000;
        rec.first_block = HeapOffset(0x1_0000);
        rec.nlink = 1;

        let mut slot = [0_u8; RECORD_SIZE];
        rec.encode_into(&mut slot).unwrap();
        let back = InodeRecord::decode(&slot).unwrap().expect("occupied");
        assert_eq!(back, rec);
    }

    #[test]
    fn zeroed_slot_is_free() {
        let slot = [0_u8; RECORD_SIZE];
        assert_eq!(InodeRecord::decode(&slot).unwrap(), None);
    }

    #[test]
    fn new_record_defaults() {
        let rec = sample_record();
        assert_eq!(rec.mode, S_IFREG | 0o640);
        assert_eq!(rec.nlink, 1);
        assert_eq!(rec.size, 0);
        assert!(rec.first_block.is_none());

        let dir = InodeRecord::new(
            ParentPath::root(),
            LeafName::new("etc").unwrap(),
            FileKind::Directory,
            0o755,
            0,
            0,
            TimeSpec::default(),
        );
        assert_eq!(dir.mode, S_IFDIR | 0o755);
        assert_eq!(dir.nlink, 2);
        assert!(dir.is_dir());
    }

    #[test]
    fn root_sentinel_round_trip() {
        let root = InodeRecord::new(
            ParentPath::root(),
            LeafName::root(),
            FileKind::Directory,
            0o755,
            0,
            0,
            TimeSpec::default(),
        );
        let mut slot = [0_u8; RECORD_SIZE];
        root.encode_into(&mut slot).unwrap();
        let back = InodeRecord::decode(&slot).unwrap().expect("occupied");
        assert!(back.leaf.is_root());
        assert!(back.parent.is_root());
        assert!(back.is_dir());
    }

    #[test]
    fn decode_rejects_bad_mode() {
        let mut slot = [0_u8; RECORD_SIZE];
        sample_record().encode_into(&mut slot).unwrap();
        // Clobber the file-type bits with symlink bits.
        write_le_u16(&mut slot, 4, 0o120_644).unwrap();
        assert!(matches!(
            InodeRecord::decode(&slot),
            Err(LayoutError::InvalidField { field: "mode", .. })
        ));
    }

    #[test]
    fn decode_rejects_oversized_lengths() {
        let mut slot = [0_u8; RECORD_SIZE];
        sample_record().encode_into(&mut slot).unwrap();
        write_le_u16(&mut slot, 0, (NAME_MAX + 1) as u16).unwrap();
        assert!(InodeRecord::decode(&slot).is_err());
    }

    #[test]
    fn decode_short_slot_fails() {
        let slot = [1_u8; 16];
        assert!(InodeRecord::decode(&slot).is_err());
    }

    #[test]
    fn encode_needs_full_slot() {
        let mut slot = [0_u8; RECORD_SIZE - 1];
        assert!(sample_record().encode_into(&mut slot).is_err());
    }

    #[test]
    fn superblock_round_trip() {
        let sb = Superblock {
            block_size: crate::BLOCK_SIZE,
            inode_base: crate::INODE_BASE,
            inode_pages: crate::INODE_PAGES,
            data_base: crate::DATA_BASE,
        };
        let mut buf = [0_u8; SUPERBLOCK_BYTES as usize];
        sb.encode_into(&mut buf).unwrap();
        assert_eq!(Superblock::decode(&buf).unwrap(), sb);
    }

    #[test]
    fn superblock_rejects_wrong_magic() {
        let mut buf = [0_u8; SUPERBLOCK_BYTES as usize];
        Superblock {
            block_size: crate::BLOCK_SIZE,
            inode_base: crate::INODE_BASE,
            inode_pages: crate::INODE_PAGES,
            data_base: crate::DATA_BASE,
        }
        .encode_into(&mut buf)
        .unwrap();
        buf[0] ^= 0xFF;
        assert!(matches!(
            Superblock::decode(&buf),
            Err(LayoutError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn superblock_rejects_unknown_version() {
        let mut buf = [0_u8; SUPERBLOCK_BYTES as usize];
        Superblock {
            block_size: crate::BLOCK_SIZE,
            inode_base: crate::INODE_BASE,
            inode_pages: crate::INODE_PAGES,
            data_base: crate::DATA_BASE,
        }
        .encode_into(&mut buf)
        .unwrap();
        write_le_u32(&mut buf, 8, 99).unwrap();
        assert!(matches!(
            Superblock::decode(&buf),
            Err(LayoutError::InvalidField {
                field: "version",
                ..
            })
        ));
    }
}
