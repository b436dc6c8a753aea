//! One-time initialization of the reserved superblock / inode-table region
//! and the root directory inode.

use crate::acl::Credentials;
use crate::config::HeapFsConfig;
use heapfs_error::{HeapFsError, Result};
use heapfs_heap::{HeapDevice, HeapLockGuard};
use heapfs_types::{
    FileKind, HeapOffset, InodeRecord, LeafName, ParentPath, Superblock, TimeSpec, PAGE_BYTES,
    RECORD_SIZE, SUPERBLOCK_BYTES, SUPERBLOCK_OFFSET,
};
use tracing::{debug, info};

/// What `ensure_root` found on the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The reserved region was empty and has been initialized.
    Initialized,
    /// A valid superblock was already present; nothing was modified.
    Recovered,
}

/// Idempotent bootstrap, called once at mount time.
///
/// A nonzero allocation at the superblock offset means the table already
/// exists: the superblock is validated against `config` and the heap is left
/// untouched (recoverable restart). Otherwise every reserved page is
/// allocated and zeroed, the root inode is written, and the superblock is
/// written last as the commit point. The whole sequence runs under the
/// superblock offset's advisory lock, so concurrent mounts serialize.
pub fn ensure_root(
    heap: &dyn HeapDevice,
    config: &HeapFsConfig,
    creds: Credentials,
) -> Result<BootstrapOutcome> {
    let sb_offset = HeapOffset(SUPERBLOCK_OFFSET);
    let _guard = HeapLockGuard::acquire(heap, sb_offset);

    if heap.size_of(sb_offset)? > 0 {
        let mut buf = vec![0_u8; SUPERBLOCK_BYTES as usize];
        if heap.size_of(sb_offset)? < SUPERBLOCK_BYTES {
            return Err(HeapFsError::Format("superblock truncated".to_owned()));
        }
        heap.read_at(sb_offset, 0, &mut buf)?;
        let sb = Superblock::decode(&buf).map_err(|err| HeapFsError::Format(err.to_string()))?;
        check_geometry(&sb, config)?;
        verify_root_record(heap, config)?;
        debug!("existing superblock validated, reusing table");
        return Ok(BootstrapOutcome::Recovered);
    }

    // Zero the pages explicitly: a bootstrap that died before its commit
    // point may have left partial state behind.
    let zeros = vec![0_u8; PAGE_BYTES as usize];
    for i in 0..u64::from(config.inode_pages) {
        let page = HeapOffset(config.inode_base + i);
        heap.alloc(page, PAGE_BYTES)?;
        heap.write_at(page, 0, &zeros)?;
    }

    let root = InodeRecord::new(
        ParentPath::root(),
        LeafName::root(),
        FileKind::Directory,
        0o755,
        creds.uid,
        creds.gid,
        TimeSpec::now(),
    );
    let mut slot = [0_u8; RECORD_SIZE];
    root.encode_into(&mut slot)
        .map_err(|err| HeapFsError::Format(err.to_string()))?;
    heap.write_at(HeapOffset(config.inode_base), 0, &slot)?;

    let sb = Superblock {
        block_size: config.block_size,
        inode_base: config.inode_base,
        inode_pages: config.inode_pages,
        data_base: config.data_base,
    };
    let mut buf = vec![0_u8; SUPERBLOCK_BYTES as usize];
    sb.encode_into(&mut buf)
        .map_err(|err| HeapFsError::Format(err.to_string()))?;
    heap.alloc(sb_offset, SUPERBLOCK_BYTES)?;
    heap.write_at(sb_offset, 0, &buf)?;

    info!(
        uid = creds.uid,
        gid = creds.gid,
        pages = config.inode_pages,
        "initialized empty heap: superblock, inode table, root inode"
    );
    Ok(BootstrapOutcome::Initialized)
}

fn check_geometry(sb: &Superblock, config: &HeapFsConfig) -> Result<()> {
    let expected = Superblock {
        block_size: config.block_size,
        inode_base: config.inode_base,
        inode_pages: config.inode_pages,
        data_base: config.data_base,
    };
    if *sb != expected {
        return Err(HeapFsError::Format(format!(
            "superblock geometry {sb:?} does not match mount configuration {expected:?}"
        )));
    }
    Ok(())
}

fn verify_root_record(heap: &dyn HeapDevice, config: &HeapFsConfig) -> Result<()> {
    let page = HeapOffset(config.inode_base);
    if heap.size_of(page)? < PAGE_BYTES {
        return Err(HeapFsError::Corruption {
            offset: page.0,
            detail: "inode table page missing or truncated".to_owned(),
        });
    }
    let mut slot = vec![0_u8; RECORD_SIZE];
    heap.read_at(page, 0, &mut slot)?;
    let record = InodeRecord::decode(&slot)
        .map_err(|err| HeapFsError::Corruption {
            offset: page.0,
            detail: err.to_string(),
        })?
        .ok_or_else(|| HeapFsError::Corruption {
            offset: page.0,
            detail: "root inode slot is empty".to_owned(),
        })?;
    if !record.leaf.is_root() || !record.parent.is_root() || !record.is_dir() {
        return Err(HeapFsError::Corruption {
            offset: page.0,
            detail: "root slot does not hold the sentinel directory".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapfs_heap::MemHeap;

    #[test]
    fn initializes_empty_heap() {
        let heap = MemHeap::new();
        let config = HeapFsConfig::default();
        let outcome = ensure_root(&heap, &config, Credentials::new(500, 500)).unwrap();
        assert_eq!(outcome, BootstrapOutcome::Initialized);

        assert_eq!(
            heap.size_of(HeapOffset(SUPERBLOCK_OFFSET)).unwrap(),
            SUPERBLOCK_BYTES
        );
        for i in 0..u64::from(config.inode_pages) {
            assert_eq!(
                heap.size_of(HeapOffset(config.inode_base + i)).unwrap(),
                PAGE_BYTES
            );
        }

        let mut slot = vec![0_u8; RECORD_SIZE];
        heap.read_at(HeapOffset(config.inode_base), 0, &mut slot)
            .unwrap();
        let root = InodeRecord::decode(&slot).unwrap().expect("root present");
        assert!(root.is_dir());
        assert_eq!(root.nlink, 2);
        assert_eq!(root.uid, 500);
        assert_eq!(root.gid, 500);
        assert_eq!(root.mode & 0o777, 0o755);
    }

    #[test]
    fn second_call_is_a_noop() {
        let heap = MemHeap::new();
        let config = HeapFsConfig::default();
        ensure_root(&heap, &config, Credentials::new(500, 500)).unwrap();

        // Different credentials must not rewrite the existing root.
        let outcome = ensure_root(&heap, &config, Credentials::new(42, 42)).unwrap();
        assert_eq!(outcome, BootstrapOutcome::Recovered);

        let mut slot = vec![0_u8; RECORD_SIZE];
        heap.read_at(HeapOffset(config.inode_base), 0, &mut slot)
            .unwrap();
        let root = InodeRecord::decode(&slot).unwrap().expect("root present");
        assert_eq!(root.uid, 500);
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        let heap = MemHeap::new();
        let config = HeapFsConfig::default();
        ensure_root(&heap, &config, Credentials::ROOT).unwrap();

        let other = HeapFsConfig {
            inode_pages: config.inode_pages + 1,
            ..config
        };
        let err = ensure_root(&heap, &other, Credentials::ROOT).unwrap_err();
        assert!(matches!(err, HeapFsError::Format(_)));
    }

    #[test]
    fn garbage_superblock_is_rejected() {
        let heap = MemHeap::new();
        let config = HeapFsConfig::default();
        heap.alloc(HeapOffset(SUPERBLOCK_OFFSET), SUPERBLOCK_BYTES)
            .unwrap();
        heap.write_at(HeapOffset(SUPERBLOCK_OFFSET), 0, &[0xAB; 16])
            .unwrap();

        let err = ensure_root(&heap, &config, Credentials::ROOT).unwrap_err();
        assert!(matches!(err, HeapFsError::Format(_)));
    }
}
