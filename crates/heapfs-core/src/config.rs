//! Mount-time configuration: the reserved heap layout.

use heapfs_error::{HeapFsError, Result};
use heapfs_types::{BLOCK_SIZE, DATA_BASE, INODE_BASE, INODE_PAGES, RECORD_SIZE};

/// Layout geometry the engine is mounted with.
///
/// The defaults are the fixed layout constants; tests shrink the table or
/// move the data range to exercise exhaustion paths. The geometry is written
/// into the superblock at first mount and validated against it on every
/// remount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapFsConfig {
    /// Fixed data-block size in bytes.
    pub block_size: u64,
    /// First heap offset of the inode-table range.
    pub inode_base: u64,
    /// Number of reserved inode-table pages.
    pub inode_pages: u32,
    /// First heap offset eligible for data blocks; the allocation watermark
    /// starts here.
    pub data_base: u64,
}

impl Default for HeapFsConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            inode_base: INODE_BASE,
            inode_pages: INODE_PAGES,
            data_base: DATA_BASE,
        }
    }
}

impl HeapFsConfig {
    /// Validate the geometry before any heap access.
    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two() || self.block_size < RECORD_SIZE as u64 {
            return Err(HeapFsError::Format(format!(
                "block_size {} must be a power of two of at least {}",
                self.block_size, RECORD_SIZE
            )));
        }
        if self.inode_pages == 0 {
            return Err(HeapFsError::Format("inode_pages must be nonzero".to_owned()));
        }
        if self.inode_base == 0 {
            return Err(HeapFsError::Format(
                "inode_base collides with the superblock offset".to_owned(),
            ));
        }
        let Some(inode_end) = self.inode_base.checked_add(u64::from(self.inode_pages)) else {
            return Err(HeapFsError::Format("inode range overflows u64".to_owned()));
        };
        if self.data_base < inode_end {
            return Err(HeapFsError::Format(format!(
                "data_base {} overlaps the reserved range ending at {inode_end}",
                self.data_base
            )));
        }
        Ok(())
    }

    /// One past the last inode-table page offset.
    #[must_use]
    pub fn inode_end(&self) -> u64 {
        self.inode_base + u64::from(self.inode_pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        HeapFsConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_block_size() {
        let mut cfg = HeapFsConfig::default();
        cfg.block_size = 3000;
        assert!(cfg.validate().is_err());
        cfg.block_size = 128; // smaller than a record slot
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_overlapping_ranges() {
        let mut cfg = HeapFsConfig::default();
        cfg.data_base = cfg.inode_base + 2;
        assert!(cfg.validate().is_err());

        cfg = HeapFsConfig::default();
        cfg.inode_base = 0;
        assert!(cfg.validate().is_err());

        cfg = HeapFsConfig::default();
        cfg.inode_pages = 0;
        assert!(cfg.validate().is_err());
    }
}
