//! The engine: composes the resolver, table, ACL, and chain store into the
//! operation surface a call adapter consumes.
//!
//! Every mutating and content operation resolves its path, gates the caller
//! through [`acl::permitted`], and returns a typed error on failure; nothing
//! is retried internally. Operations the minimal engine does not implement
//! (symlinks, hard links, truncate) fail with `Unsupported` so an adapter
//! can map them to its host's convention.

use crate::acl::{self, Credentials};
use crate::bootstrap::{self, BootstrapOutcome};
use crate::chain::BlockChainStore;
use crate::config::HeapFsConfig;
use crate::path;
use crate::table::{InodeTable, SlotId};
use heapfs_error::{HeapFsError, Result};
use heapfs_heap::HeapDevice;
use heapfs_types::{
    FileKind, InodeRecord, LeafName, ParentPath, TimeSpec, MODE_PERM_MASK, NAME_MAX, S_IFMT,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File-status view of an inode record, as returned by `getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeAttr {
    pub kind: FileKind,
    /// Permission bits only; the type lives in `kind`.
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Blocks the content spans at the engine's block size.
    pub blocks: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

/// Filesystem-wide statistics derived from the bounded table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub name_max: u32,
}

/// A mounted heapfs engine in the Serving state.
pub struct HeapFs {
    table: InodeTable,
    chains: BlockChainStore,
    block_size: u64,
}

impl HeapFs {
    /// Validate the layout, run bootstrap, and start serving.
    ///
    /// `creds` become the root inode's owner when the heap is empty.
    pub fn mount(
        heap: Arc<dyn HeapDevice>,
        config: HeapFsConfig,
        creds: Credentials,
    ) -> Result<Self> {
        config.validate()?;
        let outcome = bootstrap::ensure_root(&*heap, &config, creds)?;
        let fs = Self {
            table: InodeTable::new(Arc::clone(&heap), &config),
            chains: BlockChainStore::new(heap, &config),
            block_size: config.block_size,
        };

        if outcome == BootstrapOutcome::Recovered {
            // Chain links are process-local; a remount keeps only each
            // file's first block reachable.
            let clipped = fs
                .table
                .live_records()?
                .iter()
                .filter(|(_, r)| !r.is_dir() && r.size > fs.block_size)
                .count();
            if clipped > 0 {
                warn!(
                    files = clipped,
                    "remount found multi-block files; chain links past the first block were not persisted and are lost"
                );
            }
        }
        info!(?outcome, block_size = fs.block_size, "heapfs serving");
        Ok(fs)
    }

    /// Create a regular file.
    pub fn create(&self, path: &str, perm: u16, creds: Credentials) -> Result<()> {
        self.create_entry(path, FileKind::Regular, perm, creds)
    }

    /// Create a directory.
    pub fn mkdir(&self, path: &str, perm: u16, creds: Credentials) -> Result<()> {
        self.create_entry(path, FileKind::Directory, perm, creds)
    }

    /// Remove a regular file, releasing its inode slot and every block of
    /// its data chain.
    pub fn unlink(&self, path: &str, creds: Credentials) -> Result<()> {
        let (parent, leaf) = path::resolve(path)?;
        if leaf.is_root() {
            return Err(HeapFsError::IsDirectory);
        }
        let (slot, record) = self.table.find(&parent, &leaf)?;
        if record.is_dir() {
            return Err(HeapFsError::IsDirectory);
        }
        if !acl::permitted(&record, creds) {
            return Err(HeapFsError::PermissionDenied);
        }
        self.chains.release(record.first_block)?;
        self.table.delete(slot)?;
        debug!(path, "unlinked");
        Ok(())
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, path: &str, creds: Credentials) -> Result<()> {
        let (parent, leaf) = path::resolve(path)?;
        if leaf.is_root() {
            return Err(HeapFsError::InvalidPath(path.to_owned()));
        }
        let (slot, record) = self.table.find(&parent, &leaf)?;
        if !record.is_dir() {
            return Err(HeapFsError::NotDirectory);
        }
        if !acl::permitted(&record, creds) {
            return Err(HeapFsError::PermissionDenied);
        }
        if let Some(dir) = Self::as_parent_path(&parent, &leaf) {
            if !self.table.list(&dir)?.is_empty() {
                return Err(HeapFsError::NotEmpty);
            }
        }
        self.table.delete(slot)?;
        self.bump_dir_nlink(&parent, -1)?;
        debug!(path, "removed directory");
        Ok(())
    }

    /// File-status metadata for any live entry, the root included.
    pub fn getattr(&self, path: &str) -> Result<InodeAttr> {
        let (_, record) = self.lookup(path)?;
        Ok(self.attr_of(&record))
    }

    /// Rename an entry: an in-place update of its (parent, leaf) pair.
    /// Metadata and the data chain are untouched.
    pub fn rename(&self, from: &str, to: &str, creds: Credentials) -> Result<()> {
        let (from_parent, from_leaf) = path::resolve(from)?;
        if from_leaf.is_root() {
            return Err(HeapFsError::InvalidPath(from.to_owned()));
        }
        let (slot, mut record) = self.table.find(&from_parent, &from_leaf)?;
        if !acl::permitted(&record, creds) {
            return Err(HeapFsError::PermissionDenied);
        }

        let (to_parent, to_leaf) = path::resolve(to)?;
        if to_leaf.is_root() {
            return Err(HeapFsError::Exists);
        }
        self.dir_record_of(&to_parent)?;
        if to_parent == record.parent && to_leaf == record.leaf {
            return Ok(());
        }
        if self.table.contains(&to_parent, &to_leaf)? {
            return Err(HeapFsError::Exists);
        }

        let was_dir = record.is_dir();
        let old_parent = record.parent.clone();
        record.parent = to_parent.clone();
        record.leaf = to_leaf;
        record.ctime = TimeSpec::now();
        self.table.update(slot, &record)?;

        // A directory contributes a ".." link to its parent.
        if was_dir && old_parent != to_parent {
            self.bump_dir_nlink(&old_parent, -1)?;
            self.bump_dir_nlink(&to_parent, 1)?;
        }
        debug!(from, to, "renamed");
        Ok(())
    }

    /// Read up to `len` bytes at `offset`. Short reads at end of file are
    /// not an error.
    pub fn read(&self, path: &str, offset: u64, len: usize, creds: Credentials) -> Result<Vec<u8>> {
        let (_, record) = self.lookup(path)?;
        if record.is_dir() {
            return Err(HeapFsError::IsDirectory);
        }
        if !acl::permitted(&record, creds) {
            return Err(HeapFsError::PermissionDenied);
        }
        self.chains.read(record.first_block, record.size, offset, len)
    }

    /// Write `data` at `offset`, growing the chain as needed. Returns the
    /// number of bytes written and updates size, mtime, and ctime.
    pub fn write(&self, path: &str, offset: u64, data: &[u8], creds: Credentials) -> Result<usize> {
        let (slot, mut record) = self.lookup(path)?;
        if record.is_dir() {
            return Err(HeapFsError::IsDirectory);
        }
        if !acl::permitted(&record, creds) {
            return Err(HeapFsError::PermissionDenied);
        }
        let outcome = self
            .chains
            .write(record.first_block, record.size, offset, data)?;
        record.first_block = outcome.first_block;
        record.size = outcome.new_size;
        let now = TimeSpec::now();
        record.mtime = now;
        record.ctime = now;
        self.table.update(slot, &record)?;
        Ok(outcome.written)
    }

    /// List a directory: every live slot whose parent path equals the
    /// resolved directory, in table scan order.
    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let (_, record) = self.lookup(path)?;
        if !record.is_dir() {
            return Err(HeapFsError::NotDirectory);
        }
        let Some(dir) = Self::as_parent_path(&record.parent, &record.leaf) else {
            // A directory whose own path exceeds the parent bound can hold
            // no children.
            return Ok(Vec::new());
        };
        Ok(self
            .table
            .list(&dir)?
            .into_iter()
            .map(|r| DirEntry {
                name: r.leaf.as_str().to_owned(),
                kind: r.kind(),
            })
            .collect())
    }

    /// Change permission bits, preserving the file-type bits.
    pub fn chmod(&self, path: &str, perm: u16, creds: Credentials) -> Result<()> {
        let (slot, mut record) = self.lookup(path)?;
        if !acl::permitted(&record, creds) {
            return Err(HeapFsError::PermissionDenied);
        }
        record.mode = (record.mode & S_IFMT) | (perm & MODE_PERM_MASK);
        record.ctime = TimeSpec::now();
        self.table.update(slot, &record)
    }

    /// Change owner and/or group.
    pub fn chown(
        &self,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        creds: Credentials,
    ) -> Result<()> {
        let (slot, mut record) = self.lookup(path)?;
        if !acl::permitted(&record, creds) {
            return Err(HeapFsError::PermissionDenied);
        }
        if let Some(uid) = uid {
            record.uid = uid;
        }
        if let Some(gid) = gid {
            record.gid = gid;
        }
        record.ctime = TimeSpec::now();
        self.table.update(slot, &record)
    }

    /// Set access and/or modification times.
    pub fn utimens(
        &self,
        path: &str,
        atime: Option<TimeSpec>,
        mtime: Option<TimeSpec>,
        creds: Credentials,
    ) -> Result<()> {
        let (slot, mut record) = self.lookup(path)?;
        if !acl::permitted(&record, creds) {
            return Err(HeapFsError::PermissionDenied);
        }
        if let Some(atime) = atime {
            record.atime = atime;
        }
        if let Some(mtime) = mtime {
            record.mtime = mtime;
        }
        record.ctime = TimeSpec::now();
        self.table.update(slot, &record)
    }

    /// Totals derived from the bounded inode table.
    pub fn statfs(&self) -> Result<FsStats> {
        let live = self.table.live_records()?.len() as u64;
        let total = self.table.capacity();
        Ok(FsStats {
            block_size: self.block_size,
            total_inodes: total,
            free_inodes: total.saturating_sub(live),
            name_max: NAME_MAX as u32,
        })
    }

    pub fn symlink(&self, _target: &str, _link: &str, _creds: Credentials) -> Result<()> {
        Err(HeapFsError::Unsupported("symlink"))
    }

    pub fn readlink(&self, _path: &str) -> Result<String> {
        Err(HeapFsError::Unsupported("readlink"))
    }

    pub fn link(&self, _existing: &str, _new: &str, _creds: Credentials) -> Result<()> {
        Err(HeapFsError::Unsupported("link"))
    }

    pub fn truncate(&self, _path: &str, _size: u64, _creds: Credentials) -> Result<()> {
        Err(HeapFsError::Unsupported("truncate"))
    }

    /// Chain length of a file, for integrity checks.
    pub fn chain_blocks(&self, path: &str) -> Result<u64> {
        let (_, record) = self.lookup(path)?;
        if record.is_dir() {
            return Err(HeapFsError::IsDirectory);
        }
        self.chains.chain_len(record.first_block)
    }

    // ── internals ──────────────────────────────────────────────────────

    fn lookup(&self, path: &str) -> Result<(SlotId, InodeRecord)> {
        let (parent, leaf) = path::resolve(path)?;
        if leaf.is_root() {
            self.table.root()
        } else {
            self.table.find(&parent, &leaf)
        }
    }

    /// Record of the directory whose full path is `dir`.
    fn dir_record_of(&self, dir: &ParentPath) -> Result<(SlotId, InodeRecord)> {
        if dir.is_root() {
            return self.table.root();
        }
        let (parent, leaf) = path::resolve(dir.as_str())?;
        let (slot, record) = self.table.find(&parent, &leaf)?;
        if !record.is_dir() {
            return Err(HeapFsError::NotDirectory);
        }
        Ok((slot, record))
    }

    fn create_entry(
        &self,
        path: &str,
        kind: FileKind,
        perm: u16,
        creds: Credentials,
    ) -> Result<()> {
        let (parent, leaf) = path::resolve(path)?;
        if leaf.is_root() {
            return Err(HeapFsError::Exists);
        }
        let (_, parent_record) = self.dir_record_of(&parent)?;
        if !acl::permitted(&parent_record, creds) {
            return Err(HeapFsError::PermissionDenied);
        }
        if self.table.contains(&parent, &leaf)? {
            return Err(HeapFsError::Exists);
        }
        let record = InodeRecord::new(
            parent.clone(),
            leaf,
            kind,
            perm,
            creds.uid,
            creds.gid,
            TimeSpec::now(),
        );
        self.table.allocate(&record)?;
        if kind == FileKind::Directory {
            self.bump_dir_nlink(&parent, 1)?;
        }
        debug!(path, ?kind, "created entry");
        Ok(())
    }

    /// The (parent, leaf) pair of a directory turned into the parent-path
    /// value its children carry. `None` when the joined path exceeds the
    /// record bound; such a directory cannot hold children at all.
    fn as_parent_path(parent: &ParentPath, leaf: &LeafName) -> Option<ParentPath> {
        ParentPath::new(&path::join_display(parent, leaf)).ok()
    }

    fn bump_dir_nlink(&self, dir: &ParentPath, delta: i32) -> Result<()> {
        let (slot, mut record) = self.dir_record_of(dir)?;
        record.nlink = if delta >= 0 {
            record.nlink.saturating_add(delta.unsigned_abs())
        } else {
            record.nlink.saturating_sub(delta.unsigned_abs())
        };
        record.ctime = TimeSpec::now();
        self.table.update(slot, &record)
    }

    fn attr_of(&self, record: &InodeRecord) -> InodeAttr {
        InodeAttr {
            kind: record.kind(),
            perm: record.mode & MODE_PERM_MASK,
            nlink: record.nlink,
            uid: record.uid,
            gid: record.gid,
            size: record.size,
            blocks: record.size.div_ceil(self.block_size),
            atime: record.atime,
            mtime: record.mtime,
            ctime: record.ctime,
        }
    }
}
