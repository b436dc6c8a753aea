//! Owner/root permission predicate.

use heapfs_types::InodeRecord;

/// Caller identity attached to every mutating and content operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub const ROOT: Self = Self { uid: 0, gid: 0 };

    #[must_use]
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

/// Whether `caller` may act on the inode. uid 0 or gid 0 bypasses the
/// ownership check; otherwise the caller must match the record's uid or gid.
///
/// Pure predicate; the engine translates `false` into `PermissionDenied`.
#[must_use]
pub fn permitted(record: &InodeRecord, caller: Credentials) -> bool {
    caller.uid == 0 || caller.gid == 0 || caller.uid == record.uid || caller.gid == record.gid
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapfs_types::{FileKind, LeafName, ParentPath, TimeSpec};

    fn record_owned_by(uid: u32, gid: u32) -> InodeRecord {
        InodeRecord::new(
            ParentPath::root(),
            LeafName::new("f").unwrap(),
            FileKind::Regular,
            0o600,
            uid,
            gid,
            TimeSpec::default(),
        )
    }

    #[test]
    fn owner_uid_match() {
        let rec = record_owned_by(1000, 1000);
        assert!(permitted(&rec, Credentials::new(1000, 2000)));
    }

    #[test]
    fn group_gid_match() {
        let rec = record_owned_by(1000, 1000);
        assert!(permitted(&rec, Credentials::new(2000, 1000)));
    }

    #[test]
    fn unrelated_caller_rejected() {
        let rec = record_owned_by(1000, 1000);
        assert!(!permitted(&rec, Credentials::new(2000, 2000)));
    }

    #[test]
    fn superuser_bypass() {
        let rec = record_owned_by(1000, 1000);
        assert!(permitted(&rec, Credentials::new(0, 5000)));
        assert!(permitted(&rec, Credentials::new(5000, 0)));
        assert!(permitted(&rec, Credentials::ROOT));
    }
}
