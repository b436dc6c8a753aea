#![forbid(unsafe_code)]
//! heapfs storage engine.
//!
//! A flat-namespace file store on an offset-addressable persistent heap.
//! Entries live in a fixed-layout inode table spread across reserved heap
//! offsets; file content lives in singly linked chains of fixed-size heap
//! blocks. Paths resolve to denormalized (parent-path, leaf-name) pairs and
//! every lookup is a bounded linear scan of the table.
//!
//! Layering, leaf first: [`path`] resolves paths, [`table`] owns the inode
//! records, [`acl`] gates callers, [`chain`] owns file content, and
//! [`bootstrap`] initializes the reserved region. [`engine::HeapFs`]
//! composes them into the operation surface a call adapter consumes.

pub mod acl;
pub mod bootstrap;
pub mod chain;
pub mod config;
pub mod engine;
pub mod path;
pub mod table;

pub use acl::Credentials;
pub use bootstrap::BootstrapOutcome;
pub use chain::BlockChainStore;
pub use config::HeapFsConfig;
pub use engine::{DirEntry, FsStats, HeapFs, InodeAttr};
pub use heapfs_error::{HeapFsError, Result};
pub use table::{InodeTable, SlotId};
