//! ArborDB: a disk-resident B+Tree index over fixed-size pages.
//!
//! An ordered, duplicate-tolerant mapping from typed keys to opaque record
//! locators, with:
//! - recursive insertion and split propagation up to the root
//! - naive (non-merging) deletion
//! - leftmost-occurrence search for duplicate keys
//! - range scans over a doubly-linked leaf chain, with deletion through
//!   the scan cursor
//!
//! Pages come from a [`storage::page_store::PageStore`]; a file-backed
//! implementation with an LRU cache lives in [`storage::pager`]. The tree
//! itself never does I/O beyond pin/unpin/allocate/free.

pub mod error;
pub mod types;
pub mod storage;
pub mod btree;

pub use crate::btree::key::{Key, KeyType};
pub use crate::btree::header::DeleteMode;
pub use crate::btree::ops::BTreeFile;
pub use crate::btree::scan::BTreeScan;
pub use crate::error::{ArborError, Result};
pub use crate::types::RecordId;
