//! # strata-kv
//!
//! Embeddable ordered key-value store with two interchangeable engines:
//!
//! - **B-Tree**: an in-memory ordered index made durable by a write-ahead
//!   log that is replayed on open.
//! - **LSM-Tree**: a B-Tree memtable flushed into immutable sorted segments
//!   (SSTables) with bloom filter and sparse index sidecars, explicit
//!   compaction, and Levenshtein-based fuzzy key lookup.
//!
//! Both engines expose the same put/get/delete/close contract and persist
//! enough state to survive a restart. Deletes are tombstones: a reserved
//! sentinel written through the value channel and resolved to "absent" on
//! read.
//!
//! ## Example
//!
//! ```no_run
//! use strata_kv::Db;
//!
//! fn main() -> strata_kv::Result<()> {
//!     let mut db = Db::open("lsmtree", "./data")?;
//!     db.put("name", "Adrien")?;
//!     assert_eq!(db.get("name")?.as_deref(), Some("Adrien"));
//!     db.delete("name")?;
//!     assert_eq!(db.get("name")?, None);
//!     db.close()
//! }
//! ```

pub mod core;
pub mod infra;
pub mod storage;

mod db;

pub use crate::core::btree::BTree;
pub use crate::core::engine::LsmTree;
pub use crate::core::heap::MinHeap;
pub use crate::core::levenshtein;
pub use crate::core::value::{Value, TOMBSTONE};
pub use crate::db::{Db, Engine};
pub use crate::infra::config::{LsmConfig, LsmConfigBuilder};
pub use crate::infra::error::{Result, StoreError};
pub use crate::storage::bloom::BloomFilter;
pub use crate::storage::sstable::{SsTable, SPARSE_INDEX_STRIDE};
