//! Marmot - the storage substrate of a disk-oriented RDBMS
//!
//! The crate provides the four storage components a disk-oriented
//! database is built on, bottom-up:
//!
//! - **Disk layer** (`storage::disk`): `DiskManager` reads and writes
//!   fixed-size pages against a single database file; `DiskScheduler`
//!   funnels requests through a background worker thread.
//! - **Extendible hash table** (`container`): a concurrent K -> V map
//!   with directory-doubling bucket splits; the buffer pool uses it as
//!   its page table.
//! - **Buffer pool** (`buffer`): `BufferPoolManager` caches pages in a
//!   fixed set of frames under the LRU-K replacement policy
//!   (`LruKReplacer`), handing out RAII `ReadPageGuard`/`WritePageGuard`
//!   handles that hold the page latch plus a pin.
//! - **B+ tree index** (`index`): `BPlusTree` maps unique i64 keys to
//!   record ids across buffer-pool pages, using latch crabbing for
//!   concurrency and split/coalesce/redistribute for rebalancing.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use marmot::buffer::BufferPoolManager;
//! use marmot::index::BPlusTree;
//! use marmot::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new("primary", Arc::clone(&bpm), 32, 32).unwrap();
//! tree.insert(42, BPlusTree::rid_for_key(42)).unwrap();
//! assert!(tree.get_value(42).unwrap().is_some());
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FrameId, MarmotError, PageId, RecordId, Result, SlotId};
