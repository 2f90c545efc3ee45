//! Burrow - the storage core of a disk-backed relational index
//!
//! The crate pairs a page-oriented buffer pool with a concurrent B+ tree
//! index built on top of it. Data lives in a single page file on disk; a
//! fixed array of in-memory frames caches pages, and the tree's nodes are
//! ordinary pages accessed through RAII latch-and-pin guards.
//!
//! # Architecture
//!
//! - **Disk layer** (`storage::disk`): positioned page I/O behind a
//!   background scheduler thread
//!   - `DiskManager`: reads, writes, allocates and deallocates pages
//!   - `DiskScheduler`: queues requests to a worker thread
//!
//! - **Buffer pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: fetches pages from disk and caches them
//!   - `LruReplacer`: least-recently-unpinned eviction
//!   - `Frame`: per-slot metadata; its data lock is the page latch
//!   - `ReadPageGuard`/`WritePageGuard`: RAII latch + pin
//!
//! - **Index** (`index`): a leaf-linked B+ tree with latch crabbing
//!   - `BPlusTree`: unique-key insert, lookup, delete
//!   - `IndexIterator`: forward scan over the leaf chain
//!
//! - **Registry** (`storage::page::HeaderPage`): page 0 maps index names
//!   to root page ids so an index survives a restart
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use burrow::buffer::BufferPoolManager;
//! use burrow::common::{key_from_u64, PageId, RecordId, SlotId};
//! use burrow::index::{BPlusTree, BytewiseComparator};
//! use burrow::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, disk_manager));
//!
//! let tree = BPlusTree::new("orders_pk", bpm, BytewiseComparator, 128, 128);
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//! tree.insert(&key_from_u64(42), rid).unwrap();
//! assert_eq!(tree.get(&key_from_u64(42)).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{BurrowError, PageId, RecordId, Result, SlotId};
