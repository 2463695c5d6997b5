//! Storage Engine Module
//!
//! This module provides the core storage functionality for EmberKV:
//! a byte-bounded key-value store with least-recently-used eviction.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │   Mutex ─┬─ HashMap<key, Handle>                            │
//! │          └─ RecencyList (arena nodes, MRU ... LRU)          │
//! └─────────────────────────────────────────────────────────────┘
//!                ▲            ▲            ▲
//!                │            │            │
//!           reactor 0    reactor 1    reactor N
//! ```
//!
//! ## Features
//!
//! - **Bounded**: the sum of key and value lengths never exceeds the capacity
//! - **LRU Eviction**: exactly as many least recently used entries as needed
//! - **One Lock**: all operations are serialized by a single mutex
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::StorageEngine;
//! use bytes::Bytes;
//!
//! let engine = StorageEngine::with_capacity(1024);
//!
//! engine.put(Bytes::from("name"), Bytes::from("Ariz"));
//! assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
//!
//! assert!(!engine.put_if_absent(Bytes::from("name"), Bytes::from("other")));
//! assert!(engine.delete(b"name"));
//! ```

pub mod engine;
pub mod list;

// Re-export commonly used types
pub use engine::{CacheStats, StorageEngine, DEFAULT_CAPACITY};
pub use list::CacheEntry;
