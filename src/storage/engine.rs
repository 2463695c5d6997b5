//! Bounded LRU Storage Engine
//!
//! This module implements the core storage engine for EmberKV: a byte-bounded
//! key-value store that evicts the least recently used entries to make room.
//!
//! ## Design Decisions
//!
//! 1. **One Exclusive Lock**: Every operation, reads included, takes the same
//!    mutex. A `get` reorders the recency list, so there is no read-only path.
//! 2. **Arena-Backed List**: The recency list links nodes by generation-checked
//!    handles; the map stores a handle per key.
//! 3. **Byte Accounting**: The size of an entry is `key.len() + value.len()`.
//!    The running total never exceeds the capacity once an operation returns.
//!
//! ## Layout
//!
//! ```text
//! ┌────────────────────────── Mutex ──────────────────────────┐
//! │  index: HashMap<Bytes, Handle>                            │
//! │              │                                            │
//! │              ▼                                            │
//! │  recency: [MRU] ⇄ node ⇄ node ⇄ node ⇄ [LRU]  ──> evict   │
//! │  size / capacity / hits / misses / evictions              │
//! └───────────────────────────────────────────────────────────┘
//! ```

use crate::arena::Handle;
use crate::storage::list::{CacheEntry, RecencyList};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Default capacity used by the server binary (64 MiB).
pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;

#[derive(Debug)]
struct Inner {
    index: HashMap<Bytes, Handle>,
    recency: RecencyList,
    size: usize,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    /// Evicts from the LRU end until `needed` more bytes fit.
    ///
    /// `keep` is never evicted; callers move it to the front first, so it can
    /// only be reached once every other entry is gone.
    fn make_room(&mut self, needed: usize, keep: Option<Handle>) {
        while self.size + needed > self.capacity {
            let Some(victim) = self.recency.back() else {
                break;
            };
            if Some(victim) == keep {
                break;
            }
            let Some(evicted) = self.recency.remove(victim) else {
                break;
            };
            self.index.remove(&evicted.key);
            self.size -= evicted.size();
            self.evictions += 1;
            trace!(key = ?evicted.key, freed = evicted.size(), "Evicted entry");
        }
    }

    fn insert(&mut self, key: Bytes, value: Bytes) {
        let entry = CacheEntry { key, value };
        let needed = entry.size();
        self.make_room(needed, None);

        let key = entry.key.clone();
        let handle = self.recency.push_front(entry);
        self.index.insert(key, handle);
        self.size += needed;
    }

    fn update(&mut self, handle: Handle, value: Bytes) {
        self.recency.move_to_front(handle);

        let old_len = match self.recency.get(handle) {
            Some(entry) => entry.value.len(),
            None => return,
        };
        // Free the old value's bytes first; the key stays where it is.
        self.size -= old_len;
        self.make_room(value.len(), Some(handle));
        self.size += value.len();

        if let Some(entry) = self.recency.get_mut(handle) {
            entry.value = value;
        }
    }
}

/// A thread-safe, byte-bounded LRU key-value store.
///
/// Wrap it in an `Arc` and share it between reactor threads.
///
/// # Example
///
/// ```
/// use emberkv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::with_capacity(10);
///
/// assert!(engine.put(Bytes::from("ab"), Bytes::from("123")));
/// assert!(engine.put(Bytes::from("cd"), Bytes::from("45678")));
///
/// // "ab" had to go to make room for "cd"
/// assert_eq!(engine.get(b"ab"), None);
/// assert_eq!(engine.get(b"cd"), Some(Bytes::from("45678")));
/// ```
#[derive(Debug)]
pub struct StorageEngine {
    inner: Mutex<Inner>,
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an engine with [`DEFAULT_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an engine that holds at most `capacity` bytes of keys and values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                index: HashMap::new(),
                recency: RecencyList::new(),
                size: 0,
                capacity,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the map and list out of
        // sync, since each mutation below completes before the next begins.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `value` under `key`, inserting or overwriting.
    ///
    /// Returns `false` without touching the cache when the pair can never fit.
    pub fn put(&self, key: Bytes, value: Bytes) -> bool {
        let mut inner = self.lock();
        if key.len() + value.len() > inner.capacity {
            return false;
        }

        match inner.index.get(&key).copied() {
            Some(handle) => inner.update(handle, value),
            None => inner.insert(key, value),
        }
        true
    }

    /// Stores `value` only if `key` is not present.
    pub fn put_if_absent(&self, key: Bytes, value: Bytes) -> bool {
        let mut inner = self.lock();
        if key.len() + value.len() > inner.capacity || inner.index.contains_key(&key) {
            return false;
        }

        inner.insert(key, value);
        true
    }

    /// Replaces the value of an existing key. Never inserts.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        let mut inner = self.lock();
        if key.len() + value.len() > inner.capacity {
            return false;
        }

        match inner.index.get(&key).copied() {
            Some(handle) => {
                inner.update(handle, value);
                true
            }
            None => false,
        }
    }

    /// Removes `key`. Returns `false` if it was not present.
    pub fn delete(&self, key: &[u8]) -> bool {
        let mut inner = self.lock();
        let Some(handle) = inner.index.remove(key) else {
            return false;
        };

        if let Some(entry) = inner.recency.remove(handle) {
            inner.size -= entry.size();
        }
        true
    }

    /// Returns a copy of the value and marks the key as most recently used.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let mut inner = self.lock();
        let Some(handle) = inner.index.get(key).copied() else {
            inner.misses += 1;
            return None;
        };

        inner.hits += 1;
        inner.recency.move_to_front(handle);
        inner.recency.get(handle).map(|entry| entry.value.clone())
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.index.clear();
        inner.recency.clear();
        inner.size = 0;
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently used by keys and values.
    pub fn size(&self) -> usize {
        self.lock().size
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Returns a consistent snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.index.len(),
            used_bytes: inner.size,
            capacity: inner.capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    /// Keys from most to least recently used. Intended for tests and debugging.
    pub fn keys_by_recency(&self) -> Vec<Bytes> {
        self.lock().recency.keys().cloned().collect()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_put_and_get() {
        let engine = StorageEngine::with_capacity(100);

        assert!(engine.put(b("key"), b("value")));
        assert_eq!(engine.get(b"key"), Some(b("value")));
        assert_eq!(engine.size(), 8);
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::with_capacity(100);
        assert_eq!(engine.get(b"nonexistent"), None);
        assert_eq!(engine.stats().misses, 1);
    }

    #[test]
    fn test_capacity_example_evicts_oldest() {
        let engine = StorageEngine::with_capacity(10);

        assert!(engine.put(b("ab"), b("123")));
        assert!(engine.put(b("cd"), b("45678")));

        assert_eq!(engine.get(b"ab"), None);
        assert_eq!(engine.get(b"cd"), Some(b("45678")));
        assert_eq!(engine.size(), 7);
        assert_eq!(engine.stats().evictions, 1);
    }

    #[test]
    fn test_oversized_pair_rejected_without_mutation() {
        let engine = StorageEngine::with_capacity(10);
        engine.put(b("a"), b("1"));

        assert!(!engine.put(b("big"), b("12345678")));
        assert!(!engine.put_if_absent(b("big"), b("12345678")));
        assert!(!engine.set(b("a"), b("1234567890")));

        assert_eq!(engine.get(b"a"), Some(b("1")));
        assert_eq!(engine.size(), 2);
    }

    #[test]
    fn test_evicts_lru_unless_recently_touched() {
        // Four 2-byte entries fill the cache exactly
        let engine = StorageEngine::with_capacity(8);
        for k in ["1", "2", "3", "4"] {
            assert!(engine.put(b(k), b("x")));
        }

        // Touch k1 so k2 becomes the LRU entry
        assert!(engine.get(b"1").is_some());
        assert!(engine.put(b("5"), b("x")));

        assert_eq!(engine.get(b"2"), None);
        assert!(engine.get(b"1").is_some());
        assert_eq!(engine.len(), 4);
    }

    #[test]
    fn test_evicts_first_inserted_without_access() {
        let engine = StorageEngine::with_capacity(8);
        for k in ["1", "2", "3", "4"] {
            engine.put(b(k), b("x"));
        }
        engine.put(b("5"), b("x"));

        assert_eq!(engine.get(b"1"), None);
        for k in ["2", "3", "4", "5"] {
            assert!(engine.get(k.as_bytes()).is_some());
        }
    }

    #[test]
    fn test_set_and_reput_promote() {
        let engine = StorageEngine::with_capacity(6);
        engine.put(b("a"), b("1"));
        engine.put(b("b"), b("1"));
        engine.put(b("c"), b("1"));

        assert!(engine.set(b("a"), b("2")));
        assert!(engine.put(b("b"), b("2")));
        assert_eq!(engine.keys_by_recency(), vec![b("b"), b("a"), b("c")]);

        engine.put(b("d"), b("1"));
        assert_eq!(engine.get(b"c"), None);
    }

    #[test]
    fn test_update_growth_evicts_others_but_not_self() {
        let engine = StorageEngine::with_capacity(10);
        engine.put(b("a"), b("1"));
        engine.put(b("b"), b("1"));
        engine.put(b("c"), b("1"));

        // "c" grows from 2 to 9 bytes: both other entries must go
        assert!(engine.put(b("c"), b("12345678")));
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.size(), 9);
        assert_eq!(engine.get(b"c"), Some(b("12345678")));
    }

    #[test]
    fn test_update_shrink_keeps_everything() {
        let engine = StorageEngine::with_capacity(10);
        engine.put(b("a"), b("1234"));
        engine.put(b("b"), b("1234"));

        assert!(engine.set(b("a"), b("1")));
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.size(), 7);
    }

    #[test]
    fn test_put_if_absent_keeps_original() {
        let engine = StorageEngine::with_capacity(100);

        assert!(engine.put_if_absent(b("k"), b("v1")));
        assert!(!engine.put_if_absent(b("k"), b("v2")));
        assert_eq!(engine.get(b"k"), Some(b("v1")));
    }

    #[test]
    fn test_set_on_missing_key_does_not_insert() {
        let engine = StorageEngine::with_capacity(100);

        assert!(!engine.set(b("k"), b("v")));
        assert_eq!(engine.get(b"k"), None);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_delete_releases_bytes() {
        let engine = StorageEngine::with_capacity(100);
        engine.put(b("key"), b("value"));
        engine.put(b("other"), b("x"));
        let before = engine.size();

        assert!(engine.delete(b"key"));
        assert_eq!(engine.get(b"key"), None);
        assert_eq!(engine.size(), before - 8);
        assert!(!engine.delete(b"key"));
    }

    #[test]
    fn test_clear() {
        let engine = StorageEngine::with_capacity(100);
        engine.put(b("a"), b("1"));
        engine.put(b("b"), b("2"));

        engine.clear();
        assert!(engine.is_empty());
        assert_eq!(engine.size(), 0);
        assert!(engine.put(b("a"), b("1")));
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(StorageEngine::with_capacity(4096));
        let mut handles = vec![];

        for i in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..500 {
                    let key = Bytes::from(format!("key-{}-{}", i, j));
                    engine.put(key.clone(), Bytes::from("value"));
                    engine.get(&key);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = engine.stats();
        assert!(stats.used_bytes <= 4096);
        assert_eq!(stats.entries, engine.keys_by_recency().len());
    }

    impl StorageEngine {
        fn recomputed_size(&self) -> usize {
            let inner = self.lock();
            inner
                .index
                .values()
                .filter_map(|&h| inner.recency.get(h))
                .map(CacheEntry::size)
                .sum()
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8, usize),
        PutIfAbsent(u8, usize),
        Set(u8, usize),
        Delete(u8),
        Get(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..16, 0usize..24).prop_map(|(k, n)| Op::Put(k, n)),
            (0u8..16, 0usize..24).prop_map(|(k, n)| Op::PutIfAbsent(k, n)),
            (0u8..16, 0usize..24).prop_map(|(k, n)| Op::Set(k, n)),
            (0u8..16).prop_map(Op::Delete),
            (0u8..16).prop_map(Op::Get),
        ]
    }

    proptest! {
        #[test]
        fn prop_size_never_exceeds_capacity(ops in proptest::collection::vec(op(), 1..200)) {
            let engine = StorageEngine::with_capacity(32);
            for op in ops {
                let key = |k: u8| Bytes::from(format!("k{:02}", k));
                let value = |n: usize| Bytes::from(vec![b'v'; n]);
                match op {
                    Op::Put(k, n) => { engine.put(key(k), value(n)); }
                    Op::PutIfAbsent(k, n) => { engine.put_if_absent(key(k), value(n)); }
                    Op::Set(k, n) => { engine.set(key(k), value(n)); }
                    Op::Delete(k) => { engine.delete(&key(k)); }
                    Op::Get(k) => { engine.get(&key(k)); }
                }

                let stats = engine.stats();
                prop_assert!(stats.used_bytes <= stats.capacity);

                // Map and list agree, and the byte count matches the contents
                let keys = engine.keys_by_recency();
                prop_assert_eq!(keys.len(), stats.entries);
                prop_assert_eq!(engine.recomputed_size(), stats.used_bytes);
            }
        }

        #[test]
        fn prop_get_after_put_returns_value(k in "[a-z]{1,8}", v in proptest::collection::vec(any::<u8>(), 0..16)) {
            let engine = StorageEngine::with_capacity(64);
            let value = Bytes::from(v);
            prop_assert!(engine.put(Bytes::from(k.clone()), value.clone()));
            prop_assert_eq!(engine.get(k.as_bytes()), Some(value));
        }
    }
}
