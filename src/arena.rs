//! Generation-Checked Slab
//!
//! Every linked structure in EmberKV (the cache's recency list, the
//! scheduler's routine ring and the reactor's connection table) stores its
//! elements in a [`slab::Slab`] and links them with [`Handle`]s instead of
//! pointers.
//!
//! ## How It Works
//!
//! ```text
//!   slab:    [ (gen 7, A) | vacant | (gen 9, C) ]
//!   handle:  { index: 2, generation: 9 }  ──> C
//!   handle:  { index: 2, generation: 4 }  ──> stale, rejected
//! ```
//!
//! Every insert stamps the entry with the next generation, so a stale handle
//! that still points at a recycled slot is rejected instead of aliasing the
//! new occupant.

use slab::Slab;
use std::fmt;
use std::ops::{Index, IndexMut};

/// A stable, generation-checked reference to a slab entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: usize,
    generation: u32,
}

impl Handle {
    /// Slot index in the slab. Reused once the entry is removed.
    pub fn index(self) -> usize {
        self.index
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Entry<T> {
    /// Generation stamped at insert time
    generation: u32,
    value: T,
}

/// A slab of values addressed by [`Handle`].
pub struct Arena<T> {
    entries: Slab<Entry<T>>,
    /// Generation handed to the next insert
    next_generation: u32,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            entries: Slab::new(),
            next_generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores a value, reusing a vacant slot when one exists.
    pub fn insert(&mut self, value: T) -> Handle {
        self.insert_with(|_| value)
    }

    /// Stores the value built by `make`, which is told the handle it will
    /// live under.
    pub fn insert_with(&mut self, make: impl FnOnce(Handle) -> T) -> Handle {
        let entry = self.entries.vacant_entry();
        let handle = Handle {
            index: entry.key(),
            generation: self.next_generation,
        };
        self.next_generation = self.next_generation.wrapping_add(1);

        entry.insert(Entry {
            generation: handle.generation,
            value: make(handle),
        });
        handle
    }

    /// Removes and returns the value behind `handle`, if it is still live.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        self.get(handle)?;
        self.entries
            .try_remove(handle.index)
            .map(|entry| entry.value)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.entries.get(handle.index) {
            Some(entry) if entry.generation == handle.generation => Some(&entry.value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.entries.get_mut(handle.index) {
            Some(entry) if entry.generation == handle.generation => Some(&mut entry.value),
            _ => None,
        }
    }

    /// The live handle occupying slot `index`, if any.
    pub fn handle_at(&self, index: usize) -> Option<Handle> {
        self.entries.get(index).map(|entry| Handle {
            index,
            generation: entry.generation,
        })
    }

    /// Iterates over live handles and values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.entries.iter().map(|(index, entry)| {
            (
                Handle {
                    index,
                    generation: entry.generation,
                },
                &entry.value,
            )
        })
    }

    /// Collects every live handle; handy when the caller must mutate while walking.
    pub fn handles(&self) -> Vec<Handle> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    /// Drops every value. Generations keep counting, so old handles stay stale.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Removes every value and hands them back.
    pub fn drain(&mut self) -> Vec<T> {
        self.entries.drain().map(|entry| entry.value).collect()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Handle> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle) -> &T {
        self.get(handle).expect("stale arena handle")
    }
}

impl<T> IndexMut<Handle> for Arena<T> {
    fn index_mut(&mut self, handle: Handle) -> &mut T {
        self.get_mut(handle).expect("stale arena handle")
    }
}

impl<T> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("len", &self.entries.len())
            .field("next_generation", &self.next_generation)
            .finish()
    }
}
