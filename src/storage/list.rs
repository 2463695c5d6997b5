//! Recency List
//!
//! A doubly linked list of cache entries whose nodes live in a
//! generation-checked slab ([`Arena`]) and link to each other by [`Handle`]. The front is the most recently used
//! entry and the back is the least recently used one.

use crate::arena::{Arena, Handle};
use bytes::Bytes;

/// A stored key-value pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: Bytes,
    pub value: Bytes,
}

impl CacheEntry {
    /// Bytes this entry counts against the cache capacity.
    #[inline]
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

#[derive(Debug)]
struct Node {
    entry: CacheEntry,
    prev: Option<Handle>,
    next: Option<Handle>,
}

#[derive(Debug, Default)]
pub struct RecencyList {
    nodes: Arena<Node>,
    head: Option<Handle>,
    tail: Option<Handle>,
}

impl RecencyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Inserts an entry as the most recently used one.
    pub fn push_front(&mut self, entry: CacheEntry) -> Handle {
        let handle = self.nodes.insert(Node {
            entry,
            prev: None,
            next: self.head,
        });

        match self.head {
            Some(old_head) => self.nodes[old_head].prev = Some(handle),
            None => self.tail = Some(handle),
        }
        self.head = Some(handle);
        handle
    }

    /// Unlinks a node and returns its entry.
    pub fn remove(&mut self, handle: Handle) -> Option<CacheEntry> {
        self.unlink(handle)?;
        self.nodes.remove(handle).map(|node| node.entry)
    }

    /// Moves a node to the front. Unknown handles are ignored.
    pub fn move_to_front(&mut self, handle: Handle) {
        if self.head == Some(handle) || self.unlink(handle).is_none() {
            return;
        }

        let old_head = self.head;
        {
            let node = &mut self.nodes[handle];
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.nodes[h].prev = Some(handle),
            None => self.tail = Some(handle),
        }
        self.head = Some(handle);
    }

    pub fn get(&self, handle: Handle) -> Option<&CacheEntry> {
        self.nodes.get(handle).map(|node| &node.entry)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut CacheEntry> {
        self.nodes.get_mut(handle).map(|node| &mut node.entry)
    }

    /// The handle of the least recently used node.
    pub fn back(&self) -> Option<Handle> {
        self.tail
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = None;
        self.tail = None;
    }

    /// Walks the keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.nodes.get(cursor?)?;
            cursor = node.next;
            Some(&node.entry.key)
        })
    }

    /// Detaches a node from its neighbours, leaving it in the arena.
    fn unlink(&mut self, handle: Handle) -> Option<()> {
        let (prev, next) = {
            let node = self.nodes.get(handle)?;
            (node.prev, node.next)
        };

        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        Some(())
    }
}
