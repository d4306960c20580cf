//! Small shared utilities: a capped FIFO, a union-find over a fixed byte
//! range (used by IPv4 reassembly), and a reassembly key hash.
//!
//! None of these exist in a typical `no_std` kernel, which reaches for
//! `heapless`-style fixed arrays rather than a generic capped queue or
//! union-find; they're written fresh in a plain, unadorned style — small
//! structs, `Option`-returning lookups, no trait-object indirection. A
//! single flat array of 65536 slots is adequate for reassembly's byte-range
//! tracking; path compression is kept for speed but isn't load-bearing for
//! correctness.

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::{SimError, SimResult};

/// A FIFO with a fixed maximum size. `push_back` on a full queue fails
/// with `QueueFull` rather than blocking or evicting, giving the caller an
/// explicit backpressure signal.
#[derive(Debug, Clone)]
pub struct CappedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> CappedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        CappedQueue { items: VecDeque::new(), capacity }
    }

    pub fn push_back(&mut self, item: T) -> SimResult<()> {
        if self.items.len() >= self.capacity {
            return Err(SimError::QueueFull);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fraction full, in [0.0, 1.0]. Always the real occupancy; any fixed
    /// or rounded display value a console chooses to show is that
    /// presentation layer's business, not this queue's.
    pub fn fill_fraction(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.items.len() as f64 / self.capacity as f64
        }
    }
}

/// Union-find (disjoint set) over a fixed range `[0, SIZE)`, used by IPv4
/// reassembly to track which byte offsets of a datagram are covered by
/// fragments received so far.
pub struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        UnionFind { parent: (0..size as u32).collect() }
    }

    pub fn find(&mut self, x: usize) -> usize {
        if self.parent[x] as usize != x {
            let root = self.find(self.parent[x] as usize);
            self.parent[x] = root as u32;
        }
        self.parent[x] as usize
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb as u32;
        }
    }

    pub fn connected(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }
}

/// Collision-resistant-enough key for a reassembly bucket: src, dst,
/// protocol and IP identification uniquely identify one datagram's
/// fragment set for the lifetime of that datagram.
pub fn reassembly_key(src: u32, dst: u32, protocol: u8, identification: u16) -> u64 {
    let mut hasher = DefaultHasher::new();
    src.hash(&mut hasher);
    dst.hash(&mut hasher);
    protocol.hash(&mut hasher);
    identification.hash(&mut hasher);
    hasher.finish()
}
