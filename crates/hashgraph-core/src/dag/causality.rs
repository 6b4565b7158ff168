//! Bitset-backed causality index.
//!
//! The index assigns each vertex its position in a topological order and
//! stores, per position, the set of positions it transitively depends on.
//! Because every dependency precedes its dependents in the order, the sets
//! are filled in one forward pass: a vertex's set is the union of its
//! dependencies' sets plus the dependencies themselves.
//!
//! Bitsets live in an arena indexed by position. Every bitset is sized to a
//! shared capacity that doubles whenever the vertex count outgrows it, and
//! the arena is reused across rebuilds, so a rebuild after a single insert
//! does not reallocate.

use std::collections::HashMap;

use fixedbitset::FixedBitSet;

use crate::vertex::Hash;

const INITIAL_CAPACITY: usize = 64;

/// Topological positions plus per-vertex reachable-predecessor bitsets.
#[derive(Debug, Clone, Default)]
pub struct CausalityIndex {
    order: Vec<Hash>,
    positions: HashMap<Hash, usize>,
    reach: Vec<FixedBitSet>,
    capacity: usize,
}

impl CausalityIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a topological order.
    ///
    /// `dependencies_of` must return the dependency hashes of a vertex; every
    /// dependency must occur earlier in `order`.
    pub fn rebuild<'a>(&mut self, order: Vec<Hash>, dependencies_of: impl Fn(&str) -> &'a [Hash]) {
        let n = order.len();
        self.grow_to(n);

        self.positions.clear();
        for (pos, hash) in order.iter().enumerate() {
            self.positions.insert(hash.clone(), pos);
        }

        for pos in 0..n {
            let (before, rest) = self.reach.split_at_mut(pos);
            let current = &mut rest[0];
            current.clear();
            for dependency in dependencies_of(&order[pos]) {
                if let Some(&dep_pos) = self.positions.get(dependency) {
                    current.union_with(&before[dep_pos]);
                    current.insert(dep_pos);
                }
            }
        }

        self.order = order;
    }

    fn grow_to(&mut self, n: usize) {
        if self.capacity == 0 {
            self.capacity = INITIAL_CAPACITY;
        }
        while self.capacity < n {
            self.capacity *= 2;
        }
        for bits in &mut self.reach {
            bits.grow(self.capacity);
        }
        while self.reach.len() < n {
            self.reach.push(FixedBitSet::with_capacity(self.capacity));
        }
    }

    /// Number of indexed vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Current bitset width (always a power-of-two multiple of the initial width).
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Topological position of a vertex.
    #[must_use]
    pub fn position(&self, hash: &str) -> Option<usize> {
        self.positions.get(hash).copied()
    }

    /// Hash at a topological position.
    #[must_use]
    pub fn hash_at(&self, pos: usize) -> Option<&Hash> {
        self.order.get(pos)
    }

    /// The topological order this index was built from.
    #[must_use]
    pub fn order(&self) -> &[Hash] {
        &self.order
    }

    /// Positions of every transitive dependency of `hash`.
    #[must_use]
    pub fn reachable(&self, hash: &str) -> Option<&FixedBitSet> {
        self.position(hash).map(|pos| &self.reach[pos])
    }

    /// Returns `true` if `ancestor` is a strict transitive dependency of `descendant`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Option<bool> {
        let a = self.position(ancestor)?;
        let d = self.position(descendant)?;
        Some(self.reach[d].contains(a))
    }

    /// Returns `true` if either vertex depends on the other (or they are the same).
    #[must_use]
    pub fn are_related(&self, a: &str, b: &str) -> Option<bool> {
        let pa = self.position(a)?;
        let pb = self.position(b)?;
        Some(pa == pb || self.reach[pa].contains(pb) || self.reach[pb].contains(pa))
    }

    /// Returns `true` if the vertices at two positions are causally related.
    #[must_use]
    pub fn are_related_at(&self, pa: usize, pb: usize) -> bool {
        pa == pb || self.reach[pa].contains(pb) || self.reach[pb].contains(pa)
    }

    /// Reachable set of a position, including the position itself.
    #[must_use]
    pub fn closure_at(&self, pos: usize) -> FixedBitSet {
        let mut bits = self.reach[pos].clone();
        bits.grow(self.capacity);
        bits.insert(pos);
        bits
    }
}
