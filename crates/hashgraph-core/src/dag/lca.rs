//! Lowest Common Ancestor (LCA) of a dependency set.
//!
//! The LCA is the replay base for a vertex: its state snapshot is already
//! known, so only the vertices between it and the dependency set need to be
//! replayed to reconstruct the pre-state.
//!
//! # Definition
//!
//! For hashes `H`, let `A` be the union of the ancestors-or-self of every
//! `h ∈ H`, and `C` the intersection (the common ancestors-or-self). The
//! LCA is the topologically latest `c ∈ C` that is causally related to
//! every vertex of `A`.
//!
//! When the common ancestors have a unique lowest member that dominates the
//! history, this is exactly the classic LCA. In criss-cross histories the
//! classic LCA is not unique, and some vertices of `A` are concurrent with
//! every candidate; the search then falls back to a higher cut vertex (the
//! root always qualifies). Replaying from a cut vertex is what makes
//! `snapshot(lca) + linearize(delta)` equal the linearization of all of `A`.
//!
//! # Edge Cases
//!
//! - A single hash is its own LCA with an empty delta.
//! - If one hash is an ancestor of all others and dominates their history,
//!   it is the LCA.
//! - An empty hash set is an error.

use std::collections::HashSet;

use fixedbitset::FixedBitSet;

use crate::vertex::Hash;

use super::DagError;
use super::graph::HashGraph;

/// The replay base for a dependency set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcaResult {
    /// The lowest common ancestor.
    pub lca: Hash,
    /// Every vertex that is an ancestor-or-self of some input hash but not an
    /// ancestor-or-self of the LCA. All of them descend from the LCA.
    pub delta: HashSet<Hash>,
}

/// Find the LCA of `hashes` and the delta that must be replayed on top of it.
///
/// # Errors
///
/// - [`DagError::EmptyLcaInput`] for an empty slice.
/// - [`DagError::VertexNotFound`] if any hash is unknown.
/// - [`DagError::CycleDetected`] if the causality index cannot be rebuilt.
pub fn find_lca(graph: &HashGraph, hashes: &[Hash]) -> Result<LcaResult, DagError> {
    let Some(first) = hashes.first() else {
        return Err(DagError::EmptyLcaInput);
    };
    if let Some(missing) = hashes.iter().find(|h| !graph.contains(h)) {
        return Err(DagError::VertexNotFound(missing.clone()));
    }
    if hashes.iter().all(|h| h == first) {
        return Ok(LcaResult {
            lca: first.clone(),
            delta: HashSet::new(),
        });
    }

    let index = graph.causality()?;

    let mut union = FixedBitSet::with_capacity(index.capacity());
    let mut common: Option<FixedBitSet> = None;
    for hash in hashes {
        let pos = index
            .position(hash)
            .ok_or_else(|| DagError::VertexNotFound(hash.clone()))?;
        let closure = index.closure_at(pos);
        union.union_with(&closure);
        match common.as_mut() {
            Some(c) => c.intersect_with(&closure),
            None => common = Some(closure),
        }
    }
    let common = common.unwrap_or_default();

    let members: Vec<usize> = union.ones().collect();
    let mut candidates: Vec<usize> = common.ones().collect();
    candidates.reverse();

    let lca_pos = candidates
        .into_iter()
        .find(|&c| members.iter().all(|&v| index.are_related_at(c, v)))
        // Position 0 is the root, which every vertex descends from.
        .unwrap_or(0);

    let base = index.closure_at(lca_pos);
    let delta: HashSet<Hash> = members
        .iter()
        .filter(|&&v| !base.contains(v))
        .filter_map(|&v| index.hash_at(v).cloned())
        .collect();
    let lca = index
        .hash_at(lca_pos)
        .cloned()
        .ok_or_else(|| DagError::VertexNotFound(format!("position {lca_pos}")))?;

    tracing::trace!(%lca, delta = delta.len(), inputs = hashes.len(), "computed lca");
    Ok(LcaResult { lca, delta })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
