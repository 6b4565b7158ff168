//! Deterministic linearization with pluggable conflict resolution.
//!
//! # Algorithm
//!
//! Start from the whole-graph topological order, restricted to the
//! (sub)graph being replayed. For each anchor position `i`, scan forward
//! over `j > i`:
//!
//! - causally related pairs are already ordered and are skipped;
//! - concurrent pairs are handed to the policy, which answers with an
//!   [`Action`]:
//!   - `DropLeft` removes the anchor and restarts at the same position;
//!   - `DropRight` removes the moving vertex and keeps scanning at `j`;
//!   - `Swap` moves the anchor after the moving vertex (see below) and
//!     re-evaluates the new vertex at position `i`;
//!   - `Nop` continues the scan.
//!
//! When the scan finishes with the anchor still in place, its operation is
//! emitted (unless it is the NOP sentinel) and `i` advances.
//!
//! # Swap and termination
//!
//! A swap relocates the anchor *together with* every vertex between the two
//! positions that descends from the anchor, placing the block right after
//! the moving vertex. Nothing the moving vertex depends on is moved, and
//! nothing moves ahead of its own dependencies, so causal order survives
//! any sequence of swaps. A pair that has been swapped once is treated as
//! `Nop` if it meets again; together with drops strictly shrinking the list,
//! this bounds the number of policy-driven steps and guarantees termination.
//!
//! # Determinism
//!
//! The output is a function of the vertex set and the policy. Replicas
//! converge only if the policy is itself deterministic and consistent;
//! concurrent pairs resolved with `Nop` must commute. Neither property can
//! be checked here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::vertex::{Hash, Operation, Vertex, root_hash};

use super::DagError;
use super::causality::CausalityIndex;
use super::graph::HashGraph;
use super::lca::find_lca;

/// A pairwise conflict-resolution decision for two concurrent vertices
/// `(left, right)`, where `left` precedes `right` in the current order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Discard the left vertex's operation.
    DropLeft,
    /// Discard the right vertex's operation.
    DropRight,
    /// Order the right vertex before the left one.
    Swap,
    /// Keep both in their current order.
    Nop,
}

/// The result of linearizing everything between an LCA and a dependency set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearizedDelta {
    /// Replay base.
    pub lca: Hash,
    /// Surviving vertices after the LCA, in replay order.
    pub vertices: Vec<Vertex>,
}

/// Linearize the vertices of `subgraph` reachable from `origin`.
///
/// `origin` itself is never emitted: its effects are assumed to be part of
/// the base state. The NOP sentinel and vertices without arguments are
/// skipped as well.
///
/// # Errors
///
/// Propagates [`DagError`] from the topological sort and causality index.
pub fn linearize_vertices<F>(
    graph: &HashGraph,
    origin: &str,
    subgraph: Option<&HashSet<Hash>>,
    mut resolve: F,
) -> Result<Vec<Vertex>, DagError>
where
    F: FnMut(&Vertex, &Vertex) -> Action,
{
    let index = graph.causality()?;
    let mut order = restricted_order(&index, origin, subgraph)?;
    let mut swapped: HashSet<(Hash, Hash)> = HashSet::new();
    let mut result: Vec<Vertex> = Vec::with_capacity(order.len());

    let related = |a: &str, b: &str| {
        index
            .are_related(a, b)
            .ok_or_else(|| DagError::VertexNotFound(a.to_string()))
    };
    let fetch = |h: &str| {
        graph
            .vertex(h)
            .ok_or_else(|| DagError::VertexNotFound(h.to_string()))
    };

    let mut i = 1;
    while i < order.len() {
        let mut anchor_kept = true;
        let mut j = i + 1;

        while j < order.len() {
            if related(&order[i], &order[j])? {
                j += 1;
                continue;
            }
            let pair = unordered(&order[i], &order[j]);
            if swapped.contains(&pair) {
                j += 1;
                continue;
            }

            let action = resolve(fetch(&order[i])?, fetch(&order[j])?);
            tracing::trace!(anchor = %order[i], moving = %order[j], ?action, "resolved concurrent pair");
            match action {
                Action::DropLeft => {
                    order.remove(i);
                    anchor_kept = false;
                    break;
                }
                Action::DropRight => {
                    order.remove(j);
                }
                Action::Swap => {
                    swapped.insert(pair);
                    move_anchor_after(&mut order, i, j, |a, d| {
                        index.is_ancestor(a, d).unwrap_or(false)
                    });
                    anchor_kept = false;
                    break;
                }
                Action::Nop => j += 1,
            }
        }

        if anchor_kept {
            let vertex = fetch(&order[i])?;
            if !vertex.operation.is_nop() && vertex.operation.value.is_some() {
                result.push(vertex.clone());
            }
            i += 1;
        }
    }

    Ok(result)
}

/// Linearize the whole graph from the root into an operation sequence.
///
/// # Errors
///
/// Same as [`linearize_vertices`].
pub fn linearize<F>(graph: &HashGraph, resolve: F) -> Result<Vec<Operation>, DagError>
where
    F: FnMut(&Vertex, &Vertex) -> Action,
{
    Ok(linearize_vertices(graph, root_hash(), None, resolve)?
        .into_iter()
        .map(|v| v.operation)
        .collect())
}

/// Find the LCA of `hashes` and linearize the delta above it.
///
/// # Errors
///
/// Same as [`find_lca`] and [`linearize_vertices`].
pub fn linearize_since_lca<F>(
    graph: &HashGraph,
    hashes: &[Hash],
    resolve: F,
) -> Result<LinearizedDelta, DagError>
where
    F: FnMut(&Vertex, &Vertex) -> Action,
{
    let found = find_lca(graph, hashes)?;
    if found.delta.is_empty() {
        return Ok(LinearizedDelta {
            lca: found.lca,
            vertices: Vec::new(),
        });
    }
    let vertices = linearize_vertices(graph, &found.lca, Some(&found.delta), resolve)?;
    Ok(LinearizedDelta {
        lca: found.lca,
        vertices,
    })
}

/// The whole-graph topological order filtered to `origin` and the vertices
/// of `subgraph` that descend from it. A replay from any LCA must see
/// concurrent vertices in the same relative order as a whole-graph
/// linearization does.
fn restricted_order(
    index: &CausalityIndex,
    origin: &str,
    subgraph: Option<&HashSet<Hash>>,
) -> Result<Vec<Hash>, DagError> {
    if index.position(origin).is_none() {
        return Err(DagError::VertexNotFound(origin.to_string()));
    }
    Ok(index
        .order()
        .iter()
        .filter(|h| {
            h.as_str() == origin
                || (subgraph.is_none_or(|s| s.contains(h.as_str()))
                    && index.is_ancestor(origin, h.as_str()).unwrap_or(false))
        })
        .cloned()
        .collect())
}

fn unordered(a: &str, b: &str) -> (Hash, Hash) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Move `order[i]` and every vertex in `order[i+1..j]` that descends from it
/// to just after `order[j]`, preserving relative order.
fn move_anchor_after(
    order: &mut Vec<Hash>,
    i: usize,
    j: usize,
    is_ancestor: impl Fn(&str, &str) -> bool,
) {
    let tail = order.split_off(j + 1);
    let mut window = order.split_off(i);
    let moving = window.pop();
    let anchor = window.remove(0);

    let (block, stay): (Vec<Hash>, Vec<Hash>) =
        window.into_iter().partition(|h| is_ancestor(&anchor, h));

    order.extend(stay);
    order.extend(moving);
    order.push(anchor);
    order.extend(block);
    order.extend(tail);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
