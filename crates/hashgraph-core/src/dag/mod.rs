//! Causal DAG ("hashgraph") of vertices rooted at the canonical root.
//!
//! # DAG Properties
//!
//! - **Single root**: every graph is seeded with [`crate::vertex::root_vertex`];
//!   every other vertex names at least one dependency, and every dependency
//!   must already be present when a vertex is added.
//! - **Frontier**: the set of vertices with no children, used as the
//!   dependencies of the next locally created vertex.
//! - **Causality oracle**: a lazily rebuilt topological index with one bitset
//!   of reachable predecessors per vertex answers ancestry queries in O(1).
//!
//! # Sub-modules
//!
//! - [`graph`]: vertex storage, adjacency, frontier, topological sort.
//!   ([`HashGraph`])
//! - [`causality`]: bitset-backed reachability index. ([`CausalityIndex`])
//! - [`lca`]: lowest common ancestor of a dependency set. ([`find_lca`])
//! - [`linearize`]: conflict-resolving total order. ([`linearize`],
//!   [`linearize_vertices`])

pub mod causality;
pub mod graph;
pub mod lca;
pub mod linearize;

pub use causality::CausalityIndex;
pub use graph::HashGraph;
pub use lca::{LcaResult, find_lca};
pub use linearize::{Action, LinearizedDelta, linearize, linearize_since_lca, linearize_vertices};

use crate::vertex::Hash;

/// Errors raised by graph mutation and traversal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DagError {
    /// A dependency of the vertex is not in the graph.
    #[error("vertex {vertex} references unknown dependency {dependency}")]
    UnknownDependency { vertex: Hash, dependency: Hash },

    /// A non-root vertex declared no dependencies.
    #[error("vertex {0} has no dependencies but is not the root")]
    OrphanVertex(Hash),

    /// A queried hash is not in the graph.
    #[error("vertex not found in graph: {0}")]
    VertexNotFound(Hash),

    /// LCA was requested for an empty hash set.
    #[error("cannot compute the lowest common ancestor of an empty set")]
    EmptyLcaInput,

    /// The forward-edge map contains a cycle. Unreachable through the public
    /// API; indicates corrupted adjacency.
    #[error("graph contains a cycle (detected at {0})")]
    CycleDetected(Hash),

    /// The recorded frontier disagrees with the childless vertex set.
    #[error("frontier is inconsistent at {0}")]
    InconsistentFrontier(Hash),
}
