//! In-memory causal DAG with frontier tracking and a lazy causality oracle.
//!
//! The [`HashGraph`] indexes vertices by content hash, keeps forward
//! (dependency → child) adjacency sorted by hash, and maintains the frontier
//! incrementally.
//!
//! # Construction
//!
//! A graph always starts with the canonical root. Vertices are added with
//! [`HashGraph::add_vertex`]; unlike an event log that tolerates out-of-order
//! arrival, every dependency must already be present, so the structure is a
//! single-rooted DAG at every point in time.
//!
//! # Deduplication
//!
//! Re-adding a known hash is a no-op. This keeps merges of overlapping
//! batches idempotent.
//!
//! # Causality index
//!
//! Every structural mutation marks the [`CausalityIndex`] stale. The first
//! ancestry query after a mutation re-sorts the graph and rebuilds the
//! bitsets in O(V + E); subsequent queries are O(1).

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use fixedbitset::FixedBitSet;

use crate::vertex::{Hash, Vertex, root_hash, root_vertex};

use super::DagError;
use super::causality::CausalityIndex;

/// An in-memory DAG of vertices rooted at the canonical root.
#[derive(Debug, Clone)]
pub struct HashGraph {
    vertices: HashMap<Hash, Vertex>,
    /// Children of each vertex, sorted by hash.
    forward_edges: HashMap<Hash, Vec<Hash>>,
    frontier: BTreeSet<Hash>,
    causality: RefCell<CausalityIndex>,
    stale: Cell<bool>,
}

impl HashGraph {
    /// Create a graph holding only the root vertex.
    #[must_use]
    pub fn new() -> Self {
        let root = root_vertex().clone();
        let hash = root.hash.clone();

        let mut vertices = HashMap::new();
        vertices.insert(hash.clone(), root);
        let mut forward_edges = HashMap::new();
        forward_edges.insert(hash.clone(), Vec::new());

        Self {
            vertices,
            forward_edges,
            frontier: BTreeSet::from([hash]),
            causality: RefCell::new(CausalityIndex::new()),
            stale: Cell::new(true),
        }
    }

    /// Insert a vertex.
    ///
    /// Returns `Ok(true)` if inserted, `Ok(false)` if the hash was already
    /// present.
    ///
    /// # Errors
    ///
    /// - [`DagError::OrphanVertex`] if a non-root vertex has no dependencies.
    /// - [`DagError::UnknownDependency`] if any dependency is missing; the
    ///   graph is left unchanged.
    pub fn add_vertex(&mut self, vertex: Vertex) -> Result<bool, DagError> {
        if self.vertices.contains_key(&vertex.hash) {
            return Ok(false);
        }
        if vertex.dependencies.is_empty() {
            return Err(DagError::OrphanVertex(vertex.hash));
        }
        if let Some(missing) = vertex
            .dependencies
            .iter()
            .find(|d| !self.vertices.contains_key(*d))
        {
            return Err(DagError::UnknownDependency {
                vertex: vertex.hash.clone(),
                dependency: missing.clone(),
            });
        }

        let hash = vertex.hash.clone();
        for dependency in &vertex.dependencies {
            let children = self.forward_edges.entry(dependency.clone()).or_default();
            if let Err(pos) = children.binary_search(&hash) {
                children.insert(pos, hash.clone());
            }
            self.frontier.remove(dependency);
        }
        self.forward_edges.insert(hash.clone(), Vec::new());
        self.frontier.insert(hash.clone());
        self.vertices.insert(hash, vertex);
        self.stale.set(true);

        Ok(true)
    }

    /// Attach an externally produced signature. The hash is unaffected.
    ///
    /// Returns `false` if the vertex is unknown.
    pub fn attach_signature(&mut self, hash: &str, signature: Vec<u8>) -> bool {
        match self.vertices.get_mut(hash) {
            Some(vertex) => {
                vertex.signature = Some(signature);
                true
            }
            None => false,
        }
    }

    /// Number of vertices, including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Always `false`: the root is present from construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.vertices.contains_key(hash)
    }

    #[must_use]
    pub fn vertex(&self, hash: &str) -> Option<&Vertex> {
        self.vertices.get(hash)
    }

    /// Current causal tips, sorted by hash.
    #[must_use]
    pub fn frontier(&self) -> Vec<Hash> {
        self.frontier.iter().cloned().collect()
    }

    /// Dependencies of a vertex (empty for the root or unknown hashes).
    #[must_use]
    pub fn dependencies(&self, hash: &str) -> &[Hash] {
        self.vertices
            .get(hash)
            .map_or(&[][..], |v| v.dependencies.as_slice())
    }

    /// Children of a vertex, sorted by hash.
    #[must_use]
    pub fn children(&self, hash: &str) -> &[Hash] {
        self.forward_edges.get(hash).map_or(&[][..], Vec::as_slice)
    }

    /// Iterate every vertex hash in unspecified order.
    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        self.vertices.keys().map(String::as_str)
    }

    /// All vertices in topological order (root first).
    ///
    /// # Errors
    ///
    /// Returns [`DagError::CycleDetected`] if the adjacency is corrupted.
    pub fn vertices(&self) -> Result<Vec<Vertex>, DagError> {
        Ok(self
            .topological_sort()?
            .iter()
            .filter_map(|h| self.vertices.get(h).cloned())
            .collect())
    }

    // -----------------------------------------------------------------------
    // Topological sort
    // -----------------------------------------------------------------------

    /// Reverse-postorder DFS from the root over forward edges.
    ///
    /// # Errors
    ///
    /// Returns [`DagError::CycleDetected`] if a back edge is found.
    pub fn topological_sort(&self) -> Result<Vec<Hash>, DagError> {
        self.topological_sort_from(root_hash(), None)
    }

    /// Reverse-postorder DFS from `origin`, optionally restricted to a
    /// subgraph. `origin` is always the first element of the result.
    ///
    /// Children are visited in hash order, so the result depends only on the
    /// vertex set, never on insertion order.
    ///
    /// # Errors
    ///
    /// - [`DagError::VertexNotFound`] if `origin` is unknown.
    /// - [`DagError::CycleDetected`] if a back edge is found.
    pub fn topological_sort_from(
        &self,
        origin: &str,
        subgraph: Option<&HashSet<Hash>>,
    ) -> Result<Vec<Hash>, DagError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            OnStack,
            Done,
        }

        let origin = self
            .vertices
            .get_key_value(origin)
            .map(|(k, _)| k.as_str())
            .ok_or_else(|| DagError::VertexNotFound(origin.to_string()))?;

        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.vertices.len());
        let mut postorder: Vec<Hash> = Vec::with_capacity(self.vertices.len());
        let mut stack: Vec<(&str, usize)> = vec![(origin, 0)];
        marks.insert(origin, Mark::OnStack);

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            let children = self.children(node);

            if next < children.len() {
                top.1 += 1;
                let child = children[next].as_str();
                if subgraph.is_some_and(|s| !s.contains(child)) {
                    continue;
                }
                match marks.get(child) {
                    Some(Mark::OnStack) => return Err(DagError::CycleDetected(child.to_string())),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child, Mark::OnStack);
                        stack.push((child, 0));
                    }
                }
            } else {
                stack.pop();
                marks.insert(node, Mark::Done);
                postorder.push(node.to_string());
            }
        }

        postorder.reverse();
        Ok(postorder)
    }

    // -----------------------------------------------------------------------
    // Causality oracle
    // -----------------------------------------------------------------------

    /// Rebuild the causality index if a mutation made it stale.
    ///
    /// # Errors
    ///
    /// Returns [`DagError::CycleDetected`] if the graph cannot be sorted.
    pub fn ensure_causality(&self) -> Result<(), DagError> {
        if self.stale.get() {
            let order = self.topological_sort()?;
            self.causality
                .borrow_mut()
                .rebuild(order, |h| self.dependencies(h));
            self.stale.set(false);
            tracing::trace!(vertices = self.vertices.len(), "rebuilt causality index");
        }
        Ok(())
    }

    /// Borrow the (fresh) causality index.
    ///
    /// # Errors
    ///
    /// Same as [`HashGraph::ensure_causality`].
    pub fn causality(&self) -> Result<Ref<'_, CausalityIndex>, DagError> {
        self.ensure_causality()?;
        Ok(self.causality.borrow())
    }

    /// Returns `true` if `a` and `b` are the same vertex or one depends on the
    /// other.
    ///
    /// # Errors
    ///
    /// - [`DagError::VertexNotFound`] if either hash is unknown.
    /// - [`DagError::CycleDetected`] if the index cannot be rebuilt.
    pub fn are_causally_related(&self, a: &str, b: &str) -> Result<bool, DagError> {
        let index = self.causality()?;
        index
            .are_related(a, b)
            .ok_or_else(|| self.missing_of(&[a, b]))
    }

    /// Returns `true` if `ancestor` is a strict transitive dependency of
    /// `descendant`.
    ///
    /// # Errors
    ///
    /// Same as [`HashGraph::are_causally_related`].
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, DagError> {
        let index = self.causality()?;
        index
            .is_ancestor(ancestor, descendant)
            .ok_or_else(|| self.missing_of(&[ancestor, descendant]))
    }

    /// Bitset (over topological positions) of every transitive dependency of
    /// `hash`.
    ///
    /// # Errors
    ///
    /// Same as [`HashGraph::are_causally_related`].
    pub fn reachable_predecessors(&self, hash: &str) -> Result<FixedBitSet, DagError> {
        let index = self.causality()?;
        index
            .reachable(hash)
            .cloned()
            .ok_or_else(|| DagError::VertexNotFound(hash.to_string()))
    }

    /// Causality test by breadth-first search over dependencies. O(V + E);
    /// kept as a cross-check for the bitset oracle.
    #[must_use]
    pub fn are_causally_related_bfs(&self, a: &str, b: &str) -> bool {
        a == b || self.reaches(a, b) || self.reaches(b, a)
    }

    /// Returns `true` if `target` is reachable walking dependencies up from `from`.
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for dependency in self.dependencies(current) {
                if dependency == target {
                    return true;
                }
                if visited.insert(dependency.as_str()) {
                    queue.push_back(dependency.as_str());
                }
            }
        }
        false
    }

    fn missing_of(&self, hashes: &[&str]) -> DagError {
        let missing = hashes
            .iter()
            .find(|h| !self.vertices.contains_key(**h))
            .copied()
            .unwrap_or_default();
        DagError::VertexNotFound(missing.to_string())
    }

    // -----------------------------------------------------------------------
    // Integrity
    // -----------------------------------------------------------------------

    /// Verify the structural invariants: every dependency exists, the
    /// frontier equals the set of childless vertices, and the graph sorts.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn self_check(&self) -> Result<(), DagError> {
        for vertex in self.vertices.values() {
            if vertex.dependencies.is_empty() && !vertex.is_root() {
                return Err(DagError::OrphanVertex(vertex.hash.clone()));
            }
            for dependency in &vertex.dependencies {
                if !self.vertices.contains_key(dependency) {
                    return Err(DagError::UnknownDependency {
                        vertex: vertex.hash.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        for hash in self.vertices.keys() {
            let childless = self.children(hash).is_empty();
            if childless != self.frontier.contains(hash) {
                return Err(DagError::InconsistentFrontier(hash.clone()));
            }
        }

        let order = self.topological_sort()?;
        if order.len() != self.vertices.len() {
            let sorted: HashSet<&str> = order.iter().map(String::as_str).collect();
            let unreachable = self
                .vertices
                .keys()
                .find(|h| !sorted.contains(h.as_str()))
                .cloned()
                .unwrap_or_default();
            return Err(DagError::VertexNotFound(unreachable));
        }
        Ok(())
    }
}

impl Default for HashGraph {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::value::Value;
    use crate::vertex::{Domain, Operation};

    // -------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------

    fn op(n: i64) -> Operation {
        Operation::new(Domain::Program, "add", vec![Value::Int(n)])
    }

    fn child(n: i64, deps: &[&Hash], peer: &str) -> Vertex {
        Vertex::new(peer, op(n), deps.iter().map(|h| (*h).clone()).collect(), n)
    }

    fn diamond() -> (HashGraph, Vertex, Vertex, Vertex) {
        //    root
        //   /    \
        //  left  right
        //   \    /
        //   merge
        let mut graph = HashGraph::new();
        let left = child(1, &[root_hash()], "peer-a");
        let right = child(2, &[root_hash()], "peer-b");
        let merge = child(3, &[&left.hash, &right.hash], "peer-a");
        graph.add_vertex(left.clone()).unwrap();
        graph.add_vertex(right.clone()).unwrap();
        graph.add_vertex(merge.clone()).unwrap();
        (graph, left, right, merge)
    }

    // -------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------

    #[test]
    fn new_graph_holds_only_root() {
        let graph = HashGraph::new();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.frontier(), vec![root_hash().clone()]);
        assert!(graph.contains(root_hash()));
        graph.self_check().unwrap();
    }

    #[test]
    fn add_vertex_moves_frontier() {
        let mut graph = HashGraph::new();
        let a = child(1, &[root_hash()], "peer-a");
        assert!(graph.add_vertex(a.clone()).unwrap());
        assert_eq!(graph.frontier(), vec![a.hash.clone()]);
        assert_eq!(graph.children(root_hash()), &[a.hash.clone()]);
        graph.self_check().unwrap();
    }

    #[test]
    fn fork_has_two_tips_and_merge_collapses_them() {
        let mut graph = HashGraph::new();
        let left = child(1, &[root_hash()], "peer-a");
        let right = child(2, &[root_hash()], "peer-b");
        graph.add_vertex(left.clone()).unwrap();
        graph.add_vertex(right.clone()).unwrap();
        assert_eq!(graph.frontier().len(), 2);

        let merge = child(3, &[&left.hash, &right.hash], "peer-a");
        graph.add_vertex(merge.clone()).unwrap();
        assert_eq!(graph.frontier(), vec![merge.hash.clone()]);
        graph.self_check().unwrap();
    }

    #[test]
    fn re_adding_is_a_noop() {
        let mut graph = HashGraph::new();
        let a = child(1, &[root_hash()], "peer-a");
        assert!(graph.add_vertex(a.clone()).unwrap());
        assert!(!graph.add_vertex(a).unwrap());
        assert_eq!(graph.len(), 2);
        assert!(!graph.add_vertex(root_vertex().clone()).unwrap());
    }

    #[test]
    fn unknown_dependency_is_rejected_without_mutation() {
        let mut graph = HashGraph::new();
        let dangling = "blake3:nope".to_string();
        let v = child(1, &[&dangling], "peer-a");
        let err = graph.add_vertex(v.clone()).unwrap_err();
        assert_eq!(
            err,
            DagError::UnknownDependency {
                vertex: v.hash,
                dependency: dangling,
            }
        );
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.frontier(), vec![root_hash().clone()]);
    }

    #[test]
    fn second_root_is_rejected() {
        let mut graph = HashGraph::new();
        let fake_root = Vertex::new("mallory", op(1), vec![], 0);
        assert_eq!(
            graph.add_vertex(fake_root.clone()).unwrap_err(),
            DagError::OrphanVertex(fake_root.hash)
        );
    }

    #[test]
    fn attach_signature_keeps_hash() {
        let mut graph = HashGraph::new();
        let a = child(1, &[root_hash()], "peer-a");
        graph.add_vertex(a.clone()).unwrap();
        assert!(graph.attach_signature(&a.hash, vec![1, 2]));
        assert_eq!(graph.vertex(&a.hash).unwrap().signature, Some(vec![1, 2]));
        assert!(crate::vertex::hash::verify_hash(graph.vertex(&a.hash).unwrap()));
        assert!(!graph.attach_signature("blake3:none", vec![]));
    }

    // -------------------------------------------------------------------
    // Topological order
    // -------------------------------------------------------------------

    #[test]
    fn topological_sort_respects_dependencies() {
        let (graph, left, right, merge) = diamond();
        let order = graph.topological_sort().unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(&order[0], root_hash());

        let pos: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, h)| (h.as_str(), i)).collect();
        assert!(pos[left.hash.as_str()] < pos[merge.hash.as_str()]);
        assert!(pos[right.hash.as_str()] < pos[merge.hash.as_str()]);
    }

    #[test]
    fn topological_sort_ignores_insertion_order() {
        let left = child(1, &[root_hash()], "peer-a");
        let right = child(2, &[root_hash()], "peer-b");
        let merge = child(3, &[&left.hash, &right.hash], "peer-a");

        let mut g1 = HashGraph::new();
        for v in [&left, &right, &merge] {
            g1.add_vertex(v.clone()).unwrap();
        }
        let mut g2 = HashGraph::new();
        for v in [&right, &left, &merge] {
            g2.add_vertex(v.clone()).unwrap();
        }

        assert_eq!(g1.topological_sort().unwrap(), g2.topological_sort().unwrap());
    }

    #[test]
    fn topological_sort_from_restricts_to_subgraph() {
        let (graph, left, _right, merge) = diamond();
        let subgraph: HashSet<Hash> = [left.hash.clone(), merge.hash.clone()].into();
        let order = graph
            .topological_sort_from(&left.hash, Some(&subgraph))
            .unwrap();
        assert_eq!(order, vec![left.hash, merge.hash]);
    }

    #[test]
    fn topological_sort_from_unknown_origin_fails() {
        let graph = HashGraph::new();
        assert_eq!(
            graph.topological_sort_from("blake3:none", None).unwrap_err(),
            DagError::VertexNotFound("blake3:none".into())
        );
    }

    #[test]
    fn corrupted_edges_report_cycle() {
        let (mut graph, left, _right, merge) = diamond();
        // Forge a back edge merge -> left.
        graph
            .forward_edges
            .get_mut(&merge.hash)
            .unwrap()
            .push(left.hash.clone());
        graph.stale.set(true);

        assert!(matches!(
            graph.topological_sort().unwrap_err(),
            DagError::CycleDetected(_)
        ));
        assert!(matches!(
            graph.are_causally_related(&left.hash, &merge.hash).unwrap_err(),
            DagError::CycleDetected(_)
        ));
    }

    // -------------------------------------------------------------------
    // Causality
    // -------------------------------------------------------------------

    #[test]
    fn causality_matches_structure() {
        let (graph, left, right, merge) = diamond();
        assert!(!graph.are_causally_related(&left.hash, &right.hash).unwrap());
        assert!(graph.are_causally_related(&left.hash, &merge.hash).unwrap());
        assert!(graph.are_causally_related(&merge.hash, root_hash()).unwrap());
        assert!(graph.is_ancestor(&left.hash, &merge.hash).unwrap());
        assert!(!graph.is_ancestor(&merge.hash, &left.hash).unwrap());
        assert_eq!(graph.reachable_predecessors(&merge.hash).unwrap().count_ones(..), 3);
    }

    #[test]
    fn causality_index_refreshes_after_mutation() {
        let (mut graph, left, right, _merge) = diamond();
        assert!(!graph.are_causally_related(&left.hash, &right.hash).unwrap());

        let late = child(9, &[&right.hash], "peer-b");
        graph.add_vertex(late.clone()).unwrap();
        assert!(graph.are_causally_related(&right.hash, &late.hash).unwrap());
        assert!(!graph.are_causally_related(&left.hash, &late.hash).unwrap());
    }

    #[test]
    fn unknown_hash_in_causality_query() {
        let graph = HashGraph::new();
        assert_eq!(
            graph.are_causally_related(root_hash(), "blake3:none").unwrap_err(),
            DagError::VertexNotFound("blake3:none".into())
        );
    }

    #[test]
    fn bitset_oracle_agrees_with_bfs() {
        let mut graph = HashGraph::new();
        let mut tips: Vec<Hash> = vec![root_hash().clone()];
        for n in 1..40_i64 {
            let a = &tips[(n as usize * 7) % tips.len()];
            let b = &tips[(n as usize * 3) % tips.len()];
            let v = child(n, &[a, b], if n % 2 == 0 { "peer-a" } else { "peer-b" });
            graph.add_vertex(v.clone()).unwrap();
            tips.push(v.hash);
        }

        let hashes: Vec<Hash> = graph.hashes().map(str::to_string).collect();
        for a in &hashes {
            for b in &hashes {
                assert_eq!(
                    graph.are_causally_related(a, b).unwrap(),
                    graph.are_causally_related_bfs(a, b),
                    "oracle disagrees for {a} / {b}"
                );
            }
        }
    }

    #[test]
    fn vertices_are_returned_in_topological_order() {
        let (graph, _left, _right, merge) = diamond();
        let vertices = graph.vertices().unwrap();
        assert_eq!(vertices.len(), 4);
        assert!(vertices[0].is_root());
        assert_eq!(vertices[3].hash, merge.hash);
    }
}
