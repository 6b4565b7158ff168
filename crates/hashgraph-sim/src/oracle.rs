//! Post-simulation convergence checks.
//!
//! After the final sync every replica must agree on:
//!
//! 1. **Vertex set**: identical hashes and identical frontier.
//! 2. **Linearization**: identical operation sequences.
//! 3. **Program state**: identical set contents.
//!
//! Each check compares every replica against the first one, so a single
//! divergent replica yields one violation per failing check.

use std::fmt;

use hashgraph_core::Hash;

use crate::replica::{ReplicaId, ReplicaState};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Accumulate failures from `other`.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    VertexSet {
        reference: ReplicaId,
        replica: ReplicaId,
        only_in_reference: Vec<Hash>,
        only_in_replica: Vec<Hash>,
        frontier_differs: bool,
    },
    Linearization {
        reference: ReplicaId,
        replica: ReplicaId,
        /// Index of the first differing operation (or the shorter length).
        first_difference: usize,
        reference_len: usize,
        replica_len: usize,
    },
    ProgramState {
        reference: ReplicaId,
        replica: ReplicaId,
        reference_items: Vec<i64>,
        replica_items: Vec<i64>,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VertexSet {
                reference,
                replica,
                only_in_reference,
                only_in_replica,
                frontier_differs,
            } => write!(
                f,
                "vertex sets of replicas {reference} and {replica} differ \
                 ({} only in {reference}, {} only in {replica}, frontier differs: {frontier_differs})",
                only_in_reference.len(),
                only_in_replica.len()
            ),
            Self::Linearization {
                reference,
                replica,
                first_difference,
                reference_len,
                replica_len,
            } => write!(
                f,
                "linearizations of replicas {reference} and {replica} diverge at \
                 operation {first_difference} (lengths {reference_len} vs {replica_len})"
            ),
            Self::ProgramState {
                reference,
                replica,
                reference_items,
                replica_items,
            } => write!(
                f,
                "program state of replicas {reference} and {replica} differs \
                 ({reference_items:?} vs {replica_items:?})"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

pub struct ConvergenceOracle;

impl ConvergenceOracle {
    #[must_use]
    pub fn check_vertex_sets(states: &[ReplicaState]) -> OracleResult {
        let Some((reference, rest)) = states.split_first() else {
            return OracleResult::pass();
        };
        let violations = rest
            .iter()
            .filter(|s| s.vertices != reference.vertices || s.frontier != reference.frontier)
            .map(|s| InvariantViolation::VertexSet {
                reference: reference.id,
                replica: s.id,
                only_in_reference: reference.vertices.difference(&s.vertices).cloned().collect(),
                only_in_replica: s.vertices.difference(&reference.vertices).cloned().collect(),
                frontier_differs: s.frontier != reference.frontier,
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_linearizations(states: &[ReplicaState]) -> OracleResult {
        let Some((reference, rest)) = states.split_first() else {
            return OracleResult::pass();
        };
        let violations = rest
            .iter()
            .filter(|s| s.operations != reference.operations)
            .map(|s| {
                let first_difference = reference
                    .operations
                    .iter()
                    .zip(&s.operations)
                    .position(|(a, b)| a != b)
                    .unwrap_or_else(|| reference.operations.len().min(s.operations.len()));
                InvariantViolation::Linearization {
                    reference: reference.id,
                    replica: s.id,
                    first_difference,
                    reference_len: reference.operations.len(),
                    replica_len: s.operations.len(),
                }
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_program_state(states: &[ReplicaState]) -> OracleResult {
        let Some((reference, rest)) = states.split_first() else {
            return OracleResult::pass();
        };
        let violations = rest
            .iter()
            .filter(|s| s.items != reference.items)
            .map(|s| InvariantViolation::ProgramState {
                reference: reference.id,
                replica: s.id,
                reference_items: reference.items.clone(),
                replica_items: s.items.clone(),
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_all(states: &[ReplicaState]) -> OracleResult {
        Self::check_vertex_sets(states)
            .merge(Self::check_linearizations(states))
            .merge(Self::check_program_state(states))
    }
}
