//! Simulated replicas: a replicated integer set behind a simulated clock.

use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

use anyhow::{Context, Result};
use hashgraph_core::{
    Action, DrpState, EngineConfig, Hash, MergeOutcome, Operation, Program,
    ProgramError, ReplicatedObject, Value, Vertex,
};
use serde::{Deserialize, Serialize};

use crate::clock::{ClockSpec, SimulatedClock};
use crate::rng::DeterministicRng;

/// Stable index of a replica within one simulation.
pub type ReplicaId = usize;

pub const OP_ADD: &str = "add";
pub const OP_REMOVE: &str = "remove";

/// Values are drawn from a small range so that concurrent add/remove of the
/// same element actually happens.
const VALUE_RANGE: u64 = 8;

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// Add/remove integer set. A remove beats a concurrent add of the same
/// element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntSet {
    items: BTreeSet<i64>,
}

impl IntSet {
    #[must_use]
    pub fn contains(&self, n: i64) -> bool {
        self.items.contains(&n)
    }

    #[must_use]
    pub fn items(&self) -> Vec<i64> {
        self.items.iter().copied().collect()
    }
}

fn element(op: &str, args: &[Value]) -> Result<i64, ProgramError> {
    match args {
        [Value::Int(n)] => Ok(*n),
        _ => Err(ProgramError::invalid_args(op, "expected a single int")),
    }
}

impl Program for IntSet {
    fn fields(&self) -> DrpState {
        DrpState::new().with(
            "items",
            Value::List(self.items.iter().copied().map(Value::Int).collect()),
        )
    }

    fn set_field(&mut self, name: &str, value: Value) {
        if name == "items" {
            self.items = value
                .as_list()
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_int)
                .collect();
        }
    }

    fn apply(
        &mut self,
        _caller: &str,
        op_type: &str,
        args: &[Value],
    ) -> Result<Option<Value>, ProgramError> {
        match op_type {
            OP_ADD => {
                self.items.insert(element(op_type, args)?);
                Ok(None)
            }
            OP_REMOVE => {
                self.items.remove(&element(op_type, args)?);
                Ok(None)
            }
            other => Err(ProgramError::UnknownOperation(other.to_string())),
        }
    }

    fn resolve_conflicts(&self, left: &Vertex, right: &Vertex) -> Action {
        if left.operation.args() != right.operation.args() {
            return Action::Nop;
        }
        match (left.operation.op_type.as_str(), right.operation.op_type.as_str()) {
            (OP_ADD, OP_REMOVE) => Action::DropLeft,
            (OP_REMOVE, OP_ADD) => Action::DropRight,
            _ => Action::Nop,
        }
    }
}

// ---------------------------------------------------------------------------
// Replica
// ---------------------------------------------------------------------------

/// A user mutation issued during the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emitted {
    pub op_type: String,
    pub element: i64,
    /// Hash of the committed vertex; `None` when the call changed nothing.
    pub vertex: Option<Hash>,
}

/// Everything the oracle compares between replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaState {
    pub id: ReplicaId,
    pub vertices: BTreeSet<Hash>,
    pub frontier: Vec<Hash>,
    pub operations: Vec<Operation>,
    pub items: Vec<i64>,
}

#[derive(Debug)]
pub struct SimulatedReplica {
    id: ReplicaId,
    object: ReplicatedObject<IntSet>,
    clock: Rc<SimulatedClock>,
}

/// Peer id used on the wire for replica `id`.
#[must_use]
pub fn peer_name(id: ReplicaId) -> String {
    format!("replica-{id}")
}

impl SimulatedReplica {
    /// Create replica `id` of a group of `replica_count` replicas, all of
    /// which are admins of the shared object.
    #[must_use]
    pub fn new(
        id: ReplicaId,
        replica_count: usize,
        config: EngineConfig,
        clock: ClockSpec,
    ) -> Self {
        let clock = Rc::new(SimulatedClock::new(clock));
        let admins = (0..replica_count).map(peer_name);
        let object =
            ReplicatedObject::with_admins(peer_name(id), IntSet::default(), admins, config, Rc::clone(&clock))
                .with_id("sim-object");
        Self { id, object, clock }
    }

    #[must_use]
    pub const fn id(&self) -> ReplicaId {
        self.id
    }

    #[must_use]
    pub const fn object(&self) -> &ReplicatedObject<IntSet> {
        &self.object
    }

    #[must_use]
    pub fn clock(&self) -> &SimulatedClock {
        &self.clock
    }

    /// Issue one random add or remove.
    ///
    /// # Errors
    ///
    /// Fails if the local call is rejected, which never happens for an admin
    /// replica and therefore indicates a bug in the core.
    pub fn emit(&mut self, rng: &mut DeterministicRng) -> Result<Emitted> {
        let op_type = if rng.hit_rate_percent(60) { OP_ADD } else { OP_REMOVE };
        let element = i64::try_from(rng.next_bounded(VALUE_RANGE)).unwrap_or(0);

        let before = self.object.graph().len();
        self.object
            .call(op_type, vec![Value::Int(element)])
            .with_context(|| format!("replica {} failed to {op_type} {element}", self.id))?;
        let vertex = (self.object.graph().len() > before)
            .then(|| self.object.graph().frontier().into_iter().next())
            .flatten();

        Ok(Emitted {
            op_type: op_type.to_string(),
            element,
            vertex,
        })
    }

    /// Vertices this replica has that `known` lacks.
    ///
    /// # Errors
    ///
    /// Propagates graph errors as context-wrapped failures.
    pub fn vertices_missing_from(&self, known: &HashSet<Hash>) -> Result<Vec<Vertex>> {
        self.object
            .vertices_missing_from(known)
            .with_context(|| format!("replica {} failed to list vertices", self.id))
    }

    /// Hashes of every vertex this replica holds.
    #[must_use]
    pub fn known_hashes(&self) -> HashSet<Hash> {
        self.object.graph().hashes().map(str::to_string).collect()
    }

    /// Merge a delivered batch.
    ///
    /// # Errors
    ///
    /// Fails only on non-recoverable merge errors; vertices with unknown
    /// dependencies come back in [`MergeOutcome::missing`].
    pub fn receive(&mut self, vertices: &[Vertex]) -> Result<MergeOutcome> {
        self.object
            .apply_vertices(vertices)
            .with_context(|| format!("replica {} failed to merge {} vertices", self.id, vertices.len()))
    }

    /// Snapshot the state the oracle compares.
    ///
    /// # Errors
    ///
    /// Propagates linearization failures.
    pub fn snapshot(&self) -> Result<ReplicaState> {
        let operations = self
            .object
            .linearize()
            .with_context(|| format!("replica {} failed to linearize", self.id))?;
        Ok(ReplicaState {
            id: self.id,
            vertices: self.object.graph().hashes().map(str::to_string).collect(),
            frontier: self.object.graph().frontier(),
            operations,
            items: self.object.program().items(),
        })
    }
}
