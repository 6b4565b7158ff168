//! The live state of a replica must equal a from-scratch replay of its
//! whole-graph linearization, however the history was assembled.

use std::collections::BTreeMap;

use hashgraph_core::clock::FixedClock;
use hashgraph_core::{
    Action, DrpState, EngineConfig, Hash, Program, ProgramError, ReplicatedObject, Value, Vertex,
};
use proptest::prelude::*;

const PEERS: [&str; 3] = ["a", "b", "c"];

/// Last-writer register; concurrent writes are ordered by vertex hash, so the
/// final value depends on every relative position in the linearization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Register {
    value: i64,
}

impl Program for Register {
    fn fields(&self) -> DrpState {
        DrpState::new().with("value", self.value)
    }

    fn set_field(&mut self, name: &str, value: Value) {
        if name == "value" {
            self.value = value.as_int().unwrap_or_default();
        }
    }

    fn apply(
        &mut self,
        _caller: &str,
        op_type: &str,
        args: &[Value],
    ) -> Result<Option<Value>, ProgramError> {
        match (op_type, args) {
            ("set", [Value::Int(n)]) => {
                self.value = *n;
                Ok(None)
            }
            (other, _) => Err(ProgramError::UnknownOperation(other.to_string())),
        }
    }

    fn resolve_conflicts(&self, left: &Vertex, right: &Vertex) -> Action {
        if left.hash > right.hash {
            Action::Swap
        } else {
            Action::Nop
        }
    }
}

type Replica = ReplicatedObject<Register>;

fn replica(peer: &str) -> Replica {
    ReplicatedObject::with_admins(
        peer,
        Register::default(),
        PEERS,
        EngineConfig::default(),
        FixedClock(1_000),
    )
}

fn replayed(replica: &Replica) -> i64 {
    let mut program = Register::default();
    for op in replica.linearize().unwrap() {
        program.apply("", &op.op_type, op.args()).unwrap();
    }
    program.value
}

#[derive(Debug, Clone)]
enum Step {
    Set { peer: usize, value: i64 },
    Ship { from: usize, to: usize },
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..PEERS.len(), 0..6_i64).prop_map(|(peer, value)| Step::Set { peer, value }),
        1 => (0..PEERS.len(), 0..PEERS.len()).prop_map(|(from, to)| Step::Ship { from, to }),
    ]
}

fn ship(replicas: &mut [Replica], from: usize, to: usize) {
    let batch = replicas[from].vertices().unwrap();
    let outcome = replicas[to].apply_vertices(&batch).unwrap();
    assert!(outcome.applied, "missing: {:?}", outcome.missing);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn live_state_matches_replayed_linearization(steps in prop::collection::vec(arb_step(), 1..24)) {
        let mut replicas: Vec<Replica> = PEERS.iter().map(|p| replica(p)).collect();
        for step in &steps {
            match *step {
                Step::Set { peer, value } => {
                    replicas[peer].call("set", vec![Value::Int(value)]).unwrap();
                }
                Step::Ship { from, to } if from != to => ship(&mut replicas, from, to),
                Step::Ship { .. } => {}
            }
        }

        for r in &replicas {
            prop_assert_eq!(r.program().value, replayed(r), "peer {}", r.peer_id());
        }

        // A fresh replica receiving everything in one batch.
        let mut all: BTreeMap<Hash, Vertex> = BTreeMap::new();
        for r in &replicas {
            for v in r.vertices().unwrap() {
                all.insert(v.hash.clone(), v);
            }
        }
        let mut fresh = replica("observer");
        let batch: Vec<Vertex> = all.into_values().collect();
        prop_assert!(fresh.apply_vertices(&batch).unwrap().applied);
        prop_assert_eq!(fresh.program().value, replayed(&fresh));

        for to in 0..replicas.len() {
            for from in 0..replicas.len() {
                if from != to {
                    ship(&mut replicas, from, to);
                }
            }
        }
        for r in &replicas {
            prop_assert_eq!(r.program().value, fresh.program().value, "peer {}", r.peer_id());
        }
    }
}
