//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::BTreeSet;

use hashgraph_core::clock::FixedClock;
use hashgraph_core::{
    Action, DrpState, EngineConfig, Program, ProgramError, ReplicatedObject, Value, Vertex,
};

/// An integer set where a delete beats a concurrent add of the same value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetProgram {
    items: BTreeSet<i64>,
}

impl SetProgram {
    pub fn has(&self, n: i64) -> bool {
        self.items.contains(&n)
    }

    pub fn items(&self) -> Vec<i64> {
        self.items.iter().copied().collect()
    }
}

fn single_int(op: &str, args: &[Value]) -> Result<i64, ProgramError> {
    match args {
        [Value::Int(n)] => Ok(*n),
        _ => Err(ProgramError::invalid_args(op, "expected [int]")),
    }
}

impl Program for SetProgram {
    fn fields(&self) -> DrpState {
        DrpState::new().with(
            "items",
            Value::List(self.items.iter().map(|n| Value::Int(*n)).collect()),
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
            "add" => {
                self.items.insert(single_int(op_type, args)?);
                Ok(None)
            }
            "delete" => {
                self.items.remove(&single_int(op_type, args)?);
                Ok(None)
            }
            "has" => Ok(Some(Value::Bool(self.has(single_int(op_type, args)?)))),
            other => Err(ProgramError::UnknownOperation(other.to_string())),
        }
    }

    fn resolve_conflicts(&self, left: &Vertex, right: &Vertex) -> Action {
        if left.operation.args() != right.operation.args() {
            return Action::Nop;
        }
        match (left.operation.op_type.as_str(), right.operation.op_type.as_str()) {
            ("add", "delete") => Action::DropLeft,
            ("delete", "add") => Action::DropRight,
            _ => Action::Nop,
        }
    }
}

pub type Replica = ReplicatedObject<SetProgram>;

pub fn make_replica(peer: &str, admins: &[&str]) -> Replica {
    make_replica_at(peer, admins, 1_000)
}

pub fn make_replica_at(peer: &str, admins: &[&str], now_ms: i64) -> Replica {
    ReplicatedObject::with_admins(
        peer,
        SetProgram::default(),
        admins.iter().copied(),
        EngineConfig::default(),
        FixedClock(now_ms),
    )
}

pub fn int(n: i64) -> Vec<Value> {
    vec![Value::Int(n)]
}

/// Ship every vertex `from` has to `to`.
pub fn push(from: &Replica, to: &mut Replica) {
    let outcome = to
        .apply_vertices(&from.vertices().unwrap())
        .expect("merge must not abort");
    assert!(outcome.applied, "missing after push: {:?}", outcome.missing);
}

/// Exchange vertices both ways.
pub fn sync(a: &mut Replica, b: &mut Replica) {
    push(a, b);
    push(b, a);
}

pub fn sorted_hashes(replica: &Replica) -> Vec<String> {
    let mut hashes: Vec<String> = replica.graph().hashes().map(str::to_string).collect();
    hashes.sort();
    hashes
}

pub fn frontier_tip(replica: &Replica) -> String {
    let frontier = replica.graph().frontier();
    assert_eq!(frontier.len(), 1, "expected a single tip");
    frontier[0].clone()
}
