#![no_main]

use hashgraph_core::config::AclConfig;
use hashgraph_core::vertex::wire::decode_vertices;
use hashgraph_core::{DrpState, EngineConfig, ObjectAcl, Program, ProgramError, ReplicatedObject, Value};
use libfuzzer_sys::fuzz_target;

/// Accepts any operation and records how many were applied.
#[derive(Debug, Clone, Default)]
struct Counter(i64);

impl Program for Counter {
    fn fields(&self) -> DrpState {
        DrpState::new().with("count", Value::Int(self.0))
    }

    fn set_field(&mut self, name: &str, value: Value) {
        if name == "count" {
            self.0 = value.as_int().unwrap_or_default();
        }
    }

    fn apply(&mut self, _caller: &str, _op: &str, _args: &[Value]) -> Result<Option<Value>, ProgramError> {
        self.0 += 1;
        Ok(None)
    }
}

fuzz_target!(|data: &[u8]| {
    // Decoded batches from a peer must never panic the merge path, whatever
    // their dependencies, timestamps or operations.
    let Ok(vertices) = decode_vertices(data) else {
        return;
    };
    let mut object = ReplicatedObject::new(
        "fuzz",
        Counter::default(),
        ObjectAcl::new(["fuzz"], &AclConfig { permissionless: true, ..AclConfig::default() }),
        EngineConfig::default(),
    );
    let _ = object.apply_vertices(&vertices);
    object.graph().self_check().expect("graph invariants hold after merge");
});
