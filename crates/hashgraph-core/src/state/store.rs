use std::collections::HashMap;

use crate::program::Program;
use crate::vertex::{Domain, Hash};

use super::{DrpState, StateError};

/// Snapshots of ACL and program state, keyed by the vertex whose effects
/// they include.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    acl: HashMap<Hash, DrpState>,
    program: HashMap<Hash, DrpState>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    const fn map(&self, domain: Domain) -> &HashMap<Hash, DrpState> {
        match domain {
            Domain::Acl => &self.acl,
            Domain::Program => &self.program,
        }
    }

    #[must_use]
    pub fn get(&self, domain: Domain, hash: &str) -> Option<&DrpState> {
        self.map(domain).get(hash)
    }

    pub fn set(&mut self, domain: Domain, hash: impl Into<Hash>, state: DrpState) {
        let map = match domain {
            Domain::Acl => &mut self.acl,
            Domain::Program => &mut self.program,
        };
        map.insert(hash.into(), state);
    }

    #[must_use]
    pub fn contains(&self, domain: Domain, hash: &str) -> bool {
        self.map(domain).contains_key(hash)
    }

    /// Number of snapshots held for a domain.
    #[must_use]
    pub fn len(&self, domain: Domain) -> usize {
        self.map(domain).len()
    }

    /// Rebuild program and ACL instances as they stood after `hash`.
    ///
    /// Each instance starts as a clone of its prototype and has the stored
    /// snapshot applied on top.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::StateNotFound`] if either domain has no
    /// snapshot for `hash`.
    pub fn reconstruct<P: Program, A: Program>(
        &self,
        hash: &str,
        program_proto: &P,
        acl_proto: &A,
    ) -> Result<(P, A), StateError> {
        let program_state = self.require(Domain::Program, hash)?;
        let acl_state = self.require(Domain::Acl, hash)?;

        let mut program = program_proto.clone();
        program.restore(program_state);
        let mut acl = acl_proto.clone();
        acl.restore(acl_state);
        Ok((program, acl))
    }

    fn require(&self, domain: Domain, hash: &str) -> Result<&DrpState, StateError> {
        self.get(domain, hash).ok_or_else(|| StateError::StateNotFound {
            domain,
            hash: hash.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramError;
    use crate::value::Value;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        n: i64,
    }

    impl Program for Counter {
        fn fields(&self) -> DrpState {
            DrpState::new().with("n", self.n)
        }

        fn set_field(&mut self, name: &str, value: Value) {
            if name == "n" {
                self.n = value.as_int().unwrap_or_default();
            }
        }

        fn apply(
            &mut self,
            _caller: &str,
            op_type: &str,
            _args: &[Value],
        ) -> Result<Option<Value>, ProgramError> {
            match op_type {
                "inc" => {
                    self.n += 1;
                    Ok(None)
                }
                other => Err(ProgramError::UnknownOperation(other.to_string())),
            }
        }
    }

    #[test]
    fn reconstruct_applies_snapshot_to_prototype() {
        let mut store = StateStore::new();
        store.set(Domain::Program, "h", DrpState::new().with("n", 5_i64));
        store.set(Domain::Acl, "h", DrpState::new().with("n", 9_i64));

        let (program, acl) = store
            .reconstruct("h", &Counter::default(), &Counter::default())
            .unwrap();
        assert_eq!(program, Counter { n: 5 });
        assert_eq!(acl, Counter { n: 9 });
    }

    #[test]
    fn reconstruct_does_not_touch_prototype() {
        let mut store = StateStore::new();
        store.set(Domain::Program, "h", DrpState::new().with("n", 5_i64));
        store.set(Domain::Acl, "h", DrpState::new());
        let proto = Counter { n: 1 };
        let (mut program, _) = store.reconstruct("h", &proto, &proto).unwrap();
        program.apply("p", "inc", &[]).unwrap();
        assert_eq!(proto.n, 1);
        assert_eq!(program.n, 6);
    }

    #[test]
    fn missing_snapshot_is_state_not_found() {
        let mut store = StateStore::new();
        store.set(Domain::Program, "h", DrpState::new());
        let err = store
            .reconstruct("h", &Counter::default(), &Counter::default())
            .unwrap_err();
        assert_eq!(
            err,
            StateError::StateNotFound {
                domain: Domain::Acl,
                hash: "h".into()
            }
        );
        assert!(store.contains(Domain::Program, "h"));
        assert_eq!(store.len(Domain::Acl), 0);
    }
}
