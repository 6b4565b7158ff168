//! Per-vertex state snapshots.
//!
//! # Sub-modules
//!
//! - [`store`]: snapshot maps keyed by vertex hash, one per domain, and
//!   reconstruction of live instances from them. ([`StateStore`])

pub mod store;

pub use store::StateStore;

use serde::{Deserialize, Serialize};

use crate::value::Value;
use crate::vertex::{Domain, Hash};

/// Field that is never compared by [`DrpState::diff`]. Programs use it for
/// per-call scratch data that must not count as a state change.
pub const CONTEXT_FIELD: &str = "context";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Reconstruction was requested for a vertex that was never snapshotted.
    #[error("no {domain} state recorded for vertex {hash}")]
    StateNotFound { domain: Domain, hash: Hash },
}

/// An ordered list of named field values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrpState {
    fields: Vec<(String, Value)>,
}

impl DrpState {
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Builder form of [`DrpState::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field, replacing an existing one with the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields of `other` that are new or differ from `self`, ignoring
    /// [`CONTEXT_FIELD`].
    #[must_use]
    pub fn diff(&self, other: &Self) -> Vec<(String, Value)> {
        other
            .fields
            .iter()
            .filter(|(name, _)| name != CONTEXT_FIELD)
            .filter(|(name, value)| self.get(name) != Some(value))
            .cloned()
            .collect()
    }
}

impl FromIterator<(String, Value)> for DrpState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut state = Self::new();
        for (name, value) in iter {
            state.insert(name, value);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut state = DrpState::new().with("a", 1_i64).with("b", 2_i64);
        state.insert("a", 3_i64);
        let names: Vec<&str> = state.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(state.get("a"), Some(&Value::Int(3)));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn diff_reports_changed_and_added_fields() {
        let before = DrpState::new().with("a", 1_i64).with("b", "x");
        let after = DrpState::new().with("a", 1_i64).with("b", "y").with("c", true);
        let changed = before.diff(&after);
        assert_eq!(
            changed,
            vec![
                ("b".to_string(), Value::from("y")),
                ("c".to_string(), Value::Bool(true)),
            ]
        );
    }

    #[test]
    fn diff_ignores_context() {
        let before = DrpState::new().with("a", 1_i64).with(CONTEXT_FIELD, "caller-1");
        let after = DrpState::new().with("a", 1_i64).with(CONTEXT_FIELD, "caller-2");
        assert!(before.diff(&after).is_empty());
    }

    #[test]
    fn identical_states_have_no_diff() {
        let s = DrpState::new().with("set", Value::List(vec![Value::Int(1)]));
        assert!(s.diff(&s.clone()).is_empty());
    }
}
