//! The contract between the engine and replicated data types.
//!
//! A [`Program`] is any user data type whose mutations should be replicated.
//! Its state must be expressible as a flat list of named [`Value`] fields so
//! that the engine can snapshot it per vertex, rebuild it from a snapshot,
//! and diff two instances.
//!
//! An [`Acl`] is a program that additionally answers permission queries.
//! [`crate::acl::ObjectAcl`] is the built-in implementation.

use std::collections::BTreeMap;

use crate::dag::Action;
use crate::state::DrpState;
use crate::value::Value;
use crate::vertex::{PeerId, Vertex};

/// Errors raised by a program while executing an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgramError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid arguments for {op}: {reason}")]
    InvalidArguments { op: String, reason: String },

    #[error("peer {peer} is not allowed to {action}")]
    Unauthorized { peer: PeerId, action: String },

    #[error("operation rejected: {0}")]
    Rejected(String),
}

impl ProgramError {
    pub fn invalid_args(op: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            op: op.to_string(),
            reason: reason.into(),
        }
    }
}

/// A replicated data type.
///
/// `Clone` is required: the instance handed to the engine at construction is
/// kept as a prototype, and every state reconstruction starts from a clone
/// of it.
pub trait Program: Clone {
    /// Every replicated field with its current value.
    fn fields(&self) -> DrpState;

    /// Overwrite one field. Unknown names are ignored.
    fn set_field(&mut self, name: &str, value: Value);

    /// Run a mutator on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProgramError`] if the operation is unknown, its arguments
    /// are malformed, or the program refuses it. A failed call must leave the
    /// instance unchanged.
    fn apply(
        &mut self,
        caller: &str,
        op_type: &str,
        args: &[Value],
    ) -> Result<Option<Value>, ProgramError>;

    /// Decide the order of two concurrent vertices of this program.
    fn resolve_conflicts(&self, _left: &Vertex, _right: &Vertex) -> Action {
        Action::Nop
    }

    /// Overwrite every field from a snapshot.
    fn restore(&mut self, state: &DrpState) {
        for (name, value) in state.iter() {
            self.set_field(name, value.clone());
        }
    }
}

/// A program that also governs who may do what.
pub trait Acl: Program {
    fn is_admin(&self, peer: &str) -> bool;

    fn is_writer(&self, peer: &str) -> bool;

    fn is_finality_signer(&self, peer: &str) -> bool;

    /// Finality signers with their registered public credential (empty if
    /// the signer has not set one).
    fn finality_signers(&self) -> BTreeMap<PeerId, Vec<u8>>;
}
