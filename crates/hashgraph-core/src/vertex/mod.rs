//! Vertices: hash-identified operation invocations with causal dependencies.
//!
//! # Identity
//!
//! A vertex's `hash` covers its creator, its operation, its (sorted)
//! dependency hashes and its timestamp. Because dependencies are part of the
//! hash input, the graph is a Merkle-DAG: altering any vertex changes the hash
//! of every descendant.
//!
//! # Root
//!
//! Every graph starts from the same [`root_vertex`], a sentinel carrying the
//! NOP operation and no dependencies. Its hash is computed exactly like any
//! other vertex, so all replicas agree on it without coordination.
//!
//! # Sub-modules
//!
//! - [`hash`]: hash computation and verification.
//! - [`wire`]: byte encoding at the replication boundary.

pub mod hash;
pub mod wire;

use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Identity of a replica (the creator of a vertex).
pub type PeerId = String;

/// Content-addressed vertex identifier, `blake3:<hex>`.
pub type Hash = String;

/// Operation type carried by the root sentinel.
pub const NOP_OPERATION: &str = "-1";

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Which of the two parallel states an operation mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Domain {
    /// Capability state (who may write, administer, attest).
    Acl,
    /// The user-defined replicated program.
    Program,
}

impl Domain {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Acl => "acl",
            Self::Program => "program",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single mutator invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub domain: Domain,
    /// Name of the mutator, e.g. `"add"` or `"grant"`.
    pub op_type: String,
    /// Arguments. `None` only for the NOP sentinel.
    pub value: Option<Vec<Value>>,
}

impl Operation {
    #[must_use]
    pub fn new(domain: Domain, op_type: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            domain,
            op_type: op_type.into(),
            value: Some(args),
        }
    }

    /// The sentinel operation stored on the root vertex.
    #[must_use]
    pub fn nop() -> Self {
        Self {
            domain: Domain::Program,
            op_type: NOP_OPERATION.to_string(),
            value: None,
        }
    }

    #[must_use]
    pub fn is_nop(&self) -> bool {
        self.op_type == NOP_OPERATION && self.value.is_none()
    }

    /// Arguments as a slice (empty for the NOP).
    #[must_use]
    pub fn args(&self) -> &[Value] {
        self.value.as_deref().unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Vertex
// ---------------------------------------------------------------------------

/// One node of the causal history.
///
/// Immutable once committed, except for `signature`, which an external signer
/// may attach later. The signature is not part of the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub hash: Hash,
    pub peer_id: PeerId,
    pub operation: Operation,
    /// Parent hashes, sorted and deduplicated.
    pub dependencies: Vec<Hash>,
    /// Milliseconds since the Unix epoch; never below any dependency's.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
}

impl Vertex {
    /// Build a vertex and stamp its content hash.
    #[must_use]
    pub fn new(
        peer_id: impl Into<PeerId>,
        operation: Operation,
        mut dependencies: Vec<Hash>,
        timestamp: i64,
    ) -> Self {
        dependencies.sort();
        dependencies.dedup();
        let mut vertex = Self {
            hash: Hash::new(),
            peer_id: peer_id.into(),
            operation,
            dependencies,
            timestamp,
            signature: None,
        };
        vertex.hash = hash::compute_hash(&vertex);
        vertex
    }

    /// Returns `true` if this is the canonical root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.hash == *root_hash()
    }
}

static ROOT: LazyLock<Vertex> =
    LazyLock::new(|| Vertex::new(PeerId::new(), Operation::nop(), Vec::new(), 0));

/// The canonical root vertex shared by every graph.
#[must_use]
pub fn root_vertex() -> &'static Vertex {
    &ROOT
}

/// Hash of the canonical root vertex.
#[must_use]
pub fn root_hash() -> &'static Hash {
    &ROOT.hash
}
