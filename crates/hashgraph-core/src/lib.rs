//! hashgraph-core library.
//!
//! A causal-history engine for replicated programs: every mutation becomes a
//! content-addressed vertex in a DAG, and replicas holding the same vertex
//! set derive the same linear operation order and the same state.
//!
//! # Conventions
//!
//! - **Errors**: each module exposes a `thiserror` enum; every error maps to
//!   a stable [`ErrorCode`]. `anyhow::Result` is used for config loading.
//! - **Logging**: `tracing` macros (`warn!`, `error!`, `debug!`, `trace!`),
//!   inside a per-object span carrying the object and peer ids.

pub mod acl;
pub mod clock;
pub mod config;
pub mod dag;
pub mod error;
pub mod finality;
pub mod object;
pub mod program;
pub mod state;
pub mod value;
pub mod vertex;

pub use acl::{Group, ObjectAcl};
pub use config::{EngineConfig, load_config};
pub use dag::{Action, DagError, HashGraph};
pub use error::ErrorCode;
pub use finality::{AggregatedAttestation, Attestation, FinalityStore};
pub use object::{ApplyError, MergeOutcome, Origin, ReplicatedObject};
pub use program::{Acl, Program, ProgramError};
pub use state::DrpState;
pub use value::Value;
pub use vertex::{Domain, Hash, Operation, PeerId, Vertex};
