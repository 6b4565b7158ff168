//! The vertex application pipeline.
//!
//! Every vertex, local or remote, goes through the same ordered stages
//! before it is committed:
//!
//! 1. `validate`: hash, dependencies, timestamps.
//! 2. `locate_lca`: replay base of the vertex's dependencies.
//! 3. `replay`: rebuild program and ACL state as of the dependencies.
//! 4. `authorize`: program operations need a writer.
//! 5. `execute`: run the operation on the rebuilt state.
//! 6. `diff`: fields that differ from the live state.
//!
//! Each stage takes the [`ApplyContext`] by value and returns it (or an
//! error); stages only read the object.

use std::collections::HashSet;

use crate::dag::{Action, LcaResult, find_lca, linearize_vertices};
use crate::program::{Acl, Program};
use crate::value::Value;
use crate::vertex::hash::compute_hash;
use crate::vertex::{Domain, Vertex};

use super::{ApplyError, ReplicatedObject};

/// Working state for one vertex moving through the pipeline.
#[derive(Debug, Clone)]
pub struct ApplyContext<P, A> {
    pub vertex: Vertex,
    /// Local clock reading at the start of the pipeline.
    pub now: i64,
    pub lca: Option<LcaResult>,
    /// Program state: as of the dependencies after `replay`, and including
    /// the vertex's own effect after `execute`.
    pub program: P,
    pub acl: A,
    /// Return value of the operation.
    pub result: Option<Value>,
    pub program_changes: Vec<(String, Value)>,
    pub acl_changes: Vec<(String, Value)>,
}

impl<P: Program, A: Acl> ApplyContext<P, A> {
    pub fn new(vertex: Vertex, now: i64, program: P, acl: A) -> Self {
        Self {
            vertex,
            now,
            lca: None,
            program,
            acl,
            result: None,
            program_changes: Vec::new(),
            acl_changes: Vec::new(),
        }
    }

    /// `true` if executing the vertex left the live state untouched.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.program_changes.is_empty() && self.acl_changes.is_empty()
    }
}

pub type Stage<P, A> =
    fn(&ReplicatedObject<P, A>, ApplyContext<P, A>) -> Result<ApplyContext<P, A>, ApplyError>;

/// An ordered list of named stages.
pub struct Pipeline<P: Program, A: Acl> {
    stages: Vec<(&'static str, Stage<P, A>)>,
}

impl<P: Program, A: Acl> Pipeline<P, A> {
    /// `validate → locate_lca → replay → authorize → execute → diff`.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stages: vec![
                ("validate", validate::<P, A> as Stage<P, A>),
                ("locate_lca", locate_lca::<P, A> as Stage<P, A>),
                ("replay", replay::<P, A> as Stage<P, A>),
                ("authorize", authorize::<P, A> as Stage<P, A>),
                ("execute", execute::<P, A> as Stage<P, A>),
                ("diff", diff::<P, A> as Stage<P, A>),
            ],
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|(name, _)| *name)
    }

    /// Run every stage in order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first stage's [`ApplyError`].
    pub fn run(
        &self,
        object: &ReplicatedObject<P, A>,
        mut ctx: ApplyContext<P, A>,
    ) -> Result<ApplyContext<P, A>, ApplyError> {
        for (name, stage) in &self.stages {
            ctx = stage(object, ctx).inspect_err(|e| {
                tracing::debug!(stage = *name, error = %e, "pipeline stage failed");
            })?;
        }
        Ok(ctx)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn validate<P: Program, A: Acl>(
    object: &ReplicatedObject<P, A>,
    ctx: ApplyContext<P, A>,
) -> Result<ApplyContext<P, A>, ApplyError> {
    let vertex = &ctx.vertex;
    let expected = compute_hash(vertex);
    if expected != vertex.hash {
        return Err(ApplyError::InvalidHash {
            stored: vertex.hash.clone(),
            expected,
        });
    }
    if vertex.dependencies.is_empty() {
        return Err(ApplyError::InvalidDependencies {
            vertex: vertex.hash.clone(),
            reason: "a non-root vertex needs at least one dependency".into(),
        });
    }
    for dependency in &vertex.dependencies {
        let Some(parent) = object.graph.vertex(dependency) else {
            return Err(ApplyError::InvalidDependencies {
                vertex: vertex.hash.clone(),
                reason: format!("unknown dependency {dependency}"),
            });
        };
        if parent.timestamp > vertex.timestamp {
            return Err(ApplyError::InvalidTimestamp {
                vertex: vertex.hash.clone(),
                reason: format!("older than dependency {dependency}"),
            });
        }
    }
    if let Some(drift) = object.config.validation.max_future_drift_ms
        && vertex.timestamp > ctx.now.saturating_add(drift)
    {
        return Err(ApplyError::InvalidTimestamp {
            vertex: vertex.hash.clone(),
            reason: format!("more than {drift} ms in the future"),
        });
    }
    Ok(ctx)
}

fn locate_lca<P: Program, A: Acl>(
    object: &ReplicatedObject<P, A>,
    mut ctx: ApplyContext<P, A>,
) -> Result<ApplyContext<P, A>, ApplyError> {
    ctx.lca = Some(find_lca(&object.graph, &ctx.vertex.dependencies)?);
    Ok(ctx)
}

fn replay<P: Program, A: Acl>(
    object: &ReplicatedObject<P, A>,
    mut ctx: ApplyContext<P, A>,
) -> Result<ApplyContext<P, A>, ApplyError> {
    let found = match ctx.lca.take() {
        Some(found) => found,
        None => find_lca(&object.graph, &ctx.vertex.dependencies)?,
    };
    let (program, acl) = object.rebuild(&found.lca, &found.delta)?;
    ctx.program = program;
    ctx.acl = acl;
    ctx.lca = Some(found);
    Ok(ctx)
}

fn authorize<P: Program, A: Acl>(
    _object: &ReplicatedObject<P, A>,
    ctx: ApplyContext<P, A>,
) -> Result<ApplyContext<P, A>, ApplyError> {
    // ACL operations are checked by the ACL itself (admin-only grants).
    if ctx.vertex.operation.domain == Domain::Program && !ctx.acl.is_writer(&ctx.vertex.peer_id) {
        return Err(ApplyError::NotAWriter {
            peer: ctx.vertex.peer_id.clone(),
        });
    }
    Ok(ctx)
}

fn execute<P: Program, A: Acl>(
    _object: &ReplicatedObject<P, A>,
    mut ctx: ApplyContext<P, A>,
) -> Result<ApplyContext<P, A>, ApplyError> {
    let op = &ctx.vertex.operation;
    let caller = &ctx.vertex.peer_id;
    ctx.result = match op.domain {
        Domain::Acl => ctx.acl.apply(caller, &op.op_type, op.args())?,
        Domain::Program => ctx.program.apply(caller, &op.op_type, op.args())?,
    };
    Ok(ctx)
}

fn diff<P: Program, A: Acl>(
    object: &ReplicatedObject<P, A>,
    mut ctx: ApplyContext<P, A>,
) -> Result<ApplyContext<P, A>, ApplyError> {
    ctx.program_changes = object.program.fields().diff(&ctx.program.fields());
    ctx.acl_changes = object.acl.fields().diff(&ctx.acl.fields());
    Ok(ctx)
}

// ---------------------------------------------------------------------------
// Replay helpers
// ---------------------------------------------------------------------------

/// Route a concurrent pair to the policy owning its domain.
pub fn resolve_pair<P: Program, A: Acl>(program: &P, acl: &A, left: &Vertex, right: &Vertex) -> Action {
    match (left.operation.domain, right.operation.domain) {
        (Domain::Acl, Domain::Acl) => acl.resolve_conflicts(left, right),
        (Domain::Program, Domain::Program) => program.resolve_conflicts(left, right),
        _ => Action::Nop,
    }
}

/// Apply linearized vertices on top of a base state. An operation that fails
/// here is skipped: it was valid against its own dependencies, and the
/// conflict policy decides how it fares against concurrent history.
pub fn replay_onto<P: Program, A: Acl>(program: &mut P, acl: &mut A, vertices: &[Vertex]) {
    for vertex in vertices {
        let op = &vertex.operation;
        let outcome = match op.domain {
            Domain::Acl => acl.apply(&vertex.peer_id, &op.op_type, op.args()),
            Domain::Program => program.apply(&vertex.peer_id, &op.op_type, op.args()),
        };
        if let Err(e) = outcome {
            tracing::debug!(hash = %vertex.hash, error = %e, "skipping replayed operation");
        }
    }
}

impl<P: Program, A: Acl> ReplicatedObject<P, A> {
    /// State after `lca` plus the linearized `delta`.
    pub(super) fn rebuild(&self, lca: &str, delta: &HashSet<String>) -> Result<(P, A), ApplyError> {
        let (mut program, mut acl) =
            self.states
                .reconstruct(lca, &self.program_proto, &self.acl_proto)?;
        if !delta.is_empty() {
            let ordered = linearize_vertices(&self.graph, lca, Some(delta), |l, r| {
                resolve_pair(&self.program_proto, &self.acl_proto, l, r)
            })?;
            replay_onto(&mut program, &mut acl, &ordered);
        }
        Ok((program, acl))
    }
}
