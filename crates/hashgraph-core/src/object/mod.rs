//! Replicated objects: a program, its ACL, and their shared causal history.
//!
//! A [`ReplicatedObject`] owns one [`HashGraph`], one [`StateStore`] and one
//! [`FinalityStore`]. It has two entry points that mutate them:
//!
//! - **Local calls** ([`ReplicatedObject::call`], [`ReplicatedObject::call_acl`])
//!   build a vertex on the current frontier, run it through the
//!   [`pipeline`], and commit it only if it changed anything.
//! - **Merges** ([`ReplicatedObject::apply_vertices`]) run each remote vertex
//!   through the same pipeline, then recompute the live state from the new
//!   frontier so that it matches the linearization of the whole graph.
//!
//! Both take `&mut self`, so at most one mutation is ever in flight against
//! the live state.
//!
//! # Snapshots
//!
//! Every committed vertex gets a program and an ACL snapshot of the state
//! *including* its own effect. The state at any dependency set is rebuilt
//! from the snapshot at its LCA plus the linearized delta above it.

pub mod pipeline;

use std::collections::HashSet;
use std::fmt;

use crate::acl::ObjectAcl;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::dag::{DagError, HashGraph, find_lca, linearize};
use crate::finality::{Attestation, FinalityStore};
use crate::program::{Acl, Program, ProgramError};
use crate::state::{StateError, StateStore};
use crate::value::Value;
use crate::vertex::{Domain, Hash, Operation, PeerId, Vertex, root_hash};

use pipeline::{ApplyContext, Pipeline, resolve_pair};

/// Why a vertex could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("hash mismatch: stored {stored}, recomputed {expected}")]
    InvalidHash { stored: Hash, expected: Hash },

    #[error("invalid dependencies for {vertex}: {reason}")]
    InvalidDependencies { vertex: Hash, reason: String },

    #[error("invalid timestamp for {vertex}: {reason}")]
    InvalidTimestamp { vertex: Hash, reason: String },

    #[error("peer {peer} is not a writer")]
    NotAWriter { peer: PeerId },

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Program(#[from] ProgramError),
}

/// Which entry point produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    CallFn,
    Merge,
}

/// Result of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// `true` only if every vertex of the batch is now in the graph.
    pub applied: bool,
    /// Hashes that could not be applied; the caller should resync them.
    pub missing: Vec<Hash>,
}

type Subscriber = Box<dyn FnMut(Origin, &[Vertex])>;

// ---------------------------------------------------------------------------
// ReplicatedObject
// ---------------------------------------------------------------------------

pub struct ReplicatedObject<P: Program, A: Acl = ObjectAcl> {
    id: String,
    peer_id: PeerId,
    config: EngineConfig,
    graph: HashGraph,
    states: StateStore,
    finality: FinalityStore,
    program: P,
    acl: A,
    program_proto: P,
    acl_proto: A,
    pipeline: Pipeline<P, A>,
    clock: Box<dyn Clock>,
    subscribers: Vec<Subscriber>,
    span: tracing::Span,
}

impl<P: Program, A: Acl> fmt::Debug for ReplicatedObject<P, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedObject")
            .field("id", &self.id)
            .field("peer_id", &self.peer_id)
            .field("vertices", &self.graph.len())
            .field("frontier", &self.graph.frontier())
            .finish_non_exhaustive()
    }
}

impl<P: Program> ReplicatedObject<P> {
    /// Create an object with the default [`ObjectAcl`], built from the
    /// `[acl]` section of `config` with `admins` as its initial admins.
    pub fn with_admins<I, S>(
        peer_id: impl Into<PeerId>,
        program: P,
        admins: I,
        config: EngineConfig,
        clock: impl Clock + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PeerId>,
    {
        let acl = ObjectAcl::new(admins, &config.acl);
        Self::with_clock(peer_id, program, acl, config, clock)
    }
}

impl<P: Program, A: Acl> ReplicatedObject<P, A> {
    /// Create an object around freshly constructed `program` and `acl`
    /// instances, which also serve as the prototypes for every state
    /// reconstruction.
    pub fn new(peer_id: impl Into<PeerId>, program: P, acl: A, config: EngineConfig) -> Self {
        Self::with_clock(peer_id, program, acl, config, SystemClock)
    }

    pub fn with_clock(
        peer_id: impl Into<PeerId>,
        program: P,
        acl: A,
        config: EngineConfig,
        clock: impl Clock + 'static,
    ) -> Self {
        let peer_id = peer_id.into();
        let created = clock.now_ms();
        let id = blake3::hash(format!("{peer_id}\t{created}").as_bytes())
            .to_hex()
            .to_string();

        let mut states = StateStore::new();
        states.set(Domain::Program, root_hash().clone(), program.fields());
        states.set(Domain::Acl, root_hash().clone(), acl.fields());
        let finality = FinalityStore::new(&config.finality);

        Self {
            span: object_span(&id, &peer_id),
            id,
            peer_id,
            config,
            graph: HashGraph::new(),
            states,
            finality,
            program_proto: program.clone(),
            acl_proto: acl.clone(),
            program,
            acl,
            pipeline: Pipeline::standard(),
            clock: Box::new(clock),
            subscribers: Vec::new(),
        }
    }

    /// Replace the generated object id (e.g. with the id of an existing
    /// object this replica is joining).
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self.span = object_span(&self.id, &self.peer_id);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The live program state.
    #[must_use]
    pub const fn program(&self) -> &P {
        &self.program
    }

    /// The live ACL state.
    #[must_use]
    pub const fn acl(&self) -> &A {
        &self.acl
    }

    #[must_use]
    pub const fn graph(&self) -> &HashGraph {
        &self.graph
    }

    #[must_use]
    pub const fn states(&self) -> &StateStore {
        &self.states
    }

    #[must_use]
    pub const fn finality(&self) -> &FinalityStore {
        &self.finality
    }

    pub const fn finality_mut(&mut self) -> &mut FinalityStore {
        &mut self.finality
    }

    /// Names of the pipeline stages, in order.
    pub fn stage_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.pipeline.names()
    }

    /// Register a callback invoked after every committed local call and
    /// every merge that applied at least one vertex.
    pub fn subscribe(&mut self, callback: impl FnMut(Origin, &[Vertex]) + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    // -----------------------------------------------------------------------
    // Local path
    // -----------------------------------------------------------------------

    /// Invoke a program operation locally.
    ///
    /// Returns the operation's result. If the operation changes nothing, no
    /// vertex is created.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::NotAWriter`] if this replica may not write,
    /// [`ApplyError::Program`] if the program rejects the call, and other
    /// variants if the graph or snapshots are inconsistent.
    pub fn call(&mut self, op_type: &str, args: Vec<Value>) -> Result<Option<Value>, ApplyError> {
        self.call_in(Domain::Program, op_type, args)
    }

    /// Invoke an ACL operation locally (`grant`, `revoke`, `set_key`).
    ///
    /// # Errors
    ///
    /// Same as [`ReplicatedObject::call`].
    pub fn call_acl(&mut self, op_type: &str, args: Vec<Value>) -> Result<Option<Value>, ApplyError> {
        self.call_in(Domain::Acl, op_type, args)
    }

    fn call_in(
        &mut self,
        domain: Domain,
        op_type: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ApplyError> {
        let span = self.span.clone();
        let _guard = span.enter();

        let now = self.clock.now_ms();
        let dependencies = self.graph.frontier();
        let timestamp = dependencies
            .iter()
            .filter_map(|h| self.graph.vertex(h))
            .map(|v| v.timestamp)
            .fold(now, i64::max);
        let vertex = Vertex::new(
            self.peer_id.clone(),
            Operation::new(domain, op_type, args),
            dependencies,
            timestamp,
        );

        let ctx = ApplyContext::new(vertex, now, self.program_proto.clone(), self.acl_proto.clone());
        let ctx = self.pipeline.run(self, ctx)?;
        if ctx.is_unchanged() {
            tracing::debug!(%domain, op = op_type, "operation changed nothing; not committed");
            return Ok(ctx.result);
        }

        for (name, value) in &ctx.program_changes {
            self.program.set_field(name, value.clone());
        }
        for (name, value) in &ctx.acl_changes {
            self.acl.set_field(name, value.clone());
        }
        let result = ctx.result.clone();
        let vertex = self.commit(ctx)?;
        tracing::debug!(hash = %vertex.hash, %domain, op = op_type, "committed local vertex");
        self.notify(Origin::CallFn, std::slice::from_ref(&vertex));
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Merge path
    // -----------------------------------------------------------------------

    /// Merge remote vertices.
    ///
    /// The batch may arrive in any order; each vertex is applied once all of
    /// its dependencies are present. Vertices that are already known, and
    /// the NOP sentinel, are skipped. Vertices that fail validation,
    /// authorization or execution, or whose dependencies never arrive, are
    /// reported in [`MergeOutcome::missing`].
    ///
    /// # Errors
    ///
    /// Only unrecoverable conditions (missing snapshots, a corrupted graph)
    /// abort the merge.
    pub fn apply_vertices(&mut self, batch: &[Vertex]) -> Result<MergeOutcome, ApplyError> {
        let span = self.span.clone();
        let _guard = span.enter();

        let mut pending: Vec<&Vertex> = batch
            .iter()
            .filter(|v| !v.operation.is_nop() && !self.graph.contains(&v.hash))
            .collect();
        let mut applied: Vec<Vertex> = Vec::new();
        let mut missing: Vec<Hash> = Vec::new();
        let mut rejected: HashSet<Hash> = HashSet::new();

        loop {
            let mut progress = false;
            let mut deferred = Vec::with_capacity(pending.len());
            for vertex in pending {
                if self.graph.contains(&vertex.hash) || rejected.contains(&vertex.hash) {
                    continue;
                }
                if !vertex.dependencies.iter().all(|d| self.graph.contains(d)) {
                    deferred.push(vertex);
                    continue;
                }
                progress = true;
                match self.apply_remote(vertex.clone()) {
                    Ok(v) => applied.push(v),
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(hash = %vertex.hash, error = %e, code = %e.code(), "rejected remote vertex");
                        rejected.insert(vertex.hash.clone());
                        missing.push(vertex.hash.clone());
                    }
                    Err(e) => {
                        tracing::error!(hash = %vertex.hash, error = %e, code = %e.code(), "merge aborted");
                        return Err(e);
                    }
                }
            }
            pending = deferred;
            if pending.is_empty() || !progress {
                break;
            }
        }

        for vertex in pending {
            if !missing.contains(&vertex.hash) {
                tracing::debug!(hash = %vertex.hash, "dependencies never arrived");
                missing.push(vertex.hash.clone());
            }
        }

        if !applied.is_empty() {
            self.refresh_live_state()?;
            tracing::debug!(applied = applied.len(), missing = missing.len(), "merged batch");
            self.notify(Origin::Merge, &applied);
        }

        Ok(MergeOutcome {
            applied: missing.is_empty(),
            missing,
        })
    }

    /// Merge a single remote vertex whose dependencies are all known.
    ///
    /// Returns `Ok(false)` if the vertex is already in the graph.
    ///
    /// # Errors
    ///
    /// Returns the [`ApplyError`] that rejected the vertex.
    pub fn apply_vertex(&mut self, vertex: Vertex) -> Result<bool, ApplyError> {
        let span = self.span.clone();
        let _guard = span.enter();

        if self.graph.contains(&vertex.hash) {
            return Ok(false);
        }
        let vertex = self.apply_remote(vertex)?;
        self.refresh_live_state()?;
        self.notify(Origin::Merge, std::slice::from_ref(&vertex));
        Ok(true)
    }

    fn apply_remote(&mut self, vertex: Vertex) -> Result<Vertex, ApplyError> {
        let now = self.clock.now_ms();
        let ctx = ApplyContext::new(vertex, now, self.program_proto.clone(), self.acl_proto.clone());
        let ctx = self.pipeline.run(self, ctx)?;
        self.commit(ctx)
    }

    fn commit(&mut self, ctx: ApplyContext<P, A>) -> Result<Vertex, ApplyError> {
        let ApplyContext {
            vertex, program, acl, ..
        } = ctx;
        self.graph.add_vertex(vertex.clone())?;
        self.states.set(Domain::Program, vertex.hash.clone(), program.fields());
        self.states.set(Domain::Acl, vertex.hash.clone(), acl.fields());
        self.finality
            .initialize_state(&vertex.hash, acl.finality_signers());
        Ok(vertex)
    }

    /// Recompute the live state from the frontier.
    fn refresh_live_state(&mut self) -> Result<(), ApplyError> {
        let frontier = self.graph.frontier();
        let found = find_lca(&self.graph, &frontier)?;
        let (program, acl) = self.rebuild(&found.lca, &found.delta)?;
        for (name, value) in self.program.fields().diff(&program.fields()) {
            self.program.set_field(&name, value);
        }
        for (name, value) in self.acl.fields().diff(&acl.fields()) {
            self.acl.set_field(&name, value);
        }
        Ok(())
    }

    fn notify(&mut self, origin: Origin, vertices: &[Vertex]) {
        for subscriber in &mut self.subscribers {
            subscriber(origin, vertices);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Every vertex in topological order, for shipping to another replica.
    ///
    /// # Errors
    ///
    /// Returns [`DagError::CycleDetected`] if the graph is corrupted.
    pub fn vertices(&self) -> Result<Vec<Vertex>, DagError> {
        self.graph.vertices()
    }

    /// Vertices of this replica's graph that are not in `known`.
    ///
    /// # Errors
    ///
    /// Returns [`DagError::CycleDetected`] if the graph is corrupted.
    pub fn vertices_missing_from(&self, known: &HashSet<Hash>) -> Result<Vec<Vertex>, DagError> {
        Ok(self
            .graph
            .vertices()?
            .into_iter()
            .filter(|v| !v.is_root() && !known.contains(&v.hash))
            .collect())
    }

    /// The linearized operation sequence of the whole graph.
    ///
    /// # Errors
    ///
    /// Propagates [`DagError`] from the linearizer.
    pub fn linearize(&self) -> Result<Vec<Operation>, DagError> {
        linearize(&self.graph, |l, r| {
            resolve_pair(&self.program_proto, &self.acl_proto, l, r)
        })
    }

    // -----------------------------------------------------------------------
    // Signatures
    // -----------------------------------------------------------------------

    /// Attach an externally produced signature to a vertex.
    pub fn sign_vertex(&mut self, hash: &str, signature: Vec<u8>) -> bool {
        self.graph.attach_signature(hash, signature)
    }

    /// Attest to every vertex among `hashes` this replica may sign and has
    /// not signed yet. `signer` produces the signature bytes for a hash.
    pub fn attest<'a>(
        &mut self,
        hashes: impl IntoIterator<Item = &'a str>,
        mut signer: impl FnMut(&str) -> Vec<u8>,
    ) -> Vec<Attestation> {
        let span = self.span.clone();
        let _guard = span.enter();

        let mut recorded = Vec::new();
        for hash in hashes {
            if !self.finality.can_sign(&self.peer_id, hash) || self.finality.signed(&self.peer_id, hash) {
                continue;
            }
            let attestation = Attestation {
                data: hash.to_string(),
                signature: signer(hash),
            };
            match self.finality.add_signature(&self.peer_id, &attestation, true) {
                Ok(true) => recorded.push(attestation),
                Ok(false) => {}
                Err(e) => tracing::warn!(%hash, error = %e, "local attestation rejected"),
            }
        }
        recorded
    }
}

fn object_span(id: &str, peer_id: &str) -> tracing::Span {
    tracing::debug_span!("object", id = %id, peer = %peer_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::acl::{Group, OP_GRANT};
    use crate::clock::FixedClock;
    use crate::config::{AclConfig, ConflictResolution};
    use crate::state::DrpState;

    /// A last-writer-wins register keyed by linearization order.
    #[derive(Debug, Clone, Default, PartialEq)]
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
                ("get", []) => Ok(Some(Value::Int(self.value))),
                ("set", _) => Err(ProgramError::invalid_args("set", "expected [int]")),
                (other, _) => Err(ProgramError::UnknownOperation(other.to_string())),
            }
        }
    }

    fn make_object(peer: &str, admins: &[&str]) -> ReplicatedObject<Register> {
        ReplicatedObject::with_clock(
            peer,
            Register::default(),
            ObjectAcl::new(admins.iter().copied(), &AclConfig::default()),
            EngineConfig::default(),
            FixedClock(1_000),
        )
    }

    fn set(n: i64) -> Vec<Value> {
        vec![Value::Int(n)]
    }

    #[test]
    fn pipeline_stages_are_named_in_order() {
        let object = make_object("a", &["a"]);
        let names: Vec<&str> = object.stage_names().collect();
        assert_eq!(
            names,
            vec!["validate", "locate_lca", "replay", "authorize", "execute", "diff"]
        );
    }

    #[test]
    fn local_call_commits_vertex_and_snapshot() {
        let mut object = make_object("a", &["a"]);
        object.call("set", set(5)).unwrap();

        assert_eq!(object.program().value, 5);
        assert_eq!(object.graph().len(), 2);
        let tip = object.graph().frontier()[0].clone();
        assert_eq!(
            object.states().get(Domain::Program, &tip),
            Some(&DrpState::new().with("value", 5_i64))
        );
        assert!(object.finality().can_sign("a", &tip));
    }

    #[test]
    fn no_op_call_creates_no_vertex() {
        let mut object = make_object("a", &["a"]);
        object.call("set", set(0)).unwrap();
        assert_eq!(object.graph().len(), 1);

        let got = object.call("get", vec![]).unwrap();
        assert_eq!(got, Some(Value::Int(0)));
        assert_eq!(object.graph().len(), 1);
    }

    #[test]
    fn acl_section_of_config_reaches_the_acl() {
        let mut config = EngineConfig::default();
        config.acl.permissionless = true;
        config.acl.conflict_resolution = ConflictResolution::GrantWins;
        let mut object =
            ReplicatedObject::with_admins("b", Register::default(), ["a"], config, FixedClock(1_000));

        assert!(object.acl().is_permissionless());
        assert_eq!(object.acl().conflict_resolution(), ConflictResolution::GrantWins);
        object.call("set", set(1)).unwrap();
        assert_eq!(object.program().value, 1);
    }

    #[test]
    fn non_writer_call_fails() {
        let mut object = make_object("b", &["a"]);
        let err = object.call("set", set(1)).unwrap_err();
        assert_eq!(err, ApplyError::NotAWriter { peer: "b".into() });
        assert_eq!(object.graph().len(), 1);
    }

    #[test]
    fn program_errors_propagate_to_the_caller() {
        let mut object = make_object("a", &["a"]);
        assert!(matches!(
            object.call("explode", vec![]).unwrap_err(),
            ApplyError::Program(ProgramError::UnknownOperation(_))
        ));
    }

    #[test]
    fn local_timestamp_never_precedes_dependencies() {
        let mut remote = ReplicatedObject::with_clock(
            "a",
            Register::default(),
            ObjectAcl::new(["a", "b"], &AclConfig::default()),
            EngineConfig::default(),
            FixedClock(5_000),
        );
        remote.call("set", set(1)).unwrap();

        let mut local = ReplicatedObject::with_clock(
            "b",
            Register::default(),
            ObjectAcl::new(["a", "b"], &AclConfig::default()),
            EngineConfig::default(),
            FixedClock(1_000),
        );
        local.apply_vertices(&remote.vertices().unwrap()).unwrap();
        local.call("set", set(2)).unwrap();

        let tip = local.graph().frontier()[0].clone();
        assert_eq!(local.graph().vertex(&tip).unwrap().timestamp, 5_000);
    }

    #[test]
    fn merge_reaches_the_same_state() {
        let mut a = make_object("a", &["a"]);
        a.call("set", set(3)).unwrap();
        a.call("set", set(4)).unwrap();

        let mut b = make_object("b", &["a"]);
        let outcome = b.apply_vertices(&a.vertices().unwrap()).unwrap();
        assert_eq!(
            outcome,
            MergeOutcome {
                applied: true,
                missing: vec![]
            }
        );
        assert_eq!(b.program(), a.program());
        assert_eq!(b.graph().frontier(), a.graph().frontier());
    }

    #[test]
    fn merge_accepts_batches_out_of_order() {
        let mut a = make_object("a", &["a"]);
        for n in 1..=4 {
            a.call("set", set(n)).unwrap();
        }
        let mut batch = a.vertices().unwrap();
        batch.reverse();

        let mut b = make_object("b", &["a"]);
        let outcome = b.apply_vertices(&batch).unwrap();
        assert!(outcome.applied);
        assert_eq!(b.program().value, 4);
    }

    #[test]
    fn merge_reports_vertices_with_absent_dependencies() {
        let mut a = make_object("a", &["a"]);
        a.call("set", set(1)).unwrap();
        a.call("set", set(2)).unwrap();
        let all = a.vertices().unwrap();
        let last = all.last().unwrap().clone();

        let mut b = make_object("b", &["a"]);
        let outcome = b.apply_vertices(std::slice::from_ref(&last)).unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.missing, vec![last.hash]);
        assert_eq!(b.graph().len(), 1);
    }

    #[test]
    fn merge_rejects_tampered_vertex_but_keeps_the_rest() {
        let mut a = make_object("a", &["a"]);
        a.call("set", set(1)).unwrap();
        let good = a.vertices().unwrap().pop().unwrap();

        let mut forged = Vertex::new(
            "a",
            Operation::new(Domain::Program, "set", set(9)),
            vec![root_hash().clone()],
            1_000,
        );
        forged.operation.value = Some(set(10));

        let mut b = make_object("b", &["a"]);
        let outcome = b.apply_vertices(&[forged.clone(), good.clone()]).unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.missing, vec![forged.hash]);
        assert!(b.graph().contains(&good.hash));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = make_object("a", &["a"]);
        a.call("set", set(7)).unwrap();
        let batch = a.vertices().unwrap();

        let mut b = make_object("b", &["a"]);
        b.apply_vertices(&batch).unwrap();
        let calls = Rc::new(RefCell::new(0));
        let seen = Rc::clone(&calls);
        b.subscribe(move |_, _| *seen.borrow_mut() += 1);

        let outcome = b.apply_vertices(&batch).unwrap();
        assert!(outcome.applied);
        assert_eq!(b.graph().len(), 2);
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn subscribers_see_origin_and_vertices() {
        let log: Rc<RefCell<Vec<(Origin, usize)>>> = Rc::default();
        let sink = Rc::clone(&log);

        let mut a = make_object("a", &["a", "b"]);
        a.subscribe(move |origin, vs| sink.borrow_mut().push((origin, vs.len())));
        a.call("set", set(1)).unwrap();

        let mut b = make_object("b", &["a", "b"]);
        b.call("set", set(2)).unwrap();
        a.apply_vertices(&b.vertices().unwrap()).unwrap();

        assert_eq!(*log.borrow(), vec![(Origin::CallFn, 1), (Origin::Merge, 1)]);
    }

    #[test]
    fn granted_writer_can_call_after_merge() {
        let mut admin = make_object("a", &["a"]);
        admin
            .call_acl(OP_GRANT, vec![Value::from("b"), Value::from(Group::Writer)])
            .unwrap();

        let mut b = make_object("b", &["a"]);
        assert!(b.call("set", set(1)).is_err());
        b.apply_vertices(&admin.vertices().unwrap()).unwrap();
        assert!(b.acl().is_writer("b"));
        b.call("set", set(1)).unwrap();
        assert_eq!(b.program().value, 1);
    }

    #[test]
    fn attest_signs_eligible_vertices_once() {
        let mut a = make_object("a", &["a"]);
        a.call("set", set(1)).unwrap();
        let tip = a.graph().frontier()[0].clone();

        let first = a.attest([tip.as_str()], |h| {
            crate::finality::DigestScheme::sign(b"", h.as_bytes())
        });
        assert_eq!(first.len(), 1);
        let again = a.attest([tip.as_str()], |_| Vec::new());
        assert!(again.is_empty());
        assert_eq!(a.finality().signature_count(&tip), Some(1));
        assert!(a.finality().is_finalized(&tip));
    }

    #[test]
    fn sign_vertex_attaches_without_rehashing() {
        let mut a = make_object("a", &["a"]);
        a.call("set", set(1)).unwrap();
        let tip = a.graph().frontier()[0].clone();
        assert!(a.sign_vertex(&tip, vec![1, 2, 3]));
        assert_eq!(a.graph().vertex(&tip).unwrap().signature, Some(vec![1, 2, 3]));
        assert!(!a.sign_vertex("blake3:unknown", vec![]));
    }
}
