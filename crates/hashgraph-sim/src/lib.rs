//! hashgraph-sim library.
//!
//! Drives several replicas of one replicated object through random user
//! calls and anti-entropy gossip over a fault-injecting network, then runs a
//! final full sync and checks that every replica converged.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` with context for every fallible step.
//! - **Logging**: `tracing` macros; the binary installs the subscriber.

pub mod campaign;
pub mod clock;
pub mod network;
pub mod oracle;
pub mod replica;
pub mod rng;

use anyhow::{Result, bail};
use hashgraph_core::{EngineConfig, Hash};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::ClockConfig;
use crate::network::{FaultConfig, NetworkMessage, SimulatedNetwork};
use crate::oracle::{ConvergenceOracle, OracleResult};
use crate::replica::{ReplicaId, ReplicaState, SimulatedReplica};
use crate::rng::DeterministicRng;

pub use crate::campaign::{CampaignConfig, CampaignReport, run_campaign};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub replica_count: usize,
    pub rounds: u64,
    /// Peers each replica gossips to per round.
    pub fanout: usize,
    /// Chance per round that a replica issues a user call.
    pub call_rate_percent: u8,
    pub fault: FaultConfig,
    pub clock: ClockConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            replica_count: 4,
            rounds: 24,
            fanout: 2,
            call_rate_percent: 60,
            fault: FaultConfig::default(),
            clock: ClockConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if the replica count or round count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.replica_count == 0 {
            bail!("replica_count must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    Call {
        replica: ReplicaId,
        op_type: String,
        element: i64,
        vertex: Option<Hash>,
    },
    Send {
        from: ReplicaId,
        to: ReplicaId,
        vertices: usize,
        dropped: bool,
        duplicated: bool,
        delay_rounds: u8,
    },
    Deliver {
        from: ReplicaId,
        to: ReplicaId,
        vertices: usize,
        missing: usize,
    },
    Reorder {
        messages: usize,
    },
    Partition {
        replica: ReplicaId,
        isolated: bool,
    },
    FreezeClock {
        replica: ReplicaId,
        rounds: u8,
    },
    FinalSync {
        passes: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationResult {
    pub trace: Vec<TraceEvent>,
    pub states: Vec<ReplicaState>,
    pub oracle: OracleResult,
    /// Committed vertices across all replicas, excluding the root.
    pub vertex_count: usize,
    /// Whether a fault or a merge with missing dependencies occurred.
    pub interesting_state_reached: bool,
}

impl SimulationResult {
    #[must_use]
    pub const fn converged(&self) -> bool {
        self.oracle.passed
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    network: SimulatedNetwork,
    replicas: Vec<SimulatedReplica>,
    trace: Vec<TraceEvent>,
    interesting: bool,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = DeterministicRng::new(config.seed);
        let replicas = (0..config.replica_count)
            .map(|id| {
                let spec = config.clock.assign(&mut rng);
                SimulatedReplica::new(id, config.replica_count, EngineConfig::default(), spec)
            })
            .collect();
        Ok(Self {
            network: SimulatedNetwork::new(config.fault),
            config,
            rng,
            replicas,
            trace: Vec::new(),
            interesting: false,
        })
    }

    #[must_use]
    pub fn replicas(&self) -> &[SimulatedReplica] {
        &self.replicas
    }

    /// Run every round, then heal the network and sync all replicas.
    ///
    /// # Errors
    ///
    /// Fails if a replica rejects one of its own calls or a merge aborts
    /// with a non-recoverable error.
    pub fn run(&mut self) -> Result<SimulationResult> {
        info!(
            seed = self.config.seed,
            replicas = self.config.replica_count,
            rounds = self.config.rounds,
            "simulation started"
        );
        for round in 0..self.config.rounds {
            self.step(round)?;
        }
        self.final_sync()?;

        let states = self
            .replicas
            .iter()
            .map(SimulatedReplica::snapshot)
            .collect::<Result<Vec<_>>>()?;
        let oracle = ConvergenceOracle::check_all(&states);
        let vertex_count = states
            .first()
            .map_or(0, |s| s.vertices.len().saturating_sub(1));
        info!(converged = oracle.passed, vertex_count, "simulation finished");

        Ok(SimulationResult {
            trace: std::mem::take(&mut self.trace),
            states,
            oracle,
            vertex_count,
            interesting_state_reached: self.interesting,
        })
    }

    fn record(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }

    fn step(&mut self, round: u64) -> Result<()> {
        for replica in &self.replicas {
            replica.clock().set_round(round);
        }
        self.inject_faults(round);

        for id in 0..self.replicas.len() {
            if self.rng.hit_rate_percent(self.config.call_rate_percent) {
                let emitted = self.replicas[id].emit(&mut self.rng)?;
                self.record(
                    round,
                    TraceEventKind::Call {
                        replica: id,
                        op_type: emitted.op_type,
                        element: emitted.element,
                        vertex: emitted.vertex,
                    },
                );
            }
            self.gossip(id, round)?;
        }

        let outcome = self.network.deliver_ready(round, &mut self.rng);
        if outcome.reordered {
            self.interesting = true;
            self.record(
                round,
                TraceEventKind::Reorder {
                    messages: outcome.delivered.len(),
                },
            );
        }
        for message in outcome.delivered {
            self.deliver(round, &message)?;
        }
        Ok(())
    }

    fn inject_faults(&mut self, round: u64) {
        let fault = self.config.fault;
        let count = self.replicas.len();
        if count > 1 && self.rng.hit_rate_percent(fault.partition_rate_percent) {
            let replica = self.rng.index(count);
            let isolated = !self.network.is_partitioned(replica);
            self.network.set_partitioned(replica, isolated);
            self.interesting = true;
            self.record(round, TraceEventKind::Partition { replica, isolated });
        }
        if self.rng.hit_rate_percent(fault.freeze_rate_percent) {
            let replica = self.rng.index(count);
            self.replicas[replica]
                .clock()
                .freeze_for(u64::from(fault.freeze_duration_rounds));
            self.interesting = true;
            self.record(
                round,
                TraceEventKind::FreezeClock {
                    replica,
                    rounds: fault.freeze_duration_rounds,
                },
            );
        }
    }

    /// Send `from`'s vertices that each chosen peer lacks.
    fn gossip(&mut self, from: ReplicaId, round: u64) -> Result<()> {
        let peers = self
            .rng
            .choose_peers(self.replicas.len(), from, self.config.fanout);
        for to in peers {
            let known = self.replicas[to].known_hashes();
            let vertices = self.replicas[from].vertices_missing_from(&known)?;
            if vertices.is_empty() {
                continue;
            }
            let count = vertices.len();
            let sent = self
                .network
                .send(NetworkMessage { from, to, vertices }, round, &mut self.rng);
            self.interesting |= sent.dropped || sent.duplicated;
            self.record(
                round,
                TraceEventKind::Send {
                    from,
                    to,
                    vertices: count,
                    dropped: sent.dropped,
                    duplicated: sent.duplicated,
                    delay_rounds: sent.delay_rounds,
                },
            );
        }
        Ok(())
    }

    fn deliver(&mut self, round: u64, message: &NetworkMessage) -> Result<()> {
        let outcome = self.replicas[message.to].receive(&message.vertices)?;
        if !outcome.missing.is_empty() {
            debug!(
                from = message.from,
                to = message.to,
                missing = outcome.missing.len(),
                "delivered batch had unresolved vertices"
            );
            self.interesting = true;
        }
        self.record(
            round,
            TraceEventKind::Deliver {
                from: message.from,
                to: message.to,
                vertices: message.vertices.len(),
                missing: outcome.missing.len(),
            },
        );
        Ok(())
    }

    /// Heal partitions, flush the network and push missing vertices
    /// between every ordered pair until a full pass changes nothing.
    fn final_sync(&mut self) -> Result<()> {
        let round = self.config.rounds;
        self.network.heal();
        for message in self.network.drain() {
            self.deliver(round, &message)?;
        }

        let count = self.replicas.len();
        let mut passes = 0;
        loop {
            passes += 1;
            let mut changed = false;
            for from in 0..count {
                for to in (0..count).filter(|&to| to != from) {
                    let known = self.replicas[to].known_hashes();
                    let vertices = self.replicas[from].vertices_missing_from(&known)?;
                    if vertices.is_empty() {
                        continue;
                    }
                    let outcome = self.replicas[to].receive(&vertices)?;
                    if !outcome.missing.is_empty() {
                        bail!(
                            "replica {to} could not resolve {} vertices from replica {from} during final sync",
                            outcome.missing.len()
                        );
                    }
                    changed = true;
                }
            }
            if !changed || passes > count {
                break;
            }
        }
        self.record(round, TraceEventKind::FinalSync { passes });
        Ok(())
    }
}
