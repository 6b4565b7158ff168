//! Fault-injecting network carrying vertex batches between replicas.

use std::collections::BTreeSet;

use hashgraph_core::Vertex;
use serde::{Deserialize, Serialize};

use crate::replica::ReplicaId;
use crate::rng::DeterministicRng;

/// Fault probabilities for message delivery and clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Longest delivery delay, in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of batches lost in transit.
    pub drop_rate_percent: u8,
    /// Percentage of batches delivered twice.
    pub duplicate_rate_percent: u8,
    /// Chance of reversing the ready queue at each delivery tick.
    pub reorder_rate_percent: u8,
    /// Chance per round of isolating (or healing) a random replica.
    pub partition_rate_percent: u8,
    /// Chance per round of freezing a random replica's clock.
    pub freeze_rate_percent: u8,
    /// Rounds a frozen clock stays frozen.
    pub freeze_duration_rounds: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 5,
            partition_rate_percent: 2,
            freeze_rate_percent: 2,
            freeze_duration_rounds: 2,
        }
    }
}

impl FaultConfig {
    /// No faults at all: every message arrives in the next tick.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_delay_rounds: 0,
            drop_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
            partition_rate_percent: 0,
            freeze_rate_percent: 0,
            freeze_duration_rounds: 0,
        }
    }
}

/// A vertex batch in flight between two replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMessage {
    /// Sender.
    pub from: ReplicaId,
    /// Receiver.
    pub to: ReplicaId,
    /// Sender vertices absent from the receiver's known set, in
    /// topological order.
    pub vertices: Vec<Vertex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingMessage {
    deliver_at_round: u64,
    message: NetworkMessage,
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    /// Lost before enqueue, either to the drop rate or a partition.
    pub dropped: bool,
    /// A second copy was enqueued.
    pub duplicated: bool,
    /// Rounds until the message becomes ready.
    pub delay_rounds: u8,
}

impl SendOutcome {
    const DROPPED: Self = Self {
        dropped: true,
        duplicated: false,
        delay_rounds: 0,
    };
}

/// Messages that became ready this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverOutcome {
    /// In delivery order.
    pub delivered: Vec<NetworkMessage>,
    /// The ready queue was reversed before delivery.
    pub reordered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNetwork {
    pending: Vec<PendingMessage>,
    partitioned: BTreeSet<ReplicaId>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            pending: Vec::new(),
            partitioned: BTreeSet::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    pub fn set_partitioned(&mut self, replica: ReplicaId, isolated: bool) {
        if isolated {
            self.partitioned.insert(replica);
        } else {
            self.partitioned.remove(&replica);
        }
    }

    #[must_use]
    pub fn is_partitioned(&self, replica: ReplicaId) -> bool {
        self.partitioned.contains(&replica)
    }

    /// Reconnect every replica.
    pub fn heal(&mut self) {
        self.partitioned.clear();
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Enqueue a message, subject to partitions, drops, delay and
    /// duplication.
    pub fn send(
        &mut self,
        message: NetworkMessage,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        if self.is_partitioned(message.from) || self.is_partitioned(message.to) {
            return SendOutcome::DROPPED;
        }
        if rng.hit_rate_percent(self.fault.drop_rate_percent) {
            return SendOutcome::DROPPED;
        }

        let bound = u64::from(self.fault.max_delay_rounds) + 1;
        let delay = u8::try_from(rng.next_bounded(bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay));

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            self.pending.push(PendingMessage {
                deliver_at_round,
                message: message.clone(),
            });
        }
        self.pending.push(PendingMessage {
            deliver_at_round,
            message,
        });

        SendOutcome {
            dropped: false,
            duplicated,
            delay_rounds: delay,
        }
    }

    /// Remove and return every message due at or before `round`.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (mut ready, future): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| p.deliver_at_round <= round);
        self.pending = future;

        let reordered = ready.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            ready.reverse();
        }

        DeliverOutcome {
            delivered: ready.into_iter().map(|p| p.message).collect(),
            reordered,
        }
    }

    /// Deliver everything still in flight regardless of its due round.
    pub fn drain(&mut self) -> Vec<NetworkMessage> {
        self.pending.drain(..).map(|p| p.message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: ReplicaId, to: ReplicaId) -> NetworkMessage {
        NetworkMessage {
            from,
            to,
            vertices: Vec::new(),
        }
    }

    #[test]
    fn fault_free_delivers_same_round() {
        let mut net = SimulatedNetwork::new(FaultConfig::none());
        let mut rng = DeterministicRng::new(1);
        let sent = net.send(msg(0, 1), 5, &mut rng);
        assert!(!sent.dropped);
        assert_eq!(sent.delay_rounds, 0);
        let out = net.deliver_ready(5, &mut rng);
        assert_eq!(out.delivered, vec![msg(0, 1)]);
        assert_eq!(net.pending_len(), 0);
    }

    #[test]
    fn partition_drops_both_directions() {
        let mut net = SimulatedNetwork::new(FaultConfig::none());
        let mut rng = DeterministicRng::new(2);
        net.set_partitioned(1, true);
        assert!(net.send(msg(0, 1), 0, &mut rng).dropped);
        assert!(net.send(msg(1, 0), 0, &mut rng).dropped);
        assert!(!net.send(msg(0, 2), 0, &mut rng).dropped);
        net.heal();
        assert!(!net.is_partitioned(1));
    }

    #[test]
    fn full_drop_rate_drops_everything() {
        let fault = FaultConfig {
            drop_rate_percent: 100,
            ..FaultConfig::none()
        };
        let mut net = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(3);
        for _ in 0..10 {
            assert!(net.send(msg(0, 1), 0, &mut rng).dropped);
        }
        assert_eq!(net.pending_len(), 0);
    }

    #[test]
    fn duplicates_are_enqueued_twice() {
        let fault = FaultConfig {
            duplicate_rate_percent: 100,
            ..FaultConfig::none()
        };
        let mut net = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(4);
        assert!(net.send(msg(0, 1), 0, &mut rng).duplicated);
        assert_eq!(net.pending_len(), 2);
    }

    #[test]
    fn delayed_messages_wait_and_drain_flushes() {
        let fault = FaultConfig {
            max_delay_rounds: 5,
            ..FaultConfig::none()
        };
        let mut net = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(5);
        for _ in 0..20 {
            let _ = net.send(msg(0, 1), 0, &mut rng);
        }
        let early = net.deliver_ready(0, &mut rng).delivered.len();
        assert!(early < 20);
        assert_eq!(early + net.drain().len(), 20);
    }
}
