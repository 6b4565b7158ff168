//! Simulated wall clocks with per-replica skew, drift and freezes.
//!
//! A [`SimulatedClock`] is shared (via `Rc`) between the simulator, which
//! advances the round, and the replicated object, which reads it through the
//! core [`Clock`] trait when stamping local vertices.

use std::cell::Cell;

use hashgraph_core::clock::Clock;
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Ranges from which each replica's clock is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    pub base_millis: i64,
    /// Wall time that passes per simulation round.
    pub tick_millis: i64,
    pub max_abs_drift_ppm: i32,
    pub max_abs_skew_millis: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            base_millis: 1_700_000_000_000,
            tick_millis: 100,
            max_abs_drift_ppm: 100,
            max_abs_skew_millis: 25,
        }
    }
}

impl ClockConfig {
    /// Draw a concrete clock for one replica.
    #[must_use]
    pub fn assign(&self, rng: &mut DeterministicRng) -> ClockSpec {
        let drift_span = u64::from(self.max_abs_drift_ppm.unsigned_abs()) * 2 + 1;
        let skew_span = self.max_abs_skew_millis.unsigned_abs() * 2 + 1;
        let drift = i64::try_from(rng.next_bounded(drift_span)).unwrap_or(0)
            - i64::from(self.max_abs_drift_ppm.abs());
        let skew = i64::try_from(rng.next_bounded(skew_span)).unwrap_or(0)
            - self.max_abs_skew_millis.abs();
        ClockSpec {
            base_millis: self.base_millis,
            tick_millis: self.tick_millis,
            drift_ppm: i32::try_from(drift).unwrap_or(0),
            skew_millis: skew,
        }
    }
}

/// One replica's clock parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSpec {
    pub base_millis: i64,
    pub tick_millis: i64,
    pub drift_ppm: i32,
    pub skew_millis: i64,
}

#[derive(Debug)]
pub struct SimulatedClock {
    spec: ClockSpec,
    round: Cell<u64>,
    frozen_at: Cell<Option<i64>>,
    /// Round at which a freeze ends.
    thaw_at: Cell<Option<u64>>,
}

impl SimulatedClock {
    #[must_use]
    pub const fn new(spec: ClockSpec) -> Self {
        Self {
            spec,
            round: Cell::new(0),
            frozen_at: Cell::new(None),
            thaw_at: Cell::new(None),
        }
    }

    #[must_use]
    pub const fn spec(&self) -> ClockSpec {
        self.spec
    }

    /// Advance to `round`, thawing the clock if its freeze has expired.
    pub fn set_round(&self, round: u64) {
        self.round.set(round);
        if self.thaw_at.get().is_some_and(|at| round >= at) {
            self.unfreeze();
        }
    }

    /// Wall time at `round`, ignoring any freeze.
    #[must_use]
    pub fn millis_at(&self, round: u64) -> i64 {
        let round = i64::try_from(round).unwrap_or(i64::MAX);
        let progress = self.spec.tick_millis.saturating_mul(round);
        let drift = progress
            .saturating_mul(i64::from(self.spec.drift_ppm))
            .saturating_div(1_000_000);
        self.spec
            .base_millis
            .saturating_add(self.spec.skew_millis)
            .saturating_add(progress)
            .saturating_add(drift)
    }

    /// Stop the clock at its current reading for `rounds` rounds.
    pub fn freeze_for(&self, rounds: u64) {
        let round = self.round.get();
        self.frozen_at.set(Some(self.millis_at(round)));
        self.thaw_at.set(Some(round.saturating_add(rounds)));
    }

    pub fn unfreeze(&self) {
        self.frozen_at.set(None);
        self.thaw_at.set(None);
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen_at.get().is_some()
    }
}

impl Clock for SimulatedClock {
    fn now_ms(&self) -> i64 {
        self.frozen_at
            .get()
            .unwrap_or_else(|| self.millis_at(self.round.get()))
    }
}
