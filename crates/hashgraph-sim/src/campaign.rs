//! Campaign runner: many seeds with the same parameters, reporting the
//! first failing seed for replay.

use std::ops::Range;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::network::FaultConfig;
use crate::{SimulationConfig, SimulationResult, Simulator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub replica_count: usize,
    pub rounds: u64,
    pub fanout: usize,
    pub fault: FaultConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..100,
            replica_count: 4,
            rounds: 24,
            fanout: 2,
            fault: FaultConfig {
                max_delay_rounds: 3,
                drop_rate_percent: 10,
                duplicate_rate_percent: 5,
                reorder_rate_percent: 10,
                partition_rate_percent: 5,
                freeze_rate_percent: 5,
                freeze_duration_rounds: 2,
            },
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            replica_count: self.replica_count,
            rounds: self.rounds,
            fanout: self.fanout,
            fault: self.fault,
            ..SimulationConfig::default()
        }
    }

    /// # Errors
    ///
    /// Returns an error if the seed range is empty or a per-seed parameter
    /// is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run one seed.
///
/// # Errors
///
/// Returns an error if the simulation itself fails; convergence violations
/// are reported in the result, not as errors.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<SimulationResult> {
    Simulator::new(config.sim_config_for_seed(seed))?
        .run()
        .with_context(|| format!("simulation for seed {seed} failed"))
}

/// Run every seed in the campaign.
///
/// # Errors
///
/// Returns an error on invalid configuration or if any simulation fails
/// internally.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };

    for seed in config.seed_range.clone() {
        let result = replay_seed(seed, config)?;
        report.seeds_run += 1;
        if result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }
        if result.converged() {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = result.oracle.violations.len(), "seed diverged");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: result.oracle.violations.iter().map(ToString::to_string).collect(),
            });
        }
    }

    Ok(report)
}
