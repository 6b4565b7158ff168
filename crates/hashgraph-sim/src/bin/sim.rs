#![forbid(unsafe_code)]

use std::env;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hashgraph_sim::network::FaultConfig;
use hashgraph_sim::{CampaignConfig, SimulationConfig, Simulator, run_campaign};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "hashgraph-sim: deterministic convergence simulator",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(
        about = "Run a single seed",
        after_help = "EXAMPLES:\n    # Replay seed 42 with six replicas\n    hashgraph-sim run --seed 42 --replicas 6"
    )]
    Run {
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[command(flatten)]
        shape: Shape,
        /// Print the full event trace.
        #[arg(long)]
        trace: bool,
    },
    #[command(
        about = "Run a range of seeds and report failures",
        after_help = "EXAMPLES:\n    # Run 500 seeds\n    hashgraph-sim campaign --seeds 500"
    )]
    Campaign {
        #[arg(long, default_value_t = 0)]
        first_seed: u64,
        #[arg(long, default_value_t = 100)]
        seeds: u64,
        #[command(flatten)]
        shape: Shape,
    },
}

#[derive(clap::Args, Debug)]
struct Shape {
    #[arg(long, default_value_t = 4)]
    replicas: usize,
    #[arg(long, default_value_t = 24)]
    rounds: u64,
    #[arg(long, default_value_t = 2)]
    fanout: usize,
    /// Disable every network and clock fault.
    #[arg(long)]
    no_faults: bool,
}

impl Shape {
    fn fault(&self) -> FaultConfig {
        if self.no_faults {
            FaultConfig::none()
        } else {
            CampaignConfig::default().fault
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("HASHGRAPH_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "hashgraph_sim=debug,hashgraph_core=debug,info"
        } else {
            "hashgraph_sim=info,warn"
        })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { seed, shape, trace } => {
            let config = SimulationConfig {
                seed,
                replica_count: shape.replicas,
                rounds: shape.rounds,
                fanout: shape.fanout,
                fault: shape.fault(),
                ..SimulationConfig::default()
            };
            let result = Simulator::new(config)?.run()?;

            if cli.json {
                let trace_value = if trace {
                    serde_json::to_value(&result.trace)?
                } else {
                    serde_json::Value::Null
                };
                let violations: Vec<String> =
                    result.oracle.violations.iter().map(ToString::to_string).collect();
                let summary = serde_json::json!({
                    "seed": seed,
                    "converged": result.converged(),
                    "vertices": result.vertex_count,
                    "interesting": result.interesting_state_reached,
                    "violations": violations,
                    "trace": trace_value,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                if trace {
                    for event in &result.trace {
                        println!("{:>4} {:?}", event.round, event.kind);
                    }
                }
                println!(
                    "seed={seed} converged={} vertices={} interesting={}",
                    result.converged(),
                    result.vertex_count,
                    result.interesting_state_reached
                );
                for violation in &result.oracle.violations {
                    println!("  {violation}");
                }
            }

            if !result.converged() {
                bail!("seed {seed} did not converge");
            }
        }
        Command::Campaign {
            first_seed,
            seeds,
            shape,
        } => {
            let config = CampaignConfig {
                seed_range: first_seed..first_seed.saturating_add(seeds),
                replica_count: shape.replicas,
                rounds: shape.rounds,
                fanout: shape.fanout,
                fault: shape.fault(),
            };
            let report = run_campaign(&config).context("campaign aborted")?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "seeds={} passed={} interesting={}",
                    report.seeds_run, report.seeds_passed, report.interesting_states_reached
                );
                for failure in &report.failures {
                    println!("seed {}:", failure.seed);
                    for violation in &failure.violations {
                        println!("  {violation}");
                    }
                }
            }

            if let Some(seed) = report.first_failure {
                bail!("campaign failed; replay with `hashgraph-sim run --seed {seed} --trace`");
            }
        }
    }

    Ok(())
}
