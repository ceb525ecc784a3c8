//! CLI entrypoint for the atleast replay harness.

use std::path::PathBuf;

use atleast_harness::{AllocatorChoice, ReplayConfig, parse_policy, run_replay, run_scenario, write_report};
use atleast_vec::GrowthPolicy;
use clap::{Parser, Subcommand};

/// Growth replay tooling for allocation size feedback.
#[derive(Debug, Parser)]
#[command(name = "atleast-harness")]
#[command(about = "Replay buffer growth against allocators with and without size feedback")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Push N elements one at a time and report every growth step.
    Replay {
        /// Backing allocator: `system`, `classes`, or `rounding:<bytes>`.
        #[arg(long, default_value = "classes")]
        allocator: AllocatorChoice,
        /// Growth policy: `exact` or `doubling`.
        #[arg(long, default_value = "doubling", value_parser = parse_policy)]
        policy: GrowthPolicy,
        /// Number of single-element pushes.
        #[arg(long, default_value_t = 100)]
        pushes: usize,
        /// Element size in bytes.
        #[arg(long, default_value_t = 8)]
        unit_size: usize,
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run the quantum-4 walkthrough and report whether it behaved.
    Scenario {
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            allocator,
            policy,
            pushes,
            unit_size,
            output,
        } => {
            let config = ReplayConfig {
                allocator,
                policy,
                pushes,
                unit_size,
            };
            eprintln!("Replaying {pushes} pushes of {unit_size}-byte units on {allocator} ({policy})");
            let report = run_replay(&config)?;
            eprintln!(
                "{} growth events, {} allocator calls, {} surplus units",
                report.growth_events.len(),
                report.allocator_calls,
                report.surplus_units
            );
            write_report(&report, output.as_deref())?;
        }
        Command::Scenario { output } => {
            let report = run_scenario()?;
            write_report(&report, output.as_deref())?;
            if !report.passed {
                return Err("quantum-4 scenario did not behave as expected".into());
            }
        }
    }

    Ok(())
}
