//! Replay harness for growth under allocation size feedback.
//!
//! - [`replay`]: push a buffer element by element over a chosen allocator and
//!   record every growth step.
//! - [`scenario`]: the quantum-4 walkthrough with a pass/fail verdict.
//!
//! Reports are plain `serde` structs; [`write_report`] renders them as JSON.

pub mod error;
pub mod replay;
pub mod scenario;

use std::path::Path;

use serde::Serialize;

pub use error::HarnessError;
pub use replay::{AllocatorChoice, GrowthEvent, ReplayConfig, ReplayReport, parse_policy, run_replay};
pub use scenario::{ScenarioReport, run_scenario};

/// Pretty JSON to `output`, or to stdout when no path is given.
pub fn write_report<R: Serialize>(report: &R, output: Option<&Path>) -> Result<(), HarnessError> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, json + "\n")?;
        }
        None => println!("{json}"),
    }
    Ok(())
}
