//! Push replay: drive a `GrowBuffer` one element at a time and record every
//! growth step the allocator saw.

use std::fmt;
use std::str::FromStr;

use atleast_alloc::doubles::{AllocCall, CallKind, Recording, RoundingAllocator};
use atleast_alloc::log::AllocatorLogRecord;
use atleast_alloc::{Allocator, ClassAllocator, MetricsSnapshot, SystemAllocator};
use atleast_vec::{GrowBuffer, GrowthPolicy};
use serde::Serialize;

use crate::error::HarnessError;

/// Which allocator backs the replayed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorChoice {
    /// Process heap, exact grants.
    System,
    /// Size-class allocator.
    Classes,
    /// Rounds every request up to a byte quantum.
    Rounding(usize),
}

impl FromStr for AllocatorChoice {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "system" => Ok(Self::System),
            "classes" => Ok(Self::Classes),
            _ => s
                .strip_prefix("rounding:")
                .and_then(|q| q.parse::<usize>().ok())
                .filter(|&q| q > 0)
                .map(Self::Rounding)
                .ok_or_else(|| HarnessError::InvalidAllocator(s.clone())),
        }
    }
}

impl fmt::Display for AllocatorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Classes => f.write_str("classes"),
            Self::Rounding(q) => write!(f, "rounding:{q}"),
        }
    }
}

/// Strict policy parser for the command line.
pub fn parse_policy(s: &str) -> Result<GrowthPolicy, HarnessError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "exact" => Ok(GrowthPolicy::Exact),
        "doubling" => Ok(GrowthPolicy::Doubling),
        other => Err(HarnessError::InvalidPolicy(other.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
    pub allocator: AllocatorChoice,
    pub policy: GrowthPolicy,
    pub pushes: usize,
    pub unit_size: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            allocator: AllocatorChoice::Classes,
            policy: GrowthPolicy::Doubling,
            pushes: 100,
            unit_size: 8,
        }
    }
}

/// One reallocation of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GrowthEvent {
    /// Buffer length when the push that triggered it started.
    pub at_len: usize,
    pub old_capacity: usize,
    /// Lower bound passed to the allocator, in units.
    pub requested: usize,
    /// Units actually granted and adopted as capacity.
    pub granted: usize,
    /// Count the old block was released with (0 if there was none).
    pub released: usize,
}

impl GrowthEvent {
    fn from_calls(at_len: usize, old_capacity: usize, calls: &[AllocCall], unit: usize) -> Self {
        let mut event = Self {
            at_len,
            old_capacity,
            requested: 0,
            granted: 0,
            released: 0,
        };
        for call in calls {
            match call.kind {
                CallKind::AllocateAtLeast | CallKind::Allocate => {
                    event.requested = call.bytes / unit;
                    event.granted = call.granted.unwrap_or(call.bytes) / unit;
                }
                CallKind::Deallocate => event.released = call.bytes / unit,
            }
        }
        event
    }

    /// Units obtained beyond the request.
    #[must_use]
    pub fn surplus(&self) -> usize {
        self.granted - self.requested
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub allocator: String,
    pub policy: GrowthPolicy,
    pub unit_size: usize,
    pub pushes: usize,
    pub final_len: usize,
    pub final_capacity: usize,
    /// Allocator calls made by the buffer, final release included.
    pub allocator_calls: usize,
    pub surplus_units: usize,
    pub growth_events: Vec<GrowthEvent>,
    /// Counters of the size-class allocator, when it was used.
    pub metrics: Option<MetricsSnapshot>,
    pub lifecycle_logs: Vec<AllocatorLogRecord>,
}

struct Trace {
    final_len: usize,
    final_capacity: usize,
    allocator_calls: usize,
    events: Vec<GrowthEvent>,
}

fn drive<const N: usize, A: Allocator>(alloc: A, config: &ReplayConfig) -> Result<Trace, HarnessError> {
    let recorded = Recording::new(alloc);
    let mut buffer = GrowBuffer::<[u8; N], _>::with_policy_in(&recorded, config.policy);
    let mut events = Vec::new();

    for i in 0..config.pushes {
        let old_capacity = buffer.capacity();
        let calls_before = recorded.call_count();
        buffer.try_push([i as u8; N])?;
        if recorded.call_count() != calls_before {
            let calls = recorded.calls();
            events.push(GrowthEvent::from_calls(i, old_capacity, &calls[calls_before..], N));
        }
    }

    let final_len = buffer.len();
    let final_capacity = buffer.capacity();
    drop(buffer);
    Ok(Trace {
        final_len,
        final_capacity,
        allocator_calls: recorded.call_count(),
        events,
    })
}

fn replay_units<const N: usize>(config: &ReplayConfig) -> Result<ReplayReport, HarnessError> {
    let mut metrics = None;
    let mut lifecycle_logs = Vec::new();
    let trace = match config.allocator {
        AllocatorChoice::System => drive::<N, _>(SystemAllocator, config)?,
        AllocatorChoice::Rounding(quantum) => drive::<N, _>(RoundingAllocator::new(quantum), config)?,
        AllocatorChoice::Classes => {
            let classes = ClassAllocator::new();
            let trace = drive::<N, _>(&classes, config)?;
            metrics = Some(classes.metrics());
            lifecycle_logs = classes.drain_lifecycle_logs();
            trace
        }
    };

    Ok(ReplayReport {
        allocator: config.allocator.to_string(),
        policy: config.policy,
        unit_size: N,
        pushes: config.pushes,
        final_len: trace.final_len,
        final_capacity: trace.final_capacity,
        allocator_calls: trace.allocator_calls,
        surplus_units: trace.events.iter().map(GrowthEvent::surplus).sum(),
        growth_events: trace.events,
        metrics,
        lifecycle_logs,
    })
}

/// Replay `config.pushes` single-element pushes and report every growth step.
pub fn run_replay(config: &ReplayConfig) -> Result<ReplayReport, HarnessError> {
    match config.unit_size {
        1 => replay_units::<1>(config),
        2 => replay_units::<2>(config),
        4 => replay_units::<4>(config),
        8 => replay_units::<8>(config),
        12 => replay_units::<12>(config),
        16 => replay_units::<16>(config),
        24 => replay_units::<24>(config),
        32 => replay_units::<32>(config),
        64 => replay_units::<64>(config),
        other => Err(HarnessError::UnsupportedUnitSize(other)),
    }
}
