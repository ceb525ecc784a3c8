//! The quantum-4 walkthrough.
//!
//! An allocator that rounds every request to a multiple of four `u64`s backs
//! a buffer grown to 3, filled, then grown to 5. The report shows each
//! allocator call and whether the buffer ended where it should.

use atleast_alloc::doubles::{CallKind, Recording, RoundingAllocator};
use atleast_vec::{GrowBuffer, GrowthPolicy};
use serde::Serialize;

use crate::error::HarnessError;

/// Units per rounding quantum in the walkthrough.
pub const QUANTUM_UNITS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioStep {
    pub action: String,
    pub capacity_after: usize,
    pub calls: Vec<ScenarioCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScenarioCall {
    pub kind: CallKind,
    pub units: usize,
    pub granted: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub quantum_units: usize,
    pub steps: Vec<ScenarioStep>,
    pub contents: Vec<u64>,
    pub passed: bool,
}

pub fn run_scenario() -> Result<ScenarioReport, HarnessError> {
    const UNIT: usize = size_of::<u64>();

    let recorded = Recording::new(RoundingAllocator::for_units::<u64>(QUANTUM_UNITS));
    let mut steps = Vec::new();
    let mut seen = 0;
    let mut step = |action: &str, capacity_after: usize, recorded: &Recording<RoundingAllocator>| {
        let calls = recorded.calls();
        let fresh = calls[seen..]
            .iter()
            .map(|call| ScenarioCall {
                kind: call.kind,
                units: call.bytes / UNIT,
                granted: call.granted.map(|bytes| bytes / UNIT),
            })
            .collect();
        seen = calls.len();
        steps.push(ScenarioStep {
            action: action.to_string(),
            capacity_after,
            calls: fresh,
        });
    };

    let mut buffer = GrowBuffer::<u64, _>::with_policy_in(&recorded, GrowthPolicy::Exact);
    buffer.grow_to(3)?;
    step("grow_to(3)", buffer.capacity(), &recorded);

    buffer.try_extend_from_slice(&[1, 2, 3, 4])?;
    step("extend 4 elements", buffer.capacity(), &recorded);

    buffer.grow_to(5)?;
    step("grow_to(5)", buffer.capacity(), &recorded);

    let contents = buffer.to_vec();
    drop(buffer);
    step("drop", 0, &recorded);

    let expected = [
        vec![ScenarioCall {
            kind: CallKind::AllocateAtLeast,
            units: 3,
            granted: Some(4),
        }],
        vec![],
        vec![
            ScenarioCall {
                kind: CallKind::AllocateAtLeast,
                units: 5,
                granted: Some(8),
            },
            ScenarioCall {
                kind: CallKind::Deallocate,
                units: 4,
                granted: None,
            },
        ],
        vec![ScenarioCall {
            kind: CallKind::Deallocate,
            units: 8,
            granted: None,
        }],
    ];
    let calls_match = steps.iter().map(|s| &s.calls).eq(expected.iter());
    let capacities_match = steps
        .iter()
        .map(|s| s.capacity_after)
        .eq([4, 4, 8, 0]);
    let passed = calls_match
        && capacities_match
        && contents == [1, 2, 3, 4]
        && recorded.inner().live_blocks() == 0;

    Ok(ScenarioReport {
        quantum_units: QUANTUM_UNITS,
        steps,
        contents,
        passed,
    })
}
