//! PPT Invariant System: structural invariant enforcement with contract tracking.
//!
//! The graph, port and plan layers check these while commands are applied
//! and while the plan is rebuilt, both of which happen inside the audio
//! callback. Recording is a single atomic `fetch_or` on a bitset: no lock,
//! no allocation, no output. A failed check panics in debug builds only.

#[cfg(feature = "ppt")]
use std::sync::atomic::{AtomicU64, Ordering};

// Invariant constants for contract tracking. Ids must stay below 64.
pub const GRAPH_LEGALITY: u32 = 1;
pub const GRAPH_REJECTS_INVALID: u32 = 2;
pub const SORT_COVERS_GRAPH: u32 = 3;
pub const CYCLE_GROUPED: u32 = 4;
pub const FAN_IN_SINGLE: u32 = 5;
pub const RESET_RESTORES_NORMAL: u32 = 6;
pub const PLAN_SOUNDNESS: u32 = 7;
pub const FEEDBACK_SAMPLE_MODE: u32 = 8;

#[cfg(feature = "ppt")]
static INVARIANT_LOG: AtomicU64 = AtomicU64::new(0);

#[cfg(feature = "ppt")]
fn bit(id: u32) -> u64 {
    1u64.checked_shl(id).unwrap_or(0)
}

/// Check an invariant and record that it held.
#[track_caller]
pub(crate) fn check_invariant(id: u32, condition: bool, message: &'static str) {
    debug_assert!(condition, "Invariant {} failed: {}", id, message);
    if condition {
        record(id);
    }
}

#[cfg(feature = "ppt")]
fn record(id: u32) {
    INVARIANT_LOG.fetch_or(bit(id), Ordering::Relaxed);
}

#[cfg(not(feature = "ppt"))]
fn record(_id: u32) {}

#[cfg(feature = "ppt")]
/// Contract test: checks that specified invariants were recorded.
pub fn contract_test(test_name: &str, required_invariants: &[u32]) {
    let log = INVARIANT_LOG.load(Ordering::Relaxed);
    let missing: Vec<u32> = required_invariants
        .iter()
        .copied()
        .filter(|&inv| log & bit(inv) == 0)
        .collect();
    if !missing.is_empty() {
        panic!(
            "Contract test '{}' failed: invariants not enforced: {:?}",
            test_name, missing
        );
    }
}

#[cfg(not(feature = "ppt"))]
/// Contract test: no-op when PPT feature is disabled.
pub fn contract_test(_test_name: &str, _required_invariants: &[u32]) {}

#[cfg(feature = "ppt")]
/// Clear invariant log (for between test runs).
pub fn clear_invariant_log() {
    INVARIANT_LOG.store(0, Ordering::Relaxed);
}

#[cfg(not(feature = "ppt"))]
/// Clear invariant log: no-op when PPT feature is disabled.
pub fn clear_invariant_log() {}
