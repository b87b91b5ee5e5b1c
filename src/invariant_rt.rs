//! RT-safe invariant signaling for the audio callback.
//!
//! RT code **signals facts**. Non-RT code **judges correctness**.
//!
//! The run loop pushes integer ids onto a lock-free SPSC ring; the control
//! thread drains them and checks contracts. Nothing here allocates, locks
//! or panics on the producer side.

use rtrb::{Consumer, Producer, RingBuffer};

/// A queued message was applied successfully.
pub const INV_MESSAGE_APPLIED: u8 = 1;

/// A queued message was rejected with a structural error.
pub const INV_MESSAGE_REJECTED: u8 = 2;

/// The caller stopped waiting before the reply was delivered.
pub const INV_REPLY_ABANDONED: u8 = 3;

/// The graph changed and the plan was rebuilt.
pub const INV_PLAN_REBUILT: u8 = 4;

/// A block was rendered into the backend's buffers.
pub const INV_BLOCK_RENDERED: u8 = 5;

/// A stop request reached the run loop.
pub const INV_STOP_ACKNOWLEDGED: u8 = 6;

/// Capacity for invariant signal queue.
pub const INVARIANT_QUEUE_CAPACITY: usize = 1024;

/// Creates a new invariant signal queue pair.
///
/// Returns (producer for RT, consumer for the control thread).
pub fn new_invariant_queue() -> (Producer<u8>, Consumer<u8>) {
    RingBuffer::new(INVARIANT_QUEUE_CAPACITY)
}

/// Signals an invariant from the RT path. Drops the signal if the queue is
/// full.
#[inline]
pub fn signal_invariant(tx: &mut Producer<u8>, id: u8) {
    let _ = tx.push(id);
}

/// Drains all pending invariant signals from the queue.
pub fn drain_invariant_signals(rx: &mut Consumer<u8>) -> Vec<u8> {
    let mut signals = Vec::with_capacity(rx.slots());
    while let Ok(id) = rx.pop() {
        signals.push(id);
    }
    signals
}

/// Counts occurrences of each invariant ID in a signal list.
pub fn count_invariant_signals(signals: &[u8]) -> [usize; 256] {
    let mut counts = [0usize; 256];
    for &id in signals {
        counts[id as usize] += 1;
    }
    counts
}

/// Contract verification: asserts that required invariants were signaled.
///
/// # Panics
/// Panics if any required invariant was not signaled at least once.
pub fn contract_test_rt(contract_name: &str, signals: &[u8], required: &[u8]) {
    let counts = count_invariant_signals(signals);
    let missing: Vec<&str> = required
        .iter()
        .filter(|&&id| counts[id as usize] == 0)
        .map(|&id| invariant_name(id))
        .collect();

    if !missing.is_empty() {
        let present: std::collections::BTreeSet<&str> =
            signals.iter().map(|&id| invariant_name(id)).collect();
        panic!(
            "RT Contract '{}' missing invariants: {:?}. Present: {:?}",
            contract_name, missing, present
        );
    }
}

/// Maps invariant ID to human-readable name (for diagnostics only).
pub const fn invariant_name(id: u8) -> &'static str {
    match id {
        INV_MESSAGE_APPLIED => "MESSAGE_APPLIED",
        INV_MESSAGE_REJECTED => "MESSAGE_REJECTED",
        INV_REPLY_ABANDONED => "REPLY_ABANDONED",
        INV_PLAN_REBUILT => "PLAN_REBUILT",
        INV_BLOCK_RENDERED => "BLOCK_RENDERED",
        INV_STOP_ACKNOWLEDGED => "STOP_ACKNOWLEDGED",
        _ => "UNKNOWN",
    }
}
