//! Control message types for control → audio-thread communication.
//!
//! A control thread wraps a `Command` in a message, pushes it onto the
//! engine's queue and waits on its own reply slot. The audio callback pops
//! at most one message per block, applies it and answers with the result,
//! how long it took and which block applied it.

use crate::error::{EngineError, PatchError};
use crate::unit::{Unit, UnitId};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::time::Duration;

/// A port addressed by owning unit and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    /// Owning unit.
    pub unit: UnitId,
    /// Port name.
    pub port: String,
}

impl PortRef {
    /// Reference `port` on `unit`.
    pub fn new(unit: UnitId, port: impl Into<String>) -> Self {
        Self {
            unit,
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.unit, self.port)
    }
}

/// What to patch into an input.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// A literal held for every sample.
    Constant(f32),
    /// The output of another unit.
    Output(PortRef),
}

impl From<f32> for Signal {
    fn from(value: f32) -> Self {
        Signal::Constant(value)
    }
}

impl From<PortRef> for Signal {
    fn from(port: PortRef) -> Self {
        Signal::Output(port)
    }
}

/// Mutations and queries the audio thread applies.
#[derive(Debug)]
pub enum Command {
    /// Attach a unit and its ports.
    Mount(Box<Unit>),
    /// Detach a unit, resetting everything it fed.
    Unmount(UnitId),
    /// Patch a literal or an output into an input.
    Patch {
        /// Literal or output.
        source: Signal,
        /// Destination input.
        input: PortRef,
    },
    /// Remove an input's connection and reset it.
    Unpatch(PortRef),
    /// Move `old`'s connections onto `new`, then unmount `old`.
    Swap {
        /// Unit being replaced.
        old: UnitId,
        /// Replacement, already mounted.
        new: UnitId,
    },
    /// Discard every user unit and patch.
    Reset,
    /// Patch into the output sink: one channel, or all when `None`.
    Emit {
        /// Literal or output.
        source: Signal,
        /// Sink channel.
        channel: Option<usize>,
    },
    /// Report graph and plan statistics.
    Inspect,
}

impl Command {
    /// Returns a human-readable description (for logging).
    pub fn description(&self) -> &'static str {
        match self {
            Command::Mount(_) => "Mount",
            Command::Unmount(_) => "Unmount",
            Command::Patch { .. } => "Patch",
            Command::Unpatch(_) => "Unpatch",
            Command::Swap { .. } => "Swap",
            Command::Reset => "Reset",
            Command::Emit { .. } => "Emit",
            Command::Inspect => "Inspect",
        }
    }
}

/// Graph and plan statistics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    /// Total graph nodes: units plus their ports.
    pub size: usize,
    /// Signal and structural connections.
    pub connections: usize,
    /// Mounted units, the sink included.
    pub units: usize,
    /// Units per sorted group, groups without units omitted.
    pub groups: Vec<Vec<UnitId>>,
    /// Inputs currently reading the previous sample.
    pub sample_inputs: Vec<PortRef>,
}

/// Successful result of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Nothing to report.
    None,
    /// The unit the command mounted or kept.
    Unit(UnitId),
    /// Statistics.
    Snapshot(Snapshot),
}

impl Value {
    /// The unit id, if this value carries one.
    pub fn unit(&self) -> Option<UnitId> {
        match self {
            Value::Unit(id) => Some(*id),
            _ => None,
        }
    }
}

/// The answer to one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Outcome of the command.
    pub result: Result<Value, PatchError>,
    /// Time spent applying it on the audio thread.
    pub elapsed: Duration,
    /// Index of the block that applied it.
    pub block: u64,
}

/// Messages on the engine queue.
#[derive(Debug)]
pub(crate) enum Message {
    Request {
        command: Command,
        reply: Sender<Reply>,
    },
    Stop,
}

/// A request in flight. Dropping it abandons the reply; the engine still
/// applies the command.
#[derive(Debug)]
pub struct Pending {
    rx: Receiver<Reply>,
}

impl Pending {
    pub(crate) fn new(rx: Receiver<Reply>) -> Self {
        Self { rx }
    }

    /// Block until the reply arrives.
    pub fn wait(self) -> Result<Reply, EngineError> {
        self.rx.recv().map_err(|_| EngineError::Disconnected)
    }

    /// Block until the reply arrives or `timeout` passes.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Reply, EngineError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => EngineError::Timeout,
            RecvTimeoutError::Disconnected => EngineError::Disconnected,
        })
    }

    /// The reply, if it has already arrived.
    pub fn try_reply(&self) -> Option<Reply> {
        self.rx.try_recv().ok()
    }
}
