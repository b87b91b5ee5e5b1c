//! Error types, one per layer.
//!
//! Structural failures (`PatchError`) travel back to the caller inside a
//! `Reply`; backend failures (`BackendError`) travel on the engine's error
//! channel because they are not tied to any request.

use crate::unit::UnitId;

/// Errors raised by the graph data structure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// The node is not part of the graph.
    #[error("node not found")]
    NodeNotFound,
    /// No connection exists between the two nodes.
    #[error("connection not found")]
    ConnectionNotFound,
}

/// Structural and unit-level errors reported for a single mutation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    /// No mounted unit has this id.
    #[error("unit {0} is not mounted")]
    UnknownUnit(UnitId),
    /// The unit has no port with this name in the expected direction.
    #[error("unit {unit} has no {direction} port '{port}'")]
    UnknownPort {
        /// Owning unit.
        unit: UnitId,
        /// Requested port name.
        port: String,
        /// "input" or "output".
        direction: &'static str,
    },
    /// The output sink has no such channel.
    #[error("output sink has no channel {0}")]
    UnknownChannel(usize),
    /// Two ports of the same direction share a name.
    #[error("unit '{unit_type}' declares port '{port}' twice")]
    DuplicatePort {
        /// Type name of the offending unit.
        unit_type: String,
        /// Duplicated port name.
        port: String,
    },
    /// The output sink cannot be unmounted or swapped.
    #[error("the output sink cannot be removed")]
    SinkProtected,
    /// No builder is registered under this type name.
    #[error("unknown unit type '{0}'")]
    UnknownType(String),
    /// The session has no unit bound to this name.
    #[error("no unit named '{0}'")]
    UnknownName(String),
    /// A port path did not have the `unit.port` shape.
    #[error("malformed port path '{0}'")]
    MalformedPath(String),
    /// A unit builder rejected its configuration.
    #[error("invalid configuration for '{key}': {message}")]
    InvalidConfig {
        /// Offending key.
        key: String,
        /// What was wrong with it.
        message: String,
    },
    /// Opaque failure reported by a unit.
    #[error("unit error: {0}")]
    Unit(String),
    /// Underlying graph failure.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Failures of the audio backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// The backend could not begin producing audio.
    #[error("backend failed to start: {0}")]
    Start(String),
    /// The backend could not be stopped cleanly.
    #[error("backend failed to stop: {0}")]
    Stop(String),
    /// Stop was requested before start.
    #[error("backend is not started")]
    NotStarted,
    /// Start was requested twice.
    #[error("backend is already started")]
    AlreadyStarted,
    /// The callback did not halt within the allotted time or blocks.
    #[error("backend did not halt in time")]
    StopTimeout,
    /// The callback panicked; the block was silenced.
    #[error("audio callback panicked")]
    Panicked,
    /// The run loop ended without a stop request, after a failure reported
    /// on the error channel.
    #[error("run loop halted on its own")]
    Halted,
}

/// Configuration failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The TOML source could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors seen by control-thread callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The engine is not running, or stopping has begun.
    #[error("engine is not running")]
    NotRunning,
    /// `start` was called on a running engine.
    #[error("engine is already running")]
    AlreadyRunning,
    /// The engine stopped before the request was answered.
    #[error("engine stopped before replying")]
    Disconnected,
    /// The caller gave up waiting for a reply.
    #[error("timed out waiting for reply")]
    Timeout,
    /// The mutation was rejected.
    #[error(transparent)]
    Patch(#[from] PatchError),
    /// The backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Offline rendering failures.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// WAV encoding failed.
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    /// Nothing to write.
    #[error("no channels to render")]
    Empty,
}
