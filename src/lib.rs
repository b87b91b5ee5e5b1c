//! Live-patchable modular signal graph.
//!
//! Units with named input and output ports are mounted into a graph and
//! patched together while audio runs. Feedback loops are detected as
//! strongly connected groups and advanced one sample at a time; everything
//! else runs block-wise. All mutation happens on the audio thread, one
//! queued command per block.

pub mod backend;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod graph;
#[doc(hidden)]
pub mod invariant_ppt;
#[doc(hidden)]
pub mod invariant_rt;
pub mod plan;
pub mod port;
pub mod rack;
pub mod render;
pub mod session;
pub mod unit;
pub mod units;

pub use backend::{Backend, Driver, Flow, OfflineBackend, ThreadBackend};
pub use config::EngineConfig;
pub use control::{Command, Pending, PortRef, Reply, Signal, Snapshot, Value};
pub use engine::{Engine, Handle, State};
pub use error::{BackendError, ConfigError, EngineError, GraphError, PatchError, RenderError};
pub use plan::FeedbackPolicy;
pub use rack::Rack;
pub use session::{Registry, Session};
pub use unit::{Processor, Unit, UnitConfig, UnitId};
