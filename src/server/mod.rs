//! Server state module
//!
//! One `ServerState` exists per process. It owns the provider handle, the
//! node lifecycle state machine, the desync/pause counters and the
//! streaming registries, and dispatches remote write sets to high-priority
//! services.

mod config;
mod error;
mod registry;
mod state;

pub use config::{RollbackMode, ServerConfig};
pub use error::{ServerError, ServerErrorKind, ServerResult};
pub use state::{NodeState, ServerState};
