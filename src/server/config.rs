//! Server configuration
//!
//! Per SERVER_LIFECYCLE.md §1:
//! - Identity, addresses and the rollback mode are configured externally
//!   (file, env, CLI by the host) and are immutable after construction
//! - The core reads no environment and no files itself

use std::path::PathBuf;

use crate::types::{Gtid, NodeId};

/// How brute-force abort victims are rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackMode {
    /// The victim is rolled back inline by the aborting thread.
    Sync,
    /// The victim is marked and rolls itself back at its next boundary.
    Async,
}

/// Immutable server identity and policy, fixed at construction.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    name: String,
    id: NodeId,
    incoming_address: String,
    address: String,
    working_dir: PathBuf,
    initial_position: Gtid,
    max_protocol_version: i32,
    rollback_mode: RollbackMode,
}

impl ServerConfig {
    /// Create a server configuration.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        id: NodeId,
        incoming_address: impl Into<String>,
        address: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        initial_position: Gtid,
        max_protocol_version: i32,
        rollback_mode: RollbackMode,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            incoming_address: incoming_address.into(),
            address: address.into(),
            working_dir: working_dir.into(),
            initial_position,
            max_protocol_version,
            rollback_mode,
        }
    }

    /// Human readable server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server identity.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Client-facing address of this node.
    pub fn incoming_address(&self) -> &str {
        &self.incoming_address
    }

    /// Group communication address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Working directory for replication-specific files.
    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    /// Position the node starts from before connecting.
    pub fn initial_position(&self) -> Gtid {
        self.initial_position
    }

    /// Highest group protocol version this node speaks.
    pub fn max_protocol_version(&self) -> i32 {
        self.max_protocol_version
    }

    /// Rollback mode this node operates in.
    pub fn rollback_mode(&self) -> RollbackMode {
        self.rollback_mode
    }
}
