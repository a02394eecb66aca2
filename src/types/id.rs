//! Identity newtypes
//!
//! Per CLUSTER_MODEL.md §2:
//! - A node identity is a UUID and is unique cluster-wide
//! - Client and transaction identities are local to one node
//! - Identities carry no behavior beyond construction, comparison and display

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cluster-wide node identity.
///
/// The all-zero UUID is reserved as the undefined identity. It never appears
/// in a view and never originates a write set.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a node identity from an existing UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a fresh random node identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The reserved undefined identity (all-zero UUID).
    pub fn undefined() -> Self {
        Self(Uuid::nil())
    }

    /// True if this is the reserved undefined identity.
    pub fn is_undefined(&self) -> bool {
        self.0.is_nil()
    }

    /// Underlying UUID, for serialization and display only.
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Per-node client (session) identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    /// Create a client identity with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Underlying value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-node transaction identity.
///
/// Assigned by the host DBMS when a transaction first touches replicated
/// state. Unique per originating node, not cluster-wide; the pair
/// (origin NodeId, TransactionId) is globally unique.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Create a transaction identity with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Underlying value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
