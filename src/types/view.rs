//! Cluster view snapshot
//!
//! Per CLUSTER_MODEL.md §4:
//! - The provider delivers a new view on every membership change
//! - A view is installed atomically; observers never see a partial view
//! - Only primary-component views carry write authority

use serde::{Deserialize, Serialize};

use super::gtid::Gtid;
use super::id::NodeId;
use super::seqno::Seqno;

/// Status of a cluster view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewStatus {
    /// View belongs to the primary component; writes are allowed.
    Primary,
    /// View belongs to a non-primary component; writes must be refused.
    NonPrimary,
    /// The node has dropped out of the group entirely.
    Disconnected,
}

/// One member of a cluster view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    id: NodeId,
    name: String,
    incoming_address: String,
}

impl Member {
    /// Create a view member entry.
    pub fn new(id: NodeId, name: impl Into<String>, incoming_address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            incoming_address: incoming_address.into(),
        }
    }

    /// Member node identity.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Human readable member name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client-facing address of the member.
    pub fn incoming_address(&self) -> &str {
        &self.incoming_address
    }
}

/// Immutable snapshot of cluster membership at one point in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    state_id: Gtid,
    view_seqno: Seqno,
    status: ViewStatus,
    members: Vec<Member>,
    own_index: Option<usize>,
    protocol_version: i32,
}

impl View {
    /// Create a view snapshot.
    pub fn new(
        state_id: Gtid,
        view_seqno: Seqno,
        status: ViewStatus,
        members: Vec<Member>,
        own_index: Option<usize>,
        protocol_version: i32,
    ) -> Self {
        Self {
            state_id,
            view_seqno,
            status,
            members,
            own_index,
            protocol_version,
        }
    }

    /// Cluster position at which this view was installed.
    pub fn state_id(&self) -> Gtid {
        self.state_id
    }

    /// Monotonic view sequence number.
    pub fn view_seqno(&self) -> Seqno {
        self.view_seqno
    }

    /// Component status of this view.
    pub fn status(&self) -> ViewStatus {
        self.status
    }

    /// Members of this view, in provider order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// This node's index in `members`, if it belongs to the view.
    pub fn own_index(&self) -> Option<usize> {
        self.own_index
    }

    /// Group protocol version negotiated for this view.
    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    /// True if the given node is a member of this view.
    pub fn is_member(&self, id: NodeId) -> bool {
        self.members.iter().any(|m| m.id() == id)
    }

    /// True if this view carries write authority.
    pub fn is_primary(&self) -> bool {
        self.status == ViewStatus::Primary
    }
}
