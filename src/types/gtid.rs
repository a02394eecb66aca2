//! Gtid - Global transaction identifier
//!
//! Per CLUSTER_MODEL.md §3:
//! - A GTID is the pair (history UUID, seqno)
//! - GTIDs are totally ordered within one history UUID
//! - The undefined GTID pairs the undefined identity with the undefined seqno

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::id::NodeId;
use super::seqno::Seqno;

/// Global transaction identifier: cluster history UUID plus seqno.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Gtid {
    uuid: NodeId,
    seqno: Seqno,
}

impl Gtid {
    /// Create a GTID from its parts.
    pub fn new(uuid: NodeId, seqno: Seqno) -> Self {
        Self { uuid, seqno }
    }

    /// The undefined GTID.
    pub fn undefined() -> Self {
        Self {
            uuid: NodeId::undefined(),
            seqno: Seqno::undefined(),
        }
    }

    /// True if either component is undefined.
    pub fn is_undefined(&self) -> bool {
        self.uuid.is_undefined() || self.seqno.is_undefined()
    }

    /// History UUID component.
    pub fn uuid(&self) -> NodeId {
        self.uuid
    }

    /// Seqno component.
    pub fn seqno(&self) -> Seqno {
        self.seqno
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uuid, self.seqno)
    }
}

/// Error parsing a GTID from its `uuid:seqno` text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseGtidError {
    message: String,
}

impl fmt::Display for ParseGtidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid GTID: {}", self.message)
    }
}

impl std::error::Error for ParseGtidError {}

impl FromStr for Gtid {
    type Err = ParseGtidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (uuid_part, seqno_part) = s.rsplit_once(':').ok_or_else(|| ParseGtidError {
            message: format!("missing ':' separator in '{}'", s),
        })?;
        let uuid = uuid_part.parse::<NodeId>().map_err(|e| ParseGtidError {
            message: format!("bad uuid '{}': {}", uuid_part, e),
        })?;
        let seqno = seqno_part.parse::<i64>().map_err(|e| ParseGtidError {
            message: format!("bad seqno '{}': {}", seqno_part, e),
        })?;
        Ok(Self::new(uuid, Seqno::new(seqno)))
    }
}
