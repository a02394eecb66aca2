//! Seqno - Totally ordered provider sequence number
//!
//! Per CLUSTER_MODEL.md §3:
//! - The provider assigns a seqno to every ordered write set
//! - Seqnos are strictly increasing within one cluster history
//! - The value -1 is reserved as the undefined seqno

use std::fmt;

use serde::{Deserialize, Serialize};

/// A provider-assigned sequence number.
///
/// Ordering of two defined seqnos is the total order of the cluster history
/// they belong to. Comparing seqnos from different histories is meaningless;
/// callers pair a seqno with the history UUID (see `Gtid`) when it crosses
/// a history boundary.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Seqno(i64);

impl Seqno {
    /// Create a seqno with the given value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The reserved undefined seqno.
    pub fn undefined() -> Self {
        Self(-1)
    }

    /// True if this seqno is undefined.
    pub fn is_undefined(&self) -> bool {
        self.0 < 0
    }

    /// True if this seqno is defined.
    pub fn is_defined(&self) -> bool {
        !self.is_undefined()
    }

    /// Underlying value.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
