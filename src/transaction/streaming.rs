//! Streaming context
//!
//! Per STREAMING_MODEL.md §2-§3:
//! - A streaming transaction replicates fragments while it executes
//! - Fragments are cut by an accumulated unit count (bytes, rows or
//!   statements) against a configured threshold
//! - The context records the seqno of every fragment already replicated,
//!   and whether a rollback fragment has been replicated

use crate::types::Seqno;

/// Unit in which streaming fragment sizes are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentUnit {
    /// Appended write-set bytes.
    Bytes,
    /// Modified rows.
    Rows,
    /// Executed statements.
    Statements,
}

/// Fragment accounting attached to a transaction.
///
/// The context survives transaction boundaries: `enable` configures the
/// session for streaming, `cleanup` clears per-transaction accounting while
/// keeping the configuration.
#[derive(Debug)]
pub struct StreamingContext {
    enabled: bool,
    unit: FragmentUnit,
    fragment_size: u64,
    unit_counter: u64,
    fragments: Vec<Seqno>,
    rollback_replicated: bool,
}

impl StreamingContext {
    /// Create a disabled streaming context.
    pub fn new() -> Self {
        Self {
            enabled: false,
            unit: FragmentUnit::Bytes,
            fragment_size: 0,
            unit_counter: 0,
            fragments: Vec::new(),
            rollback_replicated: false,
        }
    }

    /// Enable streaming with the given unit and threshold.
    pub fn enable(&mut self, unit: FragmentUnit, fragment_size: u64) {
        self.enabled = true;
        self.unit = unit;
        self.fragment_size = fragment_size;
    }

    /// Disable streaming for this session.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.fragment_size = 0;
    }

    /// True if streaming is configured for this session.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configured fragment unit.
    pub fn unit(&self) -> FragmentUnit {
        self.unit
    }

    /// Configured fragment size threshold.
    pub fn fragment_size(&self) -> u64 {
        self.fragment_size
    }

    /// Account `count` units of the configured kind.
    pub fn add_units(&mut self, count: u64) {
        self.unit_counter += count;
    }

    /// True if enough units have accumulated to cut a fragment.
    ///
    /// A zero threshold never trips; streaming with size zero is
    /// equivalent to disabled streaming.
    pub fn fragment_due(&self) -> bool {
        self.enabled && self.fragment_size > 0 && self.unit_counter >= self.fragment_size
    }

    /// Record a replicated fragment and reset the unit counter.
    pub fn add_fragment(&mut self, seqno: Seqno) {
        self.fragments.push(seqno);
        self.unit_counter = 0;
    }

    /// Seqnos of fragments replicated so far, in order.
    pub fn fragments(&self) -> &[Seqno] {
        &self.fragments
    }

    /// True if this transaction has replicated at least one fragment.
    pub fn is_streaming(&self) -> bool {
        !self.fragments.is_empty()
    }

    /// Mark the rollback fragment as replicated.
    pub fn set_rollback_replicated(&mut self) {
        self.rollback_replicated = true;
    }

    /// True if the rollback fragment has been replicated.
    pub fn rollback_replicated(&self) -> bool {
        self.rollback_replicated
    }

    /// Clear per-transaction accounting, keeping the configuration.
    pub fn cleanup(&mut self) {
        self.unit_counter = 0;
        self.fragments.clear();
        self.rollback_replicated = false;
    }
}

impl Default for StreamingContext {
    fn default() -> Self {
        Self::new()
    }
}
