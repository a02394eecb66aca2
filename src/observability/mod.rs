//! Observability
//!
//! Per OBSERVABILITY.md:
//! - Structured logs (JSON), one line per event
//! - Deterministic key ordering
//! - Synchronous, no buffering
//! - Debug detail is gated by the server-wide debug level

mod logger;

pub use logger::{Logger, Severity};
