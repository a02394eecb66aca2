//! Synchronization point injection for race testing
//!
//! Per TRANSACTION_MODEL.md §7, the interesting failures in the
//! coordination core are races: a brute-force abort arriving while the
//! victim sits inside certification, a view change racing a streaming
//! fragment. Named synchronization points mark those windows.
//!
//! The core calls `ClientService::debug_sync` with one of the names below at
//! each window; the host (or the test mock) decides what to do there. In
//! production builds the callback is a no-op.

/// All defined synchronization point names.
pub mod points {
    /// Before the client enters the replayer wait ahead of certification.
    pub const BEFORE_REPLAYER_WAIT: &str = "before_replayer_wait";

    /// After write-set data has been prepared, before certification.
    pub const BEFORE_CERTIFICATION: &str = "before_certification";

    /// After certification returned, before the status is acted on.
    pub const AFTER_CERTIFICATION: &str = "after_certification";

    /// Before entering the commit-order critical section.
    pub const BEFORE_COMMIT_ORDER_ENTER: &str = "before_commit_order_enter";

    /// After a streaming fragment has been certified.
    pub const AFTER_FRAGMENT_CERTIFY: &str = "after_fragment_certify";

    /// Before a transaction replay is handed to the provider.
    pub const BEFORE_REPLAY: &str = "before_replay";

    /// Get all synchronization point names.
    pub fn all() -> &'static [&'static str] {
        &[
            BEFORE_REPLAYER_WAIT,
            BEFORE_CERTIFICATION,
            AFTER_CERTIFICATION,
            BEFORE_COMMIT_ORDER_ENTER,
            AFTER_FRAGMENT_CERTIFY,
            BEFORE_REPLAY,
        ]
    }
}
