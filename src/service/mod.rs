//! Host service traits
//!
//! The coordination core never owns storage, SQL execution or threads. It
//! reaches back into the host DBMS through these traits:
//!
//! - `ClientService`: per-session callbacks (rollback, replay, write-set
//!   payload preparation, kill checks, debug hooks)
//! - `ServerService`: process-wide callbacks (high-priority service
//!   lifecycle, SST policy and mechanics)
//! - `HighPriorityService`: application of one remote write set or fragment
//!
//! All three are object safe so tests can substitute mocks; the mock
//! harness under `tests/support` exercises every seam.

use crate::client::ClientError;
use crate::provider::ProviderStatus;
use crate::types::{Gtid, TransactionId, WsHandle, WsMeta};

/// Per-session callbacks into the host DBMS.
///
/// Calls arrive with the owning client mutex released, so implementations
/// may call back into the owning `ClientState`.
pub trait ClientService: Send + Sync {
    /// True if the session commits through a two-phase path.
    fn do_2pc(&self) -> bool;

    /// True if the current statement runs in autocommit mode.
    fn is_autocommit(&self) -> bool;

    /// Roll back the session's current transaction in the DBMS. The
    /// implementation must drive `before_rollback`/`after_rollback` on the
    /// owning client state.
    fn rollback(&self);

    /// Store a streaming fragment in the host's fragment table.
    fn append_fragment(&self, transaction_id: TransactionId, flags: u32, data: &[u8]) -> i32;

    /// Remove all stored fragments of the session's streaming transaction.
    fn remove_fragments(&self);

    /// Notification that the transaction will be replayed.
    fn will_replay(&self);

    /// Replay the transaction. The implementation must drive the provider
    /// replay call through the owning client state and return its status.
    fn replay(&self) -> ProviderStatus;

    /// Wait until preceding replayers have finished. Called with the client
    /// mutex released.
    fn wait_for_replayers(&self);

    /// Fill the transaction's write set from the DBMS row events.
    /// Non-zero return aborts the commit.
    fn prepare_data_for_replication(&self) -> i32;

    /// Fill a streaming fragment from the DBMS row events accumulated since
    /// the previous fragment. Non-zero return aborts the transaction.
    fn prepare_fragment_for_replication(&self, buffer: &mut Vec<u8>) -> i32;

    /// True if the DBMS has killed this session.
    fn killed(&self) -> bool;

    /// Abort the session immediately (fatal programming error path).
    fn abort(&self);

    /// Re-establish session thread-local state after a thread switch.
    fn store_globals(&self);

    /// Named synchronization point for race testing (see `sync_point`).
    fn debug_sync(&self, point: &str);

    /// Kill the process at a named point, for crash testing.
    fn debug_suicide(&self, point: &str);

    /// Notification of an error surfaced to this session.
    fn on_error(&self, error: ClientError);
}

/// Process-wide callbacks into the host DBMS.
pub trait ServerService: Send + Sync {
    /// Construct a high-priority service to host a streaming applier. The
    /// service is shared between the registry and the applier thread that
    /// drives it.
    fn streaming_applier_service(&self) -> std::sync::Arc<dyn HighPriorityService>;

    /// Release a high-priority service produced by this server service,
    /// after its transaction committed or rolled back.
    fn release_high_priority_service(&self, service: std::sync::Arc<dyn HighPriorityService>);

    /// SST ordering policy: true if the state transfer runs before the
    /// storage engine is initialized (physical SST), false if after
    /// (logical SST).
    fn sst_before_init(&self) -> bool;

    /// Produce the SST request string for this joiner.
    fn sst_request(&self) -> String;

    /// Start donating a state snapshot transfer. Non-zero return means the
    /// donor could not start the transfer.
    fn start_sst(&self, sst_request: &str, gtid: Gtid, bypass: bool) -> i32;

    /// Host log sink for background events that have no session context.
    fn log_message(&self, level: &str, message: &str);
}

/// Application of remote write sets on a high-priority session.
///
/// The provider calls the core with applier threads it owns; the core routes
/// each write set to one of these services, which must complete either
/// commit or rollback before returning.
pub trait HighPriorityService: Send + Sync {
    /// Begin a new transaction for the given write set.
    fn start_transaction(&self, ws_handle: &WsHandle, ws_meta: &WsMeta) -> i32;

    /// Apply one write set or fragment payload. Non-zero return means the
    /// apply failed and the transaction must roll back.
    fn apply_write_set(&self, ws_meta: &WsMeta, data: &[u8]) -> i32;

    /// Commit the applied transaction in order.
    fn commit(&self, ws_handle: &WsHandle, ws_meta: &WsMeta) -> i32;

    /// Roll back the transaction.
    fn rollback(&self, ws_handle: &WsHandle, ws_meta: &WsMeta) -> i32;

    /// Apply a total-order-isolation operation.
    fn apply_toi(&self, ws_meta: &WsMeta, data: &[u8]) -> i32;

    /// Per-write-set epilogue; runs after commit or rollback.
    fn after_apply(&self);

    /// True while this service replays a transaction.
    fn is_replaying(&self) -> bool;
}
