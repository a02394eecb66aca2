//! Provider facade
//!
//! Per CLUSTER_MODEL.md §5:
//! - The replication provider is an external library with an opaque ABI
//! - Every facade method maps one-to-one to a provider entry point
//! - Every method reports a `ProviderStatus`; the facade never panics on
//!   provider failure
//!
//! The facade is the only surface through which the core talks to the
//! replication world. Provider calls may block; callers must not hold the
//! server or client mutex across a facade call unless the operation is
//! documented to require it (see `ServerState::desync_and_pause`).

mod status;

pub use status::ProviderStatus;

use thiserror::Error;

use crate::types::{ClientId, Gtid, Key, Seqno, WsHandle, WsMeta};

/// Result alias for facade bookkeeping operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors of the provider handle lifecycle, distinct from call statuses.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// No provider has been loaded into the server state.
    #[error("replication provider not loaded")]
    NotLoaded,

    /// The provider factory refused to construct a provider.
    #[error("loading replication provider '{spec}' failed: {reason}")]
    LoadFailed { spec: String, reason: String },
}

/// One provider status variable, as reported by `Provider::status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusVariable {
    pub name: String,
    pub value: String,
}

impl StatusVariable {
    /// Create a status variable.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Capability interface over the external replication provider.
///
/// Implementations are shared by every client session through the server
/// state and must tolerate concurrent calls, subject to the provider's own
/// per-handle discipline.
pub trait Provider: Send + Sync {
    /// Connect to the cluster.
    fn connect(
        &self,
        cluster_name: &str,
        cluster_address: &str,
        state_donor: &str,
        bootstrap: bool,
    ) -> ProviderStatus;

    /// Disconnect from the cluster.
    fn disconnect(&self) -> ProviderStatus;

    /// Run one applier loop on the calling thread. Blocks until disconnect.
    fn run_applier(&self) -> ProviderStatus;

    /// Append a certification key to the write set under construction.
    fn append_key(&self, ws_handle: &WsHandle, key: &Key) -> ProviderStatus;

    /// Append payload data to the write set under construction.
    fn append_data(&self, ws_handle: &WsHandle, data: &[u8]) -> ProviderStatus;

    /// Certify a write set. On success the returned metadata carries the
    /// assigned position.
    fn certify(
        &self,
        client_id: ClientId,
        ws_handle: &WsHandle,
        flags: u32,
    ) -> Result<WsMeta, ProviderStatus>;

    /// Enter the commit order critical section for an ordered write set.
    fn commit_order_enter(&self, ws_handle: &WsHandle, ws_meta: &WsMeta) -> ProviderStatus;

    /// Leave the commit order critical section.
    fn commit_order_leave(&self, ws_handle: &WsHandle, ws_meta: &WsMeta) -> ProviderStatus;

    /// Release a write-set handle after commit or rollback.
    fn release(&self, ws_handle: &WsHandle) -> ProviderStatus;

    /// Replay an ordered write set on the calling thread.
    fn replay(&self, ws_handle: &WsHandle, client_id: ClientId) -> ProviderStatus;

    /// Enter a total-order-isolation critical section.
    fn enter_toi(
        &self,
        client_id: ClientId,
        keys: &[Key],
        buffer: &[u8],
        flags: u32,
    ) -> Result<WsMeta, ProviderStatus>;

    /// Leave a total-order-isolation critical section.
    fn leave_toi(&self, client_id: ClientId) -> ProviderStatus;

    /// Desynchronize this node from the cluster flow control.
    fn desync(&self) -> ProviderStatus;

    /// Resynchronize this node.
    fn resync(&self) -> ProviderStatus;

    /// Pause the provider. On success returns the seqno at which the
    /// provider stopped.
    fn pause(&self) -> Result<Seqno, ProviderStatus>;

    /// Resume a paused provider.
    fn resume(&self) -> ProviderStatus;

    /// Perform a causal read barrier. Returns the reached position.
    fn causal_read(&self, timeout_secs: i32) -> Result<Gtid, ProviderStatus>;

    /// Wait until all write sets up to `gtid` have been committed.
    fn wait_for_gtid(&self, gtid: Gtid, timeout_secs: i32) -> ProviderStatus;

    /// Snapshot of provider status variables.
    fn status(&self) -> Vec<StatusVariable>;
}

/// Factory seam through which `ServerState::load_provider` constructs a
/// provider.
///
/// The provider ABI and its dynamic loading are outside this crate; hosts
/// install a factory that resolves a provider spec (typically a shared
/// object path) and an options string into a live provider.
pub trait ProviderFactory: Send + Sync {
    /// Construct a provider from its spec and options.
    fn make(&self, spec: &str, options: &str) -> Result<Box<dyn Provider>, ProviderError>;
}
