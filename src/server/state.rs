//! Server lifecycle state machine
//!
//! Per SERVER_LIFECYCLE.md §2:
//! - A node walks disconnected → … → synced along one of two trajectories,
//!   chosen by the host's SST ordering policy (`ServerService::sst_before_init`)
//! - Engine-initialized-first: disconnected → initializing → initialized →
//!   connected → joiner → joined → synced
//! - SST-before-init: disconnected → connected → joiner → initializing →
//!   initialized → joined → synced
//! - Every state may transit to disconnecting, then disconnected
//! - Illegal transitions are programming errors
//!
//! All lifecycle state, the counters and both streaming registries live
//! behind one mutex; every state change broadcasts the server condition so
//! `wait_until_state` waiters wake up.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use crate::client::ClientState;
use crate::observability::Logger;
use crate::provider::{Provider, ProviderError, ProviderFactory, ProviderResult, ProviderStatus, StatusVariable};
use crate::service::{HighPriorityService, ServerService};
use crate::types::{ws_flags, ClientId, Gtid, NodeId, Seqno, TransactionId, View, ViewStatus, WsHandle, WsMeta};

use super::config::{RollbackMode, ServerConfig};
use super::error::{ServerError, ServerResult};
use super::registry::StreamingRegistry;

/// Lifecycle state of a replicating node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not part of any cluster.
    Disconnected,
    /// Storage engine initialization in progress.
    Initializing,
    /// Storage engine initialized.
    Initialized,
    /// Connected to the cluster, position not yet established.
    Connected,
    /// Receiving a state snapshot transfer.
    Joiner,
    /// State transfer complete, not yet caught up with the cluster.
    Joined,
    /// Donating a state snapshot transfer.
    Donor,
    /// In sync with the cluster.
    Synced,
    /// Leaving the cluster.
    Disconnecting,
}

/// Number of node states, for the per-state waiter counters.
const NODE_STATES: usize = 9;

impl NodeState {
    /// String form used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Connected => "connected",
            Self::Joiner => "joiner",
            Self::Joined => "joined",
            Self::Donor => "donor",
            Self::Synced => "synced",
            Self::Disconnecting => "disconnecting",
        }
    }
}

fn transition_allowed(from: NodeState, to: NodeState, sst_before_init: bool) -> bool {
    use NodeState::*;
    if to == Disconnecting {
        return from != Disconnecting;
    }
    match (from, to) {
        (Disconnecting, Disconnected) => true,
        // a reconnect after a disconnect cycle skips engine initialization
        (Disconnected, Initializing) => true,
        (Disconnected, Connected) => true,
        (Initializing, Initialized) => true,
        (Initialized, Connected) => true,
        (Initialized, Joined) => sst_before_init,
        (Connected, Joiner) => true,
        // the first node of a fresh cluster has nothing to transfer
        (Connected, Synced) => true,
        (Joiner, Initializing) => sst_before_init,
        (Joiner, Joined) => true,
        (Joined, Synced) => true,
        (Synced, Donor) => true,
        (Donor, Joined) => true,
        _ => false,
    }
}

struct ServerInner {
    state: NodeState,
    state_hist: Vec<NodeState>,
    state_waiters: [usize; NODE_STATES],
    bootstrap: bool,
    init_initialized: bool,
    init_synced: bool,
    sst_gtid: Gtid,
    desync_count: usize,
    pause_count: usize,
    pause_seqno: Seqno,
    connected_gtid: Gtid,
    current_view: Option<View>,
    last_committed_gtid: Gtid,
    registry: StreamingRegistry,
}

/// Process-wide coordinator of a replicating node.
///
/// Owns the provider handle, the node lifecycle, the desync/pause counters
/// and both streaming registries. Exactly one instance exists per process;
/// it must outlive every `ClientState` built on it.
pub struct ServerState {
    config: ServerConfig,
    server_service: Arc<dyn ServerService>,
    provider_factory: Box<dyn ProviderFactory>,
    provider: RwLock<Option<Arc<dyn Provider>>>,
    debug_log_level: AtomicI32,
    inner: Mutex<ServerInner>,
    cond: Condvar,
}

impl ServerState {
    /// Create the server state.
    pub fn new(
        config: ServerConfig,
        server_service: Arc<dyn ServerService>,
        provider_factory: Box<dyn ProviderFactory>,
    ) -> Arc<Self> {
        let initial_position = config.initial_position();
        Arc::new(Self {
            config,
            server_service,
            provider_factory,
            provider: RwLock::new(None),
            debug_log_level: AtomicI32::new(0),
            inner: Mutex::new(ServerInner {
                state: NodeState::Disconnected,
                state_hist: Vec::new(),
                state_waiters: [0; NODE_STATES],
                bootstrap: false,
                init_initialized: false,
                init_synced: false,
                sst_gtid: Gtid::undefined(),
                desync_count: 0,
                pause_count: 0,
                pause_seqno: Seqno::undefined(),
                connected_gtid: Gtid::undefined(),
                current_view: None,
                last_committed_gtid: initial_position,
                registry: StreamingRegistry::new(),
            }),
            cond: Condvar::new(),
        })
    }

    /// Human readable server name.
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Server identity.
    pub fn id(&self) -> NodeId {
        self.config.id()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Rollback mode this node operates in.
    pub fn rollback_mode(&self) -> RollbackMode {
        self.config.rollback_mode()
    }

    /// Host service callbacks.
    pub fn server_service(&self) -> &Arc<dyn ServerService> {
        &self.server_service
    }

    /// Debug logging level; 0 disables state-machine traces.
    pub fn debug_log_level(&self) -> i32 {
        self.debug_log_level.load(Ordering::Relaxed)
    }

    /// Set the debug logging level.
    pub fn set_debug_log_level(&self, level: i32) {
        self.debug_log_level.store(level, Ordering::Relaxed);
    }

    // ----- provider handle -------------------------------------------------

    /// Load the replication provider through the factory seam.
    ///
    /// Loading while any client session is non-idle is undefined.
    pub fn load_provider(&self, spec: &str, options: &str) -> ServerResult<()> {
        let provider = self.provider_factory.make(spec, options)?;
        let mut slot = self.provider.write().unwrap();
        *slot = Some(Arc::from(provider));
        Logger::info("server_state", "PROVIDER_LOADED", &[("spec", spec)]);
        Ok(())
    }

    /// Unload the replication provider.
    pub fn unload_provider(&self) {
        let mut slot = self.provider.write().unwrap();
        *slot = None;
        Logger::info("server_state", "PROVIDER_UNLOADED", &[]);
    }

    /// The loaded provider.
    pub fn provider(&self) -> ProviderResult<Arc<dyn Provider>> {
        self.provider
            .read()
            .unwrap()
            .clone()
            .ok_or(ProviderError::NotLoaded)
    }

    /// Provider status variables.
    pub fn status(&self) -> ProviderResult<Vec<StatusVariable>> {
        Ok(self.provider()?.status())
    }

    // ----- lifecycle -------------------------------------------------------

    /// Connect to the cluster through the provider.
    ///
    /// The state changes to connected when the provider reports back via
    /// `on_connect`.
    pub fn connect(
        &self,
        cluster_name: &str,
        cluster_address: &str,
        state_donor: &str,
        bootstrap: bool,
    ) -> ServerResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.bootstrap = bootstrap;
        }
        let provider = self.provider()?;
        let status = provider.connect(cluster_name, cluster_address, state_donor, bootstrap);
        if status.is_success() {
            Logger::info(
                "server_state",
                "CLUSTER_CONNECT",
                &[("cluster", cluster_name), ("address", cluster_address)],
            );
            Ok(())
        } else {
            Err(ServerError::provider_call("connect", status))
        }
    }

    /// Disconnect from the cluster. The final transition to disconnected
    /// happens when the provider delivers the disconnected view.
    pub fn disconnect(&self) -> ServerResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            self.change_state(&mut inner, NodeState::Disconnecting);
        }
        let provider = self.provider()?;
        let status = provider.disconnect();
        if status.is_success() {
            Ok(())
        } else {
            Err(ServerError::provider_call("disconnect", status))
        }
    }

    /// Provider callback: the node has joined the group at `gtid`.
    pub fn on_connect(&self, gtid: Gtid) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected_gtid = gtid;
        self.change_state(&mut inner, NodeState::Connected);
    }

    /// Provider callback: a new cluster view has been delivered.
    ///
    /// Primary views are installed as the current view; a connected node
    /// that is behind the view's position becomes a joiner awaiting SST.
    /// Non-primary views close the streaming appliers whose origin left the
    /// group. Disconnection views complete the disconnect.
    pub fn on_view(&self, view: &View) {
        let seqno = view.state_id().seqno().to_string();
        let members = view.members().len().to_string();
        Logger::info(
            "server_state",
            "VIEW",
            &[
                ("members", members.as_str()),
                ("seqno", seqno.as_str()),
                ("status", match view.status() {
                    ViewStatus::Primary => "primary",
                    ViewStatus::NonPrimary => "non_primary",
                    ViewStatus::Disconnected => "disconnected",
                }),
            ],
        );

        match view.status() {
            ViewStatus::Primary => {
                let mut inner = self.inner.lock().unwrap();
                if inner.state == NodeState::Connected
                    && view.state_id().seqno() > inner.connected_gtid.seqno()
                {
                    // behind the group: a state transfer must follow
                    self.change_state(&mut inner, NodeState::Joiner);
                }
                if inner.connected_gtid.is_undefined() {
                    inner.connected_gtid = view.state_id();
                }
                inner.current_view = Some(view.clone());
            }
            ViewStatus::NonPrimary => {
                let mut inner = self.inner.lock().unwrap();
                let foreign = inner.registry.foreign_applier_keys(view);
                for (origin, transaction_id) in foreign {
                    let service = inner.registry.remove_applier(origin, transaction_id);
                    let origin_str = origin.to_string();
                    let txn_str = transaction_id.to_string();
                    Logger::info(
                        "server_state",
                        "STREAMING_APPLIER_CLOSED",
                        &[("origin", origin_str.as_str()), ("transaction", txn_str.as_str())],
                    );
                    let _ = service.rollback(
                        &WsHandle::new(transaction_id, 0),
                        &WsMeta::undefined(),
                    );
                    service.after_apply();
                    self.server_service.release_high_priority_service(service);
                }
            }
            ViewStatus::Disconnected => {
                let mut inner = self.inner.lock().unwrap();
                if inner.state != NodeState::Disconnecting {
                    self.change_state(&mut inner, NodeState::Disconnecting);
                }
                self.change_state(&mut inner, NodeState::Disconnected);
            }
        }
    }

    /// Provider callback: the node has caught up with the cluster.
    pub fn on_sync(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            NodeState::Synced => {}
            NodeState::Joined | NodeState::Connected => {
                inner.init_synced = true;
                self.change_state(&mut inner, NodeState::Synced);
            }
            other => {
                Logger::warn(
                    "server_state",
                    "SYNC_IGNORED",
                    &[("state", other.as_str())],
                );
            }
        }
    }

    /// Prepare this node to receive a state snapshot transfer.
    ///
    /// Returns the SST request produced by the host.
    pub fn prepare_for_sst(&self) -> String {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != NodeState::Joiner {
                self.change_state(&mut inner, NodeState::Joiner);
            }
        }
        self.server_service.sst_request()
    }

    /// Start donating a state snapshot transfer.
    pub fn start_sst(&self, sst_request: &str, gtid: Gtid, bypass: bool) -> ServerResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            self.change_state(&mut inner, NodeState::Donor);
        }
        if self.server_service.start_sst(sst_request, gtid, bypass) != 0 {
            let mut inner = self.inner.lock().unwrap();
            self.change_state(&mut inner, NodeState::Joined);
            return Err(ServerError::sst_failed("host failed to start SST donation"));
        }
        Ok(())
    }

    /// Donor callback: the state snapshot transfer has been sent.
    pub fn sst_sent(&self, gtid: Gtid, error: i32) {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.state, NodeState::Donor);
        if error != 0 {
            let gtid_str = gtid.to_string();
            let error_str = error.to_string();
            Logger::error(
                "server_state",
                "SST_SEND_FAILED",
                &[("error", error_str.as_str()), ("gtid", gtid_str.as_str())],
            );
            self.change_state(&mut inner, NodeState::Disconnecting);
            return;
        }
        self.change_state(&mut inner, NodeState::Joined);
    }

    /// Joiner callback: the state snapshot transfer has been received.
    ///
    /// With the SST-before-init policy the engine has not been initialized
    /// yet; this call blocks until `initialized` reports engine
    /// initialization complete.
    pub fn sst_received(&self, gtid: Gtid, error: i32) {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.state, NodeState::Joiner);
        if error != 0 {
            let error_str = error.to_string();
            Logger::error(
                "server_state",
                "SST_RECEIVE_FAILED",
                &[("error", error_str.as_str())],
            );
            self.change_state(&mut inner, NodeState::Disconnecting);
            return;
        }
        inner.sst_gtid = gtid;
        if gtid.seqno().is_defined() {
            inner.last_committed_gtid = gtid;
        }
        if !inner.init_initialized {
            self.change_state(&mut inner, NodeState::Initializing);
            while !inner.init_initialized {
                inner = self.cond.wait(inner).unwrap();
            }
            // initialized() has moved the state to initialized
            assert_eq!(inner.state, NodeState::Initialized);
        }
        self.change_state(&mut inner, NodeState::Joined);
    }

    /// Host callback: storage engine initialization is complete.
    pub fn initialized(&self) {
        let mut inner = self.inner.lock().unwrap();
        assert!(!inner.init_initialized, "initialized() called twice");
        match inner.state {
            NodeState::Initializing => {
                self.change_state(&mut inner, NodeState::Initialized);
            }
            NodeState::Disconnected => {
                // engine-initialized-first: init completes before connect
                self.change_state(&mut inner, NodeState::Initializing);
                self.change_state(&mut inner, NodeState::Initialized);
            }
            other => panic!("initialized() in state {}", other.as_str()),
        }
        inner.init_initialized = true;
        self.cond.notify_all();
    }

    /// True once the storage engine has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().unwrap().init_initialized
    }

    /// True once the node has been synced with the cluster at least once.
    pub fn has_synced(&self) -> bool {
        self.inner.lock().unwrap().init_synced
    }

    /// True if this node was asked to bootstrap the cluster.
    pub fn bootstrap(&self) -> bool {
        self.inner.lock().unwrap().bootstrap
    }

    /// Block until the server reaches `target`.
    pub fn wait_until_state(&self, target: NodeState) {
        let mut inner = self.inner.lock().unwrap();
        inner.state_waiters[target as usize] += 1;
        while inner.state != target {
            inner = self.cond.wait(inner).unwrap();
        }
        inner.state_waiters[target as usize] -= 1;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.inner.lock().unwrap().state
    }

    /// All states visited so far, in order.
    pub fn state_history(&self) -> Vec<NodeState> {
        self.inner.lock().unwrap().state_hist.clone()
    }

    /// Number of threads currently waiting for `target`.
    pub fn state_waiters(&self, target: NodeState) -> usize {
        self.inner.lock().unwrap().state_waiters[target as usize]
    }

    // ----- desync / pause --------------------------------------------------

    /// Desynchronize the node from cluster flow control. Counted; only the
    /// first desync reaches the provider.
    pub fn desync(&self) -> ServerResult<()> {
        let provider = self.provider()?;
        let mut inner = self.inner.lock().unwrap();
        self.desync_locked(&mut inner, &provider)
    }

    /// Resynchronize the node. Counted; only the last resync reaches the
    /// provider.
    pub fn resync(&self) -> ServerResult<()> {
        let provider = self.provider()?;
        let mut inner = self.inner.lock().unwrap();
        self.resync_locked(&mut inner, &provider)
    }

    /// Pause the provider. Counted; returns the seqno the provider stopped
    /// at.
    pub fn pause(&self) -> ServerResult<Seqno> {
        let provider = self.provider()?;
        let mut inner = self.inner.lock().unwrap();
        self.pause_locked(&mut inner, &provider)
    }

    /// Resume a paused provider. Counted.
    pub fn resume(&self) -> ServerResult<()> {
        let provider = self.provider()?;
        let mut inner = self.inner.lock().unwrap();
        self.resume_locked(&mut inner, &provider)
    }

    /// Desync and pause in one step. Holds the server mutex across both so
    /// no observer sees the intermediate state.
    pub fn desync_and_pause(&self) -> ServerResult<Seqno> {
        let provider = self.provider()?;
        let mut inner = self.inner.lock().unwrap();
        self.desync_locked(&mut inner, &provider)?;
        match self.pause_locked(&mut inner, &provider) {
            Ok(seqno) => Ok(seqno),
            Err(e) => {
                // undo the desync so the counters stay balanced
                let _ = self.resync_locked(&mut inner, &provider);
                Err(e)
            }
        }
    }

    /// Resume and resync in one step. The provider must have been desynced
    /// and paused before, together or separately.
    pub fn resume_and_resync(&self) -> ServerResult<()> {
        let provider = self.provider()?;
        let mut inner = self.inner.lock().unwrap();
        self.resume_locked(&mut inner, &provider)?;
        self.resync_locked(&mut inner, &provider)
    }

    /// Current desync depth.
    pub fn desync_count(&self) -> usize {
        self.inner.lock().unwrap().desync_count
    }

    /// Current pause depth.
    pub fn pause_count(&self) -> usize {
        self.inner.lock().unwrap().pause_count
    }

    /// Seqno captured by the outermost pause.
    pub fn pause_seqno(&self) -> Seqno {
        self.inner.lock().unwrap().pause_seqno
    }

    fn desync_locked(
        &self,
        inner: &mut ServerInner,
        provider: &Arc<dyn Provider>,
    ) -> ServerResult<()> {
        if inner.desync_count == 0 {
            let status = provider.desync();
            if !status.is_success() {
                return Err(ServerError::provider_call("desync", status));
            }
        }
        inner.desync_count += 1;
        Ok(())
    }

    fn resync_locked(
        &self,
        inner: &mut ServerInner,
        provider: &Arc<dyn Provider>,
    ) -> ServerResult<()> {
        assert!(inner.desync_count > 0, "resync without desync");
        if inner.desync_count == 1 {
            let status = provider.resync();
            if !status.is_success() {
                return Err(ServerError::provider_call("resync", status));
            }
        }
        inner.desync_count -= 1;
        Ok(())
    }

    fn pause_locked(
        &self,
        inner: &mut ServerInner,
        provider: &Arc<dyn Provider>,
    ) -> ServerResult<Seqno> {
        if inner.pause_count == 0 {
            match provider.pause() {
                Ok(seqno) => inner.pause_seqno = seqno,
                Err(status) => return Err(ServerError::provider_call("pause", status)),
            }
        }
        inner.pause_count += 1;
        Ok(inner.pause_seqno)
    }

    fn resume_locked(
        &self,
        inner: &mut ServerInner,
        provider: &Arc<dyn Provider>,
    ) -> ServerResult<()> {
        assert!(inner.pause_count > 0, "resume without pause");
        if inner.pause_count == 1 {
            let status = provider.resume();
            if !status.is_success() {
                return Err(ServerError::provider_call("resume", status));
            }
            inner.pause_seqno = Seqno::undefined();
        }
        inner.pause_count -= 1;
        Ok(())
    }

    // ----- positions -------------------------------------------------------

    /// Position at which this node connected to the cluster.
    pub fn connected_gtid(&self) -> Gtid {
        self.inner.lock().unwrap().connected_gtid
    }

    /// The currently installed primary view, if any.
    pub fn current_view(&self) -> Option<View> {
        self.inner.lock().unwrap().current_view.clone()
    }

    /// GTID delivered by the last state snapshot transfer.
    pub fn sst_gtid(&self) -> Gtid {
        self.inner.lock().unwrap().sst_gtid
    }

    /// Last GTID known to be committed on this node.
    pub fn last_committed_gtid(&self) -> Gtid {
        self.inner.lock().unwrap().last_committed_gtid
    }

    /// Record a committed GTID.
    pub fn set_last_committed_gtid(&self, gtid: Gtid) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_committed_gtid = gtid;
    }

    /// Wait until all write sets up to `gtid` have been committed.
    pub fn wait_for_gtid(&self, gtid: Gtid, timeout_secs: i32) -> ProviderStatus {
        match self.provider() {
            Ok(provider) => provider.wait_for_gtid(gtid, timeout_secs),
            Err(_) => ProviderStatus::NotLoaded,
        }
    }

    /// Perform a causal read barrier against the cluster.
    pub fn causal_read(&self, timeout_secs: i32) -> Result<Gtid, ProviderStatus> {
        match self.provider() {
            Ok(provider) => provider.causal_read(timeout_secs),
            Err(_) => Err(ProviderStatus::NotLoaded),
        }
    }

    // ----- streaming registries --------------------------------------------

    /// Register a local client that started streaming.
    pub fn start_streaming_client(&self, client: &Arc<ClientState>) {
        let id = client.id();
        let mut inner = self.inner.lock().unwrap();
        inner.registry.insert_client(id, Arc::downgrade(client));
    }

    /// Remove a local streaming client.
    pub fn stop_streaming_client(&self, id: ClientId) {
        let mut inner = self.inner.lock().unwrap();
        let _ = inner.registry.remove_client(id);
    }

    /// Convert a local streaming client into a streaming applier, keyed by
    /// this node's identity and the client's transaction.
    ///
    /// Used when the local session ends but its streaming transaction must
    /// continue under a high-priority service, e.g. for replay after a view
    /// change.
    pub fn convert_streaming_client_to_applier(&self, client: &Arc<ClientState>) {
        let id = client.id();
        let transaction_id = client
            .transaction_id()
            .expect("streaming client has an active transaction");
        let service = self.server_service.streaming_applier_service();
        let mut inner = self.inner.lock().unwrap();
        let _ = inner.registry.remove_client(id);
        inner
            .registry
            .insert_applier(self.config.id(), transaction_id, service);
    }

    /// Register a streaming applier hosting a remote transaction.
    pub fn start_streaming_applier(
        &self,
        origin: NodeId,
        transaction_id: TransactionId,
        service: Arc<dyn HighPriorityService>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.registry.insert_applier(origin, transaction_id, service);
    }

    /// Remove a streaming applier.
    pub fn stop_streaming_applier(&self, origin: NodeId, transaction_id: TransactionId) {
        let mut inner = self.inner.lock().unwrap();
        let _ = inner.registry.remove_applier(origin, transaction_id);
    }

    /// Look up the streaming applier hosting a remote transaction.
    pub fn find_streaming_applier(
        &self,
        origin: NodeId,
        transaction_id: TransactionId,
    ) -> Option<Arc<dyn HighPriorityService>> {
        self.inner
            .lock()
            .unwrap()
            .registry
            .find_applier(origin, transaction_id)
    }

    /// Ids of registered streaming clients.
    pub fn streaming_clients(&self) -> Vec<ClientId> {
        self.inner.lock().unwrap().registry.client_ids()
    }

    /// Keys of registered streaming appliers.
    pub fn streaming_appliers(&self) -> Vec<(NodeId, TransactionId)> {
        self.inner.lock().unwrap().registry.applier_keys()
    }

    /// True if the client is registered as streaming.
    pub fn is_streaming_client(&self, id: ClientId) -> bool {
        self.inner.lock().unwrap().registry.has_client(id)
    }

    // ----- apply dispatch --------------------------------------------------

    /// Provider callback: apply one remote write set.
    ///
    /// Routes the write set to the given high-priority service, or to the
    /// registered streaming applier for fragments of an in-flight remote
    /// streaming transaction. The write set is committed or rolled back
    /// before this returns.
    pub fn on_apply(
        &self,
        high_priority_service: &dyn HighPriorityService,
        ws_handle: &WsHandle,
        ws_meta: &WsMeta,
        data: &[u8],
    ) -> ProviderStatus {
        let flags = ws_meta.flags();
        let starts = flags & ws_flags::START_TRANSACTION != 0;
        let commits = flags & ws_flags::COMMIT != 0;
        let rolls_back = flags & ws_flags::ROLLBACK != 0;
        let key = (ws_meta.server_id(), ws_meta.transaction_id());

        if flags & ws_flags::TOI != 0 {
            // total-order-isolation operation, globally serialized
            let ok = high_priority_service.apply_toi(ws_meta, data) == 0;
            high_priority_service.after_apply();
            if ok {
                self.set_last_committed_gtid(ws_meta.gtid());
                return ProviderStatus::Success;
            }
            return ProviderStatus::Fatal;
        }

        if rolls_back {
            // rollback fragment of a remote streaming transaction
            let service = {
                let mut inner = self.inner.lock().unwrap();
                if inner.registry.find_applier(key.0, key.1).is_some() {
                    Some(inner.registry.remove_applier(key.0, key.1))
                } else {
                    None
                }
            };
            if let Some(service) = service {
                let _ = service.rollback(ws_handle, ws_meta);
                service.after_apply();
                self.server_service.release_high_priority_service(service);
            }
            return ProviderStatus::Success;
        }

        if starts && commits {
            // whole transaction in one write set
            if high_priority_service.start_transaction(ws_handle, ws_meta) != 0 {
                let _ = high_priority_service.rollback(ws_handle, ws_meta);
                high_priority_service.after_apply();
                return ProviderStatus::Fatal;
            }
            let mut ok = high_priority_service.apply_write_set(ws_meta, data) == 0;
            if ok {
                ok = high_priority_service.commit(ws_handle, ws_meta) == 0;
            } else {
                let _ = high_priority_service.rollback(ws_handle, ws_meta);
            }
            high_priority_service.after_apply();
            if ok {
                self.set_last_committed_gtid(ws_meta.gtid());
                return ProviderStatus::Success;
            }
            return ProviderStatus::Fatal;
        }

        if starts {
            // first fragment of a remote streaming transaction
            let service = self.server_service.streaming_applier_service();
            self.start_streaming_applier(key.0, key.1, service.clone());
            if service.start_transaction(ws_handle, ws_meta) != 0
                || service.apply_write_set(ws_meta, data) != 0
            {
                let _ = service.rollback(ws_handle, ws_meta);
                service.after_apply();
                self.stop_streaming_applier(key.0, key.1);
                self.server_service.release_high_priority_service(service);
                return ProviderStatus::Fatal;
            }
            service.after_apply();
            return ProviderStatus::Success;
        }

        // continuation or commit fragment of a remote streaming transaction
        let service = match self.find_streaming_applier(key.0, key.1) {
            Some(service) => service,
            None => {
                let origin = key.0.to_string();
                let transaction = key.1.to_string();
                Logger::error(
                    "server_state",
                    "STREAMING_APPLIER_MISSING",
                    &[
                        ("origin", origin.as_str()),
                        ("transaction", transaction.as_str()),
                    ],
                );
                return ProviderStatus::Fatal;
            }
        };

        let mut ok = service.apply_write_set(ws_meta, data) == 0;
        if commits {
            if ok {
                ok = service.commit(ws_handle, ws_meta) == 0;
            } else {
                let _ = service.rollback(ws_handle, ws_meta);
            }
            service.after_apply();
            self.stop_streaming_applier(key.0, key.1);
            self.server_service.release_high_priority_service(service);
            if ok {
                self.set_last_committed_gtid(ws_meta.gtid());
            }
        } else {
            service.after_apply();
        }
        if ok {
            ProviderStatus::Success
        } else {
            ProviderStatus::Fatal
        }
    }

    // ----- internal --------------------------------------------------------

    fn change_state(&self, inner: &mut ServerInner, to: NodeState) {
        let sst_before_init = self.server_service.sst_before_init();
        if !transition_allowed(inner.state, to, sst_before_init) {
            panic!(
                "server {}: unallowed state transition: {} -> {}",
                self.config.name(),
                inner.state.as_str(),
                to.as_str()
            );
        }
        Logger::info(
            "server_state",
            "STATE_CHANGE",
            &[("from", inner.state.as_str()), ("to", to.as_str())],
        );
        inner.state = to;
        inner.state_hist.push(to);
        self.cond.notify_all();
    }
}

impl Drop for ServerState {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.try_lock() {
            debug_assert!(
                inner.state_waiters.iter().all(|&w| w == 0),
                "server state dropped with threads waiting on it"
            );
        }
    }
}
