//! Shared mock harness for the integration suites.
//!
//! The mocks substitute the three host seams (client service, server
//! service, high-priority service) and the replication provider, with
//! failure injection at the interesting windows: certification results,
//! commit-order conflicts, brute-force aborts delivered during the
//! replayer wait or at named synchronization points, kill requests ahead
//! of certification, and fragment preparation errors.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use aerosync::client::{ClientError, ClientMode, ClientState};
use aerosync::provider::{
    Provider, ProviderError, ProviderFactory, ProviderStatus, StatusVariable,
};
use aerosync::server::{RollbackMode, ServerConfig, ServerState};
use aerosync::service::{ClientService, HighPriorityService, ServerService};
use aerosync::types::{
    ws_flags, ClientId, Gtid, Key, Member, NodeId, Seqno, TransactionId, View, ViewStatus,
    WsHandle, WsMeta,
};

// ---------------------------------------------------------------------------
// Provider mock
// ---------------------------------------------------------------------------

struct MockProviderInner {
    history: NodeId,
    server_id: NodeId,
    next_seqno: i64,
    certify_failure: Option<ProviderStatus>,
    commit_order_enter_failure: Option<ProviderStatus>,
    replay_result: ProviderStatus,
    pause_failure: Option<ProviderStatus>,
    desync_failure: Option<ProviderStatus>,
    connects: usize,
    disconnects: usize,
    desyncs: usize,
    resyncs: usize,
    pauses: usize,
    resumes: usize,
    commit_order_enters: usize,
    commit_order_leaves: usize,
    releases: Vec<WsHandle>,
    replays: usize,
    toi_enters: usize,
    toi_leaves: usize,
}

/// Provider mock assigning monotonic seqnos from one history UUID.
///
/// Clones share state, so the factory hands the server the same instance
/// the test injects failures into.
#[derive(Clone)]
pub struct MockProvider {
    inner: Arc<Mutex<MockProviderInner>>,
}

impl MockProvider {
    pub fn new(server_id: NodeId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockProviderInner {
                history: NodeId::generate(),
                server_id,
                next_seqno: 0,
                certify_failure: None,
                commit_order_enter_failure: None,
                replay_result: ProviderStatus::Success,
                pause_failure: None,
                desync_failure: None,
                connects: 0,
                disconnects: 0,
                desyncs: 0,
                resyncs: 0,
                pauses: 0,
                resumes: 0,
                commit_order_enters: 0,
                commit_order_leaves: 0,
                releases: Vec::new(),
                replays: 0,
                toi_enters: 0,
                toi_leaves: 0,
            })),
        }
    }

    pub fn history(&self) -> NodeId {
        self.inner.lock().unwrap().history
    }

    pub fn fail_next_certify(&self, status: ProviderStatus) {
        self.inner.lock().unwrap().certify_failure = Some(status);
    }

    pub fn fail_next_commit_order_enter(&self, status: ProviderStatus) {
        self.inner.lock().unwrap().commit_order_enter_failure = Some(status);
    }

    pub fn set_replay_result(&self, status: ProviderStatus) {
        self.inner.lock().unwrap().replay_result = status;
    }

    pub fn fail_pause(&self, status: ProviderStatus) {
        self.inner.lock().unwrap().pause_failure = Some(status);
    }

    pub fn fail_desync(&self, status: ProviderStatus) {
        self.inner.lock().unwrap().desync_failure = Some(status);
    }

    pub fn last_seqno(&self) -> Seqno {
        Seqno::new(self.inner.lock().unwrap().next_seqno)
    }

    pub fn desyncs(&self) -> usize {
        self.inner.lock().unwrap().desyncs
    }

    pub fn resyncs(&self) -> usize {
        self.inner.lock().unwrap().resyncs
    }

    pub fn pauses(&self) -> usize {
        self.inner.lock().unwrap().pauses
    }

    pub fn resumes(&self) -> usize {
        self.inner.lock().unwrap().resumes
    }

    pub fn releases(&self) -> usize {
        self.inner.lock().unwrap().releases.len()
    }

    pub fn replays(&self) -> usize {
        self.inner.lock().unwrap().replays
    }

    pub fn disconnects(&self) -> usize {
        self.inner.lock().unwrap().disconnects
    }

    pub fn toi_enters(&self) -> usize {
        self.inner.lock().unwrap().toi_enters
    }

    pub fn toi_leaves(&self) -> usize {
        self.inner.lock().unwrap().toi_leaves
    }

    fn assign_meta(
        inner: &mut MockProviderInner,
        client_id: ClientId,
        transaction_id: TransactionId,
        flags: u32,
    ) -> WsMeta {
        inner.next_seqno += 1;
        WsMeta::new(
            Gtid::new(inner.history, Seqno::new(inner.next_seqno)),
            inner.server_id,
            client_id,
            transaction_id,
            flags,
            Seqno::new(inner.next_seqno - 1),
        )
    }
}

impl Provider for MockProvider {
    fn connect(
        &self,
        _cluster_name: &str,
        _cluster_address: &str,
        _state_donor: &str,
        _bootstrap: bool,
    ) -> ProviderStatus {
        self.inner.lock().unwrap().connects += 1;
        ProviderStatus::Success
    }

    fn disconnect(&self) -> ProviderStatus {
        self.inner.lock().unwrap().disconnects += 1;
        ProviderStatus::Success
    }

    fn run_applier(&self) -> ProviderStatus {
        ProviderStatus::Success
    }

    fn append_key(&self, _ws_handle: &WsHandle, _key: &Key) -> ProviderStatus {
        ProviderStatus::Success
    }

    fn append_data(&self, _ws_handle: &WsHandle, _data: &[u8]) -> ProviderStatus {
        ProviderStatus::Success
    }

    fn certify(
        &self,
        client_id: ClientId,
        ws_handle: &WsHandle,
        flags: u32,
    ) -> Result<WsMeta, ProviderStatus> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(status) = inner.certify_failure.take() {
            return Err(status);
        }
        Ok(Self::assign_meta(
            &mut inner,
            client_id,
            ws_handle.transaction_id(),
            flags,
        ))
    }

    fn commit_order_enter(&self, _ws_handle: &WsHandle, _ws_meta: &WsMeta) -> ProviderStatus {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_order_enters += 1;
        if let Some(status) = inner.commit_order_enter_failure.take() {
            return status;
        }
        ProviderStatus::Success
    }

    fn commit_order_leave(&self, _ws_handle: &WsHandle, _ws_meta: &WsMeta) -> ProviderStatus {
        self.inner.lock().unwrap().commit_order_leaves += 1;
        ProviderStatus::Success
    }

    fn release(&self, ws_handle: &WsHandle) -> ProviderStatus {
        self.inner.lock().unwrap().releases.push(*ws_handle);
        ProviderStatus::Success
    }

    fn replay(&self, _ws_handle: &WsHandle, _client_id: ClientId) -> ProviderStatus {
        let mut inner = self.inner.lock().unwrap();
        inner.replays += 1;
        inner.replay_result
    }

    fn enter_toi(
        &self,
        client_id: ClientId,
        _keys: &[Key],
        _buffer: &[u8],
        flags: u32,
    ) -> Result<WsMeta, ProviderStatus> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(status) = inner.certify_failure.take() {
            return Err(status);
        }
        inner.toi_enters += 1;
        Ok(Self::assign_meta(
            &mut inner,
            client_id,
            TransactionId::new(0),
            flags | ws_flags::TOI,
        ))
    }

    fn leave_toi(&self, _client_id: ClientId) -> ProviderStatus {
        self.inner.lock().unwrap().toi_leaves += 1;
        ProviderStatus::Success
    }

    fn desync(&self) -> ProviderStatus {
        let mut inner = self.inner.lock().unwrap();
        if let Some(status) = inner.desync_failure.take() {
            return status;
        }
        inner.desyncs += 1;
        ProviderStatus::Success
    }

    fn resync(&self) -> ProviderStatus {
        self.inner.lock().unwrap().resyncs += 1;
        ProviderStatus::Success
    }

    fn pause(&self) -> Result<Seqno, ProviderStatus> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(status) = inner.pause_failure.take() {
            return Err(status);
        }
        inner.pauses += 1;
        Ok(Seqno::new(inner.next_seqno))
    }

    fn resume(&self) -> ProviderStatus {
        self.inner.lock().unwrap().resumes += 1;
        ProviderStatus::Success
    }

    fn causal_read(&self, _timeout_secs: i32) -> Result<Gtid, ProviderStatus> {
        let inner = self.inner.lock().unwrap();
        Ok(Gtid::new(inner.history, Seqno::new(inner.next_seqno)))
    }

    fn wait_for_gtid(&self, _gtid: Gtid, _timeout_secs: i32) -> ProviderStatus {
        ProviderStatus::Success
    }

    fn status(&self) -> Vec<StatusVariable> {
        let inner = self.inner.lock().unwrap();
        vec![
            StatusVariable::new("provider_name", "mock"),
            StatusVariable::new("last_seqno", inner.next_seqno.to_string()),
        ]
    }
}

/// Factory handing out clones of one shared mock provider.
pub struct MockProviderFactory {
    provider: MockProvider,
    fail_load: AtomicBool,
}

impl MockProviderFactory {
    pub fn new(provider: MockProvider) -> Self {
        Self {
            provider,
            fail_load: AtomicBool::new(false),
        }
    }

    pub fn fail_load(provider: MockProvider) -> Self {
        Self {
            provider,
            fail_load: AtomicBool::new(true),
        }
    }
}

impl ProviderFactory for MockProviderFactory {
    fn make(&self, spec: &str, _options: &str) -> Result<Box<dyn Provider>, ProviderError> {
        if self.fail_load.load(Ordering::Relaxed) {
            return Err(ProviderError::LoadFailed {
                spec: spec.to_string(),
                reason: "mock load failure".to_string(),
            });
        }
        Ok(Box::new(self.provider.clone()))
    }
}

// ---------------------------------------------------------------------------
// Client service mock
// ---------------------------------------------------------------------------

/// Client service mock bound to its client state after construction.
pub struct MockClientService {
    client: Mutex<Weak<ClientState>>,
    pub autocommit: AtomicBool,
    pub two_pc: AtomicBool,
    pub bf_abort_during_wait: AtomicBool,
    pub error_during_prepare_data: AtomicBool,
    pub killed_before_certify: AtomicBool,
    sync_point: Mutex<Option<String>>,
    pub rollbacks: AtomicUsize,
    pub replays: AtomicUsize,
    pub will_replay_calls: AtomicUsize,
    pub remove_fragments_calls: AtomicUsize,
    pub store_globals_calls: AtomicUsize,
    pub fragments: Mutex<Vec<(TransactionId, u32, Vec<u8>)>>,
    pub last_error: Mutex<Option<ClientError>>,
}

impl MockClientService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            client: Mutex::new(Weak::new()),
            autocommit: AtomicBool::new(true),
            two_pc: AtomicBool::new(false),
            bf_abort_during_wait: AtomicBool::new(false),
            error_during_prepare_data: AtomicBool::new(false),
            killed_before_certify: AtomicBool::new(false),
            sync_point: Mutex::new(None),
            rollbacks: AtomicUsize::new(0),
            replays: AtomicUsize::new(0),
            will_replay_calls: AtomicUsize::new(0),
            remove_fragments_calls: AtomicUsize::new(0),
            store_globals_calls: AtomicUsize::new(0),
            fragments: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
        })
    }

    pub fn bind(&self, client: &Arc<ClientState>) {
        *self.client.lock().unwrap() = Arc::downgrade(client);
    }

    /// Deliver a brute-force abort when the named sync point is reached.
    pub fn bf_abort_at(&self, point: &str) {
        *self.sync_point.lock().unwrap() = Some(point.to_string());
    }

    fn client(&self) -> Arc<ClientState> {
        self.client
            .lock()
            .unwrap()
            .upgrade()
            .expect("mock client service bound to a live client")
    }
}

impl ClientService for MockClientService {
    fn do_2pc(&self) -> bool {
        self.two_pc.load(Ordering::Relaxed)
    }

    fn is_autocommit(&self) -> bool {
        self.autocommit.load(Ordering::Relaxed)
    }

    fn rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        let client = self.client();
        client.before_rollback();
        client.after_rollback();
    }

    fn append_fragment(&self, transaction_id: TransactionId, flags: u32, data: &[u8]) -> i32 {
        self.fragments
            .lock()
            .unwrap()
            .push((transaction_id, flags, data.to_vec()));
        0
    }

    fn remove_fragments(&self) {
        self.remove_fragments_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn will_replay(&self) {
        self.will_replay_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn replay(&self) -> ProviderStatus {
        self.replays.fetch_add(1, Ordering::Relaxed);
        self.client().provider_replay()
    }

    fn wait_for_replayers(&self) {
        if self.bf_abort_during_wait.swap(false, Ordering::Relaxed) {
            self.client().bf_abort(Seqno::new(1));
        }
    }

    fn prepare_data_for_replication(&self) -> i32 {
        if self.error_during_prepare_data.load(Ordering::Relaxed) {
            1
        } else {
            0
        }
    }

    fn prepare_fragment_for_replication(&self, buffer: &mut Vec<u8>) -> i32 {
        if self.error_during_prepare_data.load(Ordering::Relaxed) {
            return 1;
        }
        buffer.push(1);
        0
    }

    fn killed(&self) -> bool {
        self.killed_before_certify.load(Ordering::Relaxed)
    }

    fn abort(&self) {}

    fn store_globals(&self) {
        self.store_globals_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn debug_sync(&self, point: &str) {
        let hit = {
            let armed = self.sync_point.lock().unwrap();
            armed.as_deref() == Some(point)
        };
        if hit {
            self.sync_point.lock().unwrap().take();
            self.client().bf_abort(Seqno::new(1));
        }
    }

    fn debug_suicide(&self, _point: &str) {}

    fn on_error(&self, error: ClientError) {
        *self.last_error.lock().unwrap() = Some(error);
    }
}

// ---------------------------------------------------------------------------
// High-priority service mock
// ---------------------------------------------------------------------------

/// High-priority applier mock counting every callback.
pub struct MockHighPriorityService {
    pub fail_next_applying: AtomicBool,
    pub started: AtomicUsize,
    pub applied: AtomicUsize,
    pub committed: AtomicUsize,
    pub rolled_back: AtomicUsize,
    pub toi_applied: AtomicUsize,
    pub after_applies: AtomicUsize,
}

impl MockHighPriorityService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_next_applying: AtomicBool::new(false),
            started: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            rolled_back: AtomicUsize::new(0),
            toi_applied: AtomicUsize::new(0),
            after_applies: AtomicUsize::new(0),
        })
    }
}

impl HighPriorityService for MockHighPriorityService {
    fn start_transaction(&self, _ws_handle: &WsHandle, _ws_meta: &WsMeta) -> i32 {
        self.started.fetch_add(1, Ordering::Relaxed);
        0
    }

    fn apply_write_set(&self, _ws_meta: &WsMeta, _data: &[u8]) -> i32 {
        if self.fail_next_applying.swap(false, Ordering::Relaxed) {
            return 1;
        }
        self.applied.fetch_add(1, Ordering::Relaxed);
        0
    }

    fn commit(&self, _ws_handle: &WsHandle, _ws_meta: &WsMeta) -> i32 {
        self.committed.fetch_add(1, Ordering::Relaxed);
        0
    }

    fn rollback(&self, _ws_handle: &WsHandle, _ws_meta: &WsMeta) -> i32 {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
        0
    }

    fn apply_toi(&self, _ws_meta: &WsMeta, _data: &[u8]) -> i32 {
        self.toi_applied.fetch_add(1, Ordering::Relaxed);
        0
    }

    fn after_apply(&self) {
        self.after_applies.fetch_add(1, Ordering::Relaxed);
    }

    fn is_replaying(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Server service mock
// ---------------------------------------------------------------------------

/// Server service mock recording applier lifecycle and SST callbacks.
pub struct MockServerService {
    pub sst_before_init: AtomicBool,
    pub created_appliers: Mutex<Vec<Arc<MockHighPriorityService>>>,
    pub released_appliers: AtomicUsize,
    pub sst_starts: Mutex<Vec<(String, Gtid, bool)>>,
    pub fail_start_sst: AtomicBool,
}

impl MockServerService {
    pub fn new(sst_before_init: bool) -> Arc<Self> {
        Arc::new(Self {
            sst_before_init: AtomicBool::new(sst_before_init),
            created_appliers: Mutex::new(Vec::new()),
            released_appliers: AtomicUsize::new(0),
            sst_starts: Mutex::new(Vec::new()),
            fail_start_sst: AtomicBool::new(false),
        })
    }
}

impl ServerService for MockServerService {
    fn streaming_applier_service(&self) -> Arc<dyn HighPriorityService> {
        let service = MockHighPriorityService::new();
        self.created_appliers.lock().unwrap().push(service.clone());
        service
    }

    fn release_high_priority_service(&self, _service: Arc<dyn HighPriorityService>) {
        self.released_appliers.fetch_add(1, Ordering::Relaxed);
    }

    fn sst_before_init(&self) -> bool {
        self.sst_before_init.load(Ordering::Relaxed)
    }

    fn sst_request(&self) -> String {
        "mock-sst-request".to_string()
    }

    fn start_sst(&self, sst_request: &str, gtid: Gtid, bypass: bool) -> i32 {
        self.sst_starts
            .lock()
            .unwrap()
            .push((sst_request.to_string(), gtid, bypass));
        if self.fail_start_sst.load(Ordering::Relaxed) {
            1
        } else {
            0
        }
    }

    fn log_message(&self, _level: &str, _message: &str) {}
}

// ---------------------------------------------------------------------------
// Node and client fixtures
// ---------------------------------------------------------------------------

/// One mock node: server state, its server service and the shared provider.
pub struct TestNode {
    pub server: Arc<ServerState>,
    pub service: Arc<MockServerService>,
    pub provider: MockProvider,
}

/// Build a node with a loaded mock provider.
pub fn mock_node(rollback_mode: RollbackMode, sst_before_init: bool) -> TestNode {
    let id = NodeId::generate();
    let config = ServerConfig::new(
        "node-1",
        id,
        "10.0.0.1:3306",
        "10.0.0.1:4567",
        std::env::temp_dir(),
        Gtid::undefined(),
        1,
        rollback_mode,
    );
    let service = MockServerService::new(sst_before_init);
    let provider = MockProvider::new(id);
    let factory = MockProviderFactory::new(provider.clone());
    let server = ServerState::new(config, service.clone(), Box::new(factory));
    server
        .load_provider("mock://provider", "")
        .expect("mock provider loads");
    TestNode {
        server,
        service,
        provider,
    }
}

/// A primary view containing this node plus `extra` members.
pub fn primary_view(node: &TestNode, seqno: i64, extra: &[NodeId]) -> View {
    let mut members = vec![Member::new(node.server.id(), "node-1", "10.0.0.1:3306")];
    for (i, id) in extra.iter().enumerate() {
        members.push(Member::new(*id, format!("peer-{}", i), "10.0.0.2:3306"));
    }
    View::new(
        Gtid::new(node.provider.history(), Seqno::new(seqno)),
        Seqno::new(1),
        ViewStatus::Primary,
        members,
        Some(0),
        1,
    )
}

/// A non-primary view containing only the given members.
pub fn non_primary_view(node: &TestNode, members: &[NodeId]) -> View {
    let members = members
        .iter()
        .enumerate()
        .map(|(i, id)| Member::new(*id, format!("member-{}", i), "10.0.0.9:3306"))
        .collect();
    View::new(
        Gtid::new(node.provider.history(), Seqno::new(0)),
        Seqno::new(2),
        ViewStatus::NonPrimary,
        members,
        None,
        1,
    )
}

/// Walk an engine-initialized-first node to synced.
pub fn connect_to_synced(node: &TestNode) {
    if !node.server.is_initialized() {
        node.server.initialized();
    }
    node.server
        .connect("mock-cluster", "gcomm://10.0.0.1", "", false)
        .expect("connect succeeds");
    node.server
        .on_connect(Gtid::new(node.provider.history(), Seqno::new(0)));
    node.server.on_view(&primary_view(node, 0, &[]));
    node.server.on_sync();
}

/// Build an opened replicating client on the node.
pub fn replicating_client(
    node: &TestNode,
    id: u64,
) -> (Arc<ClientState>, Arc<MockClientService>) {
    let service = MockClientService::new();
    let client = ClientState::new(
        node.server.clone(),
        service.clone(),
        ClientMode::Replicating,
    );
    service.bind(&client);
    client.open(ClientId::new(id));
    (client, service)
}

/// An ordered whole-transaction write-set meta originating elsewhere.
pub fn remote_ws(
    node: &TestNode,
    origin: NodeId,
    transaction: u64,
    seqno: i64,
    flags: u32,
) -> (WsHandle, WsMeta) {
    let transaction_id = TransactionId::new(transaction);
    let handle = WsHandle::new(transaction_id, seqno as u64);
    let meta = WsMeta::new(
        Gtid::new(node.provider.history(), Seqno::new(seqno)),
        origin,
        ClientId::new(99),
        transaction_id,
        flags,
        Seqno::new(seqno - 1),
    );
    (handle, meta)
}
