//! Transaction state machine
//!
//! Per TRANSACTION_MODEL.md §2-§5:
//! - A transaction walks executing → (preparing) → certifying → committing →
//!   ordered_commit → committed on the happy path
//! - Certification failures end in cert_failed → aborting → aborted
//! - A brute-force abort marks the victim must_abort; the owning session
//!   drives it to aborted, or to must_replay → replaying when the write set
//!   was already ordered
//! - Illegal transitions are programming errors and abort the session
//!
//! The state machine data lives inside the owning client's mutex. The
//! orchestration methods below release that mutex across every provider and
//! host callback and re-check the state on every re-entry, because a
//! brute-force abort may land exactly there.

mod streaming;

pub use streaming::{FragmentUnit, StreamingContext};

use crate::client::{ClientError, ClientMode, ClientResult, ClientState, SessionState};
use crate::provider::ProviderStatus;
use crate::sync_point::points;
use crate::types::{ws_flags, Seqno, TransactionId, WsHandle, WsMeta};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Local statements run, data is appended.
    Executing,
    /// Commit entered; write-set data is being prepared.
    Preparing,
    /// Provider certification in flight.
    Certifying,
    /// Certified; waiting to enter commit order.
    Committing,
    /// Commit order entered; the host commit may proceed.
    OrderedCommit,
    /// Terminal success.
    Committed,
    /// Certification rejected the write set.
    CertFailed,
    /// Brute-force aborted; no further work may succeed.
    MustAbort,
    /// Rollback running.
    Aborting,
    /// Terminal failure.
    Aborted,
    /// The ordered write set must be replayed by this session.
    MustReplay,
    /// Replay call to the provider in flight.
    Replaying,
}

impl TransactionState {
    /// String form used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executing => "executing",
            Self::Preparing => "preparing",
            Self::Certifying => "certifying",
            Self::Committing => "committing",
            Self::OrderedCommit => "ordered_commit",
            Self::Committed => "committed",
            Self::CertFailed => "cert_failed",
            Self::MustAbort => "must_abort",
            Self::Aborting => "aborting",
            Self::Aborted => "aborted",
            Self::MustReplay => "must_replay",
            Self::Replaying => "replaying",
        }
    }
}

fn transition_allowed(from: TransactionState, to: TransactionState) -> bool {
    use TransactionState::*;
    matches!(
        (from, to),
        (Executing, Preparing)
            | (Executing, Certifying)
            | (Executing, MustAbort)
            | (Executing, Aborting)
            | (Preparing, Certifying)
            | (Preparing, MustAbort)
            | (Preparing, Aborting)
            | (Certifying, Committing)
            | (Certifying, Executing)
            | (Certifying, CertFailed)
            | (Certifying, MustAbort)
            | (Certifying, Aborting)
            | (Committing, OrderedCommit)
            | (Committing, MustAbort)
            | (Committing, Aborting)
            | (OrderedCommit, Committed)
            | (CertFailed, Aborting)
            | (CertFailed, MustAbort)
            | (MustAbort, Aborting)
            | (MustAbort, MustReplay)
            | (Aborting, Aborted)
            | (MustReplay, Replaying)
            | (Replaying, Committed)
            | (Replaying, Aborted)
    )
}

/// Per-connection write-set lifecycle.
///
/// The transaction stays attached to its client across statements; it is
/// *active* from `start` until the statement epilogue cleans up a terminal
/// state. The last terminal state remains readable after cleanup, until the
/// next `start`.
pub struct Transaction {
    id: Option<TransactionId>,
    state: TransactionState,
    ws_handle: Option<WsHandle>,
    ws_meta: WsMeta,
    flags: u32,
    data: Vec<u8>,
    certified: bool,
    released: bool,
    streaming: StreamingContext,
    replays: usize,
}

impl Transaction {
    /// Create an idle transaction slot.
    pub fn new() -> Self {
        Self {
            id: None,
            state: TransactionState::Executing,
            ws_handle: None,
            ws_meta: WsMeta::undefined(),
            flags: 0,
            data: Vec::new(),
            certified: false,
            released: false,
            streaming: StreamingContext::new(),
            replays: 0,
        }
    }

    /// True from `start` until the statement epilogue cleans up.
    pub fn active(&self) -> bool {
        self.id.is_some()
    }

    /// Current state. After cleanup this is the last terminal state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Transaction identity, while active.
    pub fn id(&self) -> Option<TransactionId> {
        self.id
    }

    /// Provider write-set handle, while active.
    pub fn ws_handle(&self) -> Option<WsHandle> {
        self.ws_handle
    }

    /// Write-set metadata; carries the assigned position once ordered.
    pub fn ws_meta(&self) -> &WsMeta {
        &self.ws_meta
    }

    /// Seqno assigned by the provider, undefined until ordered.
    pub fn seqno(&self) -> Seqno {
        self.ws_meta.seqno()
    }

    /// Write-set flags accumulated so far.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// True once the final write set passed certification.
    pub fn certified(&self) -> bool {
        self.certified
    }

    /// Number of replays performed on this slot.
    pub fn replays(&self) -> usize {
        self.replays
    }

    /// Streaming fragment accounting.
    pub fn streaming(&self) -> &StreamingContext {
        &self.streaming
    }

    /// Mutable streaming fragment accounting.
    pub fn streaming_mut(&mut self) -> &mut StreamingContext {
        &mut self.streaming
    }

    /// Bytes appended for replication so far.
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Mark the write set unsafe for parallel apply.
    pub fn mark_pa_unsafe(&mut self) {
        self.flags |= ws_flags::PA_UNSAFE;
    }

    /// True if the write set was marked unsafe for parallel apply.
    pub fn pa_unsafe(&self) -> bool {
        self.flags & ws_flags::PA_UNSAFE != 0
    }

    pub(crate) fn start(
        &mut self,
        id: TransactionId,
        server_id: crate::types::NodeId,
        client_id: crate::types::ClientId,
    ) {
        assert!(self.id.is_none(), "transaction {:?} still active", self.id);
        self.id = Some(id);
        self.state = TransactionState::Executing;
        self.ws_handle = Some(WsHandle::new(id, 0));
        self.ws_meta = WsMeta::new(
            crate::types::Gtid::undefined(),
            server_id,
            client_id,
            id,
            ws_flags::START_TRANSACTION,
            Seqno::undefined(),
        );
        self.flags = ws_flags::START_TRANSACTION;
        self.data.clear();
        self.certified = false;
        self.released = false;
        self.replays = 0;
    }

    pub(crate) fn transition(&mut self, to: TransactionState) {
        if transition_allowed(self.state, to) {
            self.state = to;
        } else {
            panic!(
                "transaction {:?}: unallowed state transition: {} -> {}",
                self.id,
                self.state.as_str(),
                to.as_str()
            );
        }
    }

    pub(crate) fn push_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Drain the buffered payload for handoff to the provider.
    pub(crate) fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub(crate) fn set_certified(&mut self, meta: WsMeta) {
        self.ws_meta = meta;
        self.certified = true;
    }

    pub(crate) fn record_fragment(&mut self, meta: WsMeta) {
        let seqno = meta.seqno();
        self.ws_meta = meta;
        self.streaming.add_fragment(seqno);
        // the first fragment consumed the start flag
        self.flags &= !ws_flags::START_TRANSACTION;
    }

    pub(crate) fn mark_released(&mut self) {
        self.released = true;
    }

    pub(crate) fn released(&self) -> bool {
        self.released
    }

    pub(crate) fn add_replay(&mut self) {
        self.replays += 1;
    }

    /// Detach from the terminal transaction: the slot becomes inactive but
    /// keeps the terminal state readable until the next `start`.
    pub(crate) fn cleanup(&mut self) {
        self.id = None;
        self.ws_handle = None;
        self.ws_meta = WsMeta::undefined();
        self.flags = 0;
        self.data.clear();
        self.certified = false;
        self.streaming.cleanup();
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientState {
    /// Begin a replicated transaction on this session.
    pub fn start_transaction(&self, id: TransactionId) -> ClientResult<()> {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.state, SessionState::Exec);
        assert!(matches!(
            inner.mode,
            ClientMode::Replicating | ClientMode::HighPriority
        ));
        let server_id = self.server.id();
        let client_id = inner.id;
        inner.txn.start(id, server_id, client_id);
        Ok(())
    }

    /// Append write-set payload. May cut a streaming fragment when the
    /// byte threshold trips.
    pub fn append_data(&self, data: &[u8]) -> ClientResult<()> {
        let fragment_due = {
            let mut inner = self.inner.lock().unwrap();
            assert!(inner.txn.active());
            assert_eq!(inner.txn.state(), TransactionState::Executing);
            inner.txn.push_data(data);
            if inner.mode == ClientMode::Replicating
                && inner.txn.streaming().is_enabled()
                && inner.txn.streaming().unit() == FragmentUnit::Bytes
            {
                inner.txn.streaming_mut().add_units(data.len() as u64);
                inner.txn.streaming().fragment_due()
            } else {
                false
            }
        };
        if fragment_due {
            self.certify_fragment()?;
        }
        Ok(())
    }

    /// Append a certification key to the write set.
    pub fn append_key(&self, key: &crate::types::Key) -> ClientResult<()> {
        let handle = {
            let inner = self.inner.lock().unwrap();
            assert!(inner.txn.active());
            assert_eq!(inner.txn.state(), TransactionState::Executing);
            inner
                .txn
                .ws_handle()
                .expect("active transaction has a write-set handle")
        };
        let provider = self.provider().map_err(|_| ClientError::ErrorDuringCommit)?;
        if provider.append_key(&handle, key).is_success() {
            Ok(())
        } else {
            Err(ClientError::ErrorDuringCommit)
        }
    }

    /// Row epilogue. May cut a streaming fragment when the row threshold
    /// trips.
    pub fn after_row(&self) -> ClientResult<()> {
        let fragment_due = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.txn.active() || inner.txn.state() != TransactionState::Executing {
                return Ok(());
            }
            if inner.mode == ClientMode::Replicating
                && inner.txn.streaming().is_enabled()
                && inner.txn.streaming().unit() == FragmentUnit::Rows
            {
                inner.txn.streaming_mut().add_units(1);
                inner.txn.streaming().fragment_due()
            } else {
                false
            }
        };
        if fragment_due {
            self.certify_fragment()?;
        }
        Ok(())
    }

    /// Commit prologue for two-phase hosts: prepare the write-set data.
    pub fn before_prepare(&self) -> ClientResult<()> {
        let mode = {
            let mut inner = self.inner.lock().unwrap();
            self.debug_log_state(&inner, "before_prepare: enter");
            assert_eq!(inner.state, SessionState::Exec);
            if inner.txn.state() == TransactionState::MustAbort {
                inner.override_error(ClientError::DeadlockError);
                return Err(ClientError::DeadlockError);
            }
            inner.txn.transition(TransactionState::Preparing);
            inner.mode
        };

        if mode == ClientMode::Replicating {
            let rc = self.client_service.prepare_data_for_replication();
            let mut inner = self.inner.lock().unwrap();
            if inner.txn.state() == TransactionState::MustAbort {
                inner.override_error(ClientError::DeadlockError);
                return Err(ClientError::DeadlockError);
            }
            if rc != 0 {
                inner.override_error(ClientError::ErrorDuringCommit);
                inner.txn.transition(TransactionState::MustAbort);
                return Err(ClientError::ErrorDuringCommit);
            }
        }
        Ok(())
    }

    /// Commit step for two-phase hosts: certify the prepared write set.
    pub fn after_prepare(&self) -> ClientResult<()> {
        {
            let inner = self.inner.lock().unwrap();
            self.debug_log_state(&inner, "after_prepare: enter");
            assert_eq!(inner.state, SessionState::Exec);
        }
        self.certify_commit()
    }

    /// Commit entry point.
    ///
    /// One-phase hosts call this from `Executing`; two-phase hosts arrive
    /// here already certified after `before_prepare`/`after_prepare`. On
    /// success the transaction holds its commit order slot and the host may
    /// write its commit record.
    pub fn before_commit(&self) -> ClientResult<()> {
        let entry_state = {
            let inner = self.inner.lock().unwrap();
            self.debug_log_state(&inner, "before_commit: enter");
            assert!(inner.txn.active());
            inner.txn.state()
        };

        match entry_state {
            TransactionState::Executing => {
                // two-phase hosts must come through before_prepare/after_prepare
                assert!(!self.client_service.do_2pc());
                self.before_prepare()?;
                self.after_prepare()?;
            }
            TransactionState::Preparing => {
                self.after_prepare()?;
            }
            TransactionState::Committing => {}
            TransactionState::MustAbort => {
                return self.must_abort_at_commit();
            }
            other => panic!("before_commit in state {}", other.as_str()),
        }

        // Certified; take the commit order slot.
        self.client_service.debug_sync(points::BEFORE_COMMIT_ORDER_ENTER);
        let provider = match self.provider() {
            Ok(provider) => provider,
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                inner.override_error(ClientError::ErrorDuringCommit);
                inner.txn.transition(TransactionState::Aborting);
                return Err(ClientError::ErrorDuringCommit);
            }
        };
        let (handle, meta) = {
            let inner = self.inner.lock().unwrap();
            (
                inner
                    .txn
                    .ws_handle()
                    .expect("certified transaction has a write-set handle"),
                inner.txn.ws_meta().clone(),
            )
        };
        let status = provider.commit_order_enter(&handle, &meta);

        let mut inner = self.inner.lock().unwrap();
        if inner.txn.state() == TransactionState::MustAbort {
            // The brute-force abort won the race into commit order.
            drop(inner);
            return self.must_abort_at_commit();
        }
        match status {
            ProviderStatus::Success => {
                inner.txn.transition(TransactionState::OrderedCommit);
                Ok(())
            }
            ProviderStatus::Conflict => {
                // Aborted at the order gate after certification: replay.
                inner.txn.transition(TransactionState::MustAbort);
                drop(inner);
                self.must_abort_at_commit()
            }
            other => {
                inner.override_error(ClientError::from_provider_status(other));
                inner.txn.transition(TransactionState::Aborting);
                Err(ClientError::from_provider_status(other))
            }
        }
    }

    /// Commit order epilogue: the host has written its commit record.
    pub fn ordered_commit(&self) -> ClientResult<()> {
        let (handle, meta) = {
            let inner = self.inner.lock().unwrap();
            assert_eq!(inner.txn.state(), TransactionState::OrderedCommit);
            (
                inner
                    .txn
                    .ws_handle()
                    .expect("ordered transaction has a write-set handle"),
                inner.txn.ws_meta().clone(),
            )
        };
        let provider = self.provider().map_err(|_| ClientError::ErrorDuringCommit)?;
        let status = provider.commit_order_leave(&handle, &meta);
        if !status.is_success() {
            let mut inner = self.inner.lock().unwrap();
            inner.override_error(ClientError::from_provider_status(status));
            return Err(ClientError::from_provider_status(status));
        }
        self.server.set_last_committed_gtid(meta.gtid());
        Ok(())
    }

    /// Commit epilogue: release the write set; the transaction is
    /// committed.
    pub fn after_commit(&self) -> ClientResult<()> {
        let (handle, was_streaming, client_id) = {
            let inner = self.inner.lock().unwrap();
            assert_eq!(inner.txn.state(), TransactionState::OrderedCommit);
            (
                inner
                    .txn
                    .ws_handle()
                    .expect("ordered transaction has a write-set handle"),
                inner.txn.streaming().is_streaming(),
                inner.id,
            )
        };
        if was_streaming {
            self.server.stop_streaming_client(client_id);
        }
        let provider = self.provider().map_err(|_| ClientError::ErrorDuringCommit)?;
        let _ = provider.release(&handle);

        let mut inner = self.inner.lock().unwrap();
        inner.txn.mark_released();
        inner.txn.transition(TransactionState::Committed);
        self.debug_log_state(&inner, "after_commit: leave");
        Ok(())
    }

    /// Rollback prologue. Streaming transactions tear down their
    /// replicated fragments here.
    pub fn before_rollback(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.debug_log_state(&inner, "before_rollback: enter");
        match inner.txn.state() {
            TransactionState::Executing
            | TransactionState::Preparing
            | TransactionState::CertFailed
            | TransactionState::MustAbort => inner.txn.transition(TransactionState::Aborting),
            // rolled back out-of-band already, nothing left to do
            TransactionState::Aborting | TransactionState::Aborted => {}
            other => panic!("before_rollback in state {}", other.as_str()),
        }

        if inner.txn.streaming().is_streaming() && !inner.txn.streaming().rollback_replicated() {
            inner.txn.streaming_mut().set_rollback_replicated();
            let client_id = inner.id;
            let handle = inner.txn.ws_handle();
            drop(inner);
            self.client_service.remove_fragments();
            self.server.stop_streaming_client(client_id);
            // Tell the cluster the streaming transaction is gone.
            if let (Ok(provider), Some(handle)) = (self.provider(), handle) {
                let _ = provider.certify(client_id, &handle, ws_flags::ROLLBACK);
            }
        }
    }

    /// Rollback epilogue.
    pub fn after_rollback(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.txn.state() {
            TransactionState::Aborting => inner.txn.transition(TransactionState::Aborted),
            TransactionState::Aborted => {}
            other => panic!("after_rollback in state {}", other.as_str()),
        }
        self.debug_log_state(&inner, "after_rollback: leave");
    }

    /// Brute-force abort this session's transaction.
    ///
    /// Callable from any thread. Returns true if the abort was delivered.
    /// No-ops once the victim holds its commit order slot, and when the
    /// victim's write set is ordered before `bf_seqno`.
    pub fn bf_abort(&self, bf_seqno: Seqno) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.txn.active() {
            return false;
        }
        match inner.txn.state() {
            TransactionState::Executing
            | TransactionState::Preparing
            | TransactionState::Certifying
            | TransactionState::Committing => {
                let victim_seqno = inner.txn.seqno();
                if victim_seqno.is_defined() && victim_seqno < bf_seqno {
                    // Victim is ordered before the aborter; it wins.
                    return false;
                }
                inner.txn.transition(TransactionState::MustAbort);
                match self.server.rollback_mode() {
                    crate::server::RollbackMode::Async => {
                        self.cond.notify_all();
                        drop(inner);
                    }
                    crate::server::RollbackMode::Sync => {
                        drop(inner);
                        self.client_service.store_globals();
                        self.client_service.rollback();
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// Statement epilogue of the transaction: statement-unit streaming,
    /// replay, pending rollback, terminal cleanup.
    pub(crate) fn transaction_after_statement(&self) {
        let fragment_due = {
            let mut inner = self.inner.lock().unwrap();
            if inner.txn.active()
                && inner.txn.state() == TransactionState::Executing
                && inner.mode == ClientMode::Replicating
                && inner.txn.streaming().is_enabled()
                && inner.txn.streaming().unit() == FragmentUnit::Statements
            {
                inner.txn.streaming_mut().add_units(1);
                inner.txn.streaming().fragment_due()
            } else {
                false
            }
        };
        if fragment_due {
            let _ = self.certify_fragment();
        }

        let must_replay = {
            let inner = self.inner.lock().unwrap();
            inner.txn.active() && inner.txn.state() == TransactionState::MustReplay
        };
        if must_replay {
            self.replay_transaction();
        }

        let needs_rollback = {
            let mut inner = self.inner.lock().unwrap();
            let pending = inner.txn.active()
                && matches!(
                    inner.txn.state(),
                    TransactionState::MustAbort
                        | TransactionState::CertFailed
                        | TransactionState::Aborting
                );
            if pending && inner.current_error.is_success() {
                // a brute-force abort with no error surfaced yet
                inner.override_error(ClientError::DeadlockError);
            }
            pending
        };
        if needs_rollback {
            self.client_service.rollback();
        }

        let (cleanup, release_handle) = {
            let inner = self.inner.lock().unwrap();
            let terminal = matches!(
                inner.txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            );
            let release = if terminal && inner.txn.certified() && !inner.txn.released() {
                inner.txn.ws_handle()
            } else {
                None
            };
            (inner.txn.active() && terminal, release)
        };
        if let (Some(handle), Ok(provider)) = (release_handle, self.provider()) {
            let _ = provider.release(&handle);
        }
        if cleanup {
            let mut inner = self.inner.lock().unwrap();
            inner.txn.cleanup();
            self.debug_log_state(&inner, "after_statement: cleanup");
        }
    }

    /// Replay the ordered write set through the client service.
    fn replay_transaction(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            self.debug_log_state(&inner, "replay: enter");
            inner.txn.transition(TransactionState::Replaying);
        }
        self.client_service.debug_sync(points::BEFORE_REPLAY);
        let status = self.client_service.replay();

        let mut inner = self.inner.lock().unwrap();
        inner.txn.add_replay();
        if status.is_success() {
            inner.txn.transition(TransactionState::Committed);
            // The replayed commit supersedes the conflict error.
            inner.set_error_unchecked(ClientError::Success);
            self.debug_log_state(&inner, "replay: committed");
        } else {
            inner.txn.transition(TransactionState::Aborted);
            inner.override_error(ClientError::DeadlockError);
            self.debug_log_state(&inner, "replay: aborted");
        }
    }

    /// Provider replay call for `ClientService::replay` implementations.
    pub fn provider_replay(&self) -> ProviderStatus {
        let (handle, client_id) = {
            let inner = self.inner.lock().unwrap();
            match inner.txn.ws_handle() {
                Some(handle) => (handle, inner.id),
                None => return ProviderStatus::Unknown,
            }
        };
        match self.provider() {
            Ok(provider) => provider.replay(&handle, client_id),
            Err(_) => ProviderStatus::NotLoaded,
        }
    }

    /// Certify the prepared write set and move to `Committing`.
    fn certify_commit(&self) -> ClientResult<()> {
        let provider = match self.provider() {
            Ok(provider) => provider,
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                inner.override_error(ClientError::ErrorDuringCommit);
                inner.txn.transition(TransactionState::MustAbort);
                return Err(ClientError::ErrorDuringCommit);
            }
        };

        self.client_service.debug_sync(points::BEFORE_REPLAYER_WAIT);
        self.client_service.wait_for_replayers();

        if self.client_service.killed() {
            let mut inner = self.inner.lock().unwrap();
            inner.override_error(ClientError::InterruptedError);
            inner.txn.transition(TransactionState::MustAbort);
            return Err(ClientError::InterruptedError);
        }

        self.client_service.debug_sync(points::BEFORE_CERTIFICATION);
        let (client_id, handle, flags, data) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.txn.state() == TransactionState::MustAbort {
                inner.override_error(ClientError::DeadlockError);
                return Err(ClientError::DeadlockError);
            }
            inner.txn.transition(TransactionState::Certifying);
            let handle = inner
                .txn
                .ws_handle()
                .expect("certifying transaction has a write-set handle");
            let flags = inner.txn.flags() | ws_flags::COMMIT;
            (inner.id, handle, flags, inner.txn.take_data())
        };

        if !data.is_empty() {
            let status = provider.append_data(&handle, &data);
            if !status.is_success() {
                let mut inner = self.inner.lock().unwrap();
                let error = ClientError::from_provider_status(status);
                inner.override_error(error);
                inner.txn.transition(TransactionState::Aborting);
                return Err(error);
            }
        }

        let outcome = provider.certify(client_id, &handle, flags);
        self.client_service.debug_sync(points::AFTER_CERTIFICATION);

        let mut inner = self.inner.lock().unwrap();
        match outcome {
            Ok(meta) => {
                inner.txn.set_certified(meta);
                if inner.txn.state() == TransactionState::MustAbort {
                    // Position assigned, then brute-force aborted: replay.
                    inner.override_error(ClientError::DeadlockError);
                    inner.txn.transition(TransactionState::MustReplay);
                    drop(inner);
                    self.client_service.will_replay();
                    return Err(ClientError::DeadlockError);
                }
                inner.txn.transition(TransactionState::Committing);
                Ok(())
            }
            Err(status) => {
                if inner.txn.state() == TransactionState::MustAbort {
                    inner.override_error(ClientError::DeadlockError);
                    return Err(ClientError::DeadlockError);
                }
                match status {
                    ProviderStatus::CertificationFailed | ProviderStatus::Conflict => {
                        inner.override_error(ClientError::DeadlockError);
                        inner.txn.transition(TransactionState::CertFailed);
                        Err(ClientError::DeadlockError)
                    }
                    other => {
                        let error = ClientError::from_provider_status(other);
                        inner.override_error(error);
                        inner.txn.transition(TransactionState::Aborting);
                        Err(error)
                    }
                }
            }
        }
    }

    /// Handle a pending brute-force abort discovered on the commit path.
    fn must_abort_at_commit(&self) -> ClientResult<()> {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.txn.state(), TransactionState::MustAbort);
        inner.override_error(ClientError::DeadlockError);
        if inner.txn.certified() {
            inner.txn.transition(TransactionState::MustReplay);
            drop(inner);
            self.client_service.will_replay();
        }
        Err(ClientError::DeadlockError)
    }

    /// Certify one streaming fragment.
    fn certify_fragment(&self) -> ClientResult<()> {
        let provider = match self.provider() {
            Ok(provider) => provider,
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                inner.override_error(ClientError::ErrorDuringCommit);
                inner.txn.transition(TransactionState::MustAbort);
                return Err(ClientError::ErrorDuringCommit);
            }
        };

        let (client_id, handle, flags, first) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.txn.state() == TransactionState::MustAbort {
                inner.override_error(ClientError::DeadlockError);
                return Err(ClientError::DeadlockError);
            }
            inner.txn.transition(TransactionState::Certifying);
            let first = !inner.txn.streaming().is_streaming();
            let flags = if first { ws_flags::START_TRANSACTION } else { 0 };
            (
                inner.id,
                inner
                    .txn
                    .ws_handle()
                    .expect("streaming transaction has a write-set handle"),
                flags,
                first,
            )
        };

        let mut buffer = Vec::new();
        if self.client_service.prepare_fragment_for_replication(&mut buffer) != 0 {
            let mut inner = self.inner.lock().unwrap();
            inner.override_error(ClientError::AppendFragmentError);
            if inner.txn.state() == TransactionState::Certifying {
                inner.txn.transition(TransactionState::MustAbort);
            }
            return Err(ClientError::AppendFragmentError);
        }

        let outcome = provider.certify(client_id, &handle, flags);
        self.client_service.debug_sync(points::AFTER_FRAGMENT_CERTIFY);

        match outcome {
            Ok(meta) => {
                if first {
                    if let Some(client) = self.weak_self.upgrade() {
                        self.server.start_streaming_client(&client);
                    }
                }
                let rc = self
                    .client_service
                    .append_fragment(handle.transaction_id(), flags, &buffer);
                let mut inner = self.inner.lock().unwrap();
                inner.txn.record_fragment(meta);
                if rc != 0 {
                    inner.override_error(ClientError::AppendFragmentError);
                    if inner.txn.state() == TransactionState::Certifying {
                        inner.txn.transition(TransactionState::MustAbort);
                    }
                    return Err(ClientError::AppendFragmentError);
                }
                if inner.txn.state() == TransactionState::MustAbort {
                    inner.override_error(ClientError::DeadlockError);
                    return Err(ClientError::DeadlockError);
                }
                inner.txn.transition(TransactionState::Executing);
                Ok(())
            }
            Err(status) => {
                let error = ClientError::from_provider_status(status);
                let mut inner = self.inner.lock().unwrap();
                inner.override_error(error);
                if inner.txn.state() == TransactionState::Certifying {
                    inner.txn.transition(TransactionState::MustAbort);
                }
                Err(error)
            }
        }
    }

    /// Mark the current write set unsafe for parallel apply.
    pub fn mark_pa_unsafe(&self) {
        let mut inner = self.inner.lock().unwrap();
        assert!(inner.txn.active());
        inner.txn.mark_pa_unsafe();
    }

    /// True if the current write set was marked unsafe for parallel apply.
    pub fn transaction_pa_unsafe(&self) -> bool {
        self.inner.lock().unwrap().txn.pa_unsafe()
    }

    /// Current transaction state.
    pub fn transaction_state(&self) -> TransactionState {
        self.inner.lock().unwrap().txn.state()
    }

    /// True while a transaction is attached to this session.
    pub fn transaction_active(&self) -> bool {
        self.inner.lock().unwrap().txn.active()
    }

    /// Identity of the attached transaction.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.inner.lock().unwrap().txn.id()
    }

    /// Seqnos of streaming fragments replicated by the attached
    /// transaction.
    pub fn fragments_replicated(&self) -> Vec<Seqno> {
        self.inner.lock().unwrap().txn.streaming().fragments().to_vec()
    }

    /// Replays performed on the attached transaction slot.
    pub fn replay_count(&self) -> usize {
        self.inner.lock().unwrap().txn.replays()
    }
}
