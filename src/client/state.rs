//! Client session state machine
//!
//! Per CLIENT_SESSION.md §2-§4:
//! - Session states walk none → idle → exec ↔ result → idle → quitting → none
//! - Session modes are fixed at construction or changed only through the
//!   allowed matrix (local is terminal; replicating, high-priority and TOI
//!   rotate among themselves)
//! - Illegal transitions are programming errors and abort the session
//!
//! Every boundary call re-checks the transaction for a pending brute-force
//! abort; a session observing `MustAbort` drives the rollback to `Aborted`
//! before returning control to the host driver layer.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, ThreadId};

use crate::observability::Logger;
use crate::provider::{Provider, ProviderResult};
use crate::server::ServerState;
use crate::service::ClientService;
use crate::transaction::Transaction;
use crate::types::{ClientId, Key, WsMeta};

use super::error::{ClientError, ClientResult};

/// Session mode of a client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// Local-only session; never replicates and never changes mode.
    Local,
    /// Ordinary replicating session.
    Replicating,
    /// Applier session driven by the provider.
    HighPriority,
    /// Session holding a total-order-isolation critical section.
    Toi,
}

impl ClientMode {
    /// String form used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Replicating => "replicating",
            Self::HighPriority => "high_priority",
            Self::Toi => "toi",
        }
    }
}

/// Session state of a client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session exists but has not been opened.
    None,
    /// Between commands.
    Idle,
    /// Executing a command.
    Exec,
    /// Returning a result to the client.
    Result,
    /// Session is shutting down.
    Quitting,
}

impl SessionState {
    /// String form used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Idle => "idle",
            Self::Exec => "exec",
            Self::Result => "result",
            Self::Quitting => "quitting",
        }
    }
}

/// Verdict of `ClientState::after_statement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterStatementResult {
    /// Statement completed.
    Success,
    /// Statement was aborted by a conflict and may be retried as a whole.
    MayRetry,
    /// Statement failed.
    Error,
}

/// Fields of a client state guarded by its mutex.
pub(crate) struct ClientInner {
    pub(crate) id: ClientId,
    pub(crate) owning_thread: Option<ThreadId>,
    pub(crate) mode: ClientMode,
    pub(crate) toi_mode: Option<ClientMode>,
    pub(crate) toi_meta: Option<WsMeta>,
    pub(crate) state: SessionState,
    pub(crate) current_error: ClientError,
    pub(crate) txn: Transaction,
}

impl ClientInner {
    fn session_transition_allowed(from: SessionState, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (from, to),
            (None, Idle) | (Idle, Exec) | (Idle, Quitting) | (Exec, Result) | (Result, Idle)
                | (Quitting, None)
        )
    }

    fn mode_transition_allowed(from: ClientMode, to: ClientMode) -> bool {
        use ClientMode::*;
        matches!(
            (from, to),
            (Replicating, HighPriority)
                | (Replicating, Toi)
                | (HighPriority, Replicating)
                | (HighPriority, Toi)
                | (Toi, Replicating)
                | (Toi, HighPriority)
        )
    }

    fn assert_owner(&self) {
        if let Some(owner) = self.owning_thread {
            if thread::current().id() != owner {
                panic!("client {}: operation from non-owning thread", self.id);
            }
        }
    }

    /// Move the session to `to`. Only the owning thread may do this.
    pub(crate) fn set_session_state(&mut self, to: SessionState) {
        self.assert_owner();
        if Self::session_transition_allowed(self.state, to) {
            self.state = to;
        } else {
            panic!(
                "client {}: unallowed state transition: {} -> {}",
                self.id,
                self.state.as_str(),
                to.as_str()
            );
        }
    }

    /// Change the session mode through the allowed matrix.
    pub(crate) fn set_mode(&mut self, to: ClientMode) {
        if Self::mode_transition_allowed(self.mode, to) {
            self.mode = to;
        } else {
            panic!(
                "client {}: unallowed mode transition: {} -> {}",
                self.id,
                self.mode.as_str(),
                to.as_str()
            );
        }
    }

    /// Replace the pending error. Replacing a pending error with success is
    /// a programming error.
    pub(crate) fn override_error(&mut self, error: ClientError) {
        if !self.current_error.is_success() && error.is_success() {
            panic!(
                "client {}: overriding error {} with success",
                self.id,
                self.current_error.as_str()
            );
        }
        self.current_error = error;
    }

    /// Reset the pending error at a terminal boundary. Bypasses the
    /// override check; only terminal-boundary code may call this.
    pub(crate) fn set_error_unchecked(&mut self, error: ClientError) {
        self.current_error = error;
    }
}

/// Per-connection session perimeter.
///
/// All mutating operations must come from the owning thread, with one
/// exception: `bf_abort` may arrive from any thread.
pub struct ClientState {
    pub(crate) server: Arc<ServerState>,
    pub(crate) client_service: Arc<dyn ClientService>,
    pub(crate) weak_self: Weak<ClientState>,
    pub(crate) inner: Mutex<ClientInner>,
    pub(crate) cond: Condvar,
}

impl ClientState {
    /// Create a session in the given mode.
    ///
    /// A local session keeps mode `Local` forever; sessions that may ever
    /// replicate must be constructed as `Replicating` or `HighPriority`.
    pub fn new(
        server: Arc<ServerState>,
        client_service: Arc<dyn ClientService>,
        mode: ClientMode,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            server,
            client_service,
            weak_self: weak_self.clone(),
            inner: Mutex::new(ClientInner {
                id: ClientId::new(0),
                owning_thread: None,
                mode,
                toi_mode: None,
                toi_meta: None,
                state: SessionState::None,
                current_error: ClientError::Success,
                txn: Transaction::new(),
            }),
            cond: Condvar::new(),
        })
    }

    /// Open the session: none → idle, bind the owning thread.
    pub fn open(&self, id: ClientId) {
        let mut inner = self.inner.lock().unwrap();
        inner.owning_thread = Some(thread::current().id());
        inner.id = id;
        inner.set_session_state(SessionState::Idle);
        self.debug_log_state(&inner, "open");
    }

    /// Close the session. A still-active transaction is rolled back through
    /// the client service.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.debug_log_state(&inner, "close");
        inner.set_session_state(SessionState::Quitting);
        let rollback_needed = inner.txn.active();
        drop(inner);
        if rollback_needed {
            self.client_service.rollback();
        }
    }

    /// Final teardown: quitting → none.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.debug_log_state(&inner, "cleanup");
        inner.set_session_state(SessionState::None);
    }

    /// Command prologue: idle → exec.
    ///
    /// If the transaction was brute-force aborted while the session was
    /// idle, the rollback is driven here and the command fails before it
    /// starts.
    pub fn before_command(&self) -> ClientResult<()> {
        let mut inner = self.inner.lock().unwrap();
        self.debug_log_state(&inner, "before_command: enter");
        assert_eq!(inner.state, SessionState::Idle);

        // Extension point: in synchronous rollback mode a background
        // rollback may still be in flight here. Hosts currently serialize
        // it before returning the session to idle; a timed wait on the
        // session condition belongs here if that changes.

        inner.set_session_state(SessionState::Exec);

        if inner.txn.active() {
            match inner.txn.state() {
                crate::transaction::TransactionState::MustAbort => {
                    assert_eq!(
                        self.server.rollback_mode(),
                        crate::server::RollbackMode::Async
                    );
                    inner.override_error(ClientError::DeadlockError);
                    drop(inner);
                    self.client_service.rollback();
                    self.transaction_after_statement();
                    let inner = self.inner.lock().unwrap();
                    assert!(!inner.txn.active());
                    self.debug_log_state(&inner, "before_command: error");
                    return Err(ClientError::DeadlockError);
                }
                crate::transaction::TransactionState::Aborted => {
                    // Rolled back out-of-band after a brute-force abort;
                    // clean up and surface the deadlock.
                    inner.override_error(ClientError::DeadlockError);
                    drop(inner);
                    self.transaction_after_statement();
                    let inner = self.inner.lock().unwrap();
                    assert!(!inner.txn.active());
                    self.debug_log_state(&inner, "before_command: error");
                    return Err(ClientError::DeadlockError);
                }
                _ => {}
            }
        }
        self.debug_log_state(&inner, "before_command: success");
        Ok(())
    }

    /// Command epilogue before the result is sent: exec → result.
    pub fn after_command_before_result(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.debug_log_state(&inner, "after_command_before_result: enter");
        assert_eq!(inner.state, SessionState::Exec);
        if inner.txn.active()
            && inner.txn.state() == crate::transaction::TransactionState::MustAbort
        {
            inner.override_error(ClientError::DeadlockError);
            drop(inner);
            self.client_service.rollback();
            self.transaction_after_statement();
            inner = self.inner.lock().unwrap();
            assert!(!inner.txn.active());
            assert!(!inner.current_error.is_success());
        }
        inner.set_session_state(SessionState::Result);
        self.debug_log_state(&inner, "after_command_before_result: leave");
    }

    /// Command epilogue after the result was sent: result → idle.
    ///
    /// If no transaction remains active, the pending error is cleared;
    /// this is the terminal boundary of the error lifetime.
    pub fn after_command_after_result(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.debug_log_state(&inner, "after_command_after_result: enter");
        assert_eq!(inner.state, SessionState::Result);
        if inner.txn.active()
            && inner.txn.state() == crate::transaction::TransactionState::MustAbort
        {
            drop(inner);
            self.client_service.rollback();
            inner = self.inner.lock().unwrap();
            assert_eq!(
                inner.txn.state(),
                crate::transaction::TransactionState::Aborted
            );
            inner.override_error(ClientError::DeadlockError);
        } else if !inner.txn.active() {
            inner.set_error_unchecked(ClientError::Success);
        }
        inner.set_session_state(SessionState::Idle);
        self.debug_log_state(&inner, "after_command_after_result: leave");
    }

    /// Statement prologue.
    ///
    /// A pending brute-force abort fails the statement here; the rollback
    /// itself runs in `after_command_before_result`.
    pub fn before_statement(&self) -> ClientResult<()> {
        let inner = self.inner.lock().unwrap();
        self.debug_log_state(&inner, "before_statement: enter");

        // Extension point: a precondition on server synced state (refuse
        // statements on a desynchronized node) belongs here. Hosts that
        // need it check the server state themselves for now.

        if inner.txn.active()
            && inner.txn.state() == crate::transaction::TransactionState::MustAbort
        {
            self.debug_log_state(&inner, "before_statement: error");
            return Err(ClientError::DeadlockError);
        }
        self.debug_log_state(&inner, "before_statement: success");
        Ok(())
    }

    /// Statement epilogue: drives the transaction epilogue (replay,
    /// terminal cleanup, statement-unit streaming) and classifies the
    /// outcome for the host.
    pub fn after_statement(&self) -> AfterStatementResult {
        {
            let inner = self.inner.lock().unwrap();
            self.debug_log_state(&inner, "after_statement: enter");
            assert_eq!(inner.state, SessionState::Exec);
        }
        self.transaction_after_statement();

        let inner = self.inner.lock().unwrap();
        if inner.current_error == ClientError::DeadlockError {
            if inner.mode == ClientMode::Replicating && self.client_service.is_autocommit() {
                self.debug_log_state(&inner, "after_statement: may_retry");
                return AfterStatementResult::MayRetry;
            }
            self.debug_log_state(&inner, "after_statement: error");
            return AfterStatementResult::Error;
        }
        self.debug_log_state(&inner, "after_statement: success");
        AfterStatementResult::Success
    }

    /// Configure streaming replication for this session.
    ///
    /// The fragment unit of an active streaming transaction cannot change.
    pub fn enable_streaming(
        &self,
        unit: crate::transaction::FragmentUnit,
        fragment_size: u64,
    ) -> ClientResult<()> {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.mode, ClientMode::Replicating);
        if inner.txn.active()
            && inner.txn.streaming().is_enabled()
            && inner.txn.streaming().unit() != unit
        {
            let client = inner.id.to_string();
            Logger::error(
                "client_state",
                "STREAMING_UNIT_CHANGE_REJECTED",
                &[("client", client.as_str())],
            );
            return Err(ClientError::NotAllowed);
        }
        inner.txn.streaming_mut().enable(unit, fragment_size);
        Ok(())
    }

    /// Enter total order isolation from a replicating session.
    ///
    /// The provider orders the operation globally; on success the session
    /// mode becomes `Toi` until `leave_toi`.
    pub fn enter_toi(&self, keys: &[Key], buffer: &[u8], flags: u32) -> ClientResult<()> {
        let id = {
            let inner = self.inner.lock().unwrap();
            assert_eq!(inner.state, SessionState::Exec);
            assert_eq!(inner.mode, ClientMode::Replicating);
            inner.id
        };
        let provider = match self.provider() {
            Ok(provider) => provider,
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                inner.override_error(ClientError::ErrorDuringCommit);
                return Err(ClientError::ErrorDuringCommit);
            }
        };
        match provider.enter_toi(id, keys, buffer, flags) {
            Ok(meta) => {
                let mut inner = self.inner.lock().unwrap();
                inner.toi_mode = Some(inner.mode);
                inner.set_mode(ClientMode::Toi);
                inner.toi_meta = Some(meta);
                Ok(())
            }
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                inner.override_error(ClientError::ErrorDuringCommit);
                Err(ClientError::ErrorDuringCommit)
            }
        }
    }

    /// Enter total order isolation on a high-priority session applying a
    /// TOI write set. The provider has already ordered the operation; only
    /// the mode and metadata change.
    pub fn enter_toi_meta(&self, ws_meta: WsMeta) -> ClientResult<()> {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.mode, ClientMode::HighPriority);
        inner.toi_mode = Some(inner.mode);
        inner.set_mode(ClientMode::Toi);
        inner.toi_meta = Some(ws_meta);
        Ok(())
    }

    /// Leave total order isolation and restore the prior mode.
    pub fn leave_toi(&self) -> ClientResult<()> {
        let (id, prior) = {
            let inner = self.inner.lock().unwrap();
            let prior = match inner.toi_mode {
                Some(mode) => mode,
                None => panic!("client {}: leave_toi without enter_toi", inner.id),
            };
            (inner.id, prior)
        };

        let mut result = Ok(());
        if prior == ClientMode::Replicating {
            let status = match self.provider() {
                Ok(provider) => provider.leave_toi(id),
                Err(_) => crate::provider::ProviderStatus::NotLoaded,
            };
            if !status.is_success() {
                let mut inner = self.inner.lock().unwrap();
                inner.override_error(ClientError::ErrorDuringCommit);
                result = Err(ClientError::ErrorDuringCommit);
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.set_mode(prior);
        inner.toi_mode = None;
        inner.toi_meta = None;
        result
    }

    /// Replace the pending error. Replacing a pending error with success is
    /// a programming error and panics.
    pub fn override_error(&self, error: ClientError) {
        let mut inner = self.inner.lock().unwrap();
        inner.assert_owner();
        inner.override_error(error);
    }

    /// Session identity.
    pub fn id(&self) -> ClientId {
        self.inner.lock().unwrap().id
    }

    /// Current session mode.
    pub fn mode(&self) -> ClientMode {
        self.inner.lock().unwrap().mode
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    /// Pending error.
    pub fn current_error(&self) -> ClientError {
        self.inner.lock().unwrap().current_error
    }

    /// Metadata of the TOI operation this session holds, if any.
    pub fn toi_meta(&self) -> Option<WsMeta> {
        self.inner.lock().unwrap().toi_meta.clone()
    }

    /// Owning server state.
    pub fn server(&self) -> &Arc<ServerState> {
        &self.server
    }

    pub(crate) fn provider(&self) -> ProviderResult<Arc<dyn Provider>> {
        self.server.provider()
    }

    pub(crate) fn debug_log_state(&self, inner: &ClientInner, context: &str) {
        if self.server.debug_log_level() < 1 {
            return;
        }
        let client = inner.id.to_string();
        Logger::trace(
            "client_state",
            context,
            &[
                ("client", client.as_str()),
                ("error", inner.current_error.as_str()),
                ("mode", inner.mode.as_str()),
                ("server", self.server.name()),
                ("state", inner.state.as_str()),
            ],
        );
    }
}
