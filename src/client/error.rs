//! Client error codes
//!
//! Per CLIENT_SESSION.md §7:
//! - Exactly one error is pending per session at a time
//! - Success never overwrites a pending error
//! - Provider statuses are mapped to these codes at the session boundary

use std::fmt;

use crate::provider::ProviderStatus;

/// Result type for client session operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Error codes surfaced to the host DBMS from a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    /// No error pending.
    Success,
    /// Operation succeeded with a warning.
    Warning,
    /// Failure while committing through the provider.
    ErrorDuringCommit,
    /// The transaction lost a conflict and was aborted; retriable for
    /// autocommit statements in replicating mode.
    DeadlockError,
    /// The session was interrupted (killed) by the DBMS.
    InterruptedError,
    /// The write set exceeded the provider size limit.
    SizeExceededError,
    /// Storing a streaming fragment in the host failed.
    AppendFragmentError,
    /// The operation is not supported in the session's mode.
    NotSupportedError,
    /// The operation is not allowed in the session's current state.
    NotAllowed,
}

impl ClientError {
    /// True if no error is pending.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// String form used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::ErrorDuringCommit => "error_during_commit",
            Self::DeadlockError => "deadlock_error",
            Self::InterruptedError => "interrupted_error",
            Self::SizeExceededError => "size_exceeded_error",
            Self::AppendFragmentError => "append_fragment_error",
            Self::NotSupportedError => "not_supported_error",
            Self::NotAllowed => "not_allowed",
        }
    }

    /// Map a failed provider status to the client error surfaced for it.
    ///
    /// Certification failures and conflicts surface as deadlocks so the host
    /// treats them like any other aborted-by-conflict transaction.
    pub fn from_provider_status(status: ProviderStatus) -> Self {
        match status {
            ProviderStatus::Success => Self::Success,
            ProviderStatus::Warning => Self::Warning,
            ProviderStatus::CertificationFailed | ProviderStatus::Conflict => Self::DeadlockError,
            ProviderStatus::SizeExceeded => Self::SizeExceededError,
            ProviderStatus::NotImplemented => Self::NotSupportedError,
            ProviderStatus::NotAllowed => Self::NotAllowed,
            ProviderStatus::TransientError
            | ProviderStatus::ConnectionFailed
            | ProviderStatus::Fatal
            | ProviderStatus::NotLoaded
            | ProviderStatus::Unknown => Self::ErrorDuringCommit,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
