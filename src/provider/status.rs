//! Provider call statuses
//!
//! Per CLUSTER_MODEL.md §5:
//! - Every provider entry point reports exactly one status
//! - Statuses are mapped to client errors at the session boundary, never
//!   surfaced raw to the host

use std::fmt;

/// Status reported by a provider entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Call succeeded.
    Success,
    /// Call succeeded with a warning.
    Warning,
    /// Temporary failure; the operation may be retried.
    TransientError,
    /// Connectivity to the cluster was lost during the call.
    ConnectionFailed,
    /// Certification rejected the write set.
    CertificationFailed,
    /// The write set exceeded the configured size limit.
    SizeExceeded,
    /// The operation lost a conflict against a higher-priority operation.
    Conflict,
    /// The provider does not implement the entry point.
    NotImplemented,
    /// The operation is not allowed in the provider's current state.
    NotAllowed,
    /// Unrecoverable provider failure.
    Fatal,
    /// No provider is loaded; the facade refused the call.
    NotLoaded,
    /// Status code the facade does not recognize.
    Unknown,
}

impl ProviderStatus {
    /// True for plain success (warnings are not success).
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// String form used in logs and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::TransientError => "transient_error",
            Self::ConnectionFailed => "connection_failed",
            Self::CertificationFailed => "certification_failed",
            Self::SizeExceeded => "size_exceeded",
            Self::Conflict => "conflict",
            Self::NotImplemented => "not_implemented",
            Self::NotAllowed => "not_allowed",
            Self::Fatal => "fatal",
            Self::NotLoaded => "not_loaded",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
