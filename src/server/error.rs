//! Server-level error types
//!
//! Per SERVER_LIFECYCLE.md §7:
//! - Provider loading failures and SST failures are fatal at the server
//!   level
//! - Provider call failures carry the failing operation and its status

use std::fmt;

use crate::provider::{ProviderError, ProviderStatus};

/// Result type for server state operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Server-level error.
#[derive(Debug, Clone)]
pub struct ServerError {
    /// Error kind
    pub kind: ServerErrorKind,
    /// Error message
    pub message: String,
}

/// Server-level error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// No provider is loaded.
    ProviderNotLoaded,

    /// Loading a provider failed.
    ProviderLoadFailed,

    /// A provider call failed.
    ProviderCall,

    /// Starting or completing a state snapshot transfer failed.
    SstFailed,
}

impl ServerError {
    /// Create a new server error.
    pub fn new(kind: ServerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a provider-not-loaded error.
    pub fn provider_not_loaded() -> Self {
        Self::new(ServerErrorKind::ProviderNotLoaded, "provider not loaded")
    }

    /// Create an error for a failed provider call.
    pub fn provider_call(operation: &str, status: ProviderStatus) -> Self {
        Self::new(
            ServerErrorKind::ProviderCall,
            format!("provider {} failed: {}", operation, status),
        )
    }

    /// Create an SST failure error.
    pub fn sst_failed(message: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::SstFailed, message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for ServerError {}

impl From<ProviderError> for ServerError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::NotLoaded => Self::provider_not_loaded(),
            ProviderError::LoadFailed { .. } => {
                Self::new(ServerErrorKind::ProviderLoadFailed, e.to_string())
            }
        }
    }
}
