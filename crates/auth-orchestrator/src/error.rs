//! Orchestrator error types.

use onboarding_records::RecordsError;
use supabase_gateway::{GatewayError, GatewayErrorKind};
use thiserror::Error;

/// Orchestrator error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Endpoint or key misconfigured; fatal until the configuration changes
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Records(#[from] RecordsError),

    /// Operation needs a signed-in user
    #[error("No user logged in")]
    NotSignedIn,

    /// Still loading when the deadline passed, with no user established
    #[error("Timed out loading your session. Check your connection and try again.")]
    LoadingTimedOut,

    /// Invalid state transition in the session FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// The orchestrator task is gone
    #[error("Auth orchestrator has shut down")]
    ShutDown,
}

impl AuthError {
    /// Gateway-level classification, when the error came from the service.
    pub fn gateway_kind(&self) -> Option<GatewayErrorKind> {
        match self {
            AuthError::Gateway(e) => Some(e.kind()),
            AuthError::Records(e) => Some(e.kind()),
            AuthError::Configuration(_) => Some(GatewayErrorKind::Configuration),
            _ => None,
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Gateway(e) => e.is_transient(),
            AuthError::Records(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Reachability failures, including the loading deadline.
    pub fn is_network_shaped(&self) -> bool {
        self.is_transient() || matches!(self, AuthError::LoadingTimedOut)
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
