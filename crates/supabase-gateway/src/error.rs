//! Gateway error types.
//!
//! Every failure coming out of the hosted service is mapped onto a variant
//! here, and every variant onto a [`GatewayErrorKind`]. Callers classify
//! errors by kind, never by message text.

use thiserror::Error;

/// Coarse classification used by retry and UI policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Network down, timeout, connection reset, 5xx. Retryable.
    Reachability,
    /// Endpoint or key misconfigured. Fatal.
    Configuration,
    /// Row-level security rejected the operation.
    Authorization,
    /// Bad credentials or no session.
    Authentication,
    /// The service understood and refused the request.
    Request,
    /// Response or local session data could not be handled.
    Internal,
}

/// Gateway error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection refused/reset, DNS failure, offline
    #[error("Network unavailable: {0}")]
    Network(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// 5xx or 429 from the service
    #[error("Service unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    /// Endpoint/key misconfigured (e.g. placeholder project URL)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Row-level security denied the operation
    #[error("Access denied by row-level security on {table} ({operation})")]
    PolicyDenied { table: String, operation: String },

    /// Email/password (or refresh token) rejected
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Operation needs a signed-in user
    #[error("Not signed in")]
    NotAuthenticated,

    /// Unique constraint violated
    #[error("Duplicate row in {table}")]
    Conflict { table: String },

    /// Table or resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success response
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Local session cache could not be read or written
    #[error("Session storage error: {0}")]
    Storage(String),
}

impl GatewayError {
    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            GatewayError::Network(_) | GatewayError::Timeout | GatewayError::Unavailable { .. } => {
                GatewayErrorKind::Reachability
            }
            GatewayError::Configuration(_) => GatewayErrorKind::Configuration,
            GatewayError::PolicyDenied { .. } => GatewayErrorKind::Authorization,
            GatewayError::InvalidCredentials(_) | GatewayError::NotAuthenticated => {
                GatewayErrorKind::Authentication
            }
            GatewayError::Conflict { .. }
            | GatewayError::NotFound(_)
            | GatewayError::Rejected { .. } => GatewayErrorKind::Request,
            GatewayError::Decode(_) | GatewayError::Storage(_) => GatewayErrorKind::Internal,
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        self.kind() == GatewayErrorKind::Reachability
    }

    pub fn is_policy_denied(&self) -> bool {
        self.kind() == GatewayErrorKind::Authorization
    }

    pub fn policy_denied(table: &str, operation: &str) -> Self {
        GatewayError::PolicyDenied {
            table: table.to_string(),
            operation: operation.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

/// Result type alias using GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachability_errors_are_transient() {
        assert!(GatewayError::Network("connection reset".into()).is_transient());
        assert!(GatewayError::Timeout.is_transient());
        assert!(GatewayError::Unavailable { status: 503 }.is_transient());
    }

    #[test]
    fn test_other_errors_are_not_transient() {
        assert!(!GatewayError::Configuration("placeholder".into()).is_transient());
        assert!(!GatewayError::policy_denied("profiles", "select").is_transient());
        assert!(!GatewayError::InvalidCredentials("bad".into()).is_transient());
        assert!(!GatewayError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            GatewayError::policy_denied("profiles", "insert").kind(),
            GatewayErrorKind::Authorization
        );
        assert_eq!(
            GatewayError::NotAuthenticated.kind(),
            GatewayErrorKind::Authentication
        );
        assert_eq!(
            GatewayError::Conflict {
                table: "profiles".into()
            }
            .kind(),
            GatewayErrorKind::Request
        );
        assert_eq!(
            GatewayError::Storage("disk".into()).kind(),
            GatewayErrorKind::Internal
        );
    }

    #[test]
    fn test_policy_denied_message_names_table() {
        let err = GatewayError::policy_denied("otp_verifications", "update");
        assert!(err.is_policy_denied());
        assert!(err.to_string().contains("otp_verifications"));
    }
}
