//! Records error types.

use crate::OtpChannel;
use supabase_gateway::{GatewayError, GatewayErrorKind};
use thiserror::Error;

/// Records error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordsError {
    /// Failure reported by the hosted service
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The profiles table answers, but not for this user's row
    #[error("Access denied to profile for user {user_id}")]
    ProfileAccessDenied { user_id: String },

    /// The profiles table cannot be read at all
    #[error("Cannot access profiles table: {0}")]
    ProfilesTableUnreachable(#[source] GatewayError),

    /// Insert reported success but the row cannot be read back
    #[error("Profile for user {user_id} missing after creation")]
    ProfileMissingAfterCreate { user_id: String },

    #[error("No profile for user {user_id}")]
    ProfileNotFound { user_id: String },

    /// No unexpired, unverified code exists for the channel
    #[error("No valid {channel} verification code found")]
    NoValidCode { channel: OtpChannel },

    /// A code exists but the supplied one does not match it
    #[error("Incorrect {channel} verification code")]
    CodeMismatch { channel: OtpChannel },

    #[error("Onboarding step {0} does not exist (expected 1-{max})", max = crate::TOTAL_STEPS)]
    InvalidStep(u32),

    /// Client-side field validation
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Row did not match the expected model
    #[error("Unexpected row shape: {0}")]
    Decode(String),
}

impl RecordsError {
    /// Classification shared with gateway errors. Domain errors map to `Request`.
    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            RecordsError::Gateway(e) => e.kind(),
            RecordsError::ProfileAccessDenied { .. } | RecordsError::ProfilesTableUnreachable(_) => {
                GatewayErrorKind::Authorization
            }
            RecordsError::Decode(_) | RecordsError::ProfileMissingAfterCreate { .. } => {
                GatewayErrorKind::Internal
            }
            _ => GatewayErrorKind::Request,
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, RecordsError::Gateway(e) if e.is_transient())
    }

    /// A wrong or missing OTP code.
    pub fn is_rejected_code(&self) -> bool {
        matches!(
            self,
            RecordsError::NoValidCode { .. } | RecordsError::CodeMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for RecordsError {
    fn from(e: serde_json::Error) -> Self {
        RecordsError::Decode(e.to_string())
    }
}

/// Result type alias using RecordsError.
pub type RecordsResult<T> = Result<T, RecordsError>;
