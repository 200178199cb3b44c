//! Published view of the auth state.

use crate::{AuthError, AuthPhase};
use onboarding_records::Profile;
use serde::{Deserialize, Serialize};
use supabase_gateway::{GatewayErrorKind, Session, UserIdentity};

/// Error class the UI uses to pick troubleshooting guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureKind {
    Configuration,
    Network,
    Timeout,
    Authorization,
    Authentication,
    Domain,
    Internal,
}

/// Visible error carried by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailure {
    pub kind: AuthFailureKind,
    pub message: String,
    pub network_shaped: bool,
}

impl From<&AuthError> for AuthFailure {
    fn from(error: &AuthError) -> Self {
        let kind = match error {
            AuthError::LoadingTimedOut => AuthFailureKind::Timeout,
            AuthError::NotSignedIn => AuthFailureKind::Authentication,
            AuthError::InvalidStateTransition(_) | AuthError::ShutDown => AuthFailureKind::Internal,
            other => match other.gateway_kind() {
                Some(GatewayErrorKind::Reachability) => AuthFailureKind::Network,
                Some(GatewayErrorKind::Configuration) => AuthFailureKind::Configuration,
                Some(GatewayErrorKind::Authorization) => AuthFailureKind::Authorization,
                Some(GatewayErrorKind::Authentication) => AuthFailureKind::Authentication,
                Some(GatewayErrorKind::Request) => AuthFailureKind::Domain,
                Some(GatewayErrorKind::Internal) | None => AuthFailureKind::Internal,
            },
        };
        Self {
            kind,
            message: error.to_string(),
            network_shaped: error.is_network_shaped(),
        }
    }
}

/// Which screen a UI would render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Screen {
    Loading,
    SignIn,
    Onboarding,
    Dashboard,
    Error,
}

impl Screen {
    pub fn as_str(&self) -> &'static str {
        match self {
            Screen::Loading => "loading",
            Screen::SignIn => "sign-in",
            Screen::Onboarding => "onboarding",
            Screen::Dashboard => "dashboard",
            Screen::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSnapshot {
    pub phase: AuthPhase,
    pub loading: bool,
    pub user: Option<UserIdentity>,
    #[serde(skip)]
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    pub error: Option<AuthFailure>,
    /// Advisory; going offline never produces an error by itself.
    pub online: bool,
    /// Retries ran out on a network failure; no error is shown for it.
    pub network_degraded: bool,
    /// Last reachability probe result, if one has run.
    pub internet_reachable: Option<bool>,
    /// Load currently owning the state.
    pub generation: u64,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            phase: AuthPhase::Loading,
            loading: true,
            user: None,
            session: None,
            profile: None,
            error: None,
            online: true,
            network_degraded: false,
            internet_reachable: None,
            generation: 0,
        }
    }
}

impl AuthSnapshot {
    pub fn screen(&self) -> Screen {
        if self.loading {
            return Screen::Loading;
        }
        match self.phase {
            AuthPhase::Loading => Screen::Loading,
            AuthPhase::Unauthenticated => Screen::SignIn,
            AuthPhase::Onboarding => Screen::Onboarding,
            AuthPhase::Complete => Screen::Dashboard,
            AuthPhase::Error => Screen::Error,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }
}
