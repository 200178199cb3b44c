//! Session bootstrap state machine using rust-fsm.
//!
//! ```text
//!                 Refresh (from any state)
//!                        │
//!                        ▼
//!               ┌─────────────────┐  LoadingTimedOut / Failed
//!               │     Loading     │ ─────────────────────────► Errored
//!               └────────┬────────┘
//!        NoSession       │      ProfileIncomplete / ProfileComplete
//!           ┌────────────┴─────────────┐
//!           ▼                          ▼
//!   Unauthenticated          Onboarding ◄──► Complete
//!           ▲                          │
//!           └──────── SignedOut ───────┘
//! ```
//!
//! Results that land after the loading deadline are still applied, so
//! `Errored` accepts the same outcomes as `Loading`.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Loading)

    Loading => {
        Refresh => Loading,
        NoSession => Unauthenticated,
        ProfileIncomplete => Onboarding,
        ProfileComplete => Complete,
        Failed => Errored,
        LoadingTimedOut => Errored,
        SignedOut => Unauthenticated
    },
    Unauthenticated => {
        Refresh => Loading,
        NoSession => Unauthenticated,
        SignedOut => Unauthenticated
    },
    Onboarding => {
        Refresh => Loading,
        NoSession => Unauthenticated,
        ProfileIncomplete => Onboarding,
        ProfileComplete => Complete,
        Failed => Errored,
        SignedOut => Unauthenticated
    },
    Complete => {
        Refresh => Loading,
        NoSession => Unauthenticated,
        ProfileIncomplete => Onboarding,
        ProfileComplete => Complete,
        Failed => Errored,
        SignedOut => Unauthenticated
    },
    Errored => {
        Refresh => Loading,
        NoSession => Unauthenticated,
        ProfileIncomplete => Onboarding,
        ProfileComplete => Complete,
        Failed => Errored,
        SignedOut => Unauthenticated
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Externally visible phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Loading,
    Unauthenticated,
    Onboarding,
    Complete,
    Error,
}

impl AuthPhase {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthPhase::Onboarding | AuthPhase::Complete)
    }
}

impl From<&SessionMachineState> for AuthPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Loading => AuthPhase::Loading,
            SessionMachineState::Unauthenticated => AuthPhase::Unauthenticated,
            SessionMachineState::Onboarding => AuthPhase::Onboarding,
            SessionMachineState::Complete => AuthPhase::Complete,
            SessionMachineState::Errored => AuthPhase::Error,
        }
    }
}
