//! Session bootstrap for the onboarding client.
//!
//! [`AuthOrchestrator::start`] spawns a single task that owns the auth
//! state. It resolves the session, reconciles the profile, retries network
//! failures, enforces the loading deadline and publishes an
//! [`AuthSnapshot`] on a watch channel. [`AuthHandle`] is the cloneable
//! front door used by the rest of the application.

mod auth_fsm;
mod error;
mod loader;
mod retry;
mod runtime;
mod snapshot;

pub use auth_fsm::{AuthPhase, SessionMachine, SessionMachineInput, SessionMachineState};
pub use error::{AuthError, AuthResult};
pub use retry::RetryPolicy;
pub use runtime::{AuthHandle, AuthOrchestrator, OrchestratorConfig};
pub use snapshot::{AuthFailure, AuthFailureKind, AuthSnapshot, Screen};
