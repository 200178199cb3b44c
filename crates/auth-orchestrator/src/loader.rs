//! One full auth-state load: probe, session, profile.
//!
//! Runs on its own task and reports back to the store through the command
//! channel, tagged with the generation that started it.

use crate::runtime::Command;
use crate::{AuthError, AuthResult, RetryPolicy};
use onboarding_records::{OnboardingRecords, Profile};
use reachability_probe::Probe;
use std::sync::Arc;
use supabase_gateway::{AuthGateway, GatewayErrorKind, Session, SharedBackend};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Everything a load needs, cloned into each load task.
#[derive(Clone)]
pub(crate) struct LoadContext {
    pub backend: SharedBackend,
    pub records: OnboardingRecords,
    pub probe: Option<Arc<dyn Probe>>,
    pub retry: RetryPolicy,
}

/// Successful load: no session, or a session with its reconciled profile.
pub(crate) type Loaded = Option<(Session, Profile)>;

/// Current session, with reachability failures treated as "no session".
pub(crate) async fn resolve_session(backend: &SharedBackend) -> AuthResult<Option<Session>> {
    match backend.get_session().await {
        Ok(session) => Ok(session),
        Err(e) if e.is_transient() => {
            warn!(error = %e, "session request failed, continuing without a session");
            Ok(None)
        }
        Err(e) if e.kind() == GatewayErrorKind::Configuration => {
            Err(AuthError::Configuration(e.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Run one load. `check_reachability` runs the advisory probe first.
pub(crate) async fn run(
    ctx: LoadContext,
    generation: u64,
    check_reachability: bool,
    commands: mpsc::Sender<Command>,
) {
    if let Some(probe) = ctx.probe.as_ref().filter(|_| check_reachability) {
        let reachability = probe.probe().await;
        if !reachability.reachable {
            warn!(generation, "internet looks unreachable, continuing anyway");
        }
        let _ = commands
            .send(Command::Probed {
                generation,
                reachable: reachability.reachable,
            })
            .await;
    }

    let ctx = &ctx;
    let tx = &commands;
    let result: AuthResult<Loaded> = ctx
        .retry
        .run(|attempt| async move {
            debug!(generation, attempt, "loading auth state");
            let session = resolve_session(&ctx.backend).await?;
            let _ = tx
                .send(Command::SessionResolved {
                    generation,
                    session: session.clone(),
                })
                .await;

            let Some(session) = session else {
                return Ok(None);
            };
            let profile = ctx.records.profiles.fetch_or_create(&session.user).await?;
            Ok(Some((session, profile)))
        })
        .await;

    // The store may be gone after shutdown.
    let _ = commands
        .send(Command::LoadFinished { generation, result })
        .await;
}
