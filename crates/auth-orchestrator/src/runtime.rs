//! Auth runtime: one task owns the state, everything else sends it commands.
//!
//! Loads run on their own tasks and report back tagged with the generation
//! that started them. Only results for the current generation are applied,
//! so a slow load can never overwrite state derived from a newer event.

use crate::auth_fsm::{AuthPhase, SessionMachine, SessionMachineInput};
use crate::loader::{self, LoadContext, Loaded};
use crate::{AuthError, AuthFailure, AuthResult, AuthSnapshot, RetryPolicy};
use onboarding_records::{
    OnboardingRecords, OtpChannel, OtpIssued, OtpRecord, Profile, ProfileUpdate, StepCompletion,
};
use parking_lot::Mutex;
use reachability_probe::Probe;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use supabase_gateway::{
    AuthChange, AuthChangeEvent, AuthGateway, Session, SharedBackend, SignUpOutcome,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Timing and retry settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub retry: RetryPolicy,
    /// Loading is forced to stop after this long.
    pub loading_deadline: Duration,
    /// How often the session is re-read to catch silent user swaps.
    pub session_poll_interval: Duration,
    /// Delay before refreshing after connectivity returns.
    pub reconnect_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            loading_deadline: Duration::from_secs(10),
            session_poll_interval: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

pub(crate) enum Command {
    Refresh {
        reply: Option<oneshot::Sender<u64>>,
    },
    SetOnline(bool),
    ClearSession,
    ProfileChanged(Profile),
    Probed {
        generation: u64,
        reachable: bool,
    },
    SessionResolved {
        generation: u64,
        session: Option<Session>,
    },
    LoadFinished {
        generation: u64,
        result: AuthResult<Loaded>,
    },
    LoadingDeadline {
        generation: u64,
    },
    SessionPolled {
        user_id: Option<String>,
    },
    ReconnectDue,
    Shutdown,
}

/// Builder for the auth runtime.
pub struct AuthOrchestrator {
    backend: SharedBackend,
    records: OnboardingRecords,
    probe: Option<Arc<dyn Probe>>,
    config: OrchestratorConfig,
}

impl AuthOrchestrator {
    pub fn new(backend: SharedBackend, records: OnboardingRecords) -> Self {
        Self {
            backend,
            records,
            probe: None,
            config: OrchestratorConfig::default(),
        }
    }

    /// Run this advisory probe before the startup load.
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the runtime task and begin the initial load.
    pub fn start(self) -> AuthHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (snapshots, snapshot_rx) = watch::channel(AuthSnapshot::default());
        let auth_events = self.backend.subscribe();
        let sign_in_wait = self.config.loading_deadline.saturating_mul(2);

        let store = AuthStore {
            fsm: SessionMachine::new(),
            snapshot: AuthSnapshot::default(),
            snapshots,
            generation: 0,
            last_user_id: None,
            commands: commands.downgrade(),
            ctx: LoadContext {
                backend: self.backend.clone(),
                records: self.records.clone(),
                probe: self.probe,
                retry: self.config.retry.clone(),
            },
            config: self.config,
        };
        let task = tokio::spawn(store.run(receiver, auth_events));

        AuthHandle {
            commands,
            snapshots: snapshot_rx,
            backend: self.backend,
            records: self.records,
            sign_in_wait,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

/// Single owner of the auth state.
struct AuthStore {
    fsm: SessionMachine,
    snapshot: AuthSnapshot,
    snapshots: watch::Sender<AuthSnapshot>,
    generation: u64,
    last_user_id: Option<String>,
    commands: mpsc::WeakSender<Command>,
    ctx: LoadContext,
    config: OrchestratorConfig,
}

impl AuthStore {
    async fn run(
        mut self,
        mut receiver: mpsc::Receiver<Command>,
        mut auth_events: broadcast::Receiver<AuthChange>,
    ) {
        let mut events_open = true;
        let poll_every = self.config.session_poll_interval;
        let mut poll = interval_at(Instant::now() + poll_every, poll_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.start_load("startup");

        loop {
            tokio::select! {
                command = receiver.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle(command),
                    }
                }
                event = auth_events.recv(), if events_open => {
                    match event {
                        Ok(change) => self.on_auth_change(change),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "missed auth events, reloading");
                            self.start_load("auth events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("auth event stream closed");
                            events_open = false;
                        }
                    }
                }
                _ = poll.tick() => self.poll_session(),
            }
        }

        info!(generation = self.generation, "auth runtime stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Refresh { reply } => {
                let generation = self.start_load("refresh requested");
                if let Some(reply) = reply {
                    let _ = reply.send(generation);
                }
            }
            Command::SetOnline(online) => self.set_online(online),
            Command::ClearSession => self.clear_session(),
            Command::ProfileChanged(profile) => self.on_profile_changed(profile),
            Command::Probed {
                generation,
                reachable,
            } => {
                if generation == self.generation {
                    self.snapshot.internet_reachable = Some(reachable);
                    self.publish();
                }
            }
            Command::SessionResolved {
                generation,
                session,
            } => self.on_session_resolved(generation, session),
            Command::LoadFinished { generation, result } => {
                self.on_load_finished(generation, result)
            }
            Command::LoadingDeadline { generation } => self.on_deadline(generation),
            Command::SessionPolled { user_id } => {
                if user_id != self.last_user_id {
                    info!(
                        previous = ?self.last_user_id,
                        current = ?user_id,
                        "session user changed"
                    );
                    self.start_load("session user changed");
                }
            }
            Command::ReconnectDue => {
                if self.snapshot.online
                    && (self.snapshot.error.is_some() || self.snapshot.network_degraded)
                {
                    self.start_load("connection restored");
                }
            }
            Command::Shutdown => {}
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot.clone());
    }

    fn transition(&mut self, input: SessionMachineInput) {
        let old_state = AuthPhase::from(self.fsm.state());
        if self.fsm.consume(&input).is_err() {
            let error = AuthError::InvalidStateTransition(format!("{old_state:?} on {input:?}"));
            warn!(error = %error, "ignoring auth transition");
            return;
        }
        let new_state = AuthPhase::from(self.fsm.state());
        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Auth state transition"
            );
        }
        self.snapshot.phase = new_state;
    }

    /// Spawn a task that sends `command` after `delay`, unless the runtime is gone.
    fn send_later(&self, delay: Duration, command: Command) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(command).await;
        });
    }

    /// Begin a new generation. Anything still running for older ones is ignored.
    fn start_load(&mut self, reason: &'static str) -> u64 {
        self.generation += 1;
        let generation = self.generation;
        info!(generation, reason, "loading auth state");

        self.transition(SessionMachineInput::Refresh);
        self.snapshot.loading = true;
        self.snapshot.generation = generation;
        self.publish();

        if let Some(commands) = self.commands.upgrade() {
            // Only the startup load probes.
            let check_reachability = generation == 1;
            tokio::spawn(loader::run(
                self.ctx.clone(),
                generation,
                check_reachability,
                commands,
            ));
        }
        self.send_later(
            self.config.loading_deadline,
            Command::LoadingDeadline { generation },
        );
        generation
    }

    fn on_session_resolved(&mut self, generation: u64, session: Option<Session>) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale session");
            return;
        }
        self.snapshot.user = session.as_ref().map(|s| s.user.clone());
        self.last_user_id = session.as_ref().map(|s| s.user.id.clone());
        self.snapshot.session = session;
        self.publish();
    }

    fn on_load_finished(&mut self, generation: u64, result: AuthResult<Loaded>) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale load result");
            return;
        }

        self.snapshot.loading = false;
        match result {
            Ok(None) => {
                self.snapshot.user = None;
                self.snapshot.session = None;
                self.snapshot.profile = None;
                self.snapshot.error = None;
                self.snapshot.network_degraded = false;
                self.last_user_id = None;
                self.transition(SessionMachineInput::NoSession);
                info!(generation, "no session");
            }
            Ok(Some((session, profile))) => {
                let input = profile_input(&profile);
                self.last_user_id = Some(session.user.id.clone());
                self.snapshot.user = Some(session.user.clone());
                self.snapshot.session = Some(session);
                self.snapshot.profile = Some(profile);
                self.snapshot.error = None;
                self.snapshot.network_degraded = false;
                self.transition(input);
                info!(generation, phase = ?self.snapshot.phase, "auth state loaded");
            }
            Err(e) if e.is_transient() => {
                // Retries are used up. Stop loading without a banner.
                warn!(generation, error = %e, "network unavailable, giving up for now");
                self.snapshot.network_degraded = true;
                self.snapshot.error = None;
                let input = if self.snapshot.user.is_some() {
                    SessionMachineInput::ProfileIncomplete
                } else {
                    SessionMachineInput::NoSession
                };
                self.transition(input);
            }
            Err(e) => {
                warn!(generation, error = %e, "failed to load auth state");
                self.snapshot.error = Some(AuthFailure::from(&e));
                self.transition(SessionMachineInput::Failed);
            }
        }
        self.publish();
    }

    fn on_deadline(&mut self, generation: u64) {
        if generation != self.generation || !self.snapshot.loading {
            return;
        }

        self.snapshot.loading = false;
        if self.snapshot.user.is_some() {
            warn!(generation, "loading deadline passed, continuing without a profile");
            self.transition(SessionMachineInput::ProfileIncomplete);
        } else {
            warn!(generation, "loading deadline passed with no user");
            self.snapshot.error = Some(AuthFailure::from(&AuthError::LoadingTimedOut));
            self.transition(SessionMachineInput::LoadingTimedOut);
        }
        self.publish();
    }

    fn on_auth_change(&mut self, change: AuthChange) {
        info!(event = ?change.event, user_id = ?change.user().map(|u| &u.id), "auth change");
        let Some(user) = change.user() else {
            self.clear_session();
            return;
        };

        let same_user = self.last_user_id.as_deref() == Some(user.id.as_str());
        self.snapshot.user = Some(user.clone());
        self.snapshot.session = change.session.clone();
        if change.event == AuthChangeEvent::TokenRefreshed && same_user {
            self.publish();
            return;
        }
        self.start_load("auth change");
    }

    fn clear_session(&mut self) {
        // Invalidate anything in flight for the previous user.
        self.generation += 1;
        self.last_user_id = None;
        self.snapshot.generation = self.generation;
        self.snapshot.user = None;
        self.snapshot.session = None;
        self.snapshot.profile = None;
        self.snapshot.error = None;
        self.snapshot.network_degraded = false;
        self.snapshot.loading = false;
        self.transition(SessionMachineInput::SignedOut);
        self.publish();
    }

    fn on_profile_changed(&mut self, profile: Profile) {
        if self.snapshot.user_id() != Some(profile.id.as_str()) {
            debug!(profile_id = %profile.id, "ignoring profile for another user");
            return;
        }
        let input = profile_input(&profile);
        self.snapshot.profile = Some(profile);
        if !self.snapshot.loading {
            self.transition(input);
        }
        self.publish();
    }

    fn set_online(&mut self, online: bool) {
        if self.snapshot.online == online {
            return;
        }
        self.snapshot.online = online;
        self.publish();

        if online {
            info!("back online");
            if self.snapshot.error.is_some() || self.snapshot.network_degraded {
                self.send_later(self.config.reconnect_delay, Command::ReconnectDue);
            }
        } else {
            info!("offline");
        }
    }

    fn poll_session(&self) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let backend = self.ctx.backend.clone();
        tokio::spawn(async move {
            match backend.get_session().await {
                Ok(session) => {
                    let user_id = session.map(|s| s.user.id);
                    let _ = commands.send(Command::SessionPolled { user_id }).await;
                }
                Err(e) => debug!(error = %e, "session poll failed"),
            }
        });
    }
}

fn profile_input(profile: &Profile) -> SessionMachineInput {
    if profile.onboarding_completed {
        SessionMachineInput::ProfileComplete
    } else {
        SessionMachineInput::ProfileIncomplete
    }
}

/// Cloneable handle to the auth runtime.
#[derive(Clone)]
pub struct AuthHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<AuthSnapshot>,
    backend: SharedBackend,
    records: OnboardingRecords,
    /// Upper bound on waiting for the load started by a sign-in event.
    sign_in_wait: Duration,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AuthHandle {
    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshots.clone()
    }

    pub fn records(&self) -> &OnboardingRecords {
        &self.records
    }

    async fn send(&self, command: Command) -> AuthResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AuthError::ShutDown)
    }

    /// Wait for the first snapshot matching `ready`.
    pub async fn wait_for(
        &self,
        ready: impl FnMut(&AuthSnapshot) -> bool,
    ) -> AuthResult<AuthSnapshot> {
        let mut receiver = self.snapshots.clone();
        let snapshot = receiver
            .wait_for(ready)
            .await
            .map_err(|_| AuthError::ShutDown)?;
        Ok(snapshot.clone())
    }

    /// Wait until no load is in progress.
    pub async fn settled(&self) -> AuthResult<AuthSnapshot> {
        self.wait_for(|s| !s.loading).await
    }

    /// Reload session and profile, returning the state once that load settles.
    pub async fn refresh(&self) -> AuthResult<AuthSnapshot> {
        let (reply, generation) = oneshot::channel();
        self.send(Command::Refresh { reply: Some(reply) }).await?;
        let generation = generation.await.map_err(|_| AuthError::ShutDown)?;
        self.wait_for(|s| s.generation >= generation && !s.loading)
            .await
    }

    /// Advisory connectivity signal from the host environment.
    pub async fn set_online(&self, online: bool) -> AuthResult<()> {
        self.send(Command::SetOnline(online)).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSnapshot> {
        let before = self.snapshot().generation;
        let session = self.backend.sign_in_with_password(email, password).await?;
        let user_id = session.user.id;
        info!(user_id = %user_id, "signed in");

        // The sign-in event starts a load; wait for it rather than starting another.
        let loaded = self.wait_for(|s| {
            s.generation > before && !s.loading && s.user_id() == Some(user_id.as_str())
        });
        match tokio::time::timeout(self.sign_in_wait, loaded).await {
            Ok(result) => result,
            Err(_) => {
                warn!(user_id = %user_id, "no load followed sign-in, refreshing");
                self.refresh().await
            }
        }
    }

    /// Create an account. With an immediate session the profile is reconciled
    /// and a welcome notification is sent in the background.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> AuthResult<SignUpOutcome> {
        let metadata = match full_name {
            Some(name) => serde_json::json!({ "full_name": name }),
            None => serde_json::json!({}),
        };
        let outcome = self.backend.sign_up(email, password, metadata).await?;

        if let SignUpOutcome::SignedIn(session) = &outcome {
            match self.records.profiles.fetch_or_create(&session.user).await {
                Ok(profile) => {
                    if profile.full_name.is_none() && full_name.is_some() {
                        let update = ProfileUpdate {
                            full_name: full_name.map(str::to_string),
                            ..Default::default()
                        };
                        if let Err(e) = self.records.profiles.update(&profile.id, &update).await {
                            warn!(user_id = %profile.id, error = %e, "failed to store full name");
                        }
                    }
                    // Detached: the outcome never depends on it.
                    drop(self.records.notifier.spawn_welcome(&profile.id, full_name));
                }
                Err(e) => {
                    warn!(user_id = %session.user.id, error = %e, "profile not ready after sign-up");
                }
            }
            self.refresh().await?;
        }
        Ok(outcome)
    }

    pub async fn sign_out(&self) -> AuthResult<AuthSnapshot> {
        self.backend.sign_out().await?;
        self.send(Command::ClearSession).await?;
        self.wait_for(|s| s.user.is_none() && !s.loading).await
    }

    fn require_user(&self) -> AuthResult<String> {
        self.snapshots
            .borrow()
            .user_id()
            .map(str::to_string)
            .ok_or(AuthError::NotSignedIn)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> AuthResult<Profile> {
        let user_id = self.require_user()?;
        let profile = self.records.profiles.update(&user_id, update).await?;
        self.send(Command::ProfileChanged(profile.clone())).await?;
        Ok(profile)
    }

    pub async fn complete_step(&self, step_number: u32, step_data: Value) -> AuthResult<StepCompletion> {
        let user_id = self.require_user()?;
        let completion = self
            .records
            .progress
            .complete_step(&user_id, step_number, step_data)
            .await?;
        self.send(Command::ProfileChanged(completion.profile.clone()))
            .await?;
        Ok(completion)
    }

    pub async fn issue_otp(&self, channel: OtpChannel, contact: &str) -> AuthResult<OtpIssued> {
        let user_id = self.require_user()?;
        Ok(self.records.otp.issue(&user_id, channel, contact).await?)
    }

    pub async fn verify_otp(&self, channel: OtpChannel, code: &str) -> AuthResult<OtpRecord> {
        let user_id = self.require_user()?;
        let record = self.records.otp.verify(&user_id, channel, code).await?;
        match self.records.profiles.fetch(&user_id).await {
            Ok(Some(profile)) => self.send(Command::ProfileChanged(profile)).await?,
            Ok(None) => {}
            Err(e) => warn!(user_id = %user_id, error = %e, "failed to reload profile after verification"),
        }
        Ok(record)
    }

    /// Stop the runtime. Results that arrive afterwards are discarded.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "auth runtime task failed");
            }
        }
    }
}
