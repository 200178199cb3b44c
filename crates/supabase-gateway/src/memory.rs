//! In-process backend for tests and offline development.
//!
//! Mirrors what the hosted service enforces that the application relies on:
//! row ownership on user tables, public reference tables, unique keys, and
//! server-assigned `id` / `created_at`. Failures and latency can be scripted
//! per operation.

use crate::{
    db_timestamp, AuthChange, AuthChangeEvent, AuthGateway, GatewayError, GatewayResult,
    RecordStore, Session, SignUpOutcome, TableQuery, UserIdentity,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::broadcast;
use tracing::debug;

/// Tables readable by anyone and writable by no one.
pub const REFERENCE_TABLES: &[&str] = &[
    "onboarding_steps",
    "risk_questions",
    "risk_options",
    "mutual_funds",
];

/// Gateway call, for failure scripting and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetSession,
    SignIn,
    SignUp,
    SignOut,
    Select,
    Insert,
    Upsert,
    Update,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::GetSession => "get_session",
            Operation::SignIn => "sign_in",
            Operation::SignUp => "sign_up",
            Operation::SignOut => "sign_out",
            Operation::Select => "select",
            Operation::Insert => "insert",
            Operation::Upsert => "upsert",
            Operation::Update => "update",
        }
    }
}

/// Column that names the owning user, or `None` for reference tables.
fn owner_column(table: &str) -> Option<&'static str> {
    if REFERENCE_TABLES.contains(&table) {
        None
    } else if table == "profiles" {
        Some("id")
    } else {
        Some("user_id")
    }
}

fn unique_key(table: &str) -> &'static [&'static str] {
    match table {
        "onboarding_progress" => &["user_id", "step_id"],
        _ => &["id"],
    }
}

fn same_key(a: &Map<String, Value>, b: &Map<String, Value>, columns: &[&str]) -> bool {
    columns
        .iter()
        .all(|c| a.get(*c).is_some() && a.get(*c) == b.get(*c))
}

fn into_row(table: &str, value: Value) -> GatewayResult<Map<String, Value>> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(GatewayError::Rejected {
            status: 400,
            message: format!("{table}: expected a JSON object, got {other}"),
        }),
    }
}

struct Account {
    user: UserIdentity,
    password: String,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    tables: HashMap<String, Vec<Map<String, Value>>>,
    failures: HashMap<(Operation, Option<String>), VecDeque<GatewayError>>,
    delays: HashMap<Operation, VecDeque<std::time::Duration>>,
    calls: HashMap<Operation, usize>,
    without_representation: HashSet<String>,
    unreachable: bool,
    require_confirmation: bool,
    last_created_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn next_failure(&mut self, op: Operation, table: Option<&str>) -> Option<GatewayError> {
        if let Some(table) = table {
            let scripted = self
                .failures
                .get_mut(&(op, Some(table.to_string())))
                .and_then(VecDeque::pop_front);
            if scripted.is_some() {
                return scripted;
            }
        }
        self.failures
            .get_mut(&(op, None))
            .and_then(VecDeque::pop_front)
    }

    /// Strictly increasing so rows created back to back still order by time.
    fn created_at(&mut self) -> String {
        let mut now = Utc::now();
        if let Some(last) = self.last_created_at {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_created_at = Some(now);
        db_timestamp(now)
    }

    fn caller(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.user.id.clone())
    }

    fn check_write(
        &self,
        table: &str,
        operation: &str,
        row: &Map<String, Value>,
    ) -> GatewayResult<()> {
        let Some(column) = owner_column(table) else {
            return Err(GatewayError::policy_denied(table, operation));
        };
        let Some(caller) = self.caller() else {
            return Err(GatewayError::policy_denied(table, operation));
        };
        match row.get(column).and_then(Value::as_str) {
            Some(owner) if owner == caller => Ok(()),
            _ => Err(GatewayError::policy_denied(table, operation)),
        }
    }

    fn visible<'a>(&'a self, table: &str) -> Vec<&'a Map<String, Value>> {
        let rows = match self.tables.get(table) {
            Some(rows) => rows,
            None => return Vec::new(),
        };
        match owner_column(table) {
            None => rows.iter().collect(),
            Some(column) => {
                let caller = self.caller();
                rows.iter()
                    .filter(|row| {
                        caller.is_some() && row.get(column).and_then(Value::as_str) == caller.as_deref()
                    })
                    .collect()
            }
        }
    }

    fn fill_defaults(&mut self, row: &mut Map<String, Value>) {
        if !row.contains_key("id") {
            row.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
        if !row.contains_key("created_at") {
            let created_at = self.created_at();
            row.insert("created_at".into(), Value::String(created_at));
        }
    }

    fn representation(&self, table: &str, row: Map<String, Value>) -> Vec<Value> {
        if self.without_representation.contains(table) {
            Vec::new()
        } else {
            vec![Value::Object(row)]
        }
    }

    fn new_session(&self, user: UserIdentity) -> Session {
        Session {
            access_token: uuid::Uuid::new_v4().to_string(),
            refresh_token: uuid::Uuid::new_v4().to_string(),
            expires_at: Utc::now() + Duration::hours(1),
            user,
        }
    }
}

/// In-memory stand-in for the hosted service.
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    events: broadcast::Sender<AuthChange>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    /// Create an account that can sign in with `password`.
    pub fn register_user(&self, email: &str, password: &str) -> UserIdentity {
        let user = UserIdentity::new(uuid::Uuid::new_v4().to_string(), email);
        self.inner.lock().accounts.insert(
            email.to_string(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        user
    }

    /// Replace the current session's user without emitting an auth event.
    pub fn swap_session_user(&self, user: UserIdentity) {
        let mut inner = self.inner.lock();
        let session = inner.new_session(user);
        inner.session = Some(session);
    }

    /// Broadcast an auth event carrying the current session.
    pub fn emit(&self, event: AuthChangeEvent) {
        let session = self.inner.lock().session.clone();
        let _ = self.events.send(AuthChange::new(event, session));
    }

    /// Insert rows as the service itself would, bypassing ownership checks.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut inner = self.inner.lock();
        let mut seeded = Vec::new();
        for value in rows {
            if let Value::Object(mut row) = value {
                inner.fill_defaults(&mut row);
                seeded.push(row);
            }
        }
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(seeded);
    }

    /// Every row of `table`, regardless of owner.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.inner
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Fail the next call of `op` (any table) with `error`.
    pub fn fail_next(&self, op: Operation, error: GatewayError) {
        self.inner
            .lock()
            .failures
            .entry((op, None))
            .or_default()
            .push_back(error);
    }

    /// Fail the next call of `op` against `table` with `error`.
    pub fn fail_next_on(&self, op: Operation, table: &str, error: GatewayError) {
        self.inner
            .lock()
            .failures
            .entry((op, Some(table.to_string())))
            .or_default()
            .push_back(error);
    }

    /// Delay the next call of `op` by `delay` before it runs.
    pub fn delay_next(&self, op: Operation, delay: std::time::Duration) {
        self.inner
            .lock()
            .delays
            .entry(op)
            .or_default()
            .push_back(delay);
    }

    /// Every call fails with a network error while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unreachable = unreachable;
    }

    /// Sign-up returns no session until the email is confirmed.
    pub fn require_email_confirmation(&self, required: bool) {
        self.inner.lock().require_confirmation = required;
    }

    /// Inserts into `table` succeed but return no rows.
    pub fn omit_representation(&self, table: &str) {
        self.inner
            .lock()
            .without_representation
            .insert(table.to_string());
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.lock().session.clone()
    }

    /// Count the call, apply scripted latency, then scripted failures.
    async fn gate(&self, op: Operation, table: Option<&str>) -> GatewayResult<()> {
        let delay = {
            let mut inner = self.inner.lock();
            *inner.calls.entry(op).or_default() += 1;
            inner.delays.get_mut(&op).and_then(VecDeque::pop_front)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if inner.unreachable {
            return Err(GatewayError::Network("connection refused".to_string()));
        }
        match inner.next_failure(op, table) {
            Some(error) => {
                debug!(operation = op.name(), table = ?table, error = %error, "scripted failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn broadcast(&self, event: AuthChangeEvent, session: Option<Session>) {
        let _ = self.events.send(AuthChange::new(event, session));
    }
}

#[async_trait]
impl AuthGateway for MemoryBackend {
    async fn get_session(&self) -> GatewayResult<Option<Session>> {
        self.gate(Operation::GetSession, None).await?;
        Ok(self.inner.lock().session.clone())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> GatewayResult<Session> {
        self.gate(Operation::SignIn, None).await?;
        let session = {
            let mut inner = self.inner.lock();
            let user = match inner.accounts.get(email) {
                Some(account) if account.password == password => account.user.clone(),
                _ => {
                    return Err(GatewayError::InvalidCredentials(
                        "Invalid login credentials".to_string(),
                    ))
                }
            };
            let session = inner.new_session(user);
            inner.session = Some(session.clone());
            session
        };
        self.broadcast(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _metadata: Value,
    ) -> GatewayResult<SignUpOutcome> {
        self.gate(Operation::SignUp, None).await?;
        let (user, confirmation) = {
            let inner = self.inner.lock();
            if inner.accounts.contains_key(email) {
                return Err(GatewayError::Rejected {
                    status: 422,
                    message: "User already registered".to_string(),
                });
            }
            (
                UserIdentity::new(uuid::Uuid::new_v4().to_string(), email),
                inner.require_confirmation,
            )
        };

        let session = {
            let mut inner = self.inner.lock();
            inner.accounts.insert(
                email.to_string(),
                Account {
                    user: user.clone(),
                    password: password.to_string(),
                },
            );
            if confirmation {
                None
            } else {
                let session = inner.new_session(user.clone());
                inner.session = Some(session.clone());
                Some(session)
            }
        };

        match session {
            Some(session) => {
                self.broadcast(AuthChangeEvent::SignedIn, Some(session.clone()));
                Ok(SignUpOutcome::SignedIn(session))
            }
            None => Ok(SignUpOutcome::ConfirmationRequired(user)),
        }
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        self.gate(Operation::SignOut, None).await?;
        self.inner.lock().session = None;
        self.broadcast(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

#[async_trait]
impl RecordStore for MemoryBackend {
    async fn select(&self, query: &TableQuery) -> GatewayResult<Vec<Value>> {
        self.gate(Operation::Select, Some(&query.table)).await?;
        let inner = self.inner.lock();
        Ok(query.apply(inner.visible(&query.table)))
    }

    async fn insert(&self, table: &str, row: Value) -> GatewayResult<Vec<Value>> {
        self.gate(Operation::Insert, Some(table)).await?;
        let mut row = into_row(table, row)?;
        let mut inner = self.inner.lock();
        inner.check_write(table, "insert", &row)?;
        inner.fill_defaults(&mut row);

        let key = unique_key(table);
        let rows = inner.tables.entry(table.to_string()).or_default();
        if rows.iter().any(|existing| same_key(existing, &row, key)) {
            return Err(GatewayError::Conflict {
                table: table.to_string(),
            });
        }
        rows.push(row.clone());
        Ok(inner.representation(table, row))
    }

    async fn upsert(
        &self,
        table: &str,
        row: Value,
        on_conflict: &[&str],
    ) -> GatewayResult<Vec<Value>> {
        self.gate(Operation::Upsert, Some(table)).await?;
        let row = into_row(table, row)?;
        let mut inner = self.inner.lock();
        inner.check_write(table, "upsert", &row)?;

        let rows = inner.tables.entry(table.to_string()).or_default();
        if let Some(existing) = rows
            .iter_mut()
            .find(|existing| same_key(existing, &row, on_conflict))
        {
            existing.extend(row);
            let merged = existing.clone();
            return Ok(inner.representation(table, merged));
        }

        let mut row = row;
        inner.fill_defaults(&mut row);
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(inner.representation(table, row))
    }

    async fn update(&self, query: &TableQuery, patch: Value) -> GatewayResult<Vec<Value>> {
        self.gate(Operation::Update, Some(&query.table)).await?;
        let patch = into_row(&query.table, patch)?;
        let mut inner = self.inner.lock();
        let Some(column) = owner_column(&query.table) else {
            return Err(GatewayError::policy_denied(&query.table, "update"));
        };
        let Some(caller) = inner.caller() else {
            return Err(GatewayError::policy_denied(&query.table, "update"));
        };

        let mut updated = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&query.table) {
            for row in rows.iter_mut() {
                let owned = row.get(column).and_then(Value::as_str) == Some(caller.as_str());
                if owned && query.matches(row) {
                    row.extend(patch.clone());
                    updated.push(Value::Object(row.clone()));
                }
            }
        }
        Ok(updated)
    }
}
