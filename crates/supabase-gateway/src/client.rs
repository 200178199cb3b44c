//! Supabase HTTP client: GoTrue auth endpoints and PostgREST tables.

use crate::{
    AuthChange, AuthChangeEvent, AuthGateway, GatewayError, GatewayResult, RecordStore, Session,
    SessionCache, SignUpOutcome, TableQuery, UserIdentity,
};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use onboard_config_and_utils::{is_placeholder_url, Config};
use serde::Deserialize;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);
const EVENT_CHANNEL_CAPACITY: usize = 32;
/// Refresh when the access token expires within this window.
const REFRESH_MARGIN_SECS: i64 = 60;

fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserIdentity,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| Utc::now() + Duration::seconds(self.expires_in));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// What a request was doing, for error classification.
#[derive(Debug, Clone)]
pub(crate) struct RequestContext {
    pub table: Option<String>,
    pub operation: &'static str,
    /// GoTrue endpoint (credentials) rather than a table.
    pub auth: bool,
}

impl RequestContext {
    fn auth(operation: &'static str) -> Self {
        Self {
            table: None,
            operation,
            auth: true,
        }
    }

    fn table(table: &str, operation: &'static str) -> Self {
        Self {
            table: Some(table.to_string()),
            operation,
            auth: false,
        }
    }
}

/// Map a non-success response onto a structured error.
pub(crate) fn classify_failure(
    status: u16,
    body: &str,
    ctx: &RequestContext,
    placeholder_endpoint: bool,
) -> GatewayError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let text = |key: &str| parsed.get(key).and_then(Value::as_str).map(str::to_string);
    let code = text("code").or_else(|| text("error_code"));
    let message = text("message")
        .or_else(|| text("msg"))
        .or_else(|| text("error_description"))
        .or_else(|| text("error"))
        .unwrap_or_else(|| format!("HTTP {status}"));
    let table = ctx.table.clone().unwrap_or_else(|| "auth".to_string());

    if status == 404 && placeholder_endpoint {
        return GatewayError::Configuration(format!(
            "{} endpoint not found: SUPABASE_URL is still a template placeholder",
            ctx.operation
        ));
    }

    match (status, code.as_deref()) {
        (_, Some("42501")) => GatewayError::policy_denied(&table, ctx.operation),
        (409, _) | (_, Some("23505")) => GatewayError::Conflict { table },
        (401, _) if ctx.auth => GatewayError::InvalidCredentials(message),
        (401, _) => GatewayError::NotAuthenticated,
        (403, _) if ctx.table.is_some() => GatewayError::policy_denied(&table, ctx.operation),
        (400, _)
            if ctx.auth
                && (text("error").as_deref() == Some("invalid_grant")
                    || code.as_deref() == Some("invalid_credentials")) =>
        {
            GatewayError::InvalidCredentials(message)
        }
        (_, Some("42P01")) | (_, Some("PGRST205")) | (404, _) => {
            GatewayError::NotFound(format!("{table}: {message}"))
        }
        (429, _) | (500..=599, _) => GatewayError::Unavailable { status },
        _ => GatewayError::Rejected { status, message },
    }
}

struct SessionSlot {
    session: Option<Session>,
    /// Confirmed with the server during this process lifetime.
    verified: bool,
}

/// Supabase client for auth and row-level-secured tables.
pub struct SupabaseClient {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    placeholder_endpoint: bool,
    slot: Mutex<SessionSlot>,
    cache: Option<SessionCache>,
    events: broadcast::Sender<AuthChange>,
}

impl SupabaseClient {
    /// Create a client for `api_url` (e.g. `https://xyz.supabase.co`).
    pub fn new(api_url: impl Into<String>, anon_key: impl Into<String>) -> GatewayResult<Self> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("HTTP client: {e}")))?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            placeholder_endpoint: is_placeholder_url(&api_url),
            http_client,
            api_url,
            anon_key: anon_key.into(),
            slot: Mutex::new(SessionSlot {
                session: None,
                verified: false,
            }),
            cache: None,
            events,
        })
    }

    pub fn from_config(config: &Config) -> GatewayResult<Self> {
        Self::new(config.api_url(), config.supabase_anon_key.trim())
    }

    /// Persist sessions to `cache` and resume the one stored there.
    pub fn with_session_cache(mut self, cache: SessionCache) -> GatewayResult<Self> {
        let restored = cache.load()?;
        if let Some(session) = &restored {
            debug!(user_id = %session.user.id, "restored cached session");
        }
        self.slot = Mutex::new(SessionSlot {
            session: restored,
            verified: false,
        });
        self.cache = Some(cache);
        Ok(self)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.api_url, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        // No subscribers is fine.
        let _ = self.events.send(AuthChange::new(event, session));
    }

    fn persist(&self, session: Option<&Session>) {
        let Some(cache) = &self.cache else {
            return;
        };
        let result = match session {
            Some(session) => cache.store(session),
            None => cache.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to update session cache");
        }
    }

    fn map_transport(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_connect() && self.placeholder_endpoint {
            GatewayError::Configuration(format!(
                "cannot reach {}: SUPABASE_URL is still a template placeholder",
                self.api_url
            ))
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Network(e.to_string())
        }
    }

    /// Send, and turn any non-success status into a structured error.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        ctx: RequestContext,
    ) -> GatewayResult<reqwest::Response> {
        let response = request
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let body_summary = summarize_response_body(&body);
        let err = classify_failure(status.as_u16(), &body, &ctx, self.placeholder_endpoint);
        if err.is_transient() {
            warn!(status = %status, operation = ctx.operation, body_summary = %body_summary, "request failed");
        } else {
            error!(
                status = %status,
                operation = ctx.operation,
                table = ?ctx.table,
                body_summary = %body_summary,
                "request rejected"
            );
        }
        Err(err)
    }

    async fn rows(&self, response: reqwest::Response) -> GatewayResult<Vec<Value>> {
        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&body)? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            row => Ok(vec![row]),
        }
    }

    async fn request_token(&self, grant_type: &str, body: Value) -> GatewayResult<Session> {
        let url = format!("{}?grant_type={}", self.auth_url("token"), grant_type);
        debug!(url = %url, "requesting token");

        let response = self
            .execute(
                self.http_client.post(&url).json(&body),
                RequestContext::auth("token"),
            )
            .await?;
        let token: TokenResponse = response.json().await.map_err(|e| self.map_transport(e))?;
        Ok(token.into_session())
    }

    /// Confirm the access token with `/auth/v1/user`.
    async fn fetch_user(&self, access_token: &str) -> GatewayResult<UserIdentity> {
        let response = self
            .execute(
                self.http_client
                    .get(self.auth_url("user"))
                    .bearer_auth(access_token),
                RequestContext::auth("user"),
            )
            .await?;
        response.json().await.map_err(|e| self.map_transport(e))
    }

    /// Access token of the current session, or the anon key when signed out.
    async fn bearer(&self) -> GatewayResult<String> {
        Ok(match self.get_session().await? {
            Some(session) => session.access_token,
            None => self.anon_key.clone(),
        })
    }

    fn adopt(&self, slot: &mut SessionSlot, session: &Session, event: AuthChangeEvent) {
        slot.session = Some(session.clone());
        slot.verified = true;
        self.persist(Some(session));
        self.emit(event, Some(session.clone()));
    }

    fn drop_session(&self, slot: &mut SessionSlot) {
        slot.session = None;
        slot.verified = false;
        self.persist(None);
        self.emit(AuthChangeEvent::SignedOut, None);
    }
}

#[async_trait]
impl AuthGateway for SupabaseClient {
    async fn get_session(&self) -> GatewayResult<Option<Session>> {
        let mut slot = self.slot.lock().await;
        let Some(current) = slot.session.clone() else {
            return Ok(None);
        };

        if current.expires_within(Utc::now(), Duration::seconds(REFRESH_MARGIN_SECS)) {
            info!(user_id = %current.user.id, "session expiring, refreshing");
            let body = serde_json::json!({ "refresh_token": current.refresh_token });
            return match self.request_token("refresh_token", body).await {
                Ok(fresh) => {
                    self.adopt(&mut slot, &fresh, AuthChangeEvent::TokenRefreshed);
                    Ok(Some(fresh))
                }
                Err(e) if e.is_transient() || e.kind() == crate::GatewayErrorKind::Configuration => {
                    Err(e)
                }
                Err(e) => {
                    warn!(error = %e, "refresh token rejected, signing out");
                    self.drop_session(&mut slot);
                    Ok(None)
                }
            };
        }

        if !slot.verified {
            match self.fetch_user(&current.access_token).await {
                Ok(user) => {
                    slot.verified = true;
                    if user != current.user {
                        let updated = Session { user, ..current };
                        self.adopt(&mut slot, &updated, AuthChangeEvent::UserUpdated);
                        return Ok(Some(updated));
                    }
                }
                Err(e) if e.is_transient() || e.kind() == crate::GatewayErrorKind::Configuration => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "cached session rejected by server");
                    self.drop_session(&mut slot);
                    return Ok(None);
                }
            }
        }

        Ok(Some(current))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> GatewayResult<Session> {
        let body = serde_json::json!({ "email": email, "password": password });
        let session = self.request_token("password", body).await?;

        let mut slot = self.slot.lock().await;
        self.adopt(&mut slot, &session, AuthChangeEvent::SignedIn);
        info!(user_id = %session.user.id, "signed in");
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> GatewayResult<SignUpOutcome> {
        let body = serde_json::json!({ "email": email, "password": password, "data": metadata });
        let response = self
            .execute(
                self.http_client.post(self.auth_url("signup")).json(&body),
                RequestContext::auth("signup"),
            )
            .await?;
        let payload: Value = response.json().await.map_err(|e| self.map_transport(e))?;

        if payload.get("access_token").is_some() {
            let session = serde_json::from_value::<TokenResponse>(payload)?.into_session();
            let mut slot = self.slot.lock().await;
            self.adopt(&mut slot, &session, AuthChangeEvent::SignedIn);
            info!(user_id = %session.user.id, "signed up and signed in");
            return Ok(SignUpOutcome::SignedIn(session));
        }

        let user_value = payload.get("user").cloned().unwrap_or(payload);
        let user: UserIdentity = serde_json::from_value(user_value)?;
        info!(user_id = %user.id, "signed up, email confirmation pending");
        Ok(SignUpOutcome::ConfirmationRequired(user))
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.session.clone() {
            let request = self
                .http_client
                .post(self.auth_url("logout"))
                .bearer_auth(&session.access_token);
            if let Err(e) = self.execute(request, RequestContext::auth("logout")).await {
                warn!(error = %e, "server-side logout failed, clearing local session anyway");
            }
        }
        self.drop_session(&mut slot);
        info!("signed out");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

#[async_trait]
impl RecordStore for SupabaseClient {
    async fn select(&self, query: &TableQuery) -> GatewayResult<Vec<Value>> {
        let bearer = self.bearer().await?;
        let request = self
            .http_client
            .get(self.rest_url(&query.table))
            .query(&query.to_query_pairs())
            .bearer_auth(bearer)
            .header("Accept", "application/json");

        let response = self
            .execute(request, RequestContext::table(&query.table, "select"))
            .await?;
        self.rows(response).await
    }

    async fn insert(&self, table: &str, row: Value) -> GatewayResult<Vec<Value>> {
        let bearer = self.bearer().await?;
        let request = self
            .http_client
            .post(self.rest_url(table))
            .bearer_auth(bearer)
            .header("Prefer", "return=representation")
            .json(&row);

        let response = self
            .execute(request, RequestContext::table(table, "insert"))
            .await?;
        self.rows(response).await
    }

    async fn upsert(
        &self,
        table: &str,
        row: Value,
        on_conflict: &[&str],
    ) -> GatewayResult<Vec<Value>> {
        let bearer = self.bearer().await?;
        let request = self
            .http_client
            .post(self.rest_url(table))
            .query(&[("on_conflict", on_conflict.join(","))])
            .bearer_auth(bearer)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row);

        let response = self
            .execute(request, RequestContext::table(table, "upsert"))
            .await?;
        self.rows(response).await
    }

    async fn update(&self, query: &TableQuery, patch: Value) -> GatewayResult<Vec<Value>> {
        let bearer = self.bearer().await?;
        let request = self
            .http_client
            .patch(self.rest_url(&query.table))
            .query(&query.filter_pairs())
            .bearer_auth(bearer)
            .header("Prefer", "return=representation")
            .json(&patch);

        let response = self
            .execute(request, RequestContext::table(&query.table, "update"))
            .await?;
        self.rows(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_ctx() -> RequestContext {
        RequestContext::table("profiles", "select")
    }

    #[test]
    fn test_rls_code_maps_to_policy_denied() {
        let body = r#"{"code":"42501","message":"new row violates row-level security policy"}"#;
        assert_eq!(
            classify_failure(403, body, &table_ctx(), false),
            GatewayError::policy_denied("profiles", "select")
        );
        assert!(classify_failure(401, body, &table_ctx(), false).is_policy_denied());
    }

    #[test]
    fn test_placeholder_404_is_configuration() {
        let err = classify_failure(404, "", &RequestContext::auth("token"), true);
        assert!(matches!(err, GatewayError::Configuration(_)));

        let err = classify_failure(404, "", &table_ctx(), false);
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[test]
    fn test_bad_password_is_invalid_credentials() {
        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        assert_eq!(
            classify_failure(400, body, &RequestContext::auth("token"), false),
            GatewayError::InvalidCredentials("Invalid login credentials".to_string())
        );
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(classify_failure(503, "", &table_ctx(), false).is_transient());
        assert!(classify_failure(429, "", &table_ctx(), false).is_transient());
        assert!(!classify_failure(400, "{}", &table_ctx(), false).is_transient());
    }

    #[test]
    fn test_unique_violation_is_conflict() {
        let body = r#"{"code":"23505","message":"duplicate key value"}"#;
        assert_eq!(
            classify_failure(409, body, &table_ctx(), false),
            GatewayError::Conflict {
                table: "profiles".to_string()
            }
        );
    }

    #[test]
    fn test_expired_jwt_on_table_is_not_authenticated() {
        let body = r#"{"code":"PGRST301","message":"JWT expired"}"#;
        assert_eq!(
            classify_failure(401, body, &table_ctx(), false),
            GatewayError::NotAuthenticated
        );
    }

    #[test]
    fn test_token_response_prefers_absolute_expiry() {
        let token: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "expires_at": 1_900_000_000i64,
            "user": {"id": "u1", "email": "a@example.com"}
        }))
        .unwrap();
        let session = token.into_session();
        assert_eq!(session.expires_at.timestamp(), 1_900_000_000);
        assert_eq!(session.user.id, "u1");
    }

    #[test]
    fn test_client_detects_placeholder_endpoint() {
        let client = SupabaseClient::new("https://your-project.supabase.co/", "key").unwrap();
        assert!(client.placeholder_endpoint);
        assert_eq!(client.api_url, "https://your-project.supabase.co");
    }
}
