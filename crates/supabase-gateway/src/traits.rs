//! Seams between the application and the hosted service.

use crate::{AuthChange, GatewayResult, Session, SignUpOutcome, TableQuery};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Authentication side of the hosted service.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Current session, refreshed by the service if it is about to expire.
    async fn get_session(&self) -> GatewayResult<Option<Session>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> GatewayResult<Session>;

    /// `metadata` is stored as user metadata by the service.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> GatewayResult<SignUpOutcome>;

    async fn sign_out(&self) -> GatewayResult<()>;

    /// Authentication change notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

/// Row-level-secured table access, scoped to the signed-in user.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, query: &TableQuery) -> GatewayResult<Vec<Value>>;

    /// Insert one row, returning the stored representation (possibly empty).
    async fn insert(&self, table: &str, row: Value) -> GatewayResult<Vec<Value>>;

    /// Insert or merge on the `on_conflict` columns.
    async fn upsert(&self, table: &str, row: Value, on_conflict: &[&str])
        -> GatewayResult<Vec<Value>>;

    /// Patch every row matched by `query`'s filters.
    async fn update(&self, query: &TableQuery, patch: Value) -> GatewayResult<Vec<Value>>;
}

/// Both halves of the hosted service.
pub trait Backend: AuthGateway + RecordStore {}

impl<T: AuthGateway + RecordStore> Backend for T {}

/// Shared handle used throughout the application.
pub type SharedBackend = Arc<dyn Backend>;
