//! Profile fetch-or-create and updates.

use crate::{Clock, Profile, ProfileUpdate, RecordsError, RecordsResult};
use serde_json::Value;
use std::sync::Arc;
use supabase_gateway::{
    db_timestamp, GatewayError, RecordStore, SharedBackend, TableQuery, UserIdentity,
};
use tracing::{debug, info, warn};

pub const PROFILES_TABLE: &str = "profiles";

#[derive(Clone)]
pub struct ProfileRepository {
    backend: SharedBackend,
    clock: Arc<dyn Clock>,
}

impl ProfileRepository {
    pub fn new(backend: SharedBackend, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// The user's profile, or `None` when no row exists.
    pub async fn fetch(&self, user_id: &str) -> RecordsResult<Option<Profile>> {
        let query = TableQuery::from(PROFILES_TABLE).eq("id", user_id).limit(1);
        let rows = self.backend.select(&query).await?;
        rows.into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(RecordsError::from)
    }

    /// Return exactly one profile for `user`, creating it when absent.
    pub async fn fetch_or_create(&self, user: &UserIdentity) -> RecordsResult<Profile> {
        match self.fetch(&user.id).await {
            Ok(Some(profile)) => {
                debug!(user_id = %user.id, "profile found");
                return Ok(profile);
            }
            Ok(None) => {}
            Err(RecordsError::Gateway(e)) if e.is_policy_denied() => {
                return Err(self.diagnose_denial(&user.id, e).await);
            }
            Err(e) => return Err(e),
        }

        info!(user_id = %user.id, "no profile yet, creating");
        let seed = serde_json::json!({
            "id": user.id,
            "email": user.email.clone().unwrap_or_default(),
        });

        match self.backend.insert(PROFILES_TABLE, seed).await {
            Ok(rows) => {
                if let Some(row) = rows.into_iter().next() {
                    return Ok(serde_json::from_value(row)?);
                }
                debug!(user_id = %user.id, "insert returned no row, re-fetching");
            }
            Err(GatewayError::Conflict { .. }) => {
                debug!(user_id = %user.id, "profile created concurrently, re-fetching");
            }
            Err(e) if e.is_policy_denied() => {
                return Err(self.diagnose_denial(&user.id, e).await);
            }
            Err(e) => return Err(e.into()),
        }

        self.fetch(&user.id)
            .await?
            .ok_or_else(|| RecordsError::ProfileMissingAfterCreate {
                user_id: user.id.clone(),
            })
    }

    /// Tell a denied row apart from an unreadable table with an unfiltered probe.
    async fn diagnose_denial(&self, user_id: &str, cause: GatewayError) -> RecordsError {
        warn!(user_id = %user_id, error = %cause, "profile access denied, probing table");
        let probe = TableQuery::from(PROFILES_TABLE).select("id").limit(1);
        match self.backend.select(&probe).await {
            Ok(_) => RecordsError::ProfileAccessDenied {
                user_id: user_id.to_string(),
            },
            Err(probe_error) => RecordsError::ProfilesTableUnreachable(probe_error),
        }
    }

    /// Patch the profile and return the stored result.
    pub async fn update(&self, user_id: &str, update: &ProfileUpdate) -> RecordsResult<Profile> {
        update.validate()?;

        let mut patch = serde_json::to_value(update)?;
        if let Value::Object(fields) = &mut patch {
            fields.insert(
                "updated_at".to_string(),
                Value::String(db_timestamp(self.clock.now())),
            );
        }

        let query = TableQuery::from(PROFILES_TABLE).eq("id", user_id);
        let rows = self.backend.update(&query, patch).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| RecordsError::ProfileNotFound {
                user_id: user_id.to_string(),
            })?;
        debug!(user_id = %user_id, "profile updated");
        Ok(serde_json::from_value(row)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemClock;
    use supabase_gateway::{AuthGateway, MemoryBackend, Operation};

    async fn setup() -> (Arc<MemoryBackend>, ProfileRepository, UserIdentity) {
        let backend = Arc::new(MemoryBackend::new());
        backend.register_user("a@example.com", "secret-pass");
        let session = backend
            .sign_in_with_password("a@example.com", "secret-pass")
            .await
            .unwrap();
        let repo = ProfileRepository::new(backend.clone(), Arc::new(SystemClock));
        (backend, repo, session.user)
    }

    #[tokio::test]
    async fn test_creates_single_profile_seeded_with_email() {
        let (backend, repo, user) = setup().await;

        let profile = repo.fetch_or_create(&user).await.unwrap();
        assert_eq!(profile.id, user.id);
        assert_eq!(profile.email.as_deref(), Some("a@example.com"));
        assert_eq!(backend.rows(PROFILES_TABLE).len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_or_create_is_idempotent() {
        let (backend, repo, user) = setup().await;

        let first = repo.fetch_or_create(&user).await.unwrap();
        let second = repo.fetch_or_create(&user).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.rows(PROFILES_TABLE).len(), 1);
        assert_eq!(backend.calls(Operation::Insert), 1);
    }

    #[tokio::test]
    async fn test_missing_representation_refetches_once() {
        let (backend, repo, user) = setup().await;
        backend.omit_representation(PROFILES_TABLE);

        let profile = repo.fetch_or_create(&user).await.unwrap();
        assert_eq!(profile.id, user.id);
        assert_eq!(backend.calls(Operation::Select), 2);
    }

    #[tokio::test]
    async fn test_concurrent_create_settles_on_one_row() {
        let (backend, repo, user) = setup().await;
        backend.delay_next(Operation::Insert, std::time::Duration::from_millis(20));

        let (first, second) = tokio::join!(repo.fetch_or_create(&user), repo.fetch_or_create(&user));
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(backend.rows(PROFILES_TABLE).len(), 1);
        assert_eq!(backend.calls(Operation::Insert), 2);
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_propagates() {
        let (backend, repo, user) = setup().await;
        backend.fail_next_on(Operation::Select, PROFILES_TABLE, GatewayError::Timeout);

        let err = repo.fetch_or_create(&user).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(backend.calls(Operation::Insert), 0);
    }

    #[tokio::test]
    async fn test_denied_row_with_readable_table() {
        let (backend, repo, user) = setup().await;
        backend.fail_next_on(
            Operation::Select,
            PROFILES_TABLE,
            GatewayError::policy_denied(PROFILES_TABLE, "select"),
        );

        let err = repo.fetch_or_create(&user).await.unwrap_err();
        assert_eq!(
            err,
            RecordsError::ProfileAccessDenied {
                user_id: user.id.clone()
            }
        );
    }

    #[tokio::test]
    async fn test_denied_row_with_unreadable_table() {
        let (backend, repo, user) = setup().await;
        for _ in 0..2 {
            backend.fail_next_on(
                Operation::Select,
                PROFILES_TABLE,
                GatewayError::policy_denied(PROFILES_TABLE, "select"),
            );
        }

        let err = repo.fetch_or_create(&user).await.unwrap_err();
        assert!(matches!(err, RecordsError::ProfilesTableUnreachable(_)));
    }

    #[tokio::test]
    async fn test_update_patches_and_stamps() {
        let (_backend, repo, user) = setup().await;
        repo.fetch_or_create(&user).await.unwrap();

        let updated = repo
            .update(
                &user.id,
                &ProfileUpdate {
                    full_name: Some("Asha Rao".into()),
                    city: Some("Pune".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Asha Rao"));
        assert!(updated.updated_at.is_some());
        assert_eq!(updated.email.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_fields_before_sending() {
        let (backend, repo, user) = setup().await;
        let err = repo
            .update(
                &user.id,
                &ProfileUpdate {
                    pincode: Some("12".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecordsError::InvalidField { field: "pincode", .. }));
        assert_eq!(backend.calls(Operation::Update), 0);
    }
}
