//! Auth-side models shared by the gateway implementations.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Format a timestamp the way rows store it (UTC, microseconds, `Z`).
///
/// A single fixed format keeps string comparison consistent with time order.
pub fn db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Service-issued user identity. Immutable from the client's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<String>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: Some(email.into()),
            email_confirmed_at: None,
        }
    }
}

/// Cached copy of a service-issued session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserIdentity,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when the session expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

/// Kind of authentication change broadcast by a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Authentication change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

impl AuthChange {
    pub fn new(event: AuthChangeEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }

    pub fn user(&self) -> Option<&UserIdentity> {
        self.session.as_ref().map(|s| &s.user)
    }
}

/// Result of a sign-up call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// Email confirmation disabled: the user is signed in right away.
    SignedIn(Session),
    /// The service sent a confirmation email; no session yet.
    ConfirmationRequired(UserIdentity),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session_expiring_at(at: DateTime<Utc>) -> Session {
        Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: at,
            user: UserIdentity::new("user-1", "a@example.com"),
        }
    }

    #[test]
    fn test_session_expiry_checks() {
        let expires = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let session = session_expiring_at(expires);

        assert!(!session.is_expired(expires - Duration::seconds(1)));
        assert!(session.is_expired(expires));
        assert!(session.expires_within(expires - Duration::seconds(30), Duration::seconds(60)));
        assert!(!session.expires_within(expires - Duration::seconds(120), Duration::seconds(60)));
    }

    #[test]
    fn test_db_timestamp_orders_lexicographically() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let later = earlier + Duration::microseconds(1);

        let a = db_timestamp(earlier);
        let b = db_timestamp(later);
        assert_eq!(a, "2026-01-01T09:00:00.000000Z");
        assert!(a < b);
    }

    #[test]
    fn test_user_identity_deserializes_without_optional_fields() {
        let user: UserIdentity = serde_json::from_str(r#"{"id":"u1"}"#).unwrap();
        assert_eq!(user.id, "u1");
        assert!(user.email.is_none());
    }
}
