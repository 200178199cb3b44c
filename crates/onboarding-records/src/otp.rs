//! One-time code issuance and verification.
//!
//! Codes are stored, never sent anywhere. Only the newest unexpired,
//! unverified record for a (user, channel) pair is eligible. A code that
//! belongs to a superseded record reports "no valid code"; any other
//! mismatch leaves the newest record in place so the user can try again.

use crate::{
    Clock, OtpChannel, OtpIssued, OtpRecord, ProfileRepository, ProfileUpdate, RecordsError,
    RecordsResult,
};
use chrono::Duration;
use rand::Rng;
use std::sync::Arc;
use supabase_gateway::{db_timestamp, RecordStore, SharedBackend, TableQuery};
use tracing::{debug, info, warn};

pub const OTP_TABLE: &str = "otp_verifications";

/// How long an issued code stays valid.
pub const OTP_TTL_MINUTES: i64 = 10;

pub const OTP_DIGITS: usize = 6;

/// Uniform 6-digit code, leading zeros included.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:0width$}", rng.gen_range(0..1_000_000u32), width = OTP_DIGITS)
}

#[derive(Clone)]
pub struct OtpService {
    backend: SharedBackend,
    profiles: ProfileRepository,
    clock: Arc<dyn Clock>,
}

impl OtpService {
    pub fn new(backend: SharedBackend, profiles: ProfileRepository, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            profiles,
            clock,
        }
    }

    /// Store a fresh code for `contact` on `channel`.
    pub async fn issue(
        &self,
        user_id: &str,
        channel: OtpChannel,
        contact: &str,
    ) -> RecordsResult<OtpIssued> {
        let contact = contact.trim();
        if contact.is_empty() {
            return Err(RecordsError::InvalidField {
                field: "contact",
                reason: format!("{channel} is required"),
            });
        }

        let code = generate_code(&mut rand::thread_rng());
        let expires_at = self.clock.now() + Duration::minutes(OTP_TTL_MINUTES);
        let row = serde_json::json!({
            "user_id": user_id,
            "channel": channel,
            "contact": contact,
            "code": code,
            "expires_at": db_timestamp(expires_at),
            "is_verified": false,
        });

        let stored = self.backend.insert(OTP_TABLE, row).await?;
        let id = stored
            .first()
            .and_then(|r| r.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                RecordsError::Decode(format!("{OTP_TABLE} insert returned no record id"))
            })?;

        info!(user_id = %user_id, channel = %channel, otp_id = %id, "verification code issued");
        Ok(OtpIssued {
            id,
            channel,
            expires_at,
        })
    }

    /// Newest unexpired, unverified record for the pair.
    async fn latest_eligible(
        &self,
        user_id: &str,
        channel: OtpChannel,
    ) -> RecordsResult<Option<OtpRecord>> {
        let query = TableQuery::from(OTP_TABLE)
            .eq("user_id", user_id)
            .eq("channel", channel.as_str())
            .eq("is_verified", false)
            .gt("expires_at", db_timestamp(self.clock.now()))
            .order_desc("created_at")
            .limit(1);
        let rows = self.backend.select(&query).await?;
        rows.into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(RecordsError::from)
    }

    /// True when `code` belongs to an unexpired, unverified record other
    /// than the newest one.
    async fn is_superseded_code(
        &self,
        user_id: &str,
        channel: OtpChannel,
        newest_id: &str,
        code: &str,
    ) -> RecordsResult<bool> {
        let query = TableQuery::from(OTP_TABLE)
            .eq("user_id", user_id)
            .eq("channel", channel.as_str())
            .eq("is_verified", false)
            .eq("code", code)
            .gt("expires_at", db_timestamp(self.clock.now()));
        let rows = self.backend.select(&query).await?;
        Ok(rows
            .iter()
            .any(|row| row.get("id").and_then(|v| v.as_str()) != Some(newest_id)))
    }

    /// Check `code` against the newest eligible record and consume it on match.
    pub async fn verify(
        &self,
        user_id: &str,
        channel: OtpChannel,
        code: &str,
    ) -> RecordsResult<OtpRecord> {
        let record = self
            .latest_eligible(user_id, channel)
            .await?
            .ok_or(RecordsError::NoValidCode { channel })?;

        let code = code.trim();
        if record.code != code {
            if self
                .is_superseded_code(user_id, channel, &record.id, code)
                .await?
            {
                debug!(user_id = %user_id, channel = %channel, otp_id = %record.id, "superseded code");
                return Err(RecordsError::NoValidCode { channel });
            }
            debug!(user_id = %user_id, channel = %channel, otp_id = %record.id, "code mismatch");
            return Err(RecordsError::CodeMismatch { channel });
        }

        let now = self.clock.now();
        let query = TableQuery::from(OTP_TABLE)
            .eq("id", record.id.as_str())
            .eq("is_verified", false);
        let patch = serde_json::json!({
            "is_verified": true,
            "verified_at": db_timestamp(now),
        });
        let updated = self.backend.update(&query, patch).await?;
        let Some(row) = updated.into_iter().next() else {
            // Consumed by a concurrent verification.
            return Err(RecordsError::NoValidCode { channel });
        };
        let verified: OtpRecord = serde_json::from_value(row)?;
        info!(user_id = %user_id, channel = %channel, otp_id = %verified.id, "code verified");

        let flag = match channel {
            OtpChannel::Phone => ProfileUpdate {
                phone_verified: Some(true),
                ..Default::default()
            },
            OtpChannel::Email => ProfileUpdate {
                email_verified: Some(true),
                ..Default::default()
            },
        };
        if let Err(e) = self.profiles.update(user_id, &flag).await {
            warn!(user_id = %user_id, channel = %channel, error = %e, "failed to flag profile as verified");
        }

        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use supabase_gateway::{AuthGateway, MemoryBackend, UserIdentity};

    struct Fixture {
        backend: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
        otp: OtpService,
        profiles: ProfileRepository,
        user: UserIdentity,
    }

    async fn setup() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        backend.register_user("a@example.com", "secret-pass");
        let user = backend
            .sign_in_with_password("a@example.com", "secret-pass")
            .await
            .unwrap()
            .user;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let profiles = ProfileRepository::new(backend.clone(), clock.clone());
        profiles.fetch_or_create(&user).await.unwrap();
        let otp = OtpService::new(backend.clone(), profiles.clone(), clock.clone());
        Fixture {
            backend,
            clock,
            otp,
            profiles,
            user,
        }
    }

    fn stored_code(backend: &MemoryBackend, id: &str) -> String {
        backend
            .rows(OTP_TABLE)
            .into_iter()
            .find(|r| r["id"] == id)
            .and_then(|r| r["code"].as_str().map(str::to_string))
            .unwrap()
    }

    #[test]
    fn test_codes_are_six_digits_with_leading_zeros() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }

        struct Zero;
        impl rand::RngCore for Zero {
            fn next_u32(&mut self) -> u32 {
                0
            }
            fn next_u64(&mut self) -> u64 {
                0
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                dest.fill(0)
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
                dest.fill(0);
                Ok(())
            }
        }
        assert_eq!(generate_code(&mut Zero), "000000");
    }

    #[tokio::test]
    async fn test_issue_expires_in_ten_minutes() {
        let f = setup().await;
        let issued = f
            .otp
            .issue(&f.user.id, OtpChannel::Phone, "9876543210")
            .await
            .unwrap();
        assert_eq!(issued.expires_at, f.clock.now() + Duration::minutes(10));
        assert_eq!(f.backend.rows(OTP_TABLE).len(), 1);
    }

    #[tokio::test]
    async fn test_correct_code_verifies_once() {
        let f = setup().await;
        let issued = f
            .otp
            .issue(&f.user.id, OtpChannel::Phone, "9876543210")
            .await
            .unwrap();
        let code = stored_code(&f.backend, &issued.id);

        let record = f.otp.verify(&f.user.id, OtpChannel::Phone, &code).await.unwrap();
        assert!(record.is_verified);
        assert!(record.verified_at.is_some());

        let again = f.otp.verify(&f.user.id, OtpChannel::Phone, &code).await;
        assert_eq!(
            again.unwrap_err(),
            RecordsError::NoValidCode {
                channel: OtpChannel::Phone
            }
        );

        let profile = f.profiles.fetch(&f.user.id).await.unwrap().unwrap();
        assert!(profile.phone_verified);
        assert!(!profile.email_verified);
    }

    #[tokio::test]
    async fn test_mismatch_keeps_code_usable() {
        let f = setup().await;
        let issued = f
            .otp
            .issue(&f.user.id, OtpChannel::Email, "a@example.com")
            .await
            .unwrap();
        let code = stored_code(&f.backend, &issued.id);
        let wrong = if code == "000000" { "000001" } else { "000000" };

        let err = f.otp.verify(&f.user.id, OtpChannel::Email, wrong).await.unwrap_err();
        assert!(matches!(err, RecordsError::CodeMismatch { .. }));
        assert!(f.otp.verify(&f.user.id, OtpChannel::Email, &code).await.is_ok());
    }

    fn seed_code(f: &Fixture, code: &str, created_at: &str) -> String {
        let id = format!("otp-{code}");
        f.backend.seed(
            OTP_TABLE,
            vec![serde_json::json!({
                "id": id,
                "user_id": f.user.id,
                "channel": "phone",
                "contact": "9876543210",
                "code": code,
                "expires_at": db_timestamp(f.clock.now() + Duration::minutes(OTP_TTL_MINUTES)),
                "is_verified": false,
                "created_at": created_at,
            })],
        );
        id
    }

    #[tokio::test]
    async fn test_older_code_reports_no_valid_code() {
        let f = setup().await;
        seed_code(&f, "111111", "2024-01-01T10:00:00.000000Z");
        let newer = seed_code(&f, "222222", "2024-01-01T10:01:00.000000Z");

        let err = f
            .otp
            .verify(&f.user.id, OtpChannel::Phone, "111111")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RecordsError::NoValidCode {
                channel: OtpChannel::Phone
            }
        );

        // A plain typo is still a mismatch.
        let err = f
            .otp
            .verify(&f.user.id, OtpChannel::Phone, "333333")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RecordsError::CodeMismatch {
                channel: OtpChannel::Phone
            }
        );

        let verified = f
            .otp
            .verify(&f.user.id, OtpChannel::Phone, "222222")
            .await
            .unwrap();
        assert_eq!(verified.id, newer);
    }

    #[tokio::test]
    async fn test_issue_without_returned_row_fails() {
        let f = setup().await;
        f.backend.omit_representation(OTP_TABLE);

        let err = f
            .otp
            .issue(&f.user.id, OtpChannel::Phone, "9876543210")
            .await
            .unwrap_err();
        assert!(matches!(err, RecordsError::Decode(_)));
    }

    #[tokio::test]
    async fn test_expired_code_is_not_eligible() {
        let f = setup().await;
        let issued = f
            .otp
            .issue(&f.user.id, OtpChannel::Phone, "9876543210")
            .await
            .unwrap();
        let code = stored_code(&f.backend, &issued.id);

        f.clock.advance(Duration::minutes(10));
        let err = f.otp.verify(&f.user.id, OtpChannel::Phone, &code).await.unwrap_err();
        assert_eq!(
            err,
            RecordsError::NoValidCode {
                channel: OtpChannel::Phone
            }
        );
    }

    #[tokio::test]
    async fn test_channels_and_users_are_separate() {
        let f = setup().await;
        let issued = f
            .otp
            .issue(&f.user.id, OtpChannel::Phone, "9876543210")
            .await
            .unwrap();
        let code = stored_code(&f.backend, &issued.id);

        let err = f.otp.verify(&f.user.id, OtpChannel::Email, &code).await.unwrap_err();
        assert!(matches!(err, RecordsError::NoValidCode { .. }));

        // Another signed-in user cannot see the row at all.
        f.backend.swap_session_user(UserIdentity::new("other-user", "b@example.com"));
        let err = f.otp.verify("other-user", OtpChannel::Phone, &code).await.unwrap_err();
        assert!(matches!(err, RecordsError::NoValidCode { .. }));
    }

    #[tokio::test]
    async fn test_blank_contact_is_rejected() {
        let f = setup().await;
        let err = f.otp.issue(&f.user.id, OtpChannel::Phone, "  ").await.unwrap_err();
        assert!(matches!(err, RecordsError::InvalidField { field: "contact", .. }));
    }
}
