//! Row models for the application-owned tables.

use crate::{RecordsError, RecordsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

fn default_step() -> i32 {
    1
}

fn default_kyc_status() -> String {
    "pending".to_string()
}

/// Application-owned record keyed 1:1 by user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub pan_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub pincode: Option<String>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub annual_income: Option<String>,
    #[serde(default)]
    pub investment_experience: Option<String>,
    #[serde(default)]
    pub risk_profile: Option<String>,
    #[serde(default)]
    pub risk_score: Option<i32>,
    #[serde(default)]
    pub phone_verified: bool,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default = "default_kyc_status")]
    pub kyc_status: String,
    #[serde(default)]
    pub onboarding_completed: bool,
    #[serde(default)]
    pub completion_percentage: i32,
    #[serde(default = "default_step")]
    pub last_active_step: i32,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Partial profile patch. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pincode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annual_income: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investment_experience: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kyc_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_percentage: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_step: Option<i32>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ProfileUpdate::default()
    }

    /// Form-level checks run before anything is sent.
    pub fn validate(&self) -> RecordsResult<()> {
        if let Some(phone) = &self.phone {
            let digits = phone.trim().trim_start_matches("+91").trim();
            if digits.len() != 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("phone", "expected a 10-digit mobile number"));
            }
        }
        if let Some(pan) = &self.pan_number {
            if !is_valid_pan(pan) {
                return Err(invalid("pan_number", "expected format AAAAA9999A"));
            }
        }
        if let Some(pincode) = &self.pincode {
            if pincode.len() != 6 || !pincode.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("pincode", "expected 6 digits"));
            }
        }
        if let Some(dob) = &self.date_of_birth {
            if chrono::NaiveDate::parse_from_str(dob, "%Y-%m-%d").is_err() {
                return Err(invalid("date_of_birth", "expected YYYY-MM-DD"));
            }
        }
        if let Some(score) = self.risk_score {
            if !(0..=100).contains(&score) {
                return Err(invalid("risk_score", "expected 0-100"));
            }
        }
        if let Some(pct) = self.completion_percentage {
            if !(0..=100).contains(&pct) {
                return Err(invalid("completion_percentage", "expected 0-100"));
            }
        }
        if let Some(step) = self.last_active_step {
            if !(1..=crate::TOTAL_STEPS as i32).contains(&step) {
                return Err(invalid("last_active_step", "expected 1-5"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> RecordsError {
    RecordsError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}

/// Indian PAN: five letters, four digits, one letter.
fn is_valid_pan(pan: &str) -> bool {
    let bytes = pan.as_bytes();
    bytes.len() == 10
        && bytes[..5].iter().all(u8::is_ascii_uppercase)
        && bytes[5..9].iter().all(u8::is_ascii_digit)
        && bytes[9].is_ascii_uppercase()
}

/// Reference row describing one wizard step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingStep {
    pub id: Value,
    pub step_number: i32,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One row per (user, step).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub step_id: u32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub step_data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpChannel {
    Phone,
    Email,
}

impl OtpChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpChannel::Phone => "phone",
            OtpChannel::Email => "email",
        }
    }
}

impl fmt::Display for OtpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OtpChannel {
    type Err = RecordsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "phone" => Ok(OtpChannel::Phone),
            "email" => Ok(OtpChannel::Email),
            other => Err(invalid("channel", &format!("unknown channel '{other}'"))),
        }
    }
}

/// Stored one-time code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub id: String,
    pub user_id: String,
    pub channel: OtpChannel,
    pub contact: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: String,
}

/// What issuing a code reports back. Never carries the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpIssued {
    pub id: String,
    pub channel: OtpChannel,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub is_read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_tolerates_sparse_rows() {
        let profile: Profile =
            serde_json::from_value(json!({"id": "u1", "email": "a@example.com"})).unwrap();
        assert_eq!(profile.last_active_step, 1);
        assert_eq!(profile.kyc_status, "pending");
        assert!(!profile.onboarding_completed);
    }

    #[test]
    fn test_update_serializes_only_set_fields() {
        let update = ProfileUpdate {
            city: Some("Pune".into()),
            phone_verified: Some(true),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"city": "Pune", "phone_verified": true})
        );
        assert!(ProfileUpdate::default().is_empty());
    }

    #[test]
    fn test_update_validation() {
        let ok = ProfileUpdate {
            phone: Some("+91 9876543210".into()),
            pan_number: Some("ABCDE1234F".into()),
            pincode: Some("411001".into()),
            date_of_birth: Some("1990-04-12".into()),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad_pan = ProfileUpdate {
            pan_number: Some("abcde1234f".into()),
            ..Default::default()
        };
        assert!(matches!(
            bad_pan.validate(),
            Err(RecordsError::InvalidField { field: "pan_number", .. })
        ));

        let bad_step = ProfileUpdate {
            last_active_step: Some(6),
            ..Default::default()
        };
        assert!(bad_step.validate().is_err());
    }

    #[test]
    fn test_channel_parsing() {
        assert_eq!("Phone".parse::<OtpChannel>().unwrap(), OtpChannel::Phone);
        assert_eq!(
            serde_json::to_value(OtpChannel::Email).unwrap(),
            json!("email")
        );
        assert!("sms".parse::<OtpChannel>().is_err());
    }

    #[test]
    fn test_notification_kind_maps_to_type_column() {
        let n = Notification {
            id: None,
            user_id: "u1".into(),
            title: "Welcome".into(),
            message: "Hi".into(),
            kind: "welcome".into(),
            is_read: false,
        };
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], "welcome");
        assert!(value.get("id").is_none());
    }
}
