//! Application-owned records on top of the gateway.
//!
//! Profiles are created lazily, onboarding progress rolls the profile
//! counters forward, OTP codes are single-use, and notifications are best
//! effort. Row ownership is enforced by the service, not here.

mod clock;
mod error;
mod models;
mod notification;
mod otp;
mod profile;
mod progress;
mod reference;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{RecordsError, RecordsResult};
pub use models::{
    Notification, OnboardingProgress, OnboardingStep, OtpChannel, OtpIssued, OtpRecord, Profile,
    ProfileUpdate,
};
pub use notification::{Notifier, NOTIFICATIONS_TABLE};
pub use otp::{generate_code, OtpService, OTP_DIGITS, OTP_TABLE, OTP_TTL_MINUTES};
pub use profile::{ProfileRepository, PROFILES_TABLE};
pub use progress::{ProgressTracker, StepCompletion, PROGRESS_TABLE, TOTAL_STEPS};
pub use reference::{
    ReferenceDataCheck, ReferenceReport, TableCount, EXPECTED_RISK_QUESTIONS,
    OPTIONS_PER_QUESTION,
};

use std::sync::Arc;
use supabase_gateway::SharedBackend;

/// Every record service, sharing one backend and clock.
#[derive(Clone)]
pub struct OnboardingRecords {
    pub profiles: ProfileRepository,
    pub progress: ProgressTracker,
    pub otp: OtpService,
    pub notifier: Notifier,
    pub reference: ReferenceDataCheck,
}

impl OnboardingRecords {
    pub fn new(backend: SharedBackend) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: SharedBackend, clock: Arc<dyn Clock>) -> Self {
        let profiles = ProfileRepository::new(backend.clone(), clock.clone());
        Self {
            progress: ProgressTracker::new(backend.clone(), profiles.clone(), clock.clone()),
            otp: OtpService::new(backend.clone(), profiles.clone(), clock),
            notifier: Notifier::new(backend.clone()),
            reference: ReferenceDataCheck::new(backend),
            profiles,
        }
    }
}
