//! Per-step onboarding progress and the profile counters derived from it.

use crate::{
    Clock, OnboardingProgress, Profile, ProfileRepository, ProfileUpdate, RecordsError,
    RecordsResult,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use supabase_gateway::{db_timestamp, RecordStore, SharedBackend, TableQuery};
use tracing::info;

pub const PROGRESS_TABLE: &str = "onboarding_progress";

/// Number of steps in the onboarding wizard.
pub const TOTAL_STEPS: u32 = 5;

/// Outcome of completing a step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCompletion {
    pub progress: OnboardingProgress,
    pub profile: Profile,
}

#[derive(Clone)]
pub struct ProgressTracker {
    backend: SharedBackend,
    profiles: ProfileRepository,
    clock: Arc<dyn Clock>,
}

impl ProgressTracker {
    pub fn new(backend: SharedBackend, profiles: ProfileRepository, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            profiles,
            clock,
        }
    }

    /// The user's progress rows ordered by step.
    pub async fn progress(&self, user_id: &str) -> RecordsResult<Vec<OnboardingProgress>> {
        let query = TableQuery::from(PROGRESS_TABLE)
            .eq("user_id", user_id)
            .order_asc("step_id");
        let rows = self.backend.select(&query).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(RecordsError::from))
            .collect()
    }

    /// Mark `step_number` complete and roll the profile counters forward.
    pub async fn complete_step(
        &self,
        user_id: &str,
        step_number: u32,
        step_data: Value,
    ) -> RecordsResult<StepCompletion> {
        if !(1..=TOTAL_STEPS).contains(&step_number) {
            return Err(RecordsError::InvalidStep(step_number));
        }

        let row = serde_json::json!({
            "user_id": user_id,
            "step_id": step_number,
            "completed": true,
            "completed_at": db_timestamp(self.clock.now()),
            "step_data": step_data,
        });
        let stored = self
            .backend
            .upsert(PROGRESS_TABLE, row.clone(), &["user_id", "step_id"])
            .await?
            .into_iter()
            .next()
            .unwrap_or(row);
        let progress: OnboardingProgress = serde_json::from_value(stored)?;

        let completed: BTreeSet<u32> = self
            .progress(user_id)
            .await?
            .into_iter()
            .filter(|p| p.completed && (1..=TOTAL_STEPS).contains(&p.step_id))
            .map(|p| p.step_id)
            .collect();
        let done = completed.len() as u32;

        let update = ProfileUpdate {
            completion_percentage: Some((done * 100 / TOTAL_STEPS) as i32),
            last_active_step: Some((step_number + 1).min(TOTAL_STEPS) as i32),
            onboarding_completed: (done == TOTAL_STEPS).then_some(true),
            ..Default::default()
        };
        let profile = self.profiles.update(user_id, &update).await?;

        info!(
            user_id = %user_id,
            step = step_number,
            completed_steps = done,
            onboarding_completed = profile.onboarding_completed,
            "onboarding step completed"
        );
        Ok(StepCompletion { progress, profile })
    }
}
