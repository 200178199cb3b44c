//! Sanity check of the seeded reference tables.
//!
//! The counts are asserted by the seed scripts, not enforced anywhere, so a
//! mismatch is reported as a warning and never fails the caller.

use crate::{OnboardingStep, RecordsError, RecordsResult, TOTAL_STEPS};
use serde_json::Value;
use std::collections::BTreeMap;
use supabase_gateway::{filter_text, RecordStore, SharedBackend, TableQuery};
use tracing::{info, warn};

pub const STEPS_TABLE: &str = "onboarding_steps";
pub const RISK_QUESTIONS_TABLE: &str = "risk_questions";
pub const RISK_OPTIONS_TABLE: &str = "risk_options";
pub const MUTUAL_FUNDS_TABLE: &str = "mutual_funds";

pub const EXPECTED_RISK_QUESTIONS: usize = 8;
pub const OPTIONS_PER_QUESTION: usize = 4;

/// Row count observed for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCount {
    pub table: &'static str,
    pub rows: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceReport {
    pub counts: Vec<TableCount>,
    pub warnings: Vec<String>,
}

impl ReferenceReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Clone)]
pub struct ReferenceDataCheck {
    backend: SharedBackend,
}

impl ReferenceDataCheck {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Wizard steps in order.
    pub async fn steps(&self) -> RecordsResult<Vec<OnboardingStep>> {
        let query = TableQuery::from(STEPS_TABLE).order_asc("step_number");
        self.backend
            .select(&query)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(RecordsError::from))
            .collect()
    }

    async fn read(&self, table: &'static str, report: &mut ReferenceReport) -> Option<Vec<Value>> {
        match self.backend.select(&TableQuery::from(table)).await {
            Ok(rows) => {
                report.counts.push(TableCount {
                    table,
                    rows: Some(rows.len()),
                });
                Some(rows)
            }
            Err(e) => {
                report.counts.push(TableCount { table, rows: None });
                report.warnings.push(format!("cannot read {table}: {e}"));
                None
            }
        }
    }

    pub async fn run(&self) -> ReferenceReport {
        let mut report = ReferenceReport::default();

        if let Some(steps) = self.read(STEPS_TABLE, &mut report).await {
            if steps.len() != TOTAL_STEPS as usize {
                report.warnings.push(format!(
                    "{STEPS_TABLE}: expected {TOTAL_STEPS} rows, found {}",
                    steps.len()
                ));
            }
        }

        if let Some(questions) = self.read(RISK_QUESTIONS_TABLE, &mut report).await {
            if questions.len() != EXPECTED_RISK_QUESTIONS {
                report.warnings.push(format!(
                    "{RISK_QUESTIONS_TABLE}: expected {EXPECTED_RISK_QUESTIONS} rows, found {}",
                    questions.len()
                ));
            }
        }

        if let Some(options) = self.read(RISK_OPTIONS_TABLE, &mut report).await {
            let expected = EXPECTED_RISK_QUESTIONS * OPTIONS_PER_QUESTION;
            if options.len() != expected {
                report.warnings.push(format!(
                    "{RISK_OPTIONS_TABLE}: expected {expected} rows, found {}",
                    options.len()
                ));
            }

            let mut per_question: BTreeMap<String, usize> = BTreeMap::new();
            for option in &options {
                let question = option.get("question_id").map(filter_text).unwrap_or_default();
                *per_question.entry(question).or_default() += 1;
            }
            for (question, count) in per_question {
                if count != OPTIONS_PER_QUESTION {
                    report.warnings.push(format!(
                        "{RISK_OPTIONS_TABLE}: question {question} has {count} options, expected {OPTIONS_PER_QUESTION}"
                    ));
                }
            }
        }

        if let Some(funds) = self.read(MUTUAL_FUNDS_TABLE, &mut report).await {
            if funds.is_empty() {
                report
                    .warnings
                    .push(format!("{MUTUAL_FUNDS_TABLE}: catalog is empty"));
            }
        }

        for warning in &report.warnings {
            warn!(warning = %warning, "reference data mismatch");
        }
        info!(warnings = report.warnings.len(), "reference data checked");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use supabase_gateway::{GatewayError, MemoryBackend, Operation};

    fn seed_complete(backend: &MemoryBackend) {
        backend.seed(
            STEPS_TABLE,
            (1..=5).map(|n| json!({"id": n, "step_number": n, "title": format!("Step {n}")})),
        );
        backend.seed(
            RISK_QUESTIONS_TABLE,
            (1..=8).map(|q| json!({"id": q, "question": format!("Q{q}")})),
        );
        backend.seed(
            RISK_OPTIONS_TABLE,
            (1..=8).flat_map(|q| (1..=4).map(move |o| json!({"question_id": q, "score": o}))),
        );
        backend.seed(MUTUAL_FUNDS_TABLE, vec![json!({"name": "Nifty 50 Index Fund"})]);
    }

    #[tokio::test]
    async fn test_complete_seed_is_clean() {
        let backend = Arc::new(MemoryBackend::new());
        seed_complete(&backend);

        let check = ReferenceDataCheck::new(backend.clone());
        let report = check.run().await;
        assert!(report.is_clean(), "{:?}", report.warnings);
        assert_eq!(report.counts.len(), 4);

        let steps = check.steps().await.unwrap();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0].step_number, 1);
    }

    #[tokio::test]
    async fn test_mismatches_are_warnings() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(STEPS_TABLE, (1..=4).map(|n| json!({"step_number": n, "title": "s"})));
        backend.seed(RISK_QUESTIONS_TABLE, (1..=8).map(|q| json!({"id": q})));
        backend.seed(
            RISK_OPTIONS_TABLE,
            (1..=8).flat_map(|q| {
                let n = if q == 3 { 3 } else { 4 };
                (0..n).map(move |_| json!({"question_id": q}))
            }),
        );
        backend.fail_next_on(
            Operation::Select,
            MUTUAL_FUNDS_TABLE,
            GatewayError::Unavailable { status: 503 },
        );

        let report = ReferenceDataCheck::new(backend).run().await;
        assert_eq!(report.warnings.len(), 4, "{:?}", report.warnings);
        assert!(report.warnings.iter().any(|w| w.contains("question 3 has 3 options")));
        assert!(report
            .counts
            .contains(&TableCount {
                table: MUTUAL_FUNDS_TABLE,
                rows: None
            }));
    }
}
