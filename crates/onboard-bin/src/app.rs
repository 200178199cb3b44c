//! Command handlers.

use crate::output;
use auth_orchestrator::{AuthHandle, AuthOrchestrator};
use onboard_config_and_utils::{validate, Config, Paths};
use onboarding_records::{OnboardingRecords, OtpChannel};
use reachability_probe::{FixedProbe, HttpProbe, Probe};
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;
use supabase_gateway::{SessionCache, SharedBackend, SignUpOutcome, SupabaseClient};
use tracing::{info, warn};

type AppResult<T> = Result<T, Box<dyn Error>>;

pub fn check_config(config: &Config) -> AppResult<()> {
    let report = validate(config);
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for issue in &report.errors {
        println!("error: {issue}");
    }
    if report.is_ok() {
        println!("configuration ok ({})", config.api_url());
    }
    report.into_result()?;
    Ok(())
}

pub async fn probe(config: &Config) -> AppResult<()> {
    let reachability = HttpProbe::from_config(config)?.probe().await;
    output::print_reachability(&reachability);
    Ok(())
}

/// Validate the configuration, then start the auth runtime on the hosted backend.
pub async fn connect(config: &Config, paths: &Paths, no_probe: bool) -> AppResult<Client> {
    for warning in validate(config).into_result()? {
        warn!(warning = %warning, "suspicious configuration");
    }

    let client = SupabaseClient::from_config(config)?
        .with_session_cache(SessionCache::new(paths.session_file()))?;
    let backend: SharedBackend = Arc::new(client);
    let probe: Arc<dyn Probe> = if no_probe {
        Arc::new(FixedProbe::reachable())
    } else {
        Arc::new(HttpProbe::from_config(config)?)
    };

    let records = OnboardingRecords::new(backend.clone());
    let auth = AuthOrchestrator::new(backend, records)
        .with_probe(probe)
        .start();
    info!(endpoint = %config.api_url(), "auth runtime started");
    Ok(Client { auth })
}

/// Running auth runtime plus the commands that need it.
pub struct Client {
    auth: AuthHandle,
}

impl Client {
    pub async fn shutdown(&self) {
        self.auth.shutdown().await;
    }

    pub async fn status(&self) -> AppResult<()> {
        let snapshot = self.auth.settled().await?;
        output::print_snapshot(&snapshot)?;
        Ok(())
    }

    pub async fn watch(&self) -> AppResult<()> {
        let mut snapshots = self.auth.subscribe();
        output::print_snapshot(&snapshots.borrow_and_update())?;
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    output::print_snapshot(&snapshots.borrow_and_update())?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, stopping watch");
                    return Ok(());
                }
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<()> {
        self.auth.settled().await?;
        let snapshot = self.auth.sign_in(email, password).await?;
        output::print_snapshot(&snapshot)?;
        Ok(())
    }

    pub async fn sign_up(&self, email: &str, password: &str, full_name: Option<&str>) -> AppResult<()> {
        self.auth.settled().await?;
        match self.auth.sign_up(email, password, full_name).await? {
            SignUpOutcome::SignedIn(_) => output::print_snapshot(&self.auth.settled().await?)?,
            SignUpOutcome::ConfirmationRequired(user) => println!(
                "account created for {}; confirm the email address, then sign in",
                user.email.as_deref().unwrap_or(email)
            ),
        }
        Ok(())
    }

    pub async fn sign_out(&self) -> AppResult<()> {
        self.auth.settled().await?;
        let snapshot = self.auth.sign_out().await?;
        output::print_snapshot(&snapshot)?;
        Ok(())
    }

    pub async fn issue_otp(&self, channel: OtpChannel, contact: &str) -> AppResult<()> {
        self.auth.settled().await?;
        let issued = self.auth.issue_otp(channel, contact).await?;
        println!(
            "{} code issued (id {}), valid until {}",
            issued.channel,
            issued.id,
            issued.expires_at.to_rfc3339()
        );
        Ok(())
    }

    pub async fn verify_otp(&self, channel: OtpChannel, code: &str) -> AppResult<()> {
        self.auth.settled().await?;
        let record = self.auth.verify_otp(channel, code).await?;
        println!("{} {} verified", record.channel, record.contact);
        Ok(())
    }

    pub async fn complete_step(&self, step: u32, data: Option<&str>) -> AppResult<()> {
        let data = match data {
            Some(raw) => serde_json::from_str(raw)?,
            None => Value::Object(Default::default()),
        };
        self.auth.settled().await?;
        let completion = self.auth.complete_step(step, data).await?;
        println!(
            "step {step} complete: {}% done, next step {}{}",
            completion.profile.completion_percentage,
            completion.profile.last_active_step,
            if completion.profile.onboarding_completed {
                " (onboarding finished)"
            } else {
                ""
            }
        );
        Ok(())
    }

    pub async fn reference_check(&self) -> AppResult<()> {
        let report = self.auth.records().reference.run().await;
        output::print_reference_report(&report);
        Ok(())
    }
}
