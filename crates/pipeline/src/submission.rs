//! Submission flow: normalize, dedup, stage, dispatch, count.
//!
//! A failed dispatch leaves the job Queued; [`SubmissionService::retry_dispatch`]
//! picks it up again without a second ledger entry.

use std::sync::Arc;

use autotune_core::error::CoreError;
use autotune_core::hashing::{endpoint_hash, fingerprint};
use autotune_core::profile::{normalize, Normalized, ProfileOverrides, RawProfile};
use autotune_core::retry::RetryPolicy;
use autotune_core::scheduling::clamp_days;
use autotune_core::types::DbId;
use autotune_db::counters::increment_counter;
use autotune_db::models::counter::{daily_counter_key, TOTAL_COUNTER_KEY};
use autotune_db::models::job::{Job, NewJob};
use autotune_db::models::status::JobStatus;
use autotune_db::CounterStore;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::dispatcher::{backend_job_name, DispatchError, JobDispatcher};
use crate::ledger::{JobLedger, LedgerError, SubmitOutcome};

/// Smallest pump basal step accepted (0.001 U/hr).
pub const MIN_BASAL_INCREMENT: Decimal = Decimal::from_parts(1, 0, 0, false, 3);
pub const MAX_BASAL_INCREMENT: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitRequest {
    #[validate(url)]
    pub endpoint: String,
    pub profile: RawProfile,
    #[serde(default)]
    pub overrides: ProfileOverrides,
    #[serde(default)]
    pub min_5m_carbimpact: Option<Decimal>,
    #[serde(default)]
    pub curve: Option<String>,
    #[serde(default)]
    pub uam_as_basal: bool,
    pub basal_increment: Decimal,
    #[validate(email)]
    pub email: String,
    #[validate(range(min = 1))]
    pub days: i32,
}

/// State of the backend side after a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchState {
    Dispatched { backend_job_name: String },
    /// Queued, dispatch can be retried.
    Pending { reason: String },
    /// The submission matched an existing job.
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionReceipt {
    pub outcome: SubmitOutcome,
    pub dispatch: DispatchState,
    pub warnings: Vec<String>,
}

pub struct SubmissionService {
    ledger: Arc<JobLedger>,
    dispatcher: Arc<JobDispatcher>,
    counters: Arc<dyn CounterStore>,
    counter_retry: RetryPolicy,
}

impl SubmissionService {
    pub fn new(
        ledger: Arc<JobLedger>,
        dispatcher: Arc<JobDispatcher>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            counters,
            counter_retry: RetryPolicy::default(),
        }
    }

    pub fn with_counter_retry(mut self, policy: RetryPolicy) -> Self {
        self.counter_retry = policy;
        self
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    pub fn prepare(&self, raw: &RawProfile, overrides: ProfileOverrides) -> Result<Normalized, CoreError> {
        Ok(normalize(raw, overrides)?)
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmissionReceipt, SubmissionError> {
        validate(&request)?;

        let normalized = self.prepare(&request.profile, request.overrides)?;
        let profile = normalized
            .profile
            .with_tuning_overrides(request.min_5m_carbimpact, request.curve.as_deref())?;

        let endpoint = request.endpoint.trim().trim_end_matches('/').to_string();
        let new_job = NewJob {
            endpoint_hash: endpoint_hash(&endpoint),
            fingerprint: fingerprint(&endpoint, &profile, request.uam_as_basal),
            profile: serde_json::to_value(&profile)
                .map_err(|e| CoreError::Internal(format!("profile encoding: {e}")))?,
            units: normalized.units.label().to_string(),
            timezone: normalized.timezone,
            uam_as_basal: request.uam_as_basal,
            basal_increment: request.basal_increment,
            email_results_to: request.email.trim().to_string(),
            days: clamp_days(request.days),
            endpoint,
        };

        let (outcome, dispatch) = match self.ledger.submit(new_job).await? {
            SubmitOutcome::Created { job, position } => {
                self.bump_counters().await;
                match self.dispatch_job(job.clone()).await {
                    Ok(dispatched) => {
                        let backend_job_name = dispatched
                            .backend_job_name
                            .clone()
                            .unwrap_or_else(|| backend_job_name(dispatched.id));
                        (
                            SubmitOutcome::Created { job: dispatched, position },
                            DispatchState::Dispatched { backend_job_name },
                        )
                    }
                    Err(e) => {
                        tracing::warn!(job_id = job.id, error = %e, "Dispatch pending");
                        let reason = e.to_string();
                        (SubmitOutcome::Created { job, position }, DispatchState::Pending { reason })
                    }
                }
            }
            other => (other, DispatchState::NotAttempted),
        };

        Ok(SubmissionReceipt {
            outcome,
            dispatch,
            warnings: normalized.warnings,
        })
    }

    /// Dispatch a job that is still Queued after an earlier failure.
    pub async fn retry_dispatch(&self, job_id: DbId) -> Result<Job, SubmissionError> {
        let job = self.ledger.find(job_id).await?;
        if job.status() != Some(JobStatus::Queued) {
            return Err(CoreError::Conflict(format!(
                "Job {job_id} is {}, only Queued jobs can be dispatched",
                job.status().map(JobStatus::name).unwrap_or("Unknown"),
            ))
            .into());
        }
        self.dispatch_job(job).await
    }

    async fn dispatch_job(&self, job: Job) -> Result<Job, SubmissionError> {
        let location = self.dispatcher.stage_profile(&job).await?;
        let handle = self
            .dispatcher
            .dispatch(&job, &location, job.created_at.date_naive())
            .await?;
        Ok(self.ledger.mark_dispatched(job, &handle.job_name).await?)
    }

    async fn bump_counters(&self) {
        let daily = daily_counter_key(Utc::now().date_naive());
        for key in [TOTAL_COUNTER_KEY, daily.as_str()] {
            if let Err(e) = increment_counter(&*self.counters, key, &self.counter_retry).await {
                tracing::warn!(key, error = %e, "Failed to bump job counter");
            }
        }
    }
}

fn validate(request: &SubmitRequest) -> Result<(), CoreError> {
    request
        .validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;
    if !request.endpoint.trim().to_ascii_lowercase().starts_with("https://") {
        return Err(CoreError::Validation("endpoint must use https".into()));
    }
    if request.basal_increment < MIN_BASAL_INCREMENT || request.basal_increment > MAX_BASAL_INCREMENT {
        return Err(CoreError::Validation(format!(
            "basal_increment must be between {MIN_BASAL_INCREMENT} and {MAX_BASAL_INCREMENT}"
        )));
    }
    Ok(())
}
