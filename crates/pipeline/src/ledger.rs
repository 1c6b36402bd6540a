//! Deduplicating job ledger.
//!
//! Sits on a [`LedgerStore`] and consults the execution backend to tell a
//! job that is still running from one the backend has lost.
//!
//! The in-flight lookup and the insert in [`JobLedger::submit`] are two
//! separate store calls, so two concurrent submissions of the same inputs can
//! both create a job. The PostgreSQL migration carries an opt-in partial
//! unique index that turns the second insert into a database error instead.

use std::sync::Arc;

use autotune_cloud::{BackendError, ExecutionBackend, RUN_STEP};
use autotune_core::hashing::endpoint_hash;
use autotune_core::scheduling::{state_machine, IN_FLIGHT_STATUSES};
use autotune_core::types::{DbId, Timestamp};
use autotune_db::models::job::{Job, NewJob};
use autotune_db::models::status::JobStatus;
use autotune_db::{LedgerStore, StoreError};
use chrono::Utc;
use serde::Serialize;

/// Result text stored on a job whose backend task disappeared.
pub const MISSING_TASK_RESULT: &str = "task missing from execution backend";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job {0} not found")]
    NotFound(DbId),

    #[error("{0}")]
    InvalidTransition(String),
}

/// What [`JobLedger::submit`] did with a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// A new Queued job. `position` counts Queued jobs up to and including it.
    Created { job: Job, position: i64 },

    /// An equal job is already waiting for dispatch.
    AlreadyQueued { job_id: DbId, position: i64 },

    /// An equal job is on the backend. `position` is only known while it has
    /// not started.
    AlreadyRunning {
        job_id: DbId,
        started_at: Option<Timestamp>,
        position: Option<i64>,
    },
}

/// Terminal fields written by the completion handler.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub started_at: Option<Timestamp>,
    pub completed_at: Timestamp,
    pub result: Option<String>,
    pub failed: bool,
    pub commit: Option<String>,
}

pub struct JobLedger {
    store: Arc<dyn LedgerStore>,
    backend: Arc<dyn ExecutionBackend>,
}

impl JobLedger {
    pub fn new(store: Arc<dyn LedgerStore>, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self { store, backend }
    }

    /// Queue a job unless an equal one is already in flight.
    ///
    /// An in-flight Dispatched job whose backend task can no longer be found
    /// is expired first and the submission proceeds as if it were absent.
    pub async fn submit(&self, new_job: NewJob) -> Result<SubmitOutcome, LedgerError> {
        if let Some(found) = self
            .store
            .find_in_flight_by_fingerprint(&new_job.fingerprint)
            .await?
        {
            if let Some(outcome) = self.existing_outcome(&found).await? {
                tracing::info!(
                    job_id = found.id,
                    fingerprint = %new_job.fingerprint,
                    status = found.status().map(JobStatus::name).unwrap_or("Unknown"),
                    "Duplicate submission",
                );
                return Ok(outcome);
            }
        }

        let job = self.store.insert(&new_job).await?;
        let position = self
            .store
            .count_up_to(&[JobStatus::Queued.id()], job.id)
            .await?;
        tracing::info!(
            job_id = job.id,
            fingerprint = %job.fingerprint,
            position,
            "Job queued",
        );
        Ok(SubmitOutcome::Created { job, position })
    }

    /// `None` when `found` turned out to be stale and was expired.
    async fn existing_outcome(&self, found: &Job) -> Result<Option<SubmitOutcome>, LedgerError> {
        match found.status() {
            Some(JobStatus::Queued) => {
                let position = self
                    .store
                    .count_up_to(&[JobStatus::Queued.id()], found.id)
                    .await?;
                Ok(Some(SubmitOutcome::AlreadyQueued {
                    job_id: found.id,
                    position,
                }))
            }
            Some(JobStatus::Dispatched) => {
                let Some(name) = found.backend_job_name.as_deref() else {
                    self.expire(found.clone()).await?;
                    return Ok(None);
                };

                let started_at = match self.backend.step_outcome(name, RUN_STEP).await {
                    Ok(outcome) => outcome.start_time,
                    Err(BackendError::NotFound(_)) => {
                        self.expire(found.clone()).await?;
                        return Ok(None);
                    }
                    Err(e) => {
                        tracing::warn!(
                            job_id = found.id,
                            backend_job_name = name,
                            error = %e,
                            "Backend lookup failed; treating job as running",
                        );
                        None
                    }
                };

                let position = match started_at {
                    Some(_) => None,
                    None => Some(self.store.count_up_to(&IN_FLIGHT_STATUSES, found.id).await?),
                };
                Ok(Some(SubmitOutcome::AlreadyRunning {
                    job_id: found.id,
                    started_at,
                    position,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn expire(&self, mut job: Job) -> Result<Job, LedgerError> {
        transition(&job, JobStatus::Expired)?;
        let seen = job.status_id;
        job.status_id = JobStatus::Expired.id();
        job.failed = true;
        job.result = Some(MISSING_TASK_RESULT.to_string());
        job.completed_at = Some(Utc::now());
        let Some(job) = self.store.replace(&job, &[seen]).await? else {
            // Settled by a callback in the meantime.
            return self.find(job.id).await;
        };
        tracing::warn!(
            job_id = job.id,
            backend_job_name = job.backend_job_name.as_deref().unwrap_or(""),
            "Expired job missing from execution backend",
        );
        Ok(job)
    }

    /// Record the backend job name of a Queued job.
    ///
    /// The write only lands while the stored job is still Queued. A job the
    /// completion callback already settled is returned unchanged.
    pub async fn mark_dispatched(
        &self,
        mut job: Job,
        backend_job_name: &str,
    ) -> Result<Job, LedgerError> {
        transition(&job, JobStatus::Dispatched)?;
        job.status_id = JobStatus::Dispatched.id();
        job.backend_job_name = Some(backend_job_name.to_string());
        let sources = state_machine::valid_sources(JobStatus::Dispatched.id());
        match self.store.replace(&job, &sources).await? {
            Some(job) => {
                tracing::info!(job_id = job.id, backend_job_name, "Job dispatched");
                Ok(job)
            }
            None => {
                let current = self.find(job.id).await?;
                if state_machine::is_terminal(current.status_id) {
                    tracing::info!(
                        job_id = current.id,
                        backend_job_name,
                        status = current.status().map(JobStatus::name).unwrap_or("Unknown"),
                        "Job settled before its dispatch was recorded",
                    );
                    return Ok(current);
                }
                Err(LedgerError::InvalidTransition(format!(
                    "Job {} is no longer Queued",
                    current.id
                )))
            }
        }
    }

    /// Write a terminal outcome. Repeating it overwrites the same fields.
    pub async fn record_outcome(&self, mut job: Job, outcome: JobOutcome) -> Result<Job, LedgerError> {
        transition(&job, outcome.status)?;
        job.status_id = outcome.status.id();
        job.started_at = outcome.started_at.or(job.started_at);
        job.completed_at = Some(outcome.completed_at);
        job.result = outcome.result;
        job.failed = outcome.failed;
        if outcome.commit.is_some() {
            job.tool_commit = outcome.commit;
        }
        let sources = state_machine::valid_sources(outcome.status.id());
        let Some(job) = self.store.replace(&job, &sources).await? else {
            let current = self.find(job.id).await?;
            return Err(LedgerError::InvalidTransition(format!(
                "Job {} cannot move from {} to {}",
                current.id,
                state_machine::status_name(current.status_id),
                outcome.status.name(),
            )));
        };
        tracing::info!(
            job_id = job.id,
            status = outcome.status.name(),
            failed = job.failed,
            "Job outcome recorded",
        );
        Ok(job)
    }

    pub async fn find(&self, id: DbId) -> Result<Job, LedgerError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(LedgerError::NotFound(id))
    }

    /// A job, provided it was submitted for `endpoint`. Any mismatch is
    /// reported as `NotFound`.
    pub async fn find_for_endpoint(&self, id: DbId, endpoint: &str) -> Result<Job, LedgerError> {
        let job = self.find(id).await?;
        if job.endpoint_hash != endpoint_hash(endpoint) {
            return Err(LedgerError::NotFound(id));
        }
        Ok(job)
    }

    /// Jobs for a site, newest first.
    pub async fn history(&self, endpoint: &str) -> Result<Vec<Job>, LedgerError> {
        Ok(self
            .store
            .list_by_endpoint_hash(&endpoint_hash(endpoint))
            .await?)
    }

    /// Delete a site's jobs submitted with `email`. Returns the count removed.
    pub async fn delete_history(&self, endpoint: &str, email: &str) -> Result<u64, LedgerError> {
        let removed = self
            .store
            .delete_by_endpoint_hash_and_email(&endpoint_hash(endpoint), email)
            .await?;
        tracing::info!(removed, "Job history deleted");
        Ok(removed)
    }

    pub async fn health_check(&self) -> Result<(), LedgerError> {
        Ok(self.store.health_check().await?)
    }
}

fn transition(job: &Job, to: JobStatus) -> Result<(), LedgerError> {
    state_machine::validate_transition(job.status_id, to.id()).map_err(LedgerError::InvalidTransition)
}
