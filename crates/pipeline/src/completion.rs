//! Completion callback: settle the job and send its report.
//!
//! Every path that gets past the key check ends with the job in a terminal
//! state and one report handed to the transport. The ledger write happens
//! before the report is sent, so a transport failure never loses the outcome.
//! A failed ledger write still sends the report and is returned afterwards.

use std::sync::Arc;

use autotune_cloud::{ExecutionBackend, ObjectStore, StepOutcome, RUN_STEP};
use autotune_core::results::{parse_recommendations, BasalRounding, ParseOptions, ParsedResult, RunError};
use autotune_core::types::{DbId, Timestamp};
use autotune_db::models::job::Job;
use autotune_db::models::setting::TOOL_COMMIT_KEY;
use autotune_db::models::status::JobStatus;
use autotune_db::SettingStore;
use autotune_events::{Attachment, Report, ReportContext, ReportTransport};
use chrono::Utc;
use serde::Serialize;

use crate::dispatcher::{backend_job_name, history_window, PROFILE_OBJECT, RECOMMENDATIONS_LOG};
use crate::ledger::{JobLedger, JobOutcome, LedgerError};

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Callback key mismatch")]
    Unauthorized,

    #[error("Unknown job reference '{0}'")]
    UnknownJob(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionSummary {
    pub job_id: DbId,
    pub status: JobStatus,
    pub failed: bool,
    pub report_sent: bool,
}

pub struct CompletionHandler {
    ledger: Arc<JobLedger>,
    backend: Arc<dyn ExecutionBackend>,
    objects: Arc<dyn ObjectStore>,
    transport: Arc<dyn ReportTransport>,
    settings: Arc<dyn SettingStore>,
    callback_key: String,
    rounding: BasalRounding,
}

/// Outcome of the run step, before anything is written.
struct RunReport {
    started_at: Option<Timestamp>,
    completed_at: Timestamp,
    parsed: Result<ParsedResult, RunError>,
    /// Raw log text when it could be fetched.
    log: Option<String>,
}

impl CompletionHandler {
    pub fn new(
        ledger: Arc<JobLedger>,
        backend: Arc<dyn ExecutionBackend>,
        objects: Arc<dyn ObjectStore>,
        transport: Arc<dyn ReportTransport>,
        settings: Arc<dyn SettingStore>,
        callback_key: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            backend,
            objects,
            transport,
            settings,
            callback_key: callback_key.into(),
            rounding: BasalRounding::default(),
        }
    }

    pub fn with_rounding(mut self, rounding: BasalRounding) -> Self {
        self.rounding = rounding;
        self
    }

    pub async fn on_callback(
        &self,
        job_ref: &str,
        key: &str,
        commit: Option<&str>,
    ) -> Result<CompletionSummary, CompletionError> {
        if !keys_match(key, &self.callback_key) {
            tracing::warn!(job_ref, "Completion callback with a bad key");
            return Err(CompletionError::Unauthorized);
        }

        let job_id: DbId = job_ref
            .trim()
            .parse()
            .map_err(|_| CompletionError::UnknownJob(job_ref.to_string()))?;
        let job = match self.ledger.find(job_id).await {
            Ok(job) => job,
            Err(LedgerError::NotFound(_)) => return Err(CompletionError::UnknownJob(job_ref.to_string())),
            Err(e) => return Err(e.into()),
        };
        let commit = commit.map(str::trim).filter(|c| !c.is_empty());
        let container = job
            .backend_job_name
            .clone()
            .unwrap_or_else(|| backend_job_name(job.id));

        let run = self.evaluate_run(&job, &container).await;
        let attachments = self.collect_attachments(&container).await;

        let failed = run.parsed.is_err();
        let result_text = match (&run.parsed, &run.log) {
            (Ok(_), log) => log.clone(),
            (Err(e), Some(log)) => Some(format!("{e}\n\n{log}")),
            (Err(e), None) => Some(e.to_string()),
        };
        let status = if failed { JobStatus::Failed } else { JobStatus::Completed };

        let recorded = self
            .ledger
            .record_outcome(
                job.clone(),
                JobOutcome {
                    status,
                    started_at: run.started_at,
                    completed_at: run.completed_at,
                    result: result_text,
                    failed,
                    commit: commit.map(str::to_string),
                },
            )
            .await;
        if let Err(e) = &recorded {
            tracing::error!(job_id = job.id, error = %e, "Failed to record job outcome");
        }

        let report = match &run.parsed {
            Ok(parsed) => {
                let (start_date, end_date) = history_window(job.created_at.date_naive(), job.days);
                let ctx = ReportContext {
                    endpoint: job.endpoint.clone(),
                    start_date,
                    end_date,
                    uam_as_basal: job.uam_as_basal,
                    basal_increment: job.basal_increment,
                    days: job.day_window(),
                    commit: commit.map(str::to_string),
                };
                Report::success(job.email_results_to.clone(), &ctx, parsed, attachments)
            }
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "Tuning run failed");
                Report::failure(job.email_results_to.clone(), attachments)
            }
        };

        let report_sent = match self.transport.send(&report).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "Failed to send report");
                false
            }
        };

        let job = recorded?;
        if let Some(commit) = commit {
            if let Err(e) = self.settings.insert_or_replace(TOOL_COMMIT_KEY, commit).await {
                tracing::warn!(job_id = job.id, error = %e, "Failed to record tool commit");
            }
        }

        tracing::info!(
            job_id = job.id,
            status = status.name(),
            failed,
            report_sent,
            "Completion handled",
        );
        Ok(CompletionSummary {
            job_id: job.id,
            status,
            failed,
            report_sent,
        })
    }

    async fn evaluate_run(&self, job: &Job, container: &str) -> RunReport {
        let outcome = match self.backend.step_outcome(container, RUN_STEP).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return RunReport {
                    started_at: None,
                    completed_at: Utc::now(),
                    parsed: Err(RunError::OutcomeUnavailable(e.to_string())),
                    log: None,
                }
            }
        };
        let succeeded = outcome.succeeded();
        let StepOutcome {
            exit_code,
            start_time,
            end_time,
        } = outcome;
        let mut run = RunReport {
            started_at: start_time,
            completed_at: end_time.unwrap_or_else(Utc::now),
            parsed: Err(RunError::OutcomeUnavailable("run step has not finished".into())),
            log: None,
        };

        if !succeeded {
            if let Some(code) = exit_code {
                run.parsed = Err(RunError::ToolFailed { exit_code: code });
            }
            return run;
        }

        let log = match self.objects.get(container, RECOMMENDATIONS_LOG).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                run.parsed = Err(RunError::MissingLog(e.to_string()));
                return run;
            }
        };

        let mut options = ParseOptions::new(job.glucose_units(), job.basal_increment, job.day_window());
        options.rounding = self.rounding;
        run.parsed = parse_recommendations(&log, &options);
        run.log = Some(log);
        run
    }

    /// The tool's other logs in the container. Failures only cost attachments.
    async fn collect_attachments(&self, container: &str) -> Vec<Attachment> {
        let names = match self.objects.list(container).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(container, error = %e, "Failed to list job outputs");
                return Vec::new();
            }
        };

        let mut attachments = Vec::new();
        for name in names {
            if name == RECOMMENDATIONS_LOG || name == PROFILE_OBJECT {
                continue;
            }
            match self.objects.get(container, &name).await {
                Ok(bytes) => attachments.push(Attachment { name, bytes }),
                Err(e) => tracing::warn!(container, name = %name, error = %e, "Failed to fetch job output"),
            }
        }
        attachments
    }
}

/// Compare without stopping at the first differing byte.
fn keys_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_comparison() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secreT", "secret"));
        assert!(!keys_match("secret1", "secret"));
        assert!(!keys_match("", "secret"));
    }
}
