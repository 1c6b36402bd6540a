//! End-to-end job lifecycle against in-memory stores and a scripted backend.

mod common;

use assert_matches::assert_matches;
use autotune_cloud::{ObjectStore, StepDependency, NOTIFY_STEP, RUN_STEP};
use autotune_core::error::CoreError;
use autotune_db::models::counter::TOTAL_COUNTER_KEY;
use autotune_db::models::setting::TOOL_COMMIT_KEY;
use autotune_db::models::status::JobStatus;
use autotune_db::{CounterStore, SettingStore};
use autotune_pipeline::dispatcher::{PROFILE_OBJECT, RECOMMENDATIONS_LOG};
use autotune_pipeline::{CompletionError, DispatchState, SubmissionError, SubmitOutcome};
use common::{request, Harness, CALLBACK_KEY, RECOMMENDATIONS};
use rust_decimal_macros::dec;

const JOB_NAME: &str = "autotune-job-1";

// ---------------------------------------------------------------------------
// Submission and dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submission_stages_profile_and_dispatches_two_steps() {
    let h = Harness::new();
    let receipt = h.submissions.submit(request()).await.unwrap();

    let SubmitOutcome::Created { job, position } = &receipt.outcome else {
        panic!("expected a created job, got {:?}", receipt.outcome);
    };
    assert_eq!(*position, 1);
    assert_eq!(job.status(), Some(JobStatus::Dispatched));
    assert_eq!(job.backend_job_name.as_deref(), Some(JOB_NAME));
    assert_eq!(job.endpoint, "https://ns.example.com");
    assert_eq!(
        receipt.dispatch,
        DispatchState::Dispatched {
            backend_job_name: JOB_NAME.into()
        }
    );

    let staged = h.objects.get(JOB_NAME, PROFILE_OBJECT).await.unwrap();
    let staged: serde_json::Value = serde_json::from_slice(&staged).unwrap();
    assert_eq!(staged["carb_ratio"], serde_json::json!(10.0));

    let specs = h.backend.submitted();
    assert_eq!(specs.len(), 1);
    let run = specs[0].step(RUN_STEP).unwrap();
    let script = &run.command[2];
    assert!(script.contains("--ns-host='https://ns.example.com'"));
    assert!(script.contains("--categorize-uam-as-basal=false"));
    assert!(script.contains("--dir={working_dir}"));
    assert_eq!(run.env, vec![("TZ".to_string(), "Europe/London".to_string())]);
    assert_eq!(run.resource_files.len(), 3);
    assert_eq!(run.outputs.len(), 2);

    let notify = specs[0].step(NOTIFY_STEP).unwrap();
    assert_eq!(notify.depends_on, vec![StepDependency::Completion(RUN_STEP.into())]);
    assert_eq!(notify.max_retries, 2);
    assert!(notify.command[2].contains("jobRef=1&key=callback-key&commit="));

    let total = h.store.read(TOTAL_COUNTER_KEY).await.unwrap().unwrap();
    assert_eq!(total.job_count, 1);
}

#[tokio::test]
async fn duplicate_submission_creates_no_second_job() {
    let h = Harness::new();
    h.submissions.submit(request()).await.unwrap();

    let mut again = request();
    again.endpoint = "https://ns.example.com".into();
    let receipt = h.submissions.submit(again).await.unwrap();

    assert_matches!(receipt.outcome, SubmitOutcome::AlreadyRunning { job_id: 1, .. });
    assert_eq!(receipt.dispatch, DispatchState::NotAttempted);
    assert_eq!(h.store.job_count(), 1);
    assert_eq!(h.backend.submitted().len(), 1);
}

#[tokio::test]
async fn changing_uam_flag_is_a_different_job() {
    let h = Harness::new();
    h.submissions.submit(request()).await.unwrap();

    let mut other = request();
    other.uam_as_basal = true;
    let receipt = h.submissions.submit(other).await.unwrap();
    assert_matches!(receipt.outcome, SubmitOutcome::Created { .. });
    assert_eq!(h.store.job_count(), 2);
}

#[tokio::test]
async fn backend_outage_leaves_job_queued_until_retry() {
    let h = Harness::new();
    h.backend.set_unavailable(true);

    let receipt = h.submissions.submit(request()).await.unwrap();
    assert_matches!(receipt.dispatch, DispatchState::Pending { .. });
    let job = h.ledger.find(1).await.unwrap();
    assert_eq!(job.status(), Some(JobStatus::Queued));

    let again = h.submissions.submit(request()).await.unwrap();
    assert_matches!(again.outcome, SubmitOutcome::AlreadyQueued { job_id: 1, position: 1 });

    h.backend.set_unavailable(false);
    let job = h.submissions.retry_dispatch(1).await.unwrap();
    assert_eq!(job.status(), Some(JobStatus::Dispatched));

    let err = h.submissions.retry_dispatch(1).await.unwrap_err();
    assert_matches!(err, SubmissionError::Core(CoreError::Conflict(_)));
}

#[tokio::test]
async fn vanished_backend_job_is_expired_on_resubmission() {
    let h = Harness::new();
    h.submissions.submit(request()).await.unwrap();
    h.backend.forget(JOB_NAME);

    let receipt = h.submissions.submit(request()).await.unwrap();
    let SubmitOutcome::Created { job, .. } = receipt.outcome else {
        panic!("expected a replacement job");
    };
    assert_eq!(job.id, 2);
    assert_eq!(h.ledger.find(1).await.unwrap().status(), Some(JobStatus::Expired));
}

#[tokio::test]
async fn ambiguous_profile_is_rejected_before_the_ledger() {
    let h = Harness::new();
    let mut req = request();
    req.profile.carb_ratio = serde_json::from_value(serde_json::json!([
        {"time": "00:00", "value": 10},
        {"time": "12:00", "value": 12}
    ]))
    .unwrap();

    let err = h.submissions.submit(req.clone()).await.unwrap_err();
    assert_matches!(err, SubmissionError::Core(CoreError::AmbiguousProfile(_)));
    assert_eq!(h.store.job_count(), 0);

    req.overrides.carb_ratio = Some(dec!(11));
    assert!(h.submissions.submit(req).await.is_ok());
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

async fn submitted_with_outputs() -> Harness {
    let h = Harness::new();
    h.submissions.submit(request()).await.unwrap();
    h.objects
        .put(JOB_NAME, RECOMMENDATIONS_LOG, RECOMMENDATIONS.as_bytes().to_vec())
        .await
        .unwrap();
    h.objects
        .put(JOB_NAME, "autotune.2024-03-01.log", b"day one".to_vec())
        .await
        .unwrap();
    h
}

#[tokio::test]
async fn successful_run_completes_job_and_sends_results() {
    let h = submitted_with_outputs().await;
    h.finish_run(JOB_NAME, 0);

    let summary = h
        .completion
        .on_callback("1", CALLBACK_KEY, Some("abc1234"))
        .await
        .unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert!(!summary.failed && summary.report_sent);

    let job = h.ledger.find(1).await.unwrap();
    assert_eq!(job.status(), Some(JobStatus::Completed));
    assert!(!job.failed);
    assert!(job.started_at.is_some() && job.completed_at.is_some());
    assert_eq!(job.result.as_deref(), Some(RECOMMENDATIONS));
    assert_eq!(job.tool_commit.as_deref(), Some("abc1234"));

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].failed);
    assert_eq!(sent[0].to, "user@example.com");
    assert!(sent[0].html_body.contains("47.3"));
    let names: Vec<&str> = sent[0].attachments.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["autotune.2024-03-01.log"]);

    let setting = h.store.get(TOOL_COMMIT_KEY).await.unwrap().unwrap();
    assert_eq!(setting.value, "abc1234");
}

#[tokio::test]
async fn failed_run_sends_one_failure_report() {
    let h = submitted_with_outputs().await;
    h.finish_run(JOB_NAME, 1);

    let summary = h.completion.on_callback("1", CALLBACK_KEY, None).await.unwrap();
    assert_eq!(summary.status, JobStatus::Failed);

    let job = h.ledger.find(1).await.unwrap();
    assert!(job.failed);
    assert!(job.result.as_deref().unwrap().contains("exited with status 1"));

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].failed);
    assert!(!sent[0].html_body.contains("exited with status"));
    assert!(sent[0]
        .attachments
        .iter()
        .all(|a| a.name != RECOMMENDATIONS_LOG && a.name != PROFILE_OBJECT));
    assert!(h.store.get(TOOL_COMMIT_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn unparsable_log_fails_the_job_and_keeps_the_text() {
    let h = Harness::new();
    h.submissions.submit(request()).await.unwrap();
    h.objects
        .put(JOB_NAME, RECOMMENDATIONS_LOG, b"no table here".to_vec())
        .await
        .unwrap();
    h.finish_run(JOB_NAME, 0);

    let summary = h.completion.on_callback("1", CALLBACK_KEY, None).await.unwrap();
    assert!(summary.failed);

    let job = h.ledger.find(1).await.unwrap();
    let result = job.result.unwrap();
    assert!(result.contains("no table border"));
    assert!(result.ends_with("no table here"));
}

#[tokio::test]
async fn oversized_log_value_fails_the_job_with_one_report() {
    let h = Harness::new();
    h.submissions.submit(request()).await.unwrap();
    let log = RECOMMENDATIONS.replacen("| 0.912", "| 79228162514264337593543950335", 1);
    assert_ne!(log, RECOMMENDATIONS);
    h.objects
        .put(JOB_NAME, RECOMMENDATIONS_LOG, log.into_bytes())
        .await
        .unwrap();
    h.finish_run(JOB_NAME, 0);

    let summary = h.completion.on_callback("1", CALLBACK_KEY, None).await.unwrap();
    assert_eq!(summary.status, JobStatus::Failed);

    let job = h.ledger.find(1).await.unwrap();
    assert!(job.result.as_deref().unwrap().contains("out of range"));
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test]
async fn missing_backend_job_still_settles() {
    let h = submitted_with_outputs().await;
    h.backend.forget(JOB_NAME);

    let summary = h.completion.on_callback("1", CALLBACK_KEY, None).await.unwrap();
    assert_eq!(summary.status, JobStatus::Failed);
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test]
async fn wrong_key_changes_nothing() {
    let h = submitted_with_outputs().await;
    h.finish_run(JOB_NAME, 0);

    let err = h.completion.on_callback("1", "guess", Some("abc")).await.unwrap_err();
    assert_matches!(err, CompletionError::Unauthorized);
    assert_eq!(h.ledger.find(1).await.unwrap().status(), Some(JobStatus::Dispatched));
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn unknown_job_reference_is_rejected() {
    let h = Harness::new();
    assert_matches!(
        h.completion.on_callback("99", CALLBACK_KEY, None).await,
        Err(CompletionError::UnknownJob(_))
    );
    assert_matches!(
        h.completion.on_callback("abc", CALLBACK_KEY, None).await,
        Err(CompletionError::UnknownJob(_))
    );
}

#[tokio::test]
async fn transport_failure_does_not_lose_the_outcome() {
    let h = submitted_with_outputs().await;
    h.finish_run(JOB_NAME, 0);
    h.transport.set_failing(true);

    let summary = h.completion.on_callback("1", CALLBACK_KEY, None).await.unwrap();
    assert!(!summary.report_sent);
    assert_eq!(h.ledger.find(1).await.unwrap().status(), Some(JobStatus::Completed));
}

#[tokio::test]
async fn late_dispatch_write_does_not_reopen_a_settled_job() {
    let h = Harness::new();
    h.backend.set_unavailable(true);
    h.submissions.submit(request()).await.unwrap();
    let before_dispatch = h.ledger.find(1).await.unwrap();
    h.backend.set_unavailable(false);

    h.finish_run(JOB_NAME, 1);
    let summary = h.completion.on_callback("1", CALLBACK_KEY, None).await.unwrap();
    assert_eq!(summary.status, JobStatus::Failed);

    let returned = h.ledger.mark_dispatched(before_dispatch, JOB_NAME).await.unwrap();
    assert_eq!(returned.status(), Some(JobStatus::Failed));

    let job = h.ledger.find(1).await.unwrap();
    assert_eq!(job.status(), Some(JobStatus::Failed));
    assert!(job.failed);
    assert!(job.result.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test]
async fn ledger_outage_still_sends_the_report() {
    let h = submitted_with_outputs().await;
    h.finish_run(JOB_NAME, 0);
    h.ledger_store.reject_updates(true);

    let err = h.completion.on_callback("1", CALLBACK_KEY, None).await.unwrap_err();
    assert_matches!(err, CompletionError::Ledger(_));

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].failed);
    assert_eq!(h.ledger.find(1).await.unwrap().status(), Some(JobStatus::Dispatched));
}

#[tokio::test]
async fn duplicate_callback_overwrites_the_same_fields() {
    let h = submitted_with_outputs().await;
    h.finish_run(JOB_NAME, 0);

    h.completion.on_callback("1", CALLBACK_KEY, Some("abc")).await.unwrap();
    let first = h.ledger.find(1).await.unwrap();
    h.completion.on_callback("1", CALLBACK_KEY, Some("abc")).await.unwrap();
    let second = h.ledger.find(1).await.unwrap();

    assert_eq!(first.status_id, second.status_id);
    assert_eq!(first.result, second.result);
    assert_eq!(first.completed_at, second.completed_at);
    assert_eq!(h.transport.sent().len(), 2);
}
