//! Shared fixtures: the full pipeline wired to in-memory doubles.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use autotune_cloud::{MemoryObjectStore, ScriptedBackend, StepOutcome};
use autotune_core::types::DbId;
use autotune_db::models::job::{Job, NewJob};
use autotune_db::models::status::StatusId;
use autotune_db::{LedgerStore, MemoryStore, StoreError};
use autotune_events::RecordingTransport;
use autotune_pipeline::{
    CompletionHandler, DispatcherConfig, JobDispatcher, JobLedger, SubmissionService, SubmitRequest,
};
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

pub const CALLBACK_KEY: &str = "callback-key";
pub const CALLBACK_URL: &str = "https://autotune.example.com/api/v1/completion";

pub const RECOMMENDATIONS: &str =
    include_str!("../../../core/tests/fixtures/oref0_v1_recommendations.log");

/// Ledger store over [`MemoryStore`] whose updates can be switched off.
pub struct SwitchableLedger {
    inner: Arc<MemoryStore>,
    reject_updates: AtomicBool,
}

impl SwitchableLedger {
    pub fn reject_updates(&self, reject: bool) {
        self.reject_updates.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for SwitchableLedger {
    async fn insert(&self, job: &NewJob) -> Result<Job, StoreError> {
        self.inner.insert(job).await
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Job>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_in_flight_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Job>, StoreError> {
        self.inner.find_in_flight_by_fingerprint(fingerprint).await
    }

    async fn count_up_to(&self, statuses: &[StatusId], id: DbId) -> Result<i64, StoreError> {
        self.inner.count_up_to(statuses, id).await
    }

    async fn replace(&self, job: &Job, from: &[StatusId]) -> Result<Option<Job>, StoreError> {
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("updates rejected".into()));
        }
        self.inner.replace(job, from).await
    }

    async fn list_by_endpoint_hash(&self, endpoint_hash: &str) -> Result<Vec<Job>, StoreError> {
        self.inner.list_by_endpoint_hash(endpoint_hash).await
    }

    async fn delete_by_endpoint_hash_and_email(
        &self,
        endpoint_hash: &str,
        email: &str,
    ) -> Result<u64, StoreError> {
        self.inner
            .delete_by_endpoint_hash_and_email(endpoint_hash, email)
            .await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub ledger_store: Arc<SwitchableLedger>,
    pub backend: Arc<ScriptedBackend>,
    pub objects: Arc<MemoryObjectStore>,
    pub transport: Arc<RecordingTransport>,
    pub ledger: Arc<JobLedger>,
    pub submissions: SubmissionService,
    pub completion: CompletionHandler,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(ScriptedBackend::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let transport = Arc::new(RecordingTransport::new());

        let ledger_store = Arc::new(SwitchableLedger {
            inner: store.clone(),
            reject_updates: AtomicBool::new(false),
        });
        let ledger = Arc::new(JobLedger::new(ledger_store.clone(), backend.clone()));
        let dispatcher = Arc::new(JobDispatcher::new(
            objects.clone(),
            backend.clone(),
            DispatcherConfig::new(CALLBACK_URL, CALLBACK_KEY),
        ));
        let submissions = SubmissionService::new(ledger.clone(), dispatcher, store.clone());
        let completion = CompletionHandler::new(
            ledger.clone(),
            backend.clone(),
            objects.clone(),
            transport.clone(),
            store.clone(),
            CALLBACK_KEY,
        );

        Self {
            store,
            ledger_store,
            backend,
            objects,
            transport,
            ledger,
            submissions,
            completion,
        }
    }

    /// Script the run step of `job_name` as finished with `exit_code`.
    pub fn finish_run(&self, job_name: &str, exit_code: i32) {
        let end = Utc::now();
        self.backend.set_outcome(
            job_name,
            autotune_cloud::RUN_STEP,
            StepOutcome {
                exit_code: Some(exit_code),
                start_time: Some(end - Duration::minutes(5)),
                end_time: Some(end),
            },
        );
    }
}

pub fn request() -> SubmitRequest {
    SubmitRequest {
        endpoint: "https://ns.example.com/".into(),
        profile: serde_json::from_value(serde_json::json!({
            "dia": 4,
            "timezone": "Europe/London",
            "units": "mg/dl",
            "carbratio": [{"time": "00:00", "value": 10}],
            "sens": [{"time": "00:00", "value": 45}],
            "basal": [
                {"time": "00:00", "value": 0.9},
                {"time": "06:00", "value": 1.1}
            ]
        }))
        .unwrap(),
        overrides: Default::default(),
        min_5m_carbimpact: None,
        curve: None,
        uam_as_basal: false,
        basal_increment: dec!(0.05),
        email: "user@example.com".into(),
        days: 7,
    }
}
