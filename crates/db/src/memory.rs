//! In-process implementations of the storage traits.
//!
//! Every operation takes one short `std::sync::Mutex` critical section and
//! never awaits while holding it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use autotune_core::types::DbId;
use chrono::Utc;

use crate::models::counter::JobCounter;
use crate::models::job::{Job, NewJob};
use crate::models::setting::Setting;
use crate::models::status::{JobStatus, StatusId};
use crate::store::{CounterStore, LedgerStore, SettingStore, StoreError};

#[derive(Default)]
struct MemoryState {
    next_id: DbId,
    jobs: BTreeMap<DbId, Job>,
    settings: HashMap<String, Setting>,
    counters: HashMap<String, JobCounter>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Number of stored jobs, in any status.
    pub fn job_count(&self) -> usize {
        self.state.lock().map(|s| s.jobs.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert(&self, input: &NewJob) -> Result<Job, StoreError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let now = Utc::now();
        let job = Job {
            id: state.next_id,
            endpoint: input.endpoint.clone(),
            endpoint_hash: input.endpoint_hash.clone(),
            fingerprint: input.fingerprint.clone(),
            profile: input.profile.clone(),
            units: input.units.clone(),
            timezone: input.timezone.clone(),
            uam_as_basal: input.uam_as_basal,
            basal_increment: input.basal_increment,
            email_results_to: input.email_results_to.clone(),
            days: input.days,
            status_id: JobStatus::Queued.id(),
            backend_job_name: None,
            started_at: None,
            completed_at: None,
            result: None,
            tool_commit: None,
            failed: false,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Job>, StoreError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn find_in_flight_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Job>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .values()
            .find(|j| {
                j.fingerprint == fingerprint
                    && j.status().is_some_and(JobStatus::is_in_flight)
            })
            .cloned())
    }

    async fn count_up_to(&self, statuses: &[StatusId], id: DbId) -> Result<i64, StoreError> {
        let state = self.lock()?;
        let count = state
            .jobs
            .range(..=id)
            .filter(|(_, j)| statuses.contains(&j.status_id))
            .count();
        Ok(count as i64)
    }

    async fn replace(&self, job: &Job, from: &[StatusId]) -> Result<Option<Job>, StoreError> {
        let mut state = self.lock()?;
        let stored = state.jobs.get_mut(&job.id).ok_or(StoreError::NotFound {
            entity: "Job",
            id: job.id,
        })?;
        if !from.contains(&stored.status_id) {
            return Ok(None);
        }
        stored.status_id = job.status_id;
        if job.backend_job_name.is_some() {
            stored.backend_job_name = job.backend_job_name.clone();
        }
        stored.started_at = job.started_at;
        stored.completed_at = job.completed_at;
        stored.result = job.result.clone();
        stored.tool_commit = job.tool_commit.clone();
        stored.failed = job.failed;
        stored.updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }

    async fn list_by_endpoint_hash(&self, endpoint_hash: &str) -> Result<Vec<Job>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .values()
            .rev()
            .filter(|j| j.endpoint_hash == endpoint_hash)
            .cloned()
            .collect())
    }

    async fn delete_by_endpoint_hash_and_email(
        &self,
        endpoint_hash: &str,
        email: &str,
    ) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let before = state.jobs.len();
        state.jobs.retain(|_, j| {
            !(j.endpoint_hash == endpoint_hash && j.email_results_to.eq_ignore_ascii_case(email))
        });
        Ok((before - state.jobs.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

#[async_trait]
impl SettingStore for MemoryStore {
    async fn insert_or_replace(&self, key: &str, value: &str) -> Result<Setting, StoreError> {
        let setting = Setting {
            key: key.to_string(),
            value: value.to_string(),
            updated_at: Utc::now(),
        };
        self.lock()?
            .settings
            .insert(key.to_string(), setting.clone());
        Ok(setting)
    }

    async fn get(&self, key: &str) -> Result<Option<Setting>, StoreError> {
        Ok(self.lock()?.settings.get(key).cloned())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<JobCounter>, StoreError> {
        Ok(self.lock()?.counters.get(key).cloned())
    }

    async fn try_insert(&self, key: &str, job_count: i64) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if state.counters.contains_key(key) {
            return Ok(false);
        }
        state.counters.insert(
            key.to_string(),
            JobCounter {
                key: key.to_string(),
                job_count,
                version: 1,
            },
        );
        Ok(true)
    }

    async fn try_update(
        &self,
        key: &str,
        expected_version: i64,
        job_count: i64,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.counters.get_mut(key) {
            Some(counter) if counter.version == expected_version => {
                counter.job_count = job_count;
                counter.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
