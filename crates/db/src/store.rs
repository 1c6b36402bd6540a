//! Storage seams used by the pipeline.
//!
//! The pipeline only talks to these traits. [`PgStore`] implements them over
//! the repositories in [`crate::repositories`]; [`crate::memory::MemoryStore`]
//! implements them in-process for tests and single-node runs.

use async_trait::async_trait;
use autotune_core::types::DbId;

use crate::models::counter::JobCounter;
use crate::models::job::{Job, NewJob};
use crate::models::setting::Setting;
use crate::models::status::StatusId;
use crate::repositories::{CounterRepo, JobRepo, SettingRepo};
use crate::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of tuning jobs.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert(&self, job: &NewJob) -> Result<Job, StoreError>;

    async fn find_by_id(&self, id: DbId) -> Result<Option<Job>, StoreError>;

    /// Oldest Queued or Dispatched job with this fingerprint.
    async fn find_in_flight_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Job>, StoreError>;

    /// Number of jobs in `statuses` with an id at or below `id`.
    async fn count_up_to(&self, statuses: &[StatusId], id: DbId) -> Result<i64, StoreError>;

    /// Overwrite a job's mutable fields if its stored status is one of `from`.
    ///
    /// `Ok(None)` means the stored status has moved on and nothing was
    /// written. Errors with `NotFound` if the job is gone.
    async fn replace(&self, job: &Job, from: &[StatusId]) -> Result<Option<Job>, StoreError>;

    /// Newest first.
    async fn list_by_endpoint_hash(&self, endpoint_hash: &str) -> Result<Vec<Job>, StoreError>;

    async fn delete_by_endpoint_hash_and_email(
        &self,
        endpoint_hash: &str,
        email: &str,
    ) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SettingStore: Send + Sync {
    async fn insert_or_replace(&self, key: &str, value: &str) -> Result<Setting, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Setting>, StoreError>;
}

/// Conditional-write counter storage; see [`crate::counters::increment_counter`].
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<JobCounter>, StoreError>;

    /// Returns `false` if the key already exists.
    async fn try_insert(&self, key: &str, job_count: i64) -> Result<bool, StoreError>;

    /// Returns `false` if the stored version no longer equals `expected_version`.
    async fn try_update(
        &self,
        key: &str,
        expected_version: i64,
        job_count: i64,
    ) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// All stores backed by one PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn insert(&self, job: &NewJob) -> Result<Job, StoreError> {
        Ok(JobRepo::insert(&self.pool, job).await?)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_in_flight_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_in_flight_by_fingerprint(&self.pool, fingerprint).await?)
    }

    async fn count_up_to(&self, statuses: &[StatusId], id: DbId) -> Result<i64, StoreError> {
        Ok(JobRepo::count_up_to(&self.pool, statuses, id).await?)
    }

    async fn replace(&self, job: &Job, from: &[StatusId]) -> Result<Option<Job>, StoreError> {
        if let Some(updated) = JobRepo::replace(&self.pool, job, from).await? {
            return Ok(Some(updated));
        }
        match JobRepo::find_by_id(&self.pool, job.id).await? {
            Some(_) => Ok(None),
            None => Err(StoreError::NotFound {
                entity: "Job",
                id: job.id,
            }),
        }
    }

    async fn list_by_endpoint_hash(&self, endpoint_hash: &str) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_by_endpoint_hash(&self.pool, endpoint_hash).await?)
    }

    async fn delete_by_endpoint_hash_and_email(
        &self,
        endpoint_hash: &str,
        email: &str,
    ) -> Result<u64, StoreError> {
        Ok(JobRepo::delete_by_endpoint_hash_and_email(&self.pool, endpoint_hash, email).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}

#[async_trait]
impl SettingStore for PgStore {
    async fn insert_or_replace(&self, key: &str, value: &str) -> Result<Setting, StoreError> {
        Ok(SettingRepo::upsert(&self.pool, key, value).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Setting>, StoreError> {
        Ok(SettingRepo::find(&self.pool, key).await?)
    }
}

#[async_trait]
impl CounterStore for PgStore {
    async fn read(&self, key: &str) -> Result<Option<JobCounter>, StoreError> {
        Ok(CounterRepo::find(&self.pool, key).await?)
    }

    async fn try_insert(&self, key: &str, job_count: i64) -> Result<bool, StoreError> {
        Ok(CounterRepo::try_insert(&self.pool, key, job_count).await?)
    }

    async fn try_update(
        &self,
        key: &str,
        expected_version: i64,
        job_count: i64,
    ) -> Result<bool, StoreError> {
        Ok(CounterRepo::try_update(&self.pool, key, expected_version, job_count).await?)
    }
}
