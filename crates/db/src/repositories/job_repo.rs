//! Repository for the `jobs` table.
//!
//! Uses `JobStatus` from `models::status` for every status literal.

use sqlx::PgPool;
use autotune_core::types::DbId;

use crate::models::job::{Job, NewJob};
use crate::models::status::{JobStatus, StatusId};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, endpoint, endpoint_hash, fingerprint, profile, units, timezone, \
    uam_as_basal, basal_increment, email_results_to, days, status_id, \
    backend_job_name, started_at, completed_at, result, tool_commit, failed, \
    created_at, updated_at";

/// In-flight statuses: queued, dispatched.
const IN_FLIGHT_STATUSES: [StatusId; 2] = [
    JobStatus::Queued as StatusId,
    JobStatus::Dispatched as StatusId,
];

/// Provides CRUD operations for tuning jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new Queued job and return the full row.
    pub async fn insert(pool: &PgPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs \
                 (endpoint, endpoint_hash, fingerprint, profile, units, timezone, \
                  uam_as_basal, basal_increment, email_results_to, days, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(&input.endpoint)
            .bind(&input.endpoint_hash)
            .bind(&input.fingerprint)
            .bind(&input.profile)
            .bind(&input.units)
            .bind(&input.timezone)
            .bind(input.uam_as_basal)
            .bind(input.basal_increment)
            .bind(&input.email_results_to)
            .bind(input.days)
            .bind(JobStatus::Queued.id())
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Oldest Queued or Dispatched job with the given fingerprint.
    pub async fn find_in_flight_by_fingerprint(
        pool: &PgPool,
        fingerprint: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE fingerprint = $1 AND status_id = ANY($2) \
             ORDER BY id ASC \
             LIMIT 1"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(fingerprint)
            .bind(&IN_FLIGHT_STATUSES[..])
            .fetch_optional(pool)
            .await
    }

    /// Count jobs in any of `statuses` submitted at or before `id`.
    pub async fn count_up_to(
        pool: &PgPool,
        statuses: &[StatusId],
        id: DbId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE status_id = ANY($1) AND id <= $2",
        )
        .bind(statuses)
        .bind(id)
        .fetch_one(pool)
        .await
    }

    /// Overwrite every mutable field of a job whose stored status is one of
    /// `from`. Returns `None` if the row is gone or its status has moved on.
    ///
    /// A backend job name, once set, is never cleared.
    pub async fn replace(
        pool: &PgPool,
        job: &Job,
        from: &[StatusId],
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET \
                 status_id = $2, backend_job_name = COALESCE($3, backend_job_name), started_at = $4, \
                 completed_at = $5, result = $6, tool_commit = $7, failed = $8, \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job.id)
            .bind(job.status_id)
            .bind(&job.backend_job_name)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(&job.result)
            .bind(&job.tool_commit)
            .bind(job.failed)
            .bind(from)
            .fetch_optional(pool)
            .await
    }

    /// All jobs for one data-service endpoint, newest first.
    pub async fn list_by_endpoint_hash(
        pool: &PgPool,
        endpoint_hash: &str,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE endpoint_hash = $1 ORDER BY id DESC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(endpoint_hash)
            .fetch_all(pool)
            .await
    }

    /// Delete a site's history for one recipient. Returns the number of rows removed.
    pub async fn delete_by_endpoint_hash_and_email(
        pool: &PgPool,
        endpoint_hash: &str,
        email: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE endpoint_hash = $1 AND LOWER(email_results_to) = LOWER($2)",
        )
        .bind(endpoint_hash)
        .bind(email)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
