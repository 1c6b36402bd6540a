//! Repository for the `job_counters` table.
//!
//! Writes are conditional: an insert only succeeds if the key is absent, an
//! update only if the stored version still matches. Callers retry on `false`.

use sqlx::PgPool;

use crate::models::counter::JobCounter;

pub struct CounterRepo;

impl CounterRepo {
    pub async fn find(pool: &PgPool, key: &str) -> Result<Option<JobCounter>, sqlx::Error> {
        sqlx::query_as::<_, JobCounter>(
            "SELECT key, job_count, version FROM job_counters WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
    }

    /// Insert a counter if the key is absent. Returns `false` on conflict.
    pub async fn try_insert(pool: &PgPool, key: &str, job_count: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO job_counters (key, job_count, version) VALUES ($1, $2, 1) \
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(job_count)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Compare-and-swap on `version`. Returns `false` if another writer won.
    pub async fn try_update(
        pool: &PgPool,
        key: &str,
        expected_version: i64,
        job_count: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE job_counters SET job_count = $3, version = version + 1 \
             WHERE key = $1 AND version = $2",
        )
        .bind(key)
        .bind(expected_version)
        .bind(job_count)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
