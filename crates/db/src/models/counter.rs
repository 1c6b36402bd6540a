//! Aggregate job counters, written with optimistic concurrency.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::FromRow;

/// Counter of every job ever submitted.
pub const TOTAL_COUNTER_KEY: &str = "Total";

/// A row from the `job_counters` table.
///
/// `version` increases on every successful write and is the compare-and-swap
/// token for the next one.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct JobCounter {
    /// [`TOTAL_COUNTER_KEY`] or a [`daily_counter_key`].
    pub key: String,
    pub job_count: i64,
    pub version: i64,
}

/// Key of the per-day counter, `YYYY-MM-DD`.
pub fn daily_counter_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
