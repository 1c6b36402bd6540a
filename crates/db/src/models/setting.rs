//! Key/value settings persisted across jobs (e.g. the tool commit in use).

use autotune_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// Key under which the tuning tool's latest commit is stored.
pub const TOOL_COMMIT_KEY: &str = "tool_commit";

/// A row from the `settings` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    /// Last time the value was written.
    pub updated_at: Timestamp,
}
