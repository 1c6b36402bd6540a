//! Tuning job entity and DTOs.

use autotune_core::profile::NormalizedProfile;
use autotune_core::types::{DbId, Timestamp};
use autotune_core::units::GlucoseUnits;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    /// Nightscout site URL, without a trailing slash.
    pub endpoint: String,
    /// SHA-256 of the endpoint; history and job lookups are scoped by it.
    pub endpoint_hash: String,
    /// Dedup key over endpoint, profile and the UAM flag.
    pub fingerprint: String,
    /// The normalized profile the job was submitted with, in the tool's schema.
    pub profile: serde_json::Value,
    /// Units label of the source profile (`mg/dL` or `mmol/L`).
    pub units: String,
    /// IANA timezone the tool runs in, when the profile named one.
    pub timezone: Option<String>,
    /// Whether unannounced meals are categorized as basal.
    pub uam_as_basal: bool,
    /// Pump basal step that suggested rates are snapped to.
    pub basal_increment: Decimal,
    /// Report recipient.
    #[serde(skip_serializing)]
    pub email_results_to: String,
    /// History window in days.
    pub days: i32,
    /// FK to `JobStatus`.
    pub status_id: StatusId,
    /// Name of the job on the execution backend, set once dispatched.
    pub backend_job_name: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Raw recommendations log, or the captured error text on failure.
    pub result: Option<String>,
    /// Tuning tool revision reported by the completion callback.
    pub tool_commit: Option<String>,
    /// True for any terminal outcome without usable results.
    pub failed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }

    pub fn glucose_units(&self) -> GlucoseUnits {
        GlucoseUnits::from_tag(Some(&self.units))
    }

    pub fn normalized_profile(&self) -> Result<NormalizedProfile, serde_json::Error> {
        serde_json::from_value(self.profile.clone())
    }

    /// History window as an unsigned day count.
    pub fn day_window(&self) -> u32 {
        u32::try_from(self.days).unwrap_or(0)
    }
}

/// DTO for inserting a new job. Status is always Queued on insert.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub endpoint: String,
    /// Must equal `endpoint_hash(endpoint)`.
    pub endpoint_hash: String,
    pub fingerprint: String,
    /// Normalized profile in the tool's schema.
    pub profile: serde_json::Value,
    pub units: String,
    pub timezone: Option<String>,
    pub uam_as_basal: bool,
    pub basal_increment: Decimal,
    pub email_results_to: String,
    /// Already clamped to the supported window.
    pub days: i32,
}

/// Public view of a job: lifecycle and settings, without the site URL,
/// recipient, profile or raw log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: DbId,
    pub status: Option<JobStatus>,
    pub failed: bool,
    pub units: String,
    pub timezone: Option<String>,
    pub uam_as_basal: bool,
    pub basal_increment: Decimal,
    pub days: i32,
    pub tool_commit: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status(),
            failed: job.failed,
            units: job.units.clone(),
            timezone: job.timezone.clone(),
            uam_as_basal: job.uam_as_basal,
            basal_increment: job.basal_increment,
            days: job.days,
            tool_commit: job.tool_commit.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}
