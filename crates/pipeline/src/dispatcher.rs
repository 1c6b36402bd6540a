//! Stages a job's profile and submits its two-step backend job.
//!
//! Step one runs the tuning tool over the job's history window and uploads
//! its logs to the job container. Step two calls the completion endpoint once
//! step one has finished, whatever its exit status.

use std::sync::Arc;
use std::time::Duration;

use autotune_cloud::{
    BackendError, BackendJobHandle, BackendJobSpec, ExecutionBackend, ObjectStore, OutputUpload,
    ResourceFile, StepDependency, StepSpec, StorageError, NOTIFY_STEP, RUN_STEP,
    WORKING_DIR_PLACEHOLDER,
};
use autotune_core::scheduling::clamp_days;
use autotune_core::types::DbId;
use autotune_db::models::job::Job;
use chrono::{Days, NaiveDate};

pub const PROFILE_OBJECT: &str = "profile.json";
pub const RECOMMENDATIONS_LOG: &str = "autotune_recommendations.log";

/// Where the tool expects its copies of the profile, relative to its `--dir`.
const PROFILE_PATHS: [&str; 3] = [
    "settings/profile.json",
    "settings/pumpprofile.json",
    "settings/autotune.json",
];

const OUTPUT_PATTERNS: [&str; 2] = ["autotune/autotune_recommendations.log", "autotune/autotune.*.log"];

/// Extra attempts for the notify step.
const NOTIFY_MAX_RETRIES: u32 = 2;

/// Backend job and container name for a ledger id.
pub fn backend_job_name(job_id: DbId) -> String {
    format!("autotune-job-{job_id}")
}

/// `(start, end)` dates of a run over `days` days ending yesterday.
pub fn history_window(today: NaiveDate, days: i32) -> (NaiveDate, NaiveDate) {
    let days = u64::try_from(clamp_days(days)).unwrap_or(1);
    let start = today.checked_sub_days(Days::new(days)).unwrap_or(today);
    let end = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    (start, end)
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to stage job inputs: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to submit backend job: {0}")]
    Backend(#[from] BackendError),

    #[error("Failed to encode profile: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A staged profile and the links the backend uses to reach the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLocation {
    pub container: String,
    pub profile_url: String,
    pub container_url: String,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Absolute URL of the completion endpoint.
    pub callback_url: String,
    /// Shared secret the completion endpoint checks.
    pub callback_key: String,
    /// Tuning tool executable.
    pub autotune_command: String,
    /// Checkout of the tool, used to report its commit.
    pub tool_dir: String,
    /// Lifetime of the read and write links handed to the backend.
    pub link_ttl: Duration,
}

impl DispatcherConfig {
    pub fn new(callback_url: impl Into<String>, callback_key: impl Into<String>) -> Self {
        Self {
            callback_url: callback_url.into(),
            callback_key: callback_key.into(),
            autotune_command: "oref0-autotune".to_string(),
            tool_dir: "/usr/src/oref0".to_string(),
            link_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct JobDispatcher {
    objects: Arc<dyn ObjectStore>,
    backend: Arc<dyn ExecutionBackend>,
    config: DispatcherConfig,
}

impl JobDispatcher {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        backend: Arc<dyn ExecutionBackend>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            objects,
            backend,
            config,
        }
    }

    /// Upload the job's profile into its own container.
    pub async fn stage_profile(&self, job: &Job) -> Result<ProfileLocation, DispatchError> {
        let container = backend_job_name(job.id);
        self.objects.create_container(&container).await?;
        self.objects
            .put(&container, PROFILE_OBJECT, serde_json::to_vec_pretty(&job.profile)?)
            .await?;

        let profile_url = self
            .objects
            .read_url(&container, PROFILE_OBJECT, self.config.link_ttl)
            .await?;
        let container_url = self.objects.write_url(&container, self.config.link_ttl).await?;

        tracing::debug!(job_id = job.id, container = %container, "Profile staged");
        Ok(ProfileLocation {
            container,
            profile_url,
            container_url,
        })
    }

    /// Submit the backend job. The caller records the returned name on the job.
    pub async fn dispatch(
        &self,
        job: &Job,
        location: &ProfileLocation,
        today: NaiveDate,
    ) -> Result<BackendJobHandle, DispatchError> {
        let spec = self.build_spec(job, location, today);
        let handle = self.backend.submit(spec).await.map_err(|e| {
            tracing::warn!(job_id = job.id, error = %e, "Backend submission failed");
            e
        })?;
        tracing::info!(
            job_id = job.id,
            backend_job_name = %handle.job_name,
            "Backend job submitted",
        );
        Ok(handle)
    }

    pub fn build_spec(&self, job: &Job, location: &ProfileLocation, today: NaiveDate) -> BackendJobSpec {
        BackendJobSpec {
            job_name: backend_job_name(job.id),
            steps: vec![
                self.run_step(job, location, today),
                self.notify_step(job),
            ],
        }
    }

    fn run_step(&self, job: &Job, location: &ProfileLocation, today: NaiveDate) -> StepSpec {
        let (start, end) = history_window(today, job.days);
        let script = format!(
            "{} --dir={WORKING_DIR_PLACEHOLDER} --ns-host={} --start-date={} --end-date={} \
             --categorize-uam-as-basal={}",
            self.config.autotune_command,
            shell_quote(job.endpoint.trim_end_matches('/')),
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
            job.uam_as_basal,
        );

        let mut step = StepSpec::new(RUN_STEP, vec!["/bin/sh".into(), "-c".into(), script]);
        if let Some(tz) = job.timezone.as_deref().filter(|tz| !tz.is_empty()) {
            step.env.push(("TZ".to_string(), tz.to_string()));
        }
        step.resource_files = PROFILE_PATHS
            .iter()
            .map(|path| ResourceFile {
                container: location.container.clone(),
                name: PROFILE_OBJECT.to_string(),
                url: location.profile_url.clone(),
                path: (*path).to_string(),
            })
            .collect();
        step.outputs = OUTPUT_PATTERNS
            .iter()
            .map(|pattern| OutputUpload {
                pattern: (*pattern).to_string(),
                container: location.container.clone(),
                destination_url: location.container_url.clone(),
            })
            .collect();
        step
    }

    fn notify_step(&self, job: &Job) -> StepSpec {
        let url = format!(
            "{}?jobRef={}&key={}&commit=",
            self.config.callback_url, job.id, self.config.callback_key,
        );
        let script = format!(
            "cd {} && wget -q -O /dev/null {}\"$(git rev-parse --short HEAD)\"",
            shell_quote(&self.config.tool_dir),
            shell_quote(&url),
        );

        let mut step = StepSpec::new(NOTIFY_STEP, vec!["/bin/sh".into(), "-c".into(), script]);
        step.depends_on.push(StepDependency::Completion(RUN_STEP.to_string()));
        step.max_retries = NOTIFY_MAX_RETRIES;
        step
    }
}

/// Single-quote `value` for `/bin/sh`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
