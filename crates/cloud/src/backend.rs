//! Execution backend seam.
//!
//! A backend job is a named, ordered set of steps. The pipeline submits one
//! per tuning job and later asks for the outcome of its run step.

use async_trait::async_trait;
use autotune_core::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Step that runs the tuning tool.
pub const RUN_STEP: &str = "autotune";

/// Step that calls the completion endpoint.
pub const NOTIFY_STEP: &str = "notify";

/// Placeholder in a step's argv or env that the backend replaces with the
/// step's working directory.
pub const WORKING_DIR_PLACEHOLDER: &str = "{working_dir}";

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend has no record of the job (never submitted, or deleted).
    #[error("backend job '{0}' not found")]
    NotFound(String),

    #[error("execution backend unavailable: {0}")]
    Unavailable(String),

    #[error("execution backend rejected the job: {0}")]
    Rejected(String),
}

/// When a dependent step may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "step", rename_all = "snake_case")]
pub enum StepDependency {
    /// After the step finishes, whatever its exit status.
    Completion(String),
    /// Only after the step exits 0.
    Success(String),
}

impl StepDependency {
    pub fn step(&self) -> &str {
        match self {
            Self::Completion(step) | Self::Success(step) => step,
        }
    }

    /// Whether a step that exited with `exit_code` satisfies this dependency.
    pub fn is_satisfied_by(&self, exit_code: i32) -> bool {
        match self {
            Self::Completion(_) => true,
            Self::Success(_) => exit_code == 0,
        }
    }
}

/// An object copied into the working directory before the step starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFile {
    /// Container holding the object.
    pub container: String,
    /// Object name within the container.
    pub name: String,
    /// Time-limited read link for backends outside the object store's network.
    pub url: String,
    /// Destination relative to the working directory.
    pub path: String,
}

/// Files uploaded to a container when the step completes, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputUpload {
    /// Relative path; `*` in the file name matches any run of characters.
    pub pattern: String,
    /// Container the matching files are uploaded to.
    pub container: String,
    /// Container-scoped write link.
    pub destination_url: String,
}

/// One process the backend runs for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique within the job; dependencies refer to it.
    pub name: String,
    /// Program and arguments. May contain [`WORKING_DIR_PLACEHOLDER`].
    pub command: Vec<String>,
    /// Extra environment variables for the process.
    pub env: Vec<(String, String)>,
    /// Inputs staged before the step starts.
    pub resource_files: Vec<ResourceFile>,
    /// Outputs collected after it exits.
    pub outputs: Vec<OutputUpload>,
    /// Steps that must have finished first.
    pub depends_on: Vec<StepDependency>,
    /// Extra attempts after a non-zero exit.
    pub max_retries: u32,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            env: Vec::new(),
            resource_files: Vec::new(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
            max_retries: 0,
        }
    }
}

/// Everything the backend needs to run one tuning job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendJobSpec {
    /// Backend-wide unique name; also the job's object store container.
    pub job_name: String,
    /// Run in order, each gated by its dependencies.
    pub steps: Vec<StepSpec>,
}

impl BackendJobSpec {
    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendJobHandle {
    pub job_name: String,
    pub submitted_at: Timestamp,
}

/// Execution record of one step. `exit_code` is `None` while it has not finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub exit_code: Option<i32>,
    /// Set once the step has started.
    pub start_time: Option<Timestamp>,
    /// Set once the step has exited.
    pub end_time: Option<Timestamp>,
}

impl StepOutcome {
    /// Finished with exit code 0.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn submit(&self, spec: BackendJobSpec) -> Result<BackendJobHandle, BackendError>;

    /// Outcome of `step` in `job_name`. `NotFound` if the job is unknown.
    async fn step_outcome(&self, job_name: &str, step: &str) -> Result<StepOutcome, BackendError>;
}
