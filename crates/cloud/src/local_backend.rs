//! Execution backend that runs steps as local child processes.
//!
//! Each step gets its own directory under `<work_root>/<job_name>/<step>`.
//! Steps run in declaration order on a background task; the outcome table is
//! shared with [`ExecutionBackend::step_outcome`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;

use crate::backend::{
    BackendError, BackendJobHandle, BackendJobSpec, ExecutionBackend, OutputUpload, StepOutcome,
    StepSpec, WORKING_DIR_PLACEHOLDER,
};
use crate::storage::{validate_name, wildcard_match, ObjectStore, StorageError};

/// Exit code recorded when the process could not be started or was killed.
const ABNORMAL_EXIT: i32 = -1;

/// How long to wait for a step's outputs to appear after it exits.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactWait {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ArtifactWait {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

type OutcomeTable = Arc<Mutex<HashMap<String, HashMap<String, StepOutcome>>>>;

pub struct LocalBackend {
    work_root: PathBuf,
    store: Arc<dyn ObjectStore>,
    artifact_wait: ArtifactWait,
    outcomes: OutcomeTable,
}

impl LocalBackend {
    pub fn new(work_root: impl Into<PathBuf>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            work_root: work_root.into(),
            store,
            artifact_wait: ArtifactWait::default(),
            outcomes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_artifact_wait(mut self, wait: ArtifactWait) -> Self {
        self.artifact_wait = wait;
        self
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    async fn submit(&self, spec: BackendJobSpec) -> Result<BackendJobHandle, BackendError> {
        validate_name(&spec.job_name).map_err(|e| BackendError::Rejected(e.to_string()))?;
        for step in &spec.steps {
            if let Some(dep) = step.depends_on.iter().find(|d| spec.step(d.step()).is_none()) {
                return Err(BackendError::Rejected(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.name,
                    dep.step()
                )));
            }
        }
        {
            let mut table = self
                .outcomes
                .lock()
                .map_err(|_| BackendError::Unavailable("outcome table lock poisoned".into()))?;
            if table.contains_key(&spec.job_name) {
                return Err(BackendError::Rejected(format!(
                    "job '{}' already exists",
                    spec.job_name
                )));
            }
            table.insert(spec.job_name.clone(), HashMap::new());
        }

        let handle = BackendJobHandle {
            job_name: spec.job_name.clone(),
            submitted_at: Utc::now(),
        };

        let runner = JobRunner {
            job_dir: self.work_root.join(&spec.job_name),
            store: Arc::clone(&self.store),
            artifact_wait: self.artifact_wait,
            outcomes: Arc::clone(&self.outcomes),
        };
        tokio::spawn(async move { runner.run(spec).await });

        Ok(handle)
    }

    async fn step_outcome(&self, job_name: &str, step: &str) -> Result<StepOutcome, BackendError> {
        let table = self
            .outcomes
            .lock()
            .map_err(|_| BackendError::Unavailable("outcome table lock poisoned".into()))?;
        let job = table
            .get(job_name)
            .ok_or_else(|| BackendError::NotFound(job_name.to_string()))?;
        Ok(job.get(step).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

struct JobRunner {
    job_dir: PathBuf,
    store: Arc<dyn ObjectStore>,
    artifact_wait: ArtifactWait,
    outcomes: OutcomeTable,
}

impl JobRunner {
    async fn run(self, spec: BackendJobSpec) {
        let mut exit_codes: HashMap<String, i32> = HashMap::new();

        for step in &spec.steps {
            let ready = step.depends_on.iter().all(|dep| {
                exit_codes
                    .get(dep.step())
                    .is_some_and(|code| dep.is_satisfied_by(*code))
            });
            if !ready {
                tracing::info!(
                    job_name = %spec.job_name,
                    step = %step.name,
                    "Skipping step with unsatisfied dependencies",
                );
                continue;
            }

            let exit_code = self.run_step(&spec.job_name, step).await;
            exit_codes.insert(step.name.clone(), exit_code);
        }
    }

    async fn run_step(&self, job_name: &str, step: &StepSpec) -> i32 {
        let dir = self.job_dir.join(&step.name);
        let start_time = Utc::now();
        self.record(job_name, &step.name, StepOutcome {
            exit_code: None,
            start_time: Some(start_time),
            end_time: None,
        });

        let exit_code = match self.prepare(&dir, step).await {
            Ok(()) => self.execute_with_retries(job_name, &dir, step).await,
            Err(e) => {
                tracing::error!(job_name, step = %step.name, error = %e, "Failed to stage step inputs");
                ABNORMAL_EXIT
            }
        };

        for output in &step.outputs {
            if let Err(e) = self.upload_outputs(&dir, output).await {
                tracing::warn!(job_name, step = %step.name, pattern = %output.pattern, error = %e, "Failed to upload step outputs");
            }
        }

        self.record(job_name, &step.name, StepOutcome {
            exit_code: Some(exit_code),
            start_time: Some(start_time),
            end_time: Some(Utc::now()),
        });
        tracing::info!(job_name, step = %step.name, exit_code, "Step finished");
        exit_code
    }

    async fn prepare(&self, dir: &Path, step: &StepSpec) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(dir).await?;
        for file in &step.resource_files {
            let bytes = self.store.get(&file.container, &file.name).await?;
            let dest = dir.join(&file.path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(dest, bytes).await?;
        }
        Ok(())
    }

    async fn execute_with_retries(&self, job_name: &str, dir: &Path, step: &StepSpec) -> i32 {
        let mut attempt = 0;
        loop {
            let code = execute(dir, step).await;
            if code == 0 || attempt >= step.max_retries {
                return code;
            }
            attempt += 1;
            tracing::warn!(job_name, step = %step.name, exit_code = code, attempt, "Retrying step");
        }
    }

    /// Upload files matching `output.pattern`, waiting a bounded time for
    /// at least one to appear.
    async fn upload_outputs(&self, dir: &Path, output: &OutputUpload) -> Result<(), StorageError> {
        let (sub_dir, file_pattern) = match output.pattern.rsplit_once('/') {
            Some((sub, file)) => (dir.join(sub), file),
            None => (dir.to_path_buf(), output.pattern.as_str()),
        };

        let mut matches = Vec::new();
        for attempt in 0..self.artifact_wait.attempts.max(1) {
            matches = matching_files(&sub_dir, file_pattern).await?;
            if !matches.is_empty() {
                break;
            }
            if attempt + 1 < self.artifact_wait.attempts {
                tokio::time::sleep(self.artifact_wait.interval).await;
            }
        }

        if matches.is_empty() {
            tracing::warn!(pattern = %output.pattern, dir = %sub_dir.display(), "No outputs appeared");
            return Ok(());
        }

        self.store.create_container(&output.container).await?;
        for name in matches {
            let bytes = tokio::fs::read(sub_dir.join(&name)).await?;
            self.store.put(&output.container, &name, bytes).await?;
        }
        Ok(())
    }

    fn record(&self, job_name: &str, step: &str, outcome: StepOutcome) {
        if let Ok(mut table) = self.outcomes.lock() {
            table
                .entry(job_name.to_string())
                .or_default()
                .insert(step.to_string(), outcome);
        }
    }
}

async fn execute(dir: &Path, step: &StepSpec) -> i32 {
    let working_dir = dir.display().to_string();
    let substitute = |s: &str| s.replace(WORKING_DIR_PLACEHOLDER, &working_dir);

    let Some((program, args)) = step.command.split_first() else {
        tracing::error!(step = %step.name, "Step has an empty command");
        return ABNORMAL_EXIT;
    };

    let mut command = Command::new(substitute(program));
    command
        .args(args.iter().map(|a| substitute(a)))
        .envs(step.env.iter().map(|(k, v)| (k.clone(), substitute(v))))
        .current_dir(dir)
        .kill_on_drop(true);

    match command.status().await {
        Ok(status) => status.code().unwrap_or(ABNORMAL_EXIT),
        Err(e) => {
            tracing::error!(step = %step.name, program = %program, error = %e, "Failed to start step");
            ABNORMAL_EXIT
        }
    }
}

async fn matching_files(dir: &Path, pattern: &str) -> Result<Vec<String>, StorageError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_file() && wildcard_match(pattern, &name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
