//! In-process object store and scripted execution backend.
//!
//! Used by pipeline and API tests, and handy for dry runs: the backend records
//! every submitted job and reports whatever outcomes were scripted for it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::backend::{BackendError, BackendJobHandle, BackendJobSpec, ExecutionBackend, StepOutcome};
use crate::storage::{validate_name, ObjectStore, StorageError};

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryObjectStore {
    containers: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StorageError {
        StorageError::Backend("memory object store lock poisoned".into())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_container(&self, container: &str) -> Result<(), StorageError> {
        validate_name(container)?;
        let mut containers = self.containers.lock().map_err(|_| Self::poisoned())?;
        containers.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn put(&self, container: &str, name: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_name(container)?;
        validate_name(name)?;
        let mut containers = self.containers.lock().map_err(|_| Self::poisoned())?;
        containers
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let containers = self.containers.lock().map_err(|_| Self::poisoned())?;
        containers
            .get(container)
            .and_then(|c| c.get(name))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, StorageError> {
        let containers = self.containers.lock().map_err(|_| Self::poisoned())?;
        Ok(containers
            .get(container)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn read_url(
        &self,
        container: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!("memory://{container}/{name}?ttl={}", ttl.as_secs()))
    }

    async fn write_url(&self, container: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(format!("memory://{container}/?ttl={}", ttl.as_secs()))
    }
}

// ---------------------------------------------------------------------------
// Execution backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptState {
    submitted: Vec<BackendJobSpec>,
    outcomes: HashMap<(String, String), StepOutcome>,
    known: HashMap<String, ()>,
}

/// Records submissions; outcomes are set by the test.
#[derive(Default)]
pub struct ScriptedBackend {
    state: Mutex<ScriptState>,
    unavailable: AtomicBool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_outcome(&self, job_name: &str, step: &str, outcome: StepOutcome) {
        if let Ok(mut state) = self.state.lock() {
            state.known.insert(job_name.to_string(), ());
            state
                .outcomes
                .insert((job_name.to_string(), step.to_string()), outcome);
        }
    }

    /// Drop all record of a job, as if deleted out of band.
    pub fn forget(&self, job_name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.known.remove(job_name);
            state.outcomes.retain(|(job, _), _| job != job_name);
        }
    }

    pub fn submitted(&self) -> Vec<BackendJobSpec> {
        self.state
            .lock()
            .map(|s| s.submitted.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("scripted outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn submit(&self, spec: BackendJobSpec) -> Result<BackendJobHandle, BackendError> {
        self.check_available()?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| BackendError::Unavailable("lock poisoned".into()))?;
        if state.known.contains_key(&spec.job_name) {
            return Err(BackendError::Rejected(format!(
                "job '{}' already exists",
                spec.job_name
            )));
        }
        state.known.insert(spec.job_name.clone(), ());
        let handle = BackendJobHandle {
            job_name: spec.job_name.clone(),
            submitted_at: Utc::now(),
        };
        state.submitted.push(spec);
        Ok(handle)
    }

    async fn step_outcome(&self, job_name: &str, step: &str) -> Result<StepOutcome, BackendError> {
        self.check_available()?;
        let state = self
            .state
            .lock()
            .map_err(|_| BackendError::Unavailable("lock poisoned".into()))?;
        if !state.known.contains_key(job_name) {
            return Err(BackendError::NotFound(job_name.to_string()));
        }
        Ok(state
            .outcomes
            .get(&(job_name.to_string(), step.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RUN_STEP;
    use assert_matches::assert_matches;

    fn spec(name: &str) -> BackendJobSpec {
        BackendJobSpec {
            job_name: name.into(),
            steps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn unknown_and_forgotten_jobs_are_not_found() {
        let backend = ScriptedBackend::new();
        assert_matches!(
            backend.step_outcome("autotune-job-1", RUN_STEP).await,
            Err(BackendError::NotFound(_))
        );

        backend.submit(spec("autotune-job-1")).await.unwrap();
        let outcome = backend.step_outcome("autotune-job-1", RUN_STEP).await.unwrap();
        assert_eq!(outcome.exit_code, None);

        backend.forget("autotune-job-1");
        assert_matches!(
            backend.step_outcome("autotune-job-1", RUN_STEP).await,
            Err(BackendError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn outage_fails_submission() {
        let backend = ScriptedBackend::new();
        backend.set_unavailable(true);
        assert_matches!(
            backend.submit(spec("autotune-job-2")).await,
            Err(BackendError::Unavailable(_))
        );
        assert!(backend.submitted().is_empty());
    }

    #[tokio::test]
    async fn duplicate_job_names_are_rejected() {
        let backend = ScriptedBackend::new();
        backend.submit(spec("autotune-job-3")).await.unwrap();
        assert_matches!(
            backend.submit(spec("autotune-job-3")).await,
            Err(BackendError::Rejected(_))
        );
    }

    #[tokio::test]
    async fn memory_store_lists_sorted_names() {
        let store = MemoryObjectStore::new();
        store.put("c", "b.log", vec![1]).await.unwrap();
        store.put("c", "a.log", vec![2]).await.unwrap();
        assert_eq!(store.list("c").await.unwrap(), vec!["a.log", "b.log"]);
        assert_matches!(store.get("c", "z").await, Err(StorageError::NotFound { .. }));
    }
}
