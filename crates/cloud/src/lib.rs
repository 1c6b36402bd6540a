//! Execution backends and object storage for tuning jobs.

pub mod backend;
pub mod local_backend;
pub mod memory;
pub mod s3;
pub mod storage;

pub use backend::{
    BackendError, BackendJobHandle, BackendJobSpec, ExecutionBackend, OutputUpload, ResourceFile,
    StepDependency, StepOutcome, StepSpec, NOTIFY_STEP, RUN_STEP, WORKING_DIR_PLACEHOLDER,
};
pub use local_backend::{ArtifactWait, LocalBackend};
pub use memory::{MemoryObjectStore, ScriptedBackend};
pub use s3::S3ObjectStore;
pub use storage::{LocalObjectStore, ObjectStore, StorageError};
