//! Object store seam and the local filesystem implementation.
//!
//! Objects live in flat containers, one per tuning job. Object names are
//! plain file names; anything with a path separator is rejected.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object '{name}' not found in container '{container}'")]
    NotFound { container: String, name: String },

    #[error("invalid object or container name '{0}'")]
    InvalidName(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the container if it does not exist.
    async fn create_container(&self, container: &str) -> Result<(), StorageError>;

    async fn put(&self, container: &str, name: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    async fn get(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Object names in the container, sorted.
    async fn list(&self, container: &str) -> Result<Vec<String>, StorageError>;

    /// Time-limited read link to one object.
    async fn read_url(&self, container: &str, name: &str, ttl: Duration)
        -> Result<String, StorageError>;

    /// Time-limited link a backend can upload outputs into.
    async fn write_url(&self, container: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Reject names that could escape their container.
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if bad {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Match a file name against a pattern where `*` matches any run of characters.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) || name.len() < first.len() + last.len() || !name.ends_with(last) {
        return false;
    }

    let mut rest = &name[first.len()..name.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Containers as directories under `root`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, StorageError> {
        validate_name(container)?;
        Ok(self.root.join(container))
    }

    fn object_path(&self, container: &str, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.container_dir(container)?.join(name))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn create_container(&self, container: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.container_dir(container)?).await?;
        Ok(())
    }

    async fn put(&self, container: &str, name: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(container, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(container, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.container_dir(container)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_url(
        &self,
        container: &str,
        name: &str,
        _ttl: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!("file://{}", self.object_path(container, name)?.display()))
    }

    async fn write_url(&self, container: &str, _ttl: Duration) -> Result<String, StorageError> {
        Ok(format!("file://{}", self.container_dir(container)?.display()))
    }
}
