//! S3 implementation of [`ObjectStore`].
//!
//! A container is a key prefix (`<container>/`) inside one bucket, so
//! `create_container` has nothing to create.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;

use crate::storage::{validate_name, ObjectStore, StorageError};

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the standard AWS environment (region, credentials).
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket)
    }

    fn key(container: &str, name: &str) -> Result<String, StorageError> {
        validate_name(container)?;
        validate_name(name)?;
        Ok(format!("{container}/{name}"))
    }

    fn presigning(ttl: Duration) -> Result<PresigningConfig, StorageError> {
        PresigningConfig::expires_in(ttl).map_err(|e| StorageError::Backend(e.to_string()))
    }
}

fn backend_err(err: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn create_container(&self, container: &str) -> Result<(), StorageError> {
        validate_name(container)
    }

    async fn put(&self, container: &str, name: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::key(container, name)?)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(container, name)?)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound {
                        container: container.to_string(),
                        name: name.to_string(),
                    }
                } else {
                    backend_err(e)
                }
            })?;

        let data = output.body.collect().await.map_err(backend_err)?;
        Ok(data.into_bytes().to_vec())
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, StorageError> {
        validate_name(container)?;
        let prefix = format!("{container}/");
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(backend_err)?;

            names.extend(
                page.contents()
                    .iter()
                    .filter_map(|o| o.key())
                    .filter_map(|k| k.strip_prefix(&prefix))
                    .filter(|n| !n.is_empty() && !n.contains('/'))
                    .map(str::to_string),
            );

            match page.next_continuation_token() {
                Some(token) if page.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }

        names.sort();
        Ok(names)
    }

    async fn read_url(
        &self,
        container: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(container, name)?)
            .presigned(Self::presigning(ttl)?)
            .await
            .map_err(backend_err)?;
        Ok(request.uri().to_string())
    }

    /// S3 has no container-scoped upload link; this is the `s3://` prefix a
    /// backend with bucket credentials uploads outputs under.
    async fn write_url(&self, container: &str, _ttl: Duration) -> Result<String, StorageError> {
        validate_name(container)?;
        Ok(format!("s3://{}/{container}/", self.bucket))
    }
}
