use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::time::Duration;

use super::model::key_from_locator;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("cannot derive an object key from locator {0}")]
    InvalidLocator(String),
    #[error("S3 {operation} error: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
}

/// Object storage as seen by the worker and the preview service.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the object behind a storage key or a (presigned) URL.
    async fn fetch_bytes(&self, locator: &str) -> Result<Vec<u8>, BlobError>;

    /// Upload, overwriting any existing object under `key`.
    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError>;

    /// Time-limited GET URL for `key`.
    async fn presign_read(&self, key: &str, ttl: Duration) -> Result<String, BlobError>;
}

#[derive(Clone)]
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn storage_err<E>(operation: &'static str, e: E) -> BlobError
where
    E: std::error::Error + 'static,
{
    BlobError::Storage {
        operation,
        message: DisplayErrorContext(&e).to_string(),
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn fetch_bytes(&self, locator: &str) -> Result<Vec<u8>, BlobError> {
        let key = key_from_locator(locator, &self.bucket)
            .ok_or_else(|| BlobError::InvalidLocator(locator.to_string()))?;

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_no_such_key() => BlobError::NotFound(key.clone()),
                _ => storage_err("get_object", e),
            })?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| storage_err("get_object body", e))?;

        Ok(body.into_bytes().to_vec())
    }

    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| storage_err("put_object", e))?;

        tracing::debug!("📤 uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn presign_read(&self, key: &str, ttl: Duration) -> Result<String, BlobError> {
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|e| storage_err("presign config", e))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| storage_err("presign get_object", e))?;

        Ok(request.uri().to_string())
    }
}
