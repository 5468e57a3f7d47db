use super::{BlobStore, StorageError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use std::time::Duration;

/// [`BlobStore`] over a single S3 bucket.
#[derive(Debug, Clone)]
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

    /// Build a client from the default AWS credential and region chain.
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(S3Client::new(&aws_config), bucket)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|service| service.is_no_such_key())
                    .unwrap_or(false)
                {
                    log::debug!("s3: {} not found in {}", key, self.bucket);
                    return Ok(None);
                }
                return Err(StorageError::request(key, DisplayErrorContext(&err)));
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Body {
                key: key.to_string(),
                reason: e.to_string(),
            })?
            .into_bytes();

        Ok(Some(bytes.to_vec()))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::request(key, DisplayErrorContext(&e)))?;

        log::debug!("s3: stored {} ({} bytes)", key, size);
        Ok(())
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let presign_error = |reason: String| StorageError::Presign {
            key: key.to_string(),
            reason,
        };

        let config = PresigningConfig::expires_in(ttl).map_err(|e| presign_error(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| presign_error(DisplayErrorContext(&e).to_string()))?;

        Ok(request.uri().to_string())
    }
}
