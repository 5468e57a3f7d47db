//! Object storage for ledgers and attachment blobs.

pub mod s3;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use s3::S3BlobStore;

/// Errors returned by a [`BlobStore`]. A missing object is not an error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request for `{key}` failed: {reason}")]
    Request { key: String, reason: String },
    #[error("unable to read body of `{key}`: {reason}")]
    Body { key: String, reason: String },
    #[error("unable to presign `{key}`: {reason}")]
    Presign { key: String, reason: String },
}

impl StorageError {
    pub fn request(key: &str, reason: impl ToString) -> Self {
        StorageError::Request {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Key/value object store with time-bounded read links.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object; `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Create or replace an object.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// A shareable read link valid for `ttl`.
    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Store `bytes` and return a read link for them.
    async fn put_with_link(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        self.put(key, bytes, content_type).await?;
        self.presign(key, ttl).await
    }
}

/// Key of the ledger object for `owner`.
pub fn ledger_key(owner: &str, object_name: &str) -> String {
    format!("{owner}/{object_name}")
}

/// Key of one attachment blob.
pub fn attachment_key(owner: &str, message_id: &str, attachment_name: &str) -> String {
    format!("{owner}/{message_id}/{attachment_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_owner() {
        assert_eq!(
            ledger_key("ann@example.com", "data.xlsx"),
            "ann@example.com/data.xlsx"
        );
        assert_eq!(
            attachment_key("ann@example.com", "abc@mx", "invoice.pdf"),
            "ann@example.com/abc@mx/invoice.pdf"
        );
    }
}
