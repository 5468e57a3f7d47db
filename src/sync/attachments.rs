//! Attachment fan-out: upload every attachment of a message set to the blob
//! store and record an access link on each one.
//!
//! Uploads run as tasks on a `JoinSet`, at most `concurrency` at a time. The
//! join loop is the barrier: [`AttachmentUploader::upload_all`] returns only
//! after every task finished, so a ledger written afterwards never points at
//! an upload still in flight. A failed upload is logged and leaves that
//! attachment without a link; it never aborts its siblings.

use crate::storage::{BlobStore, StorageError, attachment_key};
use crate::sync::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome counts of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct AttachmentUploader {
    store: Arc<dyn BlobStore>,
    link_ttl: Duration,
    permits: Arc<Semaphore>,
}

impl AttachmentUploader {
    pub fn new(store: Arc<dyn BlobStore>, link_ttl: Duration, concurrency: usize) -> Self {
        Self {
            store,
            link_ttl,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Upload all attachments of `messages` under `owner`, setting each link on success.
    ///
    /// Payloads are moved into the upload tasks; after this returns every
    /// attachment's payload is empty whether or not its upload succeeded.
    pub async fn upload_all(&self, owner: &str, messages: &mut [Message]) -> UploadSummary {
        let mut tasks = JoinSet::new();

        for (message_index, message) in messages.iter_mut().enumerate() {
            for (attachment_index, attachment) in message.attachments.iter_mut().enumerate() {
                let key = attachment_key(owner, &message.id, &attachment.name);
                let payload = std::mem::take(&mut attachment.payload);
                let content_type = attachment.content_type.clone();
                let store = Arc::clone(&self.store);
                let permits = Arc::clone(&self.permits);
                let ttl = self.link_ttl;

                tasks.spawn(async move {
                    let result = match permits.acquire_owned().await {
                        Ok(_permit) => {
                            store
                                .put_with_link(&key, payload, Some(content_type.as_str()), ttl)
                                .await
                        }
                        Err(_) => Err(StorageError::request(&key, "upload pool closed")),
                    };
                    (message_index, attachment_index, key, result)
                });
            }
        }

        let mut summary = UploadSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((message_index, attachment_index, _key, Ok(link))) => {
                    messages[message_index].attachments[attachment_index].link = Some(link);
                    summary.uploaded += 1;
                }
                Ok((_, _, key, Err(e))) => {
                    log::warn!("attachment upload failed for {}: {}", key, e);
                    summary.failed += 1;
                }
                Err(e) => {
                    log::error!("attachment upload task aborted: {}", e);
                    summary.failed += 1;
                }
            }
        }

        if summary.uploaded + summary.failed > 0 {
            log::info!(
                "attachments for {}: {} uploaded, {} failed",
                owner,
                summary.uploaded,
                summary.failed
            );
        }
        summary
    }
}
