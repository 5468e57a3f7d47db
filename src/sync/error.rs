use crate::storage::StorageError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Request-level failures of a synchronization run.
///
/// Every variant aborts the run and no ledger link is produced. Per-field parse
/// failures and per-attachment upload failures never surface here; they are
/// absorbed where they occur.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unable to connect to {address}: {reason}")]
    Connection { address: String, reason: String },
    #[error("unable to login as {user}: {reason}")]
    Auth { user: String, reason: String },
    #[error("mailbox transfer failed: {0}")]
    Transfer(String),
    #[error("invalid sequence range {from}..={to}")]
    InvalidRange { from: u32, to: u32 },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("unable to encode ledger: {0}")]
    Encode(String),
    #[error("unable to decode ledger: {0}")]
    Decode(String),
    #[error("ledger watermark `{0}` is not a valid date")]
    Watermark(String),
}

impl SyncError {
    /// True when the failure was caused by what the caller sent (address or credentials).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SyncError::Connection { .. } | SyncError::Auth { .. } | SyncError::InvalidRange { .. }
        )
    }
}
