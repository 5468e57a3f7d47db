//! Mailbox access: the message source a synchronization run reads from.
//!
//! A [`MailboxConnector`] opens an authenticated session with the INBOX
//! selected. The session ([`MessageSource`]) reports the message count taken
//! at selection time and streams raw FETCH results for a sequence range into
//! a bounded channel supplied by the caller.

pub mod imap;

use crate::sync::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

pub use imap::ImapConnector;

/// Closed, 1-based range of mailbox sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqRange {
    from: u32,
    to: u32,
}

impl SeqRange {
    pub fn new(from: u32, to: u32) -> SyncResult<Self> {
        if from == 0 || from > to {
            return Err(SyncError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> u32 {
        self.from
    }

    pub fn to(&self) -> u32 {
        self.to
    }

    /// Number of messages the range covers.
    pub fn count(&self) -> usize {
        (self.to - self.from + 1) as usize
    }
}

impl fmt::Display for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.from, self.to)
    }
}

/// One FETCH result: the envelope id and the full RFC 5322 message.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub seq: u32,
    pub envelope_id: Option<String>,
    pub body: Vec<u8>,
}

/// Connection parameters supplied with a synchronization request.
#[derive(Clone)]
pub struct Credentials {
    /// `host` or `host:port` of the IMAP server.
    pub address: String,
    pub user: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// An authenticated session with the INBOX selected.
#[async_trait]
pub trait MessageSource: Send {
    /// Total number of messages in the INBOX when it was selected.
    fn message_count(&self) -> u32;

    /// Stream every message in `range` into `sink`, in any order.
    ///
    /// Returns once the server signalled completion. A transport error aborts
    /// the whole range; results already sent must not be used.
    async fn fetch(&mut self, range: SeqRange, sink: mpsc::Sender<RawMessage>) -> SyncResult<()>;

    async fn logout(&mut self) -> SyncResult<()>;
}

/// Opens sessions: connect, authenticate, select the INBOX.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn open(&self, credentials: &Credentials) -> SyncResult<Box<dyn MessageSource>>;
}
