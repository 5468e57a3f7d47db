//! Per-run message values produced by a fetch and consumed by the ledger merge.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// A mailbox message parsed from one FETCH result.
///
/// Fields that fail to parse stay at their zero value (empty string, empty
/// list, or the Unix epoch for `date`).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Mailbox sequence number the message was fetched under.
    pub seq: u32,
    pub id: String,
    pub date: DateTime<Utc>,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    pub from: Vec<String>,
    pub sender: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Vec<String>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new(seq: u32, id: impl Into<String>) -> Self {
        Self {
            seq,
            id: id.into(),
            date: DateTime::<Utc>::UNIX_EPOCH,
            subject: String::new(),
            body_text: String::new(),
            body_html: String::new(),
            from: Vec::new(),
            sender: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            attachments: Vec::new(),
        }
    }
}

/// A file part of a message.
///
/// The payload is owned by the message until the upload task takes it; `link`
/// is only set once the blob store accepted the object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub payload: Vec<u8>,
    pub link: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            payload,
            link: None,
        }
    }
}

/// Render an address list as a single comma-separated cell value.
pub fn join_addresses(addresses: &[String]) -> String {
    addresses.join(", ")
}

/// Newest first by stored date, ties broken by sequence number (higher first).
///
/// Only the stored timestamps are compared, so the order never depends on
/// when the comparison runs.
pub fn newest_first(a: &Message, b: &Message) -> Ordering {
    b.date.cmp(&a.date).then_with(|| b.seq.cmp(&a.seq))
}

pub fn sort_newest_first(messages: &mut [Message]) {
    messages.sort_by(newest_first);
}
