//! Batch fetch: one sequence range in, parsed messages out, newest first.

use crate::mailbox::{MessageSource, RawMessage, SeqRange};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::message::{Message, sort_newest_first};
use crate::sync::parser::parse_message;
use tokio::sync::mpsc;

/// Capacity of the channel between the transport and the collector.
const FETCH_CHANNEL_CAPACITY: usize = 10;

/// Fetch every message in `range` and return them sorted newest first.
///
/// The transport delivers results in any order; collection waits for the
/// transport to finish and then requires exactly `range.count()` results. A
/// transport error or a short batch fails the whole range.
pub async fn fetch_sorted<S>(source: &mut S, range: SeqRange) -> SyncResult<Vec<Message>>
where
    S: MessageSource + ?Sized,
{
    let expected = range.count();
    let (tx, mut rx) = mpsc::channel::<RawMessage>(FETCH_CHANNEL_CAPACITY);

    let collect = async move {
        let mut raws = Vec::with_capacity(expected);
        while let Some(raw) = rx.recv().await {
            raws.push(raw);
        }
        raws
    };

    let (status, raws) = tokio::join!(source.fetch(range, tx), collect);
    status?;

    if raws.len() != expected {
        return Err(SyncError::Transfer(format!(
            "FETCH {} returned {} of {} messages",
            range,
            raws.len(),
            expected
        )));
    }

    let mut messages: Vec<Message> = raws.iter().map(parse_message).collect();
    sort_newest_first(&mut messages);

    log::debug!("fetched batch {} ({} messages)", range, messages.len());
    Ok(messages)
}
