//! Mailbox walks built on [`fetch_sorted`]: the fixed bootstrap window and the
//! backward watermark scan.

use crate::mailbox::{MessageSource, SeqRange};
use crate::sync::batch::fetch_sorted;
use crate::sync::error::SyncResult;
use crate::sync::message::{Message, sort_newest_first};
use crate::sync::watermark::Watermark;

/// Fetch the `window` most recent messages, newest first.
///
/// An empty mailbox returns immediately without fetching.
pub async fn fetch_recent<S>(source: &mut S, window: u32) -> SyncResult<Vec<Message>>
where
    S: MessageSource + ?Sized,
{
    let total = source.message_count();
    if total == 0 || window == 0 {
        return Ok(Vec::new());
    }

    let from = total.saturating_sub(window - 1).max(1);
    fetch_sorted(source, SeqRange::new(from, total)?).await
}

/// Collect every message strictly newer than `watermark`, newest first.
///
/// Walks backward from the highest sequence number in batches of
/// `batch_size`. Within a batch (already sorted newest first) the first
/// message at or before the watermark ends the walk; the rest of that batch
/// and everything older is skipped. The walk also ends when sequence number 1
/// has been fetched. Any transport error aborts the whole scan.
pub async fn fetch_after<S>(
    source: &mut S,
    watermark: Watermark,
    batch_size: u32,
) -> SyncResult<Vec<Message>>
where
    S: MessageSource + ?Sized,
{
    let batch_size = batch_size.max(1);
    let mut collected = Vec::new();
    let mut to = source.message_count();
    let mut batches = 0usize;

    'walk: while to >= 1 {
        let from = to.saturating_sub(batch_size - 1).max(1);
        let batch = fetch_sorted(source, SeqRange::new(from, to)?).await?;
        batches += 1;

        for message in batch {
            if !watermark.admits(message.date) {
                break 'walk;
            }
            collected.push(message);
        }

        to = from - 1;
    }

    sort_newest_first(&mut collected);
    log::debug!(
        "watermark scan: {} new messages across {} batches",
        collected.len(),
        batches
    );
    Ok(collected)
}
