//! Incremental mailbox-to-ledger synchronization.
//!
//! One run reads the owner's ledger from object storage, works out which
//! mailbox messages are new, uploads their attachments and writes the ledger
//! back whole. The ledger object has no partial update, so every change is a
//! read-modify-write guarded by a per-owner lock.
//!
//! # Components
//!
//! - **`batch`**: fetch one sequence range and sort it newest first.
//! - **`scan`**: the bootstrap window and the backward watermark walk.
//! - **`parser`**: MIME parsing of raw FETCH results into [`message::Message`]s.
//! - **`attachments`**: bounded concurrent upload of attachment blobs.
//! - **`ledger`** / **`workbook`**: the in-memory ledger and its `.xlsx` codec.
//! - **`watermark`**: the newest recorded date and the "is this new" test.
//! - **`locks`**: per-owner write exclusivity.
//!
//! # Run paths
//!
//! - **Bootstrap**: no ledger stored yet. The most recent
//!   `bootstrap_window` messages seed a fresh ledger.
//! - **Incremental**: the ledger exists. Messages newer than its first data
//!   row are prepended under the header. With nothing new the stored ledger
//!   is left untouched and only a fresh link is issued.
//!
//! The mailbox session is logged out at the end of every run, failed or not.

pub mod attachments;
pub mod batch;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod message;
pub mod parser;
pub mod scan;
pub mod watermark;
pub mod workbook;

use crate::config::AppConfig;
use crate::mailbox::{Credentials, MailboxConnector, MessageSource};
use crate::storage::{BlobStore, ledger_key};
use attachments::AttachmentUploader;
use error::SyncResult;
use ledger::Ledger;
use locks::OwnerLocks;
use std::sync::Arc;
use uuid::Uuid;

pub use error::SyncError;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Which path a run took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPath {
    Bootstrap,
    Incremental,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Time-bounded read link to the ledger.
    pub link: String,
    pub path: SyncPath,
    /// Messages added to the ledger by this run.
    pub new_messages: usize,
    /// False when nothing was new and the stored ledger was not rewritten.
    pub written: bool,
}

/// Runs synchronizations against injected mailbox and storage clients.
///
/// Built once per process and shared; concurrent runs for the same owner are
/// serialised by [`OwnerLocks`].
pub struct SyncService {
    connector: Arc<dyn MailboxConnector>,
    store: Arc<dyn BlobStore>,
    config: AppConfig,
    locks: OwnerLocks,
    uploader: AttachmentUploader,
}

impl SyncService {
    pub fn new(
        connector: Arc<dyn MailboxConnector>,
        store: Arc<dyn BlobStore>,
        config: AppConfig,
    ) -> Self {
        let uploader = AttachmentUploader::new(
            Arc::clone(&store),
            config.link_ttl,
            config.upload_concurrency,
        );
        Self {
            connector,
            store,
            config,
            locks: OwnerLocks::new(),
            uploader,
        }
    }

    /// Synchronize the INBOX behind `credentials` into its owner's ledger.
    pub async fn sync(&self, credentials: &Credentials) -> SyncResult<SyncOutcome> {
        let run_id = Uuid::new_v4();
        let owner = credentials.user.as_str();
        log::info!(
            "sync {}: starting for {} via {}",
            run_id,
            owner,
            credentials.address
        );

        let mut source = self
            .connector
            .open(credentials)
            .await
            .inspect_err(|e| log::warn!("sync {}: unable to open mailbox: {}", run_id, e))?;

        let result = {
            let _guard = self.locks.acquire(owner).await;
            self.run(run_id, owner, source.as_mut()).await
        };

        if let Err(e) = source.logout().await {
            log::warn!("sync {}: logout failed: {}", run_id, e);
        }

        match &result {
            Ok(outcome) => log::info!(
                "sync {}: finished ({:?}, {} new messages, written: {})",
                run_id,
                outcome.path,
                outcome.new_messages,
                outcome.written
            ),
            Err(e) => log::error!("sync {}: failed: {}", run_id, e),
        }
        result
    }

    async fn run(
        &self,
        run_id: Uuid,
        owner: &str,
        source: &mut dyn MessageSource,
    ) -> SyncResult<SyncOutcome> {
        let key = ledger_key(owner, &self.config.ledger_object);
        log::info!(
            "sync {}: mailbox holds {} messages, reading {}",
            run_id,
            source.message_count(),
            key
        );

        match self.store.get(&key).await? {
            None => self.bootstrap(run_id, owner, &key, source).await,
            Some(bytes) => self.incremental(run_id, owner, &key, &bytes, source).await,
        }
    }

    async fn bootstrap(
        &self,
        run_id: Uuid,
        owner: &str,
        key: &str,
        source: &mut dyn MessageSource,
    ) -> SyncResult<SyncOutcome> {
        log::info!("sync {}: no ledger found, bootstrapping", run_id);

        let mut messages = scan::fetch_recent(source, self.config.bootstrap_window).await?;
        log::info!("sync {}: fetched {} recent messages", run_id, messages.len());

        self.uploader.upload_all(owner, &mut messages).await;

        let ledger = Ledger::from_messages(&messages);
        let link = self.persist(run_id, key, &ledger).await?;

        Ok(SyncOutcome {
            link,
            path: SyncPath::Bootstrap,
            new_messages: messages.len(),
            written: true,
        })
    }

    async fn incremental(
        &self,
        run_id: Uuid,
        owner: &str,
        key: &str,
        bytes: &[u8],
        source: &mut dyn MessageSource,
    ) -> SyncResult<SyncOutcome> {
        let mut ledger = workbook::decode(bytes)?;
        let watermark = ledger.watermark(self.config.strict_watermark)?;
        log::info!(
            "sync {}: ledger has {} rows, watermark {:?}",
            run_id,
            ledger.messages.data_rows(),
            watermark
        );

        let mut messages = scan::fetch_after(source, watermark, self.config.batch_size).await?;
        if messages.is_empty() {
            log::info!("sync {}: nothing new, ledger unchanged", run_id);
            let link = self.store.presign(key, self.config.link_ttl).await?;
            return Ok(SyncOutcome {
                link,
                path: SyncPath::Incremental,
                new_messages: 0,
                written: false,
            });
        }

        log::info!("sync {}: {} new messages", run_id, messages.len());
        self.uploader.upload_all(owner, &mut messages).await;

        ledger.prepend(&messages);
        let link = self.persist(run_id, key, &ledger).await?;

        Ok(SyncOutcome {
            link,
            path: SyncPath::Incremental,
            new_messages: messages.len(),
            written: true,
        })
    }

    async fn persist(&self, run_id: Uuid, key: &str, ledger: &Ledger) -> SyncResult<String> {
        let bytes = workbook::encode(ledger)?;
        log::info!(
            "sync {}: writing {} ({} bytes, {} rows)",
            run_id,
            key,
            bytes.len(),
            ledger.messages.rows.len()
        );
        let link = self
            .store
            .put_with_link(key, bytes, Some(XLSX_CONTENT_TYPE), self.config.link_ttl)
            .await?;
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ledger::Cell;
    use crate::sync::watermark::format_ledger_date;
    use crate::test_support::{MemoryBlobStore, ScriptedConnector, ScriptedMailbox};
    use chrono::{DateTime, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    fn credentials() -> Credentials {
        Credentials {
            address: "imap.example.com".into(),
            user: "ann@example.com".into(),
            secret: "secret".into(),
        }
    }

    fn service(connector: &Arc<ScriptedConnector>, store: &Arc<MemoryBlobStore>) -> SyncService {
        let connector: Arc<dyn MailboxConnector> = connector.clone();
        let store: Arc<dyn BlobStore> = store.clone();
        SyncService::new(connector, store, AppConfig::default())
    }

    fn stored_ledger(store: &MemoryBlobStore) -> Ledger {
        let bytes = store
            .object("ann@example.com/data.xlsx")
            .expect("ledger stored");
        workbook::decode(&bytes).unwrap()
    }

    #[tokio::test]
    async fn bootstrap_records_most_recent_window() {
        let mailbox = ScriptedMailbox::evenly_spaced(base(), 30);
        let newest = mailbox.date_of(30);
        let connector = Arc::new(ScriptedConnector::new(mailbox));
        let store = Arc::new(MemoryBlobStore::new());

        let outcome = service(&connector, &store)
            .sync(&credentials())
            .await
            .unwrap();

        assert_eq!(outcome.path, SyncPath::Bootstrap);
        assert_eq!(outcome.new_messages, 25);
        assert!(outcome.link.starts_with("memory://ann@example.com/data.xlsx"));
        assert_eq!(connector.fetched_ranges().len(), 1);
        assert_eq!(connector.fetched_ranges()[0].to_string(), "6:30");

        let ledger = stored_ledger(&store);
        assert_eq!(ledger.messages.rows.len(), 26);
        assert_eq!(
            ledger.messages.cell(1, 1),
            Some(&Cell::text(format_ledger_date(newest)))
        );
        assert_eq!(
            store.content_type("ann@example.com/data.xlsx").as_deref(),
            Some(XLSX_CONTENT_TYPE)
        );
        assert_eq!(connector.logouts(), 1);
    }

    #[tokio::test]
    async fn empty_mailbox_bootstraps_header_only_ledger() {
        let connector = Arc::new(ScriptedConnector::new(ScriptedMailbox::new(Vec::new())));
        let store = Arc::new(MemoryBlobStore::new());

        let outcome = service(&connector, &store)
            .sync(&credentials())
            .await
            .unwrap();

        assert_eq!(outcome.new_messages, 0);
        assert!(connector.fetched_ranges().is_empty());
        assert_eq!(stored_ledger(&store).messages.rows.len(), 1);
    }

    #[tokio::test]
    async fn incremental_prepends_only_new_messages() {
        let store = Arc::new(MemoryBlobStore::new());

        // First run sees 37 messages, the second sees 40.
        let first = Arc::new(ScriptedConnector::new(ScriptedMailbox::evenly_spaced(
            base(),
            37,
        )));
        service(&first, &store).sync(&credentials()).await.unwrap();
        assert_eq!(stored_ledger(&store).messages.rows.len(), 26);

        let mailbox = ScriptedMailbox::evenly_spaced(base(), 40);
        let dates: Vec<String> = (38..=40)
            .rev()
            .map(|seq| format_ledger_date(mailbox.date_of(seq)))
            .collect();
        let second = Arc::new(ScriptedConnector::new(mailbox));

        let outcome = service(&second, &store)
            .sync(&credentials())
            .await
            .unwrap();

        assert_eq!(outcome.path, SyncPath::Incremental);
        assert_eq!(outcome.new_messages, 3);
        assert!(outcome.written);
        assert_eq!(second.fetched_ranges().len(), 1);
        assert_eq!(second.fetched_ranges()[0].to_string(), "31:40");

        let ledger = stored_ledger(&store);
        assert_eq!(ledger.messages.rows.len(), 29);
        let top: Vec<String> = (1..=3)
            .map(|row| ledger.messages.rows[row][1].value.clone())
            .collect();
        assert_eq!(top, dates);
        assert_eq!(ledger.messages.rows[0][0], Cell::text("Id"));
    }

    #[tokio::test]
    async fn nothing_new_leaves_ledger_untouched() {
        let store = Arc::new(MemoryBlobStore::new());
        let connector = Arc::new(ScriptedConnector::new(ScriptedMailbox::evenly_spaced(
            base(),
            12,
        )));
        let service = service(&connector, &store);

        service.sync(&credentials()).await.unwrap();
        let puts_after_bootstrap = store.put_count();

        let outcome = service.sync(&credentials()).await.unwrap();

        assert!(!outcome.written);
        assert_eq!(outcome.new_messages, 0);
        assert!(outcome.link.contains("ttl=604800"));
        assert_eq!(store.put_count(), puts_after_bootstrap);
        assert_eq!(connector.logouts(), 2);
    }

    #[tokio::test]
    async fn failed_attachment_upload_still_writes_ledger() {
        let mailbox = ScriptedMailbox::evenly_spaced(base(), 3)
            .with_attachment(2, "good.txt")
            .with_attachment(3, "bad.txt");
        let connector = Arc::new(ScriptedConnector::new(mailbox));
        let store = Arc::new(MemoryBlobStore::new());
        store.fail_puts_for("ann@example.com/msg-3@scripted.test/bad.txt");

        let outcome = service(&connector, &store)
            .sync(&credentials())
            .await
            .unwrap();
        assert_eq!(outcome.new_messages, 3);

        assert!(
            store
                .object("ann@example.com/msg-2@scripted.test/good.txt")
                .is_some()
        );
        let ledger = stored_ledger(&store);
        assert_eq!(ledger.attachments.data_rows(), 2);
        // Newest message (seq 3) comes first.
        assert_eq!(ledger.attachments.cell(1, 1), Some(&Cell::text("bad.txt")));
        let good = ledger.attachments.cell(2, 1).unwrap();
        assert_eq!(good.value, "good.txt");
        assert!(good.link.as_deref().is_some_and(|l| l.contains("good.txt")));
        assert_eq!(ledger.messages.rows[1][7].value, "bad.txt");
    }

    #[tokio::test]
    async fn transfer_error_fails_run_and_still_logs_out() {
        let mailbox = ScriptedMailbox::evenly_spaced(base(), 30).fail_on_fetch(1);
        let connector = Arc::new(ScriptedConnector::new(mailbox));
        let store = Arc::new(MemoryBlobStore::new());

        let err = service(&connector, &store)
            .sync(&credentials())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Transfer(_)));
        assert!(store.object("ann@example.com/data.xlsx").is_none());
        assert_eq!(connector.logouts(), 1);
    }

    #[tokio::test]
    async fn rejected_login_is_a_client_error() {
        let connector = Arc::new(ScriptedConnector::rejecting_login());
        let store = Arc::new(MemoryBlobStore::new());

        let err = service(&connector, &store)
            .sync(&credentials())
            .await
            .unwrap_err();

        assert!(err.is_client_error());
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn corrupt_ledger_fails_without_writing() {
        let connector = Arc::new(ScriptedConnector::new(ScriptedMailbox::evenly_spaced(
            base(),
            5,
        )));
        let store = Arc::new(MemoryBlobStore::new());
        store.insert("ann@example.com/data.xlsx", b"not a workbook".to_vec());

        let err = service(&connector, &store)
            .sync(&credentials())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Decode(_)));
        assert_eq!(
            store.object("ann@example.com/data.xlsx").as_deref(),
            Some(&b"not a workbook"[..])
        );
        assert_eq!(connector.logouts(), 1);
    }
}
