#[macro_use]
extern crate rocket;

pub mod config;
pub mod error;
pub mod mailbox;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod storage;
pub mod sync;

use crate::config::AppConfig;
use crate::mailbox::{ImapConnector, MailboxConnector};
use crate::request_logger::RequestLogger;
use crate::storage::{BlobStore, S3BlobStore};
use crate::sync::SyncService;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, Cors, CorsOptions};
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

fn cors() -> Result<Cors, rocket_cors::Error> {
    CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Options]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .to_cors()
}

/// Build the S3 and IMAP clients and the service that owns them.
pub async fn build_sync_service(config: AppConfig) -> SyncService {
    let store: Arc<dyn BlobStore> = Arc::new(S3BlobStore::from_env(config.bucket.clone()).await);
    let connector: Arc<dyn MailboxConnector> =
        Arc::new(ImapConnector::new(config.imap_default_port));
    SyncService::new(connector, store, config)
}

pub fn rocket() -> Rocket<Build> {
    init_logger();
    log::info!("starting mail-ledger {}", env!("CARGO_PKG_VERSION"));

    let rocket = rocket::build()
        .attach(RequestLogger)
        .attach(AdHoc::on_ignite("Sync Service", |rocket| async move {
            let config = AppConfig::from_env();
            log::info!(
                "ledgers in bucket `{}` as `{}`; bootstrap window {}, batch size {}, {} upload slots",
                config.bucket,
                config.ledger_object,
                config.bootstrap_window,
                config.batch_size,
                config.upload_concurrency
            );
            rocket.manage(build_sync_service(config).await)
        }))
        .mount(
            "/api/v1",
            openapi_get_routes![routes::health::health_check, routes::sync::sync_mailbox],
        )
        .register("/", routes::catchers())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Mail Ledger API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        );

    match cors() {
        Ok(cors) => rocket.attach(cors),
        Err(e) => {
            log::error!("CORS disabled, invalid options: {}", e);
            rocket
        }
    }
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::config::AppConfig;
    use crate::mailbox::MailboxConnector;
    use crate::storage::BlobStore;
    use crate::sync::SyncService;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use std::sync::Arc;

    pub use mailbox::{ScriptedConnector, ScriptedMailbox};
    pub use storage::MemoryBlobStore;

    /// A service wired to in-process doubles with default settings.
    pub fn scripted_service(
        connector: Arc<ScriptedConnector>,
        store: Arc<MemoryBlobStore>,
    ) -> SyncService {
        let connector: Arc<dyn MailboxConnector> = connector;
        let store: Arc<dyn BlobStore> = store;
        SyncService::new(connector, store, AppConfig::default())
    }

    pub mod storage {
        use crate::storage::{BlobStore, StorageError};
        use async_trait::async_trait;
        use dashmap::{DashMap, DashSet};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        struct StoredObject {
            bytes: Vec<u8>,
            content_type: Option<String>,
        }

        /// Blob store backed by a map, with per-key put failures and
        /// concurrency accounting. Links look like `memory://{key}?ttl={secs}`.
        #[derive(Default)]
        pub struct MemoryBlobStore {
            objects: DashMap<String, StoredObject>,
            failing: DashSet<String>,
            put_delay: Option<Duration>,
            in_flight: AtomicUsize,
            max_in_flight: AtomicUsize,
            puts: AtomicUsize,
        }

        impl MemoryBlobStore {
            pub fn new() -> Self {
                Self::default()
            }

            /// Hold every put for `delay` so overlapping uploads can be observed.
            pub fn with_put_delay(mut self, delay: Duration) -> Self {
                self.put_delay = Some(delay);
                self
            }

            /// Seed an object without counting it as a put.
            pub fn insert(&self, key: &str, bytes: Vec<u8>) {
                self.objects.insert(
                    key.to_string(),
                    StoredObject {
                        bytes,
                        content_type: None,
                    },
                );
            }

            pub fn fail_puts_for(&self, key: &str) {
                self.failing.insert(key.to_string());
            }

            pub fn object(&self, key: &str) -> Option<Vec<u8>> {
                self.objects.get(key).map(|object| object.bytes.clone())
            }

            pub fn content_type(&self, key: &str) -> Option<String> {
                self.objects
                    .get(key)
                    .and_then(|object| object.content_type.clone())
            }

            pub fn keys(&self) -> Vec<String> {
                let mut keys: Vec<String> =
                    self.objects.iter().map(|entry| entry.key().clone()).collect();
                keys.sort();
                keys
            }

            /// Successful puts so far.
            pub fn put_count(&self) -> usize {
                self.puts.load(Ordering::SeqCst)
            }

            pub fn max_concurrent_puts(&self) -> usize {
                self.max_in_flight.load(Ordering::SeqCst)
            }
        }

        #[async_trait]
        impl BlobStore for MemoryBlobStore {
            async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
                Ok(self.object(key))
            }

            async fn put(
                &self,
                key: &str,
                bytes: Vec<u8>,
                content_type: Option<&str>,
            ) -> Result<(), StorageError> {
                if self.failing.contains(key) {
                    return Err(StorageError::request(key, "injected put failure"));
                }

                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                if let Some(delay) = self.put_delay {
                    tokio::time::sleep(delay).await;
                }

                self.objects.insert(
                    key.to_string(),
                    StoredObject {
                        bytes,
                        content_type: content_type.map(str::to_string),
                    },
                );
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.puts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
                Ok(format!("memory://{}?ttl={}", key, ttl.as_secs()))
            }
        }
    }

    pub mod mailbox {
        use crate::mailbox::{
            Credentials, MailboxConnector, MessageSource, RawMessage, SeqRange,
        };
        use crate::sync::error::{SyncError, SyncResult};
        use async_trait::async_trait;
        use chrono::{DateTime, Duration, Utc};
        use std::collections::HashMap;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Mutex};
        use tokio::sync::mpsc;

        /// Deterministic in-memory INBOX.
        ///
        /// Message `seq` carries the date at index `seq - 1`, Message-ID
        /// `msg-{seq}@scripted.test`, and optionally one text attachment.
        /// Clones share the fetch log, call counter and logout counter.
        #[derive(Clone)]
        pub struct ScriptedMailbox {
            dates: Vec<DateTime<Utc>>,
            attachments: HashMap<u32, String>,
            reversed: bool,
            fail_on_fetch: Option<usize>,
            fetch_calls: Arc<AtomicUsize>,
            fetched: Arc<Mutex<Vec<SeqRange>>>,
            logouts: Arc<AtomicUsize>,
        }

        impl ScriptedMailbox {
            pub fn new(dates: Vec<DateTime<Utc>>) -> Self {
                Self {
                    dates,
                    attachments: HashMap::new(),
                    reversed: false,
                    fail_on_fetch: None,
                    fetch_calls: Arc::new(AtomicUsize::new(0)),
                    fetched: Arc::new(Mutex::new(Vec::new())),
                    logouts: Arc::new(AtomicUsize::new(0)),
                }
            }

            /// `count` messages, message `k` dated `base + k hours`.
            pub fn evenly_spaced(base: DateTime<Utc>, count: u32) -> Self {
                Self::new(
                    (1..=count)
                        .map(|k| base + Duration::hours(i64::from(k)))
                        .collect(),
                )
            }

            /// Deliver FETCH results highest sequence number first.
            pub fn deliver_reversed(mut self) -> Self {
                self.reversed = true;
                self
            }

            /// Fail the `call`-th FETCH (1-based) with a transfer error.
            pub fn fail_on_fetch(mut self, call: usize) -> Self {
                self.fail_on_fetch = Some(call);
                self
            }

            pub fn with_attachment(mut self, seq: u32, name: &str) -> Self {
                self.attachments.insert(seq, name.to_string());
                self
            }

            pub fn date_of(&self, seq: u32) -> DateTime<Utc> {
                self.dates[seq as usize - 1]
            }

            /// Every range passed to `fetch`, in call order.
            pub fn fetched_ranges(&self) -> Vec<SeqRange> {
                self.fetched.lock().expect("fetch log poisoned").clone()
            }

            pub fn logouts(&self) -> usize {
                self.logouts.load(Ordering::SeqCst)
            }

            /// The RFC 5322 text of message `seq`, if it exists.
            pub fn render(&self, seq: u32) -> Option<RawMessage> {
                let date = self.dates.get((seq as usize).checked_sub(1)?)?;
                let id = format!("msg-{seq}@scripted.test");

                let mut body = format!(
                    "Message-ID: <{id}>\r\n\
                     Date: {}\r\n\
                     From: Sender {seq} <sender{seq}@example.com>\r\n\
                     To: owner@example.com\r\n\
                     Subject: Scripted message {seq}\r\n\
                     MIME-Version: 1.0\r\n",
                    date.to_rfc2822()
                );
                match self.attachments.get(&seq) {
                    None => body.push_str(&format!(
                        "Content-Type: text/plain; charset=utf-8\r\n\r\nBody of message {seq}\r\n"
                    )),
                    Some(name) => body.push_str(&format!(
                        "Content-Type: multipart/mixed; boundary=\"part\"\r\n\
                         \r\n\
                         --part\r\n\
                         Content-Type: text/plain; charset=utf-8\r\n\
                         \r\n\
                         Body of message {seq}\r\n\
                         --part\r\n\
                         Content-Type: text/plain; name=\"{name}\"\r\n\
                         Content-Disposition: attachment; filename=\"{name}\"\r\n\
                         \r\n\
                         contents of {name}\r\n\
                         --part--\r\n"
                    )),
                }

                Some(RawMessage {
                    seq,
                    envelope_id: Some(format!("<{id}>")),
                    body: body.into_bytes(),
                })
            }
        }

        #[async_trait]
        impl MessageSource for ScriptedMailbox {
            fn message_count(&self) -> u32 {
                self.dates.len() as u32
            }

            async fn fetch(
                &mut self,
                range: SeqRange,
                sink: mpsc::Sender<RawMessage>,
            ) -> SyncResult<()> {
                self.fetched
                    .lock()
                    .expect("fetch log poisoned")
                    .push(range);
                let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
                if self.fail_on_fetch == Some(call) {
                    return Err(SyncError::Transfer(format!(
                        "scripted failure on FETCH {range}"
                    )));
                }

                let mut seqs: Vec<u32> = (range.from()..=range.to()).collect();
                if self.reversed {
                    seqs.reverse();
                }
                for seq in seqs {
                    if let Some(raw) = self.render(seq) {
                        sink.send(raw)
                            .await
                            .map_err(|_| SyncError::Transfer("fetch sink closed".into()))?;
                    }
                }
                Ok(())
            }

            async fn logout(&mut self) -> SyncResult<()> {
                self.logouts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        /// Hands out clones of one [`ScriptedMailbox`], or rejects every login.
        pub struct ScriptedConnector {
            mailbox: Option<ScriptedMailbox>,
            opened: AtomicUsize,
        }

        impl ScriptedConnector {
            pub fn new(mailbox: ScriptedMailbox) -> Self {
                Self {
                    mailbox: Some(mailbox),
                    opened: AtomicUsize::new(0),
                }
            }

            pub fn rejecting_login() -> Self {
                Self {
                    mailbox: None,
                    opened: AtomicUsize::new(0),
                }
            }

            pub fn fetched_ranges(&self) -> Vec<SeqRange> {
                self.mailbox
                    .as_ref()
                    .map(ScriptedMailbox::fetched_ranges)
                    .unwrap_or_default()
            }

            pub fn logouts(&self) -> usize {
                self.mailbox
                    .as_ref()
                    .map(ScriptedMailbox::logouts)
                    .unwrap_or_default()
            }

            pub fn opened(&self) -> usize {
                self.opened.load(Ordering::SeqCst)
            }
        }

        #[async_trait]
        impl MailboxConnector for ScriptedConnector {
            async fn open(&self, credentials: &Credentials) -> SyncResult<Box<dyn MessageSource>> {
                self.opened.fetch_add(1, Ordering::SeqCst);
                match &self.mailbox {
                    Some(mailbox) => Ok(Box::new(mailbox.clone())),
                    None => Err(SyncError::Auth {
                        user: credentials.user.clone(),
                        reason: "AUTHENTICATIONFAILED invalid credentials".to_string(),
                    }),
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        sync_service: Option<SyncService>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                sync_service: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a [`SyncService`] for tests that exercise the sync route.
        pub fn manage_sync_service(mut self, service: SyncService) -> Self {
            self.sync_service = Some(service);
            self
        }

        /// Finish building the Rocket instance. JSON catchers are always registered.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment).register("/", crate::routes::catchers());

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(service) = self.sync_service {
                rocket = rocket.manage(service);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
