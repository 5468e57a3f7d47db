use super::{Credentials, MailboxConnector, MessageSource, RawMessage, SeqRange};
use crate::sync::error::{SyncError, SyncResult};
use async_imap::Session;
use async_native_tls::TlsStream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

type ImapSession = Session<TlsStream<TcpStream>>;

/// Full message plus envelope; PEEK keeps the \Seen flag untouched.
const FETCH_QUERY: &str = "(ENVELOPE BODY.PEEK[])";

const INBOX: &str = "INBOX";

/// Opens IMAPS sessions against the address given in each request.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    default_port: u16,
}

impl ImapConnector {
    pub fn new(default_port: u16) -> Self {
        Self { default_port }
    }

    /// Split `host[:port]`, falling back to the configured port.
    pub fn resolve(&self, address: &str) -> SyncResult<(String, u16)> {
        let address = address.trim();
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| SyncError::Connection {
                    address: address.to_string(),
                    reason: format!("invalid port `{port}`"),
                })?;
                (host, port)
            }
            None => (address, self.default_port),
        };

        if host.is_empty() {
            return Err(SyncError::Connection {
                address: address.to_string(),
                reason: "missing host".to_string(),
            });
        }

        Ok((host.to_string(), port))
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn open(&self, credentials: &Credentials) -> SyncResult<Box<dyn MessageSource>> {
        let (host, port) = self.resolve(&credentials.address)?;
        let connection_error = |reason: String| SyncError::Connection {
            address: credentials.address.clone(),
            reason,
        };

        log::info!("imap: connecting to {}:{}", host, port);
        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| connection_error(format!("TCP connection failed: {e}")))?;
        let tls = async_native_tls::TlsConnector::new()
            .connect(host.as_str(), tcp)
            .await
            .map_err(|e| connection_error(format!("TLS handshake failed: {e}")))?;

        let client = async_imap::Client::new(tls);
        let mut session = client
            .login(&credentials.user, &credentials.secret)
            .await
            .map_err(|(e, _)| SyncError::Auth {
                user: credentials.user.clone(),
                reason: e.to_string(),
            })?;
        log::info!("imap: logged in as {}", credentials.user);

        let mailbox = match session.select(INBOX).await {
            Ok(mailbox) => mailbox,
            Err(e) => {
                let _ = session.logout().await;
                return Err(SyncError::Transfer(format!("unable to select {INBOX}: {e}")));
            }
        };
        log::debug!("imap: {} holds {} messages", INBOX, mailbox.exists);

        Ok(Box::new(ImapSource {
            session,
            message_count: mailbox.exists,
        }))
    }
}

struct ImapSource {
    session: ImapSession,
    message_count: u32,
}

#[async_trait]
impl MessageSource for ImapSource {
    fn message_count(&self) -> u32 {
        self.message_count
    }

    async fn fetch(&mut self, range: SeqRange, sink: mpsc::Sender<RawMessage>) -> SyncResult<()> {
        let stream = self
            .session
            .fetch(range.to_string(), FETCH_QUERY)
            .await
            .map_err(|e| SyncError::Transfer(format!("FETCH {range} failed: {e}")))?;
        futures::pin_mut!(stream);

        while let Some(item) = stream.next().await {
            let fetch =
                item.map_err(|e| SyncError::Transfer(format!("FETCH {range} failed: {e}")))?;

            let envelope_id = fetch
                .envelope()
                .and_then(|envelope| envelope.message_id.as_deref())
                .map(|id| String::from_utf8_lossy(id).into_owned());
            let raw = RawMessage {
                seq: fetch.message,
                envelope_id,
                body: fetch.body().map(<[u8]>::to_vec).unwrap_or_default(),
            };

            if sink.send(raw).await.is_err() {
                return Err(SyncError::Transfer(format!(
                    "FETCH {range} collector went away"
                )));
            }
        }

        Ok(())
    }

    async fn logout(&mut self) -> SyncResult<()> {
        self.session
            .logout()
            .await
            .map_err(|e| SyncError::Transfer(format!("LOGOUT failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_explicit_port() {
        let connector = ImapConnector::new(993);
        assert_eq!(
            connector.resolve("outlook.office365.com:993").unwrap(),
            ("outlook.office365.com".to_string(), 993)
        );
        assert_eq!(
            connector.resolve(" imap.example.com:1143 ").unwrap(),
            ("imap.example.com".to_string(), 1143)
        );
    }

    #[test]
    fn falls_back_to_default_port() {
        let connector = ImapConnector::new(993);
        assert_eq!(
            connector.resolve("imap.gmail.com").unwrap(),
            ("imap.gmail.com".to_string(), 993)
        );
    }

    #[test]
    fn rejects_bad_addresses() {
        let connector = ImapConnector::new(993);
        assert!(matches!(
            connector.resolve("imap.example.com:imaps"),
            Err(SyncError::Connection { .. })
        ));
        assert!(matches!(
            connector.resolve(":993"),
            Err(SyncError::Connection { .. })
        ));
    }
}
