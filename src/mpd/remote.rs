//! Reconnecting MPD client
//!
//! MPD drops idle connections after its `connection_timeout`, so a session
//! opened at the start of a sync may be gone by the time the transfer
//! finishes. [`RemoteStateClient`] wraps a session and, when a call fails
//! because the connection was lost, reconnects once and replays that call
//! once. A second failure is returned to the caller.
//!
//! A response that cannot be parsed leaves unread lines on the session, so
//! the session is replaced before the next call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::RemoteError;
use super::protocol::{Operation, Reply, Sticker};

/// Interval between `status` polls while the database is updating
const RESCAN_POLL: Duration = Duration::from_millis(500);

/// An established protocol session
#[async_trait]
pub trait Session: Send {
    /// Send one operation and read its complete response
    async fn execute(&mut self, op: &Operation) -> Result<Reply, RemoteError>;

    /// Protocol version announced by the server
    fn server_version(&self) -> &str;
}

/// Opens new sessions to the same endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Session>, RemoteError>;

    /// Endpoint description for log messages
    fn address(&self) -> String;
}

/// Client for the device's MPD server with reconnect-once semantics
pub struct RemoteStateClient {
    connector: Arc<dyn Connector>,
    session: Box<dyn Session>,
    /// The last response was not read to its end
    out_of_step: bool,
}

impl RemoteStateClient {
    /// Open the initial session
    pub async fn connect(connector: Arc<dyn Connector>) -> Result<Self, RemoteError> {
        let session = connector.connect().await?;
        Ok(Self {
            connector,
            session,
            out_of_step: false,
        })
    }

    /// Endpoint this client talks to
    pub fn address(&self) -> String {
        self.connector.address()
    }

    /// Protocol version of the current session
    pub fn server_version(&self) -> &str {
        self.session.server_version()
    }

    /// Run an operation, reconnecting and retrying once if the session dropped
    pub async fn invoke(&mut self, op: &Operation) -> Result<Reply, RemoteError> {
        if self.out_of_step {
            debug!("Replacing out-of-step session to {}", self.connector.address());
            self.session = self.connector.connect().await?;
            self.out_of_step = false;
        }

        let result = self.execute_with_retry(op).await;
        if let Err(RemoteError::Protocol(reason)) = &result {
            warn!("Unreadable reply to MPD {} ({}), reconnecting before the next call", op.name(), reason);
            self.out_of_step = true;
        }
        result
    }

    async fn execute_with_retry(&mut self, op: &Operation) -> Result<Reply, RemoteError> {
        match self.session.execute(op).await {
            Err(err) if err.is_connection_lost() => {
                warn!(
                    "MPD {} failed ({}), reconnecting to {}",
                    op.name(),
                    err,
                    self.connector.address()
                );
                self.session = self.connector.connect().await?;
                self.session.execute(op).await.map_err(|retry_err| {
                    if retry_err.is_connection_lost() {
                        RemoteError::ConnectionFailure {
                            addr: self.connector.address(),
                            reason: format!("connection lost again after reconnecting: {}", retry_err),
                        }
                    } else {
                        retry_err
                    }
                })
            }
            result => result,
        }
    }

    /// All song stickers with the given name below `base` ("" for the whole database)
    pub async fn find_stickers(&mut self, base: &str, name: &str) -> Result<Vec<Sticker>, RemoteError> {
        let op = Operation::FindStickers {
            base: base.to_string(),
            name: name.to_string(),
        };
        match self.invoke(&op).await? {
            Reply::Stickers(stickers) => {
                debug!("Found {} '{}' stickers", stickers.len(), name);
                Ok(stickers)
            }
            other => Err(unexpected(&op, other)),
        }
    }

    /// Set a sticker on a song
    pub async fn set_sticker(&mut self, uri: &str, name: &str, value: &str) -> Result<(), RemoteError> {
        let op = Operation::SetSticker {
            uri: uri.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        };
        match self.invoke(&op).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(&op, other)),
        }
    }

    /// Whether a song with this exact URI is in the device database
    pub async fn file_exists(&mut self, uri: &str) -> Result<bool, RemoteError> {
        let op = Operation::FindFile { uri: uri.to_string() };
        match self.invoke(&op).await? {
            Reply::Exists(exists) => Ok(exists),
            other => Err(unexpected(&op, other)),
        }
    }

    /// Ask the server to rescan its music directory
    pub async fn trigger_rescan(&mut self) -> Result<(), RemoteError> {
        match self.invoke(&Operation::Update).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(&Operation::Update, other)),
        }
    }

    /// Server status as raw key/value pairs
    pub async fn status(&mut self) -> Result<HashMap<String, String>, RemoteError> {
        match self.invoke(&Operation::Status).await? {
            Reply::Status(status) => Ok(status),
            other => Err(unexpected(&Operation::Status, other)),
        }
    }

    /// Poll `status` until no database update is running or `limit` elapses
    ///
    /// Returns `true` once the server reports an idle database.
    pub async fn wait_for_rescan(&mut self, limit: Duration) -> Result<bool, RemoteError> {
        let deadline = Instant::now() + limit;
        loop {
            let status = self.status().await?;
            if !status.contains_key("updating_db") {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(RESCAN_POLL).await;
        }
    }
}

fn unexpected(op: &Operation, reply: Reply) -> RemoteError {
    RemoteError::Protocol(format!("unexpected reply to {}: {:?}", op.name(), reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted outcomes shared by every session the connector opens
    struct ScriptedConnector {
        outcomes: Arc<Mutex<VecDeque<Result<Reply, RemoteError>>>>,
        executes: Arc<AtomicUsize>,
        connects: AtomicUsize,
        /// Connections accepted before the endpoint starts refusing
        accept_limit: usize,
    }

    impl ScriptedConnector {
        fn new(outcomes: Vec<Result<Reply, RemoteError>>) -> Arc<Self> {
            Self::accepting(outcomes, usize::MAX)
        }

        fn accepting(outcomes: Vec<Result<Reply, RemoteError>>, accept_limit: usize) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Arc::new(Mutex::new(outcomes.into())),
                executes: Arc::new(AtomicUsize::new(0)),
                connects: AtomicUsize::new(0),
                accept_limit,
            })
        }
    }

    struct ScriptedSession {
        outcomes: Arc<Mutex<VecDeque<Result<Reply, RemoteError>>>>,
        executes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Session for ScriptedSession {
        async fn execute(&mut self, _op: &Operation) -> Result<Reply, RemoteError> {
            self.executes.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Reply::Done))
        }

        fn server_version(&self) -> &str {
            "0.23.5"
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn Session>, RemoteError> {
            let previous = self.connects.fetch_add(1, Ordering::SeqCst);
            if previous >= self.accept_limit {
                return Err(RemoteError::ConnectionFailure {
                    addr: self.address(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(Box::new(ScriptedSession {
                outcomes: Arc::clone(&self.outcomes),
                executes: Arc::clone(&self.executes),
            }))
        }

        fn address(&self) -> String {
            "stub:6600".to_string()
        }
    }

    fn lost() -> Result<Reply, RemoteError> {
        Err(RemoteError::ConnectionLost("broken pipe".to_string()))
    }

    #[tokio::test]
    async fn test_retry_once_after_connection_lost() {
        let connector = ScriptedConnector::new(vec![lost(), Ok(Reply::Exists(true))]);
        let mut client = RemoteStateClient::connect(connector.clone()).await.unwrap();

        assert!(client.file_exists("Podcasts/A/e.mp3").await.unwrap());
        assert_eq!(connector.executes.load(Ordering::SeqCst), 2);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_failure_propagates_without_third_attempt() {
        let connector = ScriptedConnector::new(vec![lost(), lost(), Ok(Reply::Exists(true))]);
        let mut client = RemoteStateClient::connect(connector.clone()).await.unwrap();

        let err = client.file_exists("Podcasts/A/e.mp3").await.unwrap_err();
        assert!(err.is_connection_failure());
        assert_eq!(connector.executes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_reconnect_propagates_connection_failure() {
        let connector = ScriptedConnector::accepting(vec![lost(), Ok(Reply::Exists(true))], 1);
        let mut client = RemoteStateClient::connect(connector.clone()).await.unwrap();

        let err = client.file_exists("Podcasts/A/e.mp3").await.unwrap_err();
        assert!(err.is_connection_failure(), "got {err:?}");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(connector.executes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreadable_reply_replaces_session_before_next_call() {
        let connector = ScriptedConnector::new(vec![
            Err(RemoteError::Protocol("unexpected line: badline".to_string())),
            Ok(Reply::Done),
        ]);
        let mut client = RemoteStateClient::connect(connector.clone()).await.unwrap();

        let err = client.file_exists("Podcasts/A/e.mp3").await.unwrap_err();
        assert!(matches!(err, RemoteError::Protocol(_)));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        client.set_sticker("Podcasts/A/e.mp3", "played", "10").await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(connector.executes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ack_errors_are_not_retried() {
        let ack = super::super::protocol::Ack::parse("ACK [50@0] {sticker} no such song").unwrap();
        let connector = ScriptedConnector::new(vec![Err(RemoteError::Ack(ack))]);
        let mut client = RemoteStateClient::connect(connector.clone()).await.unwrap();

        let err = client.set_sticker("Podcasts/A/e.mp3", "played", "10").await.unwrap_err();
        assert!(matches!(err, RemoteError::Ack(_)));
        assert_eq!(connector.executes.load(Ordering::SeqCst), 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_for_rescan_stops_when_idle() {
        let updating: HashMap<String, String> =
            [("updating_db".to_string(), "3".to_string())].into_iter().collect();
        let connector = ScriptedConnector::new(vec![
            Ok(Reply::Status(updating)),
            Ok(Reply::Status(HashMap::new())),
        ]);
        let mut client = RemoteStateClient::connect(connector.clone()).await.unwrap();

        assert!(client.wait_for_rescan(Duration::from_secs(5)).await.unwrap());
        assert_eq!(connector.executes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wait_for_rescan_gives_up_at_deadline() {
        let updating: HashMap<String, String> =
            [("updating_db".to_string(), "3".to_string())].into_iter().collect();
        let connector = ScriptedConnector::new(vec![Ok(Reply::Status(updating))]);
        let mut client = RemoteStateClient::connect(connector).await.unwrap();

        assert!(!client.wait_for_rescan(Duration::ZERO).await.unwrap());
    }
}
