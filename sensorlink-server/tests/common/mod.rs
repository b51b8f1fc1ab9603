//! Test doubles for driving the supervisor without a network.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use sensorlink_sdk::transport::{Connector, Frame, Socket};
use sensorlink_sdk::{AuthError, Authenticator, Token, TransportError};
use sensorlink_server::connection::ConnectionPolicy;
use sensorlink_server::db::{Db, SqliteStore};
use sensorlink_server::error::PersistenceError;
use sensorlink_server::ingest::TelemetryIngester;
use sensorlink_server::store::{Device, DeviceDirectory, ReadingStore, TelemetryReading};
use sensorlink_server::supervisor::ConnectionSupervisor;

pub const FULL_AT_1000: &str = r#"{"subscriptionId":10,"errorCode":0,"errorMsg":null,"data":{
    "mv":[[1000,3.2]],"mvmin":[[1000,3.0]],"mvmax":[[1000,3.4]],"st":[[1000,22.1]],
    "et":[[1000,18.0]],"h":[[1000,55]],"v":[[1000,4.1]],"s":[[1000,0.9]]}}"#;

/// Succeeds unless told to fail the next calls.
#[derive(Default)]
pub struct StubAuth {
    script: Mutex<VecDeque<bool>>,
    pub calls: AtomicUsize,
}

impl StubAuth {
    pub fn fail_next(&self, n: usize) {
        self.script.lock().extend(std::iter::repeat_n(false, n));
    }
}

#[async_trait]
impl Authenticator for StubAuth {
    async fn authenticate(&self) -> Result<Token, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.script.lock().pop_front() == Some(false) {
            return Err(AuthError::Exhausted {
                attempts: 5,
                last: "platform answered 401 Unauthorized".to_string(),
            });
        }
        Ok(Token::new("tok.en"))
    }
}

/// Fixed device list.
pub struct StaticDirectory(pub Vec<Device>);

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn list_devices(&self) -> Result<Vec<Device>, PersistenceError> {
        Ok(self.0.clone())
    }
}

/// Accepts existence checks but fails every insert.
#[derive(Default)]
pub struct BrokenInsertStore {
    pub inserts: AtomicUsize,
}

#[async_trait]
impl ReadingStore for BrokenInsertStore {
    async fn exists_reading(&self, _: &str, _: i64) -> Result<bool, PersistenceError> {
        Ok(false)
    }

    async fn insert_reading(&self, _: &TelemetryReading) -> Result<(), PersistenceError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Err(rusqlite::Error::InvalidQuery.into())
    }
}

/// The platform's end of one mock socket.
pub struct MockPeer {
    pub frames: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Set when the client closed with a handshake.
    pub closed: Arc<AtomicBool>,
}

impl MockPeer {
    pub fn send(&self, frame: Frame) {
        let _ = self.frames.send(Ok(frame));
    }

    pub fn gracefully_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The client dropped its socket (closed or terminated).
    pub fn is_gone(&self) -> bool {
        self.frames.is_closed()
    }

    /// Subscribed device id, read from the first command sent.
    pub async fn subscribed_device(&mut self) -> String {
        let text = tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .expect("no subscription sent")
            .expect("socket dropped before subscribing");
        let cmd: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(cmd["tsSubCmds"][0]["cmdId"], 10);
        assert_eq!(cmd["tsSubCmds"][0]["scope"], "LATEST_TELEMETRY");
        cmd["tsSubCmds"][0]["entityId"].as_str().unwrap().to_string()
    }
}

struct MockSocket {
    frames: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Socket for MockSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent
            .send(text)
            .map_err(|_| TransportError::Other("peer gone".to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.frames.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out channel-backed sockets; each accepted connect yields a
/// [`MockPeer`] on the harness's peer channel.
pub struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    refuse: AtomicBool,
    pub attempts: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Other("connection refused".to_string()));
        }
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.peers.send(MockPeer {
            frames: frames_tx,
            sent: sent_rx,
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(MockSocket {
            frames: frames_rx,
            sent: sent_tx,
            closed,
        }))
    }
}

pub struct Harness {
    pub supervisor: Arc<ConnectionSupervisor>,
    pub auth: Arc<StubAuth>,
    pub connector: Arc<MockConnector>,
    pub store: Arc<SqliteStore>,
    pub peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl Harness {
    /// Supervisor over `devices` with default retry and keep-alive timings.
    pub fn new(devices: &[(&str, &str)]) -> Self {
        Self::build(devices, None)
    }

    /// Like [`Harness::new`], but readings go to `readings` instead of the
    /// in-memory database.
    pub fn with_readings(devices: &[(&str, &str)], readings: Arc<dyn ReadingStore>) -> Self {
        Self::build(devices, Some(readings))
    }

    fn build(devices: &[(&str, &str)], readings: Option<Arc<dyn ReadingStore>>) -> Self {
        let devices = devices.iter().map(|(id, name)| Device::new(id, name)).collect();
        let (peers_tx, peers) = mpsc::unbounded_channel();
        let auth = Arc::new(StubAuth::default());
        let connector = Arc::new(MockConnector {
            peers: peers_tx,
            refuse: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        });
        let store = Arc::new(SqliteStore::new(Db::open_memory().unwrap()));
        let readings: Arc<dyn ReadingStore> = match readings {
            Some(readings) => readings,
            None => store.clone(),
        };
        let supervisor = Arc::new(ConnectionSupervisor::new(
            auth.clone(),
            Arc::new(StaticDirectory(devices)),
            connector.clone(),
            Arc::new(TelemetryIngester::new(readings)),
            ConnectionPolicy::new("ws://tb.test"),
        ));
        Self {
            supervisor,
            auth,
            connector,
            store,
            peers,
        }
    }

    /// Next socket the client opened.
    pub async fn next_peer(&mut self) -> MockPeer {
        tokio::time::timeout(Duration::from_secs(60), self.peers.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped")
    }

    pub fn readings(&self, device_id: &str) -> u64 {
        self.store.with_db(|db| db.count_readings(device_id)).unwrap()
    }
}

/// Poll `cond` until it holds, letting (virtual) time pass.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {limit:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
