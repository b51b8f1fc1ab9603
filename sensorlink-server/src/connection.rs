//! Per-device telemetry connection.
//!
//! Each device gets one task that owns its socket and walks the state
//! machine:
//!
//! ```text
//! CONNECTING ──open──▶ OPEN ──close──▶ RETRY_SCHEDULED ──5s──▶ CONNECTING
//!      │                 │                   │
//!      └─────────────────┴────── close ──────┴──▶ CLOSED (deregistered)
//! ```
//!
//! A close turns into a retry only while the fleet-wide reconnect
//! permission is set and fewer than `max_retries` retries have been used.
//!
//! The registry of live connections is shared with the supervisor. Every
//! registration gets a fresh generation number; a task only touches the
//! registry entry while its generation still matches, so a connection that
//! was superseded by a respawn can neither update nor remove its
//! replacement's entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use sensorlink_sdk::Token;
use sensorlink_sdk::protocol::SubscriptionCommand;
use sensorlink_sdk::transport::{telemetry_url, Connector, Frame, Socket};

use crate::ingest::TelemetryIngester;
use crate::liveness::{LivenessMonitor, DEFAULT_GRACE, DEFAULT_KEEPALIVE};
use crate::store::Device;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    RetryScheduled,
    /// Terminal. Records are removed on entering it, so the status map
    /// never shows this state.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::RetryScheduled => "retry_scheduled",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Retry and keep-alive tuning shared by all connections.
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    /// `ws://` or `wss://` base of the platform.
    pub ws_base_url: String,
    /// Constant delay before each reconnect.
    pub retry_delay: Duration,
    pub max_retries: u32,
    /// Ping interval of the platform.
    pub keepalive: Duration,
    pub grace: Duration,
}

impl ConnectionPolicy {
    pub fn new(ws_base_url: &str) -> Self {
        Self {
            ws_base_url: ws_base_url.to_string(),
            retry_delay: Duration::from_millis(5_000),
            max_retries: 5,
            keepalive: DEFAULT_KEEPALIVE,
            grace: DEFAULT_GRACE,
        }
    }
}

/// Externally visible view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub retry_count: u32,
    pub name: String,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// Registry entry. The close signal is the supervisor's handle on the
/// socket: notifying it asks the owning task to close.
struct ConnectionRecord {
    device: Device,
    state: ConnectionState,
    retry_count: u32,
    generation: u64,
    close: Arc<Notify>,
}

/// State shared between the supervisor and every connection task.
pub(crate) struct Fleet {
    pub(crate) policy: ConnectionPolicy,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) ingester: Arc<TelemetryIngester>,
    records: Mutex<HashMap<String, ConnectionRecord>>,
    reconnect_allowed: AtomicBool,
    next_generation: AtomicU64,
}

impl Fleet {
    pub(crate) fn new(
        policy: ConnectionPolicy,
        connector: Arc<dyn Connector>,
        ingester: Arc<TelemetryIngester>,
    ) -> Self {
        Self {
            policy,
            connector,
            ingester,
            records: Mutex::new(HashMap::new()),
            reconnect_allowed: AtomicBool::new(false),
            next_generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn reconnect_allowed(&self) -> bool {
        self.reconnect_allowed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_reconnect_allowed(&self, allowed: bool) {
        self.reconnect_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Ask every registered connection to close.
    pub(crate) fn request_close_all(&self) -> usize {
        let records = self.records.lock();
        for record in records.values() {
            // Stores a permit if the task is busy, so the request is not lost.
            record.close.notify_one();
        }
        records.len()
    }

    pub(crate) fn snapshot(&self) -> HashMap<String, ConnectionStatus> {
        self.records
            .lock()
            .iter()
            .map(|(id, r)| {
                let status = ConnectionStatus {
                    state: r.state,
                    retry_count: r.retry_count,
                    name: r.device.name.clone(),
                };
                (id.clone(), status)
            })
            .collect()
    }

    /// Insert (or replace) the entry for a device and return its generation.
    /// A replaced connection is not closed.
    fn register(&self, device: &Device, close: Arc<Notify>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let record = ConnectionRecord {
            device: device.clone(),
            state: ConnectionState::Connecting,
            retry_count: 0,
            generation,
            close,
        };
        if let Some(old) = self.records.lock().insert(device.id.clone(), record) {
            tracing::info!(
                device = %device.id, old_gen = old.generation, new_gen = generation,
                "Replacing registry entry, previous connection left running"
            );
        }
        generation
    }

    /// Apply a state change if `generation` still owns the entry.
    fn update(&self, device_id: &str, generation: u64, state: ConnectionState, retry_count: u32) -> bool {
        let mut records = self.records.lock();
        match records.get_mut(device_id) {
            Some(r) if r.generation == generation => {
                r.state = state;
                r.retry_count = retry_count;
                true
            }
            _ => false,
        }
    }

    fn is_current(&self, device_id: &str, generation: u64) -> bool {
        self.records
            .lock()
            .get(device_id)
            .is_some_and(|r| r.generation == generation)
    }

    /// Remove the entry if `generation` still owns it.
    fn deregister(&self, device_id: &str, generation: u64) {
        let mut records = self.records.lock();
        if records.get(device_id).is_some_and(|r| r.generation == generation) {
            records.remove(device_id);
        } else {
            tracing::debug!(device = %device_id, generation, "Entry already superseded, leaving it");
        }
    }
}

/// Register a connection for `device` and start its task.
pub(crate) fn spawn(fleet: &Arc<Fleet>, device: Device, token: &Token) -> JoinHandle<()> {
    let close = Arc::new(Notify::new());
    let generation = fleet.register(&device, Arc::clone(&close));
    let conn = DeviceConnection {
        url: telemetry_url(&fleet.policy.ws_base_url, token),
        liveness: LivenessMonitor::new(fleet.policy.keepalive, fleet.policy.grace),
        fleet: Arc::clone(fleet),
        device,
        generation,
        state: ConnectionState::Connecting,
        retry_count: 0,
        close,
    };
    tokio::spawn(conn.run())
}

/// The task side of one registry entry.
struct DeviceConnection {
    fleet: Arc<Fleet>,
    device: Device,
    url: String,
    generation: u64,
    state: ConnectionState,
    retry_count: u32,
    close: Arc<Notify>,
    liveness: LivenessMonitor,
}

impl DeviceConnection {
    async fn run(mut self) {
        loop {
            self.connect_and_receive().await;
            if !self.on_close().await {
                break;
            }
        }
        self.transition(ConnectionState::Closed);
        self.fleet.deregister(&self.device.id, self.generation);
        tracing::info!(device = %self.device.id, name = %self.device.name, "Connection closed");
    }

    fn transition(&mut self, state: ConnectionState) {
        tracing::debug!(device = %self.device.id, from = %self.state, to = %state, "State change");
        self.state = state;
        self.fleet.update(&self.device.id, self.generation, state, self.retry_count);
    }

    /// One socket lifetime: connect, subscribe, receive until closed.
    /// Returning is the close event.
    async fn connect_and_receive(&mut self) {
        self.transition(ConnectionState::Connecting);

        let connected = tokio::select! {
            res = self.fleet.connector.connect(&self.url) => res,
            _ = self.close.notified() => {
                tracing::info!(device = %self.device.id, "Close requested while connecting");
                return;
            }
        };
        let mut socket = match connected {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!(device = %self.device.id, name = %self.device.name, "Socket error: {e}");
                return;
            }
        };

        self.transition(ConnectionState::Open);
        tracing::info!(device = %self.device.id, name = %self.device.name, retry_count = self.retry_count, "Socket open");

        if let Err(e) = self.subscribe(socket.as_mut()).await {
            tracing::warn!(device = %self.device.id, "Subscription failed: {e}");
            return;
        }

        loop {
            tokio::select! {
                frame = socket.next_frame() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        self.fleet.ingester.ingest(&self.device, &text).await;
                    }
                    Some(Ok(Frame::Ping)) => self.liveness.on_ping(),
                    Some(Ok(Frame::Close)) | None => {
                        tracing::info!(device = %self.device.id, "Socket closed by platform");
                        return;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(device = %self.device.id, name = %self.device.name, "Socket error: {e}");
                        return;
                    }
                },
                _ = self.liveness.expired() => {
                    // Dropping the socket terminates it without a handshake.
                    tracing::warn!(device = %self.device.id, name = %self.device.name, "Ping failure, terminating socket");
                    return;
                }
                _ = self.close.notified() => {
                    if let Err(e) = socket.close().await {
                        tracing::debug!(device = %self.device.id, "Close handshake failed: {e}");
                    }
                    return;
                }
            }
        }
    }

    async fn subscribe(&self, socket: &mut dyn Socket) -> anyhow::Result<()> {
        let cmd = SubscriptionCommand::latest_telemetry(&self.device.id).to_json()?;
        socket.send_text(cmd).await?;
        Ok(())
    }

    /// Decide what a close leads to. `true` means connect again.
    async fn on_close(&mut self) -> bool {
        self.liveness.clear();

        if !self.fleet.reconnect_allowed() {
            tracing::info!(device = %self.device.id, "Reconnect not permitted");
            return false;
        }
        if self.superseded() {
            return false;
        }
        if self.retry_count >= self.fleet.policy.max_retries {
            tracing::warn!(
                device = %self.device.id, name = %self.device.name,
                retry_count = self.retry_count, "Max retries reached, giving up"
            );
            return false;
        }

        self.retry_count += 1;
        self.transition(ConnectionState::RetryScheduled);
        let delay = self.fleet.policy.retry_delay;
        tracing::info!(
            device = %self.device.id, retry_count = self.retry_count,
            delay_ms = delay.as_millis() as u64, "Reconnecting"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                // A respawn during the wait takes the device over.
                _ = &mut sleep => return !self.superseded(),
                _ = self.close.notified() => {
                    // Closing an already closed socket is a no-op unless the
                    // request also revoked the permission, or a respawn
                    // followed it before this task woke up.
                    if !self.fleet.reconnect_allowed() {
                        tracing::info!(device = %self.device.id, "Pending reconnect cancelled");
                        return false;
                    }
                    if self.superseded() {
                        return false;
                    }
                }
            }
        }
    }

    fn superseded(&self) -> bool {
        if self.fleet.is_current(&self.device.id, self.generation) {
            return false;
        }
        tracing::info!(device = %self.device.id, generation = self.generation, "Connection superseded, not reconnecting");
        true
    }
}
