//! Fleet start and stop.
//!
//! [`ConnectionSupervisor::init_all`] logs in once, reads the device list and
//! spawns one connection per device. [`ConnectionSupervisor::close_all`]
//! sets the reconnect permission and asks every connection to close.

use std::collections::HashMap;
use std::sync::Arc;

use sensorlink_sdk::Authenticator;
use sensorlink_sdk::transport::Connector;

use crate::connection::{self, ConnectionPolicy, ConnectionStatus, Fleet};
use crate::error::SupervisorError;
use crate::ingest::TelemetryIngester;
use crate::store::DeviceDirectory;

pub struct ConnectionSupervisor {
    authenticator: Arc<dyn Authenticator>,
    directory: Arc<dyn DeviceDirectory>,
    fleet: Arc<Fleet>,
}

impl ConnectionSupervisor {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        directory: Arc<dyn DeviceDirectory>,
        connector: Arc<dyn Connector>,
        ingester: Arc<TelemetryIngester>,
        policy: ConnectionPolicy,
    ) -> Self {
        Self {
            authenticator,
            directory,
            fleet: Arc::new(Fleet::new(policy, connector, ingester)),
        }
    }

    /// Start a connection for every device. Returns how many were spawned.
    ///
    /// On an auth or directory failure nothing is spawned and neither the
    /// registry nor the reconnect permission changes.
    pub async fn init_all(&self) -> Result<usize, SupervisorError> {
        let token = self.authenticator.authenticate().await.inspect_err(|e| {
            tracing::error!("Fleet start aborted, login failed: {e}");
        })?;

        let devices = self.directory.list_devices().await.inspect_err(|e| {
            tracing::error!("Fleet start aborted, device list unavailable: {e}");
        })?;

        for device in devices.iter().cloned() {
            tracing::info!(device = %device.id, name = %device.name, "Connecting sensor");
            // Join handles are dropped: tasks deregister themselves.
            let _ = connection::spawn(&self.fleet, device, &token);
        }

        // Flipped once spawns are issued, not once sockets open. A connection
        // that fails before this point is not retried.
        self.fleet.set_reconnect_allowed(true);
        tracing::info!(count = devices.len(), "Sensor connections spawned");
        Ok(devices.len())
    }

    /// Set the reconnect permission, then request every connection to close.
    /// Safe to call repeatedly.
    pub fn close_all(&self, allow_reconnect: bool) {
        self.fleet.set_reconnect_allowed(allow_reconnect);
        let n = self.fleet.request_close_all();
        tracing::info!(count = n, allow_reconnect, "Closing sensor connections");
    }

    /// Snapshot of the registry keyed by device id.
    pub fn status(&self) -> HashMap<String, ConnectionStatus> {
        self.fleet.snapshot()
    }

    pub fn is_reconnect_allowed(&self) -> bool {
        self.fleet.reconnect_allowed()
    }
}
