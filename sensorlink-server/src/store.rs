//! Collaborator boundaries: where devices come from and where readings go.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PersistenceError;

/// A sensor registered with the platform. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl Device {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
        }
    }
}

/// One stored telemetry snapshot. `(device_id, timestamp_ms)` is its
/// identity.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReading {
    pub device_id: String,
    /// Measurement time in epoch milliseconds, taken from the `mv` metric.
    pub timestamp_ms: i64,
    /// Methane sensor voltage.
    pub mv: f64,
    pub mvmin: f64,
    pub mvmax: f64,
    /// Temperature at the sensor.
    pub st: f64,
    /// Temperature outside the enclosure.
    pub et: f64,
    /// Humidity.
    pub h: f64,
    /// Battery voltage.
    pub v: f64,
    /// Solar panel voltage.
    pub s: f64,
}

impl TelemetryReading {
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }
}

/// Lists the devices a fleet start should connect.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, PersistenceError>;
}

/// Persists readings.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn exists_reading(&self, device_id: &str, timestamp_ms: i64) -> Result<bool, PersistenceError>;

    async fn insert_reading(&self, reading: &TelemetryReading) -> Result<(), PersistenceError>;
}
