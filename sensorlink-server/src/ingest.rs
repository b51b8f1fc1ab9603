//! Turns inbound telemetry frames into stored readings.
//!
//! Frames are classified by shape:
//!
//! 1. `errorCode != 0` → logged and dropped.
//! 2. no `data`, or an empty one → dropped silently.
//! 3. all eight metrics present → one [`TelemetryReading`], written unless
//!    a reading for the same device and timestamp already exists.
//! 4. anything else → dropped with a debug log.
//!
//! The existence check and the insert are two separate store calls. Two
//! identical frames ingested concurrently can both pass the check; frames of
//! one connection are ingested one at a time, so this only matters across
//! overlapping connections for the same device.

use std::sync::Arc;

use sensorlink_sdk::protocol::TelemetryUpdate;

use crate::error::ProtocolError;
use crate::store::{Device, ReadingStore, TelemetryReading};

/// Metrics that make up a full reading, in storage order.
pub const REQUIRED_FIELDS: [&str; 8] = ["mv", "mvmin", "mvmax", "st", "et", "h", "v", "s"];

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Stored(TelemetryReading),
    /// A reading for this device and timestamp was already stored.
    Duplicate { timestamp_ms: i64 },
    /// The platform reported an error for the subscription.
    Rejected { code: Option<i64>, message: Option<String> },
    Empty,
    /// Some required metrics are missing.
    Partial,
    /// Not JSON, or a required metric is unreadable.
    Malformed,
    /// The store failed; the reading was dropped.
    Failed,
}

/// Shape of a parsed frame.
#[derive(Debug)]
enum Classified {
    Rejected { code: Option<i64>, message: Option<String> },
    Empty,
    Partial,
    Full(TelemetryReading),
}

fn classify(device_id: &str, update: &TelemetryUpdate) -> Result<Classified, ProtocolError> {
    if update.is_error() {
        return Ok(Classified::Rejected {
            code: update.error_code,
            message: update.error_msg.clone(),
        });
    }
    if update.is_empty() {
        return Ok(Classified::Empty);
    }

    let mut points = Vec::with_capacity(REQUIRED_FIELDS.len());
    for field in REQUIRED_FIELDS {
        match update.first_point(field) {
            None => return Ok(Classified::Partial),
            Some(Err(source)) => return Err(ProtocolError::Field { field, source }),
            Some(Ok(point)) => points.push(point),
        }
    }

    // The envelope timestamp is when the platform sent the frame; the mv
    // sample carries the actual measurement time.
    let &[mv, mvmin, mvmax, st, et, h, v, s] = points.as_slice() else {
        return Ok(Classified::Partial);
    };
    Ok(Classified::Full(TelemetryReading {
        device_id: device_id.to_string(),
        timestamp_ms: mv.ts,
        mv: mv.value,
        mvmin: mvmin.value,
        mvmax: mvmax.value,
        st: st.value,
        et: et.value,
        h: h.value,
        v: v.value,
        s: s.value,
    }))
}

/// Validates and persists telemetry for every connection of the fleet.
pub struct TelemetryIngester {
    store: Arc<dyn ReadingStore>,
}

impl TelemetryIngester {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// Handle one text frame received on `device`'s socket.
    ///
    /// Never fails: every problem is logged and reported through the
    /// returned outcome, so one bad frame cannot disturb the connection.
    pub async fn ingest(&self, device: &Device, payload: &str) -> IngestOutcome {
        tracing::debug!(device = %device.id, name = %device.name, "Telemetry frame: {payload}");

        let classified = TelemetryUpdate::parse(payload)
            .map_err(ProtocolError::from)
            .and_then(|update| classify(&device.id, &update));

        let reading = match classified {
            Ok(Classified::Full(reading)) => reading,
            Ok(Classified::Rejected { code, message }) => {
                tracing::warn!(
                    device = %device.id,
                    code = ?code,
                    "Platform returned an error: {}",
                    message.as_deref().unwrap_or("<no message>")
                );
                return IngestOutcome::Rejected { code, message };
            }
            Ok(Classified::Empty) => return IngestOutcome::Empty,
            Ok(Classified::Partial) => {
                tracing::debug!(device = %device.id, "Incomplete set of sensor metrics, skipping");
                return IngestOutcome::Partial;
            }
            Err(e) => {
                tracing::debug!(device = %device.id, "Discarding malformed frame: {e}");
                return IngestOutcome::Malformed;
            }
        };

        let at = reading
            .recorded_at()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| reading.timestamp_ms.to_string());

        match self.store.exists_reading(&reading.device_id, reading.timestamp_ms).await {
            Ok(true) => {
                tracing::info!(device = %device.id, name = %device.name, at = %at, "Reading already stored");
                return IngestOutcome::Duplicate {
                    timestamp_ms: reading.timestamp_ms,
                };
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(device = %device.id, at = %at, "Existence check failed, dropping reading: {e}");
                return IngestOutcome::Failed;
            }
        }

        match self.store.insert_reading(&reading).await {
            Ok(()) => {
                tracing::info!(device = %device.id, name = %device.name, at = %at, "Stored reading");
                IngestOutcome::Stored(reading)
            }
            Err(e) => {
                tracing::error!(device = %device.id, at = %at, "Insert failed, dropping reading: {e}");
                IngestOutcome::Failed
            }
        }
    }
}
