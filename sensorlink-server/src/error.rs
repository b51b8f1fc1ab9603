//! Server-side error taxonomy.
//!
//! Transport and auth errors come from `sensorlink_sdk::error`. Everything
//! here is local to one device except [`SupervisorError`], which aborts a
//! fleet start cycle.

use sensorlink_sdk::AuthError;
use sensorlink_sdk::protocol::PointError;

/// An inbound message had an unexpected shape. The message is dropped; the
/// connection carries on.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metric {field}: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: PointError,
    },
}

/// Storage failed. During ingestion the reading is dropped, not retried.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A fleet start cycle was aborted before any connection was spawned.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("device directory unavailable: {0}")]
    Directory(#[from] PersistenceError),
}
