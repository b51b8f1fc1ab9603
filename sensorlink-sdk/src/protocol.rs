//! Wire protocol for the platform's telemetry websocket plugin.
//!
//! The client sends one JSON subscription command right after the socket
//! opens:
//!
//! ```json
//! {"tsSubCmds":[{"entityType":"DEVICE","entityId":"<id>","scope":"LATEST_TELEMETRY","cmdId":10}],
//!  "historyCmds":[],"attrSubCmds":[]}
//! ```
//!
//! and then receives updates shaped like:
//!
//! ```json
//! {"subscriptionId":10,"errorCode":0,"errorMsg":null,
//!  "data":{"mv":[[1700000000000,"3.2"]],"h":[[1700000000000,"55"]]}}
//! ```
//!
//! Every metric under `data` is a list of `[epochMillis, value]` pairs. The
//! platform serialises latest values as strings, older firmware sends plain
//! numbers; both are accepted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Path of the telemetry plugin, appended to the websocket base URL.
pub const TELEMETRY_WS_PATH: &str = "/api/ws/plugins/telemetry";

/// Command id used for every latest-telemetry subscription.
pub const SUBSCRIPTION_CMD_ID: i64 = 10;

/// Top-level command frame sent to the telemetry plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCommand {
    pub ts_sub_cmds: Vec<TsSubCmd>,
    pub history_cmds: Vec<Value>,
    pub attr_sub_cmds: Vec<Value>,
}

/// One timeseries subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TsSubCmd {
    pub entity_type: String,
    pub entity_id: String,
    pub scope: String,
    pub cmd_id: i64,
}

impl SubscriptionCommand {
    /// Subscribe to the newest value of every metric of `device_id`.
    pub fn latest_telemetry(device_id: &str) -> Self {
        Self {
            ts_sub_cmds: vec![TsSubCmd {
                entity_type: "DEVICE".to_string(),
                entity_id: device_id.to_string(),
                scope: "LATEST_TELEMETRY".to_string(),
                cmd_id: SUBSCRIPTION_CMD_ID,
            }],
            history_cmds: Vec::new(),
            attr_sub_cmds: Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// An inbound update from the telemetry plugin.
///
/// Fields are kept loose: shape validation belongs to the
/// consumer, which has to tell error frames, empty frames and partial
/// frames apart.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryUpdate {
    #[serde(default)]
    pub subscription_id: Option<i64>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

impl TelemetryUpdate {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Only an explicit `errorCode: 0` counts as success.
    pub fn is_error(&self) -> bool {
        self.error_code != Some(0)
    }

    /// True when there is no `data` object, or it has no metrics.
    pub fn is_empty(&self) -> bool {
        self.data.as_ref().is_none_or(|d| d.is_empty())
    }

    /// The first `[ts, value]` pair of a metric, if the metric is present.
    ///
    /// Returns `None` when the key is absent or null, `Some(Err(..))` when
    /// it is present but not a usable pair.
    pub fn first_point(&self, key: &str) -> Option<Result<TsPoint, PointError>> {
        let value = self.data.as_ref()?.get(key)?;
        if value.is_null() {
            return None;
        }
        Some(TsPoint::from_series(value))
    }
}

/// One sample of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TsPoint {
    pub ts: i64,
    pub value: f64,
}

/// Why a metric series could not be read.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PointError {
    #[error("series is not a non-empty array")]
    NotASeries,
    #[error("sample is not a [ts, value] pair")]
    NotAPair,
    #[error("timestamp is not an integer")]
    BadTimestamp,
    #[error("value is not numeric")]
    BadValue,
}

impl TsPoint {
    fn from_series(series: &Value) -> Result<Self, PointError> {
        let first = series
            .as_array()
            .and_then(|s| s.first())
            .ok_or(PointError::NotASeries)?;
        let pair = first.as_array().filter(|p| p.len() >= 2).ok_or(PointError::NotAPair)?;
        let ts = match &pair[0] {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or(PointError::BadTimestamp)?;
        let value = match &pair[1] {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|v: &f64| v.is_finite())
        .ok_or(PointError::BadValue)?;
        Ok(Self { ts, value })
    }
}
