//! Error types for the platform client.

use std::time::Duration;

/// Login against the platform failed.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Every attempt failed; `last` describes the final failure.
    #[error("login failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// The login URL could not be built from the configured base URL.
    #[error("invalid login url {0}")]
    InvalidUrl(String),
}

/// A single failed login attempt. Folded into [`AuthError::Exhausted`]
/// once the retry schedule runs out.
#[derive(Debug, thiserror::Error)]
pub(crate) enum AttemptError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("platform answered {0}")]
    Status(reqwest::StatusCode),

    #[error("response has no token")]
    MissingToken,
}

/// Socket-level failure on a telemetry connection.
///
/// Never fatal by itself: the connection's close handling decides what
/// happens next.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("{0}")]
    Other(String),
}
