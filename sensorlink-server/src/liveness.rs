//! Ping-based liveness detection for a telemetry socket.
//!
//! The platform pings every open socket on a fixed keep-alive interval. Each
//! ping pushes the deadline out to `interval + grace`; if the deadline passes
//! the socket is considered silently dead. No deadline is armed until the
//! first ping arrives.

use std::future::pending;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Default keep-alive interval of the platform's websocket server.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_millis(30_000);
/// Slack on top of the keep-alive interval before a socket is declared dead.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(5_000);

/// Per-connection heartbeat timer.
#[derive(Debug)]
pub struct LivenessMonitor {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl LivenessMonitor {
    pub fn new(keepalive: Duration, grace: Duration) -> Self {
        Self {
            timeout: keepalive + grace,
            deadline: None,
        }
    }

    /// A ping arrived: restart the timer.
    pub fn on_ping(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Disarm the timer. Called whenever the socket closes.
    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// Resolves once the armed deadline passes; pends forever while
    /// disarmed. Cancel-safe, meant for a `select!` branch.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending::<()>().await,
        }
    }
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_KEEPALIVE, DEFAULT_GRACE)
    }
}
