//! Command-line and environment configuration.

use std::convert::Infallible;
use std::time::Duration;

use clap::Parser;
use sensorlink_sdk::AuthConfig;

use crate::connection::ConnectionPolicy;

#[derive(Parser, Debug, Clone)]
#[command(name = "sensorlink-server", about = "Telemetry ingester for a sensor fleet")]
pub struct Config {
    /// Platform REST base URL (login)
    #[arg(long, env = "TB_BASE_URL")]
    pub base_url: String,

    /// Platform websocket base URL (ws:// or wss://)
    #[arg(long, env = "TB_BASE_WS_URL")]
    pub ws_base_url: String,

    #[arg(long, env = "TB_LOGIN_USERNAME")]
    pub username: String,

    #[arg(long, env = "TB_LOGIN_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// SQLite database holding sensors and readings
    #[arg(long, env = "SENSORLINK_DB", default_value = "sensorlink.db")]
    pub db_path: String,

    /// Address for the status/reset HTTP API (e.g. 127.0.0.1:8080).
    /// Disabled when unset.
    #[arg(long, env = "SENSORLINK_WEB_ADDR")]
    pub web_addr: Option<String>,

    /// Verbose logging. From the environment only `DEBUG=true` (any case)
    /// turns it on; other values leave it off.
    #[arg(long, env = "DEBUG", value_parser = parse_debug_flag)]
    pub debug: bool,

    /// Ping interval of the platform, in milliseconds
    #[arg(long, env = "SENSORLINK_KEEPALIVE_MS", default_value_t = 30_000)]
    pub keepalive_ms: u64,

    /// Delay before each socket reconnect, in milliseconds
    #[arg(long, env = "SENSORLINK_RETRY_DELAY_MS", default_value_t = 5_000)]
    pub retry_delay_ms: u64,

    /// Reconnects allowed per connection
    #[arg(long, env = "SENSORLINK_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: u32,

    /// Login attempts per fleet start
    #[arg(long, env = "SENSORLINK_AUTH_ATTEMPTS", default_value_t = 5)]
    pub auth_attempts: u32,

    /// Base of the linear login backoff, in milliseconds
    #[arg(long, env = "SENSORLINK_AUTH_DELAY_MS", default_value_t = 5_000)]
    pub auth_delay_ms: u64,
}

fn parse_debug_flag(raw: &str) -> Result<bool, Infallible> {
    Ok(raw.trim().eq_ignore_ascii_case("true"))
}

impl Config {
    pub fn auth_config(&self) -> AuthConfig {
        let mut auth = AuthConfig::new(&self.base_url, &self.username, &self.password);
        auth.max_attempts = self.auth_attempts;
        auth.base_delay = Duration::from_millis(self.auth_delay_ms);
        auth
    }

    pub fn connection_policy(&self) -> ConnectionPolicy {
        let mut policy = ConnectionPolicy::new(&self.ws_base_url);
        policy.retry_delay = Duration::from_millis(self.retry_delay_ms);
        policy.max_retries = self.max_retries;
        policy.keepalive = Duration::from_millis(self.keepalive_ms);
        policy
    }
}
