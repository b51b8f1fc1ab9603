//! Fleet login against the platform's REST API.
//!
//! One `POST {base}/api/auth/login` with `{username, password}` yields a
//! bearer token for every telemetry socket of the fleet. The call is retried
//! on a linear schedule: the delay before retry *n* is `n × base_delay`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AttemptError, AuthError};

/// Path of the login endpoint, appended to the REST base URL.
pub const LOGIN_PATH: &str = "/api/auth/login";

/// Opaque bearer credential. Cheap to clone; shared by every connection
/// spawned in the same start cycle.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(Arc<str>);

impl Token {
    pub fn new(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(..)")
    }
}

/// Anything that can produce a fleet token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<Token, AuthError>;
}

/// Login settings.
#[derive(Clone)]
pub struct AuthConfig {
    /// REST base URL, e.g. `https://demo.thingsboard.io`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Total number of login attempts, including the first.
    pub max_attempts: u32,
    /// Unit of the linear retry schedule.
    pub base_delay: Duration,
}

impl AuthConfig {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            max_attempts: 5,
            base_delay: Duration::from_millis(5000),
        }
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn retry_delay(&self, retry: u32) -> Duration {
        self.base_delay * retry
    }

    fn login_url(&self) -> Result<String, AuthError> {
        let base = self.base_url.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(AuthError::InvalidUrl(self.base_url.clone()));
        }
        Ok(format!("{base}{LOGIN_PATH}"))
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

/// REST login client.
pub struct AuthClient {
    config: AuthConfig,
    http: reqwest::Client,
}

impl AuthClient {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn login_once(&self, url: &str) -> Result<Token, AttemptError> {
        let resp = self
            .http
            .post(url)
            .json(&LoginRequest {
                username: &self.config.username,
                password: &self.config.password,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AttemptError::Status(resp.status()));
        }
        let body: LoginResponse = resp.json().await?;
        match body.token {
            Some(token) if !token.is_empty() => Ok(Token::new(token)),
            _ => Err(AttemptError::MissingToken),
        }
    }
}

#[async_trait]
impl Authenticator for AuthClient {
    async fn authenticate(&self) -> Result<Token, AuthError> {
        let url = self.config.login_url()?;
        let attempts = self.config.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.config.retry_delay(attempt - 1);
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying platform login"
                );
                tokio::time::sleep(delay).await;
            }
            match self.login_once(&url).await {
                Ok(token) => {
                    tracing::info!(attempt, "Logged into platform");
                    return Ok(token);
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts = attempts, "Platform login failed: {e}");
                    last = e.to_string();
                }
            }
        }

        Err(AuthError::Exhausted { attempts, last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_schedule_is_linear() {
        let config = AuthConfig::new("http://tb.local", "u", "p");
        let delays: Vec<u64> = (1..5).map(|n| config.retry_delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![5000, 10000, 15000, 20000]);
    }

    #[test]
    fn login_url_joins_without_double_slash() {
        let config = AuthConfig::new("https://tb.local/", "u", "p");
        assert_eq!(config.login_url().unwrap(), "https://tb.local/api/auth/login");
        let bad = AuthConfig::new("tb.local", "u", "p");
        assert!(matches!(bad.login_url(), Err(AuthError::InvalidUrl(_))));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = AuthConfig::new("https://tb.local", "u", "hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
        assert_eq!(format!("{:?}", Token::new("abc")), "Token(..)");
    }
}
