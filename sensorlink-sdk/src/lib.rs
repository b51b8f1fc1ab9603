//! Client SDK for ThingsBoard-style device platforms.
//!
//! - [`auth`]: fleet login with a linear retry schedule.
//! - [`protocol`]: the telemetry plugin's subscription command and update
//!   frames.
//! - [`transport`]: the socket seam and its `tokio-tungstenite`
//!   implementation.
//!
//! The SDK keeps no connection state of its own; supervision and retry of
//! telemetry sockets live in the server crate.

pub mod auth;
pub mod error;
pub mod protocol;
pub mod transport;

pub use auth::{AuthClient, AuthConfig, Authenticator, Token};
pub use error::{AuthError, TransportError};
