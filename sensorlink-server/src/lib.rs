//! Sensor telemetry ingestion service.
//!
//! One websocket per device to the platform's telemetry plugin, supervised
//! as a fleet: [`supervisor::ConnectionSupervisor`] starts and stops it,
//! [`connection`] runs each device's state machine, [`ingest`] writes
//! readings to SQLite through the [`store`] traits.

pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod ingest;
pub mod liveness;
pub mod store;
pub mod supervisor;
pub mod web;
