//! Real-time telemetry synchronization client for the FarmTech livestock
//! dashboard: keeps a local device/reading model in step with the server
//! over a WebSocket, survives disconnects and caches the model on disk.

pub mod channels;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod report;
pub mod store;
pub mod utils;

pub use config::ClientConfig;
pub use connection::{ClientHandle, ConnectionState, TelemetryClient};
pub use error::{ClientError, Result};
pub use store::Reconciler;
