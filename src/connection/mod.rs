pub mod client;
pub mod lifecycle;

pub use client::{ClientHandle, TelemetryClient};
pub use lifecycle::{ConnectionLifecycle, ConnectionState};
