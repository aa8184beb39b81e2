/// Error types shared by the client, dispatcher and cache
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Missing or malformed configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    /// A channel table entry carries a formula we do not understand
    #[error("unsupported scale formula `{0}`")]
    ScaleFormula(String),

    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("cache i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
