use log::{info, warn};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use time::UtcOffset;
use url::Url;

use crate::channels::Category;
use crate::error::{ClientError, Result};
use crate::utils::parse_utc_offset;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_PATH: &str = "/ws/dashboard";
const DEFAULT_CACHE_PATH: &str = "farmtech_data.json";
const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_RECONNECT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Url,
    pub cache_path: PathBuf,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    /// Channel group shown by the console report
    pub display_category: Category,
    /// Offset of the server's naive wall-clock timestamps
    pub server_offset: UtcOffset,
}

impl ClientConfig {
    pub fn new() -> Result<Self> {
        // Load environment variables
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset and blank keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let endpoint = match var("WS_URL") {
            Some(url) => Url::parse(&url)?,
            None => {
                let host = var("WS_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
                let port = match var("WS_PORT") {
                    Some(port) => port.parse::<u16>().map_err(|_| {
                        ClientError::Config(format!("WS_PORT must be a port number, got '{}'", port))
                    })?,
                    None => DEFAULT_PORT,
                };
                let path = var("WS_PATH").unwrap_or_else(|| DEFAULT_PATH.to_string());
                let path = if path.starts_with('/') { path } else { format!("/{}", path) };
                Url::parse(&format!("ws://{}:{}{}", host, port, path))?
            }
        };

        // Built without a TLS connector
        if endpoint.scheme() != "ws" {
            return Err(ClientError::Config(format!(
                "Endpoint must use ws://, got '{}'",
                endpoint
            )));
        }

        let cache_path = PathBuf::from(
            var("CACHE_PATH").unwrap_or_else(|| DEFAULT_CACHE_PATH.to_string()),
        );
        let heartbeat_interval = Duration::from_secs(positive(
            "HEARTBEAT_INTERVAL_SECS",
            var("HEARTBEAT_INTERVAL_SECS"),
            DEFAULT_HEARTBEAT_SECS,
        )?);
        let reconnect_delay = Duration::from_millis(positive(
            "RECONNECT_DELAY_MS",
            var("RECONNECT_DELAY_MS"),
            DEFAULT_RECONNECT_MS,
        )?);
        let display_category = match var("DISPLAY_CATEGORY") {
            Some(category) => category.parse()?,
            None => Category::All,
        };

        let server_offset = match var("SERVER_UTC_OFFSET") {
            Some(offset) => parse_utc_offset(&offset).ok_or_else(|| {
                ClientError::Config(format!(
                    "SERVER_UTC_OFFSET must look like +07:00 or UTC, got '{}'",
                    offset
                ))
            })?,
            None => local_offset(),
        };

        info!("Dashboard endpoint: {}", endpoint);
        info!("Cache file: {}", cache_path.display());

        Ok(ClientConfig {
            endpoint,
            cache_path,
            heartbeat_interval,
            reconnect_delay,
            display_category,
            server_offset,
        })
    }
}

// The host offset cannot always be determined once threads are running
fn local_offset() -> UtcOffset {
    match UtcOffset::current_local_offset() {
        Ok(offset) => offset,
        Err(e) => {
            warn!(
                "Could not determine local UTC offset ({}), reading server timestamps as UTC; set SERVER_UTC_OFFSET",
                e
            );
            UtcOffset::UTC
        }
    }
}

fn positive(key: &str, value: Option<String>, default: u64) -> Result<u64> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ClientError::Config(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}
