/// Durable snapshot of the model, kept as a JSON file
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

use crate::error::Result;
use crate::models::{Device, Reading};

/// Record written after every live reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSnapshot {
    /// Newest first
    #[serde(default)]
    pub sensor_readings: Vec<Reading>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Storage backend for the cached snapshot
pub trait SnapshotStore: Send {
    /// `Ok(None)` when nothing has been saved yet
    fn load(&self) -> Result<Option<CachedSnapshot>>;
    fn save(&self, snapshot: &CachedSnapshot) -> Result<()>;
}

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<CachedSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&self, snapshot: &CachedSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Readers never observe a partially written file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(snapshot)?)?;
        fs::rename(&tmp, &self.path)?;

        debug!(
            "Saved {} readings and {} devices to {}",
            snapshot.sensor_readings.len(),
            snapshot.devices.len(),
            self.path.display()
        );
        Ok(())
    }
}
