/// Reconciliation of snapshots and live readings into the telemetry model
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use time::{OffsetDateTime, UtcOffset};

use crate::channels::{Channel, ChannelTable, ThresholdLevel};
use crate::connection::ConnectionState;
use crate::dispatcher::TelemetryHandler;
use crate::models::{Device, DeviceStatus, InitialData, RawReading, Reading};
use crate::store::cache::{CachedSnapshot, SnapshotStore};
use crate::store::model::{TelemetryModel, PERSISTED_READINGS};
use crate::utils::format_datetime;

/// What changed in the model after a handler ran
#[derive(Debug, Clone, PartialEq)]
pub enum ModelUpdate {
    /// Model seeded from the durable cache at start-up
    Restored { devices: usize, readings: usize },
    /// `initial_data` merged; `readings_loaded` is zero when the buffer was already populated
    Snapshot { devices: usize, readings_loaded: usize },
    /// A live reading was prepended
    Reading {
        device_id: String,
        alerts: Vec<ChannelAlert>,
    },
    DeviceStatus {
        device_id: String,
        status: DeviceStatus,
    },
}

/// A channel outside its configured thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelAlert {
    pub channel: Channel,
    pub level: ThresholdLevel,
    pub raw: f64,
}

/// Consumer of model changes (rendering, export, ...)
pub trait ModelObserver: Send {
    fn on_model_update(&mut self, model: &TelemetryModel, update: &ModelUpdate);
    fn on_statistics(&mut self, _stats: &Value) {}
    fn on_connection_change(&mut self, _state: ConnectionState) {}
}

/// Owner of the authoritative model
///
/// Lifecycle: `restore()` from the durable cache, feed messages through
/// the `TelemetryHandler` impl, `flush()` on shutdown.
pub struct Reconciler {
    model: TelemetryModel,
    channels: Arc<ChannelTable>,
    store: Box<dyn SnapshotStore>,
    observers: Vec<Box<dyn ModelObserver>>,
    server_offset: UtcOffset,
}

impl Reconciler {
    pub fn new(channels: Arc<ChannelTable>, store: Box<dyn SnapshotStore>) -> Self {
        Reconciler {
            model: TelemetryModel::default(),
            channels,
            store,
            observers: Vec::new(),
            server_offset: UtcOffset::UTC,
        }
    }

    /// Offset at which naive server timestamps are read (UTC by default)
    pub fn with_server_offset(mut self, offset: UtcOffset) -> Self {
        self.server_offset = offset;
        self
    }

    pub fn subscribe(&mut self, observer: Box<dyn ModelObserver>) {
        self.observers.push(observer);
    }

    pub fn model(&self) -> &TelemetryModel {
        &self.model
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    /// Merge the durable cache into the model
    ///
    /// Returns false when there was nothing usable to load.
    pub fn restore(&mut self) -> bool {
        let snapshot = match self.store.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!("No cached snapshot found, starting empty");
                return false;
            }
            Err(e) => {
                warn!("Failed to load cached snapshot: {}", e);
                return false;
            }
        };

        let devices = snapshot.devices.len();
        for device in snapshot.devices {
            self.model.upsert_device(device);
        }
        let readings = self.model.fill_readings_if_empty(snapshot.sensor_readings);

        info!(
            "Loaded {} readings and {} devices from cache saved at {}",
            readings,
            devices,
            format_datetime(&snapshot.timestamp)
        );
        self.notify(ModelUpdate::Restored { devices, readings });
        true
    }

    /// Merge a full-state snapshot without discarding local data
    pub fn merge_snapshot(&mut self, data: InitialData, now: OffsetDateTime) {
        for wire in &data.devices {
            self.model.upsert_device(Device::from_wire(wire, now, self.server_offset));
        }

        let readings_loaded = self.model.fill_readings_if_empty(
            data.sensor_readings
                .iter()
                .map(|raw| Reading::from_wire(raw, now, self.server_offset)),
        );
        if readings_loaded > 0 {
            info!("Loaded {} initial readings", readings_loaded);
        } else if !data.sensor_readings.is_empty() {
            debug!(
                "Keeping {} buffered readings, ignoring {} from snapshot",
                self.model.readings().len(),
                data.sensor_readings.len()
            );
        }

        for device_id in &data.connected_devices {
            if let Some(device) = self.model.device_mut(device_id) {
                device.status = DeviceStatus::Online;
            }
        }

        if let Some(stats) = &data.statistics {
            self.forward_statistics(stats);
        }

        self.notify(ModelUpdate::Snapshot {
            devices: data.devices.len(),
            readings_loaded,
        });
    }

    /// Prepend one live reading, persist, and refresh its device
    pub fn merge_reading(&mut self, raw: &RawReading, now: OffsetDateTime) {
        let reading = Reading::from_wire(raw, now, self.server_offset);
        let alerts = self.check_thresholds(&reading);
        for alert in &alerts {
            warn!(
                "{} {} is {}: {}",
                reading.device_id,
                alert.channel,
                alert.level,
                self.channels.format(alert.channel, alert.raw)
            );
        }

        let device_id = reading.device_id.clone();
        let seen = reading.timestamp;
        self.model.push_reading(reading);

        match self.model.device_mut(&device_id) {
            Some(device) => {
                device.last_seen = seen;
                device.status = DeviceStatus::Online;
            }
            None => {
                info!("New device seen in readings: {}", device_id);
                self.model
                    .upsert_device(Device::new(&device_id, DeviceStatus::Online, seen));
            }
        }

        self.persist();
        self.notify(ModelUpdate::Reading { device_id, alerts });
    }

    pub fn mark_connected(&mut self, device_id: &str, now: OffsetDateTime) {
        match self.model.device_mut(device_id) {
            Some(device) => device.status = DeviceStatus::Online,
            None => {
                self.model
                    .upsert_device(Device::new(device_id, DeviceStatus::Online, now));
            }
        }
        self.notify(ModelUpdate::DeviceStatus {
            device_id: device_id.to_string(),
            status: DeviceStatus::Online,
        });
    }

    pub fn mark_disconnected(&mut self, device_id: &str) {
        let Some(device) = self.model.device_mut(device_id) else {
            debug!("Ignoring disconnect for unknown device {}", device_id);
            return;
        };
        device.status = DeviceStatus::Offline;
        self.notify(ModelUpdate::DeviceStatus {
            device_id: device_id.to_string(),
            status: DeviceStatus::Offline,
        });
    }

    pub fn notify_connection(&mut self, state: ConnectionState) {
        for observer in self.observers.iter_mut() {
            observer.on_connection_change(state);
        }
    }

    /// Write the current model to the durable cache
    ///
    /// Returns false when the write failed; the failure is already logged.
    pub fn flush(&self) -> bool {
        if !self.persist() {
            return false;
        }
        info!(
            "Flushed {} readings and {} devices to cache",
            self.model.readings().len().min(PERSISTED_READINGS),
            self.model.devices().len()
        );
        true
    }

    fn check_thresholds(&self, reading: &Reading) -> Vec<ChannelAlert> {
        reading
            .channel_values
            .iter()
            .filter_map(|(&channel, &raw)| {
                let level = self.channels.classify(channel, raw);
                (level != ThresholdLevel::Normal).then_some(ChannelAlert { channel, level, raw })
            })
            .collect()
    }

    // Best effort: a failed write leaves the in-memory model untouched.
    // Returns whether the snapshot was saved.
    fn persist(&self) -> bool {
        let snapshot = CachedSnapshot {
            sensor_readings: self.model.persisted_readings(),
            devices: self.model.devices().to_vec(),
            timestamp: OffsetDateTime::now_utc(),
        };
        match self.store.save(&snapshot) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save snapshot to cache: {}", e);
                false
            }
        }
    }

    fn forward_statistics(&mut self, stats: &Value) {
        for observer in self.observers.iter_mut() {
            observer.on_statistics(stats);
        }
    }

    fn notify(&mut self, update: ModelUpdate) {
        for observer in self.observers.iter_mut() {
            observer.on_model_update(&self.model, &update);
        }
    }
}

impl TelemetryHandler for Reconciler {
    fn on_initial_data(&mut self, data: InitialData) {
        self.merge_snapshot(data, OffsetDateTime::now_utc());
    }

    fn on_sensor_data(&mut self, reading: RawReading) {
        self.merge_reading(&reading, OffsetDateTime::now_utc());
    }

    fn on_device_connected(&mut self, device_id: &str) {
        self.mark_connected(device_id, OffsetDateTime::now_utc());
    }

    fn on_device_disconnected(&mut self, device_id: &str) {
        self.mark_disconnected(device_id);
    }

    fn on_statistics(&mut self, stats: Value) {
        self.forward_statistics(&stats);
    }
}
