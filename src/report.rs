/// Console presentation of model changes
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::channels::{Category, ChannelTable};
use crate::connection::ConnectionState;
use crate::models::Reading;
use crate::store::{ModelObserver, ModelUpdate, TelemetryModel};

/// Logs a summary line per model update plus the values of one channel group
pub struct ConsoleReport {
    channels: Arc<ChannelTable>,
    category: Category,
}

impl ConsoleReport {
    pub fn new(channels: Arc<ChannelTable>, category: Category) -> Self {
        ConsoleReport { channels, category }
    }

    /// `Heart Rate: 72 bpm, SpO2: 97 %` for the configured category
    pub fn render(&self, reading: &Reading) -> String {
        self.channels
            .by_category(self.category)
            .iter()
            .map(|def| {
                format!(
                    "{}: {}",
                    def.display_name,
                    self.channels.format(def.channel, reading.value(def.channel))
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn log_summary(&self, model: &TelemetryModel) {
        let summary = model.summary(OffsetDateTime::now_utc());
        info!(
            "Devices: {} total, {} online, {} warning | Readings: {} buffered, {} in the last hour",
            summary.total_devices,
            summary.online,
            summary.warning,
            summary.total_readings,
            summary.recent_readings
        );
    }
}

impl ModelObserver for ConsoleReport {
    fn on_model_update(&mut self, model: &TelemetryModel, update: &ModelUpdate) {
        match update {
            ModelUpdate::Restored { .. } | ModelUpdate::Snapshot { .. } => self.log_summary(model),
            ModelUpdate::Reading { device_id, alerts } => {
                if let Some(reading) = model.latest_reading(device_id) {
                    info!("{} [{}] {}", device_id, self.category.label(), self.render(reading));
                }
                if !alerts.is_empty() {
                    warn!("{} has {} channel(s) out of range", device_id, alerts.len());
                }
            }
            ModelUpdate::DeviceStatus { device_id, status } => {
                info!("Device {} is now {:?}", device_id, status);
                self.log_summary(model);
            }
        }
    }

    fn on_statistics(&mut self, stats: &Value) {
        info!("Server statistics: {}", stats);
    }

    fn on_connection_change(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => info!("Connected"),
            ConnectionState::Disconnected => warn!("Disconnected"),
            other => info!("{}...", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawReading;
    use serde_json::json;
    use time::macros::datetime;

    fn reading() -> Reading {
        let raw: RawReading = serde_json::from_value(json!({
            "device_id": "DEV001",
            "heart_rate": 72,
            "spo2": 97,
            "suhu_leher": 3850,
            "vbatt_leher": 3712
        }))
        .unwrap();
        Reading::from_wire(&raw, datetime!(2024-05-01 12:00:00 UTC), time::UtcOffset::UTC)
    }

    fn report(category: Category) -> ConsoleReport {
        ConsoleReport::new(Arc::new(ChannelTable::load().unwrap()), category)
    }

    #[test]
    fn renders_health_channels() {
        assert_eq!(report(Category::Health).render(&reading()), "SpO2: 97 %, Heart Rate: 72 bpm");
    }

    #[test]
    fn renders_temperature_with_two_decimals() {
        assert_eq!(
            report(Category::Temperature).render(&reading()),
            "Suhu Kaki: 0.00 °C, Suhu Leher: 38.50 °C"
        );
    }

    #[test]
    fn renders_battery_as_whole_millivolts() {
        assert_eq!(
            report(Category::Power).render(&reading()),
            "Baterai Kaki: 0 mV, Baterai Leher: 3712 mV"
        );
    }
}
