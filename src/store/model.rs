/// In-memory device and reading model
use std::collections::VecDeque;
use time::{Duration, OffsetDateTime};

use crate::models::{Device, DeviceStatus, Reading};

/// Readings kept in memory
pub const MAX_READINGS: usize = 1000;
/// Newest readings written to the durable cache
pub const PERSISTED_READINGS: usize = 500;

/// Devices plus a newest-first reading buffer
///
/// Devices are never removed. The buffer never exceeds `MAX_READINGS`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryModel {
    devices: Vec<Device>,
    readings: VecDeque<Reading>,
}

impl TelemetryModel {
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Readings, newest first
    pub fn readings(&self) -> &VecDeque<Reading> {
        &self.readings
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.id == id)
    }

    pub(crate) fn device_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|device| device.id == id)
    }

    /// Replace the device with the same id, or append it
    ///
    /// Returns true if the device was new.
    pub(crate) fn upsert_device(&mut self, device: Device) -> bool {
        match self.device_mut(&device.id) {
            Some(existing) => {
                *existing = device;
                false
            }
            None => {
                self.devices.push(device);
                true
            }
        }
    }

    /// Prepend a reading and drop the oldest past the cap
    pub(crate) fn push_reading(&mut self, reading: Reading) {
        self.readings.push_front(reading);
        self.readings.truncate(MAX_READINGS);
    }

    /// Seed the buffer, only when nothing is buffered yet
    ///
    /// Returns the number of readings loaded.
    pub(crate) fn fill_readings_if_empty<I>(&mut self, readings: I) -> usize
    where
        I: IntoIterator<Item = Reading>,
    {
        if !self.readings.is_empty() {
            return 0;
        }
        self.readings.extend(readings.into_iter().take(MAX_READINGS));
        self.readings.len()
    }

    /// Newest-first prefix that goes to the durable cache
    pub fn persisted_readings(&self) -> Vec<Reading> {
        self.readings.iter().take(PERSISTED_READINGS).cloned().collect()
    }

    pub fn latest_reading(&self, device_id: &str) -> Option<&Reading> {
        self.readings.iter().find(|reading| reading.device_id == device_id)
    }

    /// Readings matching a presentation filter, newest first
    pub fn filter_readings(&self, filter: &ReadingFilter, now: OffsetDateTime) -> Vec<&Reading> {
        let since = filter.range.window().map(|window| now - window);

        self.readings
            .iter()
            .filter(|reading| match &filter.device {
                Some(device_id) => &reading.device_id == device_id,
                None => true,
            })
            .filter(|reading| since.map_or(true, |since| reading.timestamp >= since))
            .collect()
    }

    pub fn summary(&self, now: OffsetDateTime) -> ModelSummary {
        let count_status = |status: DeviceStatus| {
            self.devices
                .iter()
                .filter(|device| device.status == status)
                .count()
        };
        let hour_ago = now - Duration::HOUR;

        ModelSummary {
            total_devices: self.devices.len(),
            online: count_status(DeviceStatus::Online),
            warning: count_status(DeviceStatus::Warning),
            total_readings: self.readings.len(),
            recent_readings: self
                .readings
                .iter()
                .filter(|reading| reading.timestamp > hour_ago)
                .count(),
        }
    }
}

/// Quick statistics for status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSummary {
    pub total_devices: usize,
    pub online: usize,
    pub warning: usize,
    pub total_readings: usize,
    /// Readings from the last hour
    pub recent_readings: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    LastHour,
    Last6Hours,
    Last24Hours,
    Last7Days,
    Last30Days,
    AllTime,
}

impl TimeRange {
    fn window(&self) -> Option<Duration> {
        match self {
            TimeRange::LastHour => Some(Duration::HOUR),
            TimeRange::Last6Hours => Some(Duration::hours(6)),
            TimeRange::Last24Hours => Some(Duration::DAY),
            TimeRange::Last7Days => Some(Duration::WEEK),
            TimeRange::Last30Days => Some(Duration::days(30)),
            TimeRange::AllTime => None,
        }
    }
}

impl From<&str> for TimeRange {
    /// Dashboard codes `1h`, `6h`, `24h`, `7d`, `30d`; anything else is all time
    fn from(code: &str) -> Self {
        match code.trim() {
            "1h" => TimeRange::LastHour,
            "6h" => TimeRange::Last6Hours,
            "24h" => TimeRange::Last24Hours,
            "7d" => TimeRange::Last7Days,
            "30d" => TimeRange::Last30Days,
            _ => TimeRange::AllTime,
        }
    }
}

/// User-selected view over the reading buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingFilter {
    /// `None` selects every device
    pub device: Option<String>,
    pub range: TimeRange,
}

impl ReadingFilter {
    /// Build from dashboard parameters, where `all` selects every device
    pub fn new(device: &str, range: &str) -> Self {
        let device = match device.trim() {
            "" | "all" => None,
            id => Some(id.to_string()),
        };
        ReadingFilter {
            device,
            range: TimeRange::from(range),
        }
    }
}

impl Default for ReadingFilter {
    fn default() -> Self {
        ReadingFilter {
            device: None,
            range: TimeRange::Last24Hours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-05-01 12:00:00 UTC);

    fn reading(device_id: &str, minutes_ago: i64) -> Reading {
        Reading {
            timestamp: NOW - Duration::minutes(minutes_ago),
            device_id: device_id.to_string(),
            channel_values: BTreeMap::new(),
        }
    }

    #[test]
    fn buffer_stays_capped_and_newest_first() {
        let mut model = TelemetryModel::default();
        for i in 0..1500 {
            model.push_reading(reading("DEV001", 1500 - i));
        }

        assert_eq!(model.readings().len(), MAX_READINGS);
        assert_eq!(model.readings()[0].timestamp, NOW - Duration::minutes(1));

        let persisted = model.persisted_readings();
        assert_eq!(persisted.len(), PERSISTED_READINGS);
        assert!(persisted.iter().zip(model.readings().iter()).all(|(a, b)| a == b));
    }

    #[test]
    fn fill_only_applies_to_empty_buffer() {
        let mut model = TelemetryModel::default();
        assert_eq!(model.fill_readings_if_empty(vec![reading("A", 1), reading("A", 2)]), 2);
        assert_eq!(model.fill_readings_if_empty(vec![reading("B", 0)]), 0);
        assert_eq!(model.readings().len(), 2);
        assert!(model.readings().iter().all(|r| r.device_id == "A"));
    }

    #[test]
    fn filters_by_device_and_time_range() {
        let mut model = TelemetryModel::default();
        model.fill_readings_if_empty(vec![
            reading("DEV001", 10),
            reading("DEV002", 30),
            reading("DEV001", 120),
            reading("DEV001", 60 * 48),
        ]);

        let last_hour = model.filter_readings(&ReadingFilter::new("all", "1h"), NOW);
        assert_eq!(last_hour.len(), 2);

        let dev1_day = model.filter_readings(&ReadingFilter::new("DEV001", "24h"), NOW);
        assert_eq!(dev1_day.len(), 2);

        let everything = model.filter_readings(&ReadingFilter::new("all", "forever"), NOW);
        assert_eq!(everything.len(), 4);
    }

    #[test]
    fn summarises_devices_and_recent_readings() {
        let mut model = TelemetryModel::default();
        model.upsert_device(Device::new("DEV001", DeviceStatus::Online, NOW));
        model.upsert_device(Device::new("DEV002", DeviceStatus::Warning, NOW));
        model.upsert_device(Device::new("DEV003", DeviceStatus::Offline, NOW));
        model.fill_readings_if_empty(vec![reading("DEV001", 5), reading("DEV001", 90)]);

        assert_eq!(
            model.summary(NOW),
            ModelSummary {
                total_devices: 3,
                online: 1,
                warning: 1,
                total_readings: 2,
                recent_readings: 1,
            }
        );
    }

    #[test]
    fn latest_reading_is_first_match() {
        let mut model = TelemetryModel::default();
        model.push_reading(reading("DEV001", 20));
        model.push_reading(reading("DEV002", 10));
        model.push_reading(reading("DEV001", 5));

        let latest = model.latest_reading("DEV001").unwrap();
        assert_eq!(latest.timestamp, NOW - Duration::minutes(5));
        assert!(model.latest_reading("DEV404").is_none());
    }
}
