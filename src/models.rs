use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::{OffsetDateTime, UtcOffset};

use crate::channels::Channel;
use crate::utils::{cow_id_from_device_id, derive_status, parse_timestamp};

/// Default row count for `get_device_data` requests
pub const DEFAULT_DEVICE_DATA_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Warning,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    #[default]
    Strong,
    Medium,
    Weak,
    Unknown,
}

/// A wearable device as known to the local model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub cow_id: String,
    pub status: DeviceStatus,
    #[serde(default)]
    pub signal: SignalStrength,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    pub firmware_version: String,
}

impl Device {
    /// Device record for a first sighting with no metadata
    pub fn new(id: &str, status: DeviceStatus, last_seen: OffsetDateTime) -> Self {
        Device {
            id: id.to_string(),
            cow_id: cow_id_from_device_id(id),
            status,
            signal: SignalStrength::default(),
            last_seen,
            firmware_version: "Unknown".to_string(),
        }
    }

    /// Build a device from a snapshot entry, deriving status from `last_seen`
    ///
    /// Naive server timestamps are read at `server_offset`.
    pub fn from_wire(wire: &WireDevice, now: OffsetDateTime, server_offset: UtcOffset) -> Self {
        let last_seen = wire
            .last_seen
            .as_deref()
            .and_then(|value| parse_timestamp(value, server_offset));

        Device {
            id: wire.device_id.clone(),
            cow_id: wire
                .cow_id
                .clone()
                .filter(|cow_id| !cow_id.is_empty())
                .unwrap_or_else(|| cow_id_from_device_id(&wire.device_id)),
            status: derive_status(last_seen, now),
            signal: SignalStrength::default(),
            last_seen: last_seen.unwrap_or(now),
            firmware_version: wire
                .firmware_version
                .clone()
                .filter(|version| !version.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// One immutable set of channel values from a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub device_id: String,
    pub channel_values: BTreeMap<Channel, f64>,
}

impl Reading {
    /// Convert a wire reading; absent channels become zero
    pub fn from_wire(raw: &RawReading, now: OffsetDateTime, server_offset: UtcOffset) -> Self {
        Reading {
            timestamp: raw
                .timestamp
                .as_deref()
                .and_then(|value| parse_timestamp(value, server_offset))
                .unwrap_or(now),
            device_id: raw.device_id.clone(),
            channel_values: Channel::ALL
                .iter()
                .map(|&channel| (channel, raw.channel_value(channel)))
                .collect(),
        }
    }

    pub fn value(&self, channel: Channel) -> f64 {
        self.channel_values.get(&channel).copied().unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Wire format (server -> client)
// ---------------------------------------------------------------------------

/// Payload of an `initial_data` frame
///
/// Unusable list entries are skipped one by one; the rest of the snapshot
/// still applies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitialData {
    #[serde(default, deserialize_with = "skip_invalid_entries")]
    pub devices: Vec<WireDevice>,
    #[serde(default, deserialize_with = "skip_invalid_entries")]
    pub sensor_readings: Vec<RawReading>,
    #[serde(default, deserialize_with = "skip_invalid_entries")]
    pub connected_devices: Vec<String>,
    #[serde(default)]
    pub statistics: Option<Value>,
}

/// Device row as stored by the server
#[derive(Debug, Clone, Deserialize)]
pub struct WireDevice {
    pub device_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cow_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_seen: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub firmware_version: Option<String>,
}

/// Sensor reading as forwarded by the server
///
/// Channel fields are kept loosely typed so that missing, null or
/// non-numeric values can fall back to zero instead of failing the frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RawReading {
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
    pub device_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawReading {
    pub fn channel_value(&self, channel: Channel) -> f64 {
        self.fields
            .get(channel.as_str())
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

fn skip_invalid_entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let entries = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Skipping invalid snapshot entry: {}", e);
                None
            }
        })
        .collect())
}

// Strings pass through, numbers are stringified, anything else is absent
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Wire format (client -> server)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Ping,
    GetStats,
    GetDeviceData { device_id: String, limit: u32 },
    SendCommandToDevice { device_id: String, command: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn raw_reading_defaults_missing_and_null_channels_to_zero() {
        let raw: RawReading = serde_json::from_value(json!({
            "device_id": "DEV001",
            "timestamp": "2024-05-01T10:00:00",
            "suhu_leher": 3850,
            "heart_rate": null,
            "spo2": "97",
            "id": 42
        }))
        .unwrap();

        let reading = Reading::from_wire(&raw, datetime!(2024-05-01 11:00:00 UTC), UtcOffset::UTC);
        assert_eq!(reading.timestamp, datetime!(2024-05-01 10:00:00 UTC));
        assert_eq!(reading.value(Channel::SuhuLeher), 3850.0);
        assert_eq!(reading.value(Channel::HeartRate), 0.0);
        assert_eq!(reading.value(Channel::Spo2), 0.0);
        assert_eq!(reading.value(Channel::ImuX), 0.0);
        assert_eq!(reading.channel_values.len(), Channel::ALL.len());
    }

    #[test]
    fn reading_without_timestamp_uses_receive_time() {
        let raw: RawReading = serde_json::from_value(json!({ "device_id": "DEV001" })).unwrap();
        let now = datetime!(2024-05-01 11:00:00 UTC);
        assert_eq!(Reading::from_wire(&raw, now, UtcOffset::UTC).timestamp, now);
    }

    #[test]
    fn wire_device_fills_defaults() {
        let wire: WireDevice = serde_json::from_value(json!({
            "device_id": "DEV007",
            "cow_id": null,
            "last_seen": null
        }))
        .unwrap();
        let now = datetime!(2024-05-01 11:00:00 UTC);

        let device = Device::from_wire(&wire, now, UtcOffset::UTC);
        assert_eq!(device.cow_id, "007");
        assert_eq!(device.firmware_version, "Unknown");
        assert_eq!(device.status, DeviceStatus::Offline);
        assert_eq!(device.signal, SignalStrength::Strong);
        assert_eq!(device.last_seen, now);
    }

    #[test]
    fn wrong_typed_fields_fall_back_individually() {
        let raw: RawReading = serde_json::from_value(json!({
            "device_id": "DEV001",
            "timestamp": 1714557600,
            "heart_rate": 72
        }))
        .unwrap();
        let now = datetime!(2024-05-01 11:00:00 UTC);
        let reading = Reading::from_wire(&raw, now, UtcOffset::UTC);
        assert_eq!(reading.timestamp, now);
        assert_eq!(reading.value(Channel::HeartRate), 72.0);

        let wire: WireDevice = serde_json::from_value(json!({
            "device_id": "DEV004",
            "cow_id": 17,
            "last_seen": true,
            "firmware_version": ["1.0"]
        }))
        .unwrap();
        let device = Device::from_wire(&wire, now, UtcOffset::UTC);
        assert_eq!(device.cow_id, "17");
        assert_eq!(device.status, DeviceStatus::Offline);
        assert_eq!(device.firmware_version, "Unknown");
    }

    #[test]
    fn snapshot_skips_only_unusable_entries() {
        let data: InitialData = serde_json::from_value(json!({
            "devices": [
                { "device_id": "DEV001", "cow_id": 17 },
                { "cow_id": "no id" },
                { "device_id": "DEV002" }
            ],
            "sensor_readings": [{ "device_id": 5 }, { "device_id": "DEV001" }],
            "connected_devices": ["DEV001", 2]
        }))
        .unwrap();

        let ids: Vec<&str> = data.devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["DEV001", "DEV002"]);
        assert_eq!(data.sensor_readings.len(), 1);
        assert_eq!(data.connected_devices, vec!["DEV001"]);
    }

    #[test]
    fn naive_device_timestamps_follow_server_offset() {
        let wire: WireDevice = serde_json::from_value(json!({
            "device_id": "DEV001",
            "last_seen": "2024-05-01T13:00:00"
        }))
        .unwrap();
        let now = datetime!(2024-05-01 12:00:00 UTC);

        // A UTC+7 server: 13:00 local is six hours ago
        let plus_seven = UtcOffset::from_hms(7, 0, 0).unwrap();
        let device = Device::from_wire(&wire, now, plus_seven);
        assert_eq!(device.last_seen, datetime!(2024-05-01 06:00:00 UTC));
        assert_eq!(device.status, DeviceStatus::Offline);
    }

    #[test]
    fn initial_data_tolerates_null_lists() {
        let data: InitialData = serde_json::from_value(json!({
            "devices": null,
            "sensor_readings": [{ "device_id": "DEV001" }]
        }))
        .unwrap();
        assert!(data.devices.is_empty());
        assert_eq!(data.sensor_readings.len(), 1);
        assert!(data.connected_devices.is_empty());
    }

    #[test]
    fn outbound_frames_match_server_protocol() {
        assert_eq!(serde_json::to_value(Outbound::Ping).unwrap(), json!({ "type": "ping" }));
        assert_eq!(
            serde_json::to_value(Outbound::GetStats).unwrap(),
            json!({ "type": "get_stats" })
        );
        assert_eq!(
            serde_json::to_value(Outbound::GetDeviceData {
                device_id: "DEV001".into(),
                limit: DEFAULT_DEVICE_DATA_LIMIT,
            })
            .unwrap(),
            json!({ "type": "get_device_data", "device_id": "DEV001", "limit": 100 })
        );
        assert_eq!(
            serde_json::to_value(Outbound::SendCommandToDevice {
                device_id: "DEV002".into(),
                command: json!({ "led": "on" }),
            })
            .unwrap(),
            json!({ "type": "send_command_to_device", "device_id": "DEV002", "command": { "led": "on" } })
        );
    }

    #[test]
    fn device_round_trips_through_cache_format() {
        let device = Device::new("DEV003", DeviceStatus::Warning, datetime!(2024-05-01 10:00:00 UTC));
        let value = serde_json::to_value(&device).unwrap();
        assert_eq!(value["cowId"], "003");
        assert_eq!(value["status"], "warning");
        assert_eq!(value["lastSeen"], "2024-05-01T10:00:00Z");
    }
}
