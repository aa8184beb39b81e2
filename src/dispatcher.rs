/// Inbound frame decoding and routing to the telemetry handler
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::models::{InitialData, RawReading};

/// Receiver of decoded server messages
///
/// One method per recognised message type; `pong` carries no payload and
/// defaults to a no-op.
pub trait TelemetryHandler {
    fn on_initial_data(&mut self, data: InitialData);
    fn on_sensor_data(&mut self, reading: RawReading);
    fn on_device_connected(&mut self, device_id: &str);
    fn on_device_disconnected(&mut self, device_id: &str);
    fn on_statistics(&mut self, stats: Value);
    fn on_pong(&mut self) {}
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    device_id: Option<String>,
}

/// A decoded server message
#[derive(Debug, Clone)]
pub enum Inbound {
    InitialData(InitialData),
    SensorData(RawReading),
    DeviceConnected(String),
    DeviceDisconnected(String),
    Statistics(Value),
    Pong,
}

/// Decode one text frame
///
/// Malformed JSON, unknown types and unusable payloads are logged and
/// yield `None`; the caller keeps the connection open.
pub fn decode(frame: &str) -> Option<Inbound> {
    let envelope: Envelope = match serde_json::from_str(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Error parsing WebSocket message: {}", e);
            return None;
        }
    };

    match envelope.kind.as_str() {
        "initial_data" => payload(envelope.data, "initial_data").map(Inbound::InitialData),
        "sensor_data" => payload(envelope.data, "sensor_data").map(Inbound::SensorData),
        "device_connected" => device_id(envelope, "device_connected").map(Inbound::DeviceConnected),
        "device_disconnected" => {
            device_id(envelope, "device_disconnected").map(Inbound::DeviceDisconnected)
        }
        "statistics" => Some(Inbound::Statistics(envelope.data.unwrap_or(Value::Null))),
        "pong" => Some(Inbound::Pong),
        other => {
            info!("Unknown message type: {}", other);
            None
        }
    }
}

/// Route a decoded message to its handler method
pub fn deliver<H: TelemetryHandler + ?Sized>(message: Inbound, handler: &mut H) {
    match message {
        Inbound::InitialData(data) => {
            info!("Received initial data");
            handler.on_initial_data(data);
        }
        Inbound::SensorData(reading) => {
            debug!("Received sensor data: {}", reading.device_id);
            handler.on_sensor_data(reading);
        }
        Inbound::DeviceConnected(device_id) => {
            info!("Device connected: {}", device_id);
            handler.on_device_connected(&device_id);
        }
        Inbound::DeviceDisconnected(device_id) => {
            info!("Device disconnected: {}", device_id);
            handler.on_device_disconnected(&device_id);
        }
        Inbound::Statistics(stats) => {
            debug!("Received statistics");
            handler.on_statistics(stats);
        }
        Inbound::Pong => {
            debug!("Heartbeat acknowledged");
            handler.on_pong();
        }
    }
}

fn payload<T: DeserializeOwned>(data: Option<Value>, kind: &str) -> Option<T> {
    let Some(data) = data else {
        warn!("Dropping {} message without data", kind);
        return None;
    };

    match serde_json::from_value(data) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!("Dropping {} message with invalid data: {}", kind, e);
            None
        }
    }
}

// Connect/disconnect events carry the id at the top level; accept a nested
// one as well.
fn device_id(envelope: Envelope, kind: &str) -> Option<String> {
    let nested = envelope
        .data
        .as_ref()
        .and_then(|data| data.get("device_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    match envelope.device_id.or(nested) {
        Some(id) if !id.is_empty() => Some(id),
        _ => {
            warn!("Dropping {} message without device_id", kind);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl TelemetryHandler for Recorder {
        fn on_initial_data(&mut self, data: InitialData) {
            self.calls.push(format!("initial:{}", data.devices.len()));
        }
        fn on_sensor_data(&mut self, reading: RawReading) {
            self.calls.push(format!("sensor:{}", reading.device_id));
        }
        fn on_device_connected(&mut self, device_id: &str) {
            self.calls.push(format!("connected:{}", device_id));
        }
        fn on_device_disconnected(&mut self, device_id: &str) {
            self.calls.push(format!("disconnected:{}", device_id));
        }
        fn on_statistics(&mut self, stats: Value) {
            self.calls.push(format!("stats:{}", stats));
        }
        fn on_pong(&mut self) {
            self.calls.push("pong".to_string());
        }
    }

    fn route(frame: &str, recorder: &mut Recorder) -> bool {
        match decode(frame) {
            Some(message) => {
                deliver(message, recorder);
                true
            }
            None => false,
        }
    }

    #[test]
    fn routes_every_known_type() {
        let mut recorder = Recorder::default();
        let frames = [
            json!({ "type": "initial_data", "data": { "devices": [{ "device_id": "DEV001" }] } }),
            json!({ "type": "sensor_data", "data": { "device_id": "DEV001", "heart_rate": 70 } }),
            json!({ "type": "device_connected", "device_id": "DEV002", "timestamp": "2024-05-01T10:00:00" }),
            json!({ "type": "device_disconnected", "device_id": "DEV002" }),
            json!({ "type": "statistics", "data": { "total_readings": 12 } }),
            json!({ "type": "pong", "timestamp": "2024-05-01T10:00:00" }),
        ];

        for frame in frames {
            assert!(route(&frame.to_string(), &mut recorder));
        }

        assert_eq!(
            recorder.calls,
            vec![
                "initial:1",
                "sensor:DEV001",
                "connected:DEV002",
                "disconnected:DEV002",
                "stats:{\"total_readings\":12}",
                "pong",
            ]
        );
    }

    #[test]
    fn drops_unknown_and_malformed_frames() {
        let mut recorder = Recorder::default();
        assert!(!route(r#"{"type":"device_data","device_id":"DEV001","data":[]}"#, &mut recorder));
        assert!(!route("{not json", &mut recorder));
        assert!(!route(r#"{"data":{}}"#, &mut recorder));
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn drops_known_types_with_unusable_payloads() {
        let mut recorder = Recorder::default();
        assert!(!route(r#"{"type":"sensor_data"}"#, &mut recorder));
        assert!(!route(r#"{"type":"sensor_data","data":{"heart_rate":70}}"#, &mut recorder));
        assert!(!route(r#"{"type":"initial_data"}"#, &mut recorder));
        assert!(!route(r#"{"type":"device_connected"}"#, &mut recorder));
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn accepts_device_id_nested_in_data() {
        let mut recorder = Recorder::default();
        assert!(route(
            r#"{"type":"device_connected","data":{"device_id":"DEV009"}}"#,
            &mut recorder
        ));
        assert_eq!(recorder.calls, vec!["connected:DEV009"]);
    }

    #[test]
    fn statistics_without_data_forwards_null() {
        let mut recorder = Recorder::default();
        assert!(route(r#"{"type":"statistics"}"#, &mut recorder));
        assert_eq!(recorder.calls, vec!["stats:null"]);
    }
}
