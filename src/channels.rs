/// Channel definitions and value transforms for collar and leg-tag payloads
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ClientError, Result};

/// One measurement stream reported by a wearable device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    ImuX,
    ImuY,
    ImuZ,
    SuhuKaki,
    VbattKaki,
    SuhuLeher,
    VbattLeher,
    Latitude,
    Longitude,
    Spo2,
    HeartRate,
}

impl Channel {
    /// Every channel in payload order
    pub const ALL: [Channel; 11] = [
        Channel::ImuX,
        Channel::ImuY,
        Channel::ImuZ,
        Channel::SuhuKaki,
        Channel::VbattKaki,
        Channel::SuhuLeher,
        Channel::VbattLeher,
        Channel::Latitude,
        Channel::Longitude,
        Channel::Spo2,
        Channel::HeartRate,
    ];

    /// Field name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::ImuX => "imu_x",
            Channel::ImuY => "imu_y",
            Channel::ImuZ => "imu_z",
            Channel::SuhuKaki => "suhu_kaki",
            Channel::VbattKaki => "vbatt_kaki",
            Channel::SuhuLeher => "suhu_leher",
            Channel::VbattLeher => "vbatt_leher",
            Channel::Latitude => "latitude",
            Channel::Longitude => "longitude",
            Channel::Spo2 => "spo2",
            Channel::HeartRate => "heart_rate",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integer encoding of the raw value in the device payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedType {
    Int16,
    Int32,
    Uint8,
    Uint16,
}

impl EncodedType {
    pub fn is_signed(&self) -> bool {
        matches!(self, EncodedType::Int16 | EncodedType::Int32)
    }
}

/// Scale formula, parsed once when the table loads
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleFormula {
    Identity,
    DivideBy(f64),
}

impl ScaleFormula {
    /// Parse a formula of the form `value` or `value/<number>`
    ///
    /// Anything else is rejected; formulas are never evaluated as code.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr == "value" {
            return Ok(ScaleFormula::Identity);
        }

        let divisor = expr
            .strip_prefix("value")
            .map(str::trim_start)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.trim().parse::<f64>().ok())
            .ok_or_else(|| ClientError::ScaleFormula(expr.to_string()))?;

        if !divisor.is_finite() || divisor == 0.0 {
            return Err(ClientError::ScaleFormula(expr.to_string()));
        }

        Ok(ScaleFormula::DivideBy(divisor))
    }

    pub fn apply(&self, raw: f64) -> f64 {
        match self {
            ScaleFormula::Identity => raw,
            ScaleFormula::DivideBy(divisor) => raw / divisor,
        }
    }
}

/// Grouping used by the presentation layer to filter columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    All,
    Health,
    Imu,
    Gps,
    Temperature,
    Power,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::All => "all",
            Category::Health => "health",
            Category::Imu => "imu",
            Category::Gps => "gps",
            Category::Temperature => "temperature",
            Category::Power => "power",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Category::All => "All Sensors",
            Category::Health => "Health Sensors",
            Category::Imu => "IMU Sensors",
            Category::Gps => "GPS",
            Category::Temperature => "Temperature",
            Category::Power => "Power/Battery",
        }
    }
}

impl FromStr for Category {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Category::All),
            "health" => Ok(Category::Health),
            "imu" => Ok(Category::Imu),
            "gps" => Ok(Category::Gps),
            "temperature" => Ok(Category::Temperature),
            "power" => Ok(Category::Power),
            other => Err(ClientError::Config(format!("unknown sensor category `{}`", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

/// Result of comparing a scaled value against its thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdLevel {
    Low,
    Normal,
    High,
}

impl fmt::Display for ThresholdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThresholdLevel::Low => "low",
            ThresholdLevel::Normal => "normal",
            ThresholdLevel::High => "high",
        })
    }
}

/// Source row of the channel table, formula still in text form
struct ChannelSpec {
    channel: Channel,
    encoded_type: EncodedType,
    scale: &'static str,
    unit: &'static str,
    display_name: &'static str,
    category: Category,
    thresholds: Option<Thresholds>,
}

const IMU_LIMITS: Option<Thresholds> = Some(Thresholds { low: -20.0, high: 20.0 });
const BODY_TEMP_LIMITS: Option<Thresholds> = Some(Thresholds { low: 15.0, high: 40.0 });
const BATTERY_LIMITS: Option<Thresholds> = Some(Thresholds { low: 3000.0, high: 4200.0 });

// Payload layout shared by the collar and leg firmware
#[rustfmt::skip]
const CHANNEL_SPECS: [ChannelSpec; 11] = [
    ChannelSpec { channel: Channel::ImuX, encoded_type: EncodedType::Int16, scale: "value/100", unit: "m/s²", display_name: "IMU X", category: Category::Imu, thresholds: IMU_LIMITS },
    ChannelSpec { channel: Channel::ImuY, encoded_type: EncodedType::Int16, scale: "value/100", unit: "m/s²", display_name: "IMU Y", category: Category::Imu, thresholds: IMU_LIMITS },
    ChannelSpec { channel: Channel::ImuZ, encoded_type: EncodedType::Int16, scale: "value/100", unit: "m/s²", display_name: "IMU Z", category: Category::Imu, thresholds: IMU_LIMITS },
    ChannelSpec { channel: Channel::SuhuKaki, encoded_type: EncodedType::Int16, scale: "value/100", unit: "°C", display_name: "Suhu Kaki", category: Category::Temperature, thresholds: BODY_TEMP_LIMITS },
    ChannelSpec { channel: Channel::VbattKaki, encoded_type: EncodedType::Uint16, scale: "value", unit: "mV", display_name: "Baterai Kaki", category: Category::Power, thresholds: BATTERY_LIMITS },
    ChannelSpec { channel: Channel::SuhuLeher, encoded_type: EncodedType::Int16, scale: "value/100", unit: "°C", display_name: "Suhu Leher", category: Category::Temperature, thresholds: BODY_TEMP_LIMITS },
    ChannelSpec { channel: Channel::VbattLeher, encoded_type: EncodedType::Uint16, scale: "value", unit: "mV", display_name: "Baterai Leher", category: Category::Power, thresholds: BATTERY_LIMITS },
    ChannelSpec { channel: Channel::Latitude, encoded_type: EncodedType::Int32, scale: "value/1e7", unit: "deg", display_name: "Latitude", category: Category::Gps, thresholds: None },
    ChannelSpec { channel: Channel::Longitude, encoded_type: EncodedType::Int32, scale: "value/1e7", unit: "deg", display_name: "Longitude", category: Category::Gps, thresholds: None },
    ChannelSpec { channel: Channel::Spo2, encoded_type: EncodedType::Uint8, scale: "value", unit: "%", display_name: "SpO2", category: Category::Health, thresholds: Some(Thresholds { low: 90.0, high: 100.0 }) },
    ChannelSpec { channel: Channel::HeartRate, encoded_type: EncodedType::Uint8, scale: "value", unit: "bpm", display_name: "Heart Rate", category: Category::Health, thresholds: Some(Thresholds { low: 60.0, high: 100.0 }) },
];

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDefinition {
    pub channel: Channel,
    pub encoded_type: EncodedType,
    pub scale: ScaleFormula,
    pub unit: &'static str,
    pub display_name: &'static str,
    pub category: Category,
    pub thresholds: Option<Thresholds>,
}

/// Immutable lookup table of channel definitions
#[derive(Debug, Clone)]
pub struct ChannelTable {
    definitions: Vec<ChannelDefinition>,
}

impl ChannelTable {
    /// Build the table for the standard collar/leg payload
    pub fn load() -> Result<Self> {
        Self::from_specs(&CHANNEL_SPECS)
    }

    fn from_specs(specs: &[ChannelSpec]) -> Result<Self> {
        let definitions = specs
            .iter()
            .map(|spec| {
                Ok(ChannelDefinition {
                    channel: spec.channel,
                    encoded_type: spec.encoded_type,
                    scale: ScaleFormula::parse(spec.scale)?,
                    unit: spec.unit,
                    display_name: spec.display_name,
                    category: spec.category,
                    thresholds: spec.thresholds,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ChannelTable { definitions })
    }

    pub fn definitions(&self) -> &[ChannelDefinition] {
        &self.definitions
    }

    pub fn get(&self, channel: Channel) -> Option<&ChannelDefinition> {
        self.definitions.iter().find(|def| def.channel == channel)
    }

    /// Convert a raw encoded value to engineering units
    pub fn scale(&self, channel: Channel, raw: f64) -> f64 {
        match self.get(channel) {
            Some(def) => def.scale.apply(raw),
            None => raw,
        }
    }

    pub fn classify(&self, channel: Channel, raw: f64) -> ThresholdLevel {
        let Some(thresholds) = self.get(channel).and_then(|def| def.thresholds) else {
            return ThresholdLevel::Normal;
        };

        let scaled = self.scale(channel, raw);
        if scaled < thresholds.low {
            ThresholdLevel::Low
        } else if scaled > thresholds.high {
            ThresholdLevel::High
        } else {
            ThresholdLevel::Normal
        }
    }

    /// Render a raw value with its unit, e.g. `25.50 °C` or `3700 mV`
    pub fn format(&self, channel: Channel, raw: f64) -> String {
        let Some(def) = self.get(channel) else {
            return raw.to_string();
        };

        let scaled = def.scale.apply(raw);
        if def.encoded_type.is_signed() {
            format!("{:.2} {}", scaled, def.unit)
        } else {
            format!("{} {}", scaled.round() as i64, def.unit)
        }
    }

    pub fn by_category(&self, category: Category) -> Vec<&ChannelDefinition> {
        self.definitions
            .iter()
            .filter(|def| category == Category::All || def.category == category)
            .collect()
    }
}
