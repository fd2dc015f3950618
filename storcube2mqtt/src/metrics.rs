use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

/// The closed set of telemetry fields the vendor is known to report.
///
/// The wire names come straight from the StorCube cloud dialect; anything
/// outside this set is ignored at decode time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKey {
    StateOfCharge,
    BatteryLevel,
    BatteryPower,
    BatteryVoltage,
    BatteryCurrent,
    Temperature,
    Energy,
    Capacity,
    Health,
    Cycles,
    SolarPower,
    SolarVoltage,
    SolarCurrent,
    SolarEnergy,
    OutputPower,
    OutputVoltage,
    OutputCurrent,
    OutputEnergy,
    Pv1Power,
    Pv2Power,
    Status,
    Working,
    Firmware,
    EquipId,
}

impl MetricKey {
    pub const ALL: [MetricKey; 24] = [
        MetricKey::StateOfCharge,
        MetricKey::BatteryLevel,
        MetricKey::BatteryPower,
        MetricKey::BatteryVoltage,
        MetricKey::BatteryCurrent,
        MetricKey::Temperature,
        MetricKey::Energy,
        MetricKey::Capacity,
        MetricKey::Health,
        MetricKey::Cycles,
        MetricKey::SolarPower,
        MetricKey::SolarVoltage,
        MetricKey::SolarCurrent,
        MetricKey::SolarEnergy,
        MetricKey::OutputPower,
        MetricKey::OutputVoltage,
        MetricKey::OutputCurrent,
        MetricKey::OutputEnergy,
        MetricKey::Pv1Power,
        MetricKey::Pv2Power,
        MetricKey::Status,
        MetricKey::Working,
        MetricKey::Firmware,
        MetricKey::EquipId,
    ];

    /// Field name used by the vendor in telemetry frames. The same name is
    /// kept in the republished MQTT payload.
    pub fn field(&self) -> &'static str {
        match self {
            MetricKey::StateOfCharge => "soc",
            MetricKey::BatteryLevel => "batteryLevel",
            MetricKey::BatteryPower => "power",
            MetricKey::BatteryVoltage => "voltage",
            MetricKey::BatteryCurrent => "current",
            MetricKey::Temperature => "temp",
            MetricKey::Energy => "energy",
            MetricKey::Capacity => "capacity",
            MetricKey::Health => "soh",
            MetricKey::Cycles => "cycles",
            MetricKey::SolarPower => "solarPower",
            MetricKey::SolarVoltage => "solarVoltage",
            MetricKey::SolarCurrent => "solarCurrent",
            MetricKey::SolarEnergy => "solarEnergy",
            MetricKey::OutputPower => "invPower",
            MetricKey::OutputVoltage => "outputVoltage",
            MetricKey::OutputCurrent => "outputCurrent",
            MetricKey::OutputEnergy => "outputEnergy",
            MetricKey::Pv1Power => "pv1power",
            MetricKey::Pv2Power => "pv2power",
            MetricKey::Status => "fgOnline",
            MetricKey::Working => "workStatus",
            MetricKey::Firmware => "version",
            MetricKey::EquipId => "equipId",
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            MetricKey::StateOfCharge | MetricKey::BatteryLevel | MetricKey::Health => Some("%"),
            MetricKey::BatteryPower
            | MetricKey::SolarPower
            | MetricKey::OutputPower
            | MetricKey::Pv1Power
            | MetricKey::Pv2Power => Some("W"),
            MetricKey::BatteryVoltage | MetricKey::SolarVoltage | MetricKey::OutputVoltage => {
                Some("V")
            }
            MetricKey::BatteryCurrent | MetricKey::SolarCurrent | MetricKey::OutputCurrent => {
                Some("A")
            }
            MetricKey::Temperature => Some("°C"),
            MetricKey::Energy
            | MetricKey::Capacity
            | MetricKey::SolarEnergy
            | MetricKey::OutputEnergy => Some("Wh"),
            MetricKey::Cycles
            | MetricKey::Status
            | MetricKey::Working
            | MetricKey::Firmware
            | MetricKey::EquipId => None,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// A telemetry value, typed once at decode time. The vendor mixes numbers,
/// strings and flags freely within one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl MetricValue {
    /// Converts a raw JSON value. Objects, arrays and nulls have no metric
    /// representation and yield `None`.
    pub fn from_json(raw: &serde_json::Value) -> Option<MetricValue> {
        match raw {
            serde_json::Value::Number(n) => n.as_f64().map(MetricValue::Number),
            serde_json::Value::String(s) => Some(MetricValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(MetricValue::Bool(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{n}"),
            MetricValue::Text(s) => f.write_str(s),
            MetricValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Latest observed value for one metric, as held by the value cache.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub value: MetricValue,
    pub unit: Option<&'static str>,
    pub received_at: DateTime<Local>,
}

/// One decoded device snapshot. Only the keys actually present in the frame
/// appear in `metrics`; nothing is synthesized for absent fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetryReport {
    pub equip_id: String,
    pub metrics: BTreeMap<MetricKey, MetricValue>,
}

impl TelemetryReport {
    pub fn get(&self, key: MetricKey) -> Option<&MetricValue> {
        self.metrics.get(&key)
    }
}
