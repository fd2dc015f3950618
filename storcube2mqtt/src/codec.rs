use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::error::DecodeError;
use crate::metrics::{MetricKey, MetricValue, TelemetryReport};

/// One inbound websocket frame after decoding.
#[derive(Debug, PartialEq)]
pub enum Frame {
    /// Control chatter ("SUCCESS" confirmations, blank keepalives).
    Ack,
    Report(TelemetryReport),
}

/// A control request received over MQTT, to be forwarded to the vendor API.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    /// Output power in watts.
    SetPower(u32),
    /// Discharge threshold in percent.
    SetThreshold(u8),
}

/// Decodes a raw websocket frame.
///
/// The vendor wraps device snapshots two ways: a single-key envelope keyed
/// by an opaque id, and a `list` array of per-battery objects. Both unwrap
/// to one flat equip object which must carry `equipId`. Unknown fields are
/// ignored; absent fields stay absent.
pub fn decode(frame: &[u8]) -> Result<Frame, DecodeError> {
    let text = std::str::from_utf8(frame).map_err(|e| DecodeError::Json(e.to_string()))?;
    if text.trim().is_empty() {
        return Ok(Frame::Ack);
    }

    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
    match value {
        Value::String(s) if s == "SUCCESS" => Ok(Frame::Ack),
        Value::String(other) => Err(DecodeError::UnexpectedShape(format!(
            "string frame {other:?}"
        ))),
        Value::Object(map) => decode_report(map).map(Frame::Report),
        other => Err(DecodeError::UnexpectedShape(format!(
            "top-level {}",
            json_kind(&other)
        ))),
    }
}

fn decode_report(map: Map<String, Value>) -> Result<TelemetryReport, DecodeError> {
    let equip = unwrap_envelope(map)?;

    let equip_id = match equip.get(MetricKey::EquipId.field()) {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(DecodeError::MissingEquipId),
    };

    let mut metrics = BTreeMap::new();
    for key in MetricKey::ALL {
        if let Some(raw) = equip.get(key.field()) {
            if let Some(value) = MetricValue::from_json(raw) {
                metrics.insert(key, value);
            }
        }
    }

    Ok(TelemetryReport { equip_id, metrics })
}

fn unwrap_envelope(mut map: Map<String, Value>) -> Result<Map<String, Value>, DecodeError> {
    // single-key envelope: {"<opaque id>": { ...equip object... }}
    if map.len() == 1 && !map.contains_key("equipId") && !map.contains_key("list") {
        match map.into_iter().next() {
            Some((_, Value::Object(inner))) => map = inner,
            Some((key, _)) => {
                return Err(DecodeError::UnexpectedShape(format!(
                    "envelope value under {key:?} is not an object"
                )))
            }
            None => return Err(DecodeError::MissingEquipId),
        }
    }

    // report form: {"equipId": ..., "list": [{ ...battery... }, ...]}
    match map.remove("list") {
        Some(Value::Array(items)) => match items.into_iter().next() {
            Some(Value::Object(first)) => Ok(first),
            Some(_) => Err(DecodeError::UnexpectedShape(
                "list entry is not an object".into(),
            )),
            None => Err(DecodeError::EmptyReport),
        },
        Some(_) => Err(DecodeError::UnexpectedShape("list is not an array".into())),
        None => Ok(map),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The upstream keepalive. The same payload announces which device we want
/// reports for right after connecting.
pub fn encode_heartbeat(device_id: &str) -> Vec<u8> {
    json!({ "reportEquip": [device_id] }).to_string().into_bytes()
}

/// Flat JSON object of vendor field → value pairs, one per device snapshot.
pub fn encode_publish_payload(report: &TelemetryReport) -> Vec<u8> {
    let mut payload = Map::new();
    payload.insert(
        MetricKey::EquipId.field().to_string(),
        Value::String(report.equip_id.clone()),
    );
    for (key, value) in &report.metrics {
        if let Ok(value) = serde_json::to_value(value) {
            payload.insert(key.field().to_string(), value);
        }
    }
    Value::Object(payload).to_string().into_bytes()
}

/// Parses an MQTT command payload: `{"power": N}` sets output power,
/// `{"threshold": N}` (or the vendor's own `"reserved"` spelling) sets the
/// discharge threshold. Values may arrive as numbers or digit strings.
pub fn parse_command(payload: &[u8]) -> Result<Command, DecodeError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Json(e.to_string()))?;
    let map = value.as_object().ok_or(DecodeError::UnknownCommand)?;

    if let Some(raw) = map.get("power") {
        let watts = lenient_u64(raw)
            .and_then(|w| u32::try_from(w).ok())
            .ok_or(DecodeError::UnknownCommand)?;
        return Ok(Command::SetPower(watts));
    }
    if let Some(raw) = map.get("threshold").or_else(|| map.get("reserved")) {
        let percent = lenient_u64(raw)
            .filter(|p| *p <= 100)
            .ok_or(DecodeError::UnknownCommand)?;
        return Ok(Command::SetThreshold(percent as u8));
    }
    Err(DecodeError::UnknownCommand)
}

fn lenient_u64(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(frame: &str) -> TelemetryReport {
        match decode(frame.as_bytes()).expect("frame should decode") {
            Frame::Report(report) => report,
            Frame::Ack => panic!("expected a report, got an ack"),
        }
    }

    #[test]
    fn flat_frame_decodes_exactly_the_present_keys() {
        let report = report(r#"{"equipId":"E1","soc":87,"pv1power":120}"#);
        assert_eq!(report.equip_id, "E1");
        assert_eq!(report.metrics.len(), 3);
        assert_eq!(
            report.get(MetricKey::StateOfCharge),
            Some(&MetricValue::Number(87.0))
        );
        assert_eq!(
            report.get(MetricKey::Pv1Power),
            Some(&MetricValue::Number(120.0))
        );
        assert_eq!(
            report.get(MetricKey::EquipId),
            Some(&MetricValue::Text("E1".into()))
        );
        // absent fields are absent, never synthesized
        assert_eq!(report.get(MetricKey::BatteryPower), None);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let report = report(r#"{"equipId":"E1","soc":50,"frobnicate":1,"plugPower":30}"#);
        assert_eq!(report.metrics.len(), 2);
    }

    #[test]
    fn envelope_frame_is_unwrapped() {
        let report = report(r#"{"30caf7...opaque":{"equipId":"E1","solarPower":310.5}}"#);
        assert_eq!(report.equip_id, "E1");
        assert_eq!(
            report.get(MetricKey::SolarPower),
            Some(&MetricValue::Number(310.5))
        );
    }

    #[test]
    fn list_frame_takes_the_first_battery() {
        let report = report(
            r#"{"equipId":"STACK","list":[{"equipId":"E1","soc":42,"fgOnline":1},{"equipId":"E2"}]}"#,
        );
        assert_eq!(report.equip_id, "E1");
        assert_eq!(
            report.get(MetricKey::Status),
            Some(&MetricValue::Number(1.0))
        );
    }

    #[test]
    fn envelope_around_list_is_unwrapped_too() {
        let report = report(r#"{"xyz":{"list":[{"equipId":"E9","temp":21.5}]}}"#);
        assert_eq!(report.equip_id, "E9");
        assert_eq!(
            report.get(MetricKey::Temperature),
            Some(&MetricValue::Number(21.5))
        );
    }

    #[test]
    fn mixed_value_types_are_kept() {
        let report = report(r#"{"equipId":"E1","version":"1.3.7","workStatus":true,"soc":9}"#);
        assert_eq!(
            report.get(MetricKey::Firmware),
            Some(&MetricValue::Text("1.3.7".into()))
        );
        assert_eq!(
            report.get(MetricKey::Working),
            Some(&MetricValue::Bool(true))
        );
    }

    #[test]
    fn success_and_blank_frames_are_acks() {
        assert_eq!(decode(br#""SUCCESS""#).unwrap(), Frame::Ack);
        assert_eq!(decode(b"   ").unwrap(), Frame::Ack);
        assert_eq!(decode(b"").unwrap(), Frame::Ack);
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert!(matches!(
            decode(b"{not json"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn missing_equip_id_is_a_decode_error() {
        assert!(matches!(
            decode(br#"{"soc":87}"#),
            Err(DecodeError::MissingEquipId)
        ));
    }

    #[test]
    fn empty_list_is_a_decode_error() {
        assert!(matches!(
            decode(br#"{"equipId":"E1","list":[]}"#),
            Err(DecodeError::EmptyReport)
        ));
    }

    #[test]
    fn heartbeat_is_the_report_request() {
        assert_eq!(
            encode_heartbeat("ABC123"),
            br#"{"reportEquip":["ABC123"]}"#.to_vec()
        );
    }

    #[test]
    fn publish_payload_is_flat_vendor_fields() {
        let report = report(r#"{"equipId":"E1","soc":87,"version":"1.0"}"#);
        let payload: serde_json::Value =
            serde_json::from_slice(&encode_publish_payload(&report)).unwrap();
        assert_eq!(payload["equipId"], "E1");
        assert_eq!(payload["soc"], 87.0);
        assert_eq!(payload["version"], "1.0");
        assert_eq!(payload.as_object().unwrap().len(), 3);
    }

    #[test]
    fn commands_parse_all_observed_spellings() {
        assert_eq!(
            parse_command(br#"{"power": 800}"#).unwrap(),
            Command::SetPower(800)
        );
        assert_eq!(
            parse_command(br#"{"power": "650"}"#).unwrap(),
            Command::SetPower(650)
        );
        assert_eq!(
            parse_command(br#"{"threshold": 20}"#).unwrap(),
            Command::SetThreshold(20)
        );
        assert_eq!(
            parse_command(br#"{"reserved": "15"}"#).unwrap(),
            Command::SetThreshold(15)
        );
    }

    #[test]
    fn bad_commands_are_rejected() {
        assert!(parse_command(b"").is_err());
        assert!(parse_command(br#"{"volume": 11}"#).is_err());
        assert!(parse_command(br#"{"threshold": 250}"#).is_err());
        assert!(parse_command(br#"{"power": -5}"#).is_err());
        // beyond u32, must be rejected rather than wrapped
        assert!(parse_command(br#"{"power": 4294967296}"#).is_err());
    }
}
