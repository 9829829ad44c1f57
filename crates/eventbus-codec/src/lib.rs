#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **eventbus-codec** – Bidirectional translation between a native
//! [`Event`] and the CloudEvents 1.0 JSON envelope.
//!
//! Detection of "is this a CloudEvents record" never double-parses: callers
//! hand in either raw bytes or an already-parsed [`serde_json::Value`], and
//! the probe is a single `specversion` key lookup on the parsed object.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use eventbus_types::Event;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

/// Attributes consumed into first-class `Event` fields rather than copied
/// into metadata verbatim.
const CONSUMED_ATTRS: &[&str] = &["type", "data", "data_base64", "time"];

/// Errors raised while decoding or encoding a CloudEvents envelope.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Required `specversion` attribute missing or empty.
    #[error("missing required CloudEvents attribute: specversion")]
    MissingSpecVersion,
    /// Required `type` attribute missing or empty.
    #[error("missing required CloudEvents attribute: type")]
    MissingType,
    /// Required `source` attribute missing or empty.
    #[error("missing required CloudEvents attribute: source")]
    MissingSource,
    /// Required `id` attribute missing or empty.
    #[error("missing required CloudEvents attribute: id")]
    MissingID,
    /// The record could not be parsed as JSON at all.
    #[error("invalid JSON: {0}")]
    InvalidData(#[source] serde_json::Error),
    /// `data_base64` was present but not valid base64.
    #[error("invalid base64 in data_base64: {0}")]
    InvalidBase64(#[source] base64::DecodeError),
    /// The event payload could not be serialized for the wire.
    #[error("payload is not marshalable: {0}")]
    Unmarshalable(#[source] serde_json::Error),
}

/// Returns `true` iff `value` is a JSON object carrying a `specversion` key.
/// This is the single probe used both to detect an inbound CloudEvents
/// record and to decide, at encode time, whether `Event.payload` is itself
/// already a CloudEvents object (the flat-envelope case).
pub fn is_cloud_events(value: &Value) -> bool {
    value.as_object().map(|o| o.contains_key("specversion")).unwrap_or(false)
}

/// Decode raw bytes into an [`Event`], detecting CloudEvents vs. the legacy
/// wrapper format produced by [`encode_event`].
#[tracing::instrument(level = "debug", skip_all)]
pub fn decode_bytes(raw: &[u8]) -> Result<Event, CodecError> {
    let value: Value = serde_json::from_slice(raw).map_err(CodecError::InvalidData)?;
    decode_value(value)
}

/// Decode an already-parsed JSON value into an [`Event`]. Used by callers
/// that receive a pre-parsed record (e.g. from a broker client that hands
/// back structured records rather than raw bytes).
#[tracing::instrument(level = "debug", skip_all)]
pub fn decode_value(value: Value) -> Result<Event, CodecError> {
    if is_cloud_events(&value) {
        decode_cloud_event(value)
    } else {
        decode_legacy(value)
    }
}

fn decode_cloud_event(value: Value) -> Result<Event, CodecError> {
    let obj = value.as_object().expect("is_cloud_events guarantees an object");

    let specversion = req_nonempty_str(obj, "specversion").ok_or(CodecError::MissingSpecVersion)?;
    let ce_type = req_nonempty_str(obj, "type").ok_or(CodecError::MissingType)?;
    let _source = req_nonempty_str(obj, "source").ok_or(CodecError::MissingSource)?;
    let _id = req_nonempty_str(obj, "id").ok_or(CodecError::MissingID)?;

    let payload = decode_payload(obj)?;
    let created_at = decode_time(obj);

    let mut metadata = HashMap::new();
    metadata.insert("ce_specversion".to_string(), specversion);
    for (key, raw) in obj.iter() {
        if CONSUMED_ATTRS.contains(&key.as_str()) || key == "specversion" {
            continue;
        }
        metadata.insert(format!("ce_{key}"), value_to_metadata_string(raw));
    }

    Ok(Event::from_parts(Uuid::new_v4(), ce_type, payload, metadata, created_at))
}

fn decode_payload(obj: &serde_json::Map<String, Value>) -> Result<Value, CodecError> {
    if let Some(data) = obj.get("data") {
        if !data.is_null() {
            return Ok(data.clone());
        }
    }
    if let Some(Value::String(encoded)) = obj.get("data_base64") {
        use base64::Engine as _;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(CodecError::InvalidBase64)?;
        let content_type = obj.get("datacontenttype").and_then(Value::as_str);
        if content_type == Some("application/json") {
            return serde_json::from_slice(&bytes).map_err(CodecError::InvalidData);
        }
        use base64::Engine as _;
        return Ok(Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)));
    }
    Ok(Value::Null)
}

fn decode_time(obj: &serde_json::Map<String, Value>) -> DateTime<Utc> {
    match obj.get("time").and_then(Value::as_str) {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(err) => {
                tracing::warn!(raw_time = raw, error = %err, "unparseable CloudEvents time, substituting wall-clock");
                Utc::now()
            }
        },
        None => Utc::now(),
    }
}

fn req_nonempty_str(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)?.as_str()? {
        "" => None,
        s => Some(s.to_string()),
    }
}

fn value_to_metadata_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct LegacyEnvelope {
    topic: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(rename = "createdAt")]
    created_at: Option<DateTime<Utc>>,
}

fn decode_legacy(value: Value) -> Result<Event, CodecError> {
    let wire: LegacyEnvelope = serde_json::from_value(value).map_err(CodecError::InvalidData)?;
    Ok(Event::from_parts(
        Uuid::new_v4(),
        wire.topic,
        wire.payload,
        wire.metadata,
        wire.created_at.unwrap_or_else(Utc::now),
    ))
}

/// Encode an [`Event`] for the wire.
///
/// If `event.payload` is itself a CloudEvents object (per [`is_cloud_events`])
/// it is emitted verbatim — this is the flat-envelope case, letting a
/// publisher hand in a fully-formed CloudEvents record as payload and have
/// it pass through unchanged. Otherwise a legacy wrapper
/// `{topic, payload, metadata, createdAt}` is emitted.
#[tracing::instrument(level = "debug", skip_all)]
pub fn encode_event(event: &Event) -> Result<Vec<u8>, CodecError> {
    if is_cloud_events(&event.payload) {
        return serde_json::to_vec(&event.payload).map_err(CodecError::Unmarshalable);
    }
    let wire = serde_json::json!({
        "topic": event.topic,
        "payload": event.payload,
        "metadata": event.metadata,
        "createdAt": event.created_at,
    });
    serde_json::to_vec(&wire).map_err(CodecError::Unmarshalable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cloud_events_by_specversion_key() {
        let ce = serde_json::json!({"specversion": "1.0", "type": "t", "source": "s", "id": "1"});
        assert!(is_cloud_events(&ce));
        assert!(!is_cloud_events(&serde_json::json!({"topic": "t"})));
        assert!(!is_cloud_events(&serde_json::json!("not an object")));
    }

    #[test]
    fn decode_requires_all_mandatory_attributes() {
        let missing_source = serde_json::json!({"specversion": "1.0", "type": "t", "id": "1"});
        let err = decode_value(missing_source).unwrap_err();
        assert!(matches!(err, CodecError::MissingSource));

        let empty_id = serde_json::json!({"specversion": "1.0", "type": "t", "source": "s", "id": ""});
        let err = decode_value(empty_id).unwrap_err();
        assert!(matches!(err, CodecError::MissingID));
    }

    #[test]
    fn decode_cloud_event_round_trips_metadata_and_topic() {
        let raw = serde_json::json!({
            "specversion": "1.0",
            "type": "order.placed",
            "source": "s",
            "id": "1",
            "data": {"k": "v"},
        });
        let event = decode_value(raw).unwrap();
        assert_eq!(event.topic, "order.placed");
        assert_eq!(event.payload["k"], "v");
        assert_eq!(event.metadata.get("ce_specversion").unwrap(), "1.0");
        assert_eq!(event.metadata.get("ce_source").unwrap(), "s");
        assert_eq!(event.metadata.get("ce_id").unwrap(), "1");
    }

    #[test]
    fn decode_data_base64_json_content_is_reparsed() {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(br#"{"k":"v"}"#);
        let raw = serde_json::json!({
            "specversion": "1.0",
            "type": "t",
            "source": "s",
            "id": "1",
            "datacontenttype": "application/json",
            "data_base64": encoded,
        });
        let event = decode_value(raw).unwrap();
        assert_eq!(event.payload["k"], "v");
    }

    #[test]
    fn unparseable_time_falls_back_to_wall_clock() {
        let raw = serde_json::json!({
            "specversion": "1.0", "type": "t", "source": "s", "id": "1",
            "time": "not-a-timestamp",
        });
        let before = Utc::now();
        let event = decode_value(raw).unwrap();
        assert!(event.created_at >= before);
    }

    #[test]
    fn encode_flat_when_payload_is_already_cloud_events() {
        let ce_payload = serde_json::json!({"specversion": "1.0", "type": "t", "source": "s", "id": "1"});
        let event = Event::new("ignored-topic", ce_payload.clone());
        let bytes = encode_event(&event).unwrap();
        let decoded: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, ce_payload);
    }

    #[test]
    fn encode_wraps_non_cloud_events_payload_in_legacy_envelope() {
        let event = Event::new("orders.created", serde_json::json!({"k": "v"}));
        let bytes = encode_event(&event).unwrap();
        let decoded: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded["topic"], "orders.created");
        assert_eq!(decoded["payload"]["k"], "v");
    }

    #[test]
    fn encode_takes_legacy_path_for_non_object_payload() {
        let event = Event::new("t", serde_json::json!("just a string"));
        let bytes = encode_event(&event).unwrap();
        let decoded: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded["payload"], "just a string");
    }

    #[test]
    fn legacy_round_trip_preserves_metadata() {
        let event = Event::new("orders.created", serde_json::json!({"k": "v"}))
            .with_metadata("ce_source", "svc");
        let bytes = encode_event(&event).unwrap();
        let back = decode_bytes(&bytes).unwrap();
        assert_eq!(back.topic, "orders.created");
        assert_eq!(back.metadata.get("ce_source").unwrap(), "svc");
    }
}
