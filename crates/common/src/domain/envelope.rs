use crate::domain::result::{DomainError, DomainResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON field carrying the time the sensor observed the event
pub const ORIGINAL_EVENT_UTC_TIME_FIELD: &str = "OriginalEventUTCTime";

/// Physical orientation reported by the accelerometer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "String")]
pub enum OrientationState {
    Unknown,
    RightSideUp,
    UpsideDown,
}

impl OrientationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrientationState::Unknown => "Unknown",
            OrientationState::RightSideUp => "RightSideUp",
            OrientationState::UpsideDown => "UpsideDown",
        }
    }

    fn from_ordinal(ordinal: u64) -> Option<Self> {
        match ordinal {
            0 => Some(OrientationState::Unknown),
            1 => Some(OrientationState::RightSideUp),
            2 => Some(OrientationState::UpsideDown),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        [
            OrientationState::Unknown,
            OrientationState::RightSideUp,
            OrientationState::UpsideDown,
        ]
        .into_iter()
        .find(|state| state.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for OrientationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OrientationState> for String {
    fn from(state: OrientationState) -> Self {
        state.as_str().to_string()
    }
}

// Producers emit either the variant name or its ordinal
impl TryFrom<serde_json::Value> for OrientationState {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        let state = match &value {
            serde_json::Value::String(name) => OrientationState::from_name(name),
            serde_json::Value::Number(n) => n.as_u64().and_then(OrientationState::from_ordinal),
            _ => None,
        };
        state.ok_or_else(|| format!("invalid orientation state: {}", value))
    }
}

/// The kind of payload a channel or invocation expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    FruitSeen,
    Orientation,
}

impl PayloadKind {
    /// Name of the JSON field holding the payload value
    pub fn field_name(&self) -> &'static str {
        match self {
            PayloadKind::FruitSeen => "FruitSeen",
            PayloadKind::Orientation => "OrientationState",
        }
    }
}

/// Decoded event payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    FruitSeen(String),
    Orientation(OrientationState),
}

impl EventPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            EventPayload::FruitSeen(_) => PayloadKind::FruitSeen,
            EventPayload::Orientation(_) => PayloadKind::Orientation,
        }
    }
}

impl fmt::Display for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPayload::FruitSeen(fruit) => write!(f, "fruit {}", fruit),
            EventPayload::Orientation(state) => write!(f, "orientation {}", state),
        }
    }
}

/// A sensor event with the time it was originally observed, if the producer sent one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedEvent {
    pub payload: EventPayload,
    pub origin_event_utc: Option<DateTime<Utc>>,
}

impl TimestampedEvent {
    pub fn new(payload: EventPayload, origin_event_utc: Option<DateTime<Utc>>) -> Self {
        Self {
            payload,
            origin_event_utc,
        }
    }

    /// Origin time, or `received_at` when the producer did not stamp the event
    pub fn event_time_or(&self, received_at: DateTime<Utc>) -> DateTime<Utc> {
        self.origin_event_utc.unwrap_or(received_at)
    }
}

#[derive(Debug, Deserialize)]
struct FruitMessage {
    #[serde(rename = "FruitSeen")]
    fruit_seen: String,
    #[serde(rename = "OriginalEventUTCTime", default)]
    original_event_utc_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrientationMessage {
    #[serde(rename = "OrientationState")]
    orientation_state: OrientationState,
    #[serde(rename = "OriginalEventUTCTime", default)]
    original_event_utc_time: Option<String>,
}

/// Decode an inbound envelope for the given payload kind
///
/// The envelope is a JSON object holding the payload field and an optional
/// `OriginalEventUTCTime` ISO-8601 timestamp.
pub fn parse_envelope(kind: PayloadKind, bytes: &[u8]) -> DomainResult<TimestampedEvent> {
    let (payload, raw_time) = match kind {
        PayloadKind::FruitSeen => {
            let msg: FruitMessage = serde_json::from_slice(bytes).map_err(|e| {
                DomainError::DecodeError(format!("invalid fruit envelope: {}", e))
            })?;
            (EventPayload::FruitSeen(msg.fruit_seen), msg.original_event_utc_time)
        }
        PayloadKind::Orientation => {
            let msg: OrientationMessage = serde_json::from_slice(bytes).map_err(|e| {
                DomainError::DecodeError(format!("invalid orientation envelope: {}", e))
            })?;
            (
                EventPayload::Orientation(msg.orientation_state),
                msg.original_event_utc_time,
            )
        }
    };

    let origin_event_utc = raw_time
        .as_deref()
        .map(parse_origin_event_time)
        .transpose()?;

    Ok(TimestampedEvent {
        payload,
        origin_event_utc,
    })
}

/// Parse an ISO-8601 round-trip timestamp into UTC
///
/// Timestamps carrying an offset are converted to UTC; timestamps without one
/// are taken to already be UTC.
pub fn parse_origin_event_time(raw: &str) -> DomainResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| {
            DomainError::DecodeError(format!(
                "invalid {} '{}': {}",
                ORIGINAL_EVENT_UTC_TIME_FIELD, raw, e
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fruit_envelope_with_time() {
        let bytes = br#"{"FruitSeen":"apple","OriginalEventUTCTime":"2024-01-01T00:00:00Z"}"#;

        let event = parse_envelope(PayloadKind::FruitSeen, bytes).unwrap();

        assert_eq!(event.payload, EventPayload::FruitSeen("apple".to_string()));
        assert_eq!(
            event.origin_event_utc,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_fruit_envelope_without_time() {
        let event = parse_envelope(PayloadKind::FruitSeen, br#"{"FruitSeen":"pear"}"#).unwrap();

        assert_eq!(event.payload, EventPayload::FruitSeen("pear".to_string()));
        assert!(event.origin_event_utc.is_none());
    }

    #[test]
    fn test_parse_envelope_null_time_defaults_to_none() {
        let bytes = br#"{"FruitSeen":"kiwi","OriginalEventUTCTime":null}"#;

        let event = parse_envelope(PayloadKind::FruitSeen, bytes).unwrap();

        assert!(event.origin_event_utc.is_none());
    }

    #[test]
    fn test_parse_orientation_by_name_and_ordinal() {
        let by_name =
            parse_envelope(PayloadKind::Orientation, br#"{"OrientationState":"upsidedown"}"#)
                .unwrap();
        let by_ordinal =
            parse_envelope(PayloadKind::Orientation, br#"{"OrientationState":1}"#).unwrap();

        assert_eq!(
            by_name.payload,
            EventPayload::Orientation(OrientationState::UpsideDown)
        );
        assert_eq!(
            by_ordinal.payload,
            EventPayload::Orientation(OrientationState::RightSideUp)
        );
    }

    #[test]
    fn test_parse_orientation_out_of_range() {
        let result = parse_envelope(PayloadKind::Orientation, br#"{"OrientationState":7}"#);
        assert!(matches!(result, Err(DomainError::DecodeError(_))));
    }

    #[test]
    fn test_parse_envelope_invalid_json() {
        let result = parse_envelope(PayloadKind::FruitSeen, b"{not json");
        assert!(matches!(result, Err(DomainError::DecodeError(_))));
    }

    #[test]
    fn test_parse_envelope_missing_payload_field() {
        let result = parse_envelope(
            PayloadKind::FruitSeen,
            br#"{"OriginalEventUTCTime":"2024-01-01T00:00:00Z"}"#,
        );
        assert!(matches!(result, Err(DomainError::DecodeError(_))));
    }

    #[test]
    fn test_parse_envelope_wrong_kind() {
        let result = parse_envelope(PayloadKind::Orientation, br#"{"FruitSeen":"apple"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_origin_time_with_offset_converts_to_utc() {
        let parsed = parse_origin_event_time("2024-06-01T12:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_origin_time_round_trip_precision() {
        let parsed = parse_origin_event_time("2024-06-01T12:00:00.1234567Z").unwrap();
        assert_eq!(parsed.timestamp_subsec_nanos(), 123_456_700);
    }

    #[test]
    fn test_parse_origin_time_without_offset_is_utc() {
        let parsed = parse_origin_event_time("2024-06-01T12:00:00.5").unwrap();
        assert_eq!(parsed.timestamp(), 1_717_243_200);
        assert_eq!(parsed.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_parse_origin_time_garbage() {
        let result = parse_origin_event_time("yesterday");
        assert!(matches!(result, Err(DomainError::DecodeError(_))));
    }

    #[test]
    fn test_event_time_or_uses_receipt_time_when_absent() {
        let received_at = Utc.with_ymd_and_hms(2025, 3, 3, 3, 3, 3).unwrap();
        let event = TimestampedEvent::new(EventPayload::FruitSeen("fig".to_string()), None);

        assert_eq!(event.event_time_or(received_at), received_at);
    }
}
