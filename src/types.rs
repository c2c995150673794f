//! Core audit types: wire envelope, persisted record, delivery metadata
//!
//! All types use camelCase JSON serialization for wire compatibility with
//! the producing services.

use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};

/// Fractional-second digits kept on stored timestamps (PostgreSQL `TIMESTAMP`)
pub const TIMESTAMP_SUBSEC_DIGITS: u16 = 6;

/// Truncate a timestamp to the precision every store keeps
pub fn storage_precision(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp.trunc_subsecs(TIMESTAMP_SUBSEC_DIGITS)
}

/// Audit event message as published by producers
///
/// `details` carries JSON *text*; it is validated before storage, never
/// parsed into a structure here. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEventMessage {
    /// Producer-assigned unique identifier, reused as the storage key
    pub event_id: String,

    /// When the audited action happened (producer's local clock)
    #[serde(with = "local_datetime")]
    pub timestamp: NaiveDateTime,

    /// Category label (e.g., "USER_CREATED", "LOGIN_SUCCESS")
    pub event_type: String,

    /// Subject of the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Actor that performed the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<String>,

    /// Originating network address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// Free-form JSON document, as text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A persisted audit record (table `audit_events`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Primary key
    pub event_id: String,

    #[serde(with = "local_datetime")]
    pub timestamp: NaiveDateTime,

    pub event_type: String,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub performed_by: Option<String>,

    #[serde(default)]
    pub ip_address: Option<String>,

    /// Validated JSON text (JSONB column)
    #[serde(default)]
    pub details: Option<String>,
}

impl From<AuditEventMessage> for AuditEvent {
    fn from(msg: AuditEventMessage) -> Self {
        Self {
            event_id: msg.event_id,
            timestamp: storage_precision(msg.timestamp),
            event_type: msg.event_type,
            user_id: msg.user_id,
            performed_by: msg.performed_by,
            ip_address: msg.ip_address,
            details: msg.details,
        }
    }
}

impl AuditEvent {
    /// Whether `other` carries the same content as `self`.
    ///
    /// `details` is compared as parsed JSON, since JSONB storage does not
    /// preserve whitespace, key order or number spelling. Blank details
    /// count as absent. Timestamps compare at storage precision.
    pub fn is_identical(&self, other: &AuditEvent) -> bool {
        self.event_id == other.event_id
            && storage_precision(self.timestamp) == storage_precision(other.timestamp)
            && self.event_type == other.event_type
            && self.user_id == other.user_id
            && self.performed_by == other.performed_by
            && self.ip_address == other.ip_address
            && same_details(self.details.as_deref(), other.details.as_deref())
    }
}

fn same_details(a: Option<&str>, b: Option<&str>) -> bool {
    let a = a.filter(|s| !s.trim().is_empty());
    let b = b.filter(|s| !s.trim().is_empty());
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) if a == b => true,
        (Some(a), Some(b)) => {
            match (
                serde_json::from_str::<serde_json::Value>(a),
                serde_json::from_str::<serde_json::Value>(b),
            ) {
                (Ok(a), Ok(b)) => same_json(&a, &b),
                _ => false,
            }
        }
        _ => false,
    }
}

/// JSON equality where `100`, `100.0` and `1e2` are the same number
fn same_json(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value;

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x == y
                || match (x.as_i64(), y.as_i64()) {
                    (Some(x), Some(y)) => x == y,
                    _ => x.as_f64() == y.as_f64(),
                }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| same_json(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| same_json(v, w)))
        }
        _ => a == b,
    }
}

/// Delivery context attached to a message by the queue transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryInfo {
    /// Provider-assigned sequence number
    pub sequence: u64,

    /// Number of delivery attempts, including this one
    pub num_delivered: u64,

    /// Queue (stream) the message was read from
    pub queue: String,
}

/// Options for the durable queue consumer
///
/// Exposes provider-native consumer capabilities. Unsupported options
/// are ignored by providers that don't support them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerOptions {
    /// Maximum delivery attempts before the transport gives up (NATS: `MaxDeliver`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_deliver: Option<i64>,

    /// Backoff intervals in seconds between redelivery attempts
    ///
    /// Example: `vec![1, 5, 30]`: retry after 1s, 5s, 30s.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backoff_secs: Vec<u64>,

    /// Maximum number of unacknowledged messages in flight (NATS: `MaxAckPending`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ack_pending: Option<i64>,

    /// How long to wait for an ack before redelivery (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_wait_secs: Option<u64>,
}

/// ISO-8601 extended local date-time, no offset
///
/// Accepts exactly `YYYY-MM-DDTHH:MM`, `YYYY-MM-DDTHH:MM:SS` or
/// `YYYY-MM-DDTHH:MM:SS.f` with 1 to 9 fraction digits. Every field is
/// zero-padded and leap seconds are refused. Serializes as
/// `YYYY-MM-DDTHH:MM:SS[.fff]`.
pub mod local_datetime {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT_SECONDS: &str = "%Y-%m-%dT%H:%M:%S%.f";
    const FORMAT_MINUTES: &str = "%Y-%m-%dT%H:%M";

    /// Local date-time that is not ISO-8601 extended
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("{0}")]
    pub struct InvalidDateTime(String);

    /// Parse a local date-time string
    pub fn parse(s: &str) -> Result<NaiveDateTime, InvalidDateTime> {
        check_shape(s)?;
        let format = if s.len() == 16 { FORMAT_MINUTES } else { FORMAT_SECONDS };
        NaiveDateTime::parse_from_str(s, format).map_err(|e| InvalidDateTime(e.to_string()))
    }

    // chrono alone accepts unpadded fields, second 60 and over-long fractions
    fn check_shape(s: &str) -> Result<(), InvalidDateTime> {
        let b = s.as_bytes();
        let digits = |at: std::ops::Range<usize>| {
            b.get(at)
                .is_some_and(|d| !d.is_empty() && d.iter().all(u8::is_ascii_digit))
        };
        let sep = |at: usize, c: u8| b.get(at) == Some(&c);

        let minutes = digits(0..4)
            && sep(4, b'-')
            && digits(5..7)
            && sep(7, b'-')
            && digits(8..10)
            && sep(10, b'T')
            && digits(11..13)
            && sep(13, b':')
            && digits(14..16);
        let tail = match b.len() {
            16 => true,
            19 => sep(16, b':') && digits(17..19),
            n @ 21..=29 => sep(16, b':') && digits(17..19) && sep(19, b'.') && digits(20..n),
            _ => false,
        };
        if !(minutes && tail) {
            return Err(InvalidDateTime(
                "expected YYYY-MM-DDTHH:MM[:SS[.fffffffff]]".to_string(),
            ));
        }
        if b.len() > 16 && &s[17..19] > "59" {
            return Err(InvalidDateTime("second out of range".to_string()));
        }
        Ok(())
    }

    /// Format a local date-time for the wire
    pub fn format(dt: &NaiveDateTime) -> String {
        dt.format(FORMAT_SECONDS).to_string()
    }

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(|e| {
            serde::de::Error::custom(format!("invalid local date-time '{}': {}", s, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_message() -> AuditEventMessage {
        AuditEventMessage {
            event_id: "e1".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2026, 1, 17)
                .unwrap()
                .and_hms_opt(23, 3, 0)
                .unwrap(),
            event_type: "USER_CREATED".to_string(),
            user_id: Some("u1".to_string()),
            performed_by: Some("admin".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
            details: Some(r#"{"k":"v"}"#.to_string()),
        }
    }

    #[test]
    fn test_mapping_copies_every_field() {
        let msg = sample_message();
        let record = AuditEvent::from(msg.clone());

        assert_eq!(record.event_id, msg.event_id);
        assert_eq!(record.timestamp, msg.timestamp);
        assert_eq!(record.event_type, msg.event_type);
        assert_eq!(record.user_id, msg.user_id);
        assert_eq!(record.performed_by, msg.performed_by);
        assert_eq!(record.ip_address, msg.ip_address);
        assert_eq!(record.details, msg.details);
    }

    #[test]
    fn test_mapping_keeps_absent_fields_absent() {
        let msg = AuditEventMessage {
            user_id: None,
            performed_by: None,
            ip_address: None,
            details: None,
            ..sample_message()
        };
        let record = AuditEvent::from(msg);
        assert!(record.user_id.is_none());
        assert!(record.performed_by.is_none());
        assert!(record.ip_address.is_none());
        assert!(record.details.is_none());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = AuditEvent::from(sample_message());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"eventId\":\"e1\""));
        assert!(json.contains("\"timestamp\":\"2026-01-17T23:03:00\""));
        assert!(json.contains("\"performedBy\":\"admin\""));
        assert!(json.contains("\"ipAddress\":\"10.0.0.1\""));
    }

    #[test]
    fn test_identical_ignores_details_formatting() {
        let a = AuditEvent::from(sample_message());
        let mut b = a.clone();
        b.details = Some(r#"{ "k" : "v" }"#.to_string());
        assert!(a.is_identical(&b));

        b.details = Some(r#"{"k":"other"}"#.to_string());
        assert!(!a.is_identical(&b));
    }

    #[test]
    fn test_identical_treats_blank_details_as_absent() {
        let mut a = AuditEvent::from(sample_message());
        let mut b = a.clone();
        a.details = None;
        b.details = Some("  ".to_string());
        assert!(a.is_identical(&b));
    }

    #[test]
    fn test_identical_detects_field_changes() {
        let a = AuditEvent::from(sample_message());
        let mut b = a.clone();
        b.performed_by = Some("someone-else".to_string());
        assert!(!a.is_identical(&b));
    }

    #[test]
    fn test_local_datetime_accepts_minutes_and_fractions() {
        let dt = local_datetime::parse("2026-01-17T23:03").unwrap();
        assert_eq!(local_datetime::format(&dt), "2026-01-17T23:03:00");

        let dt = local_datetime::parse("2026-01-17T23:03:00.250").unwrap();
        assert_eq!(local_datetime::format(&dt), "2026-01-17T23:03:00.250");
    }

    #[test]
    fn test_local_datetime_rejects_offsets() {
        assert!(local_datetime::parse("2026-01-17T23:03:00Z").is_err());
        assert!(local_datetime::parse("2026-01-17T23:03:00+02:00").is_err());
        assert!(local_datetime::parse("2026-01-17").is_err());
    }

    #[test]
    fn test_local_datetime_rejects_non_iso_shapes() {
        assert!(local_datetime::parse("2026-1-7T1:2:3").is_err());
        assert!(local_datetime::parse("2026-01-17T23:03:0").is_err());
        assert!(local_datetime::parse("2026-01-17 23:03:00").is_err());
        assert!(local_datetime::parse("2026-01-17T23:03:00.").is_err());
        assert!(local_datetime::parse("2026-01-17T23:59:60").is_err());
        assert!(local_datetime::parse("2026-01-17T23:59:60.5").is_err());
        assert!(local_datetime::parse("2026-01-17T23:03:00.1234567891234").is_err());
        assert!(local_datetime::parse("2026-02-30T10:00").is_err());

        let dt = local_datetime::parse("2026-01-17T23:03:00.123456789").unwrap();
        assert_eq!(chrono::Timelike::nanosecond(&dt), 123_456_789);
    }

    #[test]
    fn test_mapping_truncates_to_microseconds() {
        let msg = AuditEventMessage {
            timestamp: local_datetime::parse("2026-01-17T23:03:00.123456789").unwrap(),
            ..sample_message()
        };
        let record = AuditEvent::from(msg);
        assert_eq!(local_datetime::format(&record.timestamp), "2026-01-17T23:03:00.123456");
    }

    #[test]
    fn test_identical_ignores_number_spelling() {
        let mut a = AuditEvent::from(sample_message());
        let mut b = a.clone();
        a.details = Some(r#"{"n":1e2,"list":[1.0,2]}"#.to_string());
        b.details = Some(r#"{"list":[1,2],"n":100}"#.to_string());
        assert!(a.is_identical(&b));

        b.details = Some(r#"{"list":[1,2],"n":101}"#.to_string());
        assert!(!a.is_identical(&b));
    }

    #[test]
    fn test_consumer_options_default() {
        let opts = ConsumerOptions::default();
        assert!(opts.max_deliver.is_none());
        assert!(opts.backoff_secs.is_empty());
        assert!(opts.max_ack_pending.is_none());
        assert!(opts.ack_wait_secs.is_none());
    }

    #[test]
    fn test_consumer_options_skip_empty_fields() {
        let json = serde_json::to_string(&ConsumerOptions::default()).unwrap();
        assert_eq!(json, "{}");

        let opts = ConsumerOptions {
            max_deliver: Some(5),
            backoff_secs: vec![1, 5, 30],
            max_ack_pending: Some(1000),
            ack_wait_secs: Some(30),
        };
        let json = serde_json::to_string(&opts).unwrap();
        assert!(json.contains("\"maxDeliver\":5"));
        assert!(json.contains("\"backoffSecs\":[1,5,30]"));
        assert!(json.contains("\"ackWaitSecs\":30"));
    }
}
