//! Message serialization envelope.
//!
//! Every stored record travels as `{"version": "1.0", "timestamp": ISO-8601,
//! "data": <original>}`. Deserialization rejects envelopes missing `data`.

use crate::types::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENVELOPE_VERSION: &str = "1.0";

/// One conversation message in the buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now().timestamp(),
            kind: None,
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// One rolling summary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub text: String,
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Serialize)]
struct EnvelopeOut<'a, T: Serialize> {
    version: &'static str,
    timestamp: DateTime<Utc>,
    data: &'a T,
}

#[derive(Debug, Deserialize)]
struct EnvelopeIn {
    #[allow(dead_code)]
    version: Option<String>,
    data: Option<Value>,
}

/// Serialization component shared by the buffer and summary stores.
#[derive(Debug, Clone, Default)]
pub struct MessageSerializer;

impl MessageSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Wrap a record in the versioned envelope.
    pub fn serialize<T: Serialize>(&self, data: &T) -> Result<String> {
        Ok(serde_json::to_string(&EnvelopeOut {
            version: ENVELOPE_VERSION,
            timestamp: Utc::now(),
            data,
        })?)
    }

    /// Unwrap the envelope and parse the payload. An envelope without a
    /// `data` field is invalid.
    pub fn deserialize<T: DeserializeOwned>(&self, raw: &str) -> Result<T> {
        let envelope: EnvelopeIn = serde_json::from_str(raw)?;
        let data = envelope
            .data
            .ok_or_else(|| Error::validation("invalid message format: missing data field"))?;
        Ok(serde_json::from_value(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_message() {
        let serializer = MessageSerializer::new();
        let message = Message::user("I want to buy a GPU");
        let raw = serializer.serialize(&message).unwrap();

        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["version"], ENVELOPE_VERSION);
        assert!(parsed["timestamp"].is_string());

        let back: Message = serializer.deserialize(&raw).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_missing_data_rejected() {
        let serializer = MessageSerializer::new();
        let raw = json!({"version": "1.0", "timestamp": "2025-01-01T00:00:00Z"}).to_string();
        let result: Result<Message> = serializer.deserialize(&raw);
        assert!(result.is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let serializer = MessageSerializer::new();
        let result: Result<Message> = serializer.deserialize("not json at all");
        assert!(result.is_err());
    }

    #[test]
    fn test_message_type_field_name() {
        let message = Message {
            kind: Some("context_update".to_string()),
            ..Message::user("x")
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "context_update");
    }

    #[test]
    fn test_summary_record_round_trip() {
        let serializer = MessageSerializer::new();
        let record = SummaryRecord {
            text: "User is comparing washing machines.".to_string(),
            timestamp: 1_700_000_000,
            metadata: json!({"type": "merged"}),
        };
        let raw = serializer.serialize(&record).unwrap();
        let back: SummaryRecord = serializer.deserialize(&raw).unwrap();
        assert_eq!(back, record);
    }
}
