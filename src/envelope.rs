//! Message envelope.
//!
//! Every outgoing message is wrapped in a self-describing JSON envelope:
//!
//! ```json
//! { "version": "1", "name": "billing.invoiceCreated",
//!   "timestamp": "2024-05-01T12:00:00.000Z", "payload": { "id": 1 } }
//! ```
//!
//! Construction is pure; nothing here touches the broker.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageOptions, Result};

/// Wire envelope around caller-supplied data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    // ---
    /// Envelope format version, `"1"` unless overridden.
    pub version: String,

    /// `"<serviceName>.<eventName>"`, or just `eventName` without a service name.
    pub name: String,

    /// Creation time, ISO-8601 with millisecond precision.
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,

    /// Caller data. A missing (`null`) payload is replaced with `{}`.
    pub payload: serde_json::Value,
}

impl MessageEnvelope {
    // ---

    /// Build an envelope stamped with the current time.
    pub fn new(options: &MessageOptions, event_name: &str, payload: serde_json::Value) -> Self {
        Self::at(options, event_name, payload, Utc::now())
    }

    /// Build an envelope with an explicit timestamp.
    pub fn at(
        options: &MessageOptions,
        event_name: &str,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        // ---
        let payload = match payload {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };

        Self {
            version: options.version().to_string(),
            name: options.qualified_name(event_name),
            timestamp,
            payload,
        }
    }

    /// Build an envelope from any serializable payload.
    pub fn from_serialize<T>(
        options: &MessageOptions,
        event_name: &str,
        payload: &T,
    ) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(payload)?;
        Ok(Self::new(options, event_name, value))
    }

    /// Serialize to a self-contained byte buffer.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse a buffer produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// `DateTime<Utc>` as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
mod iso_millis {
    // ---
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        // ---
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn service(name: &str) -> MessageOptions {
        MessageOptions {
            version: None,
            service_name: Some(name.to_string()),
        }
    }

    #[test]
    fn test_name_with_service() {
        // ---
        let env = MessageEnvelope::new(&service("svc"), "orderCreated", json!({ "id": 1 }));
        assert_eq!(env.name, "svc.orderCreated");
        assert_eq!(env.version, "1");
        assert_eq!(env.payload, json!({ "id": 1 }));
    }

    #[test]
    fn test_name_without_service() {
        // ---
        let env = MessageEnvelope::new(&MessageOptions::default(), "orderCreated", json!(1));
        assert_eq!(env.name, "orderCreated");
    }

    #[test]
    fn test_version_override() {
        // ---
        let options = MessageOptions {
            version: Some("7".into()),
            service_name: None,
        };
        let env = MessageEnvelope::new(&options, "e", json!({}));
        assert_eq!(env.version, "7");
    }

    #[test]
    fn test_null_payload_becomes_empty_object() {
        // ---
        let env = MessageEnvelope::from_serialize(&MessageOptions::default(), "e", &()).unwrap();
        assert_eq!(env.payload, json!({}));

        let none: Option<u32> = None;
        let env = MessageEnvelope::from_serialize(&MessageOptions::default(), "e", &none).unwrap();
        assert_eq!(env.payload, json!({}));
    }

    #[test]
    fn test_wire_format() {
        // ---
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let payload = json!({ "id": 1 });
        let env = MessageEnvelope::at(&service("billing"), "invoiceCreated", payload, ts);

        let bytes = env.encode().unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            raw,
            json!({
                "version": "1",
                "name": "billing.invoiceCreated",
                "timestamp": "2024-05-01T12:00:00.000Z",
                "payload": { "id": 1 }
            })
        );
        assert_eq!(MessageEnvelope::decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_string_payload_kept_verbatim() {
        // ---
        let options = MessageOptions::default();
        let env = MessageEnvelope::from_serialize(&options, "e", "payload").unwrap();
        assert_eq!(env.payload, json!("payload"));
    }

    #[test]
    fn test_falsy_payloads_kept() {
        // ---
        let options = MessageOptions::default();
        for payload in [json!(false), json!(0), json!("")] {
            let env = MessageEnvelope::from_serialize(&options, "e", &payload).unwrap();
            assert_eq!(env.payload, payload);
        }
    }
}
