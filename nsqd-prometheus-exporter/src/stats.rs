//! nsqd `/stats?format=json` document model and decoding.
//!
//! nsqd has served two shapes over its history:
//!
//! - `<= 0.3.8` wraps the stats in an envelope:
//!   `{"status_code": 200, "status_text": "OK", "data": {...}}`
//! - `1.x` serves the stats object at the document root.
//!
//! [`decode`] tries the envelope first and falls back to the root shape.
//! Field names mirror nsqd's own `nsqd/stats.go`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::FetchError;

/// Which wire shape a stats document was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{status_code, status_text, data}` envelope.
    Legacy,
    /// Stats fields at the document root.
    Modern,
}

impl ResponseShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseShape::Legacy => "legacy",
            ResponseShape::Modern => "modern",
        }
    }
}

/// One poll's worth of nsqd statistics.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub health: String,
    /// Seconds since the epoch.
    #[serde(default)]
    pub start_time: i64,
    #[serde(deserialize_with = "null_as_empty")]
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Topic {
    #[serde(rename = "topic_name")]
    pub name: String,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub depth: i64,
    #[serde(default)]
    pub backend_depth: i64,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Channel {
    #[serde(rename = "channel_name")]
    pub name: String,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub depth: i64,
    #[serde(default)]
    pub backend_depth: i64,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub in_flight_count: i64,
    #[serde(default)]
    pub deferred_count: i64,
    #[serde(default)]
    pub requeue_count: u64,
    #[serde(default)]
    pub timeout_count: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub clients: Vec<Client>,
}

/// A consumer connection. Only counted, never projected individually.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Client {
    pub client_id: String,
    pub hostname: String,
    pub version: String,
    pub remote_address: String,
    pub state: i32,
    pub finish_count: u64,
    pub message_count: u64,
    pub ready_count: i64,
    pub in_flight_count: i64,
    pub requeue_count: u64,
    #[serde(rename = "connect_ts")]
    pub connect_time: i64,
    pub sample_rate: i32,
    pub deflate: bool,
    pub snappy: bool,
    pub tls: bool,
}

/// Legacy `{status_code, status_text, data}` wrapper.
#[derive(Debug, Deserialize)]
struct Envelope {
    status_code: i64,
    #[serde(default)]
    status_text: String,
    data: Snapshot,
}

/// Go marshals nil slices as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode a stats body, trying the legacy envelope before the root shape.
///
/// An envelope whose `status_code` is neither `0` nor 2xx is rejected
/// instead of falling through, so an nsqd error reply can never be read as
/// an empty topology.
pub fn decode(body: &[u8]) -> Result<(ResponseShape, Snapshot), FetchError> {
    let document: Value = serde_json::from_slice(body)?;

    if let Ok(envelope) = Envelope::deserialize(&document) {
        let code = envelope.status_code;
        if code != 0 && !(200..300).contains(&code) {
            return Err(FetchError::Upstream {
                code,
                text: envelope.status_text,
            });
        }
        return Ok((ResponseShape::Legacy, envelope.data));
    }

    let snapshot = Snapshot::deserialize(document)?;
    Ok((ResponseShape::Modern, snapshot))
}

impl Snapshot {
    /// Total number of channels across all topics.
    pub fn channel_count(&self) -> usize {
        self.topics.iter().map(|t| t.channels.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INNER: &str = r#"{
        "version": "1.2.1",
        "health": "OK",
        "start_time": 1700000000,
        "topics": [
            {
                "topic_name": "orders",
                "paused": false,
                "depth": 12,
                "backend_depth": 3,
                "message_count": 900,
                "channels": [
                    {
                        "channel_name": "worker",
                        "paused": true,
                        "depth": 5,
                        "backend_depth": 1,
                        "in_flight_count": 2,
                        "deferred_count": 4,
                        "message_count": 880,
                        "requeue_count": 7,
                        "timeout_count": 9,
                        "clients": [
                            {"client_id": "c1", "hostname": "h1", "ready_count": 10, "connect_ts": 1700000100},
                            {"client_id": "c2", "hostname": "h2"}
                        ]
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_decode_modern_root_shape() {
        let (shape, snapshot) = decode(INNER.as_bytes()).unwrap();

        assert_eq!(shape, ResponseShape::Modern);
        assert_eq!(snapshot.version, "1.2.1");
        assert_eq!(snapshot.health, "OK");
        assert_eq!(snapshot.start_time, 1_700_000_000);
        assert_eq!(snapshot.topics.len(), 1);

        let topic = &snapshot.topics[0];
        assert_eq!(topic.name, "orders");
        assert_eq!(topic.depth, 12);
        assert_eq!(topic.message_count, 900);

        let channel = &topic.channels[0];
        assert_eq!(channel.name, "worker");
        assert!(channel.paused);
        assert_eq!(channel.in_flight_count, 2);
        assert_eq!(channel.timeout_count, 9);
        assert_eq!(channel.clients.len(), 2);
        assert_eq!(channel.clients[0].connect_time, 1_700_000_100);
    }

    #[test]
    fn test_decode_legacy_envelope() {
        let body = format!(
            r#"{{"status_code": 200, "status_text": "OK", "data": {}}}"#,
            INNER
        );
        let (shape, snapshot) = decode(body.as_bytes()).unwrap();

        assert_eq!(shape, ResponseShape::Legacy);
        assert_eq!(snapshot.topics[0].channels[0].name, "worker");
    }

    #[test]
    fn test_both_shapes_decode_identically() {
        let legacy = format!(r#"{{"status_code": 0, "data": {}}}"#, INNER);

        let (legacy_shape, from_legacy) = decode(legacy.as_bytes()).unwrap();
        let (modern_shape, from_root) = decode(INNER.as_bytes()).unwrap();

        assert_eq!(legacy_shape, ResponseShape::Legacy);
        assert_eq!(modern_shape, ResponseShape::Modern);
        assert_eq!(from_legacy, from_root);
    }

    #[test]
    fn test_decode_envelope_with_error_status() {
        let body = r#"{"status_code": 500, "status_text": "INTERNAL_ERROR", "data": {"topics": []}}"#;
        let err = decode(body.as_bytes()).unwrap_err();

        assert!(matches!(err, FetchError::Upstream { code: 500, .. }));
    }

    #[test]
    fn test_decode_envelope_with_null_data_is_an_error() {
        let body = r#"{"status_code": 500, "status_text": "INTERNAL_ERROR", "data": null}"#;

        assert!(matches!(
            decode(body.as_bytes()),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_null_collections() {
        let body = r#"{
            "version": "1.0.0",
            "health": "OK",
            "start_time": 1,
            "topics": [
                {"topic_name": "empty", "channels": null},
                {"topic_name": "idle", "channels": [{"channel_name": "c", "clients": null}]}
            ]
        }"#;
        let (_, snapshot) = decode(body.as_bytes()).unwrap();

        assert!(snapshot.topics[0].channels.is_empty());
        assert!(snapshot.topics[1].channels[0].clients.is_empty());
        assert_eq!(snapshot.channel_count(), 1);
    }

    #[test]
    fn test_decode_null_topics() {
        let body = r#"{"version": "1.0.0", "health": "OK", "start_time": 1, "topics": null}"#;
        let (_, snapshot) = decode(body.as_bytes()).unwrap();

        assert!(snapshot.topics.is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(decode(b"not json").is_err());
        assert!(decode(b"{\"version\": \"1.0.0\"}").is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_field_types() {
        let body = r#"{"topics": [{"topic_name": "orders", "depth": "twelve"}]}"#;

        assert!(decode(body.as_bytes()).is_err());
    }
}
