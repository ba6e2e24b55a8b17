/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! WebSocket wire protocol.
//!
//! Frames are JSON objects discriminated by `action` (client to server) or
//! `type` (server to client).

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Default maximum deliveries before a nacked event is dead-lettered.
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Default redelivery delay for a nack without `retry_in`.
pub const DEFAULT_NACK_DELAY_SECS: u64 = 5 * 60;

/// Frames from the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Open a subscription on one or more topics.
    Subscribe {
        topics: Vec<String>,
        #[serde(default)]
        options: SubscribeOptions,
    },
    /// Acknowledge a delivered event.
    Ack { id: Uuid },
    /// Reject a delivered event, optionally delaying redelivery.
    Nack {
        id: Uuid,
        #[serde(default)]
        retry_in: Option<u64>,
    },
    /// Application-level keepalive.
    Ping,
}

/// Subscription options.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeOptions {
    /// Acknowledge automatically on delivery.
    #[serde(default = "default_true")]
    pub auto_ack: bool,
    /// Where to start reading.
    #[serde(default)]
    pub from: StartFrom,
    /// Consumer group; members share one durable consumer.
    #[serde(default)]
    pub group: Option<String>,
    /// Deliveries before a nacked event is dead-lettered.
    #[serde(default)]
    pub max_retries: Option<i32>,
    /// Seconds the bus waits for an ack before redelivering.
    #[serde(default)]
    pub ack_timeout: Option<u64>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            auto_ack: true,
            from: StartFrom::Latest,
            group: None,
            max_retries: None,
            ack_timeout: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Start position of a subscription: "latest", "beginning" or an RFC3339
/// timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartFrom {
    #[default]
    Latest,
    Beginning,
    Time(DateTime<Utc>),
}

impl<'de> Deserialize<'de> for StartFrom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "latest" => Ok(StartFrom::Latest),
            "beginning" => Ok(StartFrom::Beginning),
            other => DateTime::parse_from_rfc3339(other)
                .map(|ts| StartFrom::Time(ts.with_timezone(&Utc)))
                .map_err(|_| {
                    D::Error::custom(format!(
                        "expected \"latest\", \"beginning\" or an RFC3339 timestamp, got \"{}\"",
                        other
                    ))
                }),
        }
    }
}

impl Serialize for StartFrom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StartFrom::Latest => serializer.serialize_str("latest"),
            StartFrom::Beginning => serializer.serialize_str("beginning"),
            StartFrom::Time(ts) => serializer.serialize_str(&ts.to_rfc3339()),
        }
    }
}

/// Frames to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Subscription established.
    Subscribed {
        topics: Vec<String>,
        consumer_id: String,
    },
    /// A delivered event.
    Event {
        id: Uuid,
        topic: String,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
        attempt: i64,
        max_attempts: i32,
    },
    /// An error; the connection stays open unless the transport broke.
    Error { code: ErrorCode, message: String },
    /// Keepalive reply.
    Pong,
}

/// Error codes sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidFrame,
    InvalidTopic,
    AlreadySubscribed,
    NotSubscribed,
    SubscribeFailed,
    UnknownEvent,
    Forbidden,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_decodes() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"action":"subscribe","topics":["orders.*"],"options":{"auto_ack":true,"from":"latest"}}"#,
        )
        .unwrap();

        match frame {
            ClientFrame::Subscribe { topics, options } => {
                assert_eq!(topics, vec!["orders.*"]);
                assert!(options.auto_ack);
                assert_eq!(options.from, StartFrom::Latest);
                assert!(options.group.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_options_default() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"action":"subscribe","topics":["a.b"]}"#).unwrap();
        match frame {
            ClientFrame::Subscribe { options, .. } => {
                assert!(options.auto_ack);
                assert_eq!(options.from, StartFrom::Latest);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_start_from_rfc3339() {
        let options: SubscribeOptions =
            serde_json::from_str(r#"{"from":"2026-01-02T03:04:05Z"}"#).unwrap();
        match options.from {
            StartFrom::Time(ts) => assert_eq!(ts.to_rfc3339(), "2026-01-02T03:04:05+00:00"),
            other => panic!("unexpected start: {:?}", other),
        }
    }

    #[test]
    fn test_start_from_rejects_garbage() {
        let result: Result<SubscribeOptions, _> = serde_json::from_str(r#"{"from":"yesterday"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_ack_nack_frames() {
        let id = Uuid::new_v4();

        let ack: ClientFrame =
            serde_json::from_str(&format!(r#"{{"action":"ack","id":"{}"}}"#, id)).unwrap();
        assert!(matches!(ack, ClientFrame::Ack { id: got } if got == id));

        let nack: ClientFrame = serde_json::from_str(&format!(
            r#"{{"action":"nack","id":"{}","retry_in":30}}"#,
            id
        ))
        .unwrap();
        match nack {
            ClientFrame::Nack { id: got, retry_in } => {
                assert_eq!(got, id);
                assert_eq!(retry_in, Some(30));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_server_frame_encoding() {
        let frame = ServerFrame::Error {
            code: ErrorCode::UnknownEvent,
            message: "no such event".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "UNKNOWN_EVENT");

        let pong = serde_json::to_value(ServerFrame::Pong).unwrap();
        assert_eq!(pong["type"], "pong");
    }

    #[test]
    fn test_event_frame_shape() {
        let frame = ServerFrame::Event {
            id: Uuid::new_v4(),
            topic: "orders.created".to_string(),
            data: serde_json::json!({"id": 1}),
            timestamp: Utc::now(),
            attempt: 1,
            max_attempts: 5,
        };
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "event");
        assert_eq!(json["topic"], "orders.created");
        assert_eq!(json["attempt"], 1);
        assert_eq!(json["max_attempts"], 5);
    }
}
