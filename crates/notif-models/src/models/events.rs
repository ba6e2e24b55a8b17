/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Bus-level event envelopes.
//!
//! These types travel over the message bus and are not persisted in the
//! database. The envelope is the single wire format shared by the publisher,
//! the WebSocket engine, the webhook engine and the DLQ.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// An immutable event bound to a topic within a tenant/project.
///
/// Serialized as the deterministic JSON envelope
/// `{id, org_id, project_id, topic, data, timestamp}` with RFC3339 UTC
/// timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Event {
    /// Unique event id (idempotency key for downstream consumers).
    pub id: Uuid,
    /// Owning organization.
    pub org_id: String,
    /// Owning project.
    pub project_id: String,
    /// Dotted topic, e.g. "orders.created".
    pub topic: String,
    /// Opaque JSON payload.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    /// When the event was accepted by the hub.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates a new event stamped with a fresh id and the current time.
    pub fn new(org_id: &str, project_id: &str, topic: &str, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.to_string(),
            project_id: project_id.to_string(),
            topic: topic.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Creates an event with a caller-provided id (scheduled events reuse the
    /// schedule row id so duplicates across crash windows are detectable).
    pub fn with_id(
        id: Uuid,
        org_id: &str,
        project_id: &str,
        topic: &str,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id,
            org_id: org_id.to_string(),
            project_id: project_id.to_string(),
            topic: topic.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// A dead-lettered event on `dlq.<org>.<consumer_group>`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DlqMessage {
    /// Event id of the failed delivery.
    pub id: Uuid,
    /// Owning organization.
    pub org_id: String,
    /// Owning project, when known.
    pub project_id: Option<String>,
    /// Topic the event was originally published on.
    pub original_topic: String,
    /// Original payload.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    /// Original publish time.
    pub timestamp: DateTime<Utc>,
    /// When the delivery was given up on.
    pub failed_at: DateTime<Utc>,
    /// Number of delivery attempts made.
    pub attempts: i32,
    /// The last error observed.
    pub last_error: String,
    /// Consumer group that exhausted its retries (e.g. "webhook:<id>").
    pub consumer_group: String,
    /// Number of times this message has been replayed by an operator.
    #[serde(default)]
    pub replays: i32,
}

impl DlqMessage {
    /// Builds a DLQ envelope from a failed event delivery.
    pub fn from_event(
        event: &Event,
        consumer_group: &str,
        attempts: i32,
        last_error: &str,
    ) -> Self {
        Self {
            id: event.id,
            org_id: event.org_id.clone(),
            project_id: Some(event.project_id.clone()),
            original_topic: event.topic.clone(),
            data: event.data.clone(),
            timestamp: event.timestamp,
            failed_at: Utc::now(),
            attempts,
            last_error: last_error.to_string(),
            consumer_group: consumer_group.to_string(),
            replays: 0,
        }
    }

    /// Reconstructs the original event for replay.
    pub fn to_event(&self) -> Event {
        Event {
            id: self.id,
            org_id: self.org_id.clone(),
            project_id: self.project_id.clone().unwrap_or_default(),
            topic: self.original_topic.clone(),
            data: self.data.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// A queued webhook retry on `webhook-retry.<org>.<webhook_id>`.
///
/// Deliberately carries no secret or URL; both are refetched from the
/// database when the retry fires so that rotations take effect immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryJob {
    /// The webhook being retried.
    pub webhook_id: Uuid,
    /// The event id.
    pub event_id: Uuid,
    /// Owning organization.
    pub org_id: String,
    /// Owning project.
    pub project_id: String,
    /// The event topic.
    pub topic: String,
    /// The event payload.
    pub data: serde_json::Value,
    /// Original publish time.
    pub timestamp: DateTime<Utc>,
    /// The attempt number this job represents (2..=max).
    pub attempt: i32,
    /// Error from the previous attempt.
    pub last_error: String,
    /// Delivery row of the failed attempt that queued this job.
    pub delivery_id: Uuid,
    /// When this attempt becomes due.
    pub not_before: DateTime<Utc>,
}

impl RetryJob {
    /// Reconstructs the event for the retry attempt.
    pub fn to_event(&self) -> Event {
        Event {
            id: self.event_id,
            org_id: self.org_id.clone(),
            project_id: self.project_id.clone(),
            topic: self.topic.clone(),
            data: self.data.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_round_trip() {
        let event = Event::new("acme", "proj", "orders.created", serde_json::json!({"id": 1}));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.topic, "orders.created");
        assert_eq!(parsed.data["id"], 1);
    }

    #[test]
    fn test_event_envelope_fields() {
        let event = Event::new("acme", "proj", "a.b", serde_json::json!({}));
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();

        for key in ["id", "org_id", "project_id", "topic", "data", "timestamp"] {
            assert!(value.get(key).is_some(), "missing envelope key {}", key);
        }
    }

    #[test]
    fn test_dlq_message_round_trip() {
        let event = Event::new("acme", "proj", "payments.failed", serde_json::json!({"amount": 10}));
        let dlq = DlqMessage::from_event(&event, "webhook:abc", 5, "connection refused");

        assert_eq!(dlq.id, event.id);
        assert_eq!(dlq.attempts, 5);
        assert_eq!(dlq.replays, 0);

        let restored = dlq.to_event();
        assert_eq!(restored.id, event.id);
        assert_eq!(restored.topic, event.topic);
        assert_eq!(restored.data, event.data);
    }

    #[test]
    fn test_dlq_replays_default() {
        // Envelopes written before the replay counter existed decode with 0
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "org_id": "acme",
            "project_id": "proj",
            "original_topic": "a.b",
            "data": {},
            "timestamp": Utc::now(),
            "failed_at": Utc::now(),
            "attempts": 3,
            "last_error": "boom",
            "consumer_group": "webhook:w"
        });
        let dlq: DlqMessage = serde_json::from_value(json).unwrap();
        assert_eq!(dlq.replays, 0);
    }

    #[test]
    fn test_scheduled_event_id_reuse() {
        let id = Uuid::new_v4();
        let event = Event::with_id(id, "acme", "proj", "reminders.fire", serde_json::json!({}));
        assert_eq!(event.id, id);
    }
}
