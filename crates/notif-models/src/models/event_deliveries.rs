/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Unified event delivery records.
//!
//! Every delivery of an event to a receiver (webhook endpoint or live
//! WebSocket consumer) creates one row here. Status transitions are monotonic
//! (`delivered → acked | nacked | dlq`) except that a nacked delivery returns
//! to `delivered` when the bus redelivers the message.

use crate::schema::event_deliveries;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Receiver types
pub const RECEIVER_TYPE_WEBHOOK: &str = "webhook";
pub const RECEIVER_TYPE_WEBSOCKET: &str = "websocket";

/// Valid delivery statuses
pub const EVENT_DELIVERY_DELIVERED: &str = "delivered";
pub const EVENT_DELIVERY_ACKED: &str = "acked";
pub const EVENT_DELIVERY_NACKED: &str = "nacked";
pub const EVENT_DELIVERY_DLQ: &str = "dlq";

pub const VALID_EVENT_DELIVERY_STATUSES: &[&str] = &[
    EVENT_DELIVERY_DELIVERED,
    EVENT_DELIVERY_ACKED,
    EVENT_DELIVERY_NACKED,
    EVENT_DELIVERY_DLQ,
];

// =============================================================================
// Models
// =============================================================================

/// An event delivery record from the database.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = event_deliveries)]
pub struct EventDelivery {
    /// Unique identifier.
    pub id: Uuid,
    /// The delivered event's id.
    pub event_id: Uuid,
    /// Receiver type: webhook or websocket.
    pub receiver_type: String,
    /// Webhook id for webhook deliveries.
    pub receiver_id: Option<Uuid>,
    /// Durable consumer name for websocket deliveries.
    pub consumer_name: Option<String>,
    /// Client connection id for websocket deliveries.
    pub client_id: Option<String>,
    /// Status: delivered, acked, nacked, dlq.
    pub status: String,
    /// Delivery attempt number.
    pub attempt: i32,
    /// When the event was handed to the receiver.
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the receiver acknowledged the event.
    pub acked_at: Option<DateTime<Utc>>,
    /// Error recorded on nack or DLQ routing.
    pub error: Option<String>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

/// A new event delivery to be inserted.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = event_deliveries)]
pub struct NewEventDelivery {
    /// The delivered event's id.
    pub event_id: Uuid,
    /// Receiver type: webhook or websocket.
    pub receiver_type: String,
    /// Webhook id for webhook deliveries.
    pub receiver_id: Option<Uuid>,
    /// Durable consumer name for websocket deliveries.
    pub consumer_name: Option<String>,
    /// Client connection id for websocket deliveries.
    pub client_id: Option<String>,
    /// Initial status.
    pub status: String,
    /// Delivery attempt number.
    pub attempt: i32,
    /// When the event was handed to the receiver.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl NewEventDelivery {
    /// Creates a delivery row for a webhook receiver.
    pub fn webhook(event_id: Uuid, webhook_id: Uuid, status: &str, attempt: i32) -> Self {
        Self {
            event_id,
            receiver_type: RECEIVER_TYPE_WEBHOOK.to_string(),
            receiver_id: Some(webhook_id),
            consumer_name: None,
            client_id: None,
            status: status.to_string(),
            attempt,
            delivered_at: Some(Utc::now()),
        }
    }

    /// Creates a delivery row for a websocket receiver.
    pub fn websocket(
        event_id: Uuid,
        consumer_name: String,
        client_id: String,
        attempt: i32,
    ) -> Self {
        Self {
            event_id,
            receiver_type: RECEIVER_TYPE_WEBSOCKET.to_string(),
            receiver_id: None,
            consumer_name: Some(consumer_name),
            client_id: Some(client_id),
            status: EVENT_DELIVERY_DELIVERED.to_string(),
            attempt,
            delivered_at: Some(Utc::now()),
        }
    }
}

/// Changeset for updating an event delivery.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = event_deliveries)]
pub struct UpdateEventDelivery {
    /// New status.
    pub status: Option<String>,
    /// Attempt number on redelivery.
    pub attempt: Option<i32>,
    /// When the receiver acknowledged.
    pub acked_at: Option<Option<DateTime<Utc>>>,
    /// When the event was handed to the receiver.
    pub delivered_at: Option<Option<DateTime<Utc>>>,
    /// Error recorded on nack or DLQ routing.
    pub error: Option<Option<String>>,
}

/// Returns true when `from → to` is a legal status transition.
///
/// All transitions are monotonic except `nacked → delivered`, which happens
/// when the bus redelivers a previously rejected message.
pub fn is_valid_transition(from: &str, to: &str) -> bool {
    match (from, to) {
        (EVENT_DELIVERY_DELIVERED, EVENT_DELIVERY_ACKED)
        | (EVENT_DELIVERY_DELIVERED, EVENT_DELIVERY_NACKED)
        | (EVENT_DELIVERY_DELIVERED, EVENT_DELIVERY_DLQ)
        | (EVENT_DELIVERY_NACKED, EVENT_DELIVERY_DELIVERED)
        | (EVENT_DELIVERY_NACKED, EVENT_DELIVERY_DLQ) => true,
        (a, b) if a == b => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_delivery_row() {
        let row = NewEventDelivery::webhook(
            Uuid::new_v4(),
            Uuid::new_v4(),
            EVENT_DELIVERY_ACKED,
            1,
        );
        assert_eq!(row.receiver_type, RECEIVER_TYPE_WEBHOOK);
        assert!(row.receiver_id.is_some());
        assert!(row.consumer_name.is_none());
    }

    #[test]
    fn test_websocket_delivery_row() {
        let row = NewEventDelivery::websocket(
            Uuid::new_v4(),
            "ws-acme-client1".into(),
            "client1".into(),
            2,
        );
        assert_eq!(row.receiver_type, RECEIVER_TYPE_WEBSOCKET);
        assert_eq!(row.status, EVENT_DELIVERY_DELIVERED);
        assert_eq!(row.attempt, 2);
    }

    #[test]
    fn test_transitions_monotonic() {
        assert!(is_valid_transition(EVENT_DELIVERY_DELIVERED, EVENT_DELIVERY_ACKED));
        assert!(is_valid_transition(EVENT_DELIVERY_DELIVERED, EVENT_DELIVERY_NACKED));
        assert!(is_valid_transition(EVENT_DELIVERY_NACKED, EVENT_DELIVERY_DELIVERED));
        assert!(is_valid_transition(EVENT_DELIVERY_NACKED, EVENT_DELIVERY_DLQ));

        assert!(!is_valid_transition(EVENT_DELIVERY_ACKED, EVENT_DELIVERY_DELIVERED));
        assert!(!is_valid_transition(EVENT_DELIVERY_DLQ, EVENT_DELIVERY_DELIVERED));
        assert!(!is_valid_transition(EVENT_DELIVERY_ACKED, EVENT_DELIVERY_DLQ));
    }
}
