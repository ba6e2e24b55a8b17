/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Scheduled event models.
//!
//! A scheduled event is a deferred publish: at (or shortly after)
//! `scheduled_for` a worker claims the row, publishes the event and marks the
//! row completed. The row itself is the lease; workers claim rows with
//! `FOR UPDATE SKIP LOCKED`.

use crate::schema::scheduled_events;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

pub const SCHEDULE_STATUS_PENDING: &str = "pending";
pub const SCHEDULE_STATUS_COMPLETED: &str = "completed";
pub const SCHEDULE_STATUS_FAILED: &str = "failed";
pub const SCHEDULE_STATUS_CANCELLED: &str = "cancelled";

pub const VALID_SCHEDULE_STATUSES: &[&str] = &[
    SCHEDULE_STATUS_PENDING,
    SCHEDULE_STATUS_COMPLETED,
    SCHEDULE_STATUS_FAILED,
    SCHEDULE_STATUS_CANCELLED,
];

// =============================================================================
// Models
// =============================================================================

/// A scheduled event record from the database.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = scheduled_events)]
pub struct ScheduledEvent {
    /// Unique identifier; doubles as the published event's id.
    pub id: Uuid,
    /// Owning organization.
    pub org_id: String,
    /// Owning project; the published event is namespaced under it.
    pub project_id: Uuid,
    /// Topic to publish on.
    pub topic: String,
    /// Event payload.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    /// When to publish.
    pub scheduled_for: DateTime<Utc>,
    /// Status: pending, completed, failed, cancelled.
    pub status: String,
    /// Error from a failed publish.
    pub error: Option<String>,
    /// When the publish happened.
    pub executed_at: Option<DateTime<Utc>>,
    /// When the schedule was created.
    pub created_at: DateTime<Utc>,
}

/// A new scheduled event to be inserted.
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = scheduled_events)]
pub struct NewScheduledEvent {
    /// Owning organization.
    pub org_id: String,
    /// Owning project.
    pub project_id: Uuid,
    /// Topic to publish on.
    pub topic: String,
    /// Event payload.
    pub data: serde_json::Value,
    /// When to publish.
    pub scheduled_for: DateTime<Utc>,
    /// Initial status (pending).
    pub status: String,
}

impl NewScheduledEvent {
    /// Creates a new scheduled event.
    ///
    /// # Arguments
    /// * `org_id` - The owning org.
    /// * `project_id` - The owning project.
    /// * `topic` - The topic to publish on.
    /// * `data` - The event payload.
    /// * `scheduled_for` - When to publish; must not be in the past by more
    ///   than a minute (clock skew allowance).
    ///
    /// # Returns
    /// A Result containing the new schedule or a validation error.
    pub fn new(
        org_id: String,
        project_id: Uuid,
        topic: String,
        data: serde_json::Value,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Self, String> {
        if org_id.is_empty() {
            return Err("Org id is required".to_string());
        }
        if topic.is_empty() {
            return Err("Topic is required".to_string());
        }
        if scheduled_for < Utc::now() - chrono::Duration::minutes(1) {
            return Err("Scheduled time is in the past".to_string());
        }

        Ok(Self {
            org_id,
            project_id,
            topic,
            data,
            scheduled_for,
            status: SCHEDULE_STATUS_PENDING.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_scheduled_event() {
        let schedule = NewScheduledEvent::new(
            "acme".into(),
            Uuid::new_v4(),
            "reminders.fire".into(),
            serde_json::json!({"user": "u1"}),
            Utc::now() + chrono::Duration::seconds(2),
        );
        assert!(schedule.is_ok());
        assert_eq!(schedule.unwrap().status, SCHEDULE_STATUS_PENDING);
    }

    #[test]
    fn test_new_scheduled_event_in_past() {
        let result = NewScheduledEvent::new(
            "acme".into(),
            Uuid::new_v4(),
            "reminders.fire".into(),
            serde_json::json!({}),
            Utc::now() - chrono::Duration::hours(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_new_scheduled_event_clock_skew_tolerated() {
        let result = NewScheduledEvent::new(
            "acme".into(),
            Uuid::new_v4(),
            "reminders.fire".into(),
            serde_json::json!({}),
            Utc::now() - chrono::Duration::seconds(10),
        );
        assert!(result.is_ok());
    }
}
