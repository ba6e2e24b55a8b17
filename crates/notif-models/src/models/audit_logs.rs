/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Audit log models for tracking administrative and security-sensitive operations.
//!
//! Audit logs are immutable records that track who did what to which resource.
//! Policy decisions, JWT pushes and event emissions are all recorded here.

use crate::schema::audit_logs;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Actor type for admin users.
pub const ACTOR_TYPE_ADMIN: &str = "admin";
/// Actor type for API keys.
pub const ACTOR_TYPE_API_KEY: &str = "api_key";
/// Actor type for system operations.
pub const ACTOR_TYPE_SYSTEM: &str = "system";

pub const VALID_ACTOR_TYPES: &[&str] = &[
    ACTOR_TYPE_ADMIN,
    ACTOR_TYPE_API_KEY,
    ACTOR_TYPE_SYSTEM,
];

// Action constants - Authentication
pub const ACTION_AUTH_FAILED: &str = "auth.failed";
pub const ACTION_API_KEY_CREATED: &str = "apikey.created";
pub const ACTION_API_KEY_DELETED: &str = "apikey.deleted";

// Action constants - Tenancy
pub const ACTION_ORG_CREATED: &str = "org.created";
pub const ACTION_ORG_UPDATED: &str = "org.updated";
pub const ACTION_ORG_DELETED: &str = "org.deleted";
pub const ACTION_PROJECT_CREATED: &str = "project.created";
pub const ACTION_PROJECT_DELETED: &str = "project.deleted";
pub const ACTION_JWT_PUSH: &str = "jwt.push";
pub const ACTION_JWT_ROLLBACK: &str = "jwt.rollback";

// Action constants - Events
pub const ACTION_EVENT_EMIT: &str = "event.emit";
pub const ACTION_EVENT_DLQ: &str = "event.dlq";
pub const ACTION_DLQ_REPLAY: &str = "dlq.replay";
pub const ACTION_DLQ_PURGE: &str = "dlq.purge";

// Action constants - Policy
pub const ACTION_POLICY_ALLOWED: &str = "policy.allowed";
pub const ACTION_POLICY_DENIED: &str = "policy.denied";
pub const ACTION_POLICY_RELOADED: &str = "policy.reloaded";

// Action constants - Webhooks
pub const ACTION_WEBHOOK_CREATED: &str = "webhook.created";
pub const ACTION_WEBHOOK_UPDATED: &str = "webhook.updated";
pub const ACTION_WEBHOOK_DELETED: &str = "webhook.deleted";
pub const ACTION_WEBHOOK_DELIVERY_FAILED: &str = "webhook.delivery_failed";

// Action constants - Schedules
pub const ACTION_SCHEDULE_CREATED: &str = "schedule.created";
pub const ACTION_SCHEDULE_CANCELLED: &str = "schedule.cancelled";
pub const ACTION_SCHEDULE_EXECUTED: &str = "schedule.executed";

// Resource type constants
pub const RESOURCE_TYPE_ORG: &str = "org";
pub const RESOURCE_TYPE_PROJECT: &str = "project";
pub const RESOURCE_TYPE_API_KEY: &str = "api_key";
pub const RESOURCE_TYPE_EVENT: &str = "event";
pub const RESOURCE_TYPE_WEBHOOK: &str = "webhook";
pub const RESOURCE_TYPE_SCHEDULE: &str = "schedule";
pub const RESOURCE_TYPE_POLICY: &str = "policy";
pub const RESOURCE_TYPE_DLQ: &str = "dlq";
pub const RESOURCE_TYPE_JWT: &str = "jwt";
pub const RESOURCE_TYPE_SYSTEM: &str = "system";

// =============================================================================
// Audit Log Models
// =============================================================================

/// An audit log record from the database.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = audit_logs)]
pub struct AuditLog {
    /// Unique identifier for the log entry.
    pub id: Uuid,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Type of actor: admin, api_key, system.
    pub actor_type: String,
    /// ID of the actor (NULL for system or unauthenticated).
    pub actor_id: Option<Uuid>,
    /// The action performed (e.g., "event.emit", "policy.denied").
    pub action: String,
    /// Org the action was scoped to.
    pub org_id: Option<String>,
    /// Type of resource affected.
    pub resource_type: String,
    /// ID of the affected resource (NULL if not applicable).
    pub resource_id: Option<String>,
    /// Additional structured details.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Client IP address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// A new audit log entry to be inserted.
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLog {
    /// Type of actor.
    pub actor_type: String,
    /// ID of the actor.
    pub actor_id: Option<Uuid>,
    /// The action performed.
    pub action: String,
    /// Org the action was scoped to.
    pub org_id: Option<String>,
    /// Type of resource affected.
    pub resource_type: String,
    /// ID of the affected resource.
    pub resource_id: Option<String>,
    /// Additional structured details.
    pub details: Option<serde_json::Value>,
    /// Client IP address.
    pub ip_address: Option<String>,
}

impl NewAuditLog {
    /// Creates a new audit log entry.
    ///
    /// # Arguments
    /// * `actor_type` - Type of actor (admin, api_key, system).
    /// * `actor_id` - ID of the actor (None for system).
    /// * `action` - The action performed.
    /// * `resource_type` - Type of resource affected.
    /// * `resource_id` - ID of the affected resource.
    ///
    /// # Returns
    /// A Result containing the new entry or a validation error.
    pub fn new(
        actor_type: &str,
        actor_id: Option<Uuid>,
        action: &str,
        resource_type: &str,
        resource_id: Option<String>,
    ) -> Result<Self, String> {
        if !VALID_ACTOR_TYPES.contains(&actor_type) {
            return Err(format!("Invalid actor type '{}'", actor_type));
        }
        if action.is_empty() {
            return Err("Action is required".to_string());
        }
        if resource_type.is_empty() {
            return Err("Resource type is required".to_string());
        }

        Ok(Self {
            actor_type: actor_type.to_string(),
            actor_id,
            action: action.to_string(),
            org_id: None,
            resource_type: resource_type.to_string(),
            resource_id,
            details: None,
            ip_address: None,
        })
    }

    /// Scopes the entry to an org.
    pub fn with_org(mut self, org_id: &str) -> Self {
        self.org_id = Some(org_id.to_string());
        self
    }

    /// Attaches structured details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attaches the client IP address.
    pub fn with_ip_address(mut self, ip: String) -> Self {
        self.ip_address = Some(ip);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_audit_log() {
        let entry = NewAuditLog::new(
            ACTOR_TYPE_API_KEY,
            Some(Uuid::new_v4()),
            ACTION_EVENT_EMIT,
            RESOURCE_TYPE_EVENT,
            Some("evt-1".to_string()),
        )
        .unwrap()
        .with_org("acme")
        .with_details(serde_json::json!({"topic": "orders.created"}));

        assert_eq!(entry.action, ACTION_EVENT_EMIT);
        assert_eq!(entry.org_id.as_deref(), Some("acme"));
        assert!(entry.details.is_some());
    }

    #[test]
    fn test_new_audit_log_invalid_actor() {
        let result = NewAuditLog::new("robot", None, "x.y", RESOURCE_TYPE_EVENT, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_audit_log_empty_action() {
        let result = NewAuditLog::new(ACTOR_TYPE_SYSTEM, None, "", RESOURCE_TYPE_SYSTEM, None);
        assert!(result.is_err());
    }
}
