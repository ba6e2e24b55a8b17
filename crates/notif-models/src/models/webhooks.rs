/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Webhook models.
//!
//! A webhook is a tenant-registered HTTP endpoint that receives events whose
//! topics match one of its subscription patterns. Every delivery attempt is
//! tracked in a `WebhookDelivery` row.

use crate::schema::{webhook_deliveries, webhooks};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Valid delivery statuses
pub const DELIVERY_STATUS_PENDING: &str = "pending";
pub const DELIVERY_STATUS_SUCCESS: &str = "success";
pub const DELIVERY_STATUS_FAILED: &str = "failed";

pub const VALID_DELIVERY_STATUSES: &[&str] = &[
    DELIVERY_STATUS_PENDING,
    DELIVERY_STATUS_SUCCESS,
    DELIVERY_STATUS_FAILED,
];

/// Webhook secrets are 32 random bytes, hex encoded.
pub const SECRET_HEX_LEN: usize = 64;

/// Response bodies stored on delivery rows are truncated to this many bytes.
pub const MAX_STORED_RESPONSE_BODY: usize = 1024;

// =============================================================================
// Webhook Models
// =============================================================================

/// A webhook record from the database.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = webhooks)]
pub struct Webhook {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning organization.
    pub org_id: String,
    /// Owning project.
    pub project_id: Uuid,
    /// Target URL.
    pub url: String,
    /// Topic patterns this webhook subscribes to (`*`/`>` wildcards).
    pub topics: Vec<String>,
    /// HMAC signing secret, hex encoded. Returned only on creation.
    #[serde(skip_serializing)]
    pub secret: String,
    /// Whether the webhook receives deliveries.
    pub enabled: bool,
    /// When the webhook was created.
    pub created_at: DateTime<Utc>,
    /// When the webhook was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A new webhook to be inserted.
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = webhooks)]
pub struct NewWebhook {
    /// Owning organization.
    pub org_id: String,
    /// Owning project.
    pub project_id: Uuid,
    /// Target URL.
    pub url: String,
    /// Topic patterns.
    pub topics: Vec<String>,
    /// HMAC signing secret, hex encoded.
    pub secret: String,
    /// Whether the webhook is active (defaults to true).
    pub enabled: bool,
}

impl NewWebhook {
    /// Creates a new webhook.
    ///
    /// # Arguments
    /// * `org_id` - The owning org.
    /// * `project_id` - The owning project.
    /// * `url` - Target URL (http or https).
    /// * `topics` - At least one topic pattern.
    /// * `secret` - Hex-encoded 32-byte signing secret.
    ///
    /// # Returns
    /// A Result containing the new webhook or a validation error.
    pub fn new(
        org_id: String,
        project_id: Uuid,
        url: String,
        topics: Vec<String>,
        secret: String,
    ) -> Result<Self, String> {
        if org_id.is_empty() {
            return Err("Org id is required".to_string());
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err("URL must use http or https".to_string());
        }
        if topics.is_empty() {
            return Err("At least one topic pattern is required".to_string());
        }
        for pattern in &topics {
            validate_topic_pattern(pattern)?;
        }
        if secret.len() != SECRET_HEX_LEN {
            return Err("Secret must be 32 bytes hex encoded".to_string());
        }

        Ok(Self {
            org_id,
            project_id,
            url,
            topics,
            secret,
            enabled: true,
        })
    }
}

/// Changeset for updating a webhook.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = webhooks)]
pub struct UpdateWebhook {
    /// New target URL.
    pub url: Option<String>,
    /// New topic patterns.
    pub topics: Option<Vec<String>>,
    /// Enable/disable.
    pub enabled: Option<bool>,
    /// Bump on every update.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Validates a topic pattern.
///
/// Patterns are dot-separated tokens where each token is `[A-Za-z0-9_-]+`,
/// `*` (exactly one token) or `>` (one or more tokens, terminal only).
pub fn validate_topic_pattern(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("Topic pattern cannot be empty".to_string());
    }

    let tokens: Vec<&str> = pattern.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        match *token {
            "" => return Err(format!("Empty token in pattern '{}'", pattern)),
            "*" => {}
            ">" => {
                if i != tokens.len() - 1 {
                    return Err(format!("'>' must be the last token in '{}'", pattern));
                }
            }
            t => {
                if !t
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    return Err(format!("Invalid token '{}' in pattern '{}'", t, pattern));
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Webhook Delivery Models
// =============================================================================

/// A webhook delivery record from the database.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = webhook_deliveries)]
pub struct WebhookDelivery {
    /// Unique identifier.
    pub id: Uuid,
    /// The webhook this delivery targets.
    pub webhook_id: Uuid,
    /// The delivered event's id.
    pub event_id: Uuid,
    /// The delivered event's topic.
    pub topic: String,
    /// Delivery status: pending, success, failed.
    pub status: String,
    /// Attempt number, starting at 1.
    pub attempt: i32,
    /// HTTP status code of the response, if one was received.
    pub response_status: Option<i32>,
    /// Response body, truncated to 1 KiB.
    pub response_body: Option<String>,
    /// Error message from a failed attempt.
    pub error: Option<String>,
    /// When the delivery succeeded.
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the attempt was recorded.
    pub created_at: DateTime<Utc>,
}

/// A new webhook delivery to be inserted.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = webhook_deliveries)]
pub struct NewWebhookDelivery {
    /// The webhook being delivered to.
    pub webhook_id: Uuid,
    /// The event id.
    pub event_id: Uuid,
    /// The event topic.
    pub topic: String,
    /// Initial status (pending).
    pub status: String,
    /// Attempt number, starting at 1.
    pub attempt: i32,
}

impl NewWebhookDelivery {
    /// Creates a new delivery row for an attempt.
    pub fn new(webhook_id: Uuid, event_id: Uuid, topic: String, attempt: i32) -> Self {
        Self {
            webhook_id,
            event_id,
            topic,
            status: DELIVERY_STATUS_PENDING.to_string(),
            attempt,
        }
    }
}

/// Changeset for updating a webhook delivery.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = webhook_deliveries)]
pub struct UpdateWebhookDelivery {
    /// New status.
    pub status: Option<String>,
    /// HTTP status of the response.
    pub response_status: Option<Option<i32>>,
    /// Truncated response body.
    pub response_body: Option<Option<String>>,
    /// Error message.
    pub error: Option<Option<String>>,
    /// When the delivery succeeded.
    pub delivered_at: Option<Option<DateTime<Utc>>>,
}

/// Truncates a response body for storage.
pub fn truncate_response_body(body: &str) -> String {
    if body.len() <= MAX_STORED_RESPONSE_BODY {
        return body.to_string();
    }
    let mut end = MAX_STORED_RESPONSE_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> String {
        "ab".repeat(32)
    }

    #[test]
    fn test_new_webhook_success() {
        let hook = NewWebhook::new(
            "acme".into(),
            Uuid::new_v4(),
            "https://example.com/hook".into(),
            vec!["orders.*".into(), "payments.>".into()],
            secret(),
        );
        assert!(hook.is_ok());
        assert!(hook.unwrap().enabled);
    }

    #[test]
    fn test_new_webhook_bad_url() {
        let result = NewWebhook::new(
            "acme".into(),
            Uuid::new_v4(),
            "ftp://example.com".into(),
            vec!["orders.*".into()],
            secret(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_new_webhook_no_topics() {
        let result = NewWebhook::new(
            "acme".into(),
            Uuid::new_v4(),
            "https://example.com".into(),
            vec![],
            secret(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_topic_pattern() {
        assert!(validate_topic_pattern("orders.created").is_ok());
        assert!(validate_topic_pattern("orders.*").is_ok());
        assert!(validate_topic_pattern("payments.>").is_ok());
        assert!(validate_topic_pattern(">").is_ok());

        assert!(validate_topic_pattern("").is_err());
        assert!(validate_topic_pattern("orders..created").is_err());
        assert!(validate_topic_pattern(">.orders").is_err());
        assert!(validate_topic_pattern("orders.cre ated").is_err());
    }

    #[test]
    fn test_truncate_response_body() {
        let short = "ok";
        assert_eq!(truncate_response_body(short), "ok");

        let long = "x".repeat(2048);
        assert_eq!(truncate_response_body(&long).len(), MAX_STORED_RESPONSE_BODY);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        // A multi-byte char straddling the cut point must not panic
        let mut body = "x".repeat(MAX_STORED_RESPONSE_BODY - 1);
        body.push('é');
        body.push_str("tail");
        let truncated = truncate_response_body(&body);
        assert!(truncated.len() <= MAX_STORED_RESPONSE_BODY);
    }

    #[test]
    fn test_new_webhook_delivery() {
        let delivery = NewWebhookDelivery::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "orders.created".into(),
            1,
        );
        assert_eq!(delivery.status, DELIVERY_STATUS_PENDING);
        assert_eq!(delivery.attempt, 1);
    }
}
