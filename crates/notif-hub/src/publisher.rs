/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Validated event publication.
//!
//! The publisher stamps incoming payloads into envelopes, runs the policy
//! check, and hands the serialized envelope to the org's connection. Ordering
//! on a subject comes from the bus; the publisher holds no locks.

use std::sync::Arc;

use notif_models::models::audit_logs::{
    ACTION_EVENT_EMIT, ACTOR_TYPE_API_KEY, RESOURCE_TYPE_EVENT,
};
use notif_models::models::events::Event;
use notif_utils::logging::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::bus::subject::{event_subject, validate_topic};
use crate::metrics;
use crate::policy::{Action, PolicyEnforcer, Principal};
use crate::pool::ClientPool;
use crate::utils::audit;

/// Errors from event publication
#[derive(Debug, Error)]
pub enum PublishError {
    /// Topic failed validation
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Policy denied the publish
    #[error("Publish forbidden by policy")]
    Forbidden,

    /// The org has no live connection or the bus rejected the publish
    #[error("Bus unavailable: {0}")]
    Unavailable(String),
}

/// The event publisher.
#[derive(Clone)]
pub struct EventPublisher {
    pool: Arc<ClientPool>,
    policy: PolicyEnforcer,
}

impl EventPublisher {
    /// Creates a publisher.
    pub fn new(pool: Arc<ClientPool>, policy: PolicyEnforcer) -> Self {
        Self { pool, policy }
    }

    /// Validates, stamps and publishes an event on behalf of a principal.
    ///
    /// # Arguments
    /// * `org_id` - The authenticated org.
    /// * `project_id` - The authenticated project.
    /// * `topic` - Dotted topic tokens.
    /// * `data` - Opaque JSON payload.
    /// * `principal` - The principal for the policy check.
    ///
    /// # Returns
    /// The published event (with its assigned id and timestamp).
    pub async fn publish(
        &self,
        org_id: &str,
        project_id: &str,
        topic: &str,
        data: serde_json::Value,
        principal: &Principal,
    ) -> Result<Event, PublishError> {
        validate_topic(topic).map_err(PublishError::InvalidTopic)?;

        let decision = self.policy.check(org_id, principal, topic, Action::Publish);
        if !decision.allowed {
            return Err(PublishError::Forbidden);
        }

        let event = Event::new(org_id, project_id, topic, data);
        let sequence = self.publish_envelope(&event).await?;

        audit::log_action(
            ACTOR_TYPE_API_KEY,
            Uuid::parse_str(&principal.id).ok(),
            ACTION_EVENT_EMIT,
            RESOURCE_TYPE_EVENT,
            Some(event.id.to_string()),
            Some(serde_json::json!({
                "org_id": org_id,
                "topic": topic,
                "seq": sequence,
            })),
            None,
        );

        Ok(event)
    }

    /// Publishes an already-stamped envelope, bypassing the policy check.
    ///
    /// Internal producers (scheduler, DLQ replay) authorize at their own
    /// boundary and reuse previously assigned event ids.
    pub async fn publish_envelope(&self, event: &Event) -> Result<u64, PublishError> {
        let bus = self
            .pool
            .get(&event.org_id)
            .await
            .ok_or_else(|| PublishError::Unavailable(format!("org '{}' offline", event.org_id)))?;

        let subject = event_subject(&event.org_id, &event.project_id, &event.topic);
        let payload = serde_json::to_vec(event)
            .map_err(|e| PublishError::Unavailable(format!("serialize: {}", e)))?;

        let sequence = bus
            .publish(&subject, &payload)
            .await
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;

        metrics::EVENTS_PUBLISHED
            .with_label_values(&[event.org_id.as_str()])
            .inc();

        debug!(
            "Published event {} on '{}' (seq {})",
            event.id, subject, sequence
        );

        Ok(sequence)
    }
}
