/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Dead-letter queue management.
//!
//! Each org's exhausted deliveries live on `dlq.<org>.<consumer_group>`
//! subjects inside the org account's `NOTIF_DLQ` stream. Operators can list,
//! replay and purge them. A replayed message is deleted only after the
//! republish succeeded, so a failed replay leaves the DLQ untouched.

use std::sync::Arc;

use notif_models::models::audit_logs::{
    ACTION_DLQ_PURGE, ACTION_DLQ_REPLAY, ACTOR_TYPE_ADMIN, RESOURCE_TYPE_DLQ,
};
use notif_models::models::events::DlqMessage;
use notif_utils::logging::prelude::*;
use thiserror::Error;

use crate::bus::BusError;
use crate::pool::{ClientPool, DLQ_STREAM};
use crate::publisher::{EventPublisher, PublishError};
use crate::utils::audit;

/// Errors from DLQ operations
#[derive(Debug, Error)]
pub enum DlqError {
    /// The org has no live connection
    #[error("Org '{0}' offline")]
    OrgOffline(String),

    /// Message not found at the given sequence
    #[error("No DLQ message at sequence {0}")]
    NotFound(u64),

    /// Bus-level failure
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Replay publish failed; the DLQ message was kept
    #[error("Replay failed: {0}")]
    Replay(#[from] PublishError),
}

/// A listed DLQ entry.
#[derive(Debug, Clone)]
pub struct DlqEntry {
    /// Stream sequence; the handle for replay and delete.
    pub sequence: u64,
    /// The dead-lettered envelope.
    pub message: DlqMessage,
}

/// The DLQ manager.
#[derive(Clone)]
pub struct DlqManager {
    pool: Arc<ClientPool>,
    publisher: EventPublisher,
}

impl DlqManager {
    /// Creates a DLQ manager.
    pub fn new(pool: Arc<ClientPool>, publisher: EventPublisher) -> Self {
        Self { pool, publisher }
    }

    /// Lists an org's DLQ messages, newest first.
    pub async fn list(
        &self,
        org_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DlqEntry>, DlqError> {
        let bus = self
            .pool
            .get(org_id)
            .await
            .ok_or_else(|| DlqError::OrgOffline(org_id.to_string()))?;

        let (first, last) = bus.sequence_bounds(DLQ_STREAM).await?;

        let mut entries = Vec::with_capacity(limit.min(256));
        let mut skipped = 0;
        let mut seq = last;

        while seq >= first && seq > 0 && entries.len() < limit {
            match bus.get_by_seq(DLQ_STREAM, seq).await {
                Ok(stored) => match stored.decode::<DlqMessage>() {
                    Ok(message) => {
                        if skipped < offset {
                            skipped += 1;
                        } else {
                            entries.push(DlqEntry {
                                sequence: stored.sequence,
                                message,
                            });
                        }
                    }
                    Err(e) => {
                        warn!("Skipping undecodable DLQ message at seq {}: {}", seq, e);
                    }
                },
                // Gaps from deletes and replays are expected
                Err(BusError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            seq -= 1;
        }

        Ok(entries)
    }

    /// Replays one DLQ message to its original subject.
    ///
    /// The message is deleted only after the republish succeeds; otherwise it
    /// stays for another attempt (at-least-once redelivery to the bus).
    pub async fn replay(&self, org_id: &str, seq: u64) -> Result<DlqMessage, DlqError> {
        let bus = self
            .pool
            .get(org_id)
            .await
            .ok_or_else(|| DlqError::OrgOffline(org_id.to_string()))?;

        let stored = bus
            .get_by_seq(DLQ_STREAM, seq)
            .await
            .map_err(|_| DlqError::NotFound(seq))?;

        let mut message: DlqMessage = stored.decode()?;
        message.replays += 1;

        let event = message.to_event();
        self.publisher.publish_envelope(&event).await?;

        // Publish succeeded; the DLQ copy can go
        bus.delete_by_seq(DLQ_STREAM, seq).await?;

        audit::log_action(
            ACTOR_TYPE_ADMIN,
            None,
            ACTION_DLQ_REPLAY,
            RESOURCE_TYPE_DLQ,
            Some(message.id.to_string()),
            Some(serde_json::json!({
                "org_id": org_id,
                "seq": seq,
                "topic": message.original_topic,
                "replays": message.replays,
            })),
            None,
        );

        info!(
            "Replayed DLQ message {} for org '{}' (seq {}, replay #{})",
            message.id, org_id, seq, message.replays
        );

        Ok(message)
    }

    /// Replays every DLQ message for an org.
    ///
    /// Per-item failures are collected; the iteration continues.
    pub async fn replay_all(&self, org_id: &str) -> Result<(usize, Vec<String>), DlqError> {
        let entries = self.list(org_id, usize::MAX >> 1, 0).await?;

        let mut replayed = 0;
        let mut errors = Vec::new();

        for entry in entries {
            match self.replay(org_id, entry.sequence).await {
                Ok(_) => replayed += 1,
                Err(e) => errors.push(format!("seq {}: {}", entry.sequence, e)),
            }
        }

        Ok((replayed, errors))
    }

    /// Deletes one DLQ message without replaying it.
    pub async fn delete(&self, org_id: &str, seq: u64) -> Result<(), DlqError> {
        let bus = self
            .pool
            .get(org_id)
            .await
            .ok_or_else(|| DlqError::OrgOffline(org_id.to_string()))?;

        bus.delete_by_seq(DLQ_STREAM, seq)
            .await
            .map_err(|_| DlqError::NotFound(seq))?;
        Ok(())
    }

    /// Purges an org's entire DLQ.
    pub async fn purge(&self, org_id: &str) -> Result<u64, DlqError> {
        let bus = self
            .pool
            .get(org_id)
            .await
            .ok_or_else(|| DlqError::OrgOffline(org_id.to_string()))?;

        let purged = bus
            .purge_filter(DLQ_STREAM, &format!("dlq.{}.>", org_id))
            .await?;

        audit::log_action(
            ACTOR_TYPE_ADMIN,
            None,
            ACTION_DLQ_PURGE,
            RESOURCE_TYPE_DLQ,
            None,
            Some(serde_json::json!({"org_id": org_id, "purged": purged})),
            None,
        );

        info!("Purged {} DLQ messages for org '{}'", purged, org_id);

        Ok(purged)
    }
}
