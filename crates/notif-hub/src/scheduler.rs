/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Scheduled event worker.
//!
//! Polls for due pending rows, claims them with `FOR UPDATE SKIP LOCKED` and
//! publishes each as an event reusing the schedule row's id. The claiming
//! transaction stays open across the publish: if the worker dies mid-publish
//! the transaction aborts and the row stays `pending` for the next tick,
//! which makes a duplicate publish possible when the first publish succeeded
//! but the commit didn't; downstream consumers deduplicate on event id.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notif_models::models::audit_logs::{
    ACTION_SCHEDULE_EXECUTED, ACTOR_TYPE_SYSTEM, RESOURCE_TYPE_SCHEDULE,
};
use notif_models::models::events::Event;
use notif_models::models::scheduled_events::ScheduledEvent;
use notif_utils::logging::prelude::*;
use thiserror::Error;
use tokio::time::interval;
use uuid::Uuid;

use crate::dal::DAL;
use crate::publisher::EventPublisher;
use crate::utils::audit;

/// Errors from scheduler operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Schedule not found or not pending
    #[error("Schedule '{0}' not found or not pending")]
    NotFound(Uuid),

    /// Database failure
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Pool exhausted or unavailable
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Background task failure
    #[error("Worker task error: {0}")]
    Task(String),
}

/// Outcome of an immediate execution.
///
/// Distinguishes the three terminal states explicitly instead of collapsing
/// the post-publish bookkeeping failure into an error.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Published and marked completed.
    Published { event_id: Uuid },
    /// Publish failed; the row was marked failed.
    PublishFailed { error: String },
    /// Published, but the status update failed. The event exists; the row
    /// may be retried after a restart and produce a duplicate with the same
    /// event id.
    StatusUpdateFailed { event_id: Uuid },
}

/// Configuration for the scheduled worker.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Poll interval.
    pub poll_interval: Duration,
    /// Maximum rows claimed per tick.
    pub batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }
}

/// The scheduled event worker.
#[derive(Clone)]
pub struct ScheduledWorker {
    dal: DAL,
    publisher: EventPublisher,
    config: SchedulerConfig,
}

impl ScheduledWorker {
    /// Creates a worker.
    pub fn new(dal: DAL, publisher: EventPublisher, config: SchedulerConfig) -> Self {
        Self {
            dal,
            publisher,
            config,
        }
    }

    /// Starts the polling loop.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        info!(
            "Starting scheduled worker (interval: {:?}, batch: {})",
            self.config.poll_interval, self.config.batch_size
        );

        tokio::spawn(async move {
            let mut ticker = interval(self.config.poll_interval);

            loop {
                ticker.tick().await;

                match self.tick().await {
                    Ok(0) => {}
                    Ok(n) => debug!("Scheduled worker executed {} row(s)", n),
                    Err(e) => error!("Scheduled worker tick failed: {}", e),
                }
            }
        })
    }

    /// Claims and executes due rows. Returns the number of rows processed.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        let dal = self.dal.clone();
        let publisher = self.publisher.clone();
        let batch_size = self.config.batch_size;
        let handle = tokio::runtime::Handle::current();

        // The claim transaction spans the publishes, so the whole tick runs
        // on a blocking thread.
        tokio::task::spawn_blocking(move || {
            use diesel::prelude::*;

            let conn = &mut dal
                .pool
                .get()
                .map_err(|e| SchedulerError::Pool(e.to_string()))?;

            let processed = conn.transaction::<usize, diesel::result::Error, _>(|conn| {
                let rows = dal
                    .scheduled_events()
                    .claim_due(conn, Utc::now(), batch_size)?;

                let count = rows.len();
                for row in rows {
                    execute_claimed_row(&dal, &publisher, &handle, conn, &row)?;
                }
                Ok(count)
            })?;

            Ok(processed)
        })
        .await
        .map_err(|e| SchedulerError::Task(e.to_string()))?
    }

    /// Executes one schedule immediately, regardless of its due time.
    ///
    /// The row is claimed with the same lock as the polling path; a row
    /// already claimed, completed or cancelled reports `NotFound`.
    pub async fn execute_now(
        &self,
        org_id: &str,
        id: Uuid,
    ) -> Result<ExecutionOutcome, SchedulerError> {
        let dal = self.dal.clone();
        let publisher = self.publisher.clone();
        let org_id = org_id.to_string();
        let handle = tokio::runtime::Handle::current();

        tokio::task::spawn_blocking(move || {
            use diesel::prelude::*;

            let conn = &mut dal
                .pool
                .get()
                .map_err(|e| SchedulerError::Pool(e.to_string()))?;

            let outcome = conn
                .transaction::<Option<ExecutionOutcome>, diesel::result::Error, _>(|conn| {
                    let row = match dal.scheduled_events().claim_one(conn, &org_id, id)? {
                        Some(row) => row,
                        None => return Ok(None),
                    };
                    execute_claimed_row(&dal, &publisher, &handle, conn, &row).map(Some)
                })?;

            outcome.ok_or(SchedulerError::NotFound(id))
        })
        .await
        .map_err(|e| SchedulerError::Task(e.to_string()))?
    }
}

/// Publishes a claimed row and records the outcome on it.
///
/// Runs inside the claiming transaction; the caller owns commit/rollback.
fn execute_claimed_row(
    dal: &DAL,
    publisher: &EventPublisher,
    handle: &tokio::runtime::Handle,
    conn: &mut diesel::PgConnection,
    row: &ScheduledEvent,
) -> Result<ExecutionOutcome, diesel::result::Error> {
    let event = Event::with_id(
        row.id,
        &row.org_id,
        &row.project_id.to_string(),
        &row.topic,
        row.data.clone(),
    );

    match handle.block_on(publisher.publish_envelope(&event)) {
        Ok(sequence) => {
            let outcome = match dal
                .scheduled_events()
                .mark_completed(conn, row.id, Utc::now())
            {
                Ok(_) => ExecutionOutcome::Published { event_id: event.id },
                Err(e) => {
                    // The event is on the bus; never lose that fact
                    error!(
                        "Schedule {} published (seq {}) but status update failed: {}",
                        row.id, sequence, e
                    );
                    ExecutionOutcome::StatusUpdateFailed { event_id: event.id }
                }
            };

            audit::log_action(
                ACTOR_TYPE_SYSTEM,
                None,
                ACTION_SCHEDULE_EXECUTED,
                RESOURCE_TYPE_SCHEDULE,
                Some(row.id.to_string()),
                Some(serde_json::json!({
                    "org_id": row.org_id,
                    "topic": row.topic,
                    "seq": sequence,
                })),
                None,
            );

            Ok(outcome)
        }
        Err(e) => {
            warn!("Schedule {} publish failed: {}", row.id, e);
            dal.scheduled_events()
                .mark_failed(conn, row.id, &e.to_string())?;
            Ok(ExecutionOutcome::PublishFailed {
                error: e.to_string(),
            })
        }
    }
}
