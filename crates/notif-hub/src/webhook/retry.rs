/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Webhook retry scheduling.
//!
//! Failed attempts are queued as retry jobs on
//! `webhook-retry.<org>.<webhook_id>` with a fixed backoff table. Jobs carry
//! no secret or URL; both are refetched when the job fires. Attempts past the
//! table go to the DLQ under consumer group `webhook:<id>`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use notif_models::models::events::{Event, RetryJob};
use uuid::Uuid;

/// Fixed backoff between attempts.
pub const BACKOFF: [Duration; 5] = [
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(2 * 60),
    Duration::from_secs(10 * 60),
    Duration::from_secs(30 * 60),
];

/// Maximum delivery attempts per webhook and event.
pub const MAX_ATTEMPTS: i32 = 5;

/// The delay before attempt `next_attempt`, or None when the attempt budget
/// is exhausted and the event should be dead-lettered.
pub fn delay_before_attempt(next_attempt: i32) -> Option<Duration> {
    if next_attempt <= 1 || next_attempt > MAX_ATTEMPTS {
        return None;
    }
    // Attempt n waits behind the (n-1)th table entry
    Some(BACKOFF[(next_attempt - 2) as usize])
}

/// Builds the retry job for the attempt after a failure.
///
/// Returns None when the failed attempt was the last one.
pub fn next_job(
    webhook_id: Uuid,
    event: &Event,
    failed_attempt: i32,
    error: &str,
    delivery_id: Uuid,
    now: DateTime<Utc>,
) -> Option<RetryJob> {
    let next_attempt = failed_attempt + 1;
    let delay = delay_before_attempt(next_attempt)?;

    Some(RetryJob {
        webhook_id,
        event_id: event.id,
        org_id: event.org_id.clone(),
        project_id: event.project_id.clone(),
        topic: event.topic.clone(),
        data: event.data.clone(),
        timestamp: event.timestamp,
        attempt: next_attempt,
        last_error: error.to_string(),
        delivery_id,
        not_before: now + chrono::Duration::from_std(delay).unwrap_or_default(),
    })
}

/// The DLQ consumer group for a webhook.
pub fn consumer_group(webhook_id: Uuid) -> String {
    format!("webhook:{}", webhook_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_table() {
        assert_eq!(delay_before_attempt(2), Some(Duration::from_secs(10)));
        assert_eq!(delay_before_attempt(3), Some(Duration::from_secs(30)));
        assert_eq!(delay_before_attempt(4), Some(Duration::from_secs(120)));
        assert_eq!(delay_before_attempt(5), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_backoff_exhaustion() {
        assert_eq!(delay_before_attempt(6), None);
        assert_eq!(delay_before_attempt(1), None);
        assert_eq!(delay_before_attempt(0), None);
    }

    #[test]
    fn test_next_job_carries_no_secret_or_url() {
        let event = Event::new("acme", "proj", "payments.failed", serde_json::json!({"amount": 10}));
        let job = next_job(Uuid::new_v4(), &event, 1, "HTTP 500", Uuid::new_v4(), Utc::now()).unwrap();

        assert_eq!(job.attempt, 2);
        assert_eq!(job.event_id, event.id);
        assert_eq!(job.last_error, "HTTP 500");
        assert!(job.not_before > Utc::now());

        // The serialized job must not contain delivery credentials
        let serialized = serde_json::to_string(&job).unwrap();
        assert!(!serialized.contains("secret"));
        assert!(!serialized.contains("url"));
    }

    #[test]
    fn test_next_job_exhausted() {
        let event = Event::new("acme", "proj", "payments.failed", serde_json::json!({}));
        assert!(next_job(Uuid::new_v4(), &event, MAX_ATTEMPTS, "boom", Uuid::new_v4(), Utc::now()).is_none());
    }

    #[test]
    fn test_consumer_group_format() {
        let id = Uuid::new_v4();
        assert_eq!(consumer_group(id), format!("webhook:{}", id));
    }
}
