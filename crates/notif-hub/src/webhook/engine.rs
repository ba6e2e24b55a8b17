/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Webhook delivery engine.
//!
//! Two consumers per org: the primary consumer reads `events.<org>.>` with
//! `max_deliver = 1` (the retry stream drives redelivery, not the bus) and
//! fans each event out to matching webhooks; the retry consumer reads
//! `webhook-retry.<org>.>` and replays attempts after their backoff. Per-hook
//! delivery order is not guaranteed: an event that fails moves to the retry
//! stream and later events may overtake it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use moka::sync::Cache;
use notif_models::models::audit_logs::{
    ACTION_EVENT_DLQ, ACTOR_TYPE_SYSTEM, RESOURCE_TYPE_EVENT,
};
use notif_models::models::event_deliveries::{NewEventDelivery, EVENT_DELIVERY_ACKED, EVENT_DELIVERY_DLQ};
use notif_models::models::events::{DlqMessage, Event, RetryJob};
use notif_models::models::webhooks::Webhook;
use notif_utils::logging::prelude::*;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::subject::{dlq_subject, subject_matches, webhook_retry_subject};
use crate::bus::{BusClient, BusError, BusMessage, ConsumerSpec};
use crate::dal::DAL;
use crate::metrics;
use crate::pool::{ClientPool, EVENTS_STREAM, WEBHOOK_RETRY_STREAM};
use crate::utils::audit;

use super::retry;
use super::signature;
use super::ssrf::{redirect_policy, SsrfGuard};

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Webhook list cache TTL.
    pub cache_ttl: Duration,
    /// Bounded pool of concurrent delivery workers.
    pub worker_pool_size: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(60),
            worker_pool_size: 16,
        }
    }
}

/// The webhook delivery engine.
pub struct WebhookEngine {
    dal: DAL,
    pool: Arc<ClientPool>,
    guard: SsrfGuard,
    http: reqwest::Client,
    cache: Cache<String, Arc<Vec<Webhook>>>,
    workers: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
    semaphore: Arc<Semaphore>,
}

impl WebhookEngine {
    /// Creates the engine.
    pub fn new(
        dal: DAL,
        pool: Arc<ClientPool>,
        guard: SsrfGuard,
        config: WebhookConfig,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(redirect_policy(guard.clone()))
            .build()
            .expect("Failed to build webhook HTTP client");

        Arc::new(Self {
            dal,
            pool,
            guard,
            http,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(config.cache_ttl)
                .build(),
            workers: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
        })
    }

    /// Starts the per-org consumer tasks.
    pub fn start_org(self: &Arc<Self>, org_id: &str) {
        let mut workers = self.workers.lock().expect("worker lock poisoned");
        if workers.contains_key(org_id) {
            return;
        }

        info!("Starting webhook workers for org '{}'", org_id);

        let primary = tokio::spawn(Self::run_primary(self.clone(), org_id.to_string()));
        let retry = tokio::spawn(Self::run_retry(self.clone(), org_id.to_string()));

        workers.insert(org_id.to_string(), vec![primary, retry]);
    }

    /// Stops the per-org consumer tasks.
    pub fn stop_org(&self, org_id: &str) {
        let handles = self
            .workers
            .lock()
            .expect("worker lock poisoned")
            .remove(org_id);

        if let Some(handles) = handles {
            info!("Stopping webhook workers for org '{}'", org_id);
            for handle in handles {
                handle.abort();
            }
        }
        self.cache.invalidate(org_id);
    }

    /// Stops all workers (shutdown path).
    pub fn stop_all(&self) {
        let mut workers = self.workers.lock().expect("worker lock poisoned");
        for (org_id, handles) in workers.drain() {
            debug!("Stopping webhook workers for org '{}'", org_id);
            for handle in handles {
                handle.abort();
            }
        }
    }

    /// Primary consumer loop for one org.
    async fn run_primary(self: Arc<Self>, org_id: String) {
        loop {
            let Some(bus) = self.pool.get(&org_id).await else {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            };

            let spec = ConsumerSpec::new(vec![format!("events.{}.>", org_id)])
                .durable(&format!("webhook-primary-{}", org_id))
                .max_deliver(1)
                .ack_wait(Duration::from_secs(60));

            if let Err(e) = self.consume(&bus, EVENTS_STREAM, spec, &org_id, false).await {
                warn!("Primary webhook consumer for '{}' stopped: {}", org_id, e);
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Retry consumer loop for one org.
    async fn run_retry(self: Arc<Self>, org_id: String) {
        loop {
            let Some(bus) = self.pool.get(&org_id).await else {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            };

            let spec = ConsumerSpec::new(vec![format!("webhook-retry.{}.>", org_id)])
                .durable(&format!("webhook-retry-{}", org_id))
                .max_deliver(1)
                .ack_wait(Duration::from_secs(45 * 60));

            if let Err(e) = self
                .consume(&bus, WEBHOOK_RETRY_STREAM, spec, &org_id, true)
                .await
            {
                warn!("Retry webhook consumer for '{}' stopped: {}", org_id, e);
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Runs one consumer until its message stream ends.
    async fn consume(
        self: &Arc<Self>,
        bus: &BusClient,
        stream: &str,
        spec: ConsumerSpec,
        org_id: &str,
        is_retry: bool,
    ) -> Result<(), BusError> {
        let consumer = bus.consumer(stream, &spec).await?;
        let mut messages = consumer.messages().await?;

        while let Some(message) = messages.next().await {
            let message = message?;
            if is_retry {
                self.handle_retry_message(bus.clone(), message);
            } else {
                self.handle_primary_message(bus, org_id, message).await;
            }
        }

        Ok(())
    }

    /// Handles one event from the primary consumer.
    async fn handle_primary_message(self: &Arc<Self>, bus: &BusClient, org_id: &str, message: BusMessage) {
        let event: Event = match message.decode() {
            Ok(event) => event,
            Err(e) => {
                // Unparseable payload never gets better; terminate it
                error!("Terminating undecodable event for org '{}': {}", org_id, e);
                if let Err(e) = message.term().await {
                    warn!("Term failed: {}", e);
                }
                return;
            }
        };

        self.fan_out(bus, &event).await;

        // We own the outcome now: rows exist and retries are queued
        if let Err(e) = message.ack().await {
            warn!("Primary ack failed for event {}: {}", event.id, e);
        }
    }

    /// Delivers an event to every matching webhook.
    async fn fan_out(self: &Arc<Self>, bus: &BusClient, event: &Event) {
        let webhooks = self.enabled_webhooks(&event.org_id);

        let matching: Vec<&Webhook> = webhooks
            .iter()
            .filter(|hook| {
                hook.topics
                    .iter()
                    .any(|pattern| subject_matches(pattern, &event.topic))
            })
            .collect();

        if matching.is_empty() {
            return;
        }

        debug!(
            "Event {} matches {} webhook(s) in org '{}'",
            event.id,
            matching.len(),
            event.org_id
        );

        let attempts = matching.iter().map(|hook| {
            let engine = self.clone();
            let bus = bus.clone();
            let hook = (*hook).clone();
            let event = event.clone();
            async move {
                let _permit = engine.semaphore.acquire().await;
                engine.attempt_delivery(&bus, &hook, &event, 1).await;
            }
        });

        futures::future::join_all(attempts).await;
    }

    /// Enabled webhooks for an org, cached for the configured TTL.
    fn enabled_webhooks(&self, org_id: &str) -> Arc<Vec<Webhook>> {
        self.cache.get_with(org_id.to_string(), || {
            match self.dal.webhooks().list(org_id, true) {
                Ok(hooks) => Arc::new(hooks),
                Err(e) => {
                    error!("Failed to load webhooks for org '{}': {:?}", org_id, e);
                    Arc::new(Vec::new())
                }
            }
        })
    }

    /// Makes one delivery attempt and records the outcome.
    async fn attempt_delivery(
        self: &Arc<Self>,
        bus: &BusClient,
        webhook: &Webhook,
        event: &Event,
        attempt: i32,
    ) {
        let delivery = match self.dal.webhook_deliveries().create(
            &notif_models::models::webhooks::NewWebhookDelivery::new(
                webhook.id,
                event.id,
                event.topic.clone(),
                attempt,
            ),
        ) {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(
                    "Failed to record delivery for webhook {} event {}: {:?}",
                    webhook.id, event.id, e
                );
                return;
            }
        };

        match self.post(webhook, event).await {
            Ok((status, body)) => {
                if let Err(e) = self
                    .dal
                    .webhook_deliveries()
                    .mark_success(delivery.id, status, &body)
                {
                    error!("Failed to mark delivery {} success: {:?}", delivery.id, e);
                }
                if let Err(e) = self.dal.event_deliveries().create(
                    &NewEventDelivery::webhook(event.id, webhook.id, EVENT_DELIVERY_ACKED, attempt),
                ) {
                    error!("Failed to record event delivery: {:?}", e);
                }

                metrics::WEBHOOK_DELIVERIES
                    .with_label_values(&["success"])
                    .inc();

                debug!(
                    "Delivered event {} to webhook {} (attempt {}, HTTP {})",
                    event.id, webhook.id, attempt, status
                );
            }
            Err(failure) => {
                if let Err(e) = self.dal.webhook_deliveries().mark_failed(
                    delivery.id,
                    failure.status,
                    failure.body.as_deref(),
                    &failure.error,
                ) {
                    error!("Failed to mark delivery {} failed: {:?}", delivery.id, e);
                }

                metrics::WEBHOOK_DELIVERIES
                    .with_label_values(&["failed"])
                    .inc();

                warn!(
                    "Webhook {} attempt {} for event {} failed: {}",
                    webhook.id, attempt, event.id, failure.error
                );

                self.schedule_retry_or_dlq(bus, webhook.id, event, attempt, &failure.error, delivery.id)
                    .await;
            }
        }
    }

    /// POSTs the signed request. Returns (status, truncated body) on 2xx.
    async fn post(&self, webhook: &Webhook, event: &Event) -> Result<(i32, String), Failure> {
        // Resolve and vet every address before dialing
        let url = self
            .guard
            .check_url(&webhook.url)
            .await
            .map_err(|reason| Failure::transport(format!("SSRF guard: {}", reason)))?;

        let body = serde_json::to_vec(&serde_json::json!({
            "id": event.id,
            "topic": event.topic,
            "data": event.data,
            "timestamp": event.timestamp,
        }))
        .map_err(|e| Failure::transport(format!("serialize: {}", e)))?;

        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header(signature::EVENT_ID_HEADER, event.id.to_string())
            .header(signature::TOPIC_HEADER, event.topic.clone())
            .header(
                signature::SIGNATURE_HEADER,
                signature::sign(&webhook.secret, &body),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| Failure::transport(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            Ok((status.as_u16() as i32, text))
        } else {
            Err(Failure {
                error: format!("HTTP {}", status.as_u16()),
                status: Some(status.as_u16() as i32),
                body: Some(text),
            })
        }
    }

    /// Queues the next retry, or routes to the DLQ when attempts are spent.
    async fn schedule_retry_or_dlq(
        self: &Arc<Self>,
        bus: &BusClient,
        webhook_id: Uuid,
        event: &Event,
        failed_attempt: i32,
        error: &str,
        delivery_id: Uuid,
    ) {
        match retry::next_job(webhook_id, event, failed_attempt, error, delivery_id, Utc::now()) {
            Some(job) => {
                let subject =
                    webhook_retry_subject(&event.org_id, &webhook_id.to_string());
                match serde_json::to_vec(&job) {
                    Ok(payload) => {
                        if let Err(e) = bus.publish(&subject, &payload).await {
                            error!(
                                "Failed to queue retry for webhook {} event {}: {}",
                                webhook_id, event.id, e
                            );
                        } else {
                            debug!(
                                "Queued attempt {} for webhook {} event {} (due {})",
                                job.attempt, webhook_id, event.id, job.not_before
                            );
                        }
                    }
                    Err(e) => error!("Failed to serialize retry job: {}", e),
                }
            }
            None => {
                self.dlq_route(bus, webhook_id, event, failed_attempt, error)
                    .await;
            }
        }
    }

    /// Publishes the DLQ envelope and records the terminal delivery state.
    async fn dlq_route(
        self: &Arc<Self>,
        bus: &BusClient,
        webhook_id: Uuid,
        event: &Event,
        attempts: i32,
        error: &str,
    ) {
        let group = retry::consumer_group(webhook_id);
        let message = DlqMessage::from_event(event, &group, attempts, error);
        let subject = dlq_subject(&event.org_id, &group);

        match serde_json::to_vec(&message) {
            Ok(payload) => {
                if let Err(e) = bus.publish(&subject, &payload).await {
                    error!(
                        "Failed to dead-letter event {} for webhook {}: {}",
                        event.id, webhook_id, e
                    );
                    return;
                }
            }
            Err(e) => {
                error!("Failed to serialize DLQ envelope: {}", e);
                return;
            }
        }

        if let Err(e) = self.dal.event_deliveries().create(&NewEventDelivery::webhook(
            event.id,
            webhook_id,
            EVENT_DELIVERY_DLQ,
            attempts,
        )) {
            error!("Failed to record DLQ delivery: {:?}", e);
        }

        metrics::DLQ_ROUTED.inc();

        audit::log_action(
            ACTOR_TYPE_SYSTEM,
            None,
            ACTION_EVENT_DLQ,
            RESOURCE_TYPE_EVENT,
            Some(event.id.to_string()),
            Some(serde_json::json!({
                "org_id": event.org_id,
                "consumer_group": group,
                "attempts": attempts,
                "last_error": error,
            })),
            None,
        );

        warn!(
            "Event {} dead-lettered for webhook {} after {} attempts: {}",
            event.id, webhook_id, attempts, error
        );
    }

    /// Handles one retry job: waits out the backoff, then re-attempts.
    fn handle_retry_message(self: &Arc<Self>, bus: BusClient, message: BusMessage) {
        let engine = self.clone();

        tokio::spawn(async move {
            let job: RetryJob = match message.decode() {
                Ok(job) => job,
                Err(e) => {
                    error!("Terminating undecodable retry job: {}", e);
                    let _ = message.term().await;
                    return;
                }
            };

            let _permit = engine.semaphore.acquire().await;

            // Honor the backoff embedded in the job
            let wait = (job.not_before - Utc::now()).to_std().unwrap_or_default();
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            engine.process_retry(&bus, &job).await;

            if let Err(e) = message.ack().await {
                warn!("Retry ack failed for event {}: {}", job.event_id, e);
            }
        });
    }

    /// Re-attempts a delivery from a retry job.
    ///
    /// URL and secret come from the database, not the job, so rotations and
    /// disables take effect between attempts.
    async fn process_retry(self: &Arc<Self>, bus: &BusClient, job: &RetryJob) {
        let webhook = match self.dal.webhooks().get_unscoped(job.webhook_id) {
            Ok(Some(webhook)) if webhook.enabled => webhook,
            Ok(_) => {
                info!(
                    "Dropping retry for webhook {}: deleted or disabled",
                    job.webhook_id
                );
                return;
            }
            Err(e) => {
                error!("Failed to load webhook {}: {:?}", job.webhook_id, e);
                // Treat as a failed attempt so the event still ends up in
                // the DLQ instead of vanishing
                let event = job.to_event();
                self.schedule_retry_or_dlq(
                    bus,
                    job.webhook_id,
                    &event,
                    job.attempt,
                    "webhook lookup failed",
                    job.delivery_id,
                )
                .await;
                return;
            }
        };

        let event = job.to_event();
        self.attempt_delivery(bus, &webhook, &event, job.attempt).await;
    }
}

/// A failed delivery attempt.
struct Failure {
    error: String,
    status: Option<i32>,
    body: Option<String>,
}

impl Failure {
    fn transport(error: String) -> Self {
        Self {
            error,
            status: None,
            body: None,
        }
    }
}
