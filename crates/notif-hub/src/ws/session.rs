/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Per-connection WebSocket session.
//!
//! A session owns a reader task (this module's `run`) and a writer task
//! joined by a bounded send channel, plus one bus-consumer task once the
//! client subscribes. Unacked messages are parked in a pending map keyed by
//! event id; a crash or close naks or dead-letters everything still parked,
//! so the bus can redeliver to another group member.
//!
//! When the send buffer overflows the frame is dropped and logged; the
//! connection is never closed for backpressure, because unacked bus messages
//! redeliver on their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use notif_models::models::event_deliveries::NewEventDelivery;
use notif_models::models::events::{DlqMessage, Event};
use notif_models::models::webhooks::validate_topic_pattern;
use notif_utils::logging::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::subject::{dlq_subject, event_subject};
use crate::bus::{BusClient, BusMessage, ConsumerSpec, StartPosition};
use crate::dal::DAL;
use crate::metrics;
use crate::policy::{Action, PolicyEnforcer, Principal};
use crate::pool::{ClientPool, EVENTS_STREAM};
use crate::ws::protocol::{
    ClientFrame, ErrorCode, ServerFrame, StartFrom, SubscribeOptions, DEFAULT_MAX_RETRIES,
    DEFAULT_NACK_DELAY_SECS,
};
use crate::ws::WsHub;

/// The client must produce some frame (pong included) within this window.
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Transport pings go out well inside the read deadline.
const PING_INTERVAL: Duration = Duration::from_secs(54);

/// Budget for consumer creation on subscribe.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default ack wait when the client sets no ack_timeout.
const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bounded send channel size, in frames.
    pub send_buffer: usize,
    /// Maximum unacknowledged bus messages in flight per consumer.
    pub max_ack_pending: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_buffer: 256,
            max_ack_pending: 1024,
        }
    }
}

/// A parked, not-yet-acknowledged delivery.
struct Pending {
    message: BusMessage,
    event: Event,
    attempt: i64,
}

/// State shared between the reader and the consumer task.
struct SubShared {
    /// event id → parked message.
    pending: Mutex<HashMap<Uuid, Pending>>,
    /// event id → delivery row, persisted across redeliveries.
    delivery_ids: Mutex<HashMap<Uuid, Uuid>>,
}

/// Everything the consumer task needs.
struct ConsumerCtx {
    dal: DAL,
    bus: BusClient,
    out: mpsc::Sender<ServerFrame>,
    shared: Arc<SubShared>,
    consumer_name: String,
    client_id: String,
    auto_ack: bool,
    max_retries: i32,
}

/// An established subscription.
struct Subscription {
    consumer_name: String,
    group: Option<String>,
    consumer_group: String,
    max_retries: i32,
    shared: Arc<SubShared>,
    task: JoinHandle<()>,
    bus: BusClient,
}

/// One live WebSocket connection.
pub struct WsSession {
    org_id: String,
    project_id: Uuid,
    principal: Principal,
    client_id: String,
    dal: DAL,
    pool: Arc<ClientPool>,
    policy: PolicyEnforcer,
    hub: Arc<WsHub>,
    config: SessionConfig,
}

impl WsSession {
    /// Creates a session for an authenticated upgrade.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        org_id: String,
        project_id: Uuid,
        principal: Principal,
        dal: DAL,
        pool: Arc<ClientPool>,
        policy: PolicyEnforcer,
        hub: Arc<WsHub>,
        config: SessionConfig,
    ) -> Self {
        Self {
            org_id,
            project_id,
            principal,
            client_id: Uuid::new_v4().simple().to_string(),
            dal,
            pool,
            policy,
            hub,
            config,
        }
    }

    /// Drives the connection until it closes.
    pub async fn run(self, socket: WebSocket) {
        self.hub.register(&self.client_id, &self.org_id);
        info!(
            "WS session {} opened (org '{}')",
            self.client_id, self.org_id
        );

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(self.config.send_buffer);

        // Writer: forwards frames and keeps the transport alive
        let writer_client = self.client_id.clone();
        let writer = tokio::spawn(async move {
            let mut pinger = tokio::time::interval(PING_INTERVAL);
            pinger.tick().await; // immediate first tick is not a ping

            loop {
                tokio::select! {
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(e) => {
                                error!("WS frame serialization failed: {}", e);
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    _ = pinger.tick() => {
                        if sink.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("WS writer for {} stopped", writer_client);
        });

        // Reader: frames drive the state machine
        let mut subscription: Option<Subscription> = None;

        loop {
            let frame = match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
                Err(_) => {
                    warn!("WS session {} missed the pong deadline", self.client_id);
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!("WS session {} read error: {}", self.client_id, e);
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => {
                    self.handle_text(&text, &out_tx, &mut subscription).await;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // Transport keepalive; the timeout reset is the handling
                }
                Message::Close(_) => break,
                Message::Binary(_) => {
                    send_error(&out_tx, ErrorCode::InvalidFrame, "binary frames not supported");
                }
            }
        }

        // CLEANUP: park nothing, lose nothing
        if let Some(subscription) = subscription.take() {
            self.cleanup(subscription).await;
        }

        drop(out_tx);
        let _ = writer.await;
        self.hub.unregister(&self.client_id);
        info!("WS session {} closed", self.client_id);
    }

    async fn handle_text(
        &self,
        text: &str,
        out: &mpsc::Sender<ServerFrame>,
        subscription: &mut Option<Subscription>,
    ) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                send_error(out, ErrorCode::InvalidFrame, &e.to_string());
                return;
            }
        };

        match frame {
            ClientFrame::Ping => {
                let _ = out.try_send(ServerFrame::Pong);
            }
            ClientFrame::Subscribe { topics, options } => {
                if subscription.is_some() {
                    send_error(out, ErrorCode::AlreadySubscribed, "subscription already open");
                    return;
                }
                match self.subscribe(topics, options, out).await {
                    Ok(sub) => *subscription = Some(sub),
                    Err((code, message)) => send_error(out, code, &message),
                }
            }
            ClientFrame::Ack { id } => match subscription {
                Some(sub) => self.handle_ack(sub, id, out).await,
                None => send_error(out, ErrorCode::NotSubscribed, "subscribe first"),
            },
            ClientFrame::Nack { id, retry_in } => match subscription {
                Some(sub) => self.handle_nack(sub, id, retry_in, out).await,
                None => send_error(out, ErrorCode::NotSubscribed, "subscribe first"),
            },
        }
    }

    /// Builds the durable consumer and starts the delivery task.
    async fn subscribe(
        &self,
        topics: Vec<String>,
        options: SubscribeOptions,
        out: &mpsc::Sender<ServerFrame>,
    ) -> Result<Subscription, (ErrorCode, String)> {
        if topics.is_empty() {
            return Err((ErrorCode::InvalidTopic, "no topics requested".to_string()));
        }

        for topic in &topics {
            validate_topic_pattern(topic).map_err(|e| (ErrorCode::InvalidTopic, e))?;

            let decision = self
                .policy
                .check(&self.org_id, &self.principal, topic, Action::Subscribe);
            if !decision.allowed {
                return Err((
                    ErrorCode::Forbidden,
                    format!("subscribe to '{}' denied by policy", topic),
                ));
            }
        }

        let bus = self.pool.get(&self.org_id).await.ok_or((
            ErrorCode::SubscribeFailed,
            "org connection unavailable".to_string(),
        ))?;

        let filters: Vec<String> = topics
            .iter()
            .map(|topic| event_subject(&self.org_id, &self.project_id.to_string(), topic))
            .collect();

        let group_label = options
            .group
            .as_deref()
            .map(sanitize_token)
            .unwrap_or_else(|| self.client_id.clone());
        let consumer_name = format!("ws-{}-{}", self.org_id, group_label);
        let max_retries = options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1);

        let start = match options.from {
            StartFrom::Latest => StartPosition::New,
            StartFrom::Beginning => StartPosition::All,
            StartFrom::Time(ts) => StartPosition::ByStartTime(ts),
        };

        let spec = ConsumerSpec::new(filters)
            .durable(&consumer_name)
            .max_deliver(i64::from(max_retries))
            .max_ack_pending(self.config.max_ack_pending)
            .ack_wait(
                options
                    .ack_timeout
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_ACK_WAIT),
            )
            .start(start);

        let consumer = tokio::time::timeout(SUBSCRIBE_TIMEOUT, bus.consumer(EVENTS_STREAM, &spec))
            .await
            .map_err(|_| {
                (
                    ErrorCode::SubscribeFailed,
                    "subscribe handshake timed out".to_string(),
                )
            })?
            .map_err(|e| (ErrorCode::SubscribeFailed, e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| (ErrorCode::SubscribeFailed, e.to_string()))?;

        let shared = Arc::new(SubShared {
            pending: Mutex::new(HashMap::new()),
            delivery_ids: Mutex::new(HashMap::new()),
        });

        let ctx = Arc::new(ConsumerCtx {
            dal: self.dal.clone(),
            bus: bus.clone(),
            out: out.clone(),
            shared: shared.clone(),
            consumer_name: consumer_name.clone(),
            client_id: self.client_id.clone(),
            auto_ack: options.auto_ack,
            max_retries,
        });

        let task = tokio::spawn(run_consumer(ctx, messages));

        let _ = out.try_send(ServerFrame::Subscribed {
            topics: topics.clone(),
            consumer_id: consumer_name.clone(),
        });

        info!(
            "WS session {} subscribed to {:?} as '{}'",
            self.client_id, topics, consumer_name
        );

        Ok(Subscription {
            consumer_group: format!("ws:{}", group_label),
            consumer_name,
            group: options.group,
            max_retries,
            shared,
            task,
            bus,
        })
    }

    async fn handle_ack(
        &self,
        sub: &Subscription,
        id: Uuid,
        out: &mpsc::Sender<ServerFrame>,
    ) {
        let pending = sub
            .shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&id);

        let Some(parked) = pending else {
            send_error(out, ErrorCode::UnknownEvent, &format!("no parked event {}", id));
            return;
        };

        if let Err(e) = parked.message.ack().await {
            warn!("Ack of event {} failed on the bus: {}", id, e);
        }

        if let Some(delivery_id) = delivery_id_for(&sub.shared, id) {
            if let Err(e) = self.dal.event_deliveries().mark_acked(delivery_id) {
                error!("Failed to mark delivery {} acked: {:?}", delivery_id, e);
            }
        }
    }

    async fn handle_nack(
        &self,
        sub: &Subscription,
        id: Uuid,
        retry_in: Option<u64>,
        out: &mpsc::Sender<ServerFrame>,
    ) {
        let pending = sub
            .shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&id);

        let Some(parked) = pending else {
            send_error(out, ErrorCode::UnknownEvent, &format!("no parked event {}", id));
            return;
        };

        if parked.attempt >= i64::from(sub.max_retries) {
            dlq_route(
                &self.dal,
                &sub.bus,
                &sub.consumer_group,
                &sub.shared,
                parked,
                "max retries exhausted (client nack)",
            )
            .await;
            return;
        }

        let delay = Duration::from_secs(retry_in.unwrap_or(DEFAULT_NACK_DELAY_SECS));
        if let Err(e) = parked.message.nak(Some(delay)).await {
            warn!("Nak of event {} failed on the bus: {}", id, e);
        }

        if let Some(delivery_id) = delivery_id_for(&sub.shared, id) {
            if let Err(e) = self
                .dal
                .event_deliveries()
                .mark_nacked(delivery_id, Some("client nack"))
            {
                error!("Failed to mark delivery {} nacked: {:?}", delivery_id, e);
            }
        }
    }

    /// Releases every parked message on close or crash.
    async fn cleanup(&self, sub: Subscription) {
        sub.task.abort();

        let parked: Vec<Pending> = {
            let mut pending = sub.shared.pending.lock().expect("pending lock poisoned");
            pending.drain().map(|(_, p)| p).collect()
        };

        let count = parked.len();
        for item in parked {
            if item.attempt >= i64::from(sub.max_retries) {
                dlq_route(
                    &self.dal,
                    &sub.bus,
                    &sub.consumer_group,
                    &sub.shared,
                    item,
                    "max retries exhausted (client disconnected)",
                )
                .await;
            } else {
                // Immediate nak: another group member can take over
                let event_id = item.event.id;
                if let Err(e) = item.message.nak(None).await {
                    debug!("Cleanup nak of event {} failed: {}", event_id, e);
                }
                if let Some(delivery_id) = delivery_id_for(&sub.shared, event_id) {
                    let _ = self
                        .dal
                        .event_deliveries()
                        .mark_nacked(delivery_id, Some("client disconnected"));
                }
            }
        }

        if count > 0 {
            info!(
                "WS session {} released {} parked message(s) on close",
                self.client_id, count
            );
        }

        // Solo durable consumers have no other members to resume them
        if sub.group.is_none() {
            if let Err(e) = sub
                .bus
                .delete_consumer(EVENTS_STREAM, &sub.consumer_name)
                .await
            {
                debug!("Consumer '{}' cleanup failed: {}", sub.consumer_name, e);
            }
        }
    }
}

/// The per-subscription consumer task.
async fn run_consumer(
    ctx: Arc<ConsumerCtx>,
    mut messages: impl futures::Stream<Item = crate::bus::Result<BusMessage>> + Unpin,
) {
    while let Some(message) = messages.next().await {
        match message {
            Ok(message) => deliver(&ctx, message).await,
            Err(e) => {
                warn!("WS consumer '{}' stream error: {}", ctx.consumer_name, e);
                break;
            }
        }
    }
    debug!("WS consumer '{}' stopped", ctx.consumer_name);
}

/// Handles one delivered bus message.
async fn deliver(ctx: &Arc<ConsumerCtx>, message: BusMessage) {
    let event: Event = match message.decode() {
        Ok(event) => event,
        Err(e) => {
            error!(
                "Terminating undecodable message on '{}': {}",
                ctx.consumer_name, e
            );
            let _ = message.term().await;
            return;
        }
    };

    let attempt = message.num_delivered();

    // First delivery creates the row; redeliveries flip it back to delivered
    let delivery_id = {
        let known = ctx
            .shared
            .delivery_ids
            .lock()
            .expect("delivery id lock poisoned")
            .get(&event.id)
            .copied();

        match known {
            Some(id) => {
                if let Err(e) = ctx
                    .dal
                    .event_deliveries()
                    .mark_redelivered(id, attempt as i32)
                {
                    error!("Failed to mark delivery {} redelivered: {:?}", id, e);
                }
                Some(id)
            }
            None => match ctx.dal.event_deliveries().create(&NewEventDelivery::websocket(
                event.id,
                ctx.consumer_name.clone(),
                ctx.client_id.clone(),
                attempt as i32,
            )) {
                Ok(row) => {
                    ctx.shared
                        .delivery_ids
                        .lock()
                        .expect("delivery id lock poisoned")
                        .insert(event.id, row.id);
                    Some(row.id)
                }
                Err(e) => {
                    error!("Failed to record WS delivery: {:?}", e);
                    None
                }
            },
        }
    };

    let frame = ServerFrame::Event {
        id: event.id,
        topic: event.topic.clone(),
        data: event.data.clone(),
        timestamp: event.timestamp,
        attempt,
        max_attempts: ctx.max_retries,
    };

    if ctx.auto_ack {
        match ctx.out.try_send(frame) {
            Ok(()) => {
                if let Err(e) = message.ack().await {
                    warn!("Auto-ack failed for event {}: {}", event.id, e);
                }
                if let Some(delivery_id) = delivery_id {
                    if let Err(e) = ctx.dal.event_deliveries().mark_acked(delivery_id) {
                        error!("Failed to mark delivery {} acked: {:?}", delivery_id, e);
                    }
                }
            }
            Err(_) => {
                // Not acked, so the bus will redeliver
                warn!(
                    "send buffer full, dropping event {} for '{}'",
                    event.id, ctx.consumer_name
                );
            }
        }
    } else {
        ctx.shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(
                event.id,
                Pending {
                    message,
                    event: event.clone(),
                    attempt,
                },
            );

        if ctx.out.try_send(frame).is_err() {
            // Parked and unacked; redelivery will retry the send
            warn!(
                "send buffer full, dropping event {} for '{}'",
                event.id, ctx.consumer_name
            );
        }
    }
}

/// Dead-letters a parked message and terminates it on the bus.
async fn dlq_route(
    dal: &DAL,
    bus: &BusClient,
    consumer_group: &str,
    shared: &Arc<SubShared>,
    parked: Pending,
    reason: &str,
) {
    let dlq = DlqMessage::from_event(&parked.event, consumer_group, parked.attempt as i32, reason);
    let subject = dlq_subject(&parked.event.org_id, consumer_group);

    match serde_json::to_vec(&dlq) {
        Ok(payload) => {
            if let Err(e) = bus.publish(&subject, &payload).await {
                error!(
                    "Failed to dead-letter event {}: {} (will redeliver)",
                    parked.event.id, e
                );
                // Leave the bus message unterminated so it redelivers
                let _ = parked.message.nak(None).await;
                return;
            }
        }
        Err(e) => {
            error!("Failed to serialize DLQ envelope: {}", e);
            return;
        }
    }

    if let Err(e) = parked.message.term().await {
        warn!("Term failed for event {}: {}", parked.event.id, e);
    }

    if let Some(delivery_id) = delivery_id_for(shared, parked.event.id) {
        if let Err(e) = dal.event_deliveries().mark_dlq(delivery_id, reason) {
            error!("Failed to mark delivery {} dlq: {:?}", delivery_id, e);
        }
    }

    metrics::DLQ_ROUTED.inc();

    warn!(
        "Event {} dead-lettered to '{}' after {} deliveries: {}",
        parked.event.id, subject, parked.attempt, reason
    );
}

fn delivery_id_for(shared: &Arc<SubShared>, event_id: Uuid) -> Option<Uuid> {
    shared
        .delivery_ids
        .lock()
        .expect("delivery id lock poisoned")
        .get(&event_id)
        .copied()
}

fn send_error(out: &mpsc::Sender<ServerFrame>, code: ErrorCode, message: &str) {
    let _ = out.try_send(ServerFrame::Error {
        code,
        message: message.to_string(),
    });
}

/// Restricts a client-supplied token to consumer-name-safe characters.
fn sanitize_token(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_token() {
        assert_eq!(sanitize_token("workers"), "workers");
        assert_eq!(sanitize_token("team a.b"), "team_a_b");
        assert_eq!(sanitize_token("x/../y"), "x____y");
    }

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.send_buffer, 256);
        assert_eq!(config.max_ack_pending, 1024);
    }
}
