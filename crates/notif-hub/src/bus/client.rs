/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! JetStream client — publish, streams, consumers, lookup and range queries.
//!
//! One `BusClient` wraps one authenticated NATS connection. The client pool
//! owns one per org plus one for the system account.

use std::time::Duration;

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, PullConsumer};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use notif_utils::logging::prelude::*;
use serde::de::DeserializeOwned;

use super::subject::subject_lists_overlap;
use super::{AckMode, BusError, ConsumerSpec, Result, StartPosition, Storage, StreamSpec};

/// A message read back from a stream by sequence or range query.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// The subject the message was published on.
    pub subject: String,
    /// The stream sequence.
    pub sequence: u64,
    /// The raw payload.
    pub payload: Vec<u8>,
    /// When the message was stored.
    pub time: DateTime<Utc>,
}

impl StoredMessage {
    /// Decodes the payload as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| BusError::PermanentData(format!("undecodable payload: {}", e)))
    }
}

/// A live message delivered to a consumer.
pub struct BusMessage {
    inner: jetstream::Message,
}

impl BusMessage {
    /// The subject the message was published on.
    pub fn subject(&self) -> &str {
        self.inner.subject.as_str()
    }

    /// The raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    /// Decodes the payload as JSON.
    ///
    /// Failures are permanent: the caller should `term` the message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.inner.payload)
            .map_err(|e| BusError::PermanentData(format!("undecodable payload: {}", e)))
    }

    /// How many times this message has been delivered (1 on first delivery).
    pub fn num_delivered(&self) -> i64 {
        self.inner.info().map(|i| i.delivered).unwrap_or(1)
    }

    /// The stream sequence of this message.
    pub fn sequence(&self) -> u64 {
        self.inner.info().map(|i| i.stream_sequence).unwrap_or(0)
    }

    /// Acknowledges the message.
    pub async fn ack(&self) -> Result<()> {
        self.inner
            .ack()
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    /// Negatively acknowledges the message, optionally delaying redelivery.
    pub async fn nak(&self, delay: Option<Duration>) -> Result<()> {
        self.inner
            .ack_with(jetstream::AckKind::Nak(delay))
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    /// Terminates the message: permanent failure, no redelivery.
    pub async fn term(&self) -> Result<()> {
        self.inner
            .ack_with(jetstream::AckKind::Term)
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }
}

/// A stream of delivered messages.
pub type MessageStream = futures::stream::BoxStream<'static, Result<BusMessage>>;

/// A pull consumer handle.
pub struct BusConsumer {
    inner: PullConsumer,
    filter: String,
}

impl BusConsumer {
    /// Starts consuming, returning an owned stream of messages.
    pub async fn messages(self) -> Result<MessageStream> {
        let filter = self.filter;
        let stream = self
            .inner
            .messages()
            .await
            .map_err(|e| BusError::Consumer(format!("{}: {}", filter, e)))?;

        Ok(stream
            .map(move |msg| {
                msg.map(|inner| BusMessage { inner })
                    .map_err(|e| BusError::Consumer(e.to_string()))
            })
            .boxed())
    }
}

/// JetStream client over one authenticated connection.
#[derive(Clone)]
pub struct BusClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl BusClient {
    /// Wraps an already-established NATS connection.
    pub fn new(client: async_nats::Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self { client, jetstream }
    }

    /// The underlying NATS client.
    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Publishes a payload, returning the stream sequence assigned to it.
    pub async fn publish(&self, subject: &str, payload: &[u8]) -> Result<u64> {
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_string(),
                reason: format!("ack failed: {}", e),
            })?;

        Ok(ack.sequence)
    }

    /// Creates or updates a named stream.
    ///
    /// Before creation, every existing stream's subject list is compared
    /// against the spec; an overlap with a differently-named stream is an
    /// error carrying the conflicting stream name so the operator can reuse
    /// it explicitly.
    pub async fn ensure_stream(&self, spec: &StreamSpec) -> Result<jetstream::stream::Stream> {
        if let Some(existing) = self.find_overlapping_stream(spec).await? {
            return Err(BusError::StreamOverlap {
                stream: spec.name.clone(),
                existing,
            });
        }

        let storage = match spec.storage {
            Storage::File => jetstream::stream::StorageType::File,
            Storage::Memory => jetstream::stream::StorageType::Memory,
        };

        let config = jetstream::stream::Config {
            name: spec.name.clone(),
            subjects: spec.subjects.clone(),
            storage,
            max_age: spec.max_age,
            max_bytes: spec.max_bytes,
            retention: jetstream::stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| BusError::Stream(format!("{}: {}", spec.name, e)))?;

        debug!("Stream '{}' ready ({:?})", spec.name, spec.subjects);

        Ok(stream)
    }

    /// Returns the name of an existing, differently-named stream whose
    /// subjects overlap the spec.
    async fn find_overlapping_stream(&self, spec: &StreamSpec) -> Result<Option<String>> {
        let mut names = self.jetstream.stream_names();

        while let Some(name) = names.next().await {
            let name = name.map_err(|e| BusError::Stream(e.to_string()))?;
            if name == spec.name {
                continue;
            }

            let stream = self
                .jetstream
                .get_stream(&name)
                .await
                .map_err(|e| BusError::Stream(format!("{}: {}", name, e)))?;

            if subject_lists_overlap(&spec.subjects, &stream.cached_info().config.subjects)
                .is_some()
            {
                return Ok(Some(name));
            }
        }

        Ok(None)
    }

    /// Looks up a stream by name.
    pub async fn stream(&self, name: &str) -> Result<jetstream::stream::Stream> {
        self.jetstream
            .get_stream(name)
            .await
            .map_err(|e| BusError::NotFound(format!("stream '{}': {}", name, e)))
    }

    /// Creates (or resumes) a consumer on a stream.
    pub async fn consumer(&self, stream_name: &str, spec: &ConsumerSpec) -> Result<BusConsumer> {
        let stream = self.stream(stream_name).await?;
        let config = build_pull_config(spec);
        let filter = spec.filter_subjects.join(",");

        let consumer = match &spec.durable_name {
            Some(name) => stream
                .get_or_create_consumer(name, config)
                .await
                .map_err(|e| {
                    BusError::Consumer(format!("durable '{}' on '{}': {}", name, stream_name, e))
                })?,
            None => stream.create_consumer(config).await.map_err(|e| {
                BusError::Consumer(format!("ephemeral on '{}': {}", stream_name, e))
            })?,
        };

        Ok(BusConsumer {
            inner: consumer,
            filter,
        })
    }

    /// Deletes a durable consumer.
    pub async fn delete_consumer(&self, stream_name: &str, consumer_name: &str) -> Result<()> {
        let stream = self.stream(stream_name).await?;
        stream
            .delete_consumer(consumer_name)
            .await
            .map_err(|e| BusError::Consumer(format!("delete '{}': {}", consumer_name, e)))?;
        Ok(())
    }

    /// Fetches a single stored message by stream sequence.
    ///
    /// Reads through an ephemeral by-start-sequence consumer; a deleted or
    /// never-assigned sequence reports `NotFound`.
    pub async fn get_by_seq(&self, stream_name: &str, seq: u64) -> Result<StoredMessage> {
        let stream = self.stream(stream_name).await?;

        let config = PullConfig {
            ack_policy: AckPolicy::None,
            deliver_policy: DeliverPolicy::ByStartSequence {
                start_sequence: seq,
            },
            ..Default::default()
        };

        let consumer = stream
            .create_consumer(config)
            .await
            .map_err(|e| BusError::Consumer(format!("lookup on '{}': {}", stream_name, e)))?;

        let batch = consumer
            .fetch()
            .max_messages(1)
            .expires(Duration::from_secs(2))
            .messages()
            .await
            .map_err(|e| BusError::Consumer(format!("fetch: {}", e)))?;

        let mut batch = std::pin::pin!(batch);
        if let Some(Ok(msg)) = batch.next().await {
            let (sequence, time) = match msg.info() {
                Ok(info) => (
                    info.stream_sequence,
                    offsetdatetime_to_chrono(info.published),
                ),
                Err(_) => (0, Utc::now()),
            };

            // By-start-sequence delivers the next retained message, which
            // differs from `seq` when the slot was deleted
            if sequence == seq {
                return Ok(StoredMessage {
                    subject: msg.subject.to_string(),
                    sequence,
                    payload: msg.payload.to_vec(),
                    time,
                });
            }
        }

        Err(BusError::NotFound(format!(
            "seq {} in '{}'",
            seq, stream_name
        )))
    }

    /// Deletes a single stored message by stream sequence.
    pub async fn delete_by_seq(&self, stream_name: &str, seq: u64) -> Result<()> {
        let stream = self.stream(stream_name).await?;
        stream
            .delete_message(seq)
            .await
            .map_err(|e| BusError::NotFound(format!("seq {} in '{}': {}", seq, stream_name, e)))?;
        Ok(())
    }

    /// The sequence bounds (first, last) of a stream.
    pub async fn sequence_bounds(&self, stream_name: &str) -> Result<(u64, u64)> {
        let mut stream = self.stream(stream_name).await?;
        let info = stream
            .info()
            .await
            .map_err(|e| BusError::Stream(format!("info '{}': {}", stream_name, e)))?;
        Ok((info.state.first_sequence, info.state.last_sequence))
    }

    /// Queries messages on a filter within a time range, oldest first.
    ///
    /// Uses an ephemeral by-start-time consumer; `limit` bounds the batch.
    pub async fn query_range(
        &self,
        stream_name: &str,
        filter: &str,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let stream = self.stream(stream_name).await?;

        let config = PullConfig {
            filter_subject: filter.to_string(),
            ack_policy: AckPolicy::None,
            deliver_policy: DeliverPolicy::ByStartTime {
                start_time: chrono_to_offsetdatetime(from),
            },
            ..Default::default()
        };

        let consumer = stream
            .create_consumer(config)
            .await
            .map_err(|e| BusError::Consumer(format!("range query on '{}': {}", stream_name, e)))?;

        let mut messages = Vec::with_capacity(limit);
        let batch = consumer
            .fetch()
            .max_messages(limit)
            .expires(Duration::from_secs(5))
            .messages()
            .await
            .map_err(|e| BusError::Consumer(format!("fetch: {}", e)))?;

        let mut batch = std::pin::pin!(batch);
        while let Some(msg) = batch.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Error fetching range message: {}", e);
                    break;
                }
            };

            let (sequence, time) = match msg.info() {
                Ok(info) => (
                    info.stream_sequence,
                    offsetdatetime_to_chrono(info.published),
                ),
                Err(_) => (0, Utc::now()),
            };

            if let Some(to) = to {
                if time > to {
                    break;
                }
            }

            messages.push(StoredMessage {
                subject: msg.subject.to_string(),
                sequence,
                payload: msg.payload.to_vec(),
                time,
            });

            if messages.len() >= limit {
                break;
            }
        }

        Ok(messages)
    }

    /// Purges all messages matching a subject filter from a stream.
    pub async fn purge_filter(&self, stream_name: &str, filter: &str) -> Result<u64> {
        let stream = self.stream(stream_name).await?;
        let response = stream
            .purge()
            .filter(filter)
            .await
            .map_err(|e| BusError::Stream(format!("purge '{}': {}", stream_name, e)))?;
        Ok(response.purged)
    }
}

/// Builds a JetStream pull consumer config from a ConsumerSpec.
fn build_pull_config(spec: &ConsumerSpec) -> PullConfig {
    let deliver_policy = match spec.start {
        StartPosition::All => DeliverPolicy::All,
        StartPosition::New => DeliverPolicy::New,
        StartPosition::ByStartTime(ts) => DeliverPolicy::ByStartTime {
            start_time: chrono_to_offsetdatetime(ts),
        },
        StartPosition::ByStartSeq(seq) => DeliverPolicy::ByStartSequence {
            start_sequence: seq,
        },
    };

    let ack_policy = match spec.ack_mode {
        AckMode::Auto => AckPolicy::None,
        AckMode::Explicit => AckPolicy::Explicit,
    };

    let mut config = PullConfig {
        durable_name: spec.durable_name.clone(),
        ack_policy,
        deliver_policy,
        ack_wait: spec.ack_wait,
        max_ack_pending: spec.max_ack_pending,
        ..Default::default()
    };

    if spec.max_deliver > 0 {
        config.max_deliver = spec.max_deliver;
    }

    // Single filters stay on the widely-supported field
    match spec.filter_subjects.len() {
        0 => {}
        1 => config.filter_subject = spec.filter_subjects[0].clone(),
        _ => config.filter_subjects = spec.filter_subjects.clone(),
    }

    config
}

fn chrono_to_offsetdatetime(ts: DateTime<Utc>) -> time::OffsetDateTime {
    time::OffsetDateTime::from_unix_timestamp(ts.timestamp())
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
        + time::Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
}

fn offsetdatetime_to_chrono(ts: time::OffsetDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.unix_timestamp(), ts.nanosecond()).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_pull_config_durable_explicit() {
        let spec = ConsumerSpec::new(vec!["events.acme.>".to_string()])
            .durable("webhook-primary-acme")
            .max_deliver(1);
        let config = build_pull_config(&spec);

        assert_eq!(config.durable_name.as_deref(), Some("webhook-primary-acme"));
        assert_eq!(config.filter_subject, "events.acme.>");
        assert!(config.filter_subjects.is_empty());
        assert_eq!(config.max_deliver, 1);
        assert!(matches!(config.ack_policy, AckPolicy::Explicit));
    }

    #[test]
    fn test_build_pull_config_multi_filter() {
        let spec = ConsumerSpec::new(vec![
            "events.acme.p.orders.*".to_string(),
            "events.acme.p.payments.>".to_string(),
        ]);
        let config = build_pull_config(&spec);

        assert!(config.filter_subject.is_empty());
        assert_eq!(config.filter_subjects.len(), 2);
    }

    #[test]
    fn test_build_pull_config_auto_ack() {
        let spec = ConsumerSpec::new(vec!["events.>".to_string()]).ack_mode(AckMode::Auto);
        let config = build_pull_config(&spec);
        assert!(matches!(config.ack_policy, AckPolicy::None));
    }

    #[test]
    fn test_build_pull_config_unlimited_deliveries() {
        let spec = ConsumerSpec::new(vec!["events.>".to_string()]).max_deliver(-1);
        let config = build_pull_config(&spec);
        // Unlimited stays at the serde default
        assert_eq!(config.max_deliver, PullConfig::default().max_deliver);
    }

    #[test]
    fn test_time_conversions_round_trip() {
        let now = Utc::now();
        let converted = offsetdatetime_to_chrono(chrono_to_offsetdatetime(now));
        let delta = (converted - now).num_milliseconds().abs();
        assert!(delta < 1, "round trip drifted by {}ms", delta);
    }
}
