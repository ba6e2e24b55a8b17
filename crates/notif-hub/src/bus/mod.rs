/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Message bus abstraction over NATS JetStream.
//!
//! The rest of the hub depends only on this module's surface: publish with a
//! durable sequence, named streams with overlap checking, durable consumers
//! with ack semantics, point lookup by sequence and time-range queries.

pub mod client;
pub mod subject;

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use client::{BusClient, BusConsumer, BusMessage, StoredMessage};

/// Errors that can occur in the bus layer
#[derive(Debug, Error)]
pub enum BusError {
    /// Connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Stream creation or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// A new stream's subjects overlap an existing stream
    #[error("Stream '{stream}' overlaps existing stream '{existing}'")]
    StreamOverlap { stream: String, existing: String },

    /// Consumer creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Publish failure
    #[error("Failed to publish to subject '{subject}': {reason}")]
    Publish { subject: String, reason: String },

    /// Acknowledgement failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Message or stream not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unparseable message; terminate, never redeliver
    #[error("Permanent data error: {0}")]
    PermanentData(String),
}

/// Result type alias for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Storage backing for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    File,
    Memory,
}

/// Specification of a named append-only log.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    /// Stream name, e.g. "NOTIF_EVENTS".
    pub name: String,
    /// Subjects captured by the stream.
    pub subjects: Vec<String>,
    /// Maximum message age; `Duration::ZERO` means unlimited.
    pub max_age: Duration,
    /// Maximum stream size in bytes; -1 means unlimited.
    pub max_bytes: i64,
    /// Storage backing.
    pub storage: Storage,
}

impl StreamSpec {
    /// Creates a file-backed stream spec with unlimited size.
    pub fn new(name: &str, subjects: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            subjects,
            max_age: Duration::ZERO,
            max_bytes: -1,
            storage: Storage::File,
        }
    }

    /// Sets the maximum message age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets the maximum stream size in bytes.
    pub fn with_max_bytes(mut self, max_bytes: i64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// Acknowledgement policy for a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Messages are acknowledged implicitly on delivery.
    Auto,
    /// The handler must ack, nak or term every message.
    Explicit,
}

/// Where a consumer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Every message retained in the stream.
    All,
    /// Only messages published after the consumer was created.
    New,
    /// Messages published at or after the given time.
    ByStartTime(DateTime<Utc>),
    /// Messages at or after the given stream sequence.
    ByStartSeq(u64),
}

/// Specification of a (durable or ephemeral) consumer.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    /// Durable name; None creates an ephemeral consumer.
    pub durable_name: Option<String>,
    /// Subject filters; empty means the whole stream.
    pub filter_subjects: Vec<String>,
    /// Acknowledgement policy.
    pub ack_mode: AckMode,
    /// Maximum delivery attempts; <= 0 means unlimited.
    pub max_deliver: i64,
    /// How long the bus waits for an ack before redelivering.
    pub ack_wait: Duration,
    /// Maximum unacknowledged messages in flight.
    pub max_ack_pending: i64,
    /// Where to start reading.
    pub start: StartPosition,
}

impl ConsumerSpec {
    /// Creates an explicit-ack consumer spec with sensible defaults.
    pub fn new(filter_subjects: Vec<String>) -> Self {
        Self {
            durable_name: None,
            filter_subjects,
            ack_mode: AckMode::Explicit,
            max_deliver: -1,
            ack_wait: Duration::from_secs(30),
            max_ack_pending: 1024,
            start: StartPosition::All,
        }
    }

    /// Makes the consumer durable under the given name.
    pub fn durable(mut self, name: &str) -> Self {
        self.durable_name = Some(name.to_string());
        self
    }

    /// Sets the ack policy.
    pub fn ack_mode(mut self, mode: AckMode) -> Self {
        self.ack_mode = mode;
        self
    }

    /// Sets the maximum delivery attempts.
    pub fn max_deliver(mut self, max: i64) -> Self {
        self.max_deliver = max;
        self
    }

    /// Sets the ack wait.
    pub fn ack_wait(mut self, wait: Duration) -> Self {
        self.ack_wait = wait;
        self
    }

    /// Sets the maximum in-flight messages.
    pub fn max_ack_pending(mut self, max: i64) -> Self {
        self.max_ack_pending = max;
        self
    }

    /// Sets the start position.
    pub fn start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_spec_builder() {
        let spec = StreamSpec::new("NOTIF_EVENTS", vec!["events.>".to_string()])
            .with_max_age(Duration::from_secs(86400))
            .with_max_bytes(1 << 30);

        assert_eq!(spec.name, "NOTIF_EVENTS");
        assert_eq!(spec.max_age, Duration::from_secs(86400));
        assert_eq!(spec.max_bytes, 1 << 30);
        assert_eq!(spec.storage, Storage::File);
    }

    #[test]
    fn test_consumer_spec_builder() {
        let spec = ConsumerSpec::new(vec!["events.acme.>".to_string()])
            .durable("webhook-primary-acme")
            .max_deliver(1)
            .start(StartPosition::New);

        assert_eq!(spec.durable_name.as_deref(), Some("webhook-primary-acme"));
        assert_eq!(spec.max_deliver, 1);
        assert_eq!(spec.ack_mode, AckMode::Explicit);
        assert_eq!(spec.start, StartPosition::New);
    }
}
