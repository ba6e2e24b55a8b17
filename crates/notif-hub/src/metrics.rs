/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Metrics Module
//!
//! This module provides Prometheus metrics for the notif hub: event
//! publishes, delivery outcomes, DLQ routing and connection health.

use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Global Prometheus registry for all hub metrics
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Events published to the bus
/// Labels: org
pub static EVENTS_PUBLISHED: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "notif_events_published_total",
        "Total number of events published by org",
    );
    let counter =
        CounterVec::new(opts, &["org"]).expect("Failed to create events published counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register events published counter");
    counter
});

/// Webhook delivery attempts
/// Labels: outcome (success, failed)
pub static WEBHOOK_DELIVERIES: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "notif_webhook_deliveries_total",
        "Total number of webhook delivery attempts by outcome",
    );
    let counter =
        CounterVec::new(opts, &["outcome"]).expect("Failed to create webhook deliveries counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register webhook deliveries counter");
    counter
});

/// Events routed to the DLQ
pub static DLQ_ROUTED: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "notif_dlq_routed_total",
        "Total number of events routed to the dead-letter queue",
    );
    let counter = IntCounter::with_opts(opts).expect("Failed to create DLQ counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register DLQ counter");
    counter
});

/// Policy denials
pub static POLICY_DENIALS: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "notif_policy_denials_total",
        "Total number of denied policy checks",
    );
    let counter = IntCounter::with_opts(opts).expect("Failed to create policy denials counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register policy denials counter");
    counter
});

/// Requests rejected by the rate limiter
pub static RATE_LIMITED: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "notif_rate_limited_total",
        "Total number of rate-limited requests",
    );
    let counter = IntCounter::with_opts(opts).expect("Failed to create rate limited counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register rate limited counter");
    counter
});

/// Connected org accounts
pub static CONNECTED_ORGS: Lazy<IntGauge> = Lazy::new(|| {
    let opts = Opts::new("notif_connected_orgs", "Number of connected org accounts");
    let gauge = IntGauge::with_opts(opts).expect("Failed to create connected orgs gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("Failed to register connected orgs gauge");
    gauge
});

/// Live WebSocket subscriptions
pub static WEBSOCKET_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    let opts = Opts::new(
        "notif_websocket_sessions",
        "Number of live WebSocket sessions",
    );
    let gauge = IntGauge::with_opts(opts).expect("Failed to create websocket sessions gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("Failed to register websocket sessions gauge");
    gauge
});

/// Encodes all registered metrics in Prometheus text format
///
/// # Returns
///
/// Returns a String containing all metrics in Prometheus exposition format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        EVENTS_PUBLISHED.with_label_values(&["acme"]).inc();
        DLQ_ROUTED.inc();

        let encoded = encode_metrics();
        assert!(encoded.contains("notif_events_published_total"));
        assert!(encoded.contains("notif_dlq_routed_total"));
    }
}
