/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Webhook delivery: at-least-once HTTP fan-out with signed requests, fixed
//! backoff retries and per-tenant dead-lettering.

pub mod engine;
pub mod retry;
pub mod signature;
pub mod ssrf;

pub use engine::{WebhookConfig, WebhookEngine};
pub use ssrf::SsrfGuard;
