/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # API Module
//!
//! This module is responsible for setting up and configuring the HTTP server
//! for the notif hub. The versioned API lives under `/api/v1`; the WebSocket
//! upgrade, health and metrics endpoints sit at the root.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dal::DAL;
use crate::dlq::DlqManager;
use crate::policy::PolicyEnforcer;
use crate::pool::ClientPool;
use crate::provisioner::Provisioner;
use crate::publisher::EventPublisher;
use crate::scheduler::ScheduledWorker;
use crate::utils::ratelimit::RateLimiter;
use crate::webhook::WebhookEngine;
use crate::ws::{SessionConfig, WsHub};

pub mod v1;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub dal: DAL,
    pub pool: Arc<ClientPool>,
    pub publisher: EventPublisher,
    pub scheduler: Arc<ScheduledWorker>,
    pub dlq: DlqManager,
    pub policy: PolicyEnforcer,
    pub ratelimit: RateLimiter,
    pub provisioner: Arc<Provisioner>,
    pub webhook_engine: Arc<WebhookEngine>,
    pub ws_hub: Arc<WsHub>,
    pub ws_config: SessionConfig,
}

/// Configures all API routes for the application.
///
/// # Arguments
///
/// * `state` - The shared application state.
///
/// # Returns
///
/// The fully assembled router.
pub fn configure_api_routes(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", v1::routes(state.clone()))
        .merge(v1::ws::routes(state.clone()))
        .merge(v1::health::routes())
        .merge(v1::openapi::configure_openapi())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
