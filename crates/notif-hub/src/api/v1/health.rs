/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Health and metrics endpoints.
//!
//! `/healthz` reports overall readiness: database reachability, the system
//! bus connection, and per-org account connection state. A degraded hub
//! serves 503 with the same body so operators see what is down.

use std::collections::HashMap;
use std::time::Duration;

use crate::api::AppState;
use crate::metrics;
use axum::http::StatusCode;
use axum::{extract::State, routing::get, Json, Router};
use notif_utils::logging::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// Budget for the database liveness probe.
const DB_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Health response body.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Everything below is up.
    pub healthy: bool,
    /// System bus connection state.
    pub system_bus: bool,
    /// Database reachability.
    pub database: bool,
    /// All org accounts connected.
    pub accounts: bool,
    /// Per-org connection state.
    pub account_status: HashMap<String, String>,
}

/// Creates and returns the router for health and metrics endpoints.
///
/// These routes skip authentication so probes and scrapers can reach them.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Healthy", body = HealthResponse),
        (status = 503, description = "Degraded", body = HealthResponse)
    ),
    tag = "health"
)]
/// Reports hub health.
pub async fn healthz(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let database = check_database(&state).await;
    let system_bus = state.pool.system_conn().nats_client().connection_state()
        == async_nats::connection::State::Connected;
    let disconnected = state.pool.disconnected_orgs().await;
    let accounts = disconnected.is_empty();
    let account_status = state.pool.account_status().await;

    let healthy = database && system_bus && accounts;

    let response = HealthResponse {
        healthy,
        system_bus,
        database,
        accounts,
        account_status,
    };

    if healthy {
        Ok(Json(response))
    } else {
        warn!(
            "Health check degraded (db: {}, bus: {}, disconnected orgs: {:?})",
            database, system_bus, disconnected
        );
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

/// Pings the database with a bounded budget.
pub async fn check_database(state: &AppState) -> bool {
    let dal = state.dal.clone();

    let probe = tokio::task::spawn_blocking(move || dal.pool.ping());

    match tokio::time::timeout(DB_PING_TIMEOUT, probe).await {
        Ok(Ok(up)) => up,
        _ => false,
    }
}

/// Serves Prometheus metrics in text exposition format.
pub async fn metrics_endpoint() -> String {
    metrics::encode_metrics()
}
