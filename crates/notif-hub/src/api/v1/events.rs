/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Events API module.
//!
//! Emission, stored-event lookup and delivery inspection. All routes are
//! tenant-scoped through the authenticated API key; stored events are read
//! back from the org's own bus account, so cross-tenant reads 404.

use crate::api::v1::middleware::AuthContext;
use crate::api::AppState;
use crate::bus::BusError;
use crate::metrics;
use crate::policy::Principal;
use crate::pool::EVENTS_STREAM;
use crate::publisher::PublishError;
use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use notif_models::models::event_deliveries::{EventDelivery, RECEIVER_TYPE_WEBHOOK};
use notif_models::models::events::Event;
use notif_utils::logging::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request body for emitting an event.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EmitRequest {
    /// Dotted topic, e.g. "orders.created".
    pub topic: String,
    /// Opaque JSON payload.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

/// Response for an emitted event.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EmitResponse {
    /// Assigned event id.
    pub id: Uuid,
    /// Echoed topic.
    pub topic: String,
    /// When the event was accepted.
    pub created_at: DateTime<Utc>,
}

/// One stored event with its stream position.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StoredEventResponse {
    /// Stream sequence.
    pub seq: u64,
    /// The event envelope.
    pub event: Event,
    /// When the bus stored the message.
    pub timestamp: DateTime<Utc>,
}

/// Response for the event listing.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventListResponse {
    pub events: Vec<StoredEventResponse>,
    pub count: usize,
}

/// Query parameters for listing events.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ListEventsQuery {
    /// Maximum events returned (default 50, cap 500).
    #[serde(default)]
    pub limit: Option<usize>,
    /// Only events stored at or after this time.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Only events stored at or before this time.
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(serde_json::json!({"error": message})))
}

// =============================================================================
// Routes
// =============================================================================

/// Creates and returns the router for event endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/emit", post(emit_event))
        .route("/events", get(list_events))
        // One param name per position: the bare segment is a stream
        // sequence, the deliveries segment is an event id
        .route("/events/:id", get(get_event))
        .route("/events/:id/deliveries", get(list_event_deliveries))
}

// =============================================================================
// Handlers
// =============================================================================

#[utoipa::path(
    post,
    path = "/api/v1/emit",
    request_body = EmitRequest,
    responses(
        (status = 200, description = "Event accepted", body = EmitResponse),
        (status = 400, description = "Invalid topic"),
        (status = 403, description = "Denied by policy"),
        (status = 429, description = "Rate limited"),
        (status = 503, description = "Bus unavailable")
    ),
    security(("api_key" = [])),
    tag = "events"
)]
/// Emits an event on the authenticated org/project.
pub async fn emit_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<EmitRequest>,
) -> Result<Json<EmitResponse>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();
    let project_id = auth
        .require_project()
        .map_err(|s| error(s, "API key required"))?;
    let api_key_id = auth.api_key_id.unwrap_or_default();

    if !state
        .ratelimit
        .check(&api_key_id.to_string(), auth.rate_limit)
    {
        metrics::RATE_LIMITED.inc();
        return Err(error(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"));
    }

    let principal = Principal::api_key(api_key_id.to_string());

    let event = state
        .publisher
        .publish(
            &org_id,
            &project_id.to_string(),
            &request.topic,
            request.data,
            &principal,
        )
        .await
        .map_err(|e| match e {
            PublishError::InvalidTopic(reason) => error(StatusCode::BAD_REQUEST, &reason),
            PublishError::Forbidden => error(StatusCode::FORBIDDEN, "Denied by policy"),
            PublishError::Unavailable(reason) => {
                error!("Publish unavailable for org '{}': {}", org_id, reason);
                error(StatusCode::SERVICE_UNAVAILABLE, "Bus unavailable")
            }
        })?;

    Ok(Json(EmitResponse {
        id: event.id,
        topic: event.topic,
        created_at: event.timestamp,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/events",
    responses(
        (status = 200, description = "Stored events, oldest first", body = EventListResponse)
    ),
    security(("api_key" = [])),
    tag = "events"
)]
/// Lists stored events for the authenticated org/project.
pub async fn list_events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<EventListResponse>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;
    let project_id = auth
        .require_project()
        .map_err(|s| error(s, "API key required"))?;

    let bus = state
        .pool
        .get(org_id)
        .await
        .ok_or_else(|| error(StatusCode::SERVICE_UNAVAILABLE, "Org connection unavailable"))?;

    let limit = query.limit.unwrap_or(50).min(500);
    let from = query
        .from
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_else(Utc::now));

    let filter = format!("events.{}.{}.>", org_id, project_id);
    let stored = bus
        .query_range(EVENTS_STREAM, &filter, from, query.to, limit)
        .await
        .map_err(|e| {
            error!("Event range query failed for org '{}': {}", org_id, e);
            error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to query events")
        })?;

    let events: Vec<StoredEventResponse> = stored
        .into_iter()
        .filter_map(|message| {
            message
                .decode::<Event>()
                .ok()
                .map(|event| StoredEventResponse {
                    seq: message.sequence,
                    event,
                    timestamp: message.time,
                })
        })
        .collect();

    let count = events.len();
    Ok(Json(EventListResponse { events, count }))
}

#[utoipa::path(
    get,
    path = "/api/v1/events/{seq}",
    params(("seq" = u64, Path, description = "Stream sequence")),
    responses(
        (status = 200, description = "The stored event", body = StoredEventResponse),
        (status = 404, description = "Not found or cross-tenant")
    ),
    security(("api_key" = [])),
    tag = "events"
)]
/// Fetches one stored event by stream sequence.
pub async fn get_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(seq): Path<u64>,
) -> Result<Json<StoredEventResponse>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    let bus = state
        .pool
        .get(org_id)
        .await
        .ok_or_else(|| error(StatusCode::SERVICE_UNAVAILABLE, "Org connection unavailable"))?;

    let stored = bus.get_by_seq(EVENTS_STREAM, seq).await.map_err(|e| match e {
        BusError::NotFound(_) => error(StatusCode::NOT_FOUND, "Event not found"),
        other => {
            error!("Event lookup failed: {}", other);
            error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch event")
        }
    })?;

    let event: Event = stored
        .decode()
        .map_err(|_| error(StatusCode::NOT_FOUND, "Event not found"))?;

    // The org account already isolates streams; this guards against
    // misconfigured single-account deployments.
    if event.org_id != org_id {
        return Err(error(StatusCode::NOT_FOUND, "Event not found"));
    }

    Ok(Json(StoredEventResponse {
        seq: stored.sequence,
        event,
        timestamp: stored.time,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/events/{id}/deliveries",
    params(("id" = Uuid, Path, description = "Event id")),
    responses(
        (status = 200, description = "Delivery records for the event", body = Vec<EventDelivery>)
    ),
    security(("api_key" = [])),
    tag = "events"
)]
/// Lists delivery records for an event.
pub async fn list_event_deliveries(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<EventDelivery>>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();

    let deliveries = state.dal.event_deliveries().list_for_event(id).map_err(|e| {
        error!("Failed to list deliveries for event {}: {:?}", id, e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list deliveries")
    })?;

    // Keep only rows that verifiably belong to the caller's org
    let ws_prefix = format!("ws-{}-", org_id);
    let deliveries: Vec<EventDelivery> = deliveries
        .into_iter()
        .filter(|delivery| {
            if delivery.receiver_type == RECEIVER_TYPE_WEBHOOK {
                delivery
                    .receiver_id
                    .map(|webhook_id| {
                        matches!(state.dal.webhooks().get(&org_id, webhook_id), Ok(Some(_)))
                    })
                    .unwrap_or(false)
            } else {
                delivery
                    .consumer_name
                    .as_deref()
                    .map(|name| name.starts_with(&ws_prefix))
                    .unwrap_or(false)
            }
        })
        .collect();

    Ok(Json(deliveries))
}
