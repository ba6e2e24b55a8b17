/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Schedules API module.
//!
//! Deferred publication: a schedule is a row the worker claims and publishes
//! at its due time. `run` executes immediately through the same claim path.

use crate::api::v1::middleware::AuthContext;
use crate::api::AppState;
use crate::bus::subject::validate_topic;
use crate::policy::{Action, Principal};
use crate::scheduler::{ExecutionOutcome, SchedulerError};
use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use notif_models::models::audit_logs::{
    ACTION_SCHEDULE_CANCELLED, ACTION_SCHEDULE_CREATED, ACTOR_TYPE_API_KEY,
    RESOURCE_TYPE_SCHEDULE,
};
use notif_models::models::scheduled_events::{NewScheduledEvent, ScheduledEvent};
use notif_utils::logging::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::audit;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request body for creating a schedule.
///
/// Exactly one of `scheduled_for` (absolute RFC3339) or `in` (relative
/// seconds) must be set.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateScheduleRequest {
    /// Topic to publish on.
    pub topic: String,
    /// Event payload.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    /// Absolute execution time.
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Relative execution time in seconds from now.
    #[serde(default, rename = "in")]
    pub in_seconds: Option<u64>,
}

/// Response for an immediate execution.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunResponse {
    /// The executed schedule id (also the event id).
    pub id: Uuid,
    /// Terminal status of the run.
    pub status: String,
    /// Error detail when the publish failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Query parameters for listing schedules.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ListSchedulesQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(serde_json::json!({"error": message})))
}

// =============================================================================
// Routes
// =============================================================================

/// Creates and returns the router for schedule endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/schedules", post(create_schedule))
        .route("/schedules", get(list_schedules))
        .route("/schedules/:id", get(get_schedule))
        .route("/schedules/:id", delete(cancel_schedule))
        .route("/schedules/:id/run", post(run_schedule))
}

// =============================================================================
// Handlers
// =============================================================================

#[utoipa::path(
    post,
    path = "/api/v1/schedules",
    request_body = CreateScheduleRequest,
    responses(
        (status = 200, description = "Schedule created", body = ScheduledEvent),
        (status = 400, description = "Invalid topic or time"),
        (status = 403, description = "Denied by policy")
    ),
    security(("api_key" = [])),
    tag = "schedules"
)]
/// Creates a deferred publication.
pub async fn create_schedule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<Json<ScheduledEvent>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();
    let project_id = auth
        .require_project()
        .map_err(|s| error(s, "API key required"))?;

    validate_topic(&request.topic).map_err(|e| error(StatusCode::BAD_REQUEST, &e))?;

    let scheduled_for = match (request.scheduled_for, request.in_seconds) {
        (Some(at), None) => at,
        (None, Some(seconds)) => Utc::now() + chrono::Duration::seconds(seconds as i64),
        _ => {
            return Err(error(
                StatusCode::BAD_REQUEST,
                "Exactly one of 'scheduled_for' or 'in' is required",
            ))
        }
    };

    // Authorization happens here; the worker publishes without re-checking
    let principal = Principal::api_key(auth.api_key_id.unwrap_or_default().to_string());
    let decision = state
        .policy
        .check(&org_id, &principal, &request.topic, Action::Publish);
    if !decision.allowed {
        return Err(error(StatusCode::FORBIDDEN, "Denied by policy"));
    }

    let new_schedule = NewScheduledEvent::new(
        org_id.clone(),
        project_id,
        request.topic,
        request.data,
        scheduled_for,
    )
    .map_err(|e| error(StatusCode::BAD_REQUEST, &e))?;

    let schedule = state.dal.scheduled_events().create(&new_schedule).map_err(|e| {
        error!("Failed to create schedule: {:?}", e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create schedule")
    })?;

    audit::log_action(
        ACTOR_TYPE_API_KEY,
        auth.api_key_id,
        ACTION_SCHEDULE_CREATED,
        RESOURCE_TYPE_SCHEDULE,
        Some(schedule.id.to_string()),
        Some(serde_json::json!({
            "org_id": org_id,
            "topic": schedule.topic,
            "scheduled_for": schedule.scheduled_for,
        })),
        None,
    );

    Ok(Json(schedule))
}

#[utoipa::path(
    get,
    path = "/api/v1/schedules",
    responses(
        (status = 200, description = "The org's schedules, soonest first", body = Vec<ScheduledEvent>)
    ),
    security(("api_key" = [])),
    tag = "schedules"
)]
/// Lists the org's schedules.
pub async fn list_schedules(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListSchedulesQuery>,
) -> Result<Json<Vec<ScheduledEvent>>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    state
        .dal
        .scheduled_events()
        .list(org_id, limit, offset)
        .map(Json)
        .map_err(|e| {
            error!("Failed to list schedules: {:?}", e);
            error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list schedules")
        })
}

#[utoipa::path(
    get,
    path = "/api/v1/schedules/{id}",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "The schedule", body = ScheduledEvent),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = [])),
    tag = "schedules"
)]
/// Fetches one schedule.
pub async fn get_schedule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduledEvent>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    match state.dal.scheduled_events().get(org_id, id) {
        Ok(Some(schedule)) => Ok(Json(schedule)),
        Ok(None) => Err(error(StatusCode::NOT_FOUND, "Schedule not found")),
        Err(e) => {
            error!("Failed to fetch schedule {}: {:?}", id, e);
            Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch schedule"))
        }
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/schedules/{id}",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 204, description = "Cancelled"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Not pending")
    ),
    security(("api_key" = [])),
    tag = "schedules"
)]
/// Cancels a pending schedule.
pub async fn cancel_schedule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();

    match state.dal.scheduled_events().get(&org_id, id) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(error(StatusCode::NOT_FOUND, "Schedule not found")),
        Err(e) => {
            error!("Failed to fetch schedule {}: {:?}", id, e);
            return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch schedule"));
        }
    }

    let cancelled = state.dal.scheduled_events().cancel(&org_id, id).map_err(|e| {
        error!("Failed to cancel schedule {}: {:?}", id, e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to cancel schedule")
    })?;

    if cancelled == 0 {
        // The row exists but is no longer pending
        return Err(error(StatusCode::CONFLICT, "Schedule is not pending"));
    }

    audit::log_action(
        ACTOR_TYPE_API_KEY,
        auth.api_key_id,
        ACTION_SCHEDULE_CANCELLED,
        RESOURCE_TYPE_SCHEDULE,
        Some(id.to_string()),
        Some(serde_json::json!({"org_id": org_id})),
        None,
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/schedules/{id}/run",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "Execution outcome", body = RunResponse),
        (status = 404, description = "Not found or not pending"),
        (status = 502, description = "Publish failed")
    ),
    security(("api_key" = [])),
    tag = "schedules"
)]
/// Executes a pending schedule immediately.
pub async fn run_schedule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunResponse>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    match state.scheduler.execute_now(org_id, id).await {
        Ok(ExecutionOutcome::Published { event_id }) => Ok(Json(RunResponse {
            id: event_id,
            status: "completed".to_string(),
            error: None,
        })),
        Ok(ExecutionOutcome::StatusUpdateFailed { event_id }) => {
            // The event was published; the row may replay after a restart
            Ok(Json(RunResponse {
                id: event_id,
                status: "completed".to_string(),
                error: Some("status update failed; duplicate possible after restart".to_string()),
            }))
        }
        Ok(ExecutionOutcome::PublishFailed { error: reason }) => Err(error(
            StatusCode::BAD_GATEWAY,
            &format!("Publish failed: {}", reason),
        )),
        Err(SchedulerError::NotFound(_)) => {
            Err(error(StatusCode::NOT_FOUND, "Schedule not found or not pending"))
        }
        Err(e) => {
            error!("Immediate execution of {} failed: {}", id, e);
            Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Execution failed"))
        }
    }
}
