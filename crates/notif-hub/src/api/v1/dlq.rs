/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! DLQ API module.
//!
//! Operator surface over the per-org dead-letter queue: list, replay one,
//! replay all, delete one, purge.

use crate::api::v1::middleware::AuthContext;
use crate::api::AppState;
use crate::dlq::DlqError;
use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use notif_models::models::events::DlqMessage;
use notif_utils::logging::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// Request/Response Types
// =============================================================================

/// One DLQ entry with its replay handle.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DlqEntryResponse {
    /// Stream sequence; pass to replay/delete.
    pub seq: u64,
    /// Event id of the failed delivery.
    pub id: Uuid,
    /// Topic the event was originally published on.
    pub original_topic: String,
    /// Consumer group that gave up on the event.
    pub consumer_group: String,
    /// Delivery attempts made before dead-lettering.
    pub attempts: i32,
    /// The last error observed.
    pub last_error: String,
    /// When the delivery was given up on.
    pub failed_at: DateTime<Utc>,
    /// Operator replays so far.
    pub replays: i32,
}

impl From<(u64, DlqMessage)> for DlqEntryResponse {
    fn from((seq, message): (u64, DlqMessage)) -> Self {
        Self {
            seq,
            id: message.id,
            original_topic: message.original_topic,
            consumer_group: message.consumer_group,
            attempts: message.attempts,
            last_error: message.last_error,
            failed_at: message.failed_at,
            replays: message.replays,
        }
    }
}

/// Response for a bulk replay.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReplayAllResponse {
    pub replayed: usize,
    pub errors: Vec<String>,
}

/// Query parameters for listing DLQ messages.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ListDlqQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(serde_json::json!({"error": message})))
}

fn map_dlq_error(e: DlqError) -> ApiError {
    match e {
        DlqError::NotFound(_) => error(StatusCode::NOT_FOUND, "No DLQ message at that sequence"),
        DlqError::OrgOffline(_) => {
            error(StatusCode::SERVICE_UNAVAILABLE, "Org connection unavailable")
        }
        other => {
            error!("DLQ operation failed: {}", other);
            error(StatusCode::INTERNAL_SERVER_ERROR, "DLQ operation failed")
        }
    }
}

// =============================================================================
// Routes
// =============================================================================

/// Creates and returns the router for DLQ endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/dlq", get(list_dlq))
        .route("/dlq", delete(purge_dlq))
        .route("/dlq/replay", post(replay_all))
        .route("/dlq/:seq", delete(delete_message))
        .route("/dlq/:seq/replay", post(replay_message))
}

// =============================================================================
// Handlers
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/v1/dlq",
    responses(
        (status = 200, description = "DLQ messages, newest first", body = Vec<DlqEntryResponse>)
    ),
    security(("api_key" = [])),
    tag = "dlq"
)]
/// Lists the org's dead-lettered events.
pub async fn list_dlq(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListDlqQuery>,
) -> Result<Json<Vec<DlqEntryResponse>>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    let limit = query.limit.unwrap_or(50).min(500);
    let offset = query.offset.unwrap_or(0);

    let entries = state
        .dlq
        .list(org_id, limit, offset)
        .await
        .map_err(map_dlq_error)?;

    Ok(Json(
        entries
            .into_iter()
            .map(|entry| DlqEntryResponse::from((entry.sequence, entry.message)))
            .collect(),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/dlq/{seq}/replay",
    params(("seq" = u64, Path, description = "DLQ stream sequence")),
    responses(
        (status = 200, description = "Replayed", body = DlqEntryResponse),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = [])),
    tag = "dlq"
)]
/// Replays one dead-lettered event to its original subject.
pub async fn replay_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(seq): Path<u64>,
) -> Result<Json<DlqEntryResponse>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    let message = state
        .dlq
        .replay(org_id, seq)
        .await
        .map_err(map_dlq_error)?;

    Ok(Json(DlqEntryResponse::from((seq, message))))
}

#[utoipa::path(
    post,
    path = "/api/v1/dlq/replay",
    responses(
        (status = 200, description = "Bulk replay outcome", body = ReplayAllResponse)
    ),
    security(("api_key" = [])),
    tag = "dlq"
)]
/// Replays every dead-lettered event for the org.
pub async fn replay_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ReplayAllResponse>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    let (replayed, errors) = state
        .dlq
        .replay_all(org_id)
        .await
        .map_err(map_dlq_error)?;

    Ok(Json(ReplayAllResponse { replayed, errors }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/dlq/{seq}",
    params(("seq" = u64, Path, description = "DLQ stream sequence")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = [])),
    tag = "dlq"
)]
/// Deletes one dead-lettered event without replaying it.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(seq): Path<u64>,
) -> Result<StatusCode, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    state
        .dlq
        .delete(org_id, seq)
        .await
        .map_err(map_dlq_error)?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/v1/dlq",
    responses(
        (status = 200, description = "Number of purged messages")
    ),
    security(("api_key" = [])),
    tag = "dlq"
)]
/// Purges the org's entire DLQ.
pub async fn purge_dlq(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    let purged = state.dlq.purge(org_id).await.map_err(map_dlq_error)?;

    Ok(Json(serde_json::json!({"purged": purged})))
}
