/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! API keys API module.
//!
//! Key material is generated server-side and returned exactly once; only the
//! SHA-256 hash and a display prefix are stored.

use crate::api::v1::middleware::AuthContext;
use crate::api::AppState;
use crate::utils::pak;
use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use notif_models::models::api_keys::{ApiKey, NewApiKey};
use notif_models::models::audit_logs::{
    ACTION_API_KEY_CREATED, ACTION_API_KEY_DELETED, ACTOR_TYPE_API_KEY, RESOURCE_TYPE_API_KEY,
};
use notif_utils::logging::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::audit;

/// Request body for creating an API key.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateApiKeyRequest {
    /// The project the key is scoped to.
    pub project_id: Uuid,
    /// Optional per-key rate limit (requests per second).
    #[serde(default)]
    pub rate_limit: Option<f64>,
}

/// Response for a created API key. `key` appears only here.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedApiKeyResponse {
    pub id: Uuid,
    pub org_id: String,
    pub project_id: Uuid,
    /// The full key; shown exactly once.
    pub key: String,
    pub prefix: String,
    pub rate_limit: Option<f64>,
    pub created_at: DateTime<Utc>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(serde_json::json!({"error": message})))
}

/// Creates and returns the router for API key endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api-keys", post(create_api_key))
        .route("/api-keys", get(list_api_keys))
        .route("/api-keys/:id", delete(delete_api_key))
}

#[utoipa::path(
    post,
    path = "/api/v1/api-keys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 200, description = "Key created; the key string appears only here", body = CreatedApiKeyResponse),
        (status = 404, description = "Project not found")
    ),
    security(("api_key" = [])),
    tag = "api-keys"
)]
/// Mints an API key for a project in the authenticated org.
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<Json<CreatedApiKeyResponse>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();

    // The project must belong to the caller's org
    match state.dal.projects().get(&org_id, request.project_id) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(error(StatusCode::NOT_FOUND, "Project not found")),
        Err(e) => {
            error!("Failed to fetch project: {:?}", e);
            return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch project"));
        }
    }

    let (key, key_hash) = pak::create_pak().map_err(|e| {
        error!("Key generation failed: {}", e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Key generation failed")
    })?;

    let new_key = NewApiKey::new(
        org_id.clone(),
        request.project_id,
        &key,
        key_hash,
        request.rate_limit,
    )
    .map_err(|e| error(StatusCode::BAD_REQUEST, &e))?;

    let row = state.dal.api_keys().create(&new_key).map_err(|e| {
        error!("Failed to create API key: {:?}", e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create API key")
    })?;

    audit::log_action(
        ACTOR_TYPE_API_KEY,
        auth.api_key_id,
        ACTION_API_KEY_CREATED,
        RESOURCE_TYPE_API_KEY,
        Some(row.id.to_string()),
        Some(serde_json::json!({"org_id": org_id, "project_id": request.project_id})),
        None,
    );

    info!("Created API key {} for org '{}'", row.id, org_id);

    Ok(Json(CreatedApiKeyResponse {
        id: row.id,
        org_id: row.org_id,
        project_id: row.project_id,
        key,
        prefix: row.prefix,
        rate_limit: row.rate_limit,
        created_at: row.created_at,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/api-keys",
    responses((status = 200, description = "The org's keys (hashes omitted)", body = Vec<ApiKey>)),
    security(("api_key" = [])),
    tag = "api-keys"
)]
/// Lists the org's API keys.
pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ApiKey>>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    state.dal.api_keys().list(org_id).map(Json).map_err(|e| {
        error!("Failed to list API keys: {:?}", e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list API keys")
    })
}

#[utoipa::path(
    delete,
    path = "/api/v1/api-keys/{id}",
    params(("id" = Uuid, Path, description = "API key id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = [])),
    tag = "api-keys"
)]
/// Revokes an API key.
pub async fn delete_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();

    let deleted = state.dal.api_keys().delete(&org_id, id).map_err(|e| {
        error!("Failed to delete API key {}: {:?}", id, e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete API key")
    })?;

    if deleted == 0 {
        return Err(error(StatusCode::NOT_FOUND, "API key not found"));
    }

    audit::log_action(
        ACTOR_TYPE_API_KEY,
        auth.api_key_id,
        ACTION_API_KEY_DELETED,
        RESOURCE_TYPE_API_KEY,
        Some(id.to_string()),
        Some(serde_json::json!({"org_id": org_id})),
        None,
    );

    Ok(StatusCode::NO_CONTENT)
}
