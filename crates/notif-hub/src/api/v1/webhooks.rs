/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Webhooks API module.
//!
//! CRUD for tenant webhooks plus delivery inspection. The signing secret is
//! generated server-side and returned exactly once, in the create response.

use crate::api::v1::middleware::AuthContext;
use crate::api::AppState;
use crate::webhook::signature;
use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path, Query, State},
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use notif_models::models::audit_logs::{
    ACTION_WEBHOOK_CREATED, ACTION_WEBHOOK_DELETED, ACTION_WEBHOOK_UPDATED, ACTOR_TYPE_API_KEY,
    RESOURCE_TYPE_WEBHOOK,
};
use notif_models::models::webhooks::{
    validate_topic_pattern, NewWebhook, UpdateWebhook, Webhook, WebhookDelivery,
};
use notif_utils::logging::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::audit;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request body for creating a webhook.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateWebhookRequest {
    /// Target URL (http or https; SSRF-guarded at delivery time).
    pub url: String,
    /// Topic patterns using `*`/`>` wildcards.
    pub topics: Vec<String>,
}

/// Request body for updating a webhook.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateWebhookRequest {
    /// New target URL.
    #[serde(default)]
    pub url: Option<String>,
    /// New topic patterns.
    #[serde(default)]
    pub topics: Option<Vec<String>>,
    /// Enable or disable the webhook.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// A webhook as returned by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookResponse {
    pub id: Uuid,
    pub url: String,
    pub topics: Vec<String>,
    pub enabled: bool,
    /// Present only in the create response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookResponse {
    fn from_webhook(webhook: Webhook, secret: Option<String>) -> Self {
        Self {
            id: webhook.id,
            url: webhook.url,
            topics: webhook.topics,
            enabled: webhook.enabled,
            secret,
            created_at: webhook.created_at,
            updated_at: webhook.updated_at,
        }
    }
}

/// Query parameters for listing deliveries.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ListDeliveriesQuery {
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

/// Creates and returns the router for webhook endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks", get(list_webhooks))
        .route("/webhooks", post(create_webhook))
        .route("/webhooks/:id", get(get_webhook))
        .route("/webhooks/:id", patch(update_webhook))
        .route("/webhooks/:id", delete(delete_webhook))
        .route("/webhooks/:id/deliveries", get(list_webhook_deliveries))
}

// =============================================================================
// Handlers
// =============================================================================

#[utoipa::path(
    post,
    path = "/api/v1/webhooks",
    request_body = CreateWebhookRequest,
    responses(
        (status = 200, description = "Webhook created; the secret appears only here", body = WebhookResponse),
        (status = 400, description = "Invalid URL or topic pattern")
    ),
    security(("api_key" = [])),
    tag = "webhooks"
)]
/// Creates a webhook for the authenticated org/project.
pub async fn create_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateWebhookRequest>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();
    let project_id = auth
        .require_project()
        .map_err(|s| error(s, "API key required"))?;

    let secret = signature::generate_secret();

    let new_webhook = NewWebhook::new(
        org_id.clone(),
        project_id,
        request.url,
        request.topics,
        secret.clone(),
    )
    .map_err(|e| error(StatusCode::BAD_REQUEST, &e))?;

    let webhook = state.dal.webhooks().create(&new_webhook).map_err(|e| {
        error!("Failed to create webhook: {:?}", e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create webhook")
    })?;

    audit::log_action(
        ACTOR_TYPE_API_KEY,
        auth.api_key_id,
        ACTION_WEBHOOK_CREATED,
        RESOURCE_TYPE_WEBHOOK,
        Some(webhook.id.to_string()),
        Some(serde_json::json!({"org_id": org_id, "topics": webhook.topics})),
        None,
    );

    info!("Created webhook {} for org '{}'", webhook.id, org_id);

    Ok(Json(WebhookResponse::from_webhook(webhook, Some(secret))))
}

#[utoipa::path(
    get,
    path = "/api/v1/webhooks",
    responses(
        (status = 200, description = "The org's webhooks", body = Vec<WebhookResponse>)
    ),
    security(("api_key" = [])),
    tag = "webhooks"
)]
/// Lists the org's webhooks.
pub async fn list_webhooks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<WebhookResponse>>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    let webhooks = state.dal.webhooks().list(org_id, false).map_err(|e| {
        error!("Failed to list webhooks: {:?}", e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list webhooks")
    })?;

    Ok(Json(
        webhooks
            .into_iter()
            .map(|hook| WebhookResponse::from_webhook(hook, None))
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/webhooks/{id}",
    params(("id" = Uuid, Path, description = "Webhook id")),
    responses(
        (status = 200, description = "The webhook", body = WebhookResponse),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = [])),
    tag = "webhooks"
)]
/// Fetches one webhook.
pub async fn get_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    match state.dal.webhooks().get(org_id, id) {
        Ok(Some(webhook)) => Ok(Json(WebhookResponse::from_webhook(webhook, None))),
        Ok(None) => Err(error(StatusCode::NOT_FOUND, "Webhook not found")),
        Err(e) => {
            error!("Failed to fetch webhook {}: {:?}", id, e);
            Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch webhook"))
        }
    }
}

#[utoipa::path(
    patch,
    path = "/api/v1/webhooks/{id}",
    params(("id" = Uuid, Path, description = "Webhook id")),
    request_body = UpdateWebhookRequest,
    responses(
        (status = 200, description = "The updated webhook", body = WebhookResponse),
        (status = 400, description = "Invalid update"),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = [])),
    tag = "webhooks"
)]
/// Updates a webhook.
pub async fn update_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateWebhookRequest>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();

    if let Some(url) = &request.url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(error(StatusCode::BAD_REQUEST, "URL must use http or https"));
        }
    }
    if let Some(topics) = &request.topics {
        if topics.is_empty() {
            return Err(error(StatusCode::BAD_REQUEST, "At least one topic pattern is required"));
        }
        for pattern in topics {
            validate_topic_pattern(pattern).map_err(|e| error(StatusCode::BAD_REQUEST, &e))?;
        }
    }

    if state
        .dal
        .webhooks()
        .get(&org_id, id)
        .ok()
        .flatten()
        .is_none()
    {
        return Err(error(StatusCode::NOT_FOUND, "Webhook not found"));
    }

    let update = UpdateWebhook {
        url: request.url,
        topics: request.topics,
        enabled: request.enabled,
        updated_at: None,
    };

    let webhook = state.dal.webhooks().update(&org_id, id, &update).map_err(|e| {
        error!("Failed to update webhook {}: {:?}", id, e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update webhook")
    })?;

    audit::log_action(
        ACTOR_TYPE_API_KEY,
        auth.api_key_id,
        ACTION_WEBHOOK_UPDATED,
        RESOURCE_TYPE_WEBHOOK,
        Some(id.to_string()),
        Some(serde_json::json!({"org_id": org_id, "enabled": webhook.enabled})),
        None,
    );

    Ok(Json(WebhookResponse::from_webhook(webhook, None)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/webhooks/{id}",
    params(("id" = Uuid, Path, description = "Webhook id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = [])),
    tag = "webhooks"
)]
/// Deletes a webhook.
pub async fn delete_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();

    let deleted = state.dal.webhooks().delete(&org_id, id).map_err(|e| {
        error!("Failed to delete webhook {}: {:?}", id, e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete webhook")
    })?;

    if deleted == 0 {
        return Err(error(StatusCode::NOT_FOUND, "Webhook not found"));
    }

    audit::log_action(
        ACTOR_TYPE_API_KEY,
        auth.api_key_id,
        ACTION_WEBHOOK_DELETED,
        RESOURCE_TYPE_WEBHOOK,
        Some(id.to_string()),
        Some(serde_json::json!({"org_id": org_id})),
        None,
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/webhooks/{id}/deliveries",
    params(("id" = Uuid, Path, description = "Webhook id")),
    responses(
        (status = 200, description = "Delivery attempts, newest first", body = Vec<WebhookDelivery>),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = [])),
    tag = "webhooks"
)]
/// Lists delivery attempts for a webhook.
pub async fn list_webhook_deliveries(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListDeliveriesQuery>,
) -> Result<Json<Vec<WebhookDelivery>>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    // Tenant scope check before touching the deliveries table
    match state.dal.webhooks().get(org_id, id) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(error(StatusCode::NOT_FOUND, "Webhook not found")),
        Err(e) => {
            error!("Failed to fetch webhook {}: {:?}", id, e);
            return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch webhook"));
        }
    }

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    state
        .dal
        .webhook_deliveries()
        .list_for_webhook(id, limit, offset)
        .map(Json)
        .map_err(|e| {
            error!("Failed to list deliveries for webhook {}: {:?}", id, e);
            error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list deliveries")
        })
}
