/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Orgs API module. Admin only.
//!
//! Creating an org provisions its bus account end to end: keypair, database
//! row, account JWT push, connection, per-account streams. Deleting one
//! drains the connection before removing the row.

use std::sync::Arc;

use crate::api::v1::middleware::AuthContext;
use crate::api::AppState;
use crate::provisioner::{ProvisionerError, SysConnPusher, DEFAULT_PUSH_TIMEOUT};
use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path, State},
    routing::{delete, get, patch, post},
    Json, Router,
};
use notif_models::models::audit_logs::{
    ACTION_ORG_DELETED, ACTION_ORG_UPDATED, ACTOR_TYPE_ADMIN, RESOURCE_TYPE_ORG,
};
use notif_models::models::orgs::{validate_billing_tier, Org, UpdateOrg};
use notif_utils::logging::prelude::*;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::utils::audit;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request body for creating an org.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateOrgRequest {
    /// Tenant id, `[A-Za-z0-9_-]{1,32}`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

/// Request body for updating an org.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateOrgRequest {
    /// New billing tier (free, pro, enterprise).
    #[serde(default)]
    pub billing_tier: Option<String>,
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(serde_json::json!({"error": message})))
}

fn require_admin(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.admin {
        Ok(())
    } else {
        Err(error(StatusCode::FORBIDDEN, "Admin access required"))
    }
}

// =============================================================================
// Routes
// =============================================================================

/// Creates and returns the router for org endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orgs", post(create_org))
        .route("/orgs", get(list_orgs))
        .route("/orgs/:id", get(get_org))
        .route("/orgs/:id", patch(update_org))
        .route("/orgs/:id", delete(delete_org))
}

// =============================================================================
// Handlers
// =============================================================================

#[utoipa::path(
    post,
    path = "/api/v1/orgs",
    request_body = CreateOrgRequest,
    responses(
        (status = 200, description = "Org provisioned and connected", body = Org),
        (status = 400, description = "Invalid org id"),
        (status = 409, description = "Org already exists")
    ),
    security(("admin_pak" = [])),
    tag = "orgs"
)]
/// Provisions a new tenant.
pub async fn create_org(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateOrgRequest>,
) -> Result<Json<Org>, ApiError> {
    require_admin(&auth)?;

    let (org, account_kp) = state
        .provisioner
        .create_org(&request.id, &request.name)
        .map_err(|e| match e {
            ProvisionerError::InvalidOrgId(reason) => error(StatusCode::BAD_REQUEST, &reason),
            ProvisionerError::AlreadyExists(_) => {
                error(StatusCode::CONFLICT, "Org already exists")
            }
            other => {
                error!("Org creation failed: {}", other);
                error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create org")
            }
        })?;

    // Install the account on the bus, then dial it
    let pusher = SysConnPusher::new(
        state.pool.system_conn().nats_client().clone(),
        DEFAULT_PUSH_TIMEOUT,
    );
    if let Err(e) = state.provisioner.rebuild_and_push(&org.id, &pusher).await {
        error!("JWT push for new org '{}' failed: {}", org.id, e);
        return Err(error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Account installation failed",
        ));
    }

    if let Err(e) = state.pool.add(&org.id, Arc::new(account_kp)).await {
        error!("Connection for new org '{}' failed: {}", org.id, e);
        return Err(error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Account connection failed",
        ));
    }

    Ok(Json(org))
}

#[utoipa::path(
    get,
    path = "/api/v1/orgs",
    responses((status = 200, description = "All orgs", body = Vec<Org>)),
    security(("admin_pak" = [])),
    tag = "orgs"
)]
/// Lists all orgs.
pub async fn list_orgs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Org>>, ApiError> {
    require_admin(&auth)?;

    state.dal.orgs().list().map(Json).map_err(|e| {
        error!("Failed to list orgs: {:?}", e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list orgs")
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/orgs/{id}",
    params(("id" = String, Path, description = "Org id")),
    responses(
        (status = 200, description = "The org", body = Org),
        (status = 404, description = "Not found")
    ),
    security(("admin_pak" = [])),
    tag = "orgs"
)]
/// Fetches one org.
pub async fn get_org(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<Org>, ApiError> {
    require_admin(&auth)?;

    match state.dal.orgs().get(&id) {
        Ok(Some(org)) => Ok(Json(org)),
        Ok(None) => Err(error(StatusCode::NOT_FOUND, "Org not found")),
        Err(e) => {
            error!("Failed to fetch org '{}': {:?}", id, e);
            Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch org"))
        }
    }
}

#[utoipa::path(
    patch,
    path = "/api/v1/orgs/{id}",
    params(("id" = String, Path, description = "Org id")),
    request_body = UpdateOrgRequest,
    responses(
        (status = 200, description = "The updated org; limits were re-pushed", body = Org),
        (status = 400, description = "Invalid billing tier"),
        (status = 404, description = "Not found")
    ),
    security(("admin_pak" = [])),
    tag = "orgs"
)]
/// Updates an org; a tier change re-derives and pushes the account JWT.
pub async fn update_org(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(request): Json<UpdateOrgRequest>,
) -> Result<Json<Org>, ApiError> {
    require_admin(&auth)?;

    if let Some(tier) = &request.billing_tier {
        validate_billing_tier(tier).map_err(|e| error(StatusCode::BAD_REQUEST, &e))?;
    }

    if state.dal.orgs().get(&id).ok().flatten().is_none() {
        return Err(error(StatusCode::NOT_FOUND, "Org not found"));
    }

    let update = UpdateOrg {
        name: request.name,
        billing_tier: request.billing_tier.clone(),
        nats_public_key: None,
    };

    let org = state.dal.orgs().update(&id, &update).map_err(|e| {
        error!("Failed to update org '{}': {:?}", id, e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update org")
    })?;

    // The JWT is a derived view; a tier change means a fresh push
    if request.billing_tier.is_some() {
        let pusher = SysConnPusher::new(
            state.pool.system_conn().nats_client().clone(),
            DEFAULT_PUSH_TIMEOUT,
        );
        if let Err(e) = state.provisioner.rebuild_and_push(&id, &pusher).await {
            error!("JWT push after tier change for '{}' failed: {}", id, e);
            return Err(error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Limit update could not be installed",
            ));
        }
    }

    audit::log_action(
        ACTOR_TYPE_ADMIN,
        None,
        ACTION_ORG_UPDATED,
        RESOURCE_TYPE_ORG,
        Some(id),
        Some(serde_json::json!({"billing_tier": org.billing_tier})),
        None,
    );

    Ok(Json(org))
}

#[utoipa::path(
    delete,
    path = "/api/v1/orgs/{id}",
    params(("id" = String, Path, description = "Org id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found")
    ),
    security(("admin_pak" = [])),
    tag = "orgs"
)]
/// Deletes an org, disconnecting it first.
pub async fn delete_org(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_admin(&auth)?;

    // Stop consumers and drain the connection before the row goes
    state.pool.remove(&id).await;

    let deleted = state.dal.orgs().delete(&id).map_err(|e| {
        error!("Failed to delete org '{}': {:?}", id, e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete org")
    })?;

    if deleted == 0 {
        return Err(error(StatusCode::NOT_FOUND, "Org not found"));
    }

    audit::log_action(
        ACTOR_TYPE_ADMIN,
        None,
        ACTION_ORG_DELETED,
        RESOURCE_TYPE_ORG,
        Some(id),
        None,
        None,
    );

    Ok(StatusCode::NO_CONTENT)
}
