/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Projects API module.
//!
//! Projects are the secondary namespace below the org; API keys and webhooks
//! hang off them.

use crate::api::v1::middleware::AuthContext;
use crate::api::AppState;
use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use notif_models::models::audit_logs::{
    ACTION_PROJECT_CREATED, ACTION_PROJECT_DELETED, ACTOR_TYPE_API_KEY, RESOURCE_TYPE_PROJECT,
};
use notif_models::models::projects::{NewProject, Project};
use notif_utils::logging::prelude::*;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::audit;

/// Request body for creating a project.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    /// URL-safe slug, unique within the org.
    pub slug: String,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(serde_json::json!({"error": message})))
}

/// Creates and returns the router for project endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/projects", post(create_project))
        .route("/projects", get(list_projects))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id", delete(delete_project))
}

#[utoipa::path(
    post,
    path = "/api/v1/projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 200, description = "Project created", body = Project),
        (status = 400, description = "Invalid slug"),
        (status = 409, description = "Slug already used")
    ),
    security(("api_key" = [])),
    tag = "projects"
)]
/// Creates a project in the authenticated org.
pub async fn create_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();

    let new_project = NewProject::new(org_id.clone(), request.slug)
        .map_err(|e| error(StatusCode::BAD_REQUEST, &e))?;

    let project = state.dal.projects().create(&new_project).map_err(|e| match e {
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ) => error(StatusCode::CONFLICT, "Slug already used in this org"),
        other => {
            error!("Failed to create project: {:?}", other);
            error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create project")
        }
    })?;

    audit::log_action(
        ACTOR_TYPE_API_KEY,
        auth.api_key_id,
        ACTION_PROJECT_CREATED,
        RESOURCE_TYPE_PROJECT,
        Some(project.id.to_string()),
        Some(serde_json::json!({"org_id": org_id, "slug": project.slug})),
        None,
    );

    Ok(Json(project))
}

#[utoipa::path(
    get,
    path = "/api/v1/projects",
    responses((status = 200, description = "The org's projects", body = Vec<Project>)),
    security(("api_key" = [])),
    tag = "projects"
)]
/// Lists the org's projects.
pub async fn list_projects(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Project>>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    state.dal.projects().list(org_id).map(Json).map_err(|e| {
        error!("Failed to list projects: {:?}", e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list projects")
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/projects/{id}",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "The project", body = Project),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = [])),
    tag = "projects"
)]
/// Fetches one project.
pub async fn get_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?;

    match state.dal.projects().get(org_id, id) {
        Ok(Some(project)) => Ok(Json(project)),
        Ok(None) => Err(error(StatusCode::NOT_FOUND, "Project not found")),
        Err(e) => {
            error!("Failed to fetch project {}: {:?}", id, e);
            Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch project"))
        }
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/projects/{id}",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = [])),
    tag = "projects"
)]
/// Deletes a project; its keys and webhooks cascade.
pub async fn delete_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = auth
        .require_org()
        .map_err(|s| error(s, "API key required"))?
        .to_string();

    let deleted = state.dal.projects().delete(&org_id, id).map_err(|e| {
        error!("Failed to delete project {}: {:?}", id, e);
        error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete project")
    })?;

    if deleted == 0 {
        return Err(error(StatusCode::NOT_FOUND, "Project not found"));
    }

    audit::log_action(
        ACTOR_TYPE_API_KEY,
        auth.api_key_id,
        ACTION_PROJECT_DELETED,
        RESOURCE_TYPE_PROJECT,
        Some(id.to_string()),
        Some(serde_json::json!({"org_id": org_id})),
        None,
    );

    Ok(StatusCode::NO_CONTENT)
}
