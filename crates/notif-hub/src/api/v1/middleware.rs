/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Authentication middleware for the notif API v1.
//!
//! Requests authenticate with the admin PAK or a tenant API key in the
//! `Authorization` header. Key lookup is a single indexed fetch on the
//! SHA-256 hash. The resulting `AuthContext` rides in the request extensions.

use crate::api::AppState;
use crate::utils::pak;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use notif_models::models::audit_logs::{
    ACTION_AUTH_FAILED, ACTOR_TYPE_SYSTEM, RESOURCE_TYPE_SYSTEM,
};
use notif_models::schema::admin_role;
use notif_utils::logging::prelude::*;
use diesel::prelude::*;
use uuid::Uuid;

use crate::utils::audit;

/// The authenticated caller.
#[derive(Clone, Debug)]
pub struct AuthContext {
    /// Whether the caller holds the admin PAK.
    pub admin: bool,
    /// The authenticated org, for API-key callers.
    pub org_id: Option<String>,
    /// The authenticated project, for API-key callers.
    pub project_id: Option<Uuid>,
    /// The API key id, for API-key callers.
    pub api_key_id: Option<Uuid>,
    /// Per-key rate limit override.
    pub rate_limit: Option<f64>,
}

impl AuthContext {
    /// The org id, or 403 when the caller is not org-scoped.
    pub fn require_org(&self) -> Result<&str, StatusCode> {
        self.org_id.as_deref().ok_or(StatusCode::FORBIDDEN)
    }

    /// The project id, or 403 when the caller is not project-scoped.
    pub fn require_project(&self) -> Result<Uuid, StatusCode> {
        self.project_id.ok_or(StatusCode::FORBIDDEN)
    }
}

/// Middleware function for authenticating requests.
///
/// Extracts the PAK from the Authorization header, verifies it against the
/// admin role and the API key table, and adds the resulting `AuthContext` to
/// the request's extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = match request
        .headers()
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
    {
        Some(token) => token.trim_start_matches("Bearer ").to_string(),
        None => {
            warn!("Authorization header missing or invalid");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    match verify_token(&state, &token).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Err(status) => {
            audit::log_action(
                ACTOR_TYPE_SYSTEM,
                None,
                ACTION_AUTH_FAILED,
                RESOURCE_TYPE_SYSTEM,
                None,
                None,
                None,
            );
            warn!("Authentication failed with status: {:?}", status);
            Err(status)
        }
    }
}

/// Verifies the provided token and returns the corresponding `AuthContext`.
async fn verify_token(state: &AppState, token: &str) -> Result<AuthContext, StatusCode> {
    let conn = &mut state.dal.pool.get().map_err(|e| {
        error!("Failed to get database connection: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // Check admin role
    let admin_key = admin_role::table
        .select(admin_role::pak_hash)
        .first::<String>(conn)
        .optional()
        .map_err(|e| {
            error!("Failed to fetch admin role: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if let Some(admin_hash) = admin_key {
        if pak::verify_pak(token.to_string(), admin_hash) {
            debug!("Admin PAK verified");
            return Ok(AuthContext {
                admin: true,
                org_id: None,
                project_id: None,
                api_key_id: None,
                rate_limit: None,
            });
        }
    }

    // Check API keys using the indexed hash lookup
    let Some(key_hash) = pak::generate_pak_hash(token) else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    match state.dal.api_keys().get_by_hash(&key_hash) {
        Ok(Some(key)) => {
            debug!("API key verified for org '{}'", key.org_id);

            if let Err(e) = state.dal.api_keys().touch_last_used(key.id) {
                debug!("Failed to stamp key {} last_used_at: {:?}", key.id, e);
            }

            Ok(AuthContext {
                admin: false,
                org_id: Some(key.org_id),
                project_id: Some(key.project_id),
                api_key_id: Some(key.id),
                rate_limit: key.rate_limit,
            })
        }
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(e) => {
            error!("Failed to lookup API key by hash: {:?}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
