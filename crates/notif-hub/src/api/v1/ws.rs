/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! WebSocket upgrade endpoint.
//!
//! `/ws` sits at the root (outside `/api/v1`) but behind the same
//! authentication middleware; the upgrade requires an org- and
//! project-scoped API key.

use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::{
    extract::{Extension, State},
    response::Response,
    routing::get,
    Router,
};
use notif_utils::logging::prelude::*;

use crate::api::v1::middleware::{auth_middleware, AuthContext};
use crate::api::AppState;
use crate::policy::Principal;
use crate::ws::WsSession;

/// Creates and returns the router for the WebSocket endpoint.
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(from_fn_with_state(state, auth_middleware))
}

#[utoipa::path(
    get,
    path = "/ws",
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 401, description = "Unauthenticated"),
        (status = 403, description = "API key required")
    ),
    security(("api_key" = [])),
    tag = "ws"
)]
/// Upgrades an authenticated connection to the subscription protocol.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let org_id = auth.require_org()?.to_string();
    let project_id = auth.require_project()?;
    let api_key_id = auth.api_key_id.ok_or(StatusCode::FORBIDDEN)?;

    debug!("WS upgrade for org '{}' project {}", org_id, project_id);

    let session = WsSession::new(
        org_id,
        project_id,
        Principal::api_key(api_key_id.to_string()),
        state.dal.clone(),
        state.pool.clone(),
        state.policy.clone(),
        state.ws_hub.clone(),
        state.ws_config.clone(),
    );

    Ok(upgrade.on_upgrade(move |socket| session.run(socket)))
}
