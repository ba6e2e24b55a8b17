/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! API v1 module for the notif hub.
//!
//! This module defines the structure and routes for version 1 of the API.
//! All `/api/v1` routes sit behind the authentication middleware; health,
//! metrics and docs stay public.

pub mod api_keys;
pub mod dlq;
pub mod events;
pub mod health;
pub mod middleware;
pub mod openapi;
pub mod orgs;
pub mod projects;
pub mod schedules;
pub mod webhooks;
pub mod ws;

use crate::api::AppState;
use axum::middleware::from_fn_with_state;
use axum::Router;

/// Constructs and returns the main router for API v1.
///
/// This function combines all the route handlers from different modules
/// and applies the authentication middleware.
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(api_keys::routes())
        .merge(dlq::routes())
        .merge(events::routes())
        .merge(orgs::routes())
        .merge(projects::routes())
        .merge(schedules::routes())
        .merge(webhooks::routes())
        .layer(from_fn_with_state(state, middleware::auth_middleware))
}
