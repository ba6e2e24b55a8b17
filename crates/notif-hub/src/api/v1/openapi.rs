/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::api::v1::api_keys::{CreateApiKeyRequest, CreatedApiKeyResponse};
use crate::api::v1::dlq::{DlqEntryResponse, ReplayAllResponse};
use crate::api::v1::events::{
    EmitRequest, EmitResponse, EventListResponse, StoredEventResponse,
};
use crate::api::v1::health::HealthResponse;
use crate::api::v1::orgs::{CreateOrgRequest, UpdateOrgRequest};
use crate::api::v1::projects::CreateProjectRequest;
use crate::api::v1::schedules::{CreateScheduleRequest, RunResponse};
use crate::api::v1::webhooks::{
    CreateWebhookRequest, UpdateWebhookRequest, WebhookResponse,
};
use crate::api::v1::{api_keys, dlq, events, health, orgs, projects, schedules, webhooks, ws};
use crate::api::AppState;
use axum::{response::Json, routing::get, Router};
use notif_models::models::{
    api_keys::ApiKey,
    event_deliveries::EventDelivery,
    events::Event,
    orgs::Org,
    projects::Project,
    scheduled_events::ScheduledEvent,
    webhooks::{Webhook, WebhookDelivery},
};
use utoipa::{
    openapi::security::{ApiKey as OpenApiKey, ApiKeyValue, SecurityScheme},
    OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        events::emit_event,
        events::list_events,
        events::get_event,
        events::list_event_deliveries,
        webhooks::create_webhook,
        webhooks::list_webhooks,
        webhooks::get_webhook,
        webhooks::update_webhook,
        webhooks::delete_webhook,
        webhooks::list_webhook_deliveries,
        schedules::create_schedule,
        schedules::list_schedules,
        schedules::get_schedule,
        schedules::cancel_schedule,
        schedules::run_schedule,
        dlq::list_dlq,
        dlq::replay_message,
        dlq::replay_all,
        dlq::delete_message,
        dlq::purge_dlq,
        orgs::create_org,
        orgs::list_orgs,
        orgs::get_org,
        orgs::update_org,
        orgs::delete_org,
        projects::create_project,
        projects::list_projects,
        projects::get_project,
        projects::delete_project,
        api_keys::create_api_key,
        api_keys::list_api_keys,
        api_keys::delete_api_key,
        health::healthz,
        ws::ws_upgrade,
    ),
    components(
        schemas(
            Event,
            EventDelivery,
            EmitRequest,
            EmitResponse,
            StoredEventResponse,
            EventListResponse,
            Webhook,
            WebhookDelivery,
            CreateWebhookRequest,
            UpdateWebhookRequest,
            WebhookResponse,
            ScheduledEvent,
            CreateScheduleRequest,
            RunResponse,
            DlqEntryResponse,
            ReplayAllResponse,
            Org,
            CreateOrgRequest,
            UpdateOrgRequest,
            Project,
            CreateProjectRequest,
            ApiKey,
            CreateApiKeyRequest,
            CreatedApiKeyResponse,
            HealthResponse,
        )
    ),
    tags(
        (name = "events", description = "Event emission and lookup API"),
        (name = "webhooks", description = "Webhook management API"),
        (name = "schedules", description = "Deferred publication API"),
        (name = "dlq", description = "Dead-letter queue API"),
        (name = "orgs", description = "Tenant management API"),
        (name = "projects", description = "Project management API"),
        (name = "api-keys", description = "API key management API"),
        (name = "health", description = "Health API"),
        (name = "ws", description = "WebSocket subscription API")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "admin_pak",
                SecurityScheme::ApiKey(OpenApiKey::Header(ApiKeyValue::new("Authorization"))),
            );
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(OpenApiKey::Header(ApiKeyValue::new("Authorization"))),
            );
        }
    }
}

pub fn configure_openapi() -> Router<AppState> {
    Router::new()
        .route("/docs/openapi.json", get(serve_openapi))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
