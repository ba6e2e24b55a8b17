/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for Webhook Delivery operations.

use crate::dal::DAL;
use chrono::Utc;
use notif_models::models::webhooks::{
    truncate_response_body, NewWebhookDelivery, UpdateWebhookDelivery, WebhookDelivery,
    DELIVERY_STATUS_FAILED, DELIVERY_STATUS_SUCCESS,
};
use notif_models::schema::webhook_deliveries;
use diesel::prelude::*;
use uuid::Uuid;

/// Data Access Layer for Webhook Delivery operations.
pub struct WebhookDeliveriesDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl WebhookDeliveriesDAL<'_> {
    /// Creates a new delivery row.
    pub fn create(
        &self,
        new_delivery: &NewWebhookDelivery,
    ) -> Result<WebhookDelivery, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(webhook_deliveries::table)
            .values(new_delivery)
            .get_result(conn)
    }

    /// Gets a delivery by id.
    pub fn get(&self, id: Uuid) -> Result<Option<WebhookDelivery>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        webhook_deliveries::table
            .filter(webhook_deliveries::id.eq(id))
            .first(conn)
            .optional()
    }

    /// Updates a delivery row.
    pub fn update(
        &self,
        id: Uuid,
        update: &UpdateWebhookDelivery,
    ) -> Result<WebhookDelivery, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::update(webhook_deliveries::table.filter(webhook_deliveries::id.eq(id)))
            .set(update)
            .get_result(conn)
    }

    /// Marks a delivery successful.
    pub fn mark_success(
        &self,
        id: Uuid,
        response_status: i32,
        response_body: &str,
    ) -> Result<WebhookDelivery, diesel::result::Error> {
        self.update(
            id,
            &UpdateWebhookDelivery {
                status: Some(DELIVERY_STATUS_SUCCESS.to_string()),
                response_status: Some(Some(response_status)),
                response_body: Some(Some(truncate_response_body(response_body))),
                error: Some(None),
                delivered_at: Some(Some(Utc::now())),
            },
        )
    }

    /// Marks a delivery failed.
    pub fn mark_failed(
        &self,
        id: Uuid,
        response_status: Option<i32>,
        response_body: Option<&str>,
        error: &str,
    ) -> Result<WebhookDelivery, diesel::result::Error> {
        self.update(
            id,
            &UpdateWebhookDelivery {
                status: Some(DELIVERY_STATUS_FAILED.to_string()),
                response_status: Some(response_status),
                response_body: Some(response_body.map(truncate_response_body)),
                error: Some(Some(error.to_string())),
                delivered_at: None,
            },
        )
    }

    /// Lists deliveries for a webhook, newest first.
    pub fn list_for_webhook(
        &self,
        webhook_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        webhook_deliveries::table
            .filter(webhook_deliveries::webhook_id.eq(webhook_id))
            .order(webhook_deliveries::created_at.desc())
            .limit(limit)
            .offset(offset)
            .load(conn)
    }

    /// Lists deliveries for an event, oldest first (attempt order).
    pub fn list_for_event(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<WebhookDelivery>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        webhook_deliveries::table
            .filter(webhook_deliveries::event_id.eq(event_id))
            .order(webhook_deliveries::created_at.asc())
            .load(conn)
    }

    /// Deletes delivery rows older than the retention window.
    pub fn cleanup_old(&self, retention_days: i64) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);

        diesel::delete(webhook_deliveries::table.filter(webhook_deliveries::created_at.lt(cutoff)))
            .execute(conn)
    }
}
