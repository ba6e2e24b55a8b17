/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for Webhook operations.

use crate::dal::DAL;
use chrono::Utc;
use notif_models::models::webhooks::{NewWebhook, UpdateWebhook, Webhook};
use notif_models::schema::webhooks;
use diesel::prelude::*;
use uuid::Uuid;

/// Data Access Layer for Webhook operations.
pub struct WebhooksDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl WebhooksDAL<'_> {
    /// Creates a new webhook.
    pub fn create(&self, new_webhook: &NewWebhook) -> Result<Webhook, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(webhooks::table)
            .values(new_webhook)
            .get_result(conn)
    }

    /// Gets a webhook by id, scoped to an org.
    pub fn get(&self, org_id: &str, id: Uuid) -> Result<Option<Webhook>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        webhooks::table
            .filter(webhooks::org_id.eq(org_id))
            .filter(webhooks::id.eq(id))
            .first(conn)
            .optional()
    }

    /// Gets a webhook by id without tenant scoping.
    ///
    /// Only the delivery engine uses this; retry jobs already carry the org.
    pub fn get_unscoped(&self, id: Uuid) -> Result<Option<Webhook>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        webhooks::table
            .filter(webhooks::id.eq(id))
            .first(conn)
            .optional()
    }

    /// Lists an org's webhooks.
    pub fn list(
        &self,
        org_id: &str,
        enabled_only: bool,
    ) -> Result<Vec<Webhook>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        let mut query = webhooks::table
            .filter(webhooks::org_id.eq(org_id))
            .into_boxed();

        if enabled_only {
            query = query.filter(webhooks::enabled.eq(true));
        }

        query.order(webhooks::created_at.desc()).load(conn)
    }

    /// Updates a webhook, scoped to an org.
    pub fn update(
        &self,
        org_id: &str,
        id: Uuid,
        update: &UpdateWebhook,
    ) -> Result<Webhook, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        let mut update = update.clone();
        update.updated_at = Some(Utc::now());

        diesel::update(
            webhooks::table
                .filter(webhooks::org_id.eq(org_id))
                .filter(webhooks::id.eq(id)),
        )
        .set(&update)
        .get_result(conn)
    }

    /// Deletes a webhook, scoped to an org.
    pub fn delete(&self, org_id: &str, id: Uuid) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::delete(
            webhooks::table
                .filter(webhooks::org_id.eq(org_id))
                .filter(webhooks::id.eq(id)),
        )
        .execute(conn)
    }
}
