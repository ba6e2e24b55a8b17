/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for unified Event Delivery operations.

use crate::dal::DAL;
use chrono::Utc;
use notif_models::models::event_deliveries::{
    EventDelivery, NewEventDelivery, UpdateEventDelivery, EVENT_DELIVERY_ACKED,
    EVENT_DELIVERY_DELIVERED, EVENT_DELIVERY_DLQ, EVENT_DELIVERY_NACKED,
};
use notif_models::schema::event_deliveries;
use diesel::prelude::*;
use uuid::Uuid;

/// Data Access Layer for Event Delivery operations.
pub struct EventDeliveriesDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl EventDeliveriesDAL<'_> {
    /// Creates a new event delivery row.
    pub fn create(
        &self,
        new_delivery: &NewEventDelivery,
    ) -> Result<EventDelivery, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(event_deliveries::table)
            .values(new_delivery)
            .get_result(conn)
    }

    /// Gets a delivery by id.
    pub fn get(&self, id: Uuid) -> Result<Option<EventDelivery>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        event_deliveries::table
            .filter(event_deliveries::id.eq(id))
            .first(conn)
            .optional()
    }

    /// Updates a delivery row.
    pub fn update(
        &self,
        id: Uuid,
        update: &UpdateEventDelivery,
    ) -> Result<EventDelivery, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::update(event_deliveries::table.filter(event_deliveries::id.eq(id)))
            .set(update)
            .get_result(conn)
    }

    /// Marks a delivery acknowledged.
    pub fn mark_acked(&self, id: Uuid) -> Result<EventDelivery, diesel::result::Error> {
        self.update(
            id,
            &UpdateEventDelivery {
                status: Some(EVENT_DELIVERY_ACKED.to_string()),
                acked_at: Some(Some(Utc::now())),
                ..Default::default()
            },
        )
    }

    /// Marks a delivery negatively acknowledged.
    pub fn mark_nacked(&self, id: Uuid, error: Option<&str>) -> Result<EventDelivery, diesel::result::Error> {
        self.update(
            id,
            &UpdateEventDelivery {
                status: Some(EVENT_DELIVERY_NACKED.to_string()),
                error: Some(error.map(String::from)),
                ..Default::default()
            },
        )
    }

    /// Marks a delivery routed to the DLQ.
    pub fn mark_dlq(&self, id: Uuid, error: &str) -> Result<EventDelivery, diesel::result::Error> {
        self.update(
            id,
            &UpdateEventDelivery {
                status: Some(EVENT_DELIVERY_DLQ.to_string()),
                error: Some(Some(error.to_string())),
                ..Default::default()
            },
        )
    }

    /// Marks a nacked delivery re-delivered with a new attempt count.
    pub fn mark_redelivered(
        &self,
        id: Uuid,
        attempt: i32,
    ) -> Result<EventDelivery, diesel::result::Error> {
        self.update(
            id,
            &UpdateEventDelivery {
                status: Some(EVENT_DELIVERY_DELIVERED.to_string()),
                attempt: Some(attempt),
                delivered_at: Some(Some(Utc::now())),
                ..Default::default()
            },
        )
    }

    /// Lists deliveries for an event, oldest first.
    pub fn list_for_event(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<EventDelivery>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        event_deliveries::table
            .filter(event_deliveries::event_id.eq(event_id))
            .order(event_deliveries::created_at.asc())
            .load(conn)
    }
}
