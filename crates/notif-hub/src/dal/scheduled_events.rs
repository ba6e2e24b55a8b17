/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for Scheduled Event operations.
//!
//! Due rows are claimed with `FOR UPDATE SKIP LOCKED`: the row lock is the
//! lease, so concurrent workers never process the same row, and a worker that
//! dies mid-publish leaves the row `pending` for the next tick.

use crate::dal::DAL;
use chrono::{DateTime, Utc};
use notif_models::models::scheduled_events::{
    NewScheduledEvent, ScheduledEvent, SCHEDULE_STATUS_CANCELLED, SCHEDULE_STATUS_COMPLETED,
    SCHEDULE_STATUS_FAILED, SCHEDULE_STATUS_PENDING,
};
use notif_models::schema::scheduled_events;
use diesel::prelude::*;
use uuid::Uuid;

/// Data Access Layer for Scheduled Event operations.
pub struct ScheduledEventsDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl ScheduledEventsDAL<'_> {
    /// Creates a new scheduled event.
    pub fn create(
        &self,
        new_schedule: &NewScheduledEvent,
    ) -> Result<ScheduledEvent, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(scheduled_events::table)
            .values(new_schedule)
            .get_result(conn)
    }

    /// Gets a scheduled event by id, scoped to an org.
    pub fn get(
        &self,
        org_id: &str,
        id: Uuid,
    ) -> Result<Option<ScheduledEvent>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        scheduled_events::table
            .filter(scheduled_events::org_id.eq(org_id))
            .filter(scheduled_events::id.eq(id))
            .first(conn)
            .optional()
    }

    /// Lists an org's schedules, soonest first.
    pub fn list(
        &self,
        org_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ScheduledEvent>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        scheduled_events::table
            .filter(scheduled_events::org_id.eq(org_id))
            .order(scheduled_events::scheduled_for.asc())
            .limit(limit)
            .offset(offset)
            .load(conn)
    }

    /// Cancels a pending schedule.
    ///
    /// Only pending rows can be cancelled; returns the number of rows changed
    /// (0 when the row was already claimed, completed or missing).
    pub fn cancel(&self, org_id: &str, id: Uuid) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::update(
            scheduled_events::table
                .filter(scheduled_events::org_id.eq(org_id))
                .filter(scheduled_events::id.eq(id))
                .filter(scheduled_events::status.eq(SCHEDULE_STATUS_PENDING)),
        )
        .set(scheduled_events::status.eq(SCHEDULE_STATUS_CANCELLED))
        .execute(conn)
    }

    /// Claims due pending rows inside the caller's transaction.
    ///
    /// The rows stay locked until the transaction ends; `SKIP LOCKED` keeps
    /// concurrent workers from blocking on each other's claims.
    pub fn claim_due(
        &self,
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledEvent>, diesel::result::Error> {
        scheduled_events::table
            .filter(scheduled_events::status.eq(SCHEDULE_STATUS_PENDING))
            .filter(scheduled_events::scheduled_for.le(now))
            .order(scheduled_events::scheduled_for.asc())
            .limit(limit)
            .for_update()
            .skip_locked()
            .load(conn)
    }

    /// Claims one specific pending row inside the caller's transaction.
    pub fn claim_one(
        &self,
        conn: &mut PgConnection,
        org_id: &str,
        id: Uuid,
    ) -> Result<Option<ScheduledEvent>, diesel::result::Error> {
        scheduled_events::table
            .filter(scheduled_events::org_id.eq(org_id))
            .filter(scheduled_events::id.eq(id))
            .filter(scheduled_events::status.eq(SCHEDULE_STATUS_PENDING))
            .for_update()
            .skip_locked()
            .first(conn)
            .optional()
    }

    /// Marks a claimed row completed, inside the claiming transaction.
    pub fn mark_completed(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        executed_at: DateTime<Utc>,
    ) -> Result<usize, diesel::result::Error> {
        diesel::update(scheduled_events::table.filter(scheduled_events::id.eq(id)))
            .set((
                scheduled_events::status.eq(SCHEDULE_STATUS_COMPLETED),
                scheduled_events::executed_at.eq(Some(executed_at)),
            ))
            .execute(conn)
    }

    /// Marks a claimed row failed, inside the claiming transaction.
    pub fn mark_failed(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        error: &str,
    ) -> Result<usize, diesel::result::Error> {
        diesel::update(scheduled_events::table.filter(scheduled_events::id.eq(id)))
            .set((
                scheduled_events::status.eq(SCHEDULE_STATUS_FAILED),
                scheduled_events::error.eq(Some(error)),
            ))
            .execute(conn)
    }

    /// Deletes a schedule, scoped to an org.
    pub fn delete(&self, org_id: &str, id: Uuid) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::delete(
            scheduled_events::table
                .filter(scheduled_events::org_id.eq(org_id))
                .filter(scheduled_events::id.eq(id)),
        )
        .execute(conn)
    }
}
