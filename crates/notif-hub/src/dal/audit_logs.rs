/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for Audit Log operations.

use crate::dal::DAL;
use notif_models::models::audit_logs::{AuditLog, NewAuditLog};
use notif_models::schema::audit_logs;
use diesel::prelude::*;

/// Data Access Layer for Audit Log operations.
pub struct AuditLogsDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl AuditLogsDAL<'_> {
    /// Inserts one audit entry.
    pub fn create(&self, entry: &NewAuditLog) -> Result<AuditLog, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(audit_logs::table)
            .values(entry)
            .get_result(conn)
    }

    /// Inserts a batch of audit entries, returning the inserted count.
    pub fn create_batch(&self, entries: &[NewAuditLog]) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(audit_logs::table)
            .values(entries)
            .execute(conn)
    }

    /// Lists audit entries, newest first.
    pub fn list(&self, limit: i64, offset: i64) -> Result<Vec<AuditLog>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        audit_logs::table
            .order(audit_logs::created_at.desc())
            .limit(limit)
            .offset(offset)
            .load(conn)
    }

    /// Lists an org's audit entries, newest first.
    pub fn list_for_org(
        &self,
        org_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        audit_logs::table
            .filter(audit_logs::org_id.eq(org_id))
            .order(audit_logs::created_at.desc())
            .limit(limit)
            .offset(offset)
            .load(conn)
    }
}
