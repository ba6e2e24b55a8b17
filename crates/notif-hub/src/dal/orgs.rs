/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for Organization operations.

use crate::dal::DAL;
use notif_models::models::orgs::{NewOrg, Org, UpdateOrg};
use notif_models::schema::orgs;
use diesel::prelude::*;

/// Data Access Layer for Organization operations.
pub struct OrgsDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl OrgsDAL<'_> {
    /// Creates a new organization.
    ///
    /// # Arguments
    ///
    /// * `new_org` - The org to create.
    ///
    /// # Returns
    ///
    /// Returns the created Org record.
    pub fn create(&self, new_org: &NewOrg) -> Result<Org, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(orgs::table)
            .values(new_org)
            .get_result(conn)
    }

    /// Gets an organization by id.
    pub fn get(&self, id: &str) -> Result<Option<Org>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        orgs::table
            .filter(orgs::id.eq(id))
            .first(conn)
            .optional()
    }

    /// Lists all organizations, newest first.
    pub fn list(&self) -> Result<Vec<Org>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        orgs::table.order(orgs::created_at.desc()).load(conn)
    }

    /// Updates an organization.
    pub fn update(&self, id: &str, update: &UpdateOrg) -> Result<Org, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::update(orgs::table.filter(orgs::id.eq(id)))
            .set(update)
            .get_result(conn)
    }

    /// Updates an organization's account public key.
    pub fn update_public_key(
        &self,
        id: &str,
        public_key: &str,
    ) -> Result<Org, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::update(orgs::table.filter(orgs::id.eq(id)))
            .set(orgs::nats_public_key.eq(public_key))
            .get_result(conn)
    }

    /// Deletes an organization.
    ///
    /// Child rows (projects, keys, webhooks, schedules) cascade.
    pub fn delete(&self, id: &str) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::delete(orgs::table.filter(orgs::id.eq(id))).execute(conn)
    }

    /// Counts organizations.
    pub fn count(&self) -> Result<i64, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        orgs::table.count().get_result(conn)
    }
}
