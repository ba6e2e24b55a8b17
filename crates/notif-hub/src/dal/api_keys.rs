/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for API key operations.
//!
//! Keys are looked up by SHA-256 hash; the hash column is unique and indexed
//! so authentication is a single indexed lookup.

use crate::dal::DAL;
use chrono::Utc;
use notif_models::models::api_keys::{ApiKey, NewApiKey};
use notif_models::schema::api_keys;
use diesel::prelude::*;
use uuid::Uuid;

/// Data Access Layer for API key operations.
pub struct ApiKeysDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl ApiKeysDAL<'_> {
    /// Creates a new API key.
    pub fn create(&self, new_key: &NewApiKey) -> Result<ApiKey, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(api_keys::table)
            .values(new_key)
            .get_result(conn)
    }

    /// Gets an API key by id, scoped to an org.
    pub fn get(&self, org_id: &str, id: Uuid) -> Result<Option<ApiKey>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        api_keys::table
            .filter(api_keys::org_id.eq(org_id))
            .filter(api_keys::id.eq(id))
            .first(conn)
            .optional()
    }

    /// Gets an API key by hash (authentication path).
    pub fn get_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        api_keys::table
            .filter(api_keys::key_hash.eq(key_hash))
            .first(conn)
            .optional()
    }

    /// Lists an org's API keys.
    pub fn list(&self, org_id: &str) -> Result<Vec<ApiKey>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        api_keys::table
            .filter(api_keys::org_id.eq(org_id))
            .order(api_keys::created_at.desc())
            .load(conn)
    }

    /// Stamps an API key's last successful use.
    pub fn touch_last_used(&self, id: Uuid) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::update(api_keys::table.filter(api_keys::id.eq(id)))
            .set(api_keys::last_used_at.eq(Some(Utc::now())))
            .execute(conn)
    }

    /// Deletes an API key, scoped to an org.
    pub fn delete(&self, org_id: &str, id: Uuid) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::delete(
            api_keys::table
                .filter(api_keys::org_id.eq(org_id))
                .filter(api_keys::id.eq(id)),
        )
        .execute(conn)
    }
}
