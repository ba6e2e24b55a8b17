/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! API key models.
//!
//! The full key material exists only at creation time and is returned to the
//! caller exactly once. Only the SHA-256 hash and a 12-character display
//! prefix are persisted.

use crate::schema::api_keys;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Number of leading key characters kept for display.
pub const KEY_PREFIX_LEN: usize = 12;

/// An API key record from the database.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = api_keys)]
pub struct ApiKey {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning organization.
    pub org_id: String,
    /// Owning project.
    pub project_id: Uuid,
    /// SHA-256 hash of the full key.
    #[serde(skip_serializing)]
    pub key_hash: String,
    /// First characters of the key for display.
    pub prefix: String,
    /// Per-key rate limit override (requests per second).
    pub rate_limit: Option<f64>,
    /// When the key was created.
    pub created_at: DateTime<Utc>,
    /// Last successful authentication with this key.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A new API key to be inserted.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = api_keys)]
pub struct NewApiKey {
    /// Owning organization.
    pub org_id: String,
    /// Owning project.
    pub project_id: Uuid,
    /// SHA-256 hash of the full key.
    pub key_hash: String,
    /// Display prefix.
    pub prefix: String,
    /// Per-key rate limit override.
    pub rate_limit: Option<f64>,
}

impl NewApiKey {
    /// Creates a new API key row from freshly generated key material.
    ///
    /// # Arguments
    /// * `org_id` - The owning org.
    /// * `project_id` - The owning project.
    /// * `key` - The full key string (only used to derive the display prefix).
    /// * `key_hash` - SHA-256 hash of the key.
    /// * `rate_limit` - Optional per-key rate limit override.
    ///
    /// # Returns
    /// A Result containing the new row or a validation error.
    pub fn new(
        org_id: String,
        project_id: Uuid,
        key: &str,
        key_hash: String,
        rate_limit: Option<f64>,
    ) -> Result<Self, String> {
        if org_id.is_empty() {
            return Err("Org id is required".to_string());
        }
        if key.len() < KEY_PREFIX_LEN {
            return Err("Key is too short".to_string());
        }
        if key_hash.is_empty() {
            return Err("Key hash is required".to_string());
        }
        if let Some(limit) = rate_limit {
            if limit <= 0.0 {
                return Err("Rate limit must be positive".to_string());
            }
        }

        Ok(Self {
            org_id,
            project_id,
            key_hash,
            prefix: key.chars().take(KEY_PREFIX_LEN).collect(),
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_api_key_prefix() {
        let key = NewApiKey::new(
            "acme".into(),
            Uuid::new_v4(),
            "notif_AbCdEf123456_rest-of-the-key",
            "deadbeef".into(),
            None,
        )
        .unwrap();
        assert_eq!(key.prefix, "notif_AbCdEf");
        assert_eq!(key.prefix.len(), KEY_PREFIX_LEN);
    }

    #[test]
    fn test_new_api_key_short_key() {
        let result = NewApiKey::new("acme".into(), Uuid::new_v4(), "short", "h".into(), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_api_key_bad_rate_limit() {
        let result = NewApiKey::new(
            "acme".into(),
            Uuid::new_v4(),
            "notif_AbCdEf123456",
            "h".into(),
            Some(0.0),
        );
        assert!(result.is_err());
    }
}
