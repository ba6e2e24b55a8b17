/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Project models.
//!
//! A project is a secondary namespace inside an organization; subjects on the
//! bus embed both the org id and the project id.

use crate::schema::projects;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A project record from the database.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = projects)]
pub struct Project {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning organization.
    pub org_id: String,
    /// URL-safe slug, unique within the org.
    pub slug: String,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
}

/// A new project to be inserted.
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = projects)]
pub struct NewProject {
    /// Owning organization.
    pub org_id: String,
    /// URL-safe slug.
    pub slug: String,
}

impl NewProject {
    /// Creates a new project.
    ///
    /// # Arguments
    /// * `org_id` - The owning org.
    /// * `slug` - Slug, `[a-z0-9-]{1,64}`.
    ///
    /// # Returns
    /// A Result containing the new project or a validation error.
    pub fn new(org_id: String, slug: String) -> Result<Self, String> {
        if org_id.is_empty() {
            return Err("Org id is required".to_string());
        }
        if slug.is_empty() || slug.len() > 64 {
            return Err("Slug must be 1-64 characters".to_string());
        }
        if !slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err("Slug may only contain lowercase letters, digits and '-'".to_string());
        }

        Ok(Self { org_id, slug })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_project_success() {
        assert!(NewProject::new("acme".into(), "checkout".into()).is_ok());
        assert!(NewProject::new("acme".into(), "checkout-v2".into()).is_ok());
    }

    #[test]
    fn test_new_project_invalid_slug() {
        assert!(NewProject::new("acme".into(), "".into()).is_err());
        assert!(NewProject::new("acme".into(), "Has Caps".into()).is_err());
        assert!(NewProject::new("acme".into(), "a".repeat(65)).is_err());
    }
}
