/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for Project operations.

use crate::dal::DAL;
use notif_models::models::projects::{NewProject, Project};
use notif_models::schema::projects;
use diesel::prelude::*;
use uuid::Uuid;

/// Data Access Layer for Project operations.
pub struct ProjectsDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl ProjectsDAL<'_> {
    /// Creates a new project.
    pub fn create(&self, new_project: &NewProject) -> Result<Project, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(projects::table)
            .values(new_project)
            .get_result(conn)
    }

    /// Gets a project by id, scoped to an org.
    pub fn get(&self, org_id: &str, id: Uuid) -> Result<Option<Project>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        projects::table
            .filter(projects::org_id.eq(org_id))
            .filter(projects::id.eq(id))
            .first(conn)
            .optional()
    }

    /// Gets a project by slug within an org.
    pub fn get_by_slug(
        &self,
        org_id: &str,
        slug: &str,
    ) -> Result<Option<Project>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        projects::table
            .filter(projects::org_id.eq(org_id))
            .filter(projects::slug.eq(slug))
            .first(conn)
            .optional()
    }

    /// Lists an org's projects.
    pub fn list(&self, org_id: &str) -> Result<Vec<Project>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        projects::table
            .filter(projects::org_id.eq(org_id))
            .order(projects::created_at.desc())
            .load(conn)
    }

    /// Deletes a project, scoped to an org.
    pub fn delete(&self, org_id: &str, id: Uuid) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::delete(
            projects::table
                .filter(projects::org_id.eq(org_id))
                .filter(projects::id.eq(id)),
        )
        .execute(conn)
    }
}
