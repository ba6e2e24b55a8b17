/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Utility functions and structures for the notif hub.
//!
//! This module contains helper functions and structures used throughout the
//! hub, including admin key management, the audit logger, the rate limiter
//! and shutdown procedures.

use notif_models::schema::admin_role;
use notif_utils::config::Settings;
use notif_utils::logging::prelude::*;
use chrono::Utc;
use diesel::prelude::*;
use std::fs;
use std::path::Path;
use tokio::sync::oneshot;
use uuid::Uuid;

pub mod audit;
pub mod pak;
pub mod ratelimit;

/// Handles the shutdown process for the hub.
///
/// This function waits for a shutdown signal and then performs cleanup tasks.
pub async fn shutdown(shutdown_rx: oneshot::Receiver<()>) {
    let _ = shutdown_rx.await;
    // Remove the temporary key file
    let _ = fs::remove_file("/tmp/notif-keys/key.txt");
}

/// Represents an admin key in the database.
#[derive(Queryable, Selectable, Identifiable, AsChangeset, Debug, Clone)]
#[diesel(table_name = admin_role)]
pub struct AdminKey {
    pub id: Uuid,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub pak_hash: String,
}

/// Represents a new admin key to be inserted into the database.
#[derive(Insertable)]
#[diesel(table_name = admin_role)]
pub struct NewAdminKey {
    pub pak_hash: String,
}

/// Performs first-time startup operations.
///
/// This function is called when the hub starts for the first time and sets up
/// the initial admin key.
pub fn first_startup(
    conn: &mut PgConnection,
    config: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    upsert_admin(conn, config)
}

/// Creates a new PAK (Pre-Authentication Key) and its hash.
fn create_pak() -> Result<(String, String), Box<dyn std::error::Error>> {
    let controller = pak::create_pak_controller(None);
    controller
        .unwrap()
        .try_generate_key_and_hash()
        .map(|(pak, hash)| (pak.to_string(), hash))
        .map_err(|e| e.into())
}

/// Updates or inserts the admin key.
///
/// Uses the configured hash when one is provided; otherwise generates a fresh
/// key and writes it to a temporary file for the operator to collect.
pub fn upsert_admin(
    conn: &mut PgConnection,
    config: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let pak_hash = match &config.hub.pak_hash {
        Some(hash) if !hash.is_empty() => {
            if !validate_pak_hash(hash) {
                return Err("Invalid PAK hash provided in configuration".into());
            }
            hash.clone()
        }
        _ => {
            let (pak, hash) = create_pak()?;

            info!("Writing admin PAK to temporary file");
            let key_path = Path::new("/tmp/notif-keys/key.txt");
            fs::create_dir_all(key_path.parent().unwrap())?;
            fs::write(key_path, pak)?;

            hash
        }
    };

    // Update or insert admin key
    let existing_admin_key = admin_role::table
        .select(admin_role::id)
        .first::<Uuid>(conn)
        .optional()?;

    match existing_admin_key {
        Some(id) => {
            diesel::update(admin_role::table.find(id))
                .set(admin_role::pak_hash.eq(&pak_hash))
                .execute(conn)?;
        }
        None => {
            diesel::insert_into(admin_role::table)
                .values(&NewAdminKey {
                    pak_hash: pak_hash.clone(),
                })
                .execute(conn)?;
        }
    }

    Ok(())
}

fn validate_pak_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_pak_hash() {
        assert!(validate_pak_hash(&"a".repeat(64)));
        assert!(validate_pak_hash(&"0123456789abcdef".repeat(4)));

        assert!(!validate_pak_hash("short"));
        assert!(!validate_pak_hash(&"z".repeat(64)));
    }
}
