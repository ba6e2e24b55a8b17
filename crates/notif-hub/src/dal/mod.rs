/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Data Access Layer (DAL) Module
//!
//! This module provides an abstraction layer for database operations in the
//! notif hub. It includes structures and methods for interacting with orgs,
//! projects, API keys, webhooks, deliveries, schedules and audit logs.
//!
//! ## Main Structures
//!
//! - `DAL`: The main Data Access Layer struct that provides access to all sub-DALs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use notif_hub::dal::DAL;
//! use notif_hub::db::create_connection_pool;
//!
//! let pool = create_connection_pool("postgres://localhost/notif", 5);
//! let dal = DAL::new(pool);
//!
//! let orgs = dal.orgs().list().expect("Failed to list orgs");
//! ```

use crate::db::ConnectionPool;

pub mod api_keys;
use api_keys::ApiKeysDAL;

pub mod audit_logs;
use audit_logs::AuditLogsDAL;

pub mod event_deliveries;
use event_deliveries::EventDeliveriesDAL;

pub mod orgs;
use orgs::OrgsDAL;

pub mod projects;
use projects::ProjectsDAL;

pub mod scheduled_events;
use scheduled_events::ScheduledEventsDAL;

pub mod webhook_deliveries;
use webhook_deliveries::WebhookDeliveriesDAL;

pub mod webhooks;
use webhooks::WebhooksDAL;

/// The main Data Access Layer struct.
///
/// This struct serves as the central point for database operations,
/// managing a connection pool and providing access to specific DAL
/// implementations for different entities.
#[derive(Clone)]
pub struct DAL {
    /// A connection pool for PostgreSQL database connections with schema support.
    pub pool: ConnectionPool,
}

impl DAL {
    /// Creates a new DAL instance with the given connection pool.
    pub fn new(pool: ConnectionPool) -> Self {
        DAL { pool }
    }

    /// Provides access to the Orgs Data Access Layer.
    pub fn orgs(&self) -> OrgsDAL {
        OrgsDAL { dal: self }
    }

    /// Provides access to the Projects Data Access Layer.
    pub fn projects(&self) -> ProjectsDAL {
        ProjectsDAL { dal: self }
    }

    /// Provides access to the API Keys Data Access Layer.
    pub fn api_keys(&self) -> ApiKeysDAL {
        ApiKeysDAL { dal: self }
    }

    /// Provides access to the Webhooks Data Access Layer.
    pub fn webhooks(&self) -> WebhooksDAL {
        WebhooksDAL { dal: self }
    }

    /// Provides access to the Webhook Deliveries Data Access Layer.
    pub fn webhook_deliveries(&self) -> WebhookDeliveriesDAL {
        WebhookDeliveriesDAL { dal: self }
    }

    /// Provides access to the Event Deliveries Data Access Layer.
    pub fn event_deliveries(&self) -> EventDeliveriesDAL {
        EventDeliveriesDAL { dal: self }
    }

    /// Provides access to the Scheduled Events Data Access Layer.
    pub fn scheduled_events(&self) -> ScheduledEventsDAL {
        ScheduledEventsDAL { dal: self }
    }

    /// Provides access to the Audit Logs Data Access Layer.
    pub fn audit_logs(&self) -> AuditLogsDAL {
        AuditLogsDAL { dal: self }
    }
}
