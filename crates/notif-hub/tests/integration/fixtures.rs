//! Test fixture for the notif hub.
//!
//! Sets up a test database connection, runs migrations inside a test
//! transaction, and provides helpers for inserting tenants, projects,
//! webhooks and schedules.

use chrono::Utc;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenv::dotenv;
use notif_hub::dal::DAL;
use notif_hub::db::create_connection_pool;
use notif_models::models::orgs::{NewOrg, Org};
use notif_models::models::projects::{NewProject, Project};
use notif_models::models::scheduled_events::{NewScheduledEvent, ScheduledEvent};
use notif_models::models::webhooks::{NewWebhook, Webhook};
use std::env;
use uuid::Uuid;

/// Embedded migrations for the test database.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("../notif-models/migrations");

/// Represents a test fixture for the notif hub.
#[derive(Clone)]
pub struct TestFixture {
    /// The Data Access Layer (DAL) instance for database operations.
    pub dal: DAL,
}

impl TestFixture {
    /// Creates a new TestFixture instance.
    ///
    /// # Panics
    ///
    /// Panics if DATABASE_URL is unset or the database is unreachable.
    pub fn new() -> Self {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        // Single connection so the test transaction covers every DAL call
        let connection_pool = create_connection_pool(&database_url, 1);
        let dal = DAL::new(connection_pool.clone());

        let mut conn = connection_pool.get().expect("Failed to get DB connection");
        use diesel::connection::Connection;
        conn.begin_test_transaction()
            .expect("Failed to start test transaction");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("Failed to run migrations");
        drop(conn);

        TestFixture { dal }
    }

    /// Inserts a test org with a unique id.
    pub fn insert_test_org(&self) -> Org {
        let id = format!("org-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let new_org = NewOrg::new(
            id,
            "Test Org".to_string(),
            format!("A{}", Uuid::new_v4().simple()),
        )
        .expect("Failed to create NewOrg");

        self.dal.orgs().create(&new_org).expect("Failed to create org")
    }

    /// Inserts a test project under an org.
    pub fn insert_test_project(&self, org_id: &str) -> Project {
        let slug = format!("proj-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let new_project =
            NewProject::new(org_id.to_string(), slug).expect("Failed to create NewProject");

        self.dal
            .projects()
            .create(&new_project)
            .expect("Failed to create project")
    }

    /// Inserts an enabled test webhook.
    pub fn insert_test_webhook(&self, org_id: &str, project_id: Uuid, topics: Vec<&str>) -> Webhook {
        let new_webhook = NewWebhook::new(
            org_id.to_string(),
            project_id,
            "https://example.com/hook".to_string(),
            topics.into_iter().map(String::from).collect(),
            "ab".repeat(32),
        )
        .expect("Failed to create NewWebhook");

        self.dal
            .webhooks()
            .create(&new_webhook)
            .expect("Failed to create webhook")
    }

    /// Inserts a pending schedule due `in_seconds` from now.
    pub fn insert_test_schedule(
        &self,
        org_id: &str,
        project_id: Uuid,
        in_seconds: i64,
    ) -> ScheduledEvent {
        let new_schedule = NewScheduledEvent::new(
            org_id.to_string(),
            project_id,
            "reminders.fire".to_string(),
            serde_json::json!({"user": "u1"}),
            Utc::now() + chrono::Duration::seconds(in_seconds),
        )
        .expect("Failed to create NewScheduledEvent");

        self.dal
            .scheduled_events()
            .create(&new_schedule)
            .expect("Failed to create schedule")
    }
}
