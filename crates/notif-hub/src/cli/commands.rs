/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use std::sync::Arc;
use std::time::Duration;

use crate::api::{self, AppState};
use crate::dal::DAL;
use crate::db::create_connection_pool;
use crate::dlq::DlqManager;
use crate::policy::{start_policy_watcher, PolicyEnforcer, PolicyLoader};
use crate::pool::ClientPool;
use crate::provisioner::{Provisioner, SysConnPusher};
use crate::publisher::EventPublisher;
use crate::scheduler::{ScheduledWorker, SchedulerConfig};
use crate::utils;
use crate::utils::audit;
use crate::utils::ratelimit::RateLimiter;
use crate::webhook::{SsrfGuard, WebhookConfig, WebhookEngine};
use crate::ws::{SessionConfig, WsHub};
use nkeys::KeyPair;
use notif_models::models::orgs::NewOrg;
use notif_models::models::projects::NewProject;
use notif_utils::config::Settings;
use notif_utils::logging::prelude::*;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sql_query;
use diesel::sql_types::BigInt;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tokio::signal;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("../notif-models/migrations");

// Struct to hold the count result from SQL query
#[derive(QueryableByName, Debug)]
struct Count {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

/// Function to start the notif hub server
///
/// This function initializes the database, runs migrations, provisions every
/// org's bus account, starts the background engines and serves HTTP with
/// graceful shutdown support.
pub async fn serve(config: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting notif hub");

    // Create database connection pool
    info!("Creating database connection pool");
    let connection_pool = create_connection_pool(&config.database.url, 5);
    info!("Database connection pool created successfully");

    // Run pending migrations
    info!("Running pending database migrations");
    let mut conn = connection_pool.get().expect("Failed to get DB connection");

    conn.run_pending_migrations(MIGRATIONS)
        .expect("Failed to run migrations");
    info!("Database migrations completed successfully");

    // Check if this is the first time running the application
    let is_first_run = conn
        .transaction(|conn| {
            let result: Count =
                sql_query("SELECT COUNT(*) as count FROM app_initialization").get_result(conn)?;
            if result.count == 0 {
                sql_query("INSERT INTO app_initialization DEFAULT VALUES").execute(conn)?;
                Ok::<bool, DieselError>(true)
            } else {
                Ok::<bool, DieselError>(false)
            }
        })
        .expect("Failed to check initialization status");

    if is_first_run {
        info!("First time application startup detected. Creating admin role...");
        utils::first_startup(&mut conn, config)?;
    } else {
        info!("Existing application detected. Proceeding with normal startup.");
    }

    // Initialize Data Access Layer
    info!("Initializing Data Access Layer");
    let dal = DAL::new(connection_pool.clone());

    // Initialize the audit logger
    info!("Initializing audit logger");
    audit::init_audit_logger(dal.clone(), config.hub.audit_buffer)
        .expect("Failed to initialize audit logger");

    // Load the operator signing key
    let operator = load_operator_key(config)?;
    info!("Operator key loaded: {}", operator.public_key());

    // Dial the system connection
    info!("Connecting to the bus at {}", config.bus.url);
    let pool = Arc::new(ClientPool::connect_system(&config.bus).await?);

    // Provisioner over the operator key
    let provisioner = Arc::new(Provisioner::new(
        dal.clone(),
        operator,
        config.tiers.clone(),
    ));

    // Policy loader with hot reload
    info!("Loading policies from '{}'", config.hub.policy_dir);
    let policy_loader = Arc::new(PolicyLoader::new(config.hub.policy_dir.clone()));
    let loaded = policy_loader.load_all();
    info!("Loaded {} policy file(s)", loaded);
    start_policy_watcher(policy_loader.clone());
    let policy = PolicyEnforcer::new(policy_loader, config.hub.policy_default_deny);

    // Publisher
    let publisher = EventPublisher::new(pool.clone(), policy.clone());

    // Webhook delivery engine, started and stopped through pool callbacks
    let webhook_engine = WebhookEngine::new(
        dal.clone(),
        pool.clone(),
        SsrfGuard::new(&config.ssrf),
        WebhookConfig {
            timeout: Duration::from_secs(config.hub.webhook_timeout_seconds),
            cache_ttl: Duration::from_secs(config.hub.webhook_cache_ttl_seconds),
            worker_pool_size: config.hub.webhook_worker_pool_size,
        },
    );
    {
        let on_created = webhook_engine.clone();
        let on_deleted = webhook_engine.clone();
        pool.set_callbacks(
            Box::new(move |org_id| on_created.start_org(org_id)),
            Box::new(move |org_id| on_deleted.stop_org(org_id)),
        );
    }

    // Bring up every org account before serving, bounded by the boot budget
    info!("Bootstrapping org connections");
    let boot_budget = Duration::from_secs(config.hub.boot_timeout_seconds);
    match tokio::time::timeout(
        boot_budget,
        bootstrap_orgs(&dal, &provisioner, &pool, config),
    )
    .await
    {
        Ok(Ok(count)) => info!("{} org connection(s) established", count),
        Ok(Err(e)) => warn!("Org bootstrap incomplete: {} (serving DEGRADED)", e),
        Err(_) => warn!(
            "Org bootstrap exceeded {}s (serving DEGRADED)",
            boot_budget.as_secs()
        ),
    }

    // Scheduled worker
    let scheduler = Arc::new(ScheduledWorker::new(
        dal.clone(),
        publisher.clone(),
        SchedulerConfig {
            poll_interval: Duration::from_secs(config.hub.scheduler_poll_interval_seconds),
            batch_size: config.hub.scheduler_batch_size,
        },
    ));
    scheduler.clone().start();

    // DLQ manager
    let dlq = DlqManager::new(pool.clone(), publisher.clone());

    // Configure API routes
    info!("Configuring API routes");
    let state = AppState {
        dal,
        pool: pool.clone(),
        publisher,
        scheduler,
        dlq,
        policy,
        ratelimit: RateLimiter::new(&config.ratelimit),
        provisioner,
        webhook_engine: webhook_engine.clone(),
        ws_hub: Arc::new(WsHub::new()),
        ws_config: SessionConfig {
            send_buffer: config.hub.ws_send_buffer,
            max_ack_pending: config.hub.ws_max_ack_pending,
        },
    };
    let app = api::configure_api_routes(state);

    // Set up the server address
    let addr = config.hub.bind_address.clone();
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Set up shutdown signal handler
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
        shutdown_tx.send(()).ok();
    });

    // Start the server with graceful shutdown
    info!("Notif hub is now running");
    axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown(shutdown_rx))
        .await?;

    // Drain within the shutdown budget: stop consumers, flush audit
    info!("Shutting down");
    let budget = Duration::from_secs(config.hub.shutdown_budget_seconds);
    let _ = tokio::time::timeout(budget, async {
        webhook_engine.stop_all();
        audit::close().await;
    })
    .await;

    Ok(())
}

/// Loads the operator keypair from configuration, or mints an ephemeral one.
///
/// An ephemeral operator only makes sense against a development server that
/// skips JWT verification; production deployments configure the seed.
fn load_operator_key(config: &Settings) -> Result<KeyPair, Box<dyn std::error::Error>> {
    if config.bus.operator_seed.is_empty() {
        warn!("No operator seed configured; minting an ephemeral operator key");
        return Ok(KeyPair::new_operator());
    }
    KeyPair::from_seed(&config.bus.operator_seed)
        .map_err(|e| format!("Invalid operator seed: {}", e).into())
}

/// Pushes every org's JWT and dials its connection.
///
/// Account seeds never survive a restart: each boot mints a fresh keypair,
/// stores its public key and installs a fresh JWT. Per-org failures are
/// logged and skipped so one broken tenant cannot block the rest.
async fn bootstrap_orgs(
    dal: &DAL,
    provisioner: &Arc<Provisioner>,
    pool: &Arc<ClientPool>,
    config: &Settings,
) -> Result<usize, Box<dyn std::error::Error>> {
    let orgs = dal.orgs().list()?;
    let pusher = SysConnPusher::new(
        pool.system_conn().nats_client().clone(),
        Duration::from_secs(config.bus.jwt_push_timeout_seconds),
    );

    let mut connected = 0;
    for org in orgs {
        let account_kp = Arc::new(KeyPair::new_account());

        if let Err(e) = dal
            .orgs()
            .update_public_key(&org.id, &account_kp.public_key())
        {
            error!("Failed to store new account key for org '{}': {:?}", org.id, e);
            continue;
        }

        if let Err(e) = provisioner.rebuild_and_push(&org.id, &pusher).await {
            error!("JWT push failed for org '{}': {}", org.id, e);
            continue;
        }

        match pool.add(&org.id, account_kp).await {
            Ok(_) => connected += 1,
            Err(e) => error!("Connection failed for org '{}': {}", org.id, e),
        }
    }

    Ok(connected)
}

/// Function to rotate the admin key
///
/// This function generates a new admin key and updates it in the database.
pub fn rotate_admin(config: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    info!("Rotating admin key");

    let mut conn = PgConnection::establish(&config.database.url)
        .expect("Failed to establish database connection");

    utils::upsert_admin(&mut conn, config)?;

    info!("Admin key rotated successfully");
    Ok(())
}

/// Creates an org row from the CLI.
///
/// The bus account is (re)provisioned at serve time, when a fresh account
/// keypair is minted and pushed.
pub fn create_org(
    config: &Settings,
    id: String,
    name: String,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Creating new org: {}", id);

    let pool = create_connection_pool(&config.database.url, 1);
    let dal = DAL::new(pool.clone());

    let account_kp = KeyPair::new_account();
    let new_org = NewOrg::new(id, name, account_kp.public_key())
        .map_err(|e| format!("Failed to create org: {}", e))?;

    let org = dal.orgs().create(&new_org)?;

    info!("Successfully created org: {}", org.id);
    println!("Org created successfully:");
    println!("ID: {}", org.id);
    println!("Name: {}", org.name);
    println!("Account public key: {}", org.nats_public_key);

    Ok(())
}

/// Creates a project row from the CLI.
pub fn create_project(
    config: &Settings,
    org: String,
    slug: String,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Creating new project '{}' in org '{}'", slug, org);

    let pool = create_connection_pool(&config.database.url, 1);
    let dal = DAL::new(pool.clone());

    let new_project =
        NewProject::new(org, slug).map_err(|e| format!("Failed to create project: {}", e))?;

    let project = dal.projects().create(&new_project)?;

    info!("Successfully created project with ID: {}", project.id);
    println!("Project created successfully:");
    println!("ID: {}", project.id);
    println!("Org: {}", project.org_id);
    println!("Slug: {}", project.slug);

    Ok(())
}
