/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Client pool: one system connection plus one connection per live org.
//!
//! The pool is the sole owner of bus connections. Org connections
//! authenticate as a user of the org's account (user JWT signed by the
//! in-memory account keypair), so tenant isolation is enforced by the bus
//! itself. Mutation is serialized through the write lock; the lock is never
//! held across network I/O: connections are fully established before they
//! are inserted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_nats::connection::State;
use async_nats::ConnectOptions;
use nkeys::KeyPair;
use notif_utils::config::Bus as BusConfig;
use notif_utils::logging::prelude::*;
use tokio::sync::RwLock;

use crate::bus::{BusClient, BusError, StreamSpec};
use crate::metrics;
use crate::provisioner;

/// Stream of events within each account.
pub const EVENTS_STREAM: &str = "NOTIF_EVENTS";
/// Stream of dead-lettered events within each account.
pub const DLQ_STREAM: &str = "NOTIF_DLQ";
/// Stream of webhook retry jobs within each account.
pub const WEBHOOK_RETRY_STREAM: &str = "WEBHOOK_RETRY";

/// Events are retained for a week; tier quotas bound the bytes.
const EVENTS_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);
/// The DLQ keeps messages longer than the source stream.
const DLQ_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 3600);
/// Retry jobs are short-lived.
const RETRY_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

/// Callback invoked when an org joins or leaves the pool.
pub type OrgCallback = Box<dyn Fn(&str) + Send + Sync>;

/// A live org connection.
#[derive(Clone)]
pub struct OrgConn {
    /// The authenticated bus client.
    pub bus: BusClient,
    /// The org account's public key at dial time.
    pub account_public_key: String,
    /// The account keypair; lives only in memory.
    pub account_kp: Arc<KeyPair>,
}

/// The client pool.
pub struct ClientPool {
    system: BusClient,
    orgs: RwLock<HashMap<String, OrgConn>>,
    config: BusConfig,
    on_org_created: std::sync::Mutex<Option<OrgCallback>>,
    on_org_deleted: std::sync::Mutex<Option<OrgCallback>>,
}

impl ClientPool {
    /// Dials the system connection and creates an empty pool.
    ///
    /// With a system account seed configured the connection authenticates
    /// with a system-account user JWT (the system account JWT itself is
    /// pre-installed in the resolver); otherwise it dials unauthenticated
    /// (single-account development servers).
    pub async fn connect_system(config: &BusConfig) -> Result<Self, BusError> {
        let options = if config.system_account_seed.is_empty() {
            base_options(config).name("notif-system".to_string())
        } else {
            let sys_account = KeyPair::from_seed(&config.system_account_seed)
                .map_err(|e| BusError::Connection(format!("bad system account seed: {}", e)))?;
            jwt_options(config, &sys_account, "notif-system")?
        };

        let client = options
            .connect(&config.url)
            .await
            .map_err(|e| BusError::Connection(format!("{}: {}", config.url, e)))?;

        info!("System connection established to {}", config.url);

        Ok(Self {
            system: BusClient::new(client),
            orgs: RwLock::new(HashMap::new()),
            config: config.clone(),
            on_org_created: std::sync::Mutex::new(None),
            on_org_deleted: std::sync::Mutex::new(None),
        })
    }

    /// Registers the org lifecycle callbacks.
    ///
    /// `on_created` runs after an org's connection is added; `on_deleted`
    /// runs before it is removed. The webhook engine hangs its per-org
    /// workers off these.
    pub fn set_callbacks(&self, on_created: OrgCallback, on_deleted: OrgCallback) {
        *self.on_org_created.lock().expect("callback lock poisoned") = Some(on_created);
        *self.on_org_deleted.lock().expect("callback lock poisoned") = Some(on_deleted);
    }

    /// The system connection.
    pub fn system_conn(&self) -> &BusClient {
        &self.system
    }

    /// Gets an org's connection.
    pub async fn get(&self, org_id: &str) -> Option<BusClient> {
        self.orgs.read().await.get(org_id).map(|c| c.bus.clone())
    }

    /// Gets an org's account keypair.
    pub async fn account_keypair(&self, org_id: &str) -> Option<Arc<KeyPair>> {
        self.orgs
            .read()
            .await
            .get(org_id)
            .map(|c| c.account_kp.clone())
    }

    /// Dials and registers a connection for an org.
    ///
    /// The connection is fully established and the per-account streams exist
    /// before the org becomes visible in the pool.
    pub async fn add(&self, org_id: &str, account_kp: Arc<KeyPair>) -> Result<BusClient, BusError> {
        let options = jwt_options_for_org(&self.config, org_id, &account_kp)?;

        let client = options
            .connect(&self.config.url)
            .await
            .map_err(|e| BusError::Connection(format!("org '{}': {}", org_id, e)))?;

        let bus = BusClient::new(client);
        ensure_account_streams(&bus).await?;

        let conn = OrgConn {
            bus: bus.clone(),
            account_public_key: account_kp.public_key(),
            account_kp,
        };

        {
            let mut orgs = self.orgs.write().await;
            orgs.insert(org_id.to_string(), conn);
            metrics::CONNECTED_ORGS.set(orgs.len() as i64);
        }

        info!("Org '{}' connected", org_id);

        if let Some(cb) = self
            .on_org_created
            .lock()
            .expect("callback lock poisoned")
            .as_ref()
        {
            cb(org_id);
        }

        Ok(bus)
    }

    /// Removes an org's connection, draining it best-effort.
    pub async fn remove(&self, org_id: &str) {
        if let Some(cb) = self
            .on_org_deleted
            .lock()
            .expect("callback lock poisoned")
            .as_ref()
        {
            cb(org_id);
        }

        let removed = {
            let mut orgs = self.orgs.write().await;
            let removed = orgs.remove(org_id);
            metrics::CONNECTED_ORGS.set(orgs.len() as i64);
            removed
        };

        if let Some(conn) = removed {
            if let Err(e) = conn.bus.nats_client().drain().await {
                warn!("Drain failed for org '{}': {}", org_id, e);
            }
            info!("Org '{}' disconnected", org_id);
        }
    }

    /// Lists org ids with live connections.
    pub async fn org_ids(&self) -> Vec<String> {
        self.orgs.read().await.keys().cloned().collect()
    }

    /// Number of live org connections.
    pub async fn org_count(&self) -> usize {
        self.orgs.read().await.len()
    }

    /// Orgs whose connection is not currently in the connected state.
    pub async fn disconnected_orgs(&self) -> Vec<String> {
        self.orgs
            .read()
            .await
            .iter()
            .filter(|(_, conn)| conn.bus.nats_client().connection_state() != State::Connected)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// True when the system connection and every org connection are up.
    pub async fn is_healthy(&self) -> bool {
        self.system.nats_client().connection_state() == State::Connected
            && self.disconnected_orgs().await.is_empty()
    }

    /// Connection state per org, for the health endpoint.
    pub async fn account_status(&self) -> HashMap<String, String> {
        self.orgs
            .read()
            .await
            .iter()
            .map(|(id, conn)| {
                let state = match conn.bus.nats_client().connection_state() {
                    State::Connected => "connected",
                    State::Disconnected => "disconnected",
                    State::Pending => "pending",
                };
                (id.clone(), state.to_string())
            })
            .collect()
    }
}

/// Shared connect options: infinite reconnect with a 1 s base backoff.
fn base_options(config: &BusConfig) -> ConnectOptions {
    apply_base(ConnectOptions::new(), config)
}

fn apply_base(options: ConnectOptions, config: &BusConfig) -> ConnectOptions {
    options
        .connection_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_seconds)))
        .max_reconnects(None::<usize>)
        .reconnect_delay_callback(|attempts| {
            Duration::from_secs(1).saturating_mul(attempts.min(30) as u32)
        })
        .event_callback(|event| async move {
            match event {
                async_nats::Event::Connected => info!("Bus connection restored"),
                async_nats::Event::Disconnected => warn!("Bus connection lost"),
                other => debug!("Bus connection event: {}", other),
            }
        })
}

/// Connect options authenticating as a fresh user of the given account.
fn jwt_options(
    config: &BusConfig,
    account_kp: &KeyPair,
    name: &str,
) -> Result<ConnectOptions, BusError> {
    let user_kp = Arc::new(KeyPair::new_user());
    let jwt = provisioner::jwt::build_user_jwt(name, &user_kp.public_key(), account_kp)
        .map_err(|e| BusError::Connection(format!("user jwt: {}", e)))?;

    let signer = user_kp.clone();
    let options = ConnectOptions::with_jwt(jwt, move |nonce| {
        let signer = signer.clone();
        async move {
            signer
                .sign(&nonce)
                .map_err(|e| async_nats::AuthError::new(e.to_string()))
        }
    })
    .name(name.to_string());

    Ok(apply_base(options, config))
}

fn jwt_options_for_org(
    config: &BusConfig,
    org_id: &str,
    account_kp: &KeyPair,
) -> Result<ConnectOptions, BusError> {
    jwt_options(config, account_kp, &format!("notif-{}", org_id))
}

/// Creates the three per-account streams if they do not exist yet.
async fn ensure_account_streams(bus: &BusClient) -> Result<(), BusError> {
    bus.ensure_stream(
        &StreamSpec::new(EVENTS_STREAM, vec!["events.>".to_string()])
            .with_max_age(EVENTS_MAX_AGE),
    )
    .await?;

    bus.ensure_stream(
        &StreamSpec::new(DLQ_STREAM, vec!["dlq.>".to_string()]).with_max_age(DLQ_MAX_AGE),
    )
    .await?;

    bus.ensure_stream(
        &StreamSpec::new(WEBHOOK_RETRY_STREAM, vec!["webhook-retry.>".to_string()])
            .with_max_age(RETRY_MAX_AGE),
    )
    .await?;

    Ok(())
}
