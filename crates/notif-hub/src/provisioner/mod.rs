/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Tenant account provisioning.
//!
//! Creates orgs with ephemeral account keypairs, derives account JWTs from
//! the org rows and pushes them to the bus via the system connection's
//! claims-update channel. JWTs are never stored; the database is the single
//! source of truth and tokens are rebuilt on every push.

pub mod jwt;
pub mod limits;

use std::time::Duration;

use async_trait::async_trait;
use nkeys::KeyPair;
use notif_models::models::audit_logs::{
    ACTION_JWT_PUSH, ACTION_JWT_ROLLBACK, ACTION_ORG_CREATED, ACTOR_TYPE_SYSTEM,
    RESOURCE_TYPE_JWT, RESOURCE_TYPE_ORG,
};
use notif_models::models::orgs::{validate_org_id, NewOrg, Org};
use notif_utils::config::Tiers;
use notif_utils::logging::prelude::*;
use thiserror::Error;

use crate::dal::DAL;
use crate::utils::audit;

use limits::default_tier_limits;

/// Subject of the system-level claims update channel.
pub const CLAIMS_UPDATE_SUBJECT: &str = "$SYS.REQ.CLAIMS.UPDATE";

/// Default timeout for a single claims push.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from provisioning operations
#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// Org id failed validation
    #[error("Invalid org id: {0}")]
    InvalidOrgId(String),

    /// Org id collision
    #[error("Org '{0}' already exists")]
    AlreadyExists(String),

    /// Org not found
    #[error("Org '{0}' not found")]
    NotFound(String),

    /// Database failure
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// JWT construction failure; deterministic, retry will fail identically
    #[error("JWT build error: {0}")]
    Jwt(String),

    /// The claims channel replied with a rejection
    #[error("Claims push rejected: {0}")]
    PushRejected(String),

    /// The claims push did not complete
    #[error("Claims push failed: {0}")]
    PushFailed(String),

    /// A batch push failed; already-pushed orgs were rolled back
    #[error("Batch push failed for '{org_id}': {reason} (rolled back: {rolled_back:?})")]
    BatchFailed {
        org_id: String,
        reason: String,
        rolled_back: Vec<String>,
    },
}

/// Seam for pushing account JWTs to the bus.
///
/// The production implementation sends a request over the system connection;
/// tests substitute a recording mock.
#[async_trait]
pub trait ClaimsPusher: Send + Sync {
    /// Pushes one account JWT, returning once the bus accepted it.
    async fn push(&self, jwt: &str) -> Result<(), ProvisionerError>;
}

/// Pushes claims via request/reply on the system connection.
pub struct SysConnPusher {
    client: async_nats::Client,
    timeout: Duration,
}

impl SysConnPusher {
    /// Creates a pusher over the system connection.
    pub fn new(client: async_nats::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ClaimsPusher for SysConnPusher {
    async fn push(&self, jwt: &str) -> Result<(), ProvisionerError> {
        let request = self
            .client
            .request(CLAIMS_UPDATE_SUBJECT, jwt.to_string().into_bytes().into());

        let reply = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                ProvisionerError::PushFailed(format!(
                    "claims update timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| ProvisionerError::PushFailed(e.to_string()))?;

        let body = String::from_utf8_lossy(&reply.payload);
        if body.starts_with('-') {
            return Err(ProvisionerError::PushRejected(body.trim().to_string()));
        }

        Ok(())
    }
}

/// The tenant account provisioner.
pub struct Provisioner {
    dal: DAL,
    operator: KeyPair,
    tiers: Tiers,
}

impl Provisioner {
    /// Creates a provisioner around the operator signing key.
    pub fn new(dal: DAL, operator: KeyPair, tiers: Tiers) -> Self {
        Self {
            dal,
            operator,
            tiers,
        }
    }

    /// The operator's public key.
    pub fn operator_public_key(&self) -> String {
        self.operator.public_key()
    }

    /// Creates an org together with a fresh account keypair.
    ///
    /// The seed of the returned keypair exists only in process memory; the
    /// database stores the public key.
    pub fn create_org(&self, id: &str, name: &str) -> Result<(Org, KeyPair), ProvisionerError> {
        validate_org_id(id).map_err(ProvisionerError::InvalidOrgId)?;

        let account_kp = KeyPair::new_account();
        let new_org = NewOrg::new(id.to_string(), name.to_string(), account_kp.public_key())
            .map_err(ProvisionerError::InvalidOrgId)?;

        let org = self.dal.orgs().create(&new_org).map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => ProvisionerError::AlreadyExists(id.to_string()),
            other => ProvisionerError::Database(other),
        })?;

        audit::log_action(
            ACTOR_TYPE_SYSTEM,
            None,
            ACTION_ORG_CREATED,
            RESOURCE_TYPE_ORG,
            Some(org.id.clone()),
            Some(serde_json::json!({"tier": org.billing_tier})),
            None,
        );

        info!("Created org '{}' with account {}", org.id, org.nats_public_key);

        Ok((org, account_kp))
    }

    /// Builds the account JWT for an org from current database state.
    pub fn build_account_jwt(&self, org_id: &str) -> Result<String, ProvisionerError> {
        let org = self
            .dal
            .orgs()
            .get(org_id)?
            .ok_or_else(|| ProvisionerError::NotFound(org_id.to_string()))?;

        let limits = default_tier_limits(&org.billing_tier, &self.tiers);
        jwt::build_account_jwt(&org.name, &org.nats_public_key, &limits, &self.operator)
    }

    /// Builds the unlimited system account JWT.
    pub fn build_system_account_jwt(&self, sys_pub: &str) -> Result<String, ProvisionerError> {
        jwt::build_system_account_jwt(sys_pub, &self.operator)
    }

    /// Builds a user JWT for connection credentials, signed by the account key.
    pub fn build_user_jwt(
        &self,
        org_id: &str,
        user_pub: &str,
        account_kp: &KeyPair,
    ) -> Result<String, ProvisionerError> {
        jwt::build_user_jwt(&format!("{}-user", org_id), user_pub, account_kp)
    }

    /// Rebuilds one org's JWT from the database and pushes it.
    pub async fn rebuild_and_push(
        &self,
        org_id: &str,
        pusher: &dyn ClaimsPusher,
    ) -> Result<(), ProvisionerError> {
        let jwt = self.build_account_jwt(org_id)?;
        pusher.push(&jwt).await?;

        audit::log_action(
            ACTOR_TYPE_SYSTEM,
            None,
            ACTION_JWT_PUSH,
            RESOURCE_TYPE_JWT,
            Some(org_id.to_string()),
            None,
            None,
        );

        debug!("Pushed account JWT for org '{}'", org_id);
        Ok(())
    }

    /// Rebuilds and pushes JWTs for several orgs with rollback on failure.
    ///
    /// Phase 1 builds every JWT without side effects; build errors are
    /// deterministic and abort the batch before anything was pushed. Phase 2
    /// pushes sequentially; on failure, every already-pushed org is re-pushed
    /// from current database state and the error names the rolled-back set.
    pub async fn rebuild_and_push_multiple(
        &self,
        org_ids: &[String],
        pusher: &dyn ClaimsPusher,
    ) -> Result<(), ProvisionerError> {
        // Phase 1: build everything up front.
        let mut builds = Vec::with_capacity(org_ids.len());
        for org_id in org_ids {
            builds.push((org_id.clone(), self.build_account_jwt(org_id)?));
        }

        // Phase 2: push, rolling back on failure.
        let result = push_batch(&builds, &|org_id| self.build_account_jwt(org_id), pusher).await;

        match &result {
            Ok(()) => {
                for org_id in org_ids {
                    audit::log_action(
                        ACTOR_TYPE_SYSTEM,
                        None,
                        ACTION_JWT_PUSH,
                        RESOURCE_TYPE_JWT,
                        Some(org_id.clone()),
                        None,
                        None,
                    );
                }
            }
            Err(ProvisionerError::BatchFailed {
                org_id,
                rolled_back,
                ..
            }) => {
                audit::log_action(
                    ACTOR_TYPE_SYSTEM,
                    None,
                    ACTION_JWT_ROLLBACK,
                    RESOURCE_TYPE_JWT,
                    Some(org_id.clone()),
                    Some(serde_json::json!({
                        "batch": org_ids,
                        "rolled_back": rolled_back,
                    })),
                    None,
                );
            }
            Err(_) => {}
        }

        result
    }

    /// Rotates an org's account keypair.
    ///
    /// Mints a fresh keypair, stores the new public key and returns the
    /// keypair so the pool can redial. The caller is expected to follow the
    /// rotation runbook: rebuild-and-push, then verify every org connects.
    pub fn rotate_account(&self, org_id: &str) -> Result<(Org, KeyPair), ProvisionerError> {
        let account_kp = KeyPair::new_account();
        let org = self
            .dal
            .orgs()
            .update_public_key(org_id, &account_kp.public_key())
            .map_err(|e| match e {
                diesel::result::Error::NotFound => ProvisionerError::NotFound(org_id.to_string()),
                other => ProvisionerError::Database(other),
            })?;

        info!("Rotated account key for org '{}'", org_id);
        Ok((org, account_kp))
    }
}

/// Pushes pre-built JWTs sequentially, rolling back on the first failure.
///
/// `rebuild` produces a fresh JWT from current database state; it is invoked
/// during rollback so the re-pushed tokens reflect the source of truth, not
/// the possibly stale batch builds.
async fn push_batch(
    builds: &[(String, String)],
    rebuild: &dyn Fn(&str) -> Result<String, ProvisionerError>,
    pusher: &dyn ClaimsPusher,
) -> Result<(), ProvisionerError> {
    let mut pushed: Vec<&str> = Vec::with_capacity(builds.len());

    for (org_id, jwt) in builds {
        match pusher.push(jwt).await {
            Ok(()) => pushed.push(org_id),
            Err(e) => {
                let mut rolled_back = Vec::with_capacity(pushed.len());

                for prior in &pushed {
                    match rebuild(prior) {
                        Ok(jwt) => match pusher.push(&jwt).await {
                            Ok(()) => rolled_back.push((*prior).to_string()),
                            Err(push_err) => {
                                error!(
                                    "Rollback push failed for org '{}': {}",
                                    prior, push_err
                                );
                            }
                        },
                        Err(build_err) => {
                            error!(
                                "Rollback rebuild failed for org '{}': {}",
                                prior, build_err
                            );
                        }
                    }
                }

                return Err(ProvisionerError::BatchFailed {
                    org_id: org_id.clone(),
                    reason: e.to_string(),
                    rolled_back,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records pushes and fails on a configured token marker.
    struct MockPusher {
        pushed: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl MockPusher {
        fn new(fail_on: Option<&str>) -> Self {
            Self {
                pushed: Mutex::new(Vec::new()),
                fail_on: fail_on.map(String::from),
            }
        }

        fn pushed(&self) -> Vec<String> {
            self.pushed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClaimsPusher for MockPusher {
        async fn push(&self, jwt: &str) -> Result<(), ProvisionerError> {
            if let Some(marker) = &self.fail_on {
                if jwt.contains(marker.as_str()) {
                    return Err(ProvisionerError::PushRejected("-ERR refused".to_string()));
                }
            }
            self.pushed.lock().unwrap().push(jwt.to_string());
            Ok(())
        }
    }

    fn batch_builds() -> Vec<(String, String)> {
        vec![
            ("o1".to_string(), "batch-jwt-o1".to_string()),
            ("o2".to_string(), "batch-jwt-o2".to_string()),
            ("o3".to_string(), "batch-jwt-o3".to_string()),
        ]
    }

    #[tokio::test]
    async fn test_push_batch_all_succeed() {
        let pusher = MockPusher::new(None);
        let rebuild = |org_id: &str| Ok(format!("rebuilt-{}", org_id));

        let result = push_batch(&batch_builds(), &rebuild, &pusher).await;
        assert!(result.is_ok());
        assert_eq!(
            pusher.pushed(),
            vec!["batch-jwt-o1", "batch-jwt-o2", "batch-jwt-o3"]
        );
    }

    #[tokio::test]
    async fn test_push_batch_rolls_back_on_failure() {
        // o2's push fails; o1 must be re-pushed from "current DB state"
        let pusher = MockPusher::new(Some("batch-jwt-o2"));
        let rebuild = |org_id: &str| Ok(format!("rebuilt-{}", org_id));

        let result = push_batch(&batch_builds(), &rebuild, &pusher).await;

        match result {
            Err(ProvisionerError::BatchFailed {
                org_id,
                rolled_back,
                ..
            }) => {
                assert_eq!(org_id, "o2");
                assert_eq!(rolled_back, vec!["o1".to_string()]);
            }
            other => panic!("expected BatchFailed, got {:?}", other.err()),
        }

        // o1 pushed, then its rollback rebuild pushed; o3 never touched
        let pushed = pusher.pushed();
        assert_eq!(pushed, vec!["batch-jwt-o1", "rebuilt-o1"]);
        assert!(!pushed.iter().any(|j| j.contains("o3")));
    }

    #[tokio::test]
    async fn test_push_batch_first_failure_rolls_back_nothing() {
        let pusher = MockPusher::new(Some("batch-jwt-o1"));
        let rebuild = |org_id: &str| Ok(format!("rebuilt-{}", org_id));

        let result = push_batch(&batch_builds(), &rebuild, &pusher).await;

        match result {
            Err(ProvisionerError::BatchFailed {
                org_id,
                rolled_back,
                ..
            }) => {
                assert_eq!(org_id, "o1");
                assert!(rolled_back.is_empty());
            }
            other => panic!("expected BatchFailed, got {:?}", other.err()),
        }

        assert!(pusher.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_push_batch_rollback_uses_current_state() {
        // The rollback must rebuild, not replay the stale batch token
        let pusher = MockPusher::new(Some("batch-jwt-o3"));
        let rebuild = |org_id: &str| Ok(format!("fresh-{}", org_id));

        let result = push_batch(&batch_builds(), &rebuild, &pusher).await;
        assert!(result.is_err());

        let pushed = pusher.pushed();
        assert!(pushed.contains(&"fresh-o1".to_string()));
        assert!(pushed.contains(&"fresh-o2".to_string()));
        assert!(!pushed.iter().any(|j| j.starts_with("batch-jwt-o3")));
    }
}
