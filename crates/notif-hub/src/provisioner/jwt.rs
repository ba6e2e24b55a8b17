/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Account and user JWT construction.
//!
//! JWTs are derived views of the org rows: they are never stored and are
//! rebuilt from the database on every push. Claims are signed with the
//! operator nkey (accounts) or the account nkey (users) using the
//! ed25519-nkey algorithm the bus expects.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use nkeys::KeyPair;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::limits::TierLimits;
use super::ProvisionerError;

/// Fixed name for the system account.
pub const SYSTEM_ACCOUNT_NAME: &str = "SYS";

/// JWT header for nkey-signed tokens.
#[derive(Debug, Serialize)]
struct Header {
    typ: &'static str,
    alg: &'static str,
}

const HEADER: Header = Header {
    typ: "JWT",
    alg: "ed25519-nkey",
};

/// Account claims payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountClaims {
    /// Claims hash, computed over the serialized claims with an empty jti.
    pub jti: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Issuer: the operator public key.
    pub iss: String,
    /// Account display name.
    pub name: String,
    /// Subject: the account public key.
    pub sub: String,
    /// Account payload.
    pub nats: AccountNats,
}

/// The `nats` section of account claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountNats {
    pub limits: AccountLimits,
    #[serde(rename = "type")]
    pub claim_type: String,
    pub version: u8,
}

/// Account limit set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLimits {
    /// Maximum subscriptions (-1 unlimited).
    pub subs: i64,
    /// Maximum bytes in flight.
    pub data: i64,
    /// Maximum message payload.
    pub payload: i64,
    /// Maximum imports.
    pub imports: i64,
    /// Maximum exports.
    pub exports: i64,
    /// Wildcard exports allowed.
    pub wildcards: bool,
    /// Maximum connections.
    pub conn: i64,
    /// Maximum leaf node connections.
    pub leaf: i64,
    /// JetStream memory quota.
    pub mem_storage: i64,
    /// JetStream disk quota.
    pub disk_storage: i64,
    /// Maximum streams (-1 unlimited).
    pub streams: i64,
    /// Maximum consumers (-1 unlimited).
    pub consumer: i64,
}

impl AccountLimits {
    fn from_tier(limits: &TierLimits) -> Self {
        Self {
            subs: -1,
            data: limits.max_data,
            payload: limits.max_payload,
            imports: limits.max_imports,
            exports: limits.max_exports,
            wildcards: true,
            conn: limits.max_connections,
            leaf: 0,
            mem_storage: 0,
            disk_storage: limits.stream_max_bytes,
            streams: -1,
            consumer: -1,
        }
    }
}

/// User claims payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub jti: String,
    pub iat: i64,
    /// Issuer: the account public key.
    pub iss: String,
    pub name: String,
    /// Subject: the user public key.
    pub sub: String,
    pub nats: UserNats,
}

/// The `nats` section of user claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNats {
    pub subs: i64,
    pub data: i64,
    pub payload: i64,
    #[serde(rename = "type")]
    pub claim_type: String,
    pub version: u8,
}

/// Builds an account JWT for an org.
///
/// # Arguments
/// * `name` - Account display name (the org's name).
/// * `account_pub` - The account public key (claim subject).
/// * `limits` - Limits resolved from the org's billing tier.
/// * `operator` - The operator keypair signing the claim.
pub fn build_account_jwt(
    name: &str,
    account_pub: &str,
    limits: &TierLimits,
    operator: &KeyPair,
) -> Result<String, ProvisionerError> {
    let claims = AccountClaims {
        jti: String::new(),
        iat: Utc::now().timestamp(),
        iss: operator.public_key(),
        name: name.to_string(),
        sub: account_pub.to_string(),
        nats: AccountNats {
            limits: AccountLimits::from_tier(limits),
            claim_type: "account".to_string(),
            version: 2,
        },
    };

    encode(claims, operator)
}

/// Builds the unlimited system account JWT with the fixed name `SYS`.
pub fn build_system_account_jwt(
    sys_pub: &str,
    operator: &KeyPair,
) -> Result<String, ProvisionerError> {
    build_account_jwt(
        SYSTEM_ACCOUNT_NAME,
        sys_pub,
        &TierLimits::unlimited(),
        operator,
    )
}

/// Builds a user JWT signed by an account keypair.
///
/// Used only for connection credentials; user-level limits are unlimited and
/// enforcement happens at the account boundary.
pub fn build_user_jwt(
    name: &str,
    user_pub: &str,
    account: &KeyPair,
) -> Result<String, ProvisionerError> {
    let claims = UserClaims {
        jti: String::new(),
        iat: Utc::now().timestamp(),
        iss: account.public_key(),
        name: name.to_string(),
        sub: user_pub.to_string(),
        nats: UserNats {
            subs: -1,
            data: -1,
            payload: -1,
            claim_type: "user".to_string(),
            version: 2,
        },
    };

    encode(claims, account)
}

/// Encodes and signs a claims payload.
fn encode<C: Serialize + ClaimsJti>(mut claims: C, signer: &KeyPair) -> Result<String, ProvisionerError> {
    // jti is the hash of the claims serialized with an empty jti
    let unhashed =
        serde_json::to_vec(&claims).map_err(|e| ProvisionerError::Jwt(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&unhashed);
    claims.set_jti(hex::encode(hasher.finalize()));

    let header_json =
        serde_json::to_vec(&HEADER).map_err(|e| ProvisionerError::Jwt(e.to_string()))?;
    let claims_json =
        serde_json::to_vec(&claims).map_err(|e| ProvisionerError::Jwt(e.to_string()))?;

    let message = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );

    let signature = signer
        .sign(message.as_bytes())
        .map_err(|e| ProvisionerError::Jwt(format!("signing failed: {}", e)))?;

    Ok(format!("{}.{}", message, URL_SAFE_NO_PAD.encode(signature)))
}

/// Types that carry a jti claim.
trait ClaimsJti {
    fn set_jti(&mut self, jti: String);
}

impl ClaimsJti for AccountClaims {
    fn set_jti(&mut self, jti: String) {
        self.jti = jti;
    }
}

impl ClaimsJti for UserClaims {
    fn set_jti(&mut self, jti: String) {
        self.jti = jti;
    }
}

/// Decodes the claims section of a JWT without verifying the signature.
pub fn decode_claims<C: for<'de> Deserialize<'de>>(jwt: &str) -> Result<C, ProvisionerError> {
    let claims_b64 = jwt
        .split('.')
        .nth(1)
        .ok_or_else(|| ProvisionerError::Jwt("malformed token".to_string()))?;
    let claims_json = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .map_err(|e| ProvisionerError::Jwt(format!("bad base64: {}", e)))?;
    serde_json::from_slice(&claims_json).map_err(|e| ProvisionerError::Jwt(e.to_string()))
}

/// Verifies a JWT's signature against the issuer public key in its claims.
pub fn verify_signature(jwt: &str, issuer_pub: &str) -> Result<(), ProvisionerError> {
    let mut parts = jwt.rsplitn(2, '.');
    let signature_b64 = parts
        .next()
        .ok_or_else(|| ProvisionerError::Jwt("malformed token".to_string()))?;
    let message = parts
        .next()
        .ok_or_else(|| ProvisionerError::Jwt("malformed token".to_string()))?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| ProvisionerError::Jwt(format!("bad base64: {}", e)))?;

    let verifier = KeyPair::from_public_key(issuer_pub)
        .map_err(|e| ProvisionerError::Jwt(format!("bad issuer key: {}", e)))?;
    verifier
        .verify(message.as_bytes(), &signature)
        .map_err(|e| ProvisionerError::Jwt(format!("signature invalid: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> TierLimits {
        TierLimits {
            max_connections: 10,
            max_data: 1 << 20,
            max_payload: 1 << 16,
            max_exports: 0,
            max_imports: 0,
            stream_max_age_seconds: 86400,
            stream_max_bytes: 1 << 24,
        }
    }

    #[test]
    fn test_account_jwt_round_trip() {
        let operator = KeyPair::new_operator();
        let account = KeyPair::new_account();

        let jwt =
            build_account_jwt("acme", &account.public_key(), &limits(), &operator).unwrap();
        let claims: AccountClaims = decode_claims(&jwt).unwrap();

        assert_eq!(claims.name, "acme");
        assert_eq!(claims.sub, account.public_key());
        assert_eq!(claims.iss, operator.public_key());
        assert_eq!(claims.nats.claim_type, "account");
        assert_eq!(claims.nats.limits.conn, 10);
        assert_eq!(claims.nats.limits.disk_storage, 1 << 24);
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn test_account_jwt_signature_verifies() {
        let operator = KeyPair::new_operator();
        let account = KeyPair::new_account();

        let jwt =
            build_account_jwt("acme", &account.public_key(), &limits(), &operator).unwrap();

        assert!(verify_signature(&jwt, &operator.public_key()).is_ok());

        let other = KeyPair::new_operator();
        assert!(verify_signature(&jwt, &other.public_key()).is_err());
    }

    #[test]
    fn test_system_account_jwt() {
        let operator = KeyPair::new_operator();
        let sys = KeyPair::new_account();

        let jwt = build_system_account_jwt(&sys.public_key(), &operator).unwrap();
        let claims: AccountClaims = decode_claims(&jwt).unwrap();

        assert_eq!(claims.name, SYSTEM_ACCOUNT_NAME);
        assert_eq!(claims.nats.limits.conn, -1);
        assert_eq!(claims.nats.limits.disk_storage, -1);
    }

    #[test]
    fn test_user_jwt_signed_by_account() {
        let account = KeyPair::new_account();
        let user = KeyPair::new_user();

        let jwt = build_user_jwt("acme-user", &user.public_key(), &account).unwrap();
        let claims: UserClaims = decode_claims(&jwt).unwrap();

        assert_eq!(claims.iss, account.public_key());
        assert_eq!(claims.sub, user.public_key());
        assert_eq!(claims.nats.claim_type, "user");
        assert!(verify_signature(&jwt, &account.public_key()).is_ok());
    }

    #[test]
    fn test_build_is_deterministic_modulo_iat() {
        let operator = KeyPair::new_operator();
        let account = KeyPair::new_account();

        let a: AccountClaims = decode_claims(
            &build_account_jwt("acme", &account.public_key(), &limits(), &operator).unwrap(),
        )
        .unwrap();
        let b: AccountClaims = decode_claims(
            &build_account_jwt("acme", &account.public_key(), &limits(), &operator).unwrap(),
        )
        .unwrap();

        assert_eq!(a.sub, b.sub);
        assert_eq!(a.name, b.name);
        assert_eq!(
            serde_json::to_value(&a.nats).unwrap(),
            serde_json::to_value(&b.nats).unwrap()
        );
    }
}
