/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Organization models.
//!
//! An organization is a tenant of the hub. Every org owns exactly one account
//! on the message bus; the public key of the account keypair is stored here
//! while the seed only ever lives in process memory.

use crate::schema::orgs;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// Constants
// =============================================================================

/// Valid billing tiers
pub const BILLING_TIER_FREE: &str = "free";
pub const BILLING_TIER_PRO: &str = "pro";
pub const BILLING_TIER_ENTERPRISE: &str = "enterprise";

pub const VALID_BILLING_TIERS: &[&str] = &[
    BILLING_TIER_FREE,
    BILLING_TIER_PRO,
    BILLING_TIER_ENTERPRISE,
];

/// Maximum length of an org id
pub const MAX_ORG_ID_LEN: usize = 32;

// =============================================================================
// Models
// =============================================================================

/// An organization record from the database.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = orgs)]
pub struct Org {
    /// Tenant identifier, `[A-Za-z0-9_-]{1,32}`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Public key of the org's bus account.
    pub nats_public_key: String,
    /// Billing tier: free, pro, enterprise.
    pub billing_tier: String,
    /// When the org was created.
    pub created_at: DateTime<Utc>,
}

/// A new organization to be inserted.
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = orgs)]
pub struct NewOrg {
    /// Tenant identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Public key of the org's bus account.
    pub nats_public_key: String,
    /// Billing tier (defaults to free).
    pub billing_tier: String,
}

impl NewOrg {
    /// Creates a new organization row.
    ///
    /// # Arguments
    /// * `id` - Tenant identifier, validated against `[A-Za-z0-9_-]{1,32}`.
    /// * `name` - Human-readable name.
    /// * `nats_public_key` - Public key of the account keypair minted for this org.
    ///
    /// # Returns
    /// A Result containing the new org or a validation error.
    pub fn new(id: String, name: String, nats_public_key: String) -> Result<Self, String> {
        validate_org_id(&id)?;

        if name.trim().is_empty() {
            return Err("Name cannot be empty".to_string());
        }
        if name.len() > 255 {
            return Err("Name cannot exceed 255 characters".to_string());
        }
        if nats_public_key.is_empty() {
            return Err("Account public key is required".to_string());
        }

        Ok(Self {
            id,
            name,
            nats_public_key,
            billing_tier: BILLING_TIER_FREE.to_string(),
        })
    }
}

/// Changeset for updating an organization.
#[derive(Debug, Clone, Default, AsChangeset, Deserialize, ToSchema)]
#[diesel(table_name = orgs)]
pub struct UpdateOrg {
    /// New display name.
    pub name: Option<String>,
    /// New billing tier.
    pub billing_tier: Option<String>,
    /// New account public key (set on key rotation).
    pub nats_public_key: Option<String>,
}

/// Validates an org id against `^[A-Za-z0-9_-]{1,32}$`.
pub fn validate_org_id(id: &str) -> Result<(), String> {
    if id.is_empty() || id.len() > MAX_ORG_ID_LEN {
        return Err(format!(
            "Org id must be 1-{} characters",
            MAX_ORG_ID_LEN
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("Org id may only contain letters, digits, '_' and '-'".to_string());
    }
    Ok(())
}

/// Validates a billing tier string.
pub fn validate_billing_tier(tier: &str) -> Result<(), String> {
    if VALID_BILLING_TIERS.contains(&tier) {
        Ok(())
    } else {
        Err(format!("Unknown billing tier '{}'", tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_org_success() {
        let org = NewOrg::new(
            "acme".to_string(),
            "Acme Corp".to_string(),
            "ABCDEF".to_string(),
        );
        assert!(org.is_ok());
        let org = org.unwrap();
        assert_eq!(org.billing_tier, BILLING_TIER_FREE);
    }

    #[test]
    fn test_new_org_invalid_id() {
        assert!(NewOrg::new("".into(), "n".into(), "k".into()).is_err());
        assert!(NewOrg::new("has space".into(), "n".into(), "k".into()).is_err());
        assert!(NewOrg::new("dot.dot".into(), "n".into(), "k".into()).is_err());
        assert!(NewOrg::new("a".repeat(33), "n".into(), "k".into()).is_err());
    }

    #[test]
    fn test_new_org_id_boundary() {
        assert!(NewOrg::new("a".repeat(32), "n".into(), "k".into()).is_ok());
        assert!(NewOrg::new("a-b_C9".into(), "n".into(), "k".into()).is_ok());
    }

    #[test]
    fn test_new_org_empty_name() {
        let result = NewOrg::new("acme".into(), "   ".into(), "k".into());
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Name cannot be empty"));
    }

    #[test]
    fn test_validate_billing_tier() {
        assert!(validate_billing_tier("free").is_ok());
        assert!(validate_billing_tier("pro").is_ok());
        assert!(validate_billing_tier("enterprise").is_ok());
        assert!(validate_billing_tier("platinum").is_err());
    }
}
