/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Billing tier to account limit mapping.
//!
//! Tiers expand to the limit set applied to an org's account JWT. A value of
//! -1 means unlimited.

use notif_models::models::orgs::{
    BILLING_TIER_ENTERPRISE, BILLING_TIER_FREE, BILLING_TIER_PRO,
};
use notif_utils::config::{TierLimitValues, Tiers};

/// Account limits applied to a tenant's JWT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierLimits {
    /// Maximum concurrent connections.
    pub max_connections: i64,
    /// Maximum bytes in flight.
    pub max_data: i64,
    /// Maximum message payload in bytes.
    pub max_payload: i64,
    /// Maximum exported subjects.
    pub max_exports: i64,
    /// Maximum imported subjects.
    pub max_imports: i64,
    /// Maximum stream message age in seconds.
    pub stream_max_age_seconds: i64,
    /// JetStream disk quota in bytes.
    pub stream_max_bytes: i64,
}

impl From<&TierLimitValues> for TierLimits {
    fn from(values: &TierLimitValues) -> Self {
        Self {
            max_connections: values.max_connections,
            max_data: values.max_data,
            max_payload: values.max_payload,
            max_exports: values.max_exports,
            max_imports: values.max_imports,
            stream_max_age_seconds: values.stream_max_age_seconds,
            stream_max_bytes: values.stream_max_bytes,
        }
    }
}

impl TierLimits {
    /// Fully unlimited limits, used for the system account.
    pub fn unlimited() -> Self {
        Self {
            max_connections: -1,
            max_data: -1,
            max_payload: -1,
            max_exports: -1,
            max_imports: -1,
            stream_max_age_seconds: -1,
            stream_max_bytes: -1,
        }
    }
}

/// Resolves the limit set for a billing tier.
///
/// Unknown tiers fall back to the free tier; the org row's CHECK constraint
/// makes that unreachable in practice.
pub fn default_tier_limits(tier: &str, tiers: &Tiers) -> TierLimits {
    match tier {
        BILLING_TIER_ENTERPRISE => TierLimits::from(&tiers.enterprise),
        BILLING_TIER_PRO => TierLimits::from(&tiers.pro),
        BILLING_TIER_FREE => TierLimits::from(&tiers.free),
        _ => TierLimits::from(&tiers.free),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notif_utils::Settings;

    #[test]
    fn test_default_tier_limits() {
        let settings = Settings::new(None).unwrap();

        let free = default_tier_limits("free", &settings.tiers);
        let pro = default_tier_limits("pro", &settings.tiers);
        let enterprise = default_tier_limits("enterprise", &settings.tiers);

        assert_eq!(free.max_connections, 10);
        assert!(pro.max_data > free.max_data);
        assert_eq!(enterprise.max_connections, -1);
        assert_eq!(enterprise.stream_max_bytes, -1);
    }

    #[test]
    fn test_unknown_tier_falls_back_to_free() {
        let settings = Settings::new(None).unwrap();
        let limits = default_tier_limits("platinum", &settings.tiers);
        assert_eq!(limits, default_tier_limits("free", &settings.tiers));
    }

    #[test]
    fn test_unlimited() {
        let unlimited = TierLimits::unlimited();
        assert_eq!(unlimited.max_connections, -1);
        assert_eq!(unlimited.max_payload, -1);
        assert_eq!(unlimited.stream_max_bytes, -1);
    }
}
