/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Policy enforcement.
//!
//! The enforcer combines the hot-reloading loader with the deterministic
//! matcher and audits every decision.

pub mod loader;
pub mod matcher;

use std::sync::Arc;

use notif_models::models::audit_logs::{
    ACTION_POLICY_ALLOWED, ACTION_POLICY_DENIED, ACTOR_TYPE_API_KEY, RESOURCE_TYPE_POLICY,
};
use notif_utils::logging::prelude::*;

use crate::metrics;
use crate::utils::audit;

pub use loader::{start_policy_watcher, PolicyLoader};
pub use matcher::{Action, Decision, Principal};

/// The audited policy enforcer.
#[derive(Clone)]
pub struct PolicyEnforcer {
    loader: Arc<PolicyLoader>,
    /// Deny org-less checks and unmatched topics when no policy allows them.
    default_deny: bool,
}

impl PolicyEnforcer {
    /// Creates an enforcer over a policy loader.
    pub fn new(loader: Arc<PolicyLoader>, default_deny: bool) -> Self {
        Self {
            loader,
            default_deny,
        }
    }

    /// Checks `(principal, topic, action)` for an org, emitting an audit
    /// record for the decision.
    pub fn check(
        &self,
        org_id: &str,
        principal: &Principal,
        topic: &str,
        action: Action,
    ) -> Decision {
        let policy = self.loader.get(org_id);
        let decision =
            matcher::evaluate(policy.as_ref(), self.default_deny, principal, topic, action);

        let audit_action = if decision.allowed {
            ACTION_POLICY_ALLOWED
        } else {
            ACTION_POLICY_DENIED
        };

        if !decision.allowed {
            metrics::POLICY_DENIALS.inc();
            debug!(
                "Policy denied {} on '{}' for {} '{}'",
                action.as_str(),
                topic,
                principal.principal_type,
                principal.id
            );
        }

        audit::log_action(
            ACTOR_TYPE_API_KEY,
            None,
            audit_action,
            RESOURCE_TYPE_POLICY,
            Some(topic.to_string()),
            Some(serde_json::json!({
                "org_id": org_id,
                "action": action.as_str(),
                "principal": principal.id,
                "principal_type": principal.principal_type,
                "matched_policy": decision.matched_policy,
                "matched_rule": decision.matched_rule,
                "result": if decision.allowed { "allowed" } else { "denied" },
            })),
            None,
        );

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enforcer_without_policies_allows_by_default() {
        let loader = Arc::new(PolicyLoader::new("/nonexistent"));
        let enforcer = PolicyEnforcer::new(loader, false);

        let decision = enforcer.check(
            "acme",
            &Principal::api_key("k1"),
            "orders.created",
            Action::Publish,
        );
        assert!(decision.allowed);
    }

    #[test]
    fn test_enforcer_default_deny() {
        let loader = Arc::new(PolicyLoader::new("/nonexistent"));
        let enforcer = PolicyEnforcer::new(loader, true);

        let decision = enforcer.check(
            "acme",
            &Principal::api_key("k1"),
            "orders.created",
            Action::Publish,
        );
        assert!(!decision.allowed);
    }

    #[test]
    fn test_enforcer_with_loaded_policy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("acme.yaml"),
            r#"
default_deny: true
topics:
  - pattern: "admin.*"
    publish:
      - identity_pattern: "admin-*"
        type: api_key
"#,
        )
        .unwrap();

        let loader = Arc::new(PolicyLoader::new(dir.path()));
        loader.load_all();
        let enforcer = PolicyEnforcer::new(loader, false);

        let allowed = enforcer.check(
            "acme",
            &Principal::api_key("admin-1"),
            "admin.action",
            Action::Publish,
        );
        assert!(allowed.allowed);

        let denied = enforcer.check(
            "acme",
            &Principal::api_key("intern-2"),
            "admin.action",
            Action::Publish,
        );
        assert!(!denied.allowed);

        // Other orgs are unaffected by acme's policy
        let other = enforcer.check(
            "globex",
            &Principal::api_key("intern-2"),
            "admin.action",
            Action::Publish,
        );
        assert!(other.allowed);
    }
}
