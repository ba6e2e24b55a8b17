/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Deterministic policy matching.
//!
//! Topic patterns use the bus wildcard rules (`*` one token, `>` one or more
//! tokens). Identity patterns are literal except for `*` (any), `prefix*`
//! (prefix match, including the prefix-only string) and `*suffix` (suffix
//! match).

use notif_models::models::policies::{OrgPolicy, PolicyRule};

use crate::bus::subject::subject_matches;

/// Action being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Publish,
    Subscribe,
}

impl Action {
    /// The audit wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Publish => "publish",
            Action::Subscribe => "subscribe",
        }
    }
}

/// The principal being authorized.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Identity string matched against identity patterns. For API keys this
    /// is the key id.
    pub id: String,
    /// Principal type: api_key or user.
    pub principal_type: String,
}

impl Principal {
    /// Creates an api_key principal.
    pub fn api_key(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            principal_type: "api_key".to_string(),
        }
    }

    /// Creates a user principal.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            principal_type: "user".to_string(),
        }
    }
}

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the action is allowed.
    pub allowed: bool,
    /// Pattern of the topic policy that matched, if any.
    pub matched_policy: Option<String>,
    /// Identity pattern of the rule that allowed the action, if any.
    pub matched_rule: Option<String>,
}

impl Decision {
    fn deny() -> Self {
        Self {
            allowed: false,
            matched_policy: None,
            matched_rule: None,
        }
    }

    fn allow() -> Self {
        Self {
            allowed: true,
            matched_policy: None,
            matched_rule: None,
        }
    }
}

/// Matches an identity pattern against an identity.
///
/// `*` alone matches any id; `prefix*` matches ids with that prefix
/// (including the prefix-only string); `*suffix` matches ids with that
/// suffix; anything else is a literal match.
pub fn identity_matches(pattern: &str, id: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if !prefix.contains('*') {
            return id.starts_with(prefix);
        }
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        if !suffix.contains('*') {
            return id.ends_with(suffix);
        }
    }
    pattern == id
}

/// Evaluates a policy for `(principal, topic, action)`.
///
/// With no policy installed the outcome is governed by `default_deny`.
/// Otherwise the first topic policy whose pattern matches wins; its rule list
/// for the action is scanned in order and the first rule whose type (when
/// specified) and identity pattern both match allows the action. No matching
/// rule denies.
pub fn evaluate(
    policy: Option<&OrgPolicy>,
    default_deny: bool,
    principal: &Principal,
    topic: &str,
    action: Action,
) -> Decision {
    let policy = match policy {
        Some(policy) => policy,
        None => {
            return if default_deny {
                Decision::deny()
            } else {
                Decision::allow()
            };
        }
    };

    let matched = policy
        .topics
        .iter()
        .find(|tp| subject_matches(&tp.pattern, topic));

    let topic_policy = match matched {
        Some(tp) => tp,
        None => {
            return if default_deny || policy.default_deny {
                Decision::deny()
            } else {
                Decision::allow()
            };
        }
    };

    let rules = match action {
        Action::Publish => &topic_policy.publish,
        Action::Subscribe => &topic_policy.subscribe,
    };

    for rule in rules {
        if rule_matches(rule, principal) {
            return Decision {
                allowed: true,
                matched_policy: Some(topic_policy.pattern.clone()),
                matched_rule: Some(rule.identity_pattern.clone()),
            };
        }
    }

    Decision {
        allowed: false,
        matched_policy: Some(topic_policy.pattern.clone()),
        matched_rule: None,
    }
}

fn rule_matches(rule: &PolicyRule, principal: &Principal) -> bool {
    if let Some(required) = &rule.principal_type {
        if required != &principal.principal_type {
            return false;
        }
    }
    identity_matches(&rule.identity_pattern, &principal.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notif_models::models::policies::TopicPolicy;

    fn admin_policy() -> OrgPolicy {
        OrgPolicy {
            default_deny: true,
            topics: vec![TopicPolicy {
                pattern: "admin.*".to_string(),
                publish: vec![PolicyRule {
                    identity_pattern: "admin-*".to_string(),
                    principal_type: Some("api_key".to_string()),
                }],
                subscribe: vec![PolicyRule {
                    identity_pattern: "*".to_string(),
                    principal_type: None,
                }],
            }],
        }
    }

    #[test]
    fn test_identity_matches() {
        assert!(identity_matches("*", "anything"));
        assert!(identity_matches("admin-1", "admin-1"));
        assert!(!identity_matches("admin-1", "admin-2"));

        assert!(identity_matches("admin-*", "admin-1"));
        assert!(identity_matches("admin-*", "admin-"));
        assert!(!identity_matches("admin-*", "user-1"));

        assert!(identity_matches("*-prod", "key-prod"));
        assert!(identity_matches("*-prod", "-prod"));
        assert!(!identity_matches("*-prod", "key-dev"));
    }

    #[test]
    fn test_no_policy_default_allow() {
        let principal = Principal::api_key("k1");
        let decision = evaluate(None, false, &principal, "a.b", Action::Publish);
        assert!(decision.allowed);
    }

    #[test]
    fn test_no_policy_default_deny() {
        let principal = Principal::api_key("k1");
        let decision = evaluate(None, true, &principal, "a.b", Action::Publish);
        assert!(!decision.allowed);
    }

    #[test]
    fn test_admin_publish_allowed() {
        let policy = admin_policy();
        let principal = Principal::api_key("admin-1");
        let decision = evaluate(Some(&policy), false, &principal, "admin.action", Action::Publish);

        assert!(decision.allowed);
        assert_eq!(decision.matched_policy.as_deref(), Some("admin.*"));
        assert_eq!(decision.matched_rule.as_deref(), Some("admin-*"));
    }

    #[test]
    fn test_non_admin_publish_denied() {
        let policy = admin_policy();
        let principal = Principal::api_key("user-7");
        let decision = evaluate(Some(&policy), false, &principal, "admin.action", Action::Publish);

        assert!(!decision.allowed);
        assert_eq!(decision.matched_policy.as_deref(), Some("admin.*"));
        assert!(decision.matched_rule.is_none());
    }

    #[test]
    fn test_principal_type_enforced() {
        let policy = admin_policy();
        let principal = Principal::user("admin-1");
        let decision = evaluate(Some(&policy), false, &principal, "admin.action", Action::Publish);

        // Rule requires api_key; a user with a matching id is denied
        assert!(!decision.allowed);
    }

    #[test]
    fn test_subscribe_wildcard_rule() {
        let policy = admin_policy();
        let principal = Principal::user("anyone");
        let decision =
            evaluate(Some(&policy), false, &principal, "admin.audit", Action::Subscribe);
        assert!(decision.allowed);
    }

    #[test]
    fn test_unmatched_topic_uses_default_deny() {
        let policy = admin_policy(); // default_deny: true
        let principal = Principal::api_key("admin-1");
        let decision = evaluate(Some(&policy), false, &principal, "orders.created", Action::Publish);
        assert!(!decision.allowed);

        let mut open = admin_policy();
        open.default_deny = false;
        let decision = evaluate(Some(&open), false, &principal, "orders.created", Action::Publish);
        assert!(decision.allowed);
    }

    #[test]
    fn test_first_matching_topic_policy_wins() {
        let policy = OrgPolicy {
            default_deny: false,
            topics: vec![
                TopicPolicy {
                    pattern: "orders.>".to_string(),
                    publish: vec![],
                    subscribe: vec![],
                },
                TopicPolicy {
                    pattern: "orders.created".to_string(),
                    publish: vec![PolicyRule {
                        identity_pattern: "*".to_string(),
                        principal_type: None,
                    }],
                    subscribe: vec![],
                },
            ],
        };

        // The first (wildcard) policy matches and has no publish rules
        let principal = Principal::api_key("k");
        let decision =
            evaluate(Some(&policy), false, &principal, "orders.created", Action::Publish);
        assert!(!decision.allowed);
        assert_eq!(decision.matched_policy.as_deref(), Some("orders.>"));
    }
}
