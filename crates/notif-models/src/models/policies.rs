/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Per-org authorization policy types.
//!
//! Policies are YAML files, one per org, loaded from the policy directory and
//! hot-reloaded on change. A policy lists topic patterns with publish and
//! subscribe rule lists; a rule matches a principal by identity pattern and
//! optionally by principal type.

use serde::{Deserialize, Serialize};

/// Principal types a rule can be restricted to.
pub const PRINCIPAL_TYPE_API_KEY: &str = "api_key";
pub const PRINCIPAL_TYPE_USER: &str = "user";

/// A per-org policy document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrgPolicy {
    /// Deny actions that match no rule even when no topic policy matches.
    #[serde(default)]
    pub default_deny: bool,
    /// Topic policies, evaluated in order of appearance.
    #[serde(default)]
    pub topics: Vec<TopicPolicy>,
}

/// Rules for one topic pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicPolicy {
    /// Topic pattern using `*`/`>` wildcards.
    pub pattern: String,
    /// Rules consulted for publish actions.
    #[serde(default)]
    pub publish: Vec<PolicyRule>,
    /// Rules consulted for subscribe actions.
    #[serde(default)]
    pub subscribe: Vec<PolicyRule>,
}

/// A single identity rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Identity pattern: literal, `*`, `prefix*` or `*suffix`.
    pub identity_pattern: String,
    /// Restrict the rule to a principal type (api_key or user).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub principal_type: Option<String>,
}

impl OrgPolicy {
    /// Parses a policy document from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_yaml() {
        let yaml = r#"
default_deny: true
topics:
  - pattern: "admin.*"
    publish:
      - identity_pattern: "admin-*"
        type: api_key
    subscribe:
      - identity_pattern: "*"
"#;
        let policy = OrgPolicy::from_yaml(yaml).unwrap();
        assert!(policy.default_deny);
        assert_eq!(policy.topics.len(), 1);
        assert_eq!(policy.topics[0].pattern, "admin.*");
        assert_eq!(policy.topics[0].publish.len(), 1);
        assert_eq!(
            policy.topics[0].publish[0].principal_type.as_deref(),
            Some("api_key")
        );
        assert_eq!(policy.topics[0].subscribe[0].identity_pattern, "*");
    }

    #[test]
    fn test_policy_defaults() {
        let policy = OrgPolicy::from_yaml("topics: []").unwrap();
        assert!(!policy.default_deny);
        assert!(policy.topics.is_empty());
    }

    #[test]
    fn test_policy_invalid_yaml() {
        assert!(OrgPolicy::from_yaml("topics: {not: [valid").is_err());
    }
}
