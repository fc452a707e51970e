//! Orchestrator configuration.
//!
//! Optimistic concurrency grew onto some write paths and not others, so the
//! policy is chosen per aggregate type rather than globally.

use std::collections::HashMap;

use anyhow::{Context, Result};

/// Default page size when reading junction rows.
pub const DEFAULT_RELATION_PAGE_SIZE: u32 = 100;

/// Default cap on creates, updates and deletes (each) in one sync call.
pub const DEFAULT_MAX_CHILDREN_PER_SYNC: usize = 100;

/// How `expected_version` is treated on update paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// Updates without an expected version are rejected locally.
    Enforced,
    /// The version is forwarded when the caller has one.
    Advisory,
    /// The version is never forwarded.
    Disabled,
}

impl ConcurrencyPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enforced => "enforced",
            Self::Advisory => "advisory",
            Self::Disabled => "disabled",
        }
    }
}

#[must_use]
pub fn parse_policy(value: &str) -> Option<ConcurrencyPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "enforced" => Some(ConcurrencyPolicy::Enforced),
        "advisory" => Some(ConcurrencyPolicy::Advisory),
        "disabled" => Some(ConcurrencyPolicy::Disabled),
        _ => None,
    }
}

/// Environment variable that overrides the policy of `resource`.
#[must_use]
pub fn policy_env_var(resource: &str) -> String {
    format!("CRM_SYNC_CONCURRENCY_{}", resource.to_ascii_uppercase())
}

/// Settings shared by every orchestrator of a [`crate::core::CoreContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    policies: HashMap<String, ConcurrencyPolicy>,
    default_policy: ConcurrencyPolicy,
    /// Page size when listing junction rows.
    pub relation_page_size: u32,
    /// Cap on each of creates, updates and deletes in one sync call.
    pub max_children_per_sync: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert("opportunities".to_string(), ConcurrencyPolicy::Advisory);
        policies.insert("products".to_string(), ConcurrencyPolicy::Disabled);
        Self {
            policies,
            default_policy: ConcurrencyPolicy::Advisory,
            relation_page_size: DEFAULT_RELATION_PAGE_SIZE,
            max_children_per_sync: DEFAULT_MAX_CHILDREN_PER_SYNC,
        }
    }
}

impl SyncConfig {
    /// Defaults, overridden by `CRM_SYNC_CONCURRENCY_<RESOURCE>` variables for
    /// every resource that has a default policy.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`SyncConfig::from_env`] with an explicit variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let resources: Vec<String> = config.policies.keys().cloned().collect();
        for resource in resources {
            let var = policy_env_var(&resource);
            if let Some(value) = lookup(&var) {
                let policy = parse_policy(&value).with_context(|| {
                    format!(
                        "Invalid {var} value '{value}'. Expected one of: enforced, advisory, disabled"
                    )
                })?;
                config.policies.insert(resource, policy);
            }
        }
        Ok(config)
    }

    /// Set the policy of one resource.
    #[must_use]
    pub fn with_policy(mut self, resource: &str, policy: ConcurrencyPolicy) -> Self {
        self.policies.insert(resource.to_string(), policy);
        self
    }

    #[must_use]
    pub fn policy_for(&self, resource: &str) -> ConcurrencyPolicy {
        self.policies
            .get(resource)
            .copied()
            .unwrap_or(self.default_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        assert_eq!(parse_policy(" Enforced "), Some(ConcurrencyPolicy::Enforced));
        assert_eq!(parse_policy("advisory"), Some(ConcurrencyPolicy::Advisory));
        assert_eq!(parse_policy("DISABLED"), Some(ConcurrencyPolicy::Disabled));
        assert_eq!(parse_policy("strict"), None);
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.policy_for("opportunities"), ConcurrencyPolicy::Advisory);
        assert_eq!(config.policy_for("products"), ConcurrencyPolicy::Disabled);
        assert_eq!(config.policy_for("contacts"), ConcurrencyPolicy::Advisory);
        assert_eq!(config.relation_page_size, 100);
        assert_eq!(config.max_children_per_sync, 100);
    }

    #[test]
    fn test_env_override() {
        let config = SyncConfig::from_lookup(|name| {
            (name == "CRM_SYNC_CONCURRENCY_OPPORTUNITIES").then(|| "enforced".to_string())
        })
        .unwrap();
        assert_eq!(config.policy_for("opportunities"), ConcurrencyPolicy::Enforced);
        assert_eq!(config.policy_for("products"), ConcurrencyPolicy::Disabled);
    }

    #[test]
    fn test_env_rejects_unknown_value() {
        let err = SyncConfig::from_lookup(|name| {
            (name == "CRM_SYNC_CONCURRENCY_PRODUCTS").then(|| "sometimes".to_string())
        })
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("CRM_SYNC_CONCURRENCY_PRODUCTS"), "{message}");
        assert!(message.contains("enforced, advisory, disabled"), "{message}");
    }

    #[test]
    fn test_with_policy() {
        let config = SyncConfig::default().with_policy("products", ConcurrencyPolicy::Enforced);
        assert_eq!(config.policy_for("products"), ConcurrencyPolicy::Enforced);
        assert_eq!(ConcurrencyPolicy::Enforced.as_str(), "enforced");
    }
}
