//! Caller policy port.
//!
//! The bridge asks this port which tools a caller may use and how fast. The
//! agent runtime owns the real policy store; the bridge only consumes it.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::RateLimitConfig;
use crate::error::BridgeError;
use crate::pattern::wildcard_match;

/// What a single caller is allowed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerPolicy {
    /// Qualified tool-name patterns (`server:tool`, `*` wildcards allowed).
    /// Empty means nothing is allowed.
    #[serde(default)]
    pub allowed_tools: Vec<String>,

    /// Budget across all servers for this caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

impl CallerPolicy {
    /// A policy that allows every tool with no caller-wide limit.
    pub fn allow_all() -> Self {
        Self {
            allowed_tools: vec!["*".to_string()],
            rate_limit: None,
        }
    }

    pub fn allowing<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_tools: patterns.into_iter().map(Into::into).collect(),
            rate_limit: None,
        }
    }

    #[must_use]
    pub const fn with_rate_limit(mut self, limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Whether `qualified_name` matches any allowed pattern.
    pub fn permits(&self, qualified_name: &str) -> bool {
        self.allowed_tools
            .iter()
            .any(|pattern| wildcard_match(pattern, qualified_name))
    }

    /// Reject a caller-wide limit that could never admit a request.
    pub fn validate(&self) -> Result<(), BridgeError> {
        self.validate_as("caller policy")
    }

    fn validate_as(&self, label: &str) -> Result<(), BridgeError> {
        match self.rate_limit {
            Some(limit) if !limit.is_usable() => Err(BridgeError::validation(format!(
                "{label}: rate limit needs at least one request per non-empty window"
            ))),
            _ => Ok(()),
        }
    }
}

/// Source of caller policies.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallerPolicyPort: Send + Sync {
    /// Look up the policy for a caller identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy store is unavailable. Unknown callers
    /// should get a restrictive policy, not an error.
    async fn caller_policy(&self, identity: &str) -> Result<CallerPolicy, BridgeError>;
}

/// Allows every caller to use every tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

#[async_trait]
impl CallerPolicyPort for AllowAllPolicy {
    async fn caller_policy(&self, _identity: &str) -> Result<CallerPolicy, BridgeError> {
        Ok(CallerPolicy::allow_all())
    }
}

/// Fixed per-identity policies with a fallback for unknown callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticPolicyProvider {
    #[serde(default)]
    pub callers: HashMap<String, CallerPolicy>,
    /// Policy for identities not listed in `callers`.
    #[serde(default)]
    pub default: CallerPolicy,
}

impl StaticPolicyProvider {
    pub fn new(default: CallerPolicy) -> Self {
        Self {
            callers: HashMap::new(),
            default,
        }
    }

    #[must_use]
    pub fn with_caller(mut self, identity: impl Into<String>, policy: CallerPolicy) -> Self {
        self.callers.insert(identity.into(), policy);
        self
    }

    /// Check every listed caller and the default policy.
    pub fn validate(&self) -> Result<(), BridgeError> {
        self.default.validate_as("default policy")?;
        for (identity, policy) in &self.callers {
            policy.validate_as(&format!("caller '{identity}'"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl CallerPolicyPort for StaticPolicyProvider {
    async fn caller_policy(&self, identity: &str) -> Result<CallerPolicy, BridgeError> {
        Ok(self
            .callers
            .get(identity)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_permits_patterns() {
        let policy = CallerPolicy::allowing(["github:*", "fs:read_file"]);
        assert!(policy.permits("github:create_issue"));
        assert!(policy.permits("fs:read_file"));
        assert!(!policy.permits("fs:write_file"));
        assert!(!CallerPolicy::default().permits("fs:read_file"));
        assert!(CallerPolicy::allow_all().permits("anything:at_all"));
    }

    #[tokio::test]
    async fn test_static_provider_falls_back_to_default() {
        let provider = StaticPolicyProvider::new(CallerPolicy::allowing(["fs:*"]))
            .with_caller(
                "admin",
                CallerPolicy::allow_all()
                    .with_rate_limit(RateLimitConfig::new(100, Duration::from_secs(60))),
            );

        let admin = provider.caller_policy("admin").await.unwrap();
        assert!(admin.permits("github:delete_repo"));
        assert_eq!(admin.rate_limit.map(|l| l.requests), Some(100));

        let guest = provider.caller_policy("guest").await.unwrap();
        assert!(!guest.permits("github:delete_repo"));
        assert!(guest.permits("fs:list"));
    }

    #[tokio::test]
    async fn test_static_provider_deserializes() {
        let provider: StaticPolicyProvider = serde_json::from_str(
            r#"{"callers": {"bot": {"allowed_tools": ["search:*"],
                 "rate_limit": {"requests": 5, "window_secs": 10}}}}"#,
        )
        .unwrap();
        let bot = provider.caller_policy("bot").await.unwrap();
        assert!(bot.permits("search:web"));
        assert!(!provider.caller_policy("other").await.unwrap().permits("search:web"));
    }

    #[test]
    fn test_validate_rejects_unusable_limits() {
        let provider = StaticPolicyProvider::new(CallerPolicy::allow_all()).with_caller(
            "bot",
            CallerPolicy::allow_all().with_rate_limit(RateLimitConfig::new(10, Duration::ZERO)),
        );
        let err = provider.validate().unwrap_err();
        assert!(err.to_string().contains("caller 'bot'"), "got {err}");

        let provider = StaticPolicyProvider::new(
            CallerPolicy::allow_all().with_rate_limit(RateLimitConfig::new(0, Duration::from_secs(60))),
        );
        assert!(provider.validate().is_err());

        let provider = StaticPolicyProvider::new(
            CallerPolicy::allow_all().with_rate_limit(RateLimitConfig::new(1, Duration::from_secs(60))),
        );
        provider.validate().unwrap();
    }

    #[tokio::test]
    async fn test_mock_port_propagates_store_errors() {
        let mut port = MockCallerPolicyPort::new();
        port.expect_caller_policy()
            .times(1)
            .returning(|_| Err(BridgeError::connection("policy store offline")));

        let err = port.caller_policy("svc").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
