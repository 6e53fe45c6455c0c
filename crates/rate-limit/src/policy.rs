//! Quota lookup by dimension.

use std::{collections::BTreeMap, time::Duration};

use config::{FailureMode, RateLimitConfig, RateLimitQuota, UserRole};

/// A resolved quota: how many requests fit in which window, and what to do if storage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Maximum number of requests within the window.
    pub limit: u32,
    /// Length of the sliding window.
    pub window: Duration,
    /// Behavior when the storage backend cannot answer.
    pub failure_mode: FailureMode,
}

/// The quota table of the gate, with window and failure mode defaults applied.
#[derive(Debug, Clone)]
pub struct LimitPolicy {
    window: Duration,
    failure_mode: FailureMode,
    global: Option<Quota>,
    users: BTreeMap<UserRole, Quota>,
    tools: BTreeMap<String, Quota>,
    resource_read: Option<Quota>,
}

impl LimitPolicy {
    /// Builds the policy from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let window = config.interval;
        let failure_mode = config.failure_mode;
        let resolve = |quota: &RateLimitQuota| Quota {
            limit: quota.limit,
            window: quota.interval.unwrap_or(window),
            failure_mode: quota.failure_mode.unwrap_or(failure_mode),
        };

        Self {
            window,
            failure_mode,
            global: config.global.as_ref().map(resolve),
            users: config.users.iter().map(|(role, q)| (*role, resolve(q))).collect(),
            tools: config.tools.iter().map(|(tool, q)| (tool.clone(), resolve(q))).collect(),
            resource_read: config.resources.read.as_ref().map(resolve),
        }
    }

    /// Window of quotas that do not override it.
    pub fn default_window(&self) -> Duration {
        self.window
    }

    /// Failure mode of quotas that do not override it.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// The platform-wide quota.
    pub fn global(&self) -> Option<Quota> {
        self.global
    }

    /// The per-user quota for a role, falling back to the `default` role entry.
    pub fn user(&self, role: UserRole) -> Option<Quota> {
        self.users
            .get(&role)
            .or_else(|| self.users.get(&UserRole::Default))
            .copied()
    }

    /// The quota of a tool. Tools without an entry have no tool-level cap.
    pub fn tool(&self, name: &str) -> Option<Quota> {
        self.tools.get(name).copied()
    }

    /// The resource read quota.
    pub fn resource_read(&self) -> Option<Quota> {
        self.resource_read
    }

    /// Limits of every configured tool, by tool name.
    pub fn tool_limits(&self) -> BTreeMap<String, u32> {
        self.tools.iter().map(|(name, quota)| (name.clone(), quota.limit)).collect()
    }

    /// Looks up a quota by its textual prefix: `global`, `user:<role>`,
    /// `tool:<name>` or `resource:read`.
    ///
    /// Unknown roles resolve like roles without an entry. Unknown prefixes and
    /// unconfigured tools have no quota.
    pub fn resolve(&self, prefix: &str) -> Option<Quota> {
        match prefix {
            "global" => self.global(),
            "resource:read" => self.resource_read(),
            _ => {
                if let Some(role) = prefix.strip_prefix("user:") {
                    self.user(UserRole::from_header(role))
                } else if let Some(tool) = prefix.strip_prefix("tool:") {
                    self.tool(tool)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LimitPolicy {
        LimitPolicy::from_config(&RateLimitConfig::default())
    }

    #[test]
    fn platform_defaults() {
        let policy = policy();

        assert_eq!(policy.resolve("global").map(|q| q.limit), Some(1000));
        assert_eq!(policy.resolve("user:admin").map(|q| q.limit), Some(500));
        assert_eq!(policy.resolve("user:ai_agent").map(|q| q.limit), Some(200));
        assert_eq!(policy.resolve("user:default").map(|q| q.limit), Some(100));
        assert_eq!(policy.resolve("resource:read").map(|q| q.limit), Some(300));
        assert_eq!(policy.resolve("tool:summarize_document").map(|q| q.limit), Some(60));
        assert_eq!(policy.resolve("tool:create_fine_tuning_job").map(|q| q.limit), Some(5));
    }

    #[test]
    fn roles_without_entry_use_default_user_quota() {
        let policy = policy();

        assert_eq!(policy.user(UserRole::Developer).map(|q| q.limit), Some(100));
        assert_eq!(policy.resolve("user:viewer").map(|q| q.limit), Some(100));
        assert_eq!(policy.resolve("user:superuser").map(|q| q.limit), Some(100));
    }

    #[test]
    fn missing_default_role_means_no_user_quota() {
        let mut config = RateLimitConfig::default();
        config.users.remove(&UserRole::Default);

        let policy = LimitPolicy::from_config(&config);

        assert_eq!(policy.user(UserRole::Developer), None);
        assert_eq!(policy.user(UserRole::Admin).map(|q| q.limit), Some(500));
    }

    #[test]
    fn unknown_prefixes_and_tools_have_no_quota() {
        let policy = policy();

        assert_eq!(policy.resolve("tool:unknown_tool"), None);
        assert_eq!(policy.resolve("ip:127.0.0.1"), None);
        assert_eq!(policy.resolve(""), None);
    }

    #[test]
    fn overrides_and_inherited_defaults() {
        let mut config = RateLimitConfig::default();
        config.interval = Duration::from_secs(30);
        config.failure_mode = FailureMode::Closed;

        let mut quota = RateLimitQuota::new(7);
        quota.interval = Some(Duration::from_secs(5));
        quota.failure_mode = Some(FailureMode::Open);
        config.tools.insert("ocr".to_string(), quota);

        let policy = LimitPolicy::from_config(&config);

        assert_eq!(
            policy.tool("ocr"),
            Some(Quota {
                limit: 7,
                window: Duration::from_secs(5),
                failure_mode: FailureMode::Open,
            })
        );

        assert_eq!(
            policy.global(),
            Some(Quota {
                limit: 1000,
                window: Duration::from_secs(30),
                failure_mode: FailureMode::Closed,
            })
        );
    }

    #[test]
    fn tool_limits_lists_configured_tools() {
        insta::assert_debug_snapshot!(policy().tool_limits(), @r#"
        {
            "analyze_document": 100,
            "classify_document": 100,
            "create_fine_tuning_job": 5,
            "extract_invoice_data": 50,
            "generate_embeddings": 100,
            "search_documents": 200,
            "summarize_document": 60,
        }
        "#);
    }
}
