//! Rate limiting configuration structures.

use std::{borrow::Cow, collections::BTreeMap, time::Duration};

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::Deserialize;

use crate::UserRole;

/// Rate limiting configuration for the gate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    pub enabled: bool,
    /// Storage backend configuration.
    pub storage: StorageConfig,
    /// Sliding window applied to every quota that does not set its own interval.
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    /// What to do with a request when the storage backend cannot answer.
    pub failure_mode: FailureMode,
    /// Path of the quota introspection endpoint.
    pub introspection_path: Cow<'static, str>,
    /// Quota shared by every request reaching the gate.
    pub global: Option<RateLimitQuota>,
    /// Per-user quotas, tiered by role. `default` applies to roles without an entry.
    pub users: BTreeMap<UserRole, RateLimitQuota>,
    /// Per-tool quotas. Tools without an entry have no tool-level cap.
    pub tools: BTreeMap<String, RateLimitQuota>,
    /// Resource access quotas.
    pub resources: ResourceRateLimits,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: StorageConfig::default(),
            interval: default_interval(),
            failure_mode: FailureMode::default(),
            introspection_path: Cow::Borrowed("/rate-limit"),
            global: Some(RateLimitQuota::new(1000)),
            users: default_user_limits(),
            tools: default_tool_limits(),
            resources: ResourceRateLimits::default(),
        }
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_user_limits() -> BTreeMap<UserRole, RateLimitQuota> {
    BTreeMap::from([
        (UserRole::Default, RateLimitQuota::new(100)),
        (UserRole::Admin, RateLimitQuota::new(500)),
        (UserRole::AiAgent, RateLimitQuota::new(200)),
    ])
}

fn default_tool_limits() -> BTreeMap<String, RateLimitQuota> {
    let mut fine_tuning = RateLimitQuota::new(5);
    fine_tuning.failure_mode = Some(FailureMode::Closed);

    BTreeMap::from([
        ("extract_invoice_data".to_string(), RateLimitQuota::new(50)),
        ("analyze_document".to_string(), RateLimitQuota::new(100)),
        ("classify_document".to_string(), RateLimitQuota::new(100)),
        ("summarize_document".to_string(), RateLimitQuota::new(60)),
        ("search_documents".to_string(), RateLimitQuota::new(200)),
        ("generate_embeddings".to_string(), RateLimitQuota::new(100)),
        ("create_fine_tuning_job".to_string(), fine_tuning),
    ])
}

/// Configuration for a rate limit quota.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitQuota {
    /// Maximum number of requests allowed within the window.
    pub limit: u32,
    /// Window override. Falls back to the top-level `interval`.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub interval: Option<Duration>,
    /// Failure mode override. Falls back to the top-level `failure_mode`.
    #[serde(default)]
    pub failure_mode: Option<FailureMode>,
}

impl RateLimitQuota {
    /// A quota with the given limit, inheriting window and failure mode.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            interval: None,
            failure_mode: None,
        }
    }
}

/// Quotas for resource access.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceRateLimits {
    /// Flat quota for every resource read.
    pub read: Option<RateLimitQuota>,
}

impl Default for ResourceRateLimits {
    fn default() -> Self {
        Self {
            read: Some(RateLimitQuota::new(300)),
        }
    }
}

/// Behavior when the storage backend fails during a check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Let the request through. Availability wins over strictness.
    #[default]
    Open,
    /// Reject the request as if the service were unavailable.
    Closed,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default). Counters are local to the process.
    #[default]
    Memory,
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all rate limit keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Response timeout for Redis commands.
    #[serde(default = "default_response_timeout", deserialize_with = "deserialize_duration")]
    pub response_timeout: Duration,
    /// Timeout for establishing the initial connection.
    #[serde(default = "default_connection_timeout", deserialize_with = "deserialize_duration")]
    pub connection_timeout: Duration,
}

impl RedisConfig {
    /// A configuration pointing at `url` with every other setting at its default.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

fn default_key_prefix() -> String {
    "docgate:rate_limit:".to_string()
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}
