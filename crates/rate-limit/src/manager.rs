//! Rate limit manager implementation.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use config::{FailureMode, RateLimitConfig, StorageConfig, UserRole};
use serde::Serialize;
use telemetry::{
    Counter, KeyValue,
    metrics::{self as names, RATE_LIMIT_DECISIONS, RATE_LIMIT_STORE_ERRORS},
};

use crate::{
    clock::{Clock, SystemClock},
    dimension::DimensionKey,
    error::{QuotaExceeded, RateLimitError, ceil_secs},
    policy::{LimitPolicy, Quota},
    request::{Operation, RateLimitRequest},
    storage::{InMemoryStorage, RedisStorage, Storage, StorageBackend, StorageError, StorageStatus},
};

/// A dimension a request will be counted against, with its quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDimension {
    /// The dimension.
    pub key: DimensionKey,
    /// Its quota.
    pub quota: Quota,
}

/// Quota state of the caller after an admitted request, for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// The caller's per-user quota.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Window of the per-user quota.
    pub window: Duration,
}

impl RateLimitStatus {
    /// The window rounded up to whole seconds.
    pub fn window_secs(&self) -> u64 {
        ceil_secs(self.window)
    }
}

/// Read-only view of a caller's quotas, served by the introspection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    /// The caller's per-user quota, if the role has one.
    pub limit: Option<u32>,
    /// Requests left in the current window, if the role has a quota.
    pub remaining: Option<u32>,
    /// Window of the per-user quota, in seconds.
    pub window_seconds: u64,
    /// Limits of every configured tool.
    pub tools: BTreeMap<String, u32>,
}

/// Decides whether requests fit their quotas and records the ones that do.
pub struct RateLimitManager {
    enabled: bool,
    policy: LimitPolicy,
    storage: Storage,
    clock: Arc<dyn Clock>,
    degraded: bool,
    store_errors: AtomicU64,
    decisions: Counter<u64>,
    store_error_counter: Counter<u64>,
}

impl RateLimitManager {
    /// Create a new rate limit manager with the configured storage backend.
    ///
    /// Never fails: if Redis is configured but unreachable, windows are kept
    /// in process memory and the manager reports itself as degraded.
    pub async fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Like [`RateLimitManager::new`], reading time from `clock`.
    pub async fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let (storage, degraded) = match &config.storage {
            StorageConfig::Memory => {
                log::warn!(
                    "Rate limit windows are kept in process memory and are not shared between gate instances"
                );

                (Storage::Memory(InMemoryStorage::new()), false)
            }
            StorageConfig::Redis(redis_config) => match RedisStorage::connect(redis_config).await {
                Ok(storage) => {
                    log::info!(
                        "Rate limit windows are kept in Redis under the '{}' key prefix",
                        redis_config.key_prefix
                    );

                    (Storage::Redis(storage), false)
                }
                Err(error) => {
                    log::warn!(
                        "Redis rate limit storage is unavailable: {error}. Falling back to process memory; \
                         quotas are not shared between gate instances until restart"
                    );

                    (Storage::Memory(InMemoryStorage::new()), true)
                }
            },
        };

        Self::from_parts(config, storage, clock, degraded)
    }

    pub(crate) fn from_parts(config: &RateLimitConfig, storage: Storage, clock: Arc<dyn Clock>, degraded: bool) -> Self {
        Self {
            enabled: config.enabled,
            policy: LimitPolicy::from_config(config),
            storage,
            clock,
            degraded,
            store_errors: AtomicU64::new(0),
            decisions: telemetry::metrics::counter(RATE_LIMIT_DECISIONS),
            store_error_counter: telemetry::metrics::counter(RATE_LIMIT_STORE_ERRORS),
        }
    }

    /// Whether quotas are enforced at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The quota table.
    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Backend in use and its health.
    pub fn storage_status(&self) -> StorageStatus {
        let backend = self.storage.backend();

        StorageStatus {
            backend,
            shared: backend == StorageBackend::Redis,
            degraded: self.degraded,
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }

    /// Admits and records one request against `key` if fewer than
    /// `max_requests` were recorded within `window`.
    pub async fn check(&self, key: &DimensionKey, max_requests: u32, window: Duration) -> Result<(), RateLimitError> {
        let quota = Quota {
            limit: max_requests,
            window,
            failure_mode: self.policy.failure_mode(),
        };

        self.check_dimension(key, quota).await.map(|_| ())
    }

    /// Checks each dimension in order with the default window, stopping at
    /// the first one over its quota.
    ///
    /// Dimensions checked before the rejecting one keep their recorded entry.
    pub async fn check_all(&self, dimensions: &[(DimensionKey, u32)]) -> Result<(), RateLimitError> {
        let window = self.policy.default_window();

        for (key, max_requests) in dimensions {
            self.check(key, *max_requests, window).await?;
        }

        Ok(())
    }

    /// Requests left for `key` in the current window. Records nothing.
    ///
    /// Reports the full quota if the storage cannot answer.
    pub async fn remaining(&self, key: &DimensionKey, max_requests: u32, window: Duration) -> u32 {
        let rendered = key.to_string();

        match self.storage.count(&rendered, self.clock.now(), window).await {
            Ok(count) => max_requests.saturating_sub(u32::try_from(count).unwrap_or(u32::MAX)),
            Err(error) => {
                self.note_store_error(key, &error);
                log::warn!("Failed to read rate limit window '{rendered}': {error}");

                max_requests
            }
        }
    }

    /// The caller's per-user quota state and the tool limit table.
    pub async fn snapshot(&self, user_id: &str, role: UserRole) -> RateLimitSnapshot {
        let tools = self.policy.tool_limits();

        let Some(quota) = self.policy.user(role) else {
            return RateLimitSnapshot {
                limit: None,
                remaining: None,
                window_seconds: ceil_secs(self.policy.default_window()),
                tools,
            };
        };

        let remaining = self
            .remaining(&DimensionKey::user(user_id), quota.limit, quota.window)
            .await;

        RateLimitSnapshot {
            limit: Some(quota.limit),
            remaining: Some(remaining),
            window_seconds: ceil_secs(quota.window),
            tools,
        }
    }

    /// The dimensions a request counts against, in checking order: global,
    /// user, then the dimensions of its operation. Dimensions without a quota
    /// are left out.
    pub fn plan(&self, request: &RateLimitRequest) -> Vec<PlannedDimension> {
        let mut plan = Vec::with_capacity(5);
        let mut push = |key, quota| plan.push(PlannedDimension { key, quota });

        if let Some(quota) = self.policy.global() {
            push(DimensionKey::Global, quota);
        }

        match self.policy.user(request.role) {
            Some(quota) => push(DimensionKey::user(&request.user_id), quota),
            None => log::debug!("No user quota for role '{}' - skipping user limit", request.role),
        }

        match &request.operation {
            Some(Operation::Tool(tool)) => match self.policy.tool(tool) {
                Some(quota) => {
                    push(DimensionKey::tool(tool), quota);
                    push(DimensionKey::user_tool(&request.user_id, tool), quota);
                }
                None => log::debug!("No rate limit configured for tool '{tool}' - skipping tool limits"),
            },
            Some(Operation::ResourceRead) => {
                if let Some(quota) = self.policy.resource_read() {
                    push(DimensionKey::ResourceRead, quota);
                    push(DimensionKey::user_resource_read(&request.user_id), quota);
                }
            }
            None => (),
        }

        plan
    }

    /// Checks every dimension of the request in order, stopping at the first rejection.
    ///
    /// Returns the caller's per-user quota state, if the role has a quota.
    pub async fn check_request(&self, request: &RateLimitRequest) -> Result<Option<RateLimitStatus>, RateLimitError> {
        if !self.enabled {
            return Ok(None);
        }

        let mut status = None;

        for PlannedDimension { key, quota } in self.plan(request) {
            let count = self.check_dimension(&key, quota).await?;

            if matches!(key, DimensionKey::User { .. }) {
                let used = count.map_or(0, |count| u32::try_from(count).unwrap_or(u32::MAX));

                status = Some(RateLimitStatus {
                    limit: quota.limit,
                    remaining: quota.limit.saturating_sub(used),
                    window: quota.window,
                });
            }
        }

        Ok(status)
    }

    /// Records one request against `key` if it fits `quota`. Returns the
    /// window count after recording, unknown when storage failed open.
    async fn check_dimension(&self, key: &DimensionKey, quota: Quota) -> Result<Option<u64>, RateLimitError> {
        let rendered = key.to_string();
        let now = self.clock.now();

        let result = match self
            .storage
            .check_and_record(&rendered, now, quota.limit, quota.window)
            .await
        {
            Ok(result) => result,
            Err(error) => return self.store_failure(key, rendered, quota, error),
        };

        if result.recorded {
            self.record_decision(key, "allowed");
            return Ok(Some(result.count));
        }

        let retry_after = retry_after(result.oldest, now, quota.window);
        self.record_decision(key, "rejected");

        log::debug!(
            "Rate limit exceeded for '{rendered}': {} of {} requests within {:?}, retry after {retry_after:?}",
            result.count,
            quota.limit,
            quota.window,
        );

        Err(RateLimitError::QuotaExceeded(QuotaExceeded {
            dimension: rendered,
            limit: quota.limit,
            window: quota.window,
            retry_after,
        }))
    }

    fn store_failure(
        &self,
        key: &DimensionKey,
        rendered: String,
        quota: Quota,
        error: StorageError,
    ) -> Result<Option<u64>, RateLimitError> {
        self.note_store_error(key, &error);

        match quota.failure_mode {
            FailureMode::Open => {
                log::warn!("Rate limit storage failed for '{rendered}', admitting the request: {error}");
                self.record_decision(key, "failed_open");

                Ok(None)
            }
            FailureMode::Closed => {
                log::error!("Rate limit storage failed for '{rendered}', rejecting the request: {error}");
                self.record_decision(key, "failed_closed");

                Err(RateLimitError::StoreUnavailable {
                    dimension: rendered,
                    source: error,
                })
            }
        }
    }

    fn note_store_error(&self, key: &DimensionKey, error: &StorageError) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);

        self.store_error_counter.add(
            1,
            &[
                KeyValue::new(names::DIMENSION, key.kind().as_str()),
                KeyValue::new(names::STORE_ERROR, error.kind()),
            ],
        );
    }

    fn record_decision(&self, key: &DimensionKey, outcome: &'static str) {
        self.decisions.add(
            1,
            &[
                KeyValue::new(names::DIMENSION, key.kind().as_str()),
                KeyValue::new(names::OUTCOME, outcome),
            ],
        );
    }
}

/// Time until the oldest entry leaves the window, within `(0, window]`.
///
/// A full window without a readable oldest entry waits the whole window.
fn retry_after(oldest: Option<f64>, now: f64, window: Duration) -> Duration {
    let window_secs = window.as_secs_f64();

    let Some(oldest) = oldest else {
        return window;
    };

    let wait = oldest + window_secs - now;
    let floor = window_secs.min(0.001);

    Duration::from_secs_f64(wait.clamp(floor, window_secs))
}
