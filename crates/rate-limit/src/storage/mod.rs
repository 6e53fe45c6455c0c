//! Storage backends for sliding windows.
//!
//! A window is the log of request timestamps of one dimension key. Entries at
//! or before `now - window` have left the window; they are evicted on the
//! next access and never counted.

use std::time::Duration;

use serde::Serialize;
use telemetry::metrics::{RATE_LIMIT_STORE_DURATION, Recorder, STORE_BACKEND, STORE_OPERATION, STORE_OUTCOME};

pub mod memory;
pub mod redis;
mod redis_pool;

pub use memory::InMemoryStorage;
pub use self::redis::RedisStorage;

/// Outcome of an atomic check-and-record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowResult {
    /// Whether the timestamp was recorded, i.e. the window had room.
    pub recorded: bool,
    /// Entries in the window after the operation.
    pub count: u64,
    /// Oldest entry left in the window, when the request was not recorded.
    pub oldest: Option<f64>,
}

/// Operations a window storage backend provides.
///
/// Keys are rendered dimension keys; backends may namespace them further.
/// Timestamps are seconds since the Unix epoch.
#[allow(async_fn_in_trait)]
pub trait WindowStore: Send + Sync {
    /// Evicts entries that left the window, then returns how many remain.
    async fn count(&self, key: &str, now: f64, window: Duration) -> Result<u64, StorageError>;

    /// Appends one entry. Two entries at the same instant are both kept.
    async fn add(&self, key: &str, now: f64) -> Result<(), StorageError>;

    /// Lets the whole key disappear `ttl` after `now`.
    async fn expire_key(&self, key: &str, now: f64, ttl: Duration) -> Result<(), StorageError>;

    /// The oldest entry, if any.
    async fn oldest(&self, key: &str) -> Result<Option<f64>, StorageError>;

    /// Evicts, counts, and records `now` only if fewer than `limit` entries
    /// remain, as one step no concurrent caller can interleave with.
    async fn check_and_record(
        &self,
        key: &str,
        now: f64,
        limit: u32,
        window: Duration,
    ) -> Result<WindowResult, StorageError>;
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("Storage connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed a command.
    #[error("Storage query error: {0}")]
    Query(String),

    /// The backend did not answer in time.
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StorageError {
    /// Short name of the failure, used as a metric attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Connection(_) => "connection",
            StorageError::Query(_) => "query",
            StorageError::Timeout(_) => "timeout",
        }
    }
}

/// Which backend holds the windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Redis, shared by every gate instance.
    Redis,
    /// Process memory, local to one gate instance.
    Memory,
}

/// Health of the rate limit storage, as reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageStatus {
    /// Backend in use.
    pub backend: StorageBackend,
    /// Whether quotas are shared between gate instances.
    pub shared: bool,
    /// Redis was configured but unreachable at startup, so memory is used instead.
    pub degraded: bool,
    /// Storage failures since startup.
    pub store_errors: u64,
}

/// Timestamp at or before which entries have left the window.
pub(crate) fn cutoff(now: f64, window: Duration) -> f64 {
    now - window.as_secs_f64()
}

/// Lifetime of a key after its last write: the window rounded up, plus a second.
pub(crate) fn key_ttl(window: Duration) -> Duration {
    let secs = window.as_secs() + u64::from(window.subsec_nanos() > 0);
    Duration::from_secs(secs + 1)
}

/// The configured backend.
pub(crate) enum Storage {
    Memory(InMemoryStorage),
    Redis(RedisStorage),
}

impl Storage {
    pub fn backend(&self) -> StorageBackend {
        match self {
            Storage::Memory(_) => StorageBackend::Memory,
            Storage::Redis(_) => StorageBackend::Redis,
        }
    }

    pub async fn count(&self, key: &str, now: f64, window: Duration) -> Result<u64, StorageError> {
        let recorder = self.recorder("count");

        let result = match self {
            Storage::Memory(storage) => storage.count(key, now, window).await,
            Storage::Redis(storage) => storage.count(key, now, window).await,
        };

        finish(recorder, &result);
        result
    }

    pub async fn check_and_record(
        &self,
        key: &str,
        now: f64,
        limit: u32,
        window: Duration,
    ) -> Result<WindowResult, StorageError> {
        let recorder = self.recorder("check_and_record");

        let result = match self {
            Storage::Memory(storage) => storage.check_and_record(key, now, limit, window).await,
            Storage::Redis(storage) => storage.check_and_record(key, now, limit, window).await,
        };

        finish(recorder, &result);
        result
    }

    fn recorder(&self, operation: &'static str) -> Recorder {
        let mut recorder = Recorder::new(RATE_LIMIT_STORE_DURATION);
        recorder.push_attribute(STORE_BACKEND, self.backend_name());
        recorder.push_attribute(STORE_OPERATION, operation);
        recorder
    }

    fn backend_name(&self) -> &'static str {
        match self.backend() {
            StorageBackend::Redis => "redis",
            StorageBackend::Memory => "memory",
        }
    }
}

fn finish<T>(mut recorder: Recorder, result: &Result<T, StorageError>) {
    match result {
        Ok(_) => recorder.push_attribute(STORE_OUTCOME, "ok"),
        Err(error) => recorder.push_attribute(STORE_OUTCOME, error.kind()),
    }

    recorder.record();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_covers_the_window() {
        assert_eq!(key_ttl(Duration::from_secs(60)), Duration::from_secs(61));
        assert_eq!(key_ttl(Duration::from_millis(1500)), Duration::from_secs(3));
    }

    #[test]
    fn cutoff_is_window_before_now() {
        assert_eq!(cutoff(100.0, Duration::from_secs(60)), 40.0);
    }
}
