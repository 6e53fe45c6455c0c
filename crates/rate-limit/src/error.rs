use std::time::Duration;

use crate::storage::StorageError;

/// Why a request was not admitted.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// A dimension already holds its full quota within the window.
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    /// The storage backend failed while checking a fail-closed quota.
    #[error("Rate limit storage unavailable while checking '{dimension}': {source}")]
    StoreUnavailable {
        /// Rendered key of the dimension being checked.
        dimension: String,
        /// The underlying storage failure.
        source: StorageError,
    },
}

impl RateLimitError {
    /// How long the caller should wait before retrying, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitError::QuotaExceeded(exceeded) => Some(exceeded.retry_after),
            RateLimitError::StoreUnavailable { .. } => None,
        }
    }
}

/// Details of a rejected request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Rate limit exceeded for '{dimension}': {limit} requests per {}s", ceil_secs(*window))]
pub struct QuotaExceeded {
    /// Rendered key of the first dimension over its quota.
    pub dimension: String,
    /// The quota of that dimension.
    pub limit: u32,
    /// The window of that dimension.
    pub window: Duration,
    /// Time until the oldest counted request leaves the window. Always within `(0, window]`.
    pub retry_after: Duration,
}

impl QuotaExceeded {
    /// Retry-after rounded up to whole seconds, as sent in the `Retry-After` header.
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(self.retry_after).max(1)
    }

    /// The window rounded up to whole seconds.
    pub fn window_secs(&self) -> u64 {
        ceil_secs(self.window)
    }
}

/// Rounds up, so a sub-second window is never reported as zero seconds.
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
