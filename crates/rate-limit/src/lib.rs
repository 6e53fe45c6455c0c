//! Sliding-window rate limiting for the document intelligence gate.
//!
//! This crate enforces several independent quotas on every request:
//! - a global quota shared by all callers
//! - per-user quotas, tiered by role
//! - per-tool quotas, both tool-wide and per user
//! - resource read quotas, both platform-wide and per user
//!
//! Windows are kept in Redis sorted sets when Redis is reachable, and in
//! process memory otherwise.

#![deny(missing_docs)]

mod clock;
mod dimension;
mod error;
mod manager;
mod policy;
mod request;
mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dimension::{DimensionKey, DimensionKind};
pub use error::{QuotaExceeded, RateLimitError};
pub use manager::{PlannedDimension, RateLimitManager, RateLimitSnapshot, RateLimitStatus};
pub use policy::{LimitPolicy, Quota};
pub use request::{Operation, RateLimitRequest, RateLimitRequestBuilder};
pub use storage::{
    InMemoryStorage, RedisStorage, StorageBackend, StorageError, StorageStatus, WindowResult, WindowStore,
};
