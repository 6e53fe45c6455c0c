//! In-memory sliding window storage.
//!
//! Each key owns a timestamp log in a [`DashMap`] entry. All work on one key
//! happens while holding that entry's shard lock, which makes every operation
//! atomic per key within the process. Windows are not shared with other
//! processes.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::DashMap;

use super::{StorageError, WindowResult, WindowStore, cutoff, key_ttl};

/// Writes between two sweeps of expired keys.
const SWEEP_INTERVAL: u64 = 1024;

#[derive(Debug, Default)]
struct Window {
    /// Timestamps in ascending order.
    entries: VecDeque<f64>,
    expires_at: Option<f64>,
}

impl Window {
    fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Drops the whole log if the key expired, then entries that left the window.
    fn refresh(&mut self, now: f64, window: Option<Duration>) {
        if self.is_expired(now) {
            self.entries.clear();
            self.expires_at = None;
        }

        if let Some(window) = window {
            let cutoff = cutoff(now, window);

            while self.entries.front().is_some_and(|&ts| ts <= cutoff) {
                self.entries.pop_front();
            }
        }
    }

    fn insert(&mut self, ts: f64) {
        // Requests normally arrive in order; a late one is placed where it belongs.
        if self.entries.back().is_none_or(|&last| last <= ts) {
            self.entries.push_back(ts);
        } else {
            let position = self.entries.partition_point(|&existing| existing <= ts);
            self.entries.insert(position, ts);
        }
    }
}

/// In-memory window storage implementation.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    windows: DashMap<String, Window>,
    writes: AtomicU64,
}

impl InMemoryStorage {
    /// Create a new in-memory storage instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no key is held.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Removes expired and empty keys every [`SWEEP_INTERVAL`] writes.
    ///
    /// Must not be called while holding a reference into the map.
    fn after_write(&self, now: f64) {
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            self.sweep(now);
        }
    }

    fn sweep(&self, now: f64) {
        let before = self.windows.len();

        self.windows
            .retain(|_, window| !window.is_expired(now) && !window.entries.is_empty());

        log::debug!(
            "Swept {} expired rate limit windows from memory",
            before.saturating_sub(self.windows.len())
        );
    }
}

impl WindowStore for InMemoryStorage {
    async fn count(&self, key: &str, now: f64, window: Duration) -> Result<u64, StorageError> {
        let Some(mut entry) = self.windows.get_mut(key) else {
            return Ok(0);
        };

        entry.refresh(now, Some(window));

        Ok(entry.entries.len() as u64)
    }

    async fn add(&self, key: &str, now: f64) -> Result<(), StorageError> {
        {
            let mut entry = self.windows.entry(key.to_string()).or_default();
            entry.refresh(now, None);
            entry.insert(now);
        }

        self.after_write(now);

        Ok(())
    }

    async fn expire_key(&self, key: &str, now: f64, ttl: Duration) -> Result<(), StorageError> {
        if let Some(mut entry) = self.windows.get_mut(key) {
            entry.expires_at = Some(now + ttl.as_secs_f64());
        }

        Ok(())
    }

    async fn oldest(&self, key: &str) -> Result<Option<f64>, StorageError> {
        Ok(self.windows.get(key).and_then(|entry| entry.entries.front().copied()))
    }

    async fn check_and_record(
        &self,
        key: &str,
        now: f64,
        limit: u32,
        window: Duration,
    ) -> Result<WindowResult, StorageError> {
        let result = {
            let mut entry = self.windows.entry(key.to_string()).or_default();
            entry.refresh(now, Some(window));

            let count = entry.entries.len() as u64;

            if count < u64::from(limit) {
                entry.insert(now);
                entry.expires_at = Some(now + key_ttl(window).as_secs_f64());

                WindowResult {
                    recorded: true,
                    count: count + 1,
                    oldest: None,
                }
            } else {
                WindowResult {
                    recorded: false,
                    count,
                    oldest: entry.entries.front().copied(),
                }
            }
        };

        if result.recorded {
            self.after_write(now);
        }

        Ok(result)
    }
}
