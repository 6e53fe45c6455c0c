//! Redis sliding window storage.
//!
//! Each dimension key is a sorted set scored by request timestamp. Members
//! carry a random suffix so that requests at the same instant from different
//! gate instances are all counted. The combined check-and-record runs as one
//! Lua script, which Redis executes without interleaving other commands.

use std::{future::Future, sync::LazyLock, time::Duration};

use deadpool::managed::Object;
use redis::{RedisError, Script};
use uuid::Uuid;

use config::RedisConfig;

use super::{
    StorageError, WindowResult, WindowStore, cutoff, key_ttl,
    redis_pool::{self, Manager, Pool},
};

/// KEYS[1]: window key
/// ARGV: now, cutoff, limit, ttl seconds, member
///
/// Returns `{recorded, count, oldest score or ''}`.
static CHECK_AND_RECORD: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local key = KEYS[1]

        redis.call('ZREMRANGEBYSCORE', key, '-inf', ARGV[2])
        local count = redis.call('ZCARD', key)

        if count < tonumber(ARGV[3]) then
            redis.call('ZADD', key, ARGV[1], ARGV[5])
            redis.call('EXPIRE', key, ARGV[4])
            return {1, count + 1, ''}
        end

        local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
        return {0, count, oldest[2] or ''}
        ",
    )
});

/// Redis-based window storage implementation.
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
    response_timeout: Duration,
}

impl RedisStorage {
    /// Creates the storage and verifies with a PING that Redis answers
    /// within the configured connection timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StorageError> {
        let storage = Self::new(config)?;

        tokio::time::timeout(config.connection_timeout, storage.ping())
            .await
            .map_err(|_| StorageError::Timeout(config.connection_timeout))??;

        Ok(storage)
    }

    /// Creates the storage without opening a connection.
    pub(crate) fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = redis_pool::create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
            response_timeout: config.response_timeout,
        })
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;

        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to ping Redis server: {e}")))?;

        Ok(())
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<Object<Manager>, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to get Redis connection from pool: {e}")))
    }

    /// Bounds an operation, including the wait for a pooled connection, by the response timeout.
    async fn bounded<T>(&self, operation: impl Future<Output = Result<T, StorageError>>) -> Result<T, StorageError> {
        tokio::time::timeout(self.response_timeout, operation)
            .await
            .map_err(|_| StorageError::Timeout(self.response_timeout))?
    }
}

fn query_error(error: RedisError) -> StorageError {
    if error.is_io_error() || error.is_connection_refusal() || error.is_connection_dropped() {
        StorageError::Connection(error.to_string())
    } else {
        StorageError::Query(error.to_string())
    }
}

impl WindowStore for RedisStorage {
    async fn count(&self, key: &str, now: f64, window: Duration) -> Result<u64, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            let (_, count): (u64, u64) = redis::pipe()
                .atomic()
                .cmd("ZREMRANGEBYSCORE")
                .arg(&key)
                .arg("-inf")
                .arg(cutoff(now, window))
                .cmd("ZCARD")
                .arg(&key)
                .query_async(&mut *conn)
                .await
                .map_err(query_error)?;

            Ok(count)
        })
        .await
    }

    async fn add(&self, key: &str, now: f64) -> Result<(), StorageError> {
        let key = self.key(key);
        let member = format!("{now}:{}", Uuid::new_v4().simple());

        self.bounded(async {
            let mut conn = self.connection().await?;

            redis::cmd("ZADD")
                .arg(&key)
                .arg(now)
                .arg(member)
                .query_async::<()>(&mut *conn)
                .await
                .map_err(query_error)
        })
        .await
    }

    async fn expire_key(&self, key: &str, _now: f64, ttl: Duration) -> Result<(), StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(ttl.as_secs().max(1))
                .query_async::<()>(&mut *conn)
                .await
                .map_err(query_error)
        })
        .await
    }

    async fn oldest(&self, key: &str) -> Result<Option<f64>, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            let entries: Vec<(String, f64)> = redis::cmd("ZRANGE")
                .arg(&key)
                .arg(0)
                .arg(0)
                .arg("WITHSCORES")
                .query_async(&mut *conn)
                .await
                .map_err(query_error)?;

            Ok(entries.first().map(|(_, score)| *score))
        })
        .await
    }

    async fn check_and_record(
        &self,
        key: &str,
        now: f64,
        limit: u32,
        window: Duration,
    ) -> Result<WindowResult, StorageError> {
        let key = self.key(key);
        let member = format!("{now}:{}", Uuid::new_v4().simple());

        self.bounded(async {
            let mut conn = self.connection().await?;

            let mut invocation = CHECK_AND_RECORD.key(&key);
            invocation
                .arg(now)
                .arg(cutoff(now, window))
                .arg(limit)
                .arg(key_ttl(window).as_secs())
                .arg(&member);

            let (recorded, count, oldest): (i64, u64, String) =
                invocation.invoke_async(&mut *conn).await.map_err(query_error)?;

            Ok(WindowResult {
                recorded: recorded == 1,
                count,
                oldest: oldest.parse().ok(),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn unreachable_config() -> RedisConfig {
        let mut config = RedisConfig::from_url("redis://127.0.0.1:1/0");
        config.response_timeout = Duration::from_millis(500);
        config.connection_timeout = Duration::from_millis(500);
        config
    }

    /// Connects to the Redis named by `REDIS_URL`, under a prefix unique to the test.
    async fn live_storage() -> RedisStorage {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string());
        let mut config = RedisConfig::from_url(url);
        config.key_prefix = format!("docgate:test:{}:", Uuid::new_v4().simple());

        RedisStorage::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn connect_fails_when_redis_is_unreachable() {
        let result = RedisStorage::connect(&unreachable_config()).await;
        assert!(matches!(
            result,
            Err(StorageError::Connection(_) | StorageError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn operations_fail_instead_of_hanging() {
        let storage = RedisStorage::new(&unreachable_config()).unwrap();

        let error = storage.check_and_record("user:u1", 0.0, 5, MINUTE).await.unwrap_err();

        assert!(matches!(error, StorageError::Connection(_) | StorageError::Timeout(_)));
    }

    #[test]
    fn keys_are_prefixed() {
        let storage = RedisStorage::new(&RedisConfig::default()).unwrap();
        assert_eq!(storage.key("user:u1"), "docgate:rate_limit:user:u1");
    }

    #[tokio::test]
    #[ignore = "requires a running Redis, see REDIS_URL"]
    async fn sliding_window_against_redis() {
        let storage = live_storage().await;
        let now = 1_700_000_000.0;

        for _ in 0..5 {
            let result = storage.check_and_record("user:u1", now, 5, MINUTE).await.unwrap();
            assert!(result.recorded);
        }

        let rejected = storage.check_and_record("user:u1", now + 1.0, 5, MINUTE).await.unwrap();
        assert!(!rejected.recorded);
        assert_eq!(rejected.count, 5);
        assert_eq!(rejected.oldest, Some(now));

        assert_eq!(storage.count("user:u1", now + 60.0, MINUTE).await.unwrap(), 0);

        let accepted = storage.check_and_record("user:u1", now + 61.0, 5, MINUTE).await.unwrap();
        assert!(accepted.recorded);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis, see REDIS_URL"]
    async fn primitive_operations_against_redis() {
        let storage = live_storage().await;

        storage.add("k", 10.0).await.unwrap();
        storage.add("k", 10.0).await.unwrap();
        storage.expire_key("k", 10.0, MINUTE).await.unwrap();

        assert_eq!(storage.count("k", 11.0, MINUTE).await.unwrap(), 2);
        assert_eq!(storage.oldest("k").await.unwrap(), Some(10.0));
        assert_eq!(storage.oldest("missing").await.unwrap(), None);
    }
}
