//! Pooled multiplexed Redis connections.

use std::sync::atomic::{AtomicUsize, Ordering};

use deadpool::managed::{self, Metrics};
use redis::{Client, ClientTlsConfig, ErrorKind, RedisError, RedisResult, TlsCertificates, aio::MultiplexedConnection};

use config::{RedisConfig, RedisTlsConfig};

pub(crate) type Pool = managed::Pool<Manager>;

/// Creates connections and checks them with a numbered PING before reuse.
#[derive(Debug)]
pub(crate) struct Manager {
    client: Client,
    ping_number: AtomicUsize,
}

impl Manager {
    fn new(config: &RedisConfig) -> RedisResult<Self> {
        let client = match &config.tls {
            Some(tls) => Client::build_with_tls(config.url.as_str(), tls_certificates(tls)?)?,
            None => Client::open(config.url.as_str())?,
        };

        Ok(Self {
            client,
            ping_number: AtomicUsize::new(0),
        })
    }
}

impl managed::Manager for Manager {
    type Type = MultiplexedConnection;
    type Error = RedisError;

    async fn create(&self) -> Result<MultiplexedConnection, Self::Error> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn recycle(&self, conn: &mut MultiplexedConnection, _: &Metrics) -> managed::RecycleResult<Self::Error> {
        let ping_number = self.ping_number.fetch_add(1, Ordering::Relaxed).to_string();

        let (n,) = redis::Pipeline::with_capacity(2)
            .cmd("UNWATCH")
            .ignore()
            .cmd("PING")
            .arg(&ping_number)
            .query_async::<(String,)>(conn)
            .await?;

        if n == ping_number {
            Ok(())
        } else {
            Err(managed::RecycleError::message("Invalid PING response"))
        }
    }
}

fn read_pem(path: &str, what: &'static str) -> RedisResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| RedisError::from((ErrorKind::IoError, what, format!("{path}: {e}"))))
}

fn tls_certificates(config: &RedisTlsConfig) -> RedisResult<TlsCertificates> {
    let client_tls = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => Some(ClientTlsConfig {
            client_cert: read_pem(cert_path, "Failed to read Redis client certificate")?,
            client_key: read_pem(key_path, "Failed to read Redis client key")?,
        }),
        (None, None) => None,
        _ => {
            return Err(RedisError::from((
                ErrorKind::InvalidClientConfig,
                "Redis mutual TLS needs both client_cert_path and client_key_path",
            )));
        }
    };

    let root_cert = config
        .ca_cert_path
        .as_deref()
        .map(|path| read_pem(path, "Failed to read Redis CA certificate"))
        .transpose()?;

    Ok(TlsCertificates { client_tls, root_cert })
}

/// Create a Redis connection pool from configuration. No connection is opened yet.
pub(crate) fn create_pool(config: &RedisConfig) -> RedisResult<Pool> {
    let manager = Manager::new(config)?;

    let mut pool_config = managed::PoolConfig::default();

    if let Some(max_size) = config.pool.max_size {
        pool_config.max_size = max_size;
    }

    pool_config.timeouts.create = config.pool.timeout_create;
    pool_config.timeouts.wait = config.pool.timeout_wait;
    pool_config.timeouts.recycle = config.pool.timeout_recycle;

    Pool::builder(manager)
        .config(pool_config)
        .runtime(deadpool::Runtime::Tokio1)
        .build()
        .map_err(|e| RedisError::from((ErrorKind::IoError, "Failed to create pool", e.to_string())))
}
