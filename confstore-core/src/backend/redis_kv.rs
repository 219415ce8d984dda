use super::kv::{KvBackend, KvStore};
use crate::errors::{StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

/// Redis-backed confidential storage
pub type RedisBackend = KvBackend<RedisKv>;

impl RedisBackend {
    pub fn open(config: RedisStoreConfig) -> StoreResult<Self> {
        Ok(KvBackend::new(RedisKv::new(config)?))
    }
}

/// Connection settings for the Redis store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// redis:// connection URI
    pub url: String,

    /// Time allowed to establish the connection
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Time allowed for a single command round trip
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,

    /// Expiry applied to every stored key
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Backend("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// [`KvStore`] over a multiplexed Redis connection
pub struct RedisKv {
    client: Client,
    config: RedisStoreConfig,
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisKv {
    pub fn new(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            config,
            conn: RwLock::new(None),
        })
    }

    fn connection(&self) -> StoreResult<MultiplexedConnection> {
        self.conn
            .read()
            .map_err(handle_poison)?
            .clone()
            .ok_or_else(|| StoreError::Lifecycle("redis store is not started".to_string()))
    }

    async fn timed<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: Future<Output = redis::RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.config.response_timeout, op).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Backend(format!(
                "redis command timed out after {:?}",
                self.config.response_timeout
            ))),
        }
    }

    fn ttl_secs(&self) -> u64 {
        self.config.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn start(&self) -> StoreResult<()> {
        let connect = self.client.get_multiplexed_tokio_connection();
        let conn = tokio::time::timeout(self.config.connection_timeout, connect)
            .await
            .map_err(|_| StoreError::Backend("redis connection timed out".to_string()))??;

        *self.conn.write().map_err(handle_poison)? = Some(conn);
        info!(url = %self.config.url, "redis store connected");
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        self.conn.write().map_err(handle_poison)?.take();
        debug!("redis store connection released");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection()?;
        let cmd = redis::cmd("GET").arg(key).clone();
        self.timed(async move { cmd.query_async(&mut conn).await }).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let cmd = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(self.ttl_secs())
            .clone();
        self.timed(async move { cmd.query_async(&mut conn).await }).await
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let cmd = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs())
            .clone();
        let reply: Option<String> = self
            .timed(async move { cmd.query_async(&mut conn).await })
            .await?;
        Ok(reply.is_some())
    }
}
