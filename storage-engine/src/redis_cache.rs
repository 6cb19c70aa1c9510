use async_trait::async_trait;
use memo::{CacheBackend, CacheKey, Lookup};
use redis::AsyncCommands;
use redis::RedisResult;
use redis::aio::ConnectionManager;
use shared::{Error, Result, Ttl};
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

/// Networked key-value backend speaking to Redis.
///
/// The connection is opened lazily on first use and shared afterwards; the
/// multiplexed [`ConnectionManager`] is cheap to clone per command and
/// reconnects on its own. Every command is bounded by `op_timeout`.
pub struct RedisBackend {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    default_ttl: Option<Duration>,
    op_timeout: Duration,
}

impl RedisBackend {
    /// Validate the URL and prepare a client. No connection is made yet.
    pub fn new(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid redis url '{}': {}", url, e)))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            default_ttl: None,
            op_timeout,
        })
    }

    /// TTL used for writes made with [`Ttl::BackendDefault`]; `None` means
    /// such entries never expire.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .bounded("connect", async {
                self.connection
                    .get_or_try_init(|| async {
                        let manager = ConnectionManager::new(self.client.clone()).await?;
                        info!("Connected to redis");
                        Ok::<_, redis::RedisError>(manager)
                    })
                    .await
                    .cloned()
            })
            .await?;
        Ok(manager)
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Backend(format!("redis {} failed: {}", op, e))),
            Err(_) => Err(Error::Backend(format!(
                "redis {} timed out after {:?}",
                op, self.op_timeout
            ))),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &CacheKey) -> Lookup {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => return Lookup::Unavailable(e.to_string()),
        };

        match self
            .bounded("get", conn.get::<_, Option<String>>(key.as_str()))
            .await
        {
            Ok(Some(payload)) => Lookup::Hit(payload),
            Ok(None) => Lookup::Miss,
            Err(e) => Lookup::Unavailable(e.to_string()),
        }
    }

    async fn set(&self, key: &CacheKey, payload: String, ttl: Ttl) -> Result<()> {
        let mut conn = self.connection().await?;

        match ttl.as_duration().or(self.default_ttl) {
            Some(ttl) => {
                let seconds = ttl.as_secs().max(1);
                self.bounded(
                    "set",
                    conn.set_ex::<_, _, ()>(key.as_str(), payload, seconds),
                )
                .await
            }
            None => {
                self.bounded("set", conn.set::<_, _, ()>(key.as_str(), payload))
                    .await
            }
        }
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = self.bounded("del", conn.del(key.as_str())).await?;
        Ok(removed > 0)
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("connected", &self.connection.initialized())
            .field("default_ttl", &self.default_ttl)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}
