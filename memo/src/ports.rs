use crate::domain::{CacheKey, Lookup};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Result, Ttl};
use tracing::{error, warn};

// Ports are the pluggable extension points for the stores behind the cache

/// Port for a key-value store holding serialized (JSON) results.
///
/// Implementations must be safe to share between concurrent requests.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Short name used in logs and events.
    fn name(&self) -> &'static str;

    /// Read the raw payload. Failures are reported as [`Lookup::Unavailable`].
    async fn get(&self, key: &CacheKey) -> Lookup;

    /// Store a payload. Backends without native expiry ignore `ttl`.
    async fn set(&self, key: &CacheKey, payload: String, ttl: Ttl) -> Result<()>;

    /// Remove an entry. Returns whether something was removed; a missing key
    /// is not an error.
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
}

/// Typed, best-effort access on top of any [`CacheBackend`].
///
/// Nothing here returns an error: failed reads are absent, failed writes are
/// logged and dropped.
#[async_trait]
pub trait CacheBackendExt: CacheBackend {
    async fn get_json<T>(&self, key: &CacheKey) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let payload = match self.get(key).await {
            Lookup::Hit(payload) => payload,
            Lookup::Miss => return None,
            Lookup::Unavailable(reason) => {
                warn!("{} get failed, key: '{}': {}", self.name(), key, reason);
                return None;
            }
        };

        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("{} returned undecodable value, key: '{}': {}", self.name(), key, e);
                None
            }
        }
    }

    async fn set_json<T>(&self, key: &CacheKey, value: &T, ttl: Ttl)
    where
        T: Serialize + Sync,
    {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                error!("{} serialize error, key: '{}': {}", self.name(), key, e);
                return;
            }
        };

        if let Err(e) = self.set(key, payload, ttl).await {
            error!("{} set error, key: '{}': {}", self.name(), key, e);
        }
    }
}

impl<B: CacheBackend + ?Sized> CacheBackendExt for B {}
