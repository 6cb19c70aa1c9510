use async_trait::async_trait;
use memo::{CacheBackend, CacheKey, Lookup};
use moka::Expiry;
use moka::future::Cache;
use shared::{Result, Ttl};
use std::fmt::Debug;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct StoredEntry {
    payload: String,
    ttl: Option<Duration>,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, StoredEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process key-value cache with per-entry TTL, backed by Moka.
///
/// Same contract as the Redis backend, without the network hop. Entries
/// written with [`Ttl::BackendDefault`] use `default_ttl`, or never expire
/// when that is `None`.
pub struct MokaBackend {
    cache: Cache<String, StoredEntry>,
    default_ttl: Option<Duration>,
}

impl MokaBackend {
    /// Create a new Moka backend with optional capacity bound and default TTL
    pub fn new(max_entries: Option<u64>, default_ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().name("memo").expire_after(PerEntryTtl);

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
            default_ttl,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Flush Moka's pending maintenance (evictions, counters).
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl CacheBackend for MokaBackend {
    fn name(&self) -> &'static str {
        "moka"
    }

    async fn get(&self, key: &CacheKey) -> Lookup {
        match self.cache.get(key.as_str()).await {
            Some(entry) => Lookup::Hit(entry.payload),
            None => Lookup::Miss, // Either doesn't exist or TTL expired
        }
    }

    async fn set(&self, key: &CacheKey, payload: String, ttl: Ttl) -> Result<()> {
        let entry = StoredEntry {
            payload,
            ttl: ttl.as_duration().or(self.default_ttl),
        };
        self.cache.insert(key.as_str().to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.cache.remove(key.as_str()).await.is_some())
    }
}

impl Debug for MokaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaBackend")
            .field("entry_count", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
