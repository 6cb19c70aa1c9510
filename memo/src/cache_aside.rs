use crate::domain::{CacheKey, CallArgs, Lookup, ReadFailurePolicy};
use crate::events::{
    CacheEvent, HitEvent, MissEvent, MissReason, SkipReason, SkippedEvent, StoredEvent,
    now_timestamp,
};
use crate::ports::CacheBackend;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::Ttl;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Cache-aside wrapper around read functions, bound to one backend.
///
/// ```ignore
/// let cached = CacheAside::new(backend).with_ttl(Ttl::from_secs(300));
/// let user = cached
///     .call("get_user", &store, &CallArgs::new().kwarg("user_id", 42), |store| async move {
///         store.user(42)
///     })
///     .await;
/// ```
///
/// There is no single-flight: concurrent misses on the same key each run the
/// wrapped function and each write the result.
pub struct CacheAside<B: CacheBackend + ?Sized> {
    backend: Arc<B>,
    ttl: Ttl,
    read_failure: ReadFailurePolicy,
    cache_none: bool,
    event_broadcaster: Option<broadcast::Sender<CacheEvent>>,
}

enum Cached<T> {
    Hit(T),
    Miss,
    Unavailable,
}

impl<B: CacheBackend + ?Sized> CacheAside<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            ttl: Ttl::default(),
            read_failure: ReadFailurePolicy::default(),
            cache_none: true,
            event_broadcaster: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_read_failure_policy(mut self, policy: ReadFailurePolicy) -> Self {
        self.read_failure = policy;
        self
    }

    /// Whether results that serialize to JSON `null` (e.g. `Option::None`)
    /// are written to the backend.
    pub fn cache_none(mut self, enabled: bool) -> Self {
        self.cache_none = enabled;
        self
    }

    pub fn with_event_broadcaster(mut self, broadcaster: broadcast::Sender<CacheEvent>) -> Self {
        self.event_broadcaster = Some(broadcaster);
        self
    }

    /// Serve `function(args)` from the cache, or run `f(handle)` and cache it.
    pub async fn call<H, T, F, Fut>(&self, function: &str, handle: H, args: &CallArgs, f: F) -> T
    where
        F: FnOnce(H) -> Fut,
        Fut: Future<Output = T>,
        T: Serialize + DeserializeOwned,
    {
        let result = self
            .try_call(function, handle, args, |handle| async move {
                Ok::<T, Infallible>(f(handle).await)
            })
            .await;

        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`CacheAside::call`] for fallible functions. An error from `f` is
    /// returned unchanged and nothing is cached.
    pub async fn try_call<H, T, E, F, Fut>(
        &self,
        function: &str,
        handle: H,
        args: &CallArgs,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(H) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
    {
        let key = CacheKey::derive(function, args);

        let write_back = match self.lookup::<T>(&key).await {
            Cached::Hit(value) => return Ok(value),
            Cached::Miss => true,
            Cached::Unavailable => self.read_failure == ReadFailurePolicy::TreatAsMiss,
        };

        let value = f(handle).await?;

        if write_back {
            self.store(&key, &value).await;
        } else {
            debug!(
                "{} unavailable, not writing back key: '{}'",
                self.backend.name(),
                key
            );
            self.emit_skipped(&key, SkipReason::BackendUnavailable);
        }

        Ok(value)
    }

    /// Drop the cached result of a logical call.
    pub async fn invalidate(&self, function: &str, args: &CallArgs) -> shared::Result<bool> {
        let key = CacheKey::derive(function, args);
        let removed = self.backend.delete(&key).await?;
        debug!(
            "{} invalidate key: '{}', removed: {}",
            self.backend.name(),
            key,
            removed
        );
        Ok(removed)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Cached<T> {
        let start = Instant::now();
        let lookup = self.backend.get(key).await;
        let elapsed = start.elapsed();

        match lookup {
            Lookup::Hit(payload) => match serde_json::from_str::<T>(&payload) {
                Ok(value) => {
                    info!(
                        "{} get success, key: '{}', used time: {:?}",
                        self.backend.name(),
                        key,
                        elapsed
                    );
                    self.emit(CacheEvent::Hit(HitEvent {
                        backend: self.backend.name().to_string(),
                        key: key.to_string(),
                        elapsed_us: elapsed.as_micros() as u64,
                        timestamp: now_timestamp(),
                    }));
                    Cached::Hit(value)
                }
                Err(e) => {
                    warn!(
                        "{} cached value does not decode, key: '{}': {}",
                        self.backend.name(),
                        key,
                        e
                    );
                    self.emit_miss(key, MissReason::Undecodable);
                    Cached::Miss
                }
            },
            Lookup::Miss => {
                info!(
                    "{} get empty, key: '{}', used time: {:?}",
                    self.backend.name(),
                    key,
                    elapsed
                );
                self.emit_miss(key, MissReason::Absent);
                Cached::Miss
            }
            Lookup::Unavailable(reason) => {
                warn!(
                    "{} get error, key: '{}': {}",
                    self.backend.name(),
                    key,
                    reason
                );
                self.emit_miss(key, MissReason::Unavailable);
                Cached::Unavailable
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &CacheKey, value: &T) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    "{} serialize error, key: '{}': {}",
                    self.backend.name(),
                    key,
                    e
                );
                self.emit_skipped(key, SkipReason::SerializeFailed);
                return;
            }
        };

        if !self.cache_none && payload == "null" {
            debug!("Not caching empty result, key: '{}'", key);
            self.emit_skipped(key, SkipReason::NoneResult);
            return;
        }

        let value_size = payload.len();
        match self.backend.set(key, payload, self.ttl).await {
            Ok(()) => {
                debug!(
                    "{} set, key: '{}', size: {}, ttl: {:?}",
                    self.backend.name(),
                    key,
                    value_size,
                    self.ttl
                );
                self.emit(CacheEvent::Stored(StoredEvent {
                    backend: self.backend.name().to_string(),
                    key: key.to_string(),
                    value_size,
                    ttl_secs: self.ttl.as_secs(),
                    timestamp: now_timestamp(),
                }));
            }
            Err(e) => {
                error!("{} set error, key: '{}': {}", self.backend.name(), key, e);
                self.emit_skipped(key, SkipReason::WriteFailed);
            }
        }
    }

    fn emit_miss(&self, key: &CacheKey, reason: MissReason) {
        self.emit(CacheEvent::Miss(MissEvent {
            backend: self.backend.name().to_string(),
            key: key.to_string(),
            reason,
            timestamp: now_timestamp(),
        }));
    }

    fn emit_skipped(&self, key: &CacheKey, reason: SkipReason) {
        self.emit(CacheEvent::Skipped(SkippedEvent {
            backend: self.backend.name().to_string(),
            key: key.to_string(),
            reason,
            timestamp: now_timestamp(),
        }));
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(ref broadcaster) = self.event_broadcaster {
            if broadcaster.send(event).is_err() {
                trace!("No subscribers for cache event");
            }
        }
    }
}

impl<B: CacheBackend + ?Sized> Clone for CacheAside<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            ttl: self.ttl,
            read_failure: self.read_failure,
            cache_none: self.cache_none,
            event_broadcaster: self.event_broadcaster.clone(),
        }
    }
}

impl<B: CacheBackend + ?Sized> std::fmt::Debug for CacheAside<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("backend", &self.backend.name())
            .field("ttl", &self.ttl)
            .field("read_failure", &self.read_failure)
            .field("cache_none", &self.cache_none)
            .finish()
    }
}
