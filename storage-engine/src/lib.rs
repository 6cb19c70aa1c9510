//! Stores that can sit behind a [`memo::CacheAside`].

pub mod edge_kv;
pub mod moka_cache;
pub mod redis_cache;

pub use edge_kv::{EdgeKvBackend, EdgeRetention};
pub use moka_cache::MokaBackend;
pub use redis_cache::RedisBackend;

use memo::{CacheAside, CacheBackend};
use shared::config::{CacheBackendKind, Config};
use shared::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Builds the one process-wide backend selected by configuration.
pub struct BackendFactory;

impl BackendFactory {
    pub fn create_from_config(config: &Config) -> Result<Arc<dyn CacheBackend>> {
        match config.cache_backend {
            CacheBackendKind::Memory => {
                info!("Using in-process moka cache backend");
                Ok(Arc::new(MokaBackend::unbounded()))
            }
            CacheBackendKind::Redis => Ok(Arc::new(Self::redis(config)?)),
            CacheBackendKind::Edge => Ok(Arc::new(Self::edge(config)?)),
        }
    }

    fn redis(config: &Config) -> Result<RedisBackend> {
        info!(
            "Using redis cache backend, default ttl {:?}",
            config.cache.redis_default_ttl
        );
        Ok(RedisBackend::new(&config.redis_url, config.cache_op_timeout)?
            .with_default_ttl(config.cache.redis_default_ttl))
    }

    fn edge(config: &Config) -> Result<EdgeKvBackend> {
        let credentials = config.edge.as_ref().ok_or_else(|| {
            Error::Config("edge cache backend selected without credentials".to_string())
        })?;
        let retention = match config.cache.edge_retention {
            Some(max_age) => EdgeRetention::ExpireAfter(max_age),
            None => EdgeRetention::Indefinite,
        };
        info!(
            "Using edge kv cache backend, namespace {}, retention {:?}",
            credentials.namespace_id, retention
        );
        Ok(EdgeKvBackend::new(credentials, config.cache_op_timeout)?.with_retention(retention))
    }

    /// The configured backend wrapped in a [`CacheAside`] carrying the
    /// configured read-failure and `None` policies.
    pub fn create_cache(config: &Config) -> Result<CacheAside<dyn CacheBackend>> {
        let backend = Self::create_from_config(config)?;
        Ok(CacheAside::new(backend)
            .with_read_failure_policy(config.cache.read_failure)
            .cache_none(config.cache.cache_none))
    }
}
