use crate::{Error, ReadFailurePolicy, Result};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Which store sits behind the cache-aside layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Redis,
    Edge,
}

impl FromStr for CacheBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "moka" => Ok(CacheBackendKind::Memory),
            "redis" => Ok(CacheBackendKind::Redis),
            "edge" | "cloudflare" => Ok(CacheBackendKind::Edge),
            other => Err(Error::Config(format!(
                "unknown cache backend '{}', expected memory, redis or edge",
                other
            ))),
        }
    }
}

/// Credentials for the edge key-value management API.
#[derive(Clone)]
pub struct EdgeCredentials {
    pub api_base: String,
    pub account_id: String,
    pub email: String,
    pub api_key: String,
    pub namespace_id: String,
}

impl std::fmt::Debug for EdgeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeCredentials")
            .field("api_base", &self.api_base)
            .field("account_id", &self.account_id)
            .field("email", &self.email)
            .field("api_key", &"[REDACTED]")
            .field("namespace_id", &self.namespace_id)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub http_port: u16,
    pub data_dir: String,
    pub cache_backend: CacheBackendKind,
    pub redis_url: String,
    pub cache_op_timeout: Duration,
    pub edge: Option<EdgeCredentials>,
    pub allowed_origins: Vec<String>,
    pub featured_users: Vec<i64>,
    pub import_dir: Option<String>,
    /// Cache policy applied to every cached read.
    pub cache: CachePolicy,
    /// Remote catalog API the startup backfill crawls.
    pub crawler: CrawlerConfig,
}

/// Knobs for the cache-aside layer and the backends behind it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    pub read_failure: ReadFailurePolicy,
    /// Store `None` results. Defaults to off for the edge backend, which
    /// keeps entries until deleted.
    pub cache_none: bool,
    /// Expiry for redis writes made without an explicit TTL.
    pub redis_default_ttl: Option<Duration>,
    /// Max age of edge entries; `None` keeps them indefinitely.
    pub edge_retention: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrawlerConfig {
    pub api_base: String,
    pub request_delay: Duration,
    pub page_limit: usize,
    /// Users whose episodes are backfilled on startup.
    pub backfill_users: Vec<i64>,
    /// Albums (and their episodes) backfilled on startup.
    pub backfill_albums: Vec<i64>,
}

impl CrawlerConfig {
    pub fn has_work(&self) -> bool {
        !self.backfill_users.is_empty() || !self.backfill_albums.is_empty()
    }
}

fn parse_ids(raw: Option<String>, name: &str) -> Result<Vec<i64>> {
    match raw {
        Some(csv) => csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>()
                    .map_err(|_| Error::Config(format!("invalid id '{}' in {}", s, name)))
            })
            .collect(),
        None => Ok(Vec::new()),
    }
}

fn parse_bool(raw: &str, name: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("invalid boolean '{}' for {}", other, name))),
    }
}

/// `0` and unparsable values mean "not set".
fn positive_secs(raw: Option<String>) -> Option<Duration> {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

impl Config {
    const DEFAULT_HOST: &str = "0.0.0.0";
    const DEFAULT_HTTP_PORT: u16 = 8080;
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";
    const DEFAULT_OP_TIMEOUT_MS: u64 = 500;
    const DEFAULT_EDGE_API_BASE: &str = "https://api.cloudflare.com/client/v4";
    const DEFAULT_CRAWLER_API_BASE: &str = "https://www.gcores.com/gapi/v1";
    const DEFAULT_CRAWLER_DELAY_MS: u64 = 1000;
    const DEFAULT_CRAWLER_PAGE_LIMIT: usize = 50;

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let http_port = var("PODCAST_HTTP_PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(Self::DEFAULT_HTTP_PORT);

        let cache_backend = match var("PODCAST_CACHE_BACKEND") {
            Some(kind) => kind.parse()?,
            None => CacheBackendKind::Memory,
        };

        let cache_op_timeout = Duration::from_millis(
            var("CACHE_OP_TIMEOUT_MS")
                .and_then(|t| t.parse::<u64>().ok())
                .unwrap_or(Self::DEFAULT_OP_TIMEOUT_MS),
        );

        let edge = match (
            var("CLOUDFLARE_ACCOUNT_ID"),
            var("CLOUDFLARE_EMAIL"),
            var("CLOUDFLARE_API_KEY"),
            var("CLOUDFLARE_NAMESPACE_ID"),
        ) {
            (Some(account_id), Some(email), Some(api_key), Some(namespace_id)) => {
                Some(EdgeCredentials {
                    api_base: var("CLOUDFLARE_API_BASE")
                        .unwrap_or_else(|| Self::DEFAULT_EDGE_API_BASE.to_string()),
                    account_id,
                    email,
                    api_key,
                    namespace_id,
                })
            }
            _ => None,
        };

        if cache_backend == CacheBackendKind::Edge && edge.is_none() {
            return Err(Error::Config(
                "edge cache backend selected but CLOUDFLARE_ACCOUNT_ID, CLOUDFLARE_EMAIL, \
                 CLOUDFLARE_API_KEY and CLOUDFLARE_NAMESPACE_ID are not all set"
                    .to_string(),
            ));
        }

        let redis_url = var("REDIS_URL").unwrap_or_else(|| {
            if cache_backend == CacheBackendKind::Redis {
                warn!(
                    "REDIS_URL not set, using default {}",
                    Self::DEFAULT_REDIS_URL
                );
            }
            Self::DEFAULT_REDIS_URL.to_string()
        });

        let featured_users = parse_ids(var("PODCAST_FEATURED_USERS"), "PODCAST_FEATURED_USERS")?;

        let cache = CachePolicy {
            read_failure: match var("CACHE_READ_FAILURE_POLICY") {
                Some(policy) => policy.parse()?,
                None => ReadFailurePolicy::default(),
            },
            cache_none: match var("CACHE_NONE") {
                Some(flag) => parse_bool(&flag, "CACHE_NONE")?,
                None => cache_backend != CacheBackendKind::Edge,
            },
            redis_default_ttl: positive_secs(var("REDIS_DEFAULT_TTL_SECS")),
            edge_retention: positive_secs(var("EDGE_RETENTION_SECS")),
        };

        let crawler = CrawlerConfig {
            api_base: var("CRAWLER_API_BASE")
                .unwrap_or_else(|| Self::DEFAULT_CRAWLER_API_BASE.to_string()),
            request_delay: Duration::from_millis(
                var("CRAWLER_DELAY_MS")
                    .and_then(|d| d.parse::<u64>().ok())
                    .unwrap_or(Self::DEFAULT_CRAWLER_DELAY_MS),
            ),
            page_limit: var("CRAWLER_PAGE_LIMIT")
                .and_then(|l| l.parse::<usize>().ok())
                .filter(|l| *l > 0)
                .unwrap_or(Self::DEFAULT_CRAWLER_PAGE_LIMIT),
            backfill_users: parse_ids(var("PODCAST_BACKFILL_USERS"), "PODCAST_BACKFILL_USERS")?,
            backfill_albums: parse_ids(var("PODCAST_BACKFILL_ALBUMS"), "PODCAST_BACKFILL_ALBUMS")?,
        };

        Ok(Self {
            host: var("PODCAST_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            http_port,
            data_dir: var("PODCAST_DATA_DIR").unwrap_or_else(|| Self::DEFAULT_DATA_DIR.to_string()),
            cache_backend,
            redis_url,
            cache_op_timeout,
            edge,
            allowed_origins: var("PODCAST_ALLOWED_ORIGINS")
                .unwrap_or_else(|| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            featured_users,
            import_dir: var("PODCAST_IMPORT_DIR"),
            cache,
            crawler,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}
