use async_trait::async_trait;
use chrono::Utc;
use memo::{CacheBackend, CacheKey, Lookup};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use shared::config::EdgeCredentials;
use shared::{Error, Result, Ttl};
use std::time::Duration;
use tracing::{debug, warn};

/// Static tag every edge key is prefixed with.
pub const DEFAULT_NAMESPACE_TAG: &str = "cache";

/// How long edge entries live. The edge store has no native expiry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EdgeRetention {
    /// Entries stay until explicitly deleted.
    #[default]
    Indefinite,
    /// Entries older than this are reported absent and deleted on read.
    ExpireAfter(Duration),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    stored_at_ms: i64,
    value: String,
}

/// Remote key-value backend talking to an edge KV management API
/// (Cloudflare Workers KV style: `.../storage/kv/namespaces/{ns}/values/{key}`).
pub struct EdgeKvBackend {
    client: Client,
    values_url: Url,
    namespace_tag: String,
    retention: EdgeRetention,
}

impl EdgeKvBackend {
    pub fn new(credentials: &EdgeCredentials, op_timeout: Duration) -> Result<Self> {
        let values_url = Url::parse(&format!(
            "{}/accounts/{}/storage/kv/namespaces/{}/values",
            credentials.api_base.trim_end_matches('/'),
            credentials.account_id,
            credentials.namespace_id
        ))
        .map_err(|e| Error::Config(format!("invalid edge api base: {}", e)))?;

        if values_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "edge api base '{}' cannot hold a path",
                credentials.api_base
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert("x-auth-email", header_value(&credentials.email)?);
        headers.insert("x-auth-key", header_value(&credentials.api_key)?);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(op_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            values_url,
            namespace_tag: DEFAULT_NAMESPACE_TAG.to_string(),
            retention: EdgeRetention::default(),
        })
    }

    pub fn with_namespace_tag(mut self, tag: impl Into<String>) -> Self {
        self.namespace_tag = tag.into();
        self
    }

    pub fn with_retention(mut self, retention: EdgeRetention) -> Self {
        self.retention = retention;
        self
    }

    fn value_url(&self, key: &CacheKey) -> Url {
        let mut url = self.values_url.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(&key.namespaced(&self.namespace_tag));
        }
        url
    }

    fn wrap(&self, payload: String) -> Result<String> {
        match self.retention {
            EdgeRetention::Indefinite => Ok(payload),
            EdgeRetention::ExpireAfter(_) => serde_json::to_string(&Envelope {
                stored_at_ms: Utc::now().timestamp_millis(),
                value: payload,
            })
            .map_err(|e| Error::Serialization(e.to_string())),
        }
    }

    /// `None` when the stored body is past its retention or not an envelope.
    fn unwrap_fresh(&self, key: &CacheKey, body: String) -> Option<String> {
        let max_age = match self.retention {
            EdgeRetention::Indefinite => return Some(body),
            EdgeRetention::ExpireAfter(max_age) => max_age,
        };

        let envelope: Envelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("edge-kv value without envelope, key: '{}': {}", key, e);
                return None;
            }
        };

        let age_ms = Utc::now().timestamp_millis() - envelope.stored_at_ms;
        if age_ms >= max_age.as_millis() as i64 {
            debug!("edge-kv entry expired, key: '{}', age: {}ms", key, age_ms);
            None
        } else {
            Some(envelope.value)
        }
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        let response = self
            .client
            .delete(self.value_url(key))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("edge-kv delete failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Error::Backend(format!(
                "edge-kv delete returned HTTP {}",
                status
            ))),
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|e| Error::Config(format!("invalid edge credential: {}", e)))?;
    header.set_sensitive(true);
    Ok(header)
}

#[async_trait]
impl CacheBackend for EdgeKvBackend {
    fn name(&self) -> &'static str {
        "edge-kv"
    }

    async fn get(&self, key: &CacheKey) -> Lookup {
        let response = match self.client.get(self.value_url(key)).send().await {
            Ok(response) => response,
            Err(e) => return Lookup::Unavailable(format!("edge-kv get failed: {}", e)),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Lookup::Miss;
        }
        if !status.is_success() {
            return Lookup::Unavailable(format!("edge-kv get returned HTTP {}", status));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Lookup::Unavailable(format!("edge-kv read failed: {}", e)),
        };

        match self.unwrap_fresh(key, body) {
            Some(payload) => Lookup::Hit(payload),
            None => {
                if let Err(e) = self.remove(key).await {
                    warn!("edge-kv failed to drop stale key '{}': {}", key, e);
                }
                Lookup::Miss
            }
        }
    }

    /// The edge store keeps values until deleted; `ttl` is not forwarded.
    async fn set(&self, key: &CacheKey, payload: String, _ttl: Ttl) -> Result<()> {
        let body = self.wrap(payload)?;
        let response = self
            .client
            .put(self.value_url(key))
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("edge-kv put failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Backend(format!("edge-kv put returned HTTP {}", status)))
        }
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.remove(key).await
    }
}

impl std::fmt::Debug for EdgeKvBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeKvBackend")
            .field("values_url", &self.values_url.as_str())
            .field("namespace_tag", &self.namespace_tag)
            .field("retention", &self.retention)
            .finish()
    }
}
