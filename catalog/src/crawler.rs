//! Backfills the catalog from the platform's JSON:API.
//!
//! Every request is preceded by a fixed delay so a backfill stays polite to
//! the upstream API. Pages of a user's radios are fetched until a short page
//! comes back, then the whole run is written through the same path as a dump
//! import.

use crate::import::{Batch, Document, ImportSummary, Resource, import_resources};
use crate::sled_store::CatalogStore;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use shared::config::CrawlerConfig;
use shared::{Error, Result};
use std::time::Duration;
use tracing::{debug, error, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RADIO_INCLUDES: &str = "category,user,djs";
const RADIO_FIELDS: &str = "title,desc,excerpt,thumb,cover,comments-count,likes-count,\
                            bookmarks-count,published-at,duration,is-free,user,category,djs,albums";

#[derive(Clone, Debug)]
pub struct Crawler {
    client: Client,
    base_url: String,
    page_limit: usize,
    request_delay: Duration,
}

impl Crawler {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            page_limit: config.page_limit.max(1),
            request_delay: config.request_delay,
        })
    }

    /// One page of a user's radios, newest first, with categories and hosts included.
    pub(crate) async fn fetch_user_episodes(
        &self,
        user_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Document> {
        let path = format!("/users/{}/radios", user_id);
        let query = [
            ("page[limit]", limit.to_string()),
            ("page[offset]", offset.to_string()),
            ("sort", "-published-at".to_string()),
            ("include", RADIO_INCLUDES.to_string()),
            ("filter[list-all]", "1".to_string()),
            ("fields[radios]", RADIO_FIELDS.to_string()),
        ];

        self.get_json(&path, &query)
            .await?
            .ok_or_else(|| Error::Upstream(format!("user {} not found", user_id)))
    }

    /// `None` when the album does not exist.
    pub(crate) async fn fetch_album(&self, album_id: i64) -> Result<Option<Document>> {
        self.get_json(&format!("/albums/{}", album_id), &[]).await
    }

    /// Radios published in an album.
    pub(crate) async fn fetch_episode_albums(&self, album_id: i64) -> Result<Option<Document>> {
        self.get_json(&format!("/albums/{}/published-audiobooks", album_id), &[])
            .await
    }

    /// Crawl every radio a user hosts and store it with its hosts and category.
    pub async fn backfill_user(&self, store: &CatalogStore, user_id: i64) -> Result<ImportSummary> {
        let mut resources: Vec<Resource> = Vec::new();
        let mut offset = 0;

        loop {
            info!(
                "Fetching radios of user {}, limit: {}, offset: {}",
                user_id, self.page_limit, offset
            );
            let page = self
                .fetch_user_episodes(user_id, self.page_limit, offset)
                .await?;
            let fetched = page.primary_count();

            resources.extend(page.into_resources());
            if fetched < self.page_limit {
                break;
            }
            offset += self.page_limit;
        }

        let summary = import_resources(store, resources)?;
        info!("Backfilled user {}: {:?}", user_id, summary);
        Ok(summary)
    }

    /// Store an album, the radios published in it and the links between them.
    pub async fn backfill_album(
        &self,
        store: &CatalogStore,
        album_id: i64,
    ) -> Result<ImportSummary> {
        let Some(album) = self.fetch_album(album_id).await? else {
            info!("Album {} not found, nothing to backfill", album_id);
            return Ok(ImportSummary::default());
        };

        let mut batch = Batch::default();
        batch.extend(&album.into_resources());

        if let Some(episodes) = self.fetch_episode_albums(album_id).await? {
            let resources = episodes.into_resources();
            let episode_ids = resources
                .iter()
                .filter(|resource| resource.kind == "radios")
                .filter_map(|resource| resource.id.parse().ok())
                .collect::<Vec<i64>>();
            batch.extend(&resources);
            batch.link_album(album_id, episode_ids);
        }

        let summary = batch.write(store)?;
        info!("Backfilled album {}: {:?}", album_id, summary);
        Ok(summary)
    }

    /// Run every configured backfill. A failing user or album is logged and
    /// the rest still run.
    pub async fn backfill(
        &self,
        store: &CatalogStore,
        user_ids: &[i64],
        album_ids: &[i64],
    ) -> ImportSummary {
        let mut summary = ImportSummary::default();

        for &user_id in user_ids {
            match self.backfill_user(store, user_id).await {
                Ok(done) => summary += done,
                Err(e) => error!("Failed to backfill user {}: {}", user_id, e),
            }
        }

        for &album_id in album_ids {
            match self.backfill_album(store, album_id).await {
                Ok(done) => summary += done,
                Err(e) => error!("Failed to backfill album {}: {}", album_id, e),
            }
        }

        summary
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("GET {} failed: {}", url, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| Error::Serialization(format!("GET {} returned bad JSON: {}", url, e))),
            status => Err(Error::Upstream(format!("GET {} returned HTTP {}", url, status))),
        }
    }
}
