use catalog::{CatalogReader, CatalogStore, Crawler, import_path};
use memo::{CacheAside, CacheBackend, CacheEvent};
use shared::config::Config;
use std::path::Path;
use std::sync::Arc;
use storage_engine::BackendFactory;
use tokio::sync::broadcast;
use tracing::info;

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: CatalogStore,
    pub reader: Arc<CatalogReader<dyn CacheBackend>>,
    pub event_channel: broadcast::Sender<CacheEvent>,
    /// Users listed by `GET /users`; empty means everyone.
    pub featured_users: Arc<[i64]>,
}

impl AppState {
    pub fn new(
        store: CatalogStore,
        cache: CacheAside<dyn CacheBackend>,
        featured_users: Vec<i64>,
    ) -> Self {
        // Create broadcast channel for SSE events (1000 event buffer capacity)
        let (event_tx, _event_rx) = broadcast::channel(1000);

        let cache = cache.with_event_broadcaster(event_tx.clone());

        Self {
            store,
            reader: Arc::new(CatalogReader::new(cache)),
            event_channel: event_tx,
            featured_users: featured_users.into(),
        }
    }

    /// Open the catalog under `data_dir`, run the startup import and backfill
    /// if configured, and connect the configured cache backend.
    pub async fn from_config(config: &Config) -> shared::Result<Self> {
        let store = CatalogStore::open(Path::new(&config.data_dir).join("catalog.sled"))?;
        info!("Catalog opened: {:?}", store);

        let mut changed = false;

        if let Some(dir) = &config.import_dir {
            let summary = import_path(&store, dir)?;
            info!("Startup import from {} finished: {:?}", dir, summary);
            changed = true;
        }

        if config.crawler.has_work() {
            let crawler = Crawler::new(&config.crawler)?;
            let summary = crawler
                .backfill(
                    &store,
                    &config.crawler.backfill_users,
                    &config.crawler.backfill_albums,
                )
                .await;
            info!("Startup backfill finished: {:?}", summary);
            changed = true;
        }

        let cache = BackendFactory::create_cache(config)?;
        info!("Cache policy: {:?}", cache);
        let state = Self::new(store, cache, config.featured_users.clone());

        if changed {
            state.reader.invalidate_listings().await;
        }

        Ok(state)
    }
}
