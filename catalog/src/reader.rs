use crate::models::{Album, Category, Episode, EpisodeQuery, User};
use crate::sled_store::CatalogStore;
use memo::{CacheAside, CacheBackend, CallArgs, Ttl};
use shared::Result;
use tracing::warn;

/// Half an hour; the category list changes rarely but is read on every page.
pub const CATEGORIES_TTL: Ttl = Ttl::from_secs(1800);
/// Five minutes for episode listings.
pub const EPISODES_TTL: Ttl = Ttl::from_secs(300);

/// Cached reads over a [`CatalogStore`].
///
/// Point lookups and the user list use the TTL of the [`CacheAside`] the
/// reader was built from (one day unless overridden); category and episode
/// listings use their own shorter TTLs. Every read takes the store as its
/// handle, so the cache key only depends on the query.
pub struct CatalogReader<B: CacheBackend + ?Sized> {
    default: CacheAside<B>,
    categories: CacheAside<B>,
    episodes: CacheAside<B>,
}

impl<B: CacheBackend + ?Sized> CatalogReader<B> {
    pub fn new(cache: CacheAside<B>) -> Self {
        Self {
            categories: cache.clone().with_ttl(CATEGORIES_TTL),
            episodes: cache.clone().with_ttl(EPISODES_TTL),
            default: cache,
        }
    }

    pub async fn get_user(&self, store: &CatalogStore, user_id: i64) -> Result<Option<User>> {
        self.default
            .try_call(
                "get_user",
                store,
                &CallArgs::new().kwarg("user_id", user_id),
                |store| async move { store.user(user_id) },
            )
            .await
    }

    pub async fn get_all_users(&self, store: &CatalogStore) -> Result<Vec<User>> {
        self.default
            .try_call("get_all_users", store, &CallArgs::new(), |store| async move {
                store.users()
            })
            .await
    }

    pub async fn get_all_categories(&self, store: &CatalogStore) -> Result<Vec<Category>> {
        self.categories
            .try_call(
                "get_all_categories",
                store,
                &CallArgs::new(),
                |store| async move { store.categories() },
            )
            .await
    }

    pub async fn get_category(
        &self,
        store: &CatalogStore,
        category_id: i64,
    ) -> Result<Option<Category>> {
        self.default
            .try_call(
                "get_category",
                store,
                &CallArgs::new().kwarg("category_id", category_id),
                |store| async move { store.category(category_id) },
            )
            .await
    }

    pub async fn get_episode(
        &self,
        store: &CatalogStore,
        episode_id: i64,
    ) -> Result<Option<Episode>> {
        self.default
            .try_call(
                "get_episode",
                store,
                &CallArgs::new().kwarg("episode_id", episode_id),
                |store| async move { store.episode(episode_id) },
            )
            .await
    }

    pub async fn get_episodes(
        &self,
        store: &CatalogStore,
        query: &EpisodeQuery,
    ) -> Result<Vec<Episode>> {
        self.episodes
            .try_call("get_episodes", store, &query.call_args(), |store| async move {
                store.episodes(query)
            })
            .await
    }

    pub async fn get_album(&self, store: &CatalogStore, album_id: i64) -> Result<Option<Album>> {
        self.default
            .try_call(
                "get_album",
                store,
                &CallArgs::new().kwarg("album_id", album_id),
                |store| async move { store.album(album_id) },
            )
            .await
    }

    pub async fn get_all_albums(&self, store: &CatalogStore) -> Result<Vec<Album>> {
        self.default
            .try_call("get_all_albums", store, &CallArgs::new(), |store| async move {
                store.albums()
            })
            .await
    }

    pub async fn get_episode_ids_by_album_id(
        &self,
        store: &CatalogStore,
        album_id: i64,
    ) -> Result<Vec<i64>> {
        self.default
            .try_call(
                "get_episode_ids_by_album_id",
                store,
                &CallArgs::new().kwarg("album_id", album_id),
                |store| async move { store.episode_ids_by_album_id(album_id) },
            )
            .await
    }

    pub async fn get_category_id_by_episode_id(
        &self,
        store: &CatalogStore,
        episode_id: i64,
    ) -> Result<Option<i64>> {
        self.default
            .try_call(
                "get_category_id_by_episode_id",
                store,
                &CallArgs::new().kwarg("episode_id", episode_id),
                |store| async move { store.category_id_by_episode_id(episode_id) },
            )
            .await
    }

    pub async fn get_user_ids_by_episode_id(
        &self,
        store: &CatalogStore,
        episode_id: i64,
    ) -> Result<Vec<i64>> {
        self.default
            .try_call(
                "get_user_ids_by_episode_id",
                store,
                &CallArgs::new().kwarg("episode_id", episode_id),
                |store| async move { store.user_ids_by_episode_id(episode_id) },
            )
            .await
    }

    /// Drop the cached user, category and album lists after an import.
    ///
    /// Episode listings are left to expire on their own TTL since their keys
    /// depend on every filter combination.
    pub async fn invalidate_listings(&self) {
        for function in ["get_all_users", "get_all_categories", "get_all_albums"] {
            if let Err(e) = self.default.invalidate(function, &CallArgs::new()).await {
                warn!("Failed to invalidate {}: {}", function, e);
            }
        }
    }
}

impl<B: CacheBackend + ?Sized> Clone for CatalogReader<B> {
    fn clone(&self) -> Self {
        Self {
            default: self.default.clone(),
            categories: self.categories.clone(),
            episodes: self.episodes.clone(),
        }
    }
}
