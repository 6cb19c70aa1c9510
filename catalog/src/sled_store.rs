use crate::models::{
    Album, Category, Episode, EpisodeAlbum, EpisodeCategory, EpisodeQuery, EpisodeUser, User,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Error, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

const SIGN_BIT: u64 = 1 << 63;

/// Big-endian with the sign bit flipped, so sled's byte order matches id order.
fn id_key(id: i64) -> [u8; 8] {
    ((id as u64) ^ SIGN_BIT).to_be_bytes()
}

fn decode_id(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("Malformed id key of {} bytes", bytes.len())))?;
    Ok((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64)
}

fn pair_key(left: i64, right: i64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&id_key(left));
    key[8..].copy_from_slice(&id_key(right));
    key
}

/// Sled-backed catalog of podcast users, categories, episodes and albums.
///
/// Each table is its own tree keyed by id. The episode/user,
/// episode/category and episode/album links are kept in both directions so
/// either side can be scanned by prefix. Every insert is "do nothing on conflict".
#[derive(Clone)]
pub struct CatalogStore {
    db: sled::Db,
    users: sled::Tree,
    categories: sled::Tree,
    episodes: sled::Tree,
    albums: sled::Tree,
    episode_users: sled::Tree,
    user_episodes: sled::Tree,
    episode_categories: sled::Tree,
    category_episodes: sled::Tree,
    episode_albums: sled::Tree,
    album_episodes: sled::Tree,
}

impl CatalogStore {
    /// Open (or create) the catalog at `path`
    /// Creates the parent directory if it doesn't exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open Sled database: {}", e)))?;

        let tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| Error::Storage(format!("Failed to open tree {}: {}", name, e)))
        };

        Ok(Self {
            users: tree("users")?,
            categories: tree("categories")?,
            episodes: tree("episodes")?,
            albums: tree("albums")?,
            episode_users: tree("episode_users")?,
            user_episodes: tree("user_episodes")?,
            episode_categories: tree("episode_categories")?,
            category_episodes: tree("category_episodes")?,
            episode_albums: tree("episode_albums")?,
            album_episodes: tree("album_episodes")?,
            db,
        })
    }

    /// Insert a user unless one with the same id exists. Returns whether it was inserted.
    pub fn insert_user(&self, user: &User) -> Result<bool> {
        let inserted = Self::insert_if_absent(&self.users, user.id, user)?;
        self.flush()?;
        Ok(inserted)
    }

    pub fn insert_category(&self, category: &Category) -> Result<bool> {
        let inserted = Self::insert_if_absent(&self.categories, category.id, category)?;
        self.flush()?;
        Ok(inserted)
    }

    /// Link an episode to its category unless the pair is already linked.
    pub fn insert_episode_category(&self, link: EpisodeCategory) -> Result<bool> {
        let inserted = self.link_episode_category(link)?;
        self.flush()?;
        Ok(inserted)
    }

    pub fn batch_insert_episodes(&self, episodes: &[Episode]) -> Result<usize> {
        self.batch(episodes, |episode| {
            Self::insert_if_absent(&self.episodes, episode.id, episode)
        })
    }

    pub fn batch_insert_users(&self, users: &[User]) -> Result<usize> {
        self.batch(users, |user| Self::insert_if_absent(&self.users, user.id, user))
    }

    pub fn batch_insert_categories(&self, categories: &[Category]) -> Result<usize> {
        self.batch(categories, |category| {
            Self::insert_if_absent(&self.categories, category.id, category)
        })
    }

    pub fn batch_insert_albums(&self, albums: &[Album]) -> Result<usize> {
        self.batch(albums, |album| Self::insert_if_absent(&self.albums, album.id, album))
    }

    pub fn batch_insert_episode_users(&self, links: &[EpisodeUser]) -> Result<usize> {
        self.batch(links, |link| {
            Self::insert_link(
                &self.episode_users,
                &self.user_episodes,
                link.episode_id,
                link.user_id,
            )
        })
    }

    pub fn batch_insert_episode_categories(&self, links: &[EpisodeCategory]) -> Result<usize> {
        self.batch(links, |link| self.link_episode_category(*link))
    }

    pub fn batch_insert_episode_albums(&self, links: &[EpisodeAlbum]) -> Result<usize> {
        self.batch(links, |link| {
            Self::insert_link(
                &self.episode_albums,
                &self.album_episodes,
                link.episode_id,
                link.album_id,
            )
        })
    }

    pub fn user(&self, user_id: i64) -> Result<Option<User>> {
        Self::get(&self.users, user_id)
    }

    /// All users in id order.
    pub fn users(&self) -> Result<Vec<User>> {
        Self::load_all(&self.users)
    }

    pub fn category(&self, category_id: i64) -> Result<Option<Category>> {
        Self::get(&self.categories, category_id)
    }

    pub fn categories(&self) -> Result<Vec<Category>> {
        Self::load_all(&self.categories)
    }

    pub fn episode(&self, episode_id: i64) -> Result<Option<Episode>> {
        Self::get(&self.episodes, episode_id)
    }

    pub fn album(&self, album_id: i64) -> Result<Option<Album>> {
        Self::get(&self.albums, album_id)
    }

    /// All albums in id order.
    pub fn albums(&self) -> Result<Vec<Album>> {
        Self::load_all(&self.albums)
    }

    /// Filter by host and/or category, order, then page.
    pub fn episodes(&self, query: &EpisodeQuery) -> Result<Vec<Episode>> {
        let mut candidates: Option<BTreeSet<i64>> = None;

        if let Some(user_id) = query.user_id {
            candidates = Some(Self::linked_ids(&self.user_episodes, user_id)?);
        }

        if let Some(category_id) = query.category_id {
            let in_category = Self::linked_ids(&self.category_episodes, category_id)?;
            candidates = Some(match candidates {
                Some(ids) => ids.intersection(&in_category).copied().collect(),
                None => in_category,
            });
        }

        let mut episodes = match candidates {
            Some(ids) => {
                let mut found = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(episode) = self.episode(id)? {
                        found.push(episode);
                    }
                }
                found
            }
            None => Self::load_all(&self.episodes)?,
        };

        episodes.sort_by(|a, b| {
            let ordering = query.sort_field.compare(a, b);
            if query.asc { ordering } else { ordering.reverse() }
        });

        Ok(episodes
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    /// First category linked to the episode, if any.
    pub fn category_id_by_episode_id(&self, episode_id: i64) -> Result<Option<i64>> {
        Ok(Self::linked_ids(&self.episode_categories, episode_id)?
            .into_iter()
            .next())
    }

    pub fn user_ids_by_episode_id(&self, episode_id: i64) -> Result<Vec<i64>> {
        Ok(Self::linked_ids(&self.episode_users, episode_id)?
            .into_iter()
            .collect())
    }

    pub fn episode_ids_by_album_id(&self, album_id: i64) -> Result<Vec<i64>> {
        Ok(Self::linked_ids(&self.album_episodes, album_id)?
            .into_iter()
            .collect())
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| Error::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }

    fn link_episode_category(&self, link: EpisodeCategory) -> Result<bool> {
        Self::insert_link(
            &self.episode_categories,
            &self.category_episodes,
            link.episode_id,
            link.category_id,
        )
    }

    fn batch<T>(&self, items: &[T], insert: impl Fn(&T) -> Result<bool>) -> Result<usize> {
        let mut inserted = 0;
        for item in items {
            if insert(item)? {
                inserted += 1;
            }
        }
        self.flush()?;
        debug!("Inserted {} of {} rows", inserted, items.len());
        Ok(inserted)
    }

    fn insert_if_absent<T: Serialize>(tree: &sled::Tree, id: i64, value: &T) -> Result<bool> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| Error::Serialization(format!("Failed to serialize row {}: {}", id, e)))?;

        let swapped = tree
            .compare_and_swap(id_key(id), None::<&[u8]>, Some(bytes))
            .map_err(|e| Error::Storage(format!("Failed to insert row {}: {}", id, e)))?;

        Ok(swapped.is_ok())
    }

    fn insert_link(
        forward: &sled::Tree,
        reverse: &sled::Tree,
        left: i64,
        right: i64,
    ) -> Result<bool> {
        let swapped = forward
            .compare_and_swap(pair_key(left, right), None::<&[u8]>, Some(Vec::<u8>::new()))
            .map_err(|e| Error::Storage(format!("Failed to insert link: {}", e)))?;

        if swapped.is_err() {
            return Ok(false);
        }

        reverse
            .insert(pair_key(right, left), Vec::<u8>::new())
            .map_err(|e| Error::Storage(format!("Failed to insert link: {}", e)))?;

        Ok(true)
    }

    fn linked_ids(tree: &sled::Tree, left: i64) -> Result<BTreeSet<i64>> {
        let mut ids = BTreeSet::new();

        for result in tree.scan_prefix(id_key(left)) {
            let (key, _) =
                result.map_err(|e| Error::Storage(format!("Failed to scan links: {}", e)))?;
            ids.insert(decode_id(&key[8..])?);
        }

        Ok(ids)
    }

    fn get<T: DeserializeOwned>(tree: &sled::Tree, id: i64) -> Result<Option<T>> {
        let value = tree
            .get(id_key(id))
            .map_err(|e| Error::Storage(format!("Failed to get row {}: {}", id, e)))?;

        match value {
            Some(bytes) => {
                let row = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Serialization(format!("Failed to deserialize row {}: {}", id, e))
                })?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn load_all<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>> {
        let mut rows = Vec::new();

        for result in tree.iter() {
            let (_, value) = result
                .map_err(|e| Error::Storage(format!("Failed to iterate database: {}", e)))?;

            let row = serde_json::from_slice(&value)
                .map_err(|e| Error::Serialization(format!("Failed to deserialize row: {}", e)))?;

            rows.push(row);
        }

        Ok(rows)
    }
}

impl std::fmt::Debug for CatalogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogStore")
            .field("users", &self.users.len())
            .field("categories", &self.categories.len())
            .field("episodes", &self.episodes.len())
            .field("albums", &self.albums.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::SortField;
    use chrono::DateTime;

    pub(crate) fn user(id: i64, nickname: &str, followers: i64) -> User {
        User {
            id,
            nickname: nickname.to_string(),
            thumb: None,
            followers_count: followers,
            followees_count: 0,
        }
    }

    pub(crate) fn category(id: i64, name: &str, subscriptions: i64) -> Category {
        Category {
            id,
            name: name.to_string(),
            desc: String::new(),
            logo: String::new(),
            background: String::new(),
            subscriptions_count: subscriptions,
        }
    }

    pub(crate) fn episode(id: i64, title: &str, likes: i64, published_at: &str) -> Episode {
        Episode {
            id,
            title: title.to_string(),
            desc: String::new(),
            excerpt: String::new(),
            thumb: String::new(),
            cover: String::new(),
            comments_count: 0,
            likes_count: likes,
            bookmarks_count: 0,
            duration: 1800,
            is_free: true,
            published_at: DateTime::parse_from_rfc3339(published_at).unwrap(),
        }
    }

    /// Three episodes: 1 and 2 hosted by user 10, 2 and 3 in category 7.
    pub(crate) fn seeded_store(dir: &tempfile::TempDir) -> CatalogStore {
        let store = CatalogStore::open(dir.path().join("catalog.sled")).unwrap();

        store
            .batch_insert_users(&[user(10, "Nadya", 500), user(11, "Kevin", 900)])
            .unwrap();
        store.insert_category(&category(7, "Comedy", 40)).unwrap();
        store
            .batch_insert_episodes(&[
                episode(1, "Pilot", 5, "2023-01-01T08:00:00+07:00"),
                episode(2, "Second", 50, "2023-02-01T08:00:00+07:00"),
                episode(3, "Third", 20, "2023-03-01T08:00:00+07:00"),
            ])
            .unwrap();
        store
            .batch_insert_episode_users(&[
                EpisodeUser { episode_id: 1, user_id: 10 },
                EpisodeUser { episode_id: 2, user_id: 10 },
                EpisodeUser { episode_id: 3, user_id: 11 },
            ])
            .unwrap();
        store
            .batch_insert_episode_categories(&[
                EpisodeCategory { episode_id: 2, category_id: 7 },
                EpisodeCategory { episode_id: 3, category_id: 7 },
            ])
            .unwrap();

        store
    }

    #[test]
    fn test_id_keys_preserve_order() {
        let mut keys = vec![id_key(5), id_key(-3), id_key(0), id_key(i64::MAX), id_key(i64::MIN)];
        keys.sort();
        let decoded: Vec<i64> = keys.iter().map(|k| decode_id(k).unwrap()).collect();
        assert_eq!(decoded, vec![i64::MIN, -3, 0, 5, i64::MAX]);
    }

    #[test]
    fn test_insert_user_is_noop_when_present() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(temp_dir.path().join("catalog.sled")).unwrap();

        assert!(store.insert_user(&user(1, "first", 1)).unwrap());
        assert!(!store.insert_user(&user(1, "second", 2)).unwrap());

        assert_eq!(store.user(1).unwrap().unwrap().nickname, "first");
        assert_eq!(store.user(2).unwrap(), None);
    }

    #[test]
    fn test_batch_inserts_skip_conflicts() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&temp_dir);

        let inserted = store
            .batch_insert_users(&[user(10, "dup", 0), user(12, "new", 0)])
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.users().unwrap().len(), 3);

        let links = store
            .batch_insert_episode_users(&[EpisodeUser { episode_id: 1, user_id: 10 }])
            .unwrap();
        assert_eq!(links, 0);

        assert!(!store
            .insert_episode_category(EpisodeCategory { episode_id: 2, category_id: 7 })
            .unwrap());
    }

    #[test]
    fn test_link_lookups() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&temp_dir);

        assert_eq!(store.user_ids_by_episode_id(1).unwrap(), vec![10]);
        assert_eq!(store.category_id_by_episode_id(3).unwrap(), Some(7));
        assert_eq!(store.category_id_by_episode_id(1).unwrap(), None);
    }

    #[test]
    fn test_album_links_both_directions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&temp_dir);

        let links = [
            EpisodeAlbum { episode_id: 3, album_id: 12 },
            EpisodeAlbum { episode_id: 1, album_id: 12 },
            EpisodeAlbum { episode_id: 1, album_id: 12 },
        ];
        assert_eq!(store.batch_insert_episode_albums(&links).unwrap(), 2);

        assert_eq!(store.episode_ids_by_album_id(12).unwrap(), vec![1, 3]);
        assert!(store.episode_ids_by_album_id(13).unwrap().is_empty());
    }

    #[test]
    fn test_episodes_default_order_is_newest_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&temp_dir);

        let ids: Vec<i64> = store
            .episodes(&EpisodeQuery::default())
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_episodes_filter_sort_and_page() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&temp_dir);

        let by_user = store
            .episodes(&EpisodeQuery {
                user_id: Some(10),
                sort_field: SortField::LikesCount,
                asc: true,
                ..EpisodeQuery::default()
            })
            .unwrap();
        assert_eq!(by_user.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);

        let both = store
            .episodes(&EpisodeQuery {
                user_id: Some(10),
                category_id: Some(7),
                ..EpisodeQuery::default()
            })
            .unwrap();
        assert_eq!(both.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2]);

        let paged = store
            .episodes(&EpisodeQuery {
                limit: 1,
                offset: 1,
                ..EpisodeQuery::default()
            })
            .unwrap();
        assert_eq!(paged.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2]);

        let unknown = store
            .episodes(&EpisodeQuery {
                user_id: Some(999),
                ..EpisodeQuery::default()
            })
            .unwrap();
        assert!(unknown.is_empty());
    }
}
