//! Loads platform JSON:API dumps into a [`CatalogStore`].
//!
//! Accepted shapes, per file or per line:
//! - a document `{"data": [...], "included": [...]}` (`data` may be a single
//!   resource, `included` may be keyed by id),
//! - a bare array of resources,
//! - a single resource,
//! - an object of resources keyed by id.
//!
//! Resources are dispatched on `type`: `radios` become episodes (with their
//! `djs`, `category` and `albums` relationships), `users`, `categories` and `albums`
//! map to their rows. Other types are ignored. A resource that cannot be
//! converted is logged and skipped; the rest of the file still loads.

use crate::models::{
    Album, Category, Episode, EpisodeAlbum, EpisodeCategory, EpisodeUser, User,
};
use crate::sled_store::CatalogStore;
use chrono::DateTime;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use shared::{Error, Result};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::path::Path;
use tracing::{debug, info, warn};

/// Rows actually inserted; rows that already existed are not counted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub episodes: usize,
    pub users: usize,
    pub categories: usize,
    pub albums: usize,
    pub episode_users: usize,
    pub episode_categories: usize,
    pub episode_albums: usize,
    pub skipped: usize,
}

impl AddAssign for ImportSummary {
    fn add_assign(&mut self, other: Self) {
        self.episodes += other.episodes;
        self.users += other.users;
        self.categories += other.categories;
        self.albums += other.albums;
        self.episode_users += other.episode_users;
        self.episode_categories += other.episode_categories;
        self.episode_albums += other.episode_albums;
        self.skipped += other.skipped;
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum ResourceId {
    Text(String),
    Number(i64),
}

impl ResourceId {
    pub(crate) fn parse(&self) -> Result<i64> {
        match self {
            ResourceId::Number(id) => Ok(*id),
            ResourceId::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| Error::Serialization(format!("non-numeric id '{}'", text))),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize)]
struct Linkage {
    id: ResourceId,
}

#[derive(Deserialize, Default)]
struct Relation {
    #[serde(default)]
    data: Option<OneOrMany<Linkage>>,
}

#[derive(Deserialize, Default)]
struct Relationships {
    #[serde(default)]
    category: Option<Relation>,
    #[serde(default)]
    djs: Option<Relation>,
    #[serde(default)]
    albums: Option<Relation>,
}

#[derive(Deserialize)]
pub(crate) struct Resource {
    pub(crate) id: ResourceId,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    attributes: serde_json::Value,
    #[serde(default)]
    relationships: Relationships,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum Included {
    List(Vec<Resource>),
    ById(BTreeMap<String, Resource>),
}

impl Default for Included {
    fn default() -> Self {
        Included::List(Vec::new())
    }
}

/// A JSON:API document, as served by the platform API.
#[derive(Deserialize)]
pub(crate) struct Document {
    pub(crate) data: OneOrMany<Resource>,
    #[serde(default)]
    pub(crate) included: Included,
}

impl Document {
    /// Number of primary resources, not counting included ones.
    pub(crate) fn primary_count(&self) -> usize {
        match &self.data {
            OneOrMany::Many(items) => items.len(),
            OneOrMany::One(_) => 1,
        }
    }

    /// Primary data first, then included resources.
    pub(crate) fn into_resources(self) -> Vec<Resource> {
        let mut resources = self.data.into_vec();
        match self.included {
            Included::List(items) => resources.extend(items),
            Included::ById(items) => resources.extend(items.into_values()),
        }
        resources
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Document(Document),
    Many(Vec<Resource>),
    One(Box<Resource>),
    ById(BTreeMap<String, Resource>),
}

impl Payload {
    fn into_resources(self) -> Vec<Resource> {
        match self {
            Payload::Document(document) => document.into_resources(),
            Payload::Many(resources) => resources,
            Payload::One(resource) => vec![*resource],
            Payload::ById(resources) => resources.into_values().collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RadioAttributes {
    title: Option<String>,
    desc: Option<String>,
    excerpt: Option<String>,
    thumb: Option<String>,
    cover: Option<String>,
    comments_count: Option<i64>,
    likes_count: Option<i64>,
    bookmarks_count: Option<i64>,
    duration: Option<i64>,
    is_free: Option<bool>,
    published_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserAttributes {
    nickname: Option<String>,
    thumb: Option<String>,
    followers_count: Option<i64>,
    followees_count: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CategoryAttributes {
    name: Option<String>,
    desc: Option<String>,
    logo: Option<String>,
    background: Option<String>,
    subscriptions_count: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AlbumAttributes {
    title: Option<String>,
    description: Option<String>,
    author: Option<String>,
    cover: Option<String>,
    published_at: Option<String>,
    radios_count: Option<i64>,
}

fn linked(relation: &Option<Relation>) -> Vec<&Linkage> {
    match relation.as_ref().and_then(|r| r.data.as_ref()) {
        Some(OneOrMany::Many(items)) => items.iter().collect(),
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    }
}

fn attributes<T: DeserializeOwned>(resource: &Resource) -> Result<T> {
    T::deserialize(&resource.attributes)
        .map_err(|e| Error::Serialization(format!("bad {} attributes: {}", resource.kind, e)))
}

/// Rows collected from resources, written in one go.
#[derive(Default)]
pub(crate) struct Batch {
    episodes: Vec<Episode>,
    users: Vec<User>,
    categories: Vec<Category>,
    albums: Vec<Album>,
    episode_users: Vec<EpisodeUser>,
    episode_categories: Vec<EpisodeCategory>,
    episode_albums: Vec<EpisodeAlbum>,
    skipped: usize,
}

impl Batch {
    /// Add every convertible resource; the rest are logged and counted as skipped.
    pub(crate) fn extend(&mut self, resources: &[Resource]) {
        for resource in resources {
            if let Err(e) = self.add(resource) {
                warn!("Skipping {} resource: {}", resource.kind, e);
                self.skipped += 1;
            }
        }
    }

    pub(crate) fn link_album(&mut self, album_id: i64, episode_ids: impl IntoIterator<Item = i64>) {
        self.episode_albums
            .extend(episode_ids.into_iter().map(|episode_id| EpisodeAlbum {
                episode_id,
                album_id,
            }));
    }

    fn add(&mut self, resource: &Resource) -> Result<()> {
        let id = resource.id.parse()?;

        match resource.kind.as_str() {
            "radios" => self.add_radio(id, resource),
            "users" => {
                let attrs: UserAttributes = attributes(resource)?;
                self.users.push(User {
                    id,
                    nickname: attrs.nickname.unwrap_or_default(),
                    thumb: attrs.thumb,
                    followers_count: attrs.followers_count.unwrap_or_default(),
                    followees_count: attrs.followees_count.unwrap_or_default(),
                });
                Ok(())
            }
            "categories" => {
                let attrs: CategoryAttributes = attributes(resource)?;
                self.categories.push(Category {
                    id,
                    name: attrs.name.unwrap_or_default(),
                    desc: attrs.desc.unwrap_or_default(),
                    logo: attrs.logo.unwrap_or_default(),
                    background: attrs.background.unwrap_or_default(),
                    subscriptions_count: attrs.subscriptions_count.unwrap_or_default(),
                });
                Ok(())
            }
            "albums" => {
                let attrs: AlbumAttributes = attributes(resource)?;
                self.albums.push(Album {
                    id,
                    title: attrs.title.unwrap_or_default(),
                    description: attrs.description.unwrap_or_default(),
                    author: attrs.author.unwrap_or_default(),
                    cover: attrs.cover.unwrap_or_default(),
                    published_at: attrs.published_at.unwrap_or_default(),
                    radios_count: attrs.radios_count.unwrap_or_default(),
                });
                Ok(())
            }
            other => {
                debug!("Ignoring resource {} of type {}", id, other);
                Ok(())
            }
        }
    }

    fn add_radio(&mut self, id: i64, resource: &Resource) -> Result<()> {
        let attrs: RadioAttributes = attributes(resource)?;
        let published_at = attrs
            .published_at
            .as_deref()
            .ok_or_else(|| Error::Serialization("missing published-at".to_string()))
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(raw).map_err(|e| {
                    Error::Serialization(format!("bad published-at '{}': {}", raw, e))
                })
            })?;

        let hosts = linked(&resource.relationships.djs)
            .into_iter()
            .map(|dj| dj.id.parse())
            .collect::<Result<Vec<i64>>>()?;
        let category = linked(&resource.relationships.category)
            .first()
            .map(|category| category.id.parse())
            .transpose()?;
        let albums = linked(&resource.relationships.albums)
            .into_iter()
            .map(|album| album.id.parse())
            .collect::<Result<Vec<i64>>>()?;

        self.episodes.push(Episode {
            id,
            title: attrs.title.unwrap_or_default(),
            desc: attrs.desc.unwrap_or_default(),
            excerpt: attrs.excerpt.unwrap_or_default(),
            thumb: attrs.thumb.unwrap_or_default(),
            cover: attrs.cover.unwrap_or_default(),
            comments_count: attrs.comments_count.unwrap_or_default(),
            likes_count: attrs.likes_count.unwrap_or_default(),
            bookmarks_count: attrs.bookmarks_count.unwrap_or_default(),
            duration: attrs.duration.unwrap_or_default(),
            is_free: attrs.is_free.unwrap_or_default(),
            published_at,
        });

        self.episode_users.extend(hosts.into_iter().map(|user_id| EpisodeUser {
            episode_id: id,
            user_id,
        }));

        if let Some(category_id) = category {
            self.episode_categories.push(EpisodeCategory {
                episode_id: id,
                category_id,
            });
        }

        for album_id in albums {
            self.link_album(album_id, [id]);
        }

        Ok(())
    }

    pub(crate) fn write(self, store: &CatalogStore) -> Result<ImportSummary> {
        Ok(ImportSummary {
            categories: store.batch_insert_categories(&self.categories)?,
            users: store.batch_insert_users(&self.users)?,
            albums: store.batch_insert_albums(&self.albums)?,
            episodes: store.batch_insert_episodes(&self.episodes)?,
            episode_users: store.batch_insert_episode_users(&self.episode_users)?,
            episode_categories: store
                .batch_insert_episode_categories(&self.episode_categories)?,
            episode_albums: store.batch_insert_episode_albums(&self.episode_albums)?,
            skipped: self.skipped,
        })
    }
}

pub(crate) fn import_resources(store: &CatalogStore, resources: Vec<Resource>) -> Result<ImportSummary> {
    let mut batch = Batch::default();
    batch.extend(&resources);
    batch.write(store)
}

fn parse_payload(json: &str) -> Result<Payload> {
    serde_json::from_str(json)
        .map_err(|e| Error::Serialization(format!("Unrecognised import payload: {}", e)))
}

/// Import one JSON document (any of the accepted shapes).
pub fn import_json(store: &CatalogStore, json: &str) -> Result<ImportSummary> {
    import_resources(store, parse_payload(json)?.into_resources())
}

/// Import newline-delimited JSON, one payload per non-empty line.
pub fn import_json_lines(store: &CatalogStore, text: &str) -> Result<ImportSummary> {
    let mut resources = Vec::new();
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        resources.extend(parse_payload(line)?.into_resources());
    }
    import_resources(store, resources)
}

/// Import a file, or every `.json`/`.jsonl`/`.txt` file in a directory in
/// name order. `.jsonl` and `.txt` files are read as JSON lines.
pub fn import_path(store: &CatalogStore, path: impl AsRef<Path>) -> Result<ImportSummary> {
    let path = path.as_ref();

    if !path.is_dir() {
        return import_file(store, path);
    }

    let mut files = Vec::new();
    let entries = std::fs::read_dir(path)
        .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::Storage(format!("Failed to read directory entry: {}", e)))?;
        let file = entry.path();
        let known = matches!(
            file.extension().and_then(|ext| ext.to_str()),
            Some("json" | "jsonl" | "txt")
        );
        if file.is_file() && known {
            files.push(file);
        }
    }
    files.sort();

    let mut summary = ImportSummary::default();
    for file in files {
        summary += import_file(store, &file)?;
    }

    info!("Imported {}: {:?}", path.display(), summary);
    Ok(summary)
}

fn import_file(store: &CatalogStore, path: &Path) -> Result<ImportSummary> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;

    let summary = match path.extension().and_then(|ext| ext.to_str()) {
        Some("jsonl" | "txt") => import_json_lines(store, &text)?,
        _ => import_json(store, &text)?,
    };

    debug!("Imported {}: {:?}", path.display(), summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EpisodeQuery;

    const USER_RADIOS: &str = r#"{
        "data": [
            {
                "id": "154398",
                "type": "radios",
                "attributes": {
                    "title": "Episode one",
                    "desc": null,
                    "excerpt": "short",
                    "thumb": "thumb.jpg",
                    "cover": null,
                    "comments-count": 12,
                    "likes-count": 80,
                    "bookmarks-count": 3,
                    "duration": 4210,
                    "is-free": true,
                    "published-at": "2023-05-01T20:00:00.000+08:00"
                },
                "relationships": {
                    "category": {"data": {"type": "categories", "id": "42"}},
                    "djs": {"data": [{"type": "users", "id": "13701"}, {"type": "users", "id": "3"}]},
                    "albums": {"data": [{"type": "albums", "id": "12"}]}
                }
            },
            {
                "id": "154399",
                "type": "radios",
                "attributes": {
                    "title": "Episode two",
                    "comments-count": 0,
                    "likes-count": 1,
                    "bookmarks-count": 0,
                    "duration": null,
                    "is-free": false,
                    "published-at": "2023-06-01T20:00:00.000+08:00"
                },
                "relationships": {
                    "category": {"data": null},
                    "djs": {"data": [{"type": "users", "id": "13701"}]}
                }
            }
        ],
        "included": [
            {"id": "13701", "type": "users", "attributes": {"nickname": "Nadya", "thumb": null, "followers-count": 5000, "followees-count": 10}},
            {"id": "3", "type": "users", "attributes": {"nickname": "Simon", "thumb": "s.jpg", "followers-count": 9000, "followees-count": 1}},
            {"id": "42", "type": "categories", "attributes": {"name": "Games", "desc": "", "logo": "l.png", "background": "b.png", "subscriptions-count": 77}}
        ]
    }"#;

    fn store(dir: &tempfile::TempDir) -> CatalogStore {
        CatalogStore::open(dir.path().join("catalog.sled")).unwrap()
    }

    #[test]
    fn test_import_document_with_relationships() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir);

        let summary = import_json(&store, USER_RADIOS).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                episodes: 2,
                users: 2,
                categories: 1,
                albums: 0,
                episode_users: 3,
                episode_categories: 1,
                episode_albums: 1,
                skipped: 0,
            }
        );

        let episode = store.episode(154398).unwrap().unwrap();
        assert_eq!(episode.desc, "");
        assert_eq!(episode.cover, "");
        assert_eq!(episode.duration, 4210);
        assert_eq!(store.episode(154399).unwrap().unwrap().duration, 0);

        assert_eq!(store.user_ids_by_episode_id(154398).unwrap(), vec![3, 13701]);
        assert_eq!(store.category_id_by_episode_id(154398).unwrap(), Some(42));
        assert_eq!(store.category_id_by_episode_id(154399).unwrap(), None);
        assert_eq!(store.episode_ids_by_album_id(12).unwrap(), vec![154398]);

        let hosted = store
            .episodes(&EpisodeQuery {
                user_id: Some(13701),
                ..EpisodeQuery::default()
            })
            .unwrap();
        assert_eq!(hosted.iter().map(|e| e.id).collect::<Vec<_>>(), vec![154399, 154398]);
    }

    #[test]
    fn test_reimport_inserts_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir);

        import_json(&store, USER_RADIOS).unwrap();
        assert_eq!(import_json(&store, USER_RADIOS).unwrap(), ImportSummary::default());
    }

    #[test]
    fn test_import_category_lines_and_users_by_id() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir);

        let lines = concat!(
            r#"{"id": "1", "type": "categories", "attributes": {"name": "Talk", "desc": "d", "logo": "", "background": "", "subscriptions-count": 5}}"#,
            "\n\n",
            r#"{"id": "9", "type": "tags", "attributes": {"name": "ignored"}}"#,
            "\n",
        );
        let summary = import_json_lines(&store, lines).unwrap();
        assert_eq!(summary.categories, 1);
        assert_eq!(store.category(1).unwrap().unwrap().name, "Talk");

        let users = r#"{"31418": {"id": "31418", "type": "users", "attributes": {"nickname": "Qing", "thumb": null, "followers-count": 3, "followees-count": 4}}}"#;
        assert_eq!(import_json(&store, users).unwrap().users, 1);
        assert_eq!(store.user(31418).unwrap().unwrap().followees_count, 4);
    }

    #[test]
    fn test_bad_resources_are_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir);

        let radios = r#"[
            {"id": "abc", "type": "users", "attributes": {"nickname": "x"}},
            {"id": "7", "type": "radios", "attributes": {"title": "no date"}},
            {"id": "8", "type": "albums", "attributes": {"title": "Album", "description": null, "radios-count": 4}}
        ]"#;

        let summary = import_json(&store, radios).unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.albums, 1);
        assert_eq!(store.album(8).unwrap().unwrap().radios_count, 4);
    }

    #[test]
    fn test_unrecognised_payload_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir);

        assert!(matches!(
            import_json(&store, "[1, 2, 3]"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_import_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir);
        let dumps = temp_dir.path().join("dumps");
        std::fs::create_dir_all(&dumps).unwrap();
        std::fs::write(dumps.join("radios.json"), USER_RADIOS).unwrap();
        std::fs::write(
            dumps.join("misc.txt"),
            r#"{"id": "2", "type": "categories", "attributes": {"name": "Music", "subscriptions-count": 1}}"#,
        )
        .unwrap();
        std::fs::write(dumps.join("notes.md"), "not json").unwrap();

        let summary = import_path(&store, &dumps).unwrap();
        assert_eq!(summary.categories, 2);
        assert_eq!(summary.episodes, 2);
    }
}
