//! Podcast catalog: sled-backed tables, cached reads, dump import and the
//! upstream crawler.

pub mod crawler;
pub mod import;
pub mod models;
pub mod reader;
pub mod sled_store;

pub use crawler::Crawler;
pub use import::{ImportSummary, import_json, import_json_lines, import_path};
pub use models::{
    Album, Category, Episode, EpisodeAlbum, EpisodeCategory, EpisodeQuery, EpisodeUser, SortField,
    User,
};
pub use reader::{CATEGORIES_TTL, CatalogReader, EPISODES_TTL};
pub use sled_store::CatalogStore;
