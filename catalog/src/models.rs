use chrono::{DateTime, FixedOffset};
use memo::CallArgs;
use serde::{Deserialize, Serialize};
use shared::Error;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub nickname: String,
    pub thumb: Option<String>,
    pub followers_count: i64,
    pub followees_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub desc: String,
    pub logo: String,
    pub background: String,
    pub subscriptions_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub title: String,
    pub desc: String,
    pub excerpt: String,
    pub thumb: String,
    pub cover: String,
    pub comments_count: i64,
    pub likes_count: i64,
    pub bookmarks_count: i64,
    /// In seconds.
    pub duration: i64,
    pub is_free: bool,
    pub published_at: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub author: String,
    pub cover: String,
    pub published_at: String,
    pub radios_count: i64,
}

/// Host (dj) of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeUser {
    pub episode_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeCategory {
    pub episode_id: i64,
    pub category_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeAlbum {
    pub episode_id: i64,
    pub album_id: i64,
}

/// Episode columns the listing can be ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Id,
    Title,
    CommentsCount,
    LikesCount,
    BookmarksCount,
    Duration,
    #[default]
    PublishedAt,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::Title => "title",
            SortField::CommentsCount => "comments_count",
            SortField::LikesCount => "likes_count",
            SortField::BookmarksCount => "bookmarks_count",
            SortField::Duration => "duration",
            SortField::PublishedAt => "published_at",
        }
    }

    pub(crate) fn compare(&self, a: &Episode, b: &Episode) -> std::cmp::Ordering {
        let ordering = match self {
            SortField::Id => a.id.cmp(&b.id),
            SortField::Title => a.title.cmp(&b.title),
            SortField::CommentsCount => a.comments_count.cmp(&b.comments_count),
            SortField::LikesCount => a.likes_count.cmp(&b.likes_count),
            SortField::BookmarksCount => a.bookmarks_count.cmp(&b.bookmarks_count),
            SortField::Duration => a.duration.cmp(&b.duration),
            SortField::PublishedAt => a.published_at.cmp(&b.published_at),
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    }
}

impl FromStr for SortField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(SortField::Id),
            "title" => Ok(SortField::Title),
            "comments_count" => Ok(SortField::CommentsCount),
            "likes_count" => Ok(SortField::LikesCount),
            "bookmarks_count" => Ok(SortField::BookmarksCount),
            "duration" => Ok(SortField::Duration),
            "published_at" => Ok(SortField::PublishedAt),
            other => Err(Error::InvalidInput(format!("unknown sort field '{}'", other))),
        }
    }
}

/// Filter, order and page of an episode listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeQuery {
    pub user_id: Option<i64>,
    pub category_id: Option<i64>,
    pub sort_field: SortField,
    pub asc: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Default for EpisodeQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            category_id: None,
            sort_field: SortField::PublishedAt,
            asc: false,
            limit: 10,
            offset: 0,
        }
    }
}

impl EpisodeQuery {
    /// Arguments that identify this listing in the cache.
    pub fn call_args(&self) -> CallArgs {
        CallArgs::new()
            .kwarg("user_id", self.user_id)
            .kwarg("category_id", self.category_id)
            .kwarg("sort_field", self.sort_field.as_str())
            .kwarg("asc", self.asc)
            .kwarg("limit", self.limit)
            .kwarg("offset", self.offset)
    }
}
