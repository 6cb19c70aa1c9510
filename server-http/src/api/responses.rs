use catalog::{Album, Episode};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// An episode with its hosts and category.
#[derive(Debug, Serialize)]
pub struct EpisodeDetailResponse {
    #[serde(flatten)]
    pub episode: Episode,
    pub user_ids: Vec<i64>,
    pub category_id: Option<i64>,
}

/// An album with the ids of the episodes published in it.
#[derive(Debug, Serialize)]
pub struct AlbumDetailResponse {
    #[serde(flatten)]
    pub album: Album,
    pub episode_ids: Vec<i64>,
}

// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            field: None,
        }
    }

    pub fn for_field(error: impl Into<String>, field: &str) -> Self {
        Self {
            error: error.into(),
            field: Some(field.to_string()),
        }
    }
}
