use serde::Deserialize;

/// Query string of `GET /episodes`.
///
/// Values are kept as text so a malformed number is reported against its
/// field by [`crate::validation::EpisodeQueryFactory`].
#[derive(Debug, Default, Deserialize)]
pub struct EpisodesParams {
    pub user_id: Option<String>,
    pub category_id: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    #[serde(alias = "sort_field_str")]
    pub sort_field: Option<String>,
    pub asc: Option<String>,
}

/// Query string of `GET /events`, each value a comma-separated list.
#[derive(Debug, Default, Deserialize)]
pub struct EventParams {
    pub backend: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
}
