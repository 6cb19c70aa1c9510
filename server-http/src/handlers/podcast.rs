use crate::api::requests::EpisodesParams;
use crate::api::responses::{AlbumDetailResponse, EpisodeDetailResponse, ErrorResponse};
use crate::state::AppState;
use crate::validation::{EpisodeQueryFactory, ValidationError};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use catalog::{Album, Category, Episode, User};
use std::cmp::Reverse;
use tracing::{error, info};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal(e: shared::Error) -> ApiError {
    error!("Catalog read failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("internal error")),
    )
}

fn invalid(e: ValidationError) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::for_field(e.to_string(), e.field())),
    )
}

fn bad_query(rejection: QueryRejection) -> ApiError {
    (
        rejection.status(),
        Json(ErrorResponse::new(rejection.body_text())),
    )
}

fn bad_id(rejection: PathRejection) -> ApiError {
    (
        rejection.status(),
        Json(ErrorResponse::for_field(rejection.body_text(), "id")),
    )
}

fn not_found(what: &str, id: i64) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(format!("{} {} not found", what, id))),
    )
}

/// GET /episodes
pub async fn list_episodes(
    State(state): State<AppState>,
    params: Result<Query<EpisodesParams>, QueryRejection>,
) -> Result<Json<Vec<Episode>>, ApiError> {
    let Query(params) = params.map_err(bad_query)?;
    let query = EpisodeQueryFactory::from_params(params).map_err(invalid)?;
    info!("LIST episodes: {:?}", query);

    let episodes = state
        .reader
        .get_episodes(&state.store, &query)
        .await
        .map_err(internal)?;

    Ok(Json(episodes))
}

/// GET /episodes/{id}
pub async fn get_episode(
    State(state): State<AppState>,
    episode_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<EpisodeDetailResponse>, ApiError> {
    let Path(episode_id) = episode_id.map_err(bad_id)?;
    let episode = state
        .reader
        .get_episode(&state.store, episode_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("episode", episode_id))?;

    let user_ids = state
        .reader
        .get_user_ids_by_episode_id(&state.store, episode_id)
        .await
        .map_err(internal)?;
    let category_id = state
        .reader
        .get_category_id_by_episode_id(&state.store, episode_id)
        .await
        .map_err(internal)?;

    Ok(Json(EpisodeDetailResponse {
        episode,
        user_ids,
        category_id,
    }))
}

/// GET /users
///
/// Featured users only (all users when none are configured), most followed first.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let mut users = state
        .reader
        .get_all_users(&state.store)
        .await
        .map_err(internal)?;

    if !state.featured_users.is_empty() {
        users.retain(|user| state.featured_users.contains(&user.id));
    }
    users.sort_by_key(|user| Reverse(user.followers_count));

    Ok(Json(users))
}

/// GET /users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<User>, ApiError> {
    let Path(user_id) = user_id.map_err(bad_id)?;
    state
        .reader
        .get_user(&state.store, user_id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found("user", user_id))
}

/// GET /categories
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<Category>>, ApiError> {
    let mut categories = state
        .reader
        .get_all_categories(&state.store)
        .await
        .map_err(internal)?;

    categories.sort_by_key(|category| Reverse(category.subscriptions_count));

    Ok(Json(categories))
}

/// GET /categories/{id}
pub async fn get_category(
    State(state): State<AppState>,
    category_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Category>, ApiError> {
    let Path(category_id) = category_id.map_err(bad_id)?;
    state
        .reader
        .get_category(&state.store, category_id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found("category", category_id))
}

/// GET /albums
///
/// Newest first.
pub async fn list_albums(State(state): State<AppState>) -> Result<Json<Vec<Album>>, ApiError> {
    let mut albums = state
        .reader
        .get_all_albums(&state.store)
        .await
        .map_err(internal)?;

    albums.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(a.id.cmp(&b.id)));

    Ok(Json(albums))
}

/// GET /albums/{id}
pub async fn get_album(
    State(state): State<AppState>,
    album_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<AlbumDetailResponse>, ApiError> {
    let Path(album_id) = album_id.map_err(bad_id)?;
    let album = state
        .reader
        .get_album(&state.store, album_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("album", album_id))?;

    let episode_ids = state
        .reader
        .get_episode_ids_by_album_id(&state.store, album_id)
        .await
        .map_err(internal)?;

    Ok(Json(AlbumDetailResponse { album, episode_ids }))
}
