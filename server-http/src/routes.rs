use crate::handlers;
use crate::state::AppState;
use axum::{Router, http::HeaderValue, routing::get};
use tower::Layer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Build and configure the application router
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // SSE Events endpoint
        .route("/events", get(handlers::stream_events))
        // Catalog routes
        .route("/episodes", get(handlers::list_episodes))
        .route("/episodes/{id}", get(handlers::get_episode))
        .route("/users", get(handlers::list_users))
        .route("/users/{id}", get(handlers::get_user))
        .route("/categories", get(handlers::list_categories))
        .route("/categories/{id}", get(handlers::get_category))
        .route("/albums", get(handlers::list_albums))
        .route("/albums/{id}", get(handlers::get_album))
        // Middleware
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The router with trailing slashes trimmed before routing.
pub fn build_app(state: AppState, allowed_origins: &[String]) -> NormalizePath<Router> {
    NormalizePathLayer::trim_trailing_slash().layer(build_router(state, allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
}
