use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use super::handlers;
use super::AppState;

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
}

/// API routes under /api/v1, all requiring a bearer token
fn api_routes() -> Router<AppState> {
    Router::new()
        // Lists and membership
        .route("/lists", post(handlers::create_list).get(handlers::get_lists))
        .route("/lists/join", post(handlers::join_list))
        .route("/lists/:list_id", delete(handlers::delete_list))
        .route("/lists/:list_id/leave", post(handlers::leave_list))
        // List movies
        .route(
            "/lists/:list_id/movies",
            post(handlers::add_movie).get(handlers::get_movies),
        )
        .route("/lists/:list_id/movies/search", get(handlers::search_movies))
        .route("/lists/:list_id/movies/order", patch(handlers::reorder_movies))
        .route(
            "/lists/:list_id/movies/:movie_id",
            patch(handlers::update_movie).delete(handlers::remove_movie),
        )
        // Comments
        .route(
            "/lists/:list_id/movies/:movie_id/comments",
            post(handlers::create_comment).get(handlers::get_comments),
        )
        .route(
            "/lists/:list_id/movies/:movie_id/comments/:comment_id",
            patch(handlers::update_comment).delete(handlers::delete_comment),
        )
        // Recommendations
        .route(
            "/lists/:list_id/recommendations",
            get(handlers::get_recommendations),
        )
        // External catalog search
        .route("/search", get(handlers::search_catalog))
}
