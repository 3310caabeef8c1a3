use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{
        Comment, ListMovie, ListMovieDetail, MediaType, MemberRole, Movie, MovieList,
        MovieUserData, WatchStatus,
    },
    services::lists::{ListOverview, MovieUpdate},
    services::recommendations::RecommendationItem,
    stores::OverlayChange,
};

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct CreateListRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JoinListRequest {
    pub invite_code: String,
}

#[derive(Debug, Serialize)]
pub struct JoinListResponse {
    pub list: MovieList,
    pub role: MemberRole,
    pub already_member: bool,
    pub member_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListsQuery {
    pub role: Option<MemberRole>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListsResponse {
    pub lists: Vec<ListOverview>,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddMovieRequest {
    pub media_id: i64,
    pub media_type: MediaType,
}

#[derive(Debug, Serialize)]
pub struct MovieEntryResponse {
    #[serde(flatten)]
    pub entry: ListMovie,
    pub movie: Movie,
}

#[derive(Debug, Deserialize)]
pub struct MoviesQuery {
    pub status: Option<WatchStatus>,
}

#[derive(Debug, Deserialize)]
pub struct SearchMoviesQuery {
    pub q: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchMoviesResponse {
    pub movies: Vec<ListMovieDetail>,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub orders: HashMap<i64, i32>,
}

/// PATCH body for a list movie. The double `Option` on `rating`/`notes`
/// distinguishes "field absent" from "field set to null".
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateMovieRequest {
    pub status: Option<WatchStatus>,
    #[serde(deserialize_with = "double_option")]
    pub rating: Option<Option<i32>>,
    #[serde(deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize)]
pub struct UpdateMovieResponse {
    #[serde(flatten)]
    pub entry: ListMovie,
    pub movie: Movie,
    pub previous_status: WatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_user_entry: Option<MovieUserData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_entry: Option<MovieUserData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CommentsResponse {
    pub comments: Vec<Comment>,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogSearchQuery {
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct CatalogSearchHit {
    pub id: i64,
    pub media_type: MediaType,
    pub name: String,
    pub original_name: Option<String>,
    pub poster_path: Option<String>,
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Create a list; the caller becomes its owner
pub async fn create_list(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateListRequest>,
) -> AppResult<(StatusCode, Json<MovieList>)> {
    let list = state
        .lists
        .create_list(&request.name, request.description.as_deref(), user.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(list)))
}

/// Join a list via invite code (idempotent)
pub async fn join_list(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<JoinListRequest>,
) -> AppResult<Json<JoinListResponse>> {
    let outcome = state
        .lists
        .join_by_invite_code(&request.invite_code, user.user_id)
        .await?;
    Ok(Json(JoinListResponse {
        list: outcome.list,
        role: outcome.role,
        already_member: outcome.already_member,
        member_count: outcome.member_count,
    }))
}

/// Lists the caller belongs to, with member/movie counts
pub async fn get_lists(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ListsQuery>,
) -> AppResult<Json<ListsResponse>> {
    let page = state
        .lists
        .list_user_lists(
            user.user_id,
            params.role,
            params.limit.unwrap_or(0),
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(ListsResponse {
        lists: page.items,
        total: page.total,
    }))
}

/// Soft-delete a list (owner only)
pub async fn delete_list(
    State(state): State<AppState>,
    user: AuthUser,
    Path(list_id): Path<i64>,
) -> AppResult<StatusCode> {
    state.lists.delete_list(list_id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Leave a list (participants only; owners must delete instead)
pub async fn leave_list(
    State(state): State<AppState>,
    user: AuthUser,
    Path(list_id): Path<i64>,
) -> AppResult<StatusCode> {
    state.lists.leave_list(list_id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add a catalog title to a list
pub async fn add_movie(
    State(state): State<AppState>,
    user: AuthUser,
    Path(list_id): Path<i64>,
    Json(request): Json<AddMovieRequest>,
) -> AppResult<(StatusCode, Json<MovieEntryResponse>)> {
    let outcome = state
        .lists
        .add_media_to_list(list_id, user.user_id, request.media_id, request.media_type)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(MovieEntryResponse {
            entry: outcome.entry,
            movie: outcome.movie,
        }),
    ))
}

/// List a list's movies with metadata, genres and member overlays
pub async fn get_movies(
    State(state): State<AppState>,
    user: AuthUser,
    Path(list_id): Path<i64>,
    Query(params): Query<MoviesQuery>,
) -> AppResult<Json<Vec<ListMovieDetail>>> {
    let movies = state
        .lists
        .list_movies(list_id, user.user_id, params.status)
        .await?;
    Ok(Json(movies))
}

/// Search within a list by title substring
pub async fn search_movies(
    State(state): State<AppState>,
    user: AuthUser,
    Path(list_id): Path<i64>,
    Query(params): Query<SearchMoviesQuery>,
) -> AppResult<Json<SearchMoviesResponse>> {
    let (movies, total) = state
        .lists
        .search_movies(
            list_id,
            user.user_id,
            &params.q,
            params.limit.unwrap_or(0),
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(SearchMoviesResponse { movies, total }))
}

/// Batch-update display order within a list
pub async fn reorder_movies(
    State(state): State<AppState>,
    user: AuthUser,
    Path(list_id): Path<i64>,
    Json(request): Json<ReorderRequest>,
) -> AppResult<StatusCode> {
    state
        .lists
        .reorder_movies(list_id, user.user_id, request.orders)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Update a list movie's shared status and/or the caller's rating/notes
pub async fn update_movie(
    State(state): State<AppState>,
    user: AuthUser,
    Path((list_id, movie_id)): Path<(i64, i64)>,
    Json(request): Json<UpdateMovieRequest>,
) -> AppResult<Json<UpdateMovieResponse>> {
    let update = MovieUpdate {
        status: request.status,
        overlay: OverlayChange {
            rating: request.rating,
            notes: request.notes,
        },
    };
    let outcome = state
        .lists
        .update_movie(list_id, user.user_id, movie_id, update)
        .await?;
    Ok(Json(UpdateMovieResponse {
        entry: outcome.entry,
        movie: outcome.movie,
        previous_status: outcome.old_status,
        previous_user_entry: outcome.old_entry,
        user_entry: outcome.new_entry,
        average_rating: outcome.average_rating,
    }))
}

/// Remove a movie from a list (any member)
pub async fn remove_movie(
    State(state): State<AppState>,
    user: AuthUser,
    Path((list_id, movie_id)): Path<(i64, i64)>,
) -> AppResult<Json<Movie>> {
    let movie = state
        .lists
        .remove_movie_from_list(list_id, user.user_id, movie_id)
        .await?;
    Ok(Json(movie))
}

/// Comment on a list movie
pub async fn create_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path((list_id, movie_id)): Path<(i64, i64)>,
    Json(request): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let comment = state
        .lists
        .create_comment(list_id, user.user_id, movie_id, &request.content)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// Page through a movie's comments, newest first
pub async fn get_comments(
    State(state): State<AppState>,
    user: AuthUser,
    Path((list_id, movie_id)): Path<(i64, i64)>,
    Query(params): Query<CommentsQuery>,
) -> AppResult<Json<CommentsResponse>> {
    let (comments, total) = state
        .lists
        .get_comments(
            list_id,
            user.user_id,
            movie_id,
            params.limit.unwrap_or(0),
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(CommentsResponse { comments, total }))
}

/// Edit a comment (author only)
pub async fn update_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path((list_id, _movie_id, comment_id)): Path<(i64, i64, i64)>,
    Json(request): Json<CreateCommentRequest>,
) -> AppResult<Json<Comment>> {
    let comment = state
        .lists
        .update_comment(list_id, user.user_id, comment_id, &request.content)
        .await?;
    Ok(Json(comment))
}

/// Delete a comment (author only)
pub async fn delete_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path((list_id, _movie_id, comment_id)): Path<(i64, i64, i64)>,
) -> AppResult<StatusCode> {
    state
        .lists
        .delete_comment(list_id, user.user_id, comment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Scored suggestions based on the list's best-rated titles
pub async fn get_recommendations(
    State(state): State<AppState>,
    user: AuthUser,
    Path(list_id): Path<i64>,
    Query(params): Query<RecommendationsQuery>,
) -> AppResult<Json<Vec<RecommendationItem>>> {
    let items = state
        .recommendations
        .recommend(list_id, user.user_id, params.limit)
        .await?;
    Ok(Json(items))
}

/// Rejects queries too short to be meaningful or long enough to be abusive
/// before anything reaches the upstream catalog.
fn validate_search_query(raw: &str) -> AppResult<String> {
    let query = raw.trim();
    let len = query.chars().count();
    if !(2..=100).contains(&len) {
        return Err(AppError::Validation(
            "search query must be between 2 and 100 characters".to_string(),
        ));
    }
    Ok(query.to_string())
}

/// Search the external catalog for titles to add
pub async fn search_catalog(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(params): Query<CatalogSearchQuery>,
) -> AppResult<Json<Vec<CatalogSearchHit>>> {
    let query = validate_search_query(&params.q)?;
    let hits = state
        .catalog
        .search_multi(query)
        .await?
        .into_iter()
        .map(|r| CatalogSearchHit {
            id: r.id,
            media_type: r.media_type,
            name: r.name,
            original_name: r.original_name,
            poster_path: r.poster_path,
        })
        .collect();
    Ok(Json(hits))
}
