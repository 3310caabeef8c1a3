use std::collections::HashMap;

use crate::{
    error::AppResult,
    models::{
        Comment, Genre, ListMember, ListMovie, ListMovieDetail, MemberRole, MembershipWithList,
        Movie, MovieList, MovieUserData, WatchStatus,
    },
};

#[cfg(test)]
use mockall::automock;

pub mod comments;
pub mod membership;
pub mod movies;

pub use comments::PgCommentStore;
pub use membership::PgMembershipStore;
pub use movies::PgMovieStore;

/// A change to a user's overlay entry. The outer `Option` distinguishes
/// "field not supplied" from "field explicitly cleared".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayChange {
    pub rating: Option<Option<i32>>,
    pub notes: Option<Option<String>>,
}

impl OverlayChange {
    pub fn is_empty(&self) -> bool {
        self.rating.is_none() && self.notes.is_none()
    }
}

/// Persistence for lists, memberships and invite codes.
///
/// Uniqueness of invite codes and of (list, user) pairs is enforced by
/// database constraints; callers resolve races through the constraint path.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait MembershipStore: Send + Sync {
    async fn invite_code_exists(&self, code: String) -> AppResult<bool>;

    /// Inserts the list and its owner membership in one transaction.
    /// A unique-violation on the invite code surfaces as a database error the
    /// caller can detect via [`crate::error::AppError::is_unique_violation`].
    async fn create_with_owner(
        &self,
        name: String,
        description: Option<String>,
        invite_code: String,
        owner_id: i64,
    ) -> AppResult<MovieList>;

    /// Soft-deleted lists are invisible to every lookup.
    async fn find_by_id(&self, list_id: i64) -> AppResult<Option<MovieList>>;

    async fn find_by_invite_code(&self, code: String) -> AppResult<Option<MovieList>>;

    async fn find_membership(&self, list_id: i64, user_id: i64) -> AppResult<Option<ListMember>>;

    /// Insert-or-ignore on the (list, user) key. Returns whether a new row
    /// was actually inserted so the caller can distinguish "joined" from
    /// "already a member".
    async fn add_participant_if_not_exists(&self, list_id: i64, user_id: i64) -> AppResult<bool>;

    async fn count_members(&self, list_id: i64) -> AppResult<i64>;

    async fn find_user_memberships(
        &self,
        user_id: i64,
        role: Option<MemberRole>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<MembershipWithList>>;

    async fn count_user_memberships(&self, user_id: i64, role: Option<MemberRole>)
        -> AppResult<i64>;

    /// One grouped query per batch, never one query per list.
    async fn count_members_batch(&self, list_ids: Vec<i64>) -> AppResult<HashMap<i64, i64>>;

    async fn count_movies_batch(&self, list_ids: Vec<i64>) -> AppResult<HashMap<i64, i64>>;

    /// Deletes the user's overlay rows, then their comments, then the
    /// membership, atomically.
    async fn remove_member(&self, list_id: i64, user_id: i64) -> AppResult<()>;

    /// Re-checks ownership and tombstones the list in one transaction.
    /// Memberships, movies, ratings and comments are intentionally retained.
    async fn soft_delete_list_if_owner(&self, list_id: i64, user_id: i64) -> AppResult<()>;
}

/// Persistence for the shared movie catalog, list-movie associations and the
/// per-user rating/notes overlay.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait MovieStore: Send + Sync {
    async fn find_movie(&self, movie_id: i64) -> AppResult<Option<Movie>>;

    async fn find_movie_by_id_and_type(
        &self,
        movie_id: i64,
        media_type: crate::models::MediaType,
    ) -> AppResult<Option<Movie>>;

    /// Persists catalog metadata with an idempotent genre upsert.
    async fn create_movie_with_genres(&self, movie: Movie, genres: Vec<Genre>) -> AppResult<()>;

    async fn list_movie_exists(&self, list_id: i64, movie_id: i64) -> AppResult<bool>;

    async fn add_movie_to_list(
        &self,
        list_id: i64,
        movie_id: i64,
        added_by: i64,
    ) -> AppResult<ListMovie>;

    async fn find_list_movie(&self, list_id: i64, movie_id: i64) -> AppResult<Option<ListMovie>>;

    /// Cascades comments and overlay rows before the association, atomically.
    async fn remove_movie_from_list(&self, list_id: i64, movie_id: i64) -> AppResult<()>;

    /// Status-only update. `watched_at` is set exactly when the status
    /// becomes `watched` and cleared on any other transition.
    async fn update_status(
        &self,
        list_id: i64,
        movie_id: i64,
        status: WatchStatus,
    ) -> AppResult<ListMovie>;

    async fn update_display_orders(
        &self,
        list_id: i64,
        orders: HashMap<i64, i32>,
    ) -> AppResult<()>;

    async fn find_user_data(
        &self,
        list_id: i64,
        movie_id: i64,
        user_id: i64,
    ) -> AppResult<Option<MovieUserData>>;

    /// Read-modify-write upsert of the caller's overlay entry. Returns the
    /// row after the change, or `None` when the change left nothing to keep
    /// (no empty overlay rows are ever retained).
    async fn upsert_user_data(
        &self,
        list_id: i64,
        movie_id: i64,
        user_id: i64,
        change: OverlayChange,
    ) -> AppResult<Option<MovieUserData>>;

    /// Mean over non-null ratings; `None` when no one has rated.
    async fn average_rating(&self, list_id: i64, movie_id: i64) -> AppResult<Option<f64>>;

    /// Ordered by explicit display order (nulls last), then newest first.
    async fn find_list_movies(
        &self,
        list_id: i64,
        status: Option<WatchStatus>,
    ) -> AppResult<Vec<ListMovieDetail>>;

    /// Case-insensitive substring match over title/original title, plus the
    /// total match count for pagination.
    async fn search_list_movies(
        &self,
        list_id: i64,
        query: String,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<ListMovieDetail>, i64)>;
}

/// Persistence for comments on list movies
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait CommentStore: Send + Sync {
    async fn create_comment(
        &self,
        list_id: i64,
        movie_id: i64,
        user_id: i64,
        content: String,
    ) -> AppResult<Comment>;

    async fn find_comments(
        &self,
        list_id: i64,
        movie_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Comment>, i64)>;

    async fn find_comment(&self, comment_id: i64) -> AppResult<Option<Comment>>;

    async fn update_comment(&self, comment_id: i64, content: String) -> AppResult<Comment>;

    async fn delete_comment(&self, comment_id: i64) -> AppResult<()>;
}
