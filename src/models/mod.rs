use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Role of a user within a list
///
/// Exactly one membership per list holds `Owner`, set at creation and never
/// reassigned. Everyone who joins through an invite code is a `Participant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "member_role", rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Participant,
}

/// Kind of title tracked by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "media_type", rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    /// Path segment used by the external catalog API
    pub fn as_path(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_path())
    }
}

/// Shared watch status of a title within a list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "watch_status", rename_all = "snake_case")]
pub enum WatchStatus {
    NotWatched,
    Watching,
    Watched,
    Dropped,
}

/// A shared, named collection of titles owned by one user and joinable via
/// invite code. Soft-deleted rows keep `deleted_at` set; historical ratings
/// and comments survive deletion.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MovieList {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub invite_code: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Membership binding a user to a list with a role, PK (list_id, user_id)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ListMember {
    pub list_id: i64,
    pub user_id: i64,
    pub role: MemberRole,
    pub added_at: DateTime<Utc>,
}

/// Canonical title metadata persisted from the external catalog.
/// The primary key is the catalog's own id.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub media_type: MediaType,
    pub original_title: Option<String>,
    pub original_lang: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub poster_path: Option<String>,
    pub popularity: Option<f64>,
    pub seasons_count: Option<i32>,
    pub episodes_count: Option<i32>,
    pub series_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

/// Shared record of a title's presence in a list
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ListMovie {
    pub id: i64,
    pub list_id: i64,
    pub movie_id: i64,
    pub status: WatchStatus,
    pub added_by: Option<i64>,
    pub added_at: DateTime<Utc>,
    pub watched_at: Option<DateTime<Utc>>,
    pub display_order: Option<i32>,
}

/// Per-user personalization overlay on a shared list movie.
///
/// Invariant: a row never exists with both `rating` and `notes` null; the
/// store deletes it instead.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MovieUserData {
    pub id: i64,
    pub list_id: i64,
    pub movie_id: i64,
    pub user_id: i64,
    pub rating: Option<i32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's comment on a list movie, editable only by its author
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub list_id: i64,
    pub movie_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// List movie together with its catalog metadata, genre tags and every
/// member's overlay entry, as returned by list and search reads.
#[derive(Debug, Clone, Serialize)]
pub struct ListMovieDetail {
    #[serde(flatten)]
    pub entry: ListMovie,
    pub movie: Movie,
    pub genres: Vec<Genre>,
    pub user_entries: Vec<MovieUserData>,
}

/// Membership joined with its (non-deleted) list for the "my lists" view
#[derive(Debug, Clone, Serialize)]
pub struct MembershipWithList {
    #[serde(flatten)]
    pub membership: ListMember,
    pub list: MovieList,
}
