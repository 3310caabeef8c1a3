use std::collections::HashMap;
use std::sync::Arc;

use rand::{rngs::OsRng, Rng};

use crate::{
    error::{AppError, AppResult},
    models::{
        Comment, ListMember, ListMovie, ListMovieDetail, MemberRole, MembershipWithList, MediaType,
        Movie, MovieList, MovieUserData, WatchStatus,
    },
    services::catalog::CatalogClient,
    stores::{CommentStore, MembershipStore, MovieStore, OverlayChange},
};

const INVITE_CODE_LEN: usize = 10;
const INVITE_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Collisions in a 36^10 keyspace are practically unreachable, but the retry
/// loop must be bounded all the same.
const MAX_CODE_ATTEMPTS: usize = 10;

const MAX_NAME_LEN: usize = 255;
const MAX_DESCRIPTION_LEN: usize = 1000;
const MAX_COMMENT_LEN: usize = 2000;

const DEFAULT_PAGE_LIMIT: i64 = 50;
const MAX_PAGE_LIMIT: i64 = 100;

/// Result of an invite-code join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub list: MovieList,
    pub role: MemberRole,
    pub already_member: bool,
    pub member_count: i64,
}

/// One list in the "my lists" view, with batch-computed counts
#[derive(Debug, Clone, serde::Serialize)]
pub struct ListOverview {
    #[serde(flatten)]
    pub membership: MembershipWithList,
    pub member_count: i64,
    pub movie_count: i64,
}

#[derive(Debug, Clone)]
pub struct UserListsPage {
    pub items: Vec<ListOverview>,
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct AddMediaOutcome {
    pub entry: ListMovie,
    pub movie: Movie,
}

/// Requested change to a list movie: shared status and/or the caller's
/// personal overlay
#[derive(Debug, Clone, Default)]
pub struct MovieUpdate {
    pub status: Option<WatchStatus>,
    pub overlay: OverlayChange,
}

/// Before/after state of an update, enough for the caller to report a diff
#[derive(Debug, Clone)]
pub struct UpdateMovieOutcome {
    pub entry: ListMovie,
    pub movie: Movie,
    pub old_status: WatchStatus,
    pub old_entry: Option<MovieUserData>,
    pub new_entry: Option<MovieUserData>,
    /// Recomputed only when the update carried a rating change
    pub average_rating: Option<f64>,
    pub rating_provided: bool,
}

/// Orchestrates list lifecycle, membership, movie and comment operations.
///
/// Authorization rule, applied uniformly: only members (owner or
/// participant) may read or mutate list content; only the owner may delete
/// the list; comments are editable only by their author.
pub struct ListService {
    memberships: Arc<dyn MembershipStore>,
    movies: Arc<dyn MovieStore>,
    comments: Arc<dyn CommentStore>,
    catalog: Arc<dyn CatalogClient>,
}

impl ListService {
    pub fn new(
        memberships: Arc<dyn MembershipStore>,
        movies: Arc<dyn MovieStore>,
        comments: Arc<dyn CommentStore>,
        catalog: Arc<dyn CatalogClient>,
    ) -> Self {
        Self {
            memberships,
            movies,
            comments,
            catalog,
        }
    }

    async fn require_list(&self, list_id: i64) -> AppResult<MovieList> {
        self.memberships
            .find_by_id(list_id)
            .await?
            .ok_or_else(|| AppError::NotFound("list not found".to_string()))
    }

    async fn require_membership(&self, list_id: i64, user_id: i64) -> AppResult<ListMember> {
        self.memberships
            .find_membership(list_id, user_id)
            .await?
            .ok_or_else(|| AppError::Forbidden("you are not a member of this list".to_string()))
    }

    pub async fn create_list(
        &self,
        name: &str,
        description: Option<&str>,
        owner_id: i64,
    ) -> AppResult<MovieList> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::Validation(
                "name must be between 1 and 255 characters".to_string(),
            ));
        }
        let description = match description {
            Some(d) => {
                let d = d.trim();
                if d.chars().count() > MAX_DESCRIPTION_LEN {
                    return Err(AppError::Validation(
                        "description must be at most 1000 characters".to_string(),
                    ));
                }
                Some(d.to_string())
            }
            None => None,
        };

        // Both a pre-check hit and an insert-time unique violation count as a
        // collision; the constraint is the authority, the pre-check only
        // saves a wasted insert.
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_invite_code();
            if self.memberships.invite_code_exists(code.clone()).await? {
                continue;
            }
            match self
                .memberships
                .create_with_owner(name.to_string(), description.clone(), code, owner_id)
                .await
            {
                Ok(list) => {
                    tracing::info!(list_id = list.id, owner_id, "List created");
                    return Ok(list);
                }
                Err(err) if err.is_unique_violation() => continue,
                Err(err) => return Err(err),
            }
        }

        Err(AppError::Exhausted(
            "failed to generate a unique invite code".to_string(),
        ))
    }

    pub async fn join_by_invite_code(&self, code: &str, user_id: i64) -> AppResult<JoinOutcome> {
        let code = normalize_invite_code(code)?;

        let list = self
            .memberships
            .find_by_invite_code(code)
            .await?
            .ok_or_else(|| AppError::NotFound("list not found for invite code".to_string()))?;

        let (role, already_member) =
            match self.memberships.find_membership(list.id, user_id).await? {
                Some(membership) => (membership.role, true),
                None => {
                    // Insert-or-ignore absorbs the race where two joins for
                    // the same user land simultaneously.
                    let inserted = self
                        .memberships
                        .add_participant_if_not_exists(list.id, user_id)
                        .await?;
                    if inserted {
                        (MemberRole::Participant, false)
                    } else {
                        let membership = self
                            .memberships
                            .find_membership(list.id, user_id)
                            .await?
                            .ok_or_else(|| {
                                AppError::Internal(
                                    "membership disappeared during join".to_string(),
                                )
                            })?;
                        (membership.role, true)
                    }
                }
            };

        let member_count = self.memberships.count_members(list.id).await?;

        tracing::info!(
            list_id = list.id,
            user_id,
            already_member,
            member_count,
            "Join via invite code"
        );

        Ok(JoinOutcome {
            list,
            role,
            already_member,
            member_count,
        })
    }

    pub async fn delete_list(&self, list_id: i64, user_id: i64) -> AppResult<()> {
        self.require_list(list_id).await?;
        let membership = self.require_membership(list_id, user_id).await?;
        if membership.role != MemberRole::Owner {
            return Err(AppError::Forbidden(
                "only the list owner can delete this list".to_string(),
            ));
        }
        // The store re-verifies the role inside its transaction.
        self.memberships
            .soft_delete_list_if_owner(list_id, user_id)
            .await
    }

    pub async fn leave_list(&self, list_id: i64, user_id: i64) -> AppResult<()> {
        self.require_list(list_id).await?;
        let membership = self.require_membership(list_id, user_id).await?;
        if membership.role == MemberRole::Owner {
            return Err(AppError::Forbidden(
                "the owner cannot leave the list; delete it instead".to_string(),
            ));
        }
        self.memberships.remove_member(list_id, user_id).await
    }

    pub async fn list_user_lists(
        &self,
        user_id: i64,
        role: Option<MemberRole>,
        limit: i64,
        offset: i64,
    ) -> AppResult<UserListsPage> {
        let (limit, offset) = clamp_page(limit, offset);

        let memberships = self
            .memberships
            .find_user_memberships(user_id, role, limit, offset)
            .await?;

        let list_ids: Vec<i64> = memberships.iter().map(|m| m.membership.list_id).collect();
        let member_counts = self.memberships.count_members_batch(list_ids.clone()).await?;
        let movie_counts = self.memberships.count_movies_batch(list_ids).await?;
        let total = self
            .memberships
            .count_user_memberships(user_id, role)
            .await?;

        let items = memberships
            .into_iter()
            .map(|m| {
                let list_id = m.membership.list_id;
                ListOverview {
                    membership: m,
                    member_count: member_counts.get(&list_id).copied().unwrap_or(0),
                    movie_count: movie_counts.get(&list_id).copied().unwrap_or(0),
                }
            })
            .collect();

        Ok(UserListsPage { items, total })
    }

    pub async fn add_media_to_list(
        &self,
        list_id: i64,
        user_id: i64,
        media_id: i64,
        media_type: MediaType,
    ) -> AppResult<AddMediaOutcome> {
        self.require_list(list_id).await?;
        self.require_membership(list_id, user_id).await?;

        let movie = match self
            .movies
            .find_movie_by_id_and_type(media_id, media_type)
            .await?
        {
            Some(movie) => movie,
            None => {
                let title = self.catalog.resolve_title(media_id, media_type).await?;
                let (movie, genres) = title.into_movie();
                self.movies
                    .create_movie_with_genres(movie.clone(), genres)
                    .await?;
                movie
            }
        };

        if self.movies.list_movie_exists(list_id, movie.id).await? {
            return Err(AppError::Conflict("movie already in list".to_string()));
        }

        let entry = match self.movies.add_movie_to_list(list_id, movie.id, user_id).await {
            Ok(entry) => entry,
            // Lost the race against another member adding the same title.
            Err(err) if err.is_unique_violation() => {
                return Err(AppError::Conflict("movie already in list".to_string()))
            }
            Err(err) => return Err(err),
        };

        tracing::info!(list_id, user_id, movie_id = movie.id, "Movie added to list");

        Ok(AddMediaOutcome { entry, movie })
    }

    /// Any member may remove any movie, regardless of who added it.
    pub async fn remove_movie_from_list(
        &self,
        list_id: i64,
        user_id: i64,
        movie_id: i64,
    ) -> AppResult<Movie> {
        self.require_list(list_id).await?;
        self.require_membership(list_id, user_id).await?;

        if self.movies.find_list_movie(list_id, movie_id).await?.is_none() {
            return Err(AppError::NotFound("movie not in list".to_string()));
        }

        let movie = self
            .movies
            .find_movie(movie_id)
            .await?
            .ok_or_else(|| AppError::NotFound("movie not found".to_string()))?;

        self.movies.remove_movie_from_list(list_id, movie_id).await?;

        tracing::info!(list_id, user_id, movie_id, "Movie removed from list");

        Ok(movie)
    }

    pub async fn update_movie(
        &self,
        list_id: i64,
        user_id: i64,
        movie_id: i64,
        update: MovieUpdate,
    ) -> AppResult<UpdateMovieOutcome> {
        if update.status.is_none() && update.overlay.is_empty() {
            return Err(AppError::Validation(
                "at least one of status, rating or notes must be provided".to_string(),
            ));
        }
        if let Some(Some(rating)) = update.overlay.rating {
            if !(1..=10).contains(&rating) {
                return Err(AppError::Validation(
                    "rating must be between 1 and 10".to_string(),
                ));
            }
        }

        self.require_list(list_id).await?;
        self.require_membership(list_id, user_id).await?;

        let existing = self
            .movies
            .find_list_movie(list_id, movie_id)
            .await?
            .ok_or_else(|| AppError::NotFound("movie not in list".to_string()))?;

        // Capture the prior state before any mutation so the caller can
        // report a diff.
        let old_status = existing.status;
        let old_entry = if update.overlay.is_empty() {
            None
        } else {
            self.movies.find_user_data(list_id, movie_id, user_id).await?
        };

        let entry = match update.status {
            Some(status) => self.movies.update_status(list_id, movie_id, status).await?,
            None => existing,
        };

        let new_entry = if update.overlay.is_empty() {
            None
        } else {
            self.movies
                .upsert_user_data(list_id, movie_id, user_id, update.overlay.clone())
                .await?
        };

        let rating_provided = update.overlay.rating.is_some();
        let average_rating = if rating_provided {
            self.movies.average_rating(list_id, movie_id).await?
        } else {
            None
        };

        let movie = self
            .movies
            .find_movie(movie_id)
            .await?
            .ok_or_else(|| AppError::NotFound("movie not found".to_string()))?;

        Ok(UpdateMovieOutcome {
            entry,
            movie,
            old_status,
            old_entry,
            new_entry,
            average_rating,
            rating_provided,
        })
    }

    pub async fn list_movies(
        &self,
        list_id: i64,
        user_id: i64,
        status: Option<WatchStatus>,
    ) -> AppResult<Vec<ListMovieDetail>> {
        self.require_list(list_id).await?;
        self.require_membership(list_id, user_id).await?;
        self.movies.find_list_movies(list_id, status).await
    }

    pub async fn search_movies(
        &self,
        list_id: i64,
        user_id: i64,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<ListMovieDetail>, i64)> {
        self.require_list(list_id).await?;
        self.require_membership(list_id, user_id).await?;
        let (limit, offset) = clamp_page(limit, offset);
        self.movies
            .search_list_movies(list_id, query.to_string(), limit, offset)
            .await
    }

    pub async fn reorder_movies(
        &self,
        list_id: i64,
        user_id: i64,
        orders: HashMap<i64, i32>,
    ) -> AppResult<()> {
        if orders.is_empty() {
            return Err(AppError::Validation(
                "order map must not be empty".to_string(),
            ));
        }
        self.require_list(list_id).await?;
        self.require_membership(list_id, user_id).await?;
        self.movies.update_display_orders(list_id, orders).await
    }

    pub async fn create_comment(
        &self,
        list_id: i64,
        user_id: i64,
        movie_id: i64,
        content: &str,
    ) -> AppResult<Comment> {
        let content = validate_comment(content)?;
        self.require_list(list_id).await?;
        self.require_membership(list_id, user_id).await?;
        if !self.movies.list_movie_exists(list_id, movie_id).await? {
            return Err(AppError::NotFound("movie not in list".to_string()));
        }
        self.comments
            .create_comment(list_id, movie_id, user_id, content)
            .await
    }

    pub async fn get_comments(
        &self,
        list_id: i64,
        user_id: i64,
        movie_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Comment>, i64)> {
        self.require_list(list_id).await?;
        self.require_membership(list_id, user_id).await?;
        if !self.movies.list_movie_exists(list_id, movie_id).await? {
            return Err(AppError::NotFound("movie not in list".to_string()));
        }
        let (limit, offset) = clamp_page(limit, offset);
        self.comments
            .find_comments(list_id, movie_id, limit, offset)
            .await
    }

    pub async fn update_comment(
        &self,
        list_id: i64,
        user_id: i64,
        comment_id: i64,
        content: &str,
    ) -> AppResult<Comment> {
        let content = validate_comment(content)?;
        self.require_list(list_id).await?;
        self.require_membership(list_id, user_id).await?;

        let comment = self.require_own_comment(list_id, user_id, comment_id).await?;
        self.comments.update_comment(comment.id, content).await
    }

    pub async fn delete_comment(
        &self,
        list_id: i64,
        user_id: i64,
        comment_id: i64,
    ) -> AppResult<()> {
        self.require_list(list_id).await?;
        self.require_membership(list_id, user_id).await?;

        let comment = self.require_own_comment(list_id, user_id, comment_id).await?;
        self.comments.delete_comment(comment.id).await
    }

    /// Authorship check, distinct from the list-role check: membership gates
    /// visibility, authorship gates mutation.
    async fn require_own_comment(
        &self,
        list_id: i64,
        user_id: i64,
        comment_id: i64,
    ) -> AppResult<Comment> {
        let comment = self
            .comments
            .find_comment(comment_id)
            .await?
            .filter(|c| c.list_id == list_id)
            .ok_or_else(|| AppError::NotFound("comment not found".to_string()))?;
        if comment.user_id != user_id {
            return Err(AppError::Forbidden(
                "only the author can modify this comment".to_string(),
            ));
        }
        Ok(comment)
    }
}

/// 10 characters drawn from A-Z0-9 via the OS's CSPRNG
fn generate_invite_code() -> String {
    let mut rng = OsRng;
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_CODE_CHARSET[rng.gen_range(0..INVITE_CODE_CHARSET.len())] as char)
        .collect()
}

/// Uppercases and shape-checks an invite code before any lookup
fn normalize_invite_code(code: &str) -> AppResult<String> {
    let code = code.trim().to_uppercase();
    if code.len() != INVITE_CODE_LEN
        || !code.bytes().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(AppError::Validation(
            "invite code must be 10 alphanumeric characters".to_string(),
        ));
    }
    Ok(code)
}

fn validate_comment(content: &str) -> AppResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("comment cannot be empty".to_string()));
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::Validation(
            "comment must be at most 2000 characters".to_string(),
        ));
    }
    Ok(content.to_string())
}

fn clamp_page(limit: i64, offset: i64) -> (i64, i64) {
    let limit = if limit <= 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        limit.min(MAX_PAGE_LIMIT)
    };
    (limit, offset.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::{CatalogTitle, MockCatalogClient};
    use crate::stores::{MockCommentStore, MockMembershipStore, MockMovieStore};
    use chrono::Utc;
    use mockall::predicate::eq;

    fn sample_list(id: i64, owner: i64) -> MovieList {
        MovieList {
            id,
            name: "Movie Night".to_string(),
            description: None,
            invite_code: "ABC123XYZ0".to_string(),
            created_by: owner,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn sample_member(list_id: i64, user_id: i64, role: MemberRole) -> ListMember {
        ListMember {
            list_id,
            user_id,
            role,
            added_at: Utc::now(),
        }
    }

    fn sample_movie(id: i64) -> Movie {
        Movie {
            id,
            title: "Fight Club".to_string(),
            media_type: MediaType::Movie,
            original_title: Some("Fight Club".to_string()),
            original_lang: Some("en".to_string()),
            overview: None,
            release_date: None,
            poster_path: None,
            popularity: Some(61.4),
            seasons_count: None,
            episodes_count: None,
            series_status: None,
        }
    }

    fn sample_entry(list_id: i64, movie_id: i64) -> ListMovie {
        ListMovie {
            id: 1,
            list_id,
            movie_id,
            status: WatchStatus::NotWatched,
            added_by: Some(1),
            added_at: Utc::now(),
            watched_at: None,
            display_order: None,
        }
    }

    fn service(
        memberships: MockMembershipStore,
        movies: MockMovieStore,
        comments: MockCommentStore,
        catalog: MockCatalogClient,
    ) -> ListService {
        ListService::new(
            Arc::new(memberships),
            Arc::new(movies),
            Arc::new(comments),
            Arc::new(catalog),
        )
    }

    // -- invite codes ------------------------------------------------------

    #[test]
    fn generated_codes_are_ten_uppercase_alphanumerics() {
        for _ in 0..50 {
            let code = generate_invite_code();
            assert_eq!(code.len(), 10);
            assert!(code
                .bytes()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn invite_code_is_normalized_to_uppercase() {
        assert_eq!(normalize_invite_code(" abc123xyz0 ").unwrap(), "ABC123XYZ0");
    }

    #[test]
    fn short_or_symbolic_codes_are_rejected_before_lookup() {
        assert!(normalize_invite_code("ABC123").is_err());
        assert!(normalize_invite_code("ABC123XYZ01").is_err());
        assert!(normalize_invite_code("ABC123XYZ!").is_err());
        assert!(normalize_invite_code("").is_err());
    }

    // -- create ------------------------------------------------------------

    #[tokio::test]
    async fn create_list_rejects_empty_name() {
        let svc = service(
            MockMembershipStore::new(),
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let err = svc.create_list("   ", None, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn create_list_rejects_oversized_description() {
        let svc = service(
            MockMembershipStore::new(),
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let long = "x".repeat(1001);
        let err = svc.create_list("Movie Night", Some(&long), 1).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn create_list_retries_on_code_collision() {
        let mut memberships = MockMembershipStore::new();
        // First candidate collides in the pre-check, second goes through.
        let mut hits = vec![false, true];
        memberships
            .expect_invite_code_exists()
            .times(2)
            .returning(move |_| Ok(hits.pop().unwrap()));
        memberships
            .expect_create_with_owner()
            .times(1)
            .returning(|name, description, code, owner| {
                Ok(MovieList {
                    id: 7,
                    name,
                    description,
                    invite_code: code,
                    created_by: owner,
                    created_at: Utc::now(),
                    deleted_at: None,
                })
            });

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let list = svc.create_list(" Movie Night ", None, 1).await.unwrap();
        assert_eq!(list.name, "Movie Night");
        assert_eq!(list.invite_code.len(), 10);
    }

    #[tokio::test]
    async fn create_list_gives_up_after_bounded_attempts() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_invite_code_exists()
            .times(10)
            .returning(|_| Ok(true));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let err = svc.create_list("Movie Night", None, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Exhausted(_)));
    }

    // -- join --------------------------------------------------------------

    #[tokio::test]
    async fn join_with_malformed_code_never_hits_the_store() {
        let svc = service(
            MockMembershipStore::new(),
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let err = svc.join_by_invite_code("short", 2).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn join_unknown_code_is_not_found() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_by_invite_code()
            .with(eq("ABC123XYZ0".to_string()))
            .returning(|_| Ok(None));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let err = svc.join_by_invite_code("abc123xyz0", 2).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn join_is_idempotent_for_existing_members() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_by_invite_code()
            .returning(|_| Ok(Some(sample_list(1, 1))));
        memberships
            .expect_find_membership()
            .with(eq(1), eq(1))
            .returning(|list_id, user_id| {
                Ok(Some(sample_member(list_id, user_id, MemberRole::Owner)))
            });
        memberships.expect_count_members().returning(|_| Ok(2));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let outcome = svc.join_by_invite_code("ABC123XYZ0", 1).await.unwrap();
        assert!(outcome.already_member);
        assert_eq!(outcome.role, MemberRole::Owner);
        assert_eq!(outcome.member_count, 2);
    }

    #[tokio::test]
    async fn first_join_inserts_participant() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_by_invite_code()
            .returning(|_| Ok(Some(sample_list(1, 1))));
        memberships.expect_find_membership().returning(|_, _| Ok(None));
        memberships
            .expect_add_participant_if_not_exists()
            .with(eq(1), eq(2))
            .returning(|_, _| Ok(true));
        memberships.expect_count_members().returning(|_| Ok(2));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let outcome = svc.join_by_invite_code("ABC123XYZ0", 2).await.unwrap();
        assert!(!outcome.already_member);
        assert_eq!(outcome.role, MemberRole::Participant);
        assert_eq!(outcome.member_count, 2);
    }

    #[tokio::test]
    async fn lost_join_race_resolves_to_existing_membership() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_by_invite_code()
            .returning(|_| Ok(Some(sample_list(1, 1))));
        let mut reads = vec![
            Some(sample_member(1, 2, MemberRole::Participant)),
            None,
        ];
        memberships
            .expect_find_membership()
            .times(2)
            .returning(move |_, _| Ok(reads.pop().unwrap()));
        memberships
            .expect_add_participant_if_not_exists()
            .returning(|_, _| Ok(false));
        memberships.expect_count_members().returning(|_| Ok(3));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let outcome = svc.join_by_invite_code("ABC123XYZ0", 2).await.unwrap();
        assert!(outcome.already_member);
        assert_eq!(outcome.role, MemberRole::Participant);
    }

    // -- delete / leave ----------------------------------------------------

    #[tokio::test]
    async fn participant_cannot_delete_list() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_by_id()
            .returning(|_| Ok(Some(sample_list(1, 1))));
        memberships
            .expect_find_membership()
            .returning(|l, u| Ok(Some(sample_member(l, u, MemberRole::Participant))));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let err = svc.delete_list(1, 2).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn owner_delete_soft_deletes() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_by_id()
            .returning(|_| Ok(Some(sample_list(1, 1))));
        memberships
            .expect_find_membership()
            .returning(|l, u| Ok(Some(sample_member(l, u, MemberRole::Owner))));
        memberships
            .expect_soft_delete_list_if_owner()
            .with(eq(1), eq(1))
            .times(1)
            .returning(|_, _| Ok(()));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        svc.delete_list(1, 1).await.unwrap();
    }

    #[tokio::test]
    async fn owner_cannot_leave_their_list() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_by_id()
            .returning(|_| Ok(Some(sample_list(1, 1))));
        memberships
            .expect_find_membership()
            .returning(|l, u| Ok(Some(sample_member(l, u, MemberRole::Owner))));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let err = svc.leave_list(1, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn participant_leave_removes_membership() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_by_id()
            .returning(|_| Ok(Some(sample_list(1, 1))));
        memberships
            .expect_find_membership()
            .returning(|l, u| Ok(Some(sample_member(l, u, MemberRole::Participant))));
        memberships
            .expect_remove_member()
            .with(eq(1), eq(2))
            .times(1)
            .returning(|_, _| Ok(()));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        svc.leave_list(1, 2).await.unwrap();
    }

    #[tokio::test]
    async fn non_member_cannot_touch_list_content() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_by_id()
            .returning(|_| Ok(Some(sample_list(1, 1))));
        memberships.expect_find_membership().returning(|_, _| Ok(None));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let err = svc.list_movies(1, 99, None).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    // -- add / remove movies -----------------------------------------------

    fn member_mocks(role: MemberRole) -> MockMembershipStore {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_by_id()
            .returning(|id| Ok(Some(sample_list(id, 1))));
        memberships
            .expect_find_membership()
            .returning(move |l, u| Ok(Some(sample_member(l, u, role))));
        memberships
    }

    #[tokio::test]
    async fn add_media_uses_local_movie_without_catalog_call() {
        let mut movies = MockMovieStore::new();
        movies
            .expect_find_movie_by_id_and_type()
            .with(eq(550), eq(MediaType::Movie))
            .returning(|id, _| Ok(Some(sample_movie(id))));
        movies.expect_list_movie_exists().returning(|_, _| Ok(false));
        movies
            .expect_add_movie_to_list()
            .returning(|l, m, _| Ok(sample_entry(l, m)));

        // No expectation on the catalog: any call would panic the test.
        let svc = service(
            member_mocks(MemberRole::Owner),
            movies,
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let outcome = svc
            .add_media_to_list(1, 1, 550, MediaType::Movie)
            .await
            .unwrap();
        assert_eq!(outcome.movie.id, 550);
        assert_eq!(outcome.entry.status, WatchStatus::NotWatched);
    }

    #[tokio::test]
    async fn add_media_fetches_and_persists_on_local_miss() {
        let mut movies = MockMovieStore::new();
        movies
            .expect_find_movie_by_id_and_type()
            .returning(|_, _| Ok(None));
        movies
            .expect_create_movie_with_genres()
            .times(1)
            .returning(|_, _| Ok(()));
        movies.expect_list_movie_exists().returning(|_, _| Ok(false));
        movies
            .expect_add_movie_to_list()
            .returning(|l, m, _| Ok(sample_entry(l, m)));

        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_resolve_title()
            .with(eq(550), eq(MediaType::Movie))
            .times(1)
            .returning(|id, media_type| {
                Ok(CatalogTitle {
                    id,
                    media_type,
                    title: "Fight Club".to_string(),
                    original_title: None,
                    original_language: Some("en".to_string()),
                    overview: None,
                    release_date: None,
                    poster_path: None,
                    popularity: Some(61.4),
                    genres: vec![],
                    seasons_count: None,
                    episodes_count: None,
                    series_status: None,
                })
            });

        let svc = service(
            member_mocks(MemberRole::Owner),
            movies,
            MockCommentStore::new(),
            catalog,
        );
        let outcome = svc
            .add_media_to_list(1, 1, 550, MediaType::Movie)
            .await
            .unwrap();
        assert_eq!(outcome.movie.title, "Fight Club");
    }

    #[tokio::test]
    async fn adding_duplicate_movie_is_a_conflict() {
        let mut movies = MockMovieStore::new();
        movies
            .expect_find_movie_by_id_and_type()
            .returning(|id, _| Ok(Some(sample_movie(id))));
        movies.expect_list_movie_exists().returning(|_, _| Ok(true));

        let svc = service(
            member_mocks(MemberRole::Owner),
            movies,
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let err = svc
            .add_media_to_list(1, 1, 550, MediaType::Movie)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn catalog_miss_surfaces_as_media_not_found() {
        let mut movies = MockMovieStore::new();
        movies
            .expect_find_movie_by_id_and_type()
            .returning(|_, _| Ok(None));

        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_resolve_title()
            .returning(|_, _| Err(AppError::NotFound("media not found in catalog".to_string())));

        let svc = service(
            member_mocks(MemberRole::Owner),
            movies,
            MockCommentStore::new(),
            catalog,
        );
        let err = svc
            .add_media_to_list(1, 1, 999, MediaType::Movie)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn participant_may_remove_movie_added_by_someone_else() {
        let mut movies = MockMovieStore::new();
        movies.expect_find_list_movie().returning(|l, m| {
            Ok(Some(ListMovie {
                added_by: Some(1), // added by the owner, removed by user 2
                ..sample_entry(l, m)
            }))
        });
        movies
            .expect_find_movie()
            .returning(|id| Ok(Some(sample_movie(id))));
        movies
            .expect_remove_movie_from_list()
            .with(eq(1), eq(550))
            .times(1)
            .returning(|_, _| Ok(()));

        let svc = service(
            member_mocks(MemberRole::Participant),
            movies,
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let movie = svc.remove_movie_from_list(1, 2, 550).await.unwrap();
        assert_eq!(movie.id, 550);
    }

    #[tokio::test]
    async fn removing_absent_movie_is_not_found() {
        let mut movies = MockMovieStore::new();
        movies.expect_find_list_movie().returning(|_, _| Ok(None));

        let svc = service(
            member_mocks(MemberRole::Owner),
            movies,
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let err = svc.remove_movie_from_list(1, 1, 550).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    // -- update movie ------------------------------------------------------

    #[tokio::test]
    async fn update_requires_at_least_one_field() {
        let svc = service(
            MockMembershipStore::new(),
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let err = svc
            .update_movie(1, 1, 550, MovieUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn out_of_range_ratings_are_rejected() {
        let svc = service(
            MockMembershipStore::new(),
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        for rating in [0, 11, -3] {
            let update = MovieUpdate {
                status: None,
                overlay: OverlayChange {
                    rating: Some(Some(rating)),
                    notes: None,
                },
            };
            let err = svc.update_movie(1, 1, 550, update).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn boundary_ratings_are_accepted() {
        for rating in [1, 10] {
            let mut movies = MockMovieStore::new();
            movies
                .expect_find_list_movie()
                .returning(|l, m| Ok(Some(sample_entry(l, m))));
            movies.expect_find_user_data().returning(|_, _, _| Ok(None));
            movies
                .expect_upsert_user_data()
                .times(1)
                .returning(move |l, m, u, _| {
                    Ok(Some(MovieUserData {
                        id: 1,
                        list_id: l,
                        movie_id: m,
                        user_id: u,
                        rating: Some(rating),
                        notes: None,
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                    }))
                });
            movies
                .expect_average_rating()
                .returning(move |_, _| Ok(Some(rating as f64)));
            movies
                .expect_find_movie()
                .returning(|id| Ok(Some(sample_movie(id))));

            let svc = service(
                member_mocks(MemberRole::Participant),
                movies,
                MockCommentStore::new(),
                MockCatalogClient::new(),
            );
            let update = MovieUpdate {
                status: None,
                overlay: OverlayChange {
                    rating: Some(Some(rating)),
                    notes: None,
                },
            };
            let outcome = svc.update_movie(1, 2, 550, update).await.unwrap();
            assert!(outcome.rating_provided);
            assert_eq!(outcome.average_rating, Some(rating as f64));
            assert_eq!(outcome.new_entry.unwrap().rating, Some(rating));
        }
    }

    #[tokio::test]
    async fn status_change_reports_old_and_new_state() {
        let mut movies = MockMovieStore::new();
        movies
            .expect_find_list_movie()
            .returning(|l, m| Ok(Some(sample_entry(l, m))));
        movies
            .expect_update_status()
            .with(eq(1), eq(550), eq(WatchStatus::Watched))
            .times(1)
            .returning(|l, m, status| {
                Ok(ListMovie {
                    status,
                    watched_at: Some(Utc::now()),
                    ..sample_entry(l, m)
                })
            });
        movies
            .expect_find_movie()
            .returning(|id| Ok(Some(sample_movie(id))));

        let svc = service(
            member_mocks(MemberRole::Owner),
            movies,
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let update = MovieUpdate {
            status: Some(WatchStatus::Watched),
            overlay: OverlayChange::default(),
        };
        let outcome = svc.update_movie(1, 1, 550, update).await.unwrap();
        assert_eq!(outcome.old_status, WatchStatus::NotWatched);
        assert_eq!(outcome.entry.status, WatchStatus::Watched);
        assert!(outcome.entry.watched_at.is_some());
        assert!(!outcome.rating_provided);
        assert_eq!(outcome.average_rating, None);
    }

    #[tokio::test]
    async fn clearing_rating_reports_remaining_average() {
        let mut movies = MockMovieStore::new();
        movies
            .expect_find_list_movie()
            .returning(|l, m| Ok(Some(sample_entry(l, m))));
        movies.expect_find_user_data().returning(|l, m, u| {
            Ok(Some(MovieUserData {
                id: 5,
                list_id: l,
                movie_id: m,
                user_id: u,
                rating: Some(8),
                notes: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        });
        // Clearing the rating with no notes deletes the overlay row.
        movies
            .expect_upsert_user_data()
            .returning(|_, _, _, _| Ok(None));
        movies
            .expect_average_rating()
            .returning(|_, _| Ok(Some(10.0)));
        movies
            .expect_find_movie()
            .returning(|id| Ok(Some(sample_movie(id))));

        let svc = service(
            member_mocks(MemberRole::Participant),
            movies,
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let update = MovieUpdate {
            status: None,
            overlay: OverlayChange {
                rating: Some(None),
                notes: None,
            },
        };
        let outcome = svc.update_movie(1, 2, 550, update).await.unwrap();
        assert_eq!(outcome.old_entry.unwrap().rating, Some(8));
        assert!(outcome.new_entry.is_none());
        assert_eq!(outcome.average_rating, Some(10.0));
    }

    // -- comments ----------------------------------------------------------

    #[tokio::test]
    async fn comment_content_is_validated_before_any_lookup() {
        let svc = service(
            MockMembershipStore::new(),
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        assert!(matches!(
            svc.create_comment(1, 1, 550, "   ").await.unwrap_err(),
            AppError::Validation(_)
        ));
        let long = "x".repeat(2001);
        assert!(matches!(
            svc.create_comment(1, 1, 550, &long).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn create_comment_trims_content() {
        let mut movies = MockMovieStore::new();
        movies.expect_list_movie_exists().returning(|_, _| Ok(true));

        let mut comments = MockCommentStore::new();
        comments
            .expect_create_comment()
            .with(eq(1), eq(550), eq(2), eq("great movie".to_string()))
            .times(1)
            .returning(|list_id, movie_id, user_id, content| {
                Ok(Comment {
                    id: 9,
                    list_id,
                    movie_id,
                    user_id,
                    content,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
            });

        let svc = service(
            member_mocks(MemberRole::Participant),
            movies,
            comments,
            MockCatalogClient::new(),
        );
        let comment = svc.create_comment(1, 2, 550, "  great movie  ").await.unwrap();
        assert_eq!(comment.content, "great movie");
    }

    #[tokio::test]
    async fn only_the_author_may_edit_a_comment() {
        let mut comments = MockCommentStore::new();
        comments.expect_find_comment().returning(|id| {
            Ok(Some(Comment {
                id,
                list_id: 1,
                movie_id: 550,
                user_id: 7, // someone else's comment
                content: "mine".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        });

        let svc = service(
            member_mocks(MemberRole::Participant),
            MockMovieStore::new(),
            comments,
            MockCatalogClient::new(),
        );
        let err = svc.update_comment(1, 2, 9, "edited").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn comment_from_another_list_is_not_found() {
        let mut comments = MockCommentStore::new();
        comments.expect_find_comment().returning(|id| {
            Ok(Some(Comment {
                id,
                list_id: 99,
                movie_id: 550,
                user_id: 2,
                content: "elsewhere".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        });

        let svc = service(
            member_mocks(MemberRole::Participant),
            MockMovieStore::new(),
            comments,
            MockCatalogClient::new(),
        );
        let err = svc.delete_comment(1, 2, 9).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    // -- listing -----------------------------------------------------------

    #[tokio::test]
    async fn user_lists_carry_batch_counts() {
        let mut memberships = MockMembershipStore::new();
        memberships
            .expect_find_user_memberships()
            .returning(|user_id, _, _, _| {
                Ok(vec![MembershipWithList {
                    membership: sample_member(1, user_id, MemberRole::Owner),
                    list: sample_list(1, user_id),
                }])
            });
        memberships
            .expect_count_members_batch()
            .with(eq(vec![1i64]))
            .returning(|_| Ok(HashMap::from([(1, 3)])));
        memberships
            .expect_count_movies_batch()
            .with(eq(vec![1i64]))
            .returning(|_| Ok(HashMap::from([(1, 12)])));
        memberships
            .expect_count_user_memberships()
            .returning(|_, _| Ok(1));

        let svc = service(
            memberships,
            MockMovieStore::new(),
            MockCommentStore::new(),
            MockCatalogClient::new(),
        );
        let page = svc.list_user_lists(1, None, 20, 0).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].member_count, 3);
        assert_eq!(page.items[0].movie_count, 12);
    }

    #[test]
    fn page_clamping() {
        assert_eq!(clamp_page(0, 0), (50, 0));
        assert_eq!(clamp_page(-5, -3), (50, 0));
        assert_eq!(clamp_page(500, 10), (100, 10));
        assert_eq!(clamp_page(25, 5), (25, 5));
    }
}
