use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::AppResult,
    models::{Genre, ListMovie, ListMovieDetail, MediaType, Movie, MovieUserData, WatchStatus},
    stores::{MovieStore, OverlayChange},
};

/// Postgres-backed store for the movie catalog, list associations and the
/// per-user overlay
#[derive(Clone)]
pub struct PgMovieStore {
    pool: PgPool,
}

impl PgMovieStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Timestamp recorded for a status transition: set when a title becomes
    /// watched, cleared on every other transition.
    fn watched_at_for(status: WatchStatus) -> Option<DateTime<Utc>> {
        match status {
            WatchStatus::Watched => Some(Utc::now()),
            _ => None,
        }
    }

    /// Batch-loads genres and overlay entries for the joined rows and
    /// stitches them into [`ListMovieDetail`] values.
    async fn hydrate_details(
        &self,
        list_id: i64,
        rows: Vec<JoinedRow>,
    ) -> AppResult<Vec<ListMovieDetail>> {
        let movie_ids: Vec<i64> = rows.iter().map(|r| r.movie_id).collect();
        if movie_ids.is_empty() {
            return Ok(Vec::new());
        }

        let genre_rows: Vec<(i64, i64, String)> = sqlx::query_as(
            r#"
            SELECT mg.movie_id, g.id, g.name
            FROM movie_genres mg
            JOIN genres g ON g.id = mg.genre_id
            WHERE mg.movie_id = ANY($1)
            "#,
        )
        .bind(&movie_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut genres_by_movie: HashMap<i64, Vec<Genre>> = HashMap::new();
        for (movie_id, id, name) in genre_rows {
            genres_by_movie
                .entry(movie_id)
                .or_default()
                .push(Genre { id, name });
        }

        let entry_rows: Vec<MovieUserData> = sqlx::query_as(
            r#"
            SELECT id, list_id, movie_id, user_id, rating, notes, created_at, updated_at
            FROM list_movie_user_data
            WHERE list_id = $1 AND movie_id = ANY($2)
            "#,
        )
        .bind(list_id)
        .bind(&movie_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut entries_by_movie: HashMap<i64, Vec<MovieUserData>> = HashMap::new();
        for entry in entry_rows {
            entries_by_movie.entry(entry.movie_id).or_default().push(entry);
        }

        Ok(rows
            .into_iter()
            .map(|r| {
                let genres = genres_by_movie.remove(&r.movie_id).unwrap_or_default();
                let user_entries = entries_by_movie.remove(&r.movie_id).unwrap_or_default();
                let (entry, movie) = r.split();
                ListMovieDetail {
                    entry,
                    movie,
                    genres,
                    user_entries,
                }
            })
            .collect())
    }
}

/// Flat join of list_movies and movies with aliased columns
#[derive(sqlx::FromRow)]
struct JoinedRow {
    id: i64,
    list_id: i64,
    movie_id: i64,
    status: WatchStatus,
    added_by: Option<i64>,
    added_at: DateTime<Utc>,
    watched_at: Option<DateTime<Utc>>,
    display_order: Option<i32>,
    m_title: String,
    m_media_type: MediaType,
    m_original_title: Option<String>,
    m_original_lang: Option<String>,
    m_overview: Option<String>,
    m_release_date: Option<chrono::NaiveDate>,
    m_poster_path: Option<String>,
    m_popularity: Option<f64>,
    m_seasons_count: Option<i32>,
    m_episodes_count: Option<i32>,
    m_series_status: Option<String>,
}

impl JoinedRow {
    fn split(self) -> (ListMovie, Movie) {
        (
            ListMovie {
                id: self.id,
                list_id: self.list_id,
                movie_id: self.movie_id,
                status: self.status,
                added_by: self.added_by,
                added_at: self.added_at,
                watched_at: self.watched_at,
                display_order: self.display_order,
            },
            Movie {
                id: self.movie_id,
                title: self.m_title,
                media_type: self.m_media_type,
                original_title: self.m_original_title,
                original_lang: self.m_original_lang,
                overview: self.m_overview,
                release_date: self.m_release_date,
                poster_path: self.m_poster_path,
                popularity: self.m_popularity,
                seasons_count: self.m_seasons_count,
                episodes_count: self.m_episodes_count,
                series_status: self.m_series_status,
            },
        )
    }
}

const JOINED_COLUMNS: &str = r#"
    lm.id, lm.list_id, lm.movie_id, lm.status, lm.added_by, lm.added_at,
    lm.watched_at, lm.display_order,
    m.title AS m_title, m.media_type AS m_media_type,
    m.original_title AS m_original_title, m.original_lang AS m_original_lang,
    m.overview AS m_overview, m.release_date AS m_release_date,
    m.poster_path AS m_poster_path, m.popularity AS m_popularity,
    m.seasons_count AS m_seasons_count, m.episodes_count AS m_episodes_count,
    m.series_status AS m_series_status
"#;

const MOVIE_COLUMNS: &str = r#"
    id, title, media_type, original_title, original_lang, overview,
    release_date, poster_path, popularity, seasons_count, episodes_count,
    series_status
"#;

const LIST_MOVIE_COLUMNS: &str =
    "id, list_id, movie_id, status, added_by, added_at, watched_at, display_order";

#[async_trait::async_trait]
impl MovieStore for PgMovieStore {
    async fn find_movie(&self, movie_id: i64) -> AppResult<Option<Movie>> {
        let movie = sqlx::query_as(&format!(
            "SELECT {MOVIE_COLUMNS} FROM movies WHERE id = $1"
        ))
        .bind(movie_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(movie)
    }

    async fn find_movie_by_id_and_type(
        &self,
        movie_id: i64,
        media_type: MediaType,
    ) -> AppResult<Option<Movie>> {
        let movie = sqlx::query_as(&format!(
            "SELECT {MOVIE_COLUMNS} FROM movies WHERE id = $1 AND media_type = $2"
        ))
        .bind(movie_id)
        .bind(media_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(movie)
    }

    async fn create_movie_with_genres(&self, movie: Movie, genres: Vec<Genre>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        // Two users adding the same uncached title race benignly; the first
        // insert wins and the second is a no-op.
        sqlx::query(
            r#"
            INSERT INTO movies (id, title, media_type, original_title, original_lang,
                                overview, release_date, poster_path, popularity,
                                seasons_count, episodes_count, series_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(movie.id)
        .bind(&movie.title)
        .bind(movie.media_type)
        .bind(&movie.original_title)
        .bind(&movie.original_lang)
        .bind(&movie.overview)
        .bind(movie.release_date)
        .bind(&movie.poster_path)
        .bind(movie.popularity)
        .bind(movie.seasons_count)
        .bind(movie.episodes_count)
        .bind(&movie.series_status)
        .execute(&mut *tx)
        .await?;

        for genre in &genres {
            sqlx::query(
                r#"
                INSERT INTO genres (id, name) VALUES ($1, $2)
                ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
                "#,
            )
            .bind(genre.id)
            .bind(&genre.name)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO movie_genres (movie_id, genre_id) VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(movie.id)
            .bind(genre.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(movie_id = movie.id, genres = genres.len(), "Movie persisted");

        Ok(())
    }

    async fn list_movie_exists(&self, list_id: i64, movie_id: i64) -> AppResult<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM list_movies WHERE list_id = $1 AND movie_id = $2")
                .bind(list_id)
                .bind(movie_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn add_movie_to_list(
        &self,
        list_id: i64,
        movie_id: i64,
        added_by: i64,
    ) -> AppResult<ListMovie> {
        let entry = sqlx::query_as(&format!(
            r#"
            INSERT INTO list_movies (list_id, movie_id, added_by)
            VALUES ($1, $2, $3)
            RETURNING {LIST_MOVIE_COLUMNS}
            "#
        ))
        .bind(list_id)
        .bind(movie_id)
        .bind(added_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn find_list_movie(&self, list_id: i64, movie_id: i64) -> AppResult<Option<ListMovie>> {
        let entry = sqlx::query_as(&format!(
            "SELECT {LIST_MOVIE_COLUMNS} FROM list_movies WHERE list_id = $1 AND movie_id = $2"
        ))
        .bind(list_id)
        .bind(movie_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn remove_movie_from_list(&self, list_id: i64, movie_id: i64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM comments WHERE list_id = $1 AND movie_id = $2")
            .bind(list_id)
            .bind(movie_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM list_movie_user_data WHERE list_id = $1 AND movie_id = $2")
            .bind(list_id)
            .bind(movie_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM list_movies WHERE list_id = $1 AND movie_id = $2")
            .bind(list_id)
            .bind(movie_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(list_id, movie_id, "Movie removed from list with its overlay and comments");

        Ok(())
    }

    async fn update_status(
        &self,
        list_id: i64,
        movie_id: i64,
        status: WatchStatus,
    ) -> AppResult<ListMovie> {
        let watched_at = Self::watched_at_for(status);
        let entry = sqlx::query_as(&format!(
            r#"
            UPDATE list_movies
            SET status = $3, watched_at = $4
            WHERE list_id = $1 AND movie_id = $2
            RETURNING {LIST_MOVIE_COLUMNS}
            "#
        ))
        .bind(list_id)
        .bind(movie_id)
        .bind(status)
        .bind(watched_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn update_display_orders(
        &self,
        list_id: i64,
        orders: HashMap<i64, i32>,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        for (movie_id, order) in orders {
            sqlx::query(
                "UPDATE list_movies SET display_order = $3 WHERE list_id = $1 AND movie_id = $2",
            )
            .bind(list_id)
            .bind(movie_id)
            .bind(order)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_user_data(
        &self,
        list_id: i64,
        movie_id: i64,
        user_id: i64,
    ) -> AppResult<Option<MovieUserData>> {
        let data = sqlx::query_as(
            r#"
            SELECT id, list_id, movie_id, user_id, rating, notes, created_at, updated_at
            FROM list_movie_user_data
            WHERE list_id = $1 AND movie_id = $2 AND user_id = $3
            "#,
        )
        .bind(list_id)
        .bind(movie_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(data)
    }

    async fn upsert_user_data(
        &self,
        list_id: i64,
        movie_id: i64,
        user_id: i64,
        change: OverlayChange,
    ) -> AppResult<Option<MovieUserData>> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<MovieUserData> = sqlx::query_as(
            r#"
            SELECT id, list_id, movie_id, user_id, rating, notes, created_at, updated_at
            FROM list_movie_user_data
            WHERE list_id = $1 AND movie_id = $2 AND user_id = $3
            FOR UPDATE
            "#,
        )
        .bind(list_id)
        .bind(movie_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let result = match existing {
            None => {
                let rating = change.rating.flatten();
                let notes = change.notes.flatten();
                // A change that establishes nothing creates nothing.
                if rating.is_none() && notes.is_none() {
                    None
                } else {
                    let row: MovieUserData = sqlx::query_as(
                        r#"
                        INSERT INTO list_movie_user_data (list_id, movie_id, user_id, rating, notes)
                        VALUES ($1, $2, $3, $4, $5)
                        RETURNING id, list_id, movie_id, user_id, rating, notes, created_at, updated_at
                        "#,
                    )
                    .bind(list_id)
                    .bind(movie_id)
                    .bind(user_id)
                    .bind(rating)
                    .bind(&notes)
                    .fetch_one(&mut *tx)
                    .await?;
                    Some(row)
                }
            }
            Some(row) => {
                let rating = change.rating.unwrap_or(row.rating);
                let notes = change.notes.unwrap_or_else(|| row.notes.clone());
                if rating.is_none() && notes.is_none() {
                    // Empty overlay rows are deleted, never retained.
                    sqlx::query("DELETE FROM list_movie_user_data WHERE id = $1")
                        .bind(row.id)
                        .execute(&mut *tx)
                        .await?;
                    None
                } else {
                    let updated: MovieUserData = sqlx::query_as(
                        r#"
                        UPDATE list_movie_user_data
                        SET rating = $2, notes = $3, updated_at = now()
                        WHERE id = $1
                        RETURNING id, list_id, movie_id, user_id, rating, notes, created_at, updated_at
                        "#,
                    )
                    .bind(row.id)
                    .bind(rating)
                    .bind(&notes)
                    .fetch_one(&mut *tx)
                    .await?;
                    Some(updated)
                }
            }
        };

        tx.commit().await?;

        Ok(result)
    }

    async fn average_rating(&self, list_id: i64, movie_id: i64) -> AppResult<Option<f64>> {
        let (avg,): (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT AVG(rating)::double precision
            FROM list_movie_user_data
            WHERE list_id = $1 AND movie_id = $2 AND rating IS NOT NULL
            "#,
        )
        .bind(list_id)
        .bind(movie_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(avg)
    }

    async fn find_list_movies(
        &self,
        list_id: i64,
        status: Option<WatchStatus>,
    ) -> AppResult<Vec<ListMovieDetail>> {
        let rows: Vec<JoinedRow> = sqlx::query_as(&format!(
            r#"
            SELECT {JOINED_COLUMNS}
            FROM list_movies lm
            JOIN movies m ON m.id = lm.movie_id
            WHERE lm.list_id = $1
              AND ($2::watch_status IS NULL OR lm.status = $2)
            ORDER BY lm.display_order ASC NULLS LAST, lm.added_at DESC
            "#
        ))
        .bind(list_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_details(list_id, rows).await
    }

    async fn search_list_movies(
        &self,
        list_id: i64,
        query: String,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<ListMovieDetail>, i64)> {
        let pattern = format!("%{}%", query.trim());

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM list_movies lm
            JOIN movies m ON m.id = lm.movie_id
            WHERE lm.list_id = $1
              AND (m.title ILIKE $2 OR m.original_title ILIKE $2)
            "#,
        )
        .bind(list_id)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<JoinedRow> = sqlx::query_as(&format!(
            r#"
            SELECT {JOINED_COLUMNS}
            FROM list_movies lm
            JOIN movies m ON m.id = lm.movie_id
            WHERE lm.list_id = $1
              AND (m.title ILIKE $2 OR m.original_title ILIKE $2)
            ORDER BY lm.display_order ASC NULLS LAST, lm.added_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(list_id)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let details = self.hydrate_details(list_id, rows).await?;
        Ok((details, total))
    }
}
