use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;

use crate::{
    db::TtlCache,
    error::{AppError, AppResult},
    models::{ListMovieDetail, MediaType},
    services::catalog::{CatalogClient, CatalogRecommendation},
    stores::{MembershipStore, MovieStore},
};

const MIN_LIST_MOVIES: usize = 2;
const MAX_SEEDS: usize = 5;
const RECENCY_WINDOW_DAYS: i64 = 30;
const RECENCY_BONUS: f64 = 0.5;
const FREQUENCY_WEIGHT: f64 = 0.5;
const GENRE_WEIGHT: f64 = 0.3;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

/// How long a list's computed ranking stays valid
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w342";

/// One scored recommendation, ready for the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationItem {
    pub id: i64,
    pub title: String,
    pub media_type: MediaType,
    pub overview: Option<String>,
    pub poster_url: Option<String>,
    pub score: f64,
}

/// Produces "more like what this list already holds" suggestions.
///
/// Pipeline: pick up to five seed titles the group rated highest, fan out to
/// the catalog's per-title recommendation feeds concurrently, then merge the
/// candidates with a score that rewards global popularity, appearing under
/// several seeds, and overlapping the list's genre profile. The full scored
/// set is cached per list for a day; `limit` is applied after the cache.
pub struct RecommendationService {
    memberships: Arc<dyn MembershipStore>,
    movies: Arc<dyn MovieStore>,
    catalog: Arc<dyn CatalogClient>,
    cache: TtlCache<i64, Vec<RecommendationItem>>,
}

impl RecommendationService {
    /// The cache is built once at startup and handed in, like the pool and
    /// the stores, so its expiry policy is the caller's to choose.
    pub fn new(
        memberships: Arc<dyn MembershipStore>,
        movies: Arc<dyn MovieStore>,
        catalog: Arc<dyn CatalogClient>,
        cache: TtlCache<i64, Vec<RecommendationItem>>,
    ) -> Self {
        Self {
            memberships,
            movies,
            catalog,
            cache,
        }
    }

    pub async fn recommend(
        &self,
        list_id: i64,
        user_id: i64,
        limit: Option<usize>,
    ) -> AppResult<Vec<RecommendationItem>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        self.memberships
            .find_by_id(list_id)
            .await?
            .ok_or_else(|| AppError::NotFound("list not found".to_string()))?;
        self.memberships
            .find_membership(list_id, user_id)
            .await?
            .ok_or_else(|| AppError::Forbidden("you are not a member of this list".to_string()))?;

        if let Some(cached) = self.cache.get(&list_id) {
            tracing::debug!(list_id, "Recommendation cache hit");
            return Ok(cached.into_iter().take(limit).collect());
        }

        let details = self.movies.find_list_movies(list_id, None).await?;
        if details.len() < MIN_LIST_MOVIES {
            return Err(AppError::Validation(
                "list needs at least two titles before recommendations are available".to_string(),
            ));
        }

        let existing_ids: HashSet<i64> = details.iter().map(|d| d.movie.id).collect();
        let list_genres: HashSet<i64> = details
            .iter()
            .flat_map(|d| d.genres.iter().map(|g| g.id))
            .collect();

        let now = Utc::now();
        let seeds = select_seeds(&details, now);

        // Concurrent fan-out; a failed seed contributes nothing rather than
        // failing the whole request.
        let fetches = seeds
            .iter()
            .map(|&(id, media_type)| self.catalog.recommendations_for(id, media_type));
        let mut candidates: Vec<CatalogRecommendation> = Vec::new();
        for (seed, result) in seeds.iter().zip(join_all(fetches).await) {
            match result {
                Ok(recs) => candidates.extend(recs),
                Err(err) => {
                    tracing::warn!(
                        list_id,
                        seed_id = seed.0,
                        error = %err,
                        "Seed recommendation fetch failed, skipping"
                    );
                }
            }
        }

        let items = rank_candidates(candidates, &existing_ids, &list_genres);
        self.cache.insert(list_id, items.clone());

        tracing::info!(
            list_id,
            seeds = seeds.len(),
            candidates = items.len(),
            "Recommendations computed"
        );

        Ok(items.into_iter().take(limit).collect())
    }
}

/// Seed priority: the group's mean rating, plus a bonus for titles added in
/// the last thirty days so fresh interests surface even while unrated.
fn seed_score(detail: &ListMovieDetail, now: DateTime<Utc>) -> f64 {
    let ratings: Vec<i32> = detail.user_entries.iter().filter_map(|e| e.rating).collect();
    let base = if ratings.is_empty() {
        0.0
    } else {
        ratings.iter().sum::<i32>() as f64 / ratings.len() as f64
    };
    let age = now.signed_duration_since(detail.entry.added_at);
    if age < chrono::Duration::days(RECENCY_WINDOW_DAYS) {
        base + RECENCY_BONUS
    } else {
        base
    }
}

fn select_seeds(details: &[ListMovieDetail], now: DateTime<Utc>) -> Vec<(i64, MediaType)> {
    let mut scored: Vec<(f64, i64, MediaType)> = details
        .iter()
        .map(|d| (seed_score(d, now), d.movie.id, d.movie.media_type))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(MAX_SEEDS)
        .map(|(_, id, media_type)| (id, media_type))
        .collect()
}

fn candidate_score(popularity: f64, frequency: usize, genre_matches: usize) -> f64 {
    popularity / 100.0
        + (frequency.saturating_sub(1)) as f64 * FREQUENCY_WEIGHT
        + genre_matches as f64 * GENRE_WEIGHT
}

/// Merges per-seed candidate sets into one ranked list, dropping titles the
/// list already contains.
fn rank_candidates(
    candidates: Vec<CatalogRecommendation>,
    existing_ids: &HashSet<i64>,
    list_genres: &HashSet<i64>,
) -> Vec<RecommendationItem> {
    struct Aggregate {
        rec: CatalogRecommendation,
        frequency: usize,
    }

    let mut by_id: HashMap<i64, Aggregate> = HashMap::new();
    for rec in candidates {
        if existing_ids.contains(&rec.id) {
            continue;
        }
        by_id
            .entry(rec.id)
            .and_modify(|agg| agg.frequency += 1)
            .or_insert(Aggregate { rec, frequency: 1 });
    }

    let mut items: Vec<RecommendationItem> = by_id
        .into_values()
        .map(|agg| {
            let genre_matches = agg
                .rec
                .genre_ids
                .iter()
                .filter(|g| list_genres.contains(g))
                .count();
            RecommendationItem {
                id: agg.rec.id,
                title: agg.rec.title,
                media_type: agg.rec.media_type,
                overview: agg.rec.overview,
                poster_url: agg
                    .rec
                    .poster_path
                    .map(|p| format!("{POSTER_BASE_URL}{p}")),
                score: candidate_score(agg.rec.popularity, agg.frequency, genre_matches),
            }
        })
        .collect();

    items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    items
}
