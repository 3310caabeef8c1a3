/// External media catalog client
///
/// Resolves a (media id, media type) pair to canonical title metadata and
/// supplies "recommendations for X" result sets. The HTTP implementation
/// talks to a TMDB-style API with a bearer token and a request-scoped
/// timeout so a hung upstream cannot hang a request.
use chrono::NaiveDate;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::{
    error::{AppError, AppResult},
    models::{Genre, MediaType, Movie},
};

#[cfg(test)]
use mockall::automock;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Canonical title metadata as resolved by the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTitle {
    pub id: i64,
    pub media_type: MediaType,
    pub title: String,
    pub original_title: Option<String>,
    pub original_language: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub poster_path: Option<String>,
    pub popularity: Option<f64>,
    pub genres: Vec<Genre>,
    pub seasons_count: Option<i32>,
    pub episodes_count: Option<i32>,
    pub series_status: Option<String>,
}

impl CatalogTitle {
    /// Splits the resolved title into the persistable movie row and its
    /// genre tags.
    pub fn into_movie(self) -> (Movie, Vec<Genre>) {
        (
            Movie {
                id: self.id,
                title: self.title,
                media_type: self.media_type,
                original_title: self.original_title,
                original_lang: self.original_language,
                overview: self.overview,
                release_date: self.release_date,
                poster_path: self.poster_path,
                popularity: self.popularity,
                seasons_count: self.seasons_count,
                episodes_count: self.episodes_count,
                series_status: self.series_status,
            },
            self.genres,
        )
    }
}

/// One candidate from a "recommendations for X" result set
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecommendation {
    pub id: i64,
    pub title: String,
    pub media_type: MediaType,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub popularity: f64,
    pub genre_ids: Vec<i64>,
}

/// One ranked hit from a multi-search
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSearchResult {
    pub id: i64,
    pub media_type: MediaType,
    pub name: String,
    pub original_name: Option<String>,
    pub poster_path: Option<String>,
}

/// Trait for the external media catalog
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// Resolve a title to canonical metadata. `NotFound` when the catalog has
    /// no such title, `Upstream` on transient catalog failure.
    async fn resolve_title(&self, id: i64, media_type: MediaType) -> AppResult<CatalogTitle>;

    /// Recommendations similar to the given title. Best-effort: callers
    /// treat a failure as an empty contribution.
    async fn recommendations_for(
        &self,
        id: i64,
        media_type: MediaType,
    ) -> AppResult<Vec<CatalogRecommendation>>;

    /// Ranked multi-search across movies and tv.
    async fn search_multi(&self, query: String) -> AppResult<Vec<CatalogSearchResult>>;
}

/// TMDB-style HTTP catalog client
#[derive(Clone)]
pub struct TmdbCatalog {
    http_client: HttpClient,
    api_url: String,
    api_token: String,
}

impl TmdbCatalog {
    /// Fails when the underlying client cannot be built; the request timeout
    /// is load-bearing, so there is no untimed fallback.
    pub fn new(api_url: String, api_token: String) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http_client: HttpClient::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_url,
            api_token,
        })
    }

    /// Maps a non-success catalog status to a domain error: 404 means the
    /// title does not exist; auth failures and 5xx are transient upstream
    /// conditions the caller may retry.
    fn status_error(status: StatusCode) -> AppError {
        if status == StatusCode::NOT_FOUND {
            AppError::NotFound("media not found in catalog".to_string())
        } else {
            AppError::Upstream(format!("catalog returned status {}", status))
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        self.get_json_with_query(path, &[]).await
    }

    async fn get_json_with_query<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> AppResult<T> {
        let url = format!("{}{}", self.api_url, path);
        let response = self
            .http_client
            .get(&url)
            .query(params)
            .header("Accept", "application/json")
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(path = %path, status = %status, "Catalog request failed");
            return Err(Self::status_error(status));
        }

        Ok(response.json().await?)
    }
}

fn parse_release_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.as_deref()
        .filter(|s| !s.is_empty())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

#[derive(Debug, Deserialize)]
struct TmdbGenre {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TmdbMovieDetails {
    id: i64,
    title: String,
    #[serde(default)]
    original_title: Option<String>,
    #[serde(default)]
    original_language: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    popularity: Option<f64>,
    #[serde(default)]
    genres: Vec<TmdbGenre>,
}

#[derive(Debug, Deserialize)]
struct TmdbTvDetails {
    id: i64,
    name: String,
    #[serde(default)]
    original_name: Option<String>,
    #[serde(default)]
    original_language: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    first_air_date: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    popularity: Option<f64>,
    #[serde(default)]
    number_of_seasons: Option<i32>,
    #[serde(default)]
    number_of_episodes: Option<i32>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    genres: Vec<TmdbGenre>,
}

#[derive(Debug, Deserialize)]
struct TmdbResultPage<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TmdbRecommendationResult {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    popularity: f64,
    #[serde(default)]
    genre_ids: Vec<i64>,
    #[serde(default)]
    media_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbMultiSearchResult {
    id: i64,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    original_title: Option<String>,
    #[serde(default)]
    original_name: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
}

#[async_trait::async_trait]
impl CatalogClient for TmdbCatalog {
    async fn resolve_title(&self, id: i64, media_type: MediaType) -> AppResult<CatalogTitle> {
        let title = match media_type {
            MediaType::Movie => {
                let details: TmdbMovieDetails = self.get_json(&format!("/movie/{}", id)).await?;
                CatalogTitle {
                    id: details.id,
                    media_type: MediaType::Movie,
                    title: details.title,
                    original_title: details.original_title,
                    original_language: details.original_language,
                    overview: details.overview,
                    release_date: parse_release_date(details.release_date),
                    poster_path: details.poster_path,
                    popularity: details.popularity,
                    genres: details
                        .genres
                        .into_iter()
                        .map(|g| Genre { id: g.id, name: g.name })
                        .collect(),
                    seasons_count: None,
                    episodes_count: None,
                    series_status: None,
                }
            }
            MediaType::Tv => {
                let details: TmdbTvDetails = self.get_json(&format!("/tv/{}", id)).await?;
                CatalogTitle {
                    id: details.id,
                    media_type: MediaType::Tv,
                    title: details.name,
                    original_title: details.original_name,
                    original_language: details.original_language,
                    overview: details.overview,
                    release_date: parse_release_date(details.first_air_date),
                    poster_path: details.poster_path,
                    popularity: details.popularity,
                    genres: details
                        .genres
                        .into_iter()
                        .map(|g| Genre { id: g.id, name: g.name })
                        .collect(),
                    seasons_count: details.number_of_seasons,
                    episodes_count: details.number_of_episodes,
                    series_status: details.status,
                }
            }
        };

        tracing::debug!(id, media_type = %media_type, title = %title.title, "Title resolved");

        Ok(title)
    }

    async fn recommendations_for(
        &self,
        id: i64,
        media_type: MediaType,
    ) -> AppResult<Vec<CatalogRecommendation>> {
        let page: TmdbResultPage<TmdbRecommendationResult> = self
            .get_json_with_query(
                &format!("/{}/{}/recommendations", media_type.as_path(), id),
                &[("page", "1")],
            )
            .await?;

        Ok(page
            .results
            .into_iter()
            .map(|r| CatalogRecommendation {
                id: r.id,
                title: r.title.or(r.name).unwrap_or_default(),
                // Movie payloads omit the media type; it is the seed's own.
                media_type: match r.media_type.as_deref() {
                    Some("movie") => MediaType::Movie,
                    Some("tv") => MediaType::Tv,
                    _ => media_type,
                },
                overview: r.overview.filter(|o| !o.is_empty()),
                poster_path: r.poster_path,
                popularity: r.popularity,
                genre_ids: r.genre_ids,
            })
            .collect())
    }

    async fn search_multi(&self, query: String) -> AppResult<Vec<CatalogSearchResult>> {
        let page: TmdbResultPage<TmdbMultiSearchResult> = self
            .get_json_with_query("/search/multi", &[("query", &query), ("page", "1")])
            .await?;

        Ok(page
            .results
            .into_iter()
            .filter_map(|r| {
                let media_type = match r.media_type.as_deref() {
                    Some("movie") => MediaType::Movie,
                    Some("tv") => MediaType::Tv,
                    _ => return None,
                };
                Some(CatalogSearchResult {
                    id: r.id,
                    media_type,
                    name: r.title.or(r.name).unwrap_or_default(),
                    original_name: r.original_title.or(r.original_name),
                    poster_path: r.poster_path,
                })
            })
            .collect())
    }
}
