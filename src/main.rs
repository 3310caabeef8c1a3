mod api;
mod auth;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod services;
mod stores;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{create_router, AppState};
use auth::AuthKeys;
use config::Config;
use middleware::{make_span_with_request_id, request_id_middleware};
use services::{CatalogClient, ListService, RecommendationService, TmdbCatalog};
use stores::{
    CommentStore, MembershipStore, MovieStore, PgCommentStore, PgMembershipStore, PgMovieStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelist_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    sqlx::migrate!().run(&pool).await?;
    tracing::info!("Database migrations applied");

    let memberships: Arc<dyn MembershipStore> = Arc::new(PgMembershipStore::new(pool.clone()));
    let movies: Arc<dyn MovieStore> = Arc::new(PgMovieStore::new(pool.clone()));
    let comments: Arc<dyn CommentStore> = Arc::new(PgCommentStore::new(pool));
    let catalog: Arc<dyn CatalogClient> = Arc::new(TmdbCatalog::new(
        config.catalog_api_url.clone(),
        config.catalog_api_token.clone(),
    )?);

    let lists = Arc::new(ListService::new(
        memberships.clone(),
        movies.clone(),
        comments,
        catalog.clone(),
    ));
    let recommendation_cache = db::TtlCache::new(services::recommendations::CACHE_TTL);
    let recommendations = Arc::new(RecommendationService::new(
        memberships,
        movies,
        catalog.clone(),
        recommendation_cache,
    ));

    let state = AppState {
        lists,
        recommendations,
        catalog,
        auth: AuthKeys::new(&config.jwt_secret),
    };

    // Request-id runs outermost so the trace span can pick the id up.
    let app = create_router(state)
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
