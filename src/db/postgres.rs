use sqlx::{postgres::PgPoolOptions, PgPool};

/// Connection pool sized from configuration. Connecting eagerly here means a
/// bad database URL fails the boot instead of the first request.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}
