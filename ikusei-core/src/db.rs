//! Postgres pool construction and the connectivity probe behind `/api/health`.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&config.url)
        .await
}

/// Server version plus the newest applied schema version, e.g.
/// `postgres: PostgreSQL 16.2 ... (schema v1)`.
pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let (server, schema): (String, Option<i64>) = sqlx::query_as(
        "SELECT version(), (SELECT max(version) FROM schema_migrations)",
    )
    .fetch_one(pool)
    .await?;
    Ok(match schema {
        Some(v) => format!("postgres: {server} (schema v{v})"),
        None => format!("postgres: {server} (schema not applied)"),
    })
}
