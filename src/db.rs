use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

pub async fn build_pool(config: &AppConfig) -> AppResult<PgPool> {
    let url = config.database_url.as_deref().ok_or_else(|| {
        AppError::Dependency("DATABASE_URL is not set — the portal requires Postgres.".to_string())
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_max_connections)
        .min_connections(config.db_pool_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
        .connect(url)
        .await
        .map_err(|e| AppError::Dependency(format!("Failed to connect to Postgres: {e}")))?;

    Ok(pool)
}
