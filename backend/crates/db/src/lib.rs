pub mod sync;

use prodsync_common::error::{ProdsyncError, ProdsyncResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> ProdsyncResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|e| ProdsyncError::Database(e.to_string()))
}

/// Create the tables the worker needs if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> ProdsyncResult<()> {
    sqlx::query(
        "create table if not exists sync_watermarks (
           id uuid primary key,
           job_name text not null unique,
           watermark_at timestamptz,
           status text not null default 'idle',
           error_message text,
           created_at timestamptz not null default now(),
           updated_at timestamptz not null default now()
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| ProdsyncError::Database(e.to_string()))?;

    Ok(())
}
