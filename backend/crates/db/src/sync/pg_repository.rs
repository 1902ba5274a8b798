use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::sync::models::SyncWatermark;
use crate::sync::repositories::{SyncWatermarkRepository, STALE_LOCK_AFTER_SECS};
use prodsync_common::error::{ProdsyncError, ProdsyncResult};

const RETURNING: &str =
    "returning id, job_name, watermark_at, status, error_message, created_at, updated_at";

#[derive(Clone)]
pub struct PgSyncRepository {
    pool: PgPool,
}

impl PgSyncRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> ProdsyncResult<SyncWatermark> {
        Ok(SyncWatermark {
            id: row.get("id"),
            job_name: row.get("job_name"),
            watermark_at: row.get("watermark_at"),
            status: row.get("status"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl SyncWatermarkRepository for PgSyncRepository {
    async fn get_or_create(&self, job_name: &str) -> ProdsyncResult<SyncWatermark> {
        let sql = format!(
            "insert into sync_watermarks (id, job_name)
             values ($1, $2)
             on conflict (job_name) do update set updated_at = sync_watermarks.updated_at
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(job_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ProdsyncError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn acquire_lock(&self, job_name: &str) -> ProdsyncResult<Option<SyncWatermark>> {
        let now = Utc::now();
        let sql = format!(
            "update sync_watermarks
             set status = 'running', error_message = null, updated_at = $1
             where job_name = $2 and (status != 'running' or updated_at < $3)
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(now)
            .bind(job_name)
            .bind(now - Duration::seconds(STALE_LOCK_AFTER_SECS))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProdsyncError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        watermark_at: DateTime<Utc>,
    ) -> ProdsyncResult<SyncWatermark> {
        // greatest() ignores nulls, so the first completion just stores $1
        let sql = format!(
            "update sync_watermarks
             set status = 'idle', watermark_at = greatest(watermark_at, $1),
                 error_message = null, updated_at = $2
             where id = $3
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(watermark_at)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProdsyncError::Database(e.to_string()))?
            .ok_or_else(|| ProdsyncError::NotFound(format!("sync watermark {id}")))?;

        Self::map_row(row)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        retry_from: DateTime<Utc>,
    ) -> ProdsyncResult<SyncWatermark> {
        let sql = format!(
            "update sync_watermarks
             set status = 'failed', error_message = $1, updated_at = $2,
                 watermark_at = coalesce(watermark_at, $3)
             where id = $4
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(error_message)
            .bind(Utc::now())
            .bind(retry_from)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProdsyncError::Database(e.to_string()))?
            .ok_or_else(|| ProdsyncError::NotFound(format!("sync watermark {id}")))?;

        Self::map_row(row)
    }
}
