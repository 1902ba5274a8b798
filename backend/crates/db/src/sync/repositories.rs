use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sync::models::SyncWatermark;
use prodsync_common::error::ProdsyncResult;

/// A `running` lock older than this is treated as abandoned by a crashed worker.
pub const STALE_LOCK_AFTER_SECS: i64 = 3600;

#[async_trait]
pub trait SyncWatermarkRepository: Send + Sync {
    /// Get or create the watermark row for a sync job.
    async fn get_or_create(&self, job_name: &str) -> ProdsyncResult<SyncWatermark>;

    /// Atomically set status to 'running' only if currently 'idle' or 'failed'
    /// (or if the running lock is stale).
    /// Returns `None` if already running (lock not acquired).
    async fn acquire_lock(&self, job_name: &str) -> ProdsyncResult<Option<SyncWatermark>>;

    /// Mark a cycle as completed and move the watermark forward.
    /// The stored watermark never moves backwards.
    async fn mark_completed(
        &self,
        id: Uuid,
        watermark_at: DateTime<Utc>,
    ) -> ProdsyncResult<SyncWatermark>;

    /// Mark a cycle as failed with an error message. A stored watermark is
    /// left as is; a job without one gets `retry_from`, so the next cycle
    /// starts from the window that failed.
    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        retry_from: DateTime<Utc>,
    ) -> ProdsyncResult<SyncWatermark>;
}
