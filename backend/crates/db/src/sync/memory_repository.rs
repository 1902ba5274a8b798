use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::sync::models::{SyncWatermark, STATUS_FAILED, STATUS_IDLE, STATUS_RUNNING};
use crate::sync::repositories::{SyncWatermarkRepository, STALE_LOCK_AFTER_SECS};
use prodsync_common::error::{ProdsyncError, ProdsyncResult};

/// Process-local watermark store, used when no `DATABASE_URL` is configured.
#[derive(Clone, Default)]
pub struct InMemorySyncRepository {
    rows: Arc<Mutex<HashMap<String, SyncWatermark>>>,
}

impl InMemorySyncRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_by_id<F>(&self, id: Uuid, apply: F) -> ProdsyncResult<SyncWatermark>
    where
        F: FnOnce(&mut SyncWatermark),
    {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| ProdsyncError::Internal("watermark store poisoned".to_string()))?;
        let row = rows
            .values_mut()
            .find(|wm| wm.id == id)
            .ok_or_else(|| ProdsyncError::NotFound(format!("sync watermark {id}")))?;
        apply(row);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }
}

#[async_trait]
impl SyncWatermarkRepository for InMemorySyncRepository {
    async fn get_or_create(&self, job_name: &str) -> ProdsyncResult<SyncWatermark> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| ProdsyncError::Internal("watermark store poisoned".to_string()))?;
        Ok(rows
            .entry(job_name.to_string())
            .or_insert_with(|| SyncWatermark::new(job_name))
            .clone())
    }

    async fn acquire_lock(&self, job_name: &str) -> ProdsyncResult<Option<SyncWatermark>> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| ProdsyncError::Internal("watermark store poisoned".to_string()))?;
        let Some(row) = rows.get_mut(job_name) else {
            return Ok(None);
        };

        let now = Utc::now();
        let stale = row.updated_at < now - Duration::seconds(STALE_LOCK_AFTER_SECS);
        if row.is_running() && !stale {
            return Ok(None);
        }

        row.status = STATUS_RUNNING.to_string();
        row.error_message = None;
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        watermark_at: DateTime<Utc>,
    ) -> ProdsyncResult<SyncWatermark> {
        self.update_by_id(id, |row| {
            row.status = STATUS_IDLE.to_string();
            row.error_message = None;
            row.watermark_at = Some(match row.watermark_at {
                Some(current) => current.max(watermark_at),
                None => watermark_at,
            });
        })
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        retry_from: DateTime<Utc>,
    ) -> ProdsyncResult<SyncWatermark> {
        self.update_by_id(id, |row| {
            row.status = STATUS_FAILED.to_string();
            row.error_message = Some(error_message.to_string());
            if row.watermark_at.is_none() {
                row.watermark_at = Some(retry_from);
            }
        })
    }
}
