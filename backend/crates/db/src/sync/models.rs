use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const STATUS_IDLE: &str = "idle";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_FAILED: &str = "failed";

/// Persisted high-water mark of one sync job.
///
/// `watermark_at` is the exclusive upper bound of the last successful
/// extraction window; `None` until the first cycle completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub id: Uuid,
    pub job_name: String,
    pub watermark_at: Option<DateTime<Utc>>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncWatermark {
    pub fn new(job_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            watermark_at: None,
            status: STATUS_IDLE.to_string(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == STATUS_RUNNING
    }
}
