use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::connector::TargetSystem;
use crate::lock;
use crate::poll::{await_condition, PollSpec};
use crate::record::{MaterialRecord, ProductRecord};
use prodsync_common::error::{ProdsyncError, ProdsyncResult};

/// Terminal jobs kept by a tracker before the oldest are forgotten.
const TRACKER_RETENTION: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Loaded { target_id: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    /// Stopped before every record was processed.
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

/// Point-in-time view of a batch job.
#[derive(Debug, Clone, Serialize)]
pub struct BatchJobSnapshot {
    pub id: Uuid,
    pub status: JobStatus,
    pub total: usize,
    /// `(source key, outcome)` in processing order.
    pub outcomes: Vec<(String, RecordOutcome)>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchJobSnapshot {
    pub fn loaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RecordOutcome::Loaded { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RecordOutcome::Failed { .. }))
            .count()
    }

    /// Source key → target id for every loaded record.
    pub fn mappings(&self) -> BTreeMap<String, String> {
        self.outcomes
            .iter()
            .filter_map(|(key, outcome)| match outcome {
                RecordOutcome::Loaded { target_id } => Some((key.clone(), target_id.clone())),
                RecordOutcome::Failed { .. } => None,
            })
            .collect()
    }
}

/// Observes one submitted job.
#[derive(Clone)]
pub struct BatchJobHandle {
    id: Uuid,
    state: Arc<Mutex<BatchJobSnapshot>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BatchJobHandle {
    fn new(total: usize) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            state: Arc::new(Mutex::new(BatchJobSnapshot {
                id,
                status: JobStatus::Running,
                total,
                outcomes: Vec::with_capacity(total),
                started_at: Utc::now(),
                finished_at: None,
            })),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        lock(&self.state).status
    }

    pub fn snapshot(&self) -> BatchJobSnapshot {
        lock(&self.state).clone()
    }

    /// Poll until the job is terminal, then return its final snapshot.
    pub async fn await_termination(&self, spec: PollSpec) -> ProdsyncResult<BatchJobSnapshot> {
        let what = format!("batch job {} to terminate", self.id);
        let handle = self;
        await_condition(&what, spec, move || async move {
            let snapshot = handle.snapshot();
            Ok(snapshot.status.is_terminal().then_some(snapshot))
        })
        .await
    }

    /// Cancel the job and wait for its task to stop, so no record is written
    /// after this returns. A job that already terminated keeps its status.
    pub async fn abort(&self) -> BatchJobSnapshot {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(job_id = %self.id, error = %e, "batch job task panicked");
                }
            }
        }

        let mut state = lock(&self.state);
        if state.status == JobStatus::Running {
            state.status = JobStatus::Aborted;
            state.finished_at = Some(Utc::now());
            tracing::warn!(
                job_id = %self.id,
                processed = state.outcomes.len(),
                total = state.total,
                "batch job aborted"
            );
        }
        state.clone()
    }

    fn record(&self, key: String, outcome: RecordOutcome) {
        lock(&self.state).outcomes.push((key, outcome));
    }

    fn finish(&self) -> BatchJobSnapshot {
        let mut state = lock(&self.state);
        let any_failed = state
            .outcomes
            .iter()
            .any(|(_, o)| matches!(o, RecordOutcome::Failed { .. }));
        state.status = if any_failed {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        state.finished_at = Some(Utc::now());
        state.clone()
    }
}

/// Registry of submitted jobs for callers that never see a handle.
#[derive(Clone, Default)]
pub struct BatchJobTracker {
    jobs: Arc<Mutex<Vec<BatchJobHandle>>>,
}

impl BatchJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, handle: BatchJobHandle) {
        let mut jobs = lock(&self.jobs);
        jobs.push(handle);
        while jobs.len() > TRACKER_RETENTION {
            match jobs.iter().position(|j| j.status().is_terminal()) {
                Some(oldest_done) => {
                    jobs.remove(oldest_done);
                }
                None => break,
            }
        }
    }

    /// Forget every tracked job.
    pub fn clear(&self) {
        lock(&self.jobs).clear();
    }

    pub fn snapshots(&self) -> Vec<BatchJobSnapshot> {
        lock(&self.jobs).iter().map(BatchJobHandle::snapshot).collect()
    }

    /// Poll until at least one job was submitted and every tracked job is terminal.
    pub async fn await_job_termination(
        &self,
        spec: PollSpec,
    ) -> ProdsyncResult<Vec<BatchJobSnapshot>> {
        let tracker = self;
        await_condition("batch jobs to terminate", spec, move || async move {
            let snapshots = tracker.snapshots();
            let done = !snapshots.is_empty() && snapshots.iter().all(|s| s.status.is_terminal());
            Ok(done.then_some(snapshots))
        })
        .await
    }

    /// Fails unless at least one job ran and every tracked job completed.
    pub fn assert_job_was_successful(&self) -> ProdsyncResult<()> {
        let snapshots = self.snapshots();
        if snapshots.is_empty() {
            return Err(ProdsyncError::verification(
                "no batch job was executed",
                "at least 1 job",
                "0 jobs",
            ));
        }

        for snapshot in &snapshots {
            if snapshot.status != JobStatus::Completed {
                return Err(ProdsyncError::verification(
                    format!("batch job {} was not successful", snapshot.id),
                    JobStatus::Completed.as_str(),
                    format!(
                        "{} ({} of {} records failed)",
                        snapshot.status.as_str(),
                        snapshot.failed(),
                        snapshot.total
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Loads products into the target as background batch jobs.
#[derive(Clone)]
pub struct BatchJobRunner {
    target: Arc<dyn TargetSystem>,
    block_size: usize,
    tracker: BatchJobTracker,
}

impl BatchJobRunner {
    pub fn new(
        target: Arc<dyn TargetSystem>,
        block_size: usize,
        tracker: BatchJobTracker,
    ) -> Self {
        Self {
            target,
            block_size: block_size.max(1),
            tracker,
        }
    }

    pub fn tracker(&self) -> &BatchJobTracker {
        &self.tracker
    }

    /// Start a job for `records` and return immediately.
    pub fn submit(&self, records: Vec<ProductRecord>) -> BatchJobHandle {
        let handle = BatchJobHandle::new(records.len());
        self.tracker.register(handle.clone());
        tracing::info!(job_id = %handle.id(), records = records.len(), "batch job submitted");

        let job = handle.clone();
        let target = Arc::clone(&self.target);
        let block_size = self.block_size;
        let task = tokio::spawn(async move {
            run_job(job, target, records, block_size).await;
        });
        *lock(&handle.task) = Some(task);

        handle
    }
}

async fn run_job(
    job: BatchJobHandle,
    target: Arc<dyn TargetSystem>,
    records: Vec<ProductRecord>,
    block_size: usize,
) {
    for (block, chunk) in records.chunks(block_size).enumerate() {
        tracing::debug!(job_id = %job.id(), block, size = chunk.len(), "processing block");

        for record in chunk {
            let material = MaterialRecord::from(record);
            let outcome = match target.upsert_material(&material).await {
                Ok(target_id) => RecordOutcome::Loaded { target_id },
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id(),
                        key = record.key(),
                        error = %e,
                        "failed to load product into target"
                    );
                    RecordOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            job.record(record.key().to_string(), outcome);
        }
    }

    let snapshot = job.finish();
    match snapshot.status {
        JobStatus::Completed => tracing::info!(
            job_id = %snapshot.id,
            loaded = snapshot.loaded(),
            "batch job completed"
        ),
        _ => tracing::error!(
            job_id = %snapshot.id,
            loaded = snapshot.loaded(),
            failed = snapshot.failed(),
            "batch job failed"
        ),
    }
}
