use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::batch::{BatchJobHandle, BatchJobRunner, BatchJobSnapshot, JobStatus};
use crate::extract::Extractor;
use crate::poll::PollSpec;
use crate::watermark::{ExtractionWindow, WatermarkPolicy};
use prodsync_common::error::ProdsyncResult;
use prodsync_db::sync::repositories::SyncWatermarkRepository;

/// Summary of one poll cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub job_name: String,
    pub cycle_id: Uuid,
    /// `None` when the cycle was skipped.
    pub window: Option<ExtractionWindow>,
    pub job_status: Option<JobStatus>,
    pub extracted: usize,
    pub upserted: usize,
    pub errors: usize,
    pub skipped: bool,
    /// Source id → target id of every record loaded this cycle.
    pub mappings: BTreeMap<String, String>,
}

impl SyncResult {
    fn skipped(job_name: &str, cycle_id: Uuid) -> Self {
        Self {
            job_name: job_name.to_string(),
            cycle_id,
            window: None,
            job_status: None,
            extracted: 0,
            upserted: 0,
            errors: 0,
            skipped: true,
            mappings: BTreeMap::new(),
        }
    }

    fn from_job(
        job_name: &str,
        cycle_id: Uuid,
        window: ExtractionWindow,
        snapshot: &BatchJobSnapshot,
    ) -> Self {
        Self {
            job_name: job_name.to_string(),
            cycle_id,
            window: Some(window),
            job_status: Some(snapshot.status),
            extracted: snapshot.total,
            upserted: snapshot.loaded(),
            errors: snapshot.failed(),
            skipped: false,
            mappings: snapshot.mappings(),
        }
    }

    pub fn is_success(&self) -> bool {
        !self.skipped && self.job_status == Some(JobStatus::Completed)
    }
}

/// One trigger → extract → load pass, guarded by the job's watermark lock.
#[derive(Clone)]
pub struct SyncCycle {
    job_name: String,
    sync_repo: Arc<dyn SyncWatermarkRepository>,
    policy: WatermarkPolicy,
    extractor: Extractor,
    runner: BatchJobRunner,
    batch_poll: PollSpec,
}

impl SyncCycle {
    pub fn new(
        job_name: &str,
        sync_repo: Arc<dyn SyncWatermarkRepository>,
        policy: WatermarkPolicy,
        extractor: Extractor,
        runner: BatchJobRunner,
    ) -> Self {
        Self {
            job_name: job_name.to_string(),
            sync_repo,
            policy,
            extractor,
            runner,
            batch_poll: PollSpec::batch(),
        }
    }

    pub fn with_batch_poll(mut self, spec: PollSpec) -> Self {
        self.batch_poll = spec;
        self
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn policy(&self) -> WatermarkPolicy {
        self.policy
    }

    pub fn runner(&self) -> &BatchJobRunner {
        &self.runner
    }

    pub async fn run(&self) -> ProdsyncResult<SyncResult> {
        self.run_notifying(|_| {}).await
    }

    /// Like [`run`](Self::run), calling `on_submitted` as soon as the batch
    /// job is submitted, before waiting for it to terminate.
    pub async fn run_notifying<F>(&self, on_submitted: F) -> ProdsyncResult<SyncResult>
    where
        F: FnOnce(&BatchJobHandle) + Send,
    {
        let cycle_id = Uuid::new_v4();

        // Ensure watermark row exists
        self.sync_repo.get_or_create(&self.job_name).await?;

        let watermark = match self.sync_repo.acquire_lock(&self.job_name).await? {
            Some(wm) => wm,
            None => {
                tracing::info!(job = %self.job_name, "sync cycle already running, skipping");
                return Ok(SyncResult::skipped(&self.job_name, cycle_id));
            }
        };

        let window = self.policy.window(watermark.watermark_at, Utc::now());
        tracing::info!(
            job = %self.job_name,
            %cycle_id,
            from = %window.from,
            until = %window.until,
            "sync cycle started"
        );

        let snapshot = match self.extract_and_load(&window, on_submitted).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(job = %self.job_name, %cycle_id, error = %e, "sync cycle failed");
                let marked = self
                    .sync_repo
                    .mark_failed(watermark.id, &e.to_string(), window.from)
                    .await;
                if let Err(mark_err) = marked {
                    tracing::warn!(error = %mark_err, "failed to record sync failure");
                }
                return Err(e);
            }
        };

        if snapshot.status == JobStatus::Completed {
            self.sync_repo
                .mark_completed(watermark.id, window.until)
                .await?;
        } else {
            let msg = format!(
                "{} of {} records failed to load",
                snapshot.failed(),
                snapshot.total
            );
            self.sync_repo
                .mark_failed(watermark.id, &msg, window.from)
                .await?;
        }

        let result = SyncResult::from_job(&self.job_name, cycle_id, window, &snapshot);
        tracing::info!(
            job = %self.job_name,
            %cycle_id,
            extracted = result.extracted,
            upserted = result.upserted,
            errors = result.errors,
            "sync cycle finished"
        );
        Ok(result)
    }

    async fn extract_and_load<F>(
        &self,
        window: &ExtractionWindow,
        on_submitted: F,
    ) -> ProdsyncResult<BatchJobSnapshot>
    where
        F: FnOnce(&BatchJobHandle) + Send,
    {
        let records = self.extractor.extract(window).await?;
        let handle = self.runner.submit(records);
        on_submitted(&handle);

        match handle.await_termination(self.batch_poll).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                // the lock is released after this returns; no write may outlive it
                handle.abort().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchJobTracker;
    use crate::record::ProductRecord;
    use crate::testing::{InMemorySource, InMemoryTarget};
    use chrono::Duration;
    use prodsync_common::error::ProdsyncError;
    use prodsync_db::sync::memory_repository::InMemorySyncRepository;

    struct Fixture {
        source: InMemorySource,
        target: InMemoryTarget,
        repo: InMemorySyncRepository,
        cycle: SyncCycle,
    }

    fn fixture() -> Fixture {
        let source = InMemorySource::new();
        let target = InMemoryTarget::new();
        let repo = InMemorySyncRepository::new();
        let cycle = SyncCycle::new(
            "product-sync",
            Arc::new(repo.clone()),
            WatermarkPolicy::new(
                std::time::Duration::from_secs(300),
                std::time::Duration::from_secs(10),
            )
            .unwrap(),
            Extractor::new(Arc::new(source.clone())),
            BatchJobRunner::new(Arc::new(target.clone()), 100, BatchJobTracker::new()),
        )
        .with_batch_poll(PollSpec::new(
            std::time::Duration::from_millis(5),
            std::time::Duration::from_secs(2),
        ));
        Fixture {
            source,
            target,
            repo,
            cycle,
        }
    }

    fn aged(name: &str, seconds_ago: i64) -> ProductRecord {
        ProductRecord {
            last_modified: Some(Utc::now() - Duration::seconds(seconds_ago)),
            ..ProductRecord::named(name)
        }
    }

    async fn stored_watermark(repo: &InMemorySyncRepository) -> Option<chrono::DateTime<Utc>> {
        repo.get_or_create("product-sync").await.unwrap().watermark_at
    }

    #[tokio::test]
    async fn loads_settled_records_and_advances_watermark() {
        let fx = fixture();
        fx.source.seed(vec![aged("Settled", 60), aged("Fresh", 1)]);

        let result = fx.cycle.run().await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.extracted, 1);
        assert_eq!(result.upserted, 1);
        assert_eq!(result.mappings.len(), 1);
        let names: Vec<String> = fx.target.materials().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Settled"]);

        let window = result.window.unwrap();
        assert_eq!(stored_watermark(&fx.repo).await, Some(window.until));
    }

    #[tokio::test]
    async fn next_cycle_does_not_reload_synced_records() {
        let fx = fixture();
        fx.source.seed(vec![aged("Once", 60)]);

        fx.cycle.run().await.unwrap();
        let second = fx.cycle.run().await.unwrap();

        assert_eq!(second.extracted, 0);
        assert_eq!(fx.target.upserts(), 1);
    }

    #[tokio::test]
    async fn failed_record_keeps_watermark() {
        let fx = fixture();
        fx.source.seed(vec![aged("Good", 60), aged("Bad", 50)]);
        fx.target.reject_name("Bad");

        let result = fx.cycle.run().await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.job_status, Some(JobStatus::Failed));
        assert_eq!(result.upserted, 1);
        assert_eq!(result.errors, 1);

        let row = fx.repo.get_or_create("product-sync").await.unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.watermark_at, result.window.map(|w| w.from));
    }

    #[tokio::test]
    async fn failed_first_window_is_retried() {
        let fx = fixture();
        fx.source.seed(vec![aged("Retry", 50)]);
        fx.target.reject_name("Retry");

        let first = fx.cycle.run().await.unwrap();
        assert!(!first.is_success());
        assert_eq!(first.extracted, 1);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        fx.target.accept_name("Retry");
        let second = fx.cycle.run().await.unwrap();

        assert!(second.is_success());
        assert_eq!(second.window.unwrap().from, first.window.unwrap().from);
        assert_eq!(second.upserted, 1);
        let names: Vec<String> = fx.target.materials().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Retry"]);
    }

    #[tokio::test]
    async fn batch_timeout_stops_the_job_before_releasing_the_lock() {
        let fx = fixture();
        fx.source.seed(vec![aged("Slow1", 60), aged("Slow2", 55), aged("Slow3", 50)]);
        fx.target.delay_upserts(std::time::Duration::from_millis(100));
        let cycle = fx.cycle.clone().with_batch_poll(PollSpec::new(
            std::time::Duration::from_millis(5),
            std::time::Duration::from_millis(30),
        ));

        let err = cycle.run().await.unwrap_err();
        assert!(err.is_timeout(), "got: {err}");
        let row = fx.repo.get_or_create("product-sync").await.unwrap();
        assert_eq!(row.status, "failed");

        let jobs = cycle.runner().tracker().snapshots();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Aborted);

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(fx.target.upserts(), 0);
    }

    #[tokio::test]
    async fn extraction_error_is_returned_and_recorded() {
        let fx = fixture();
        fx.source.fail_queries("INVALID_SESSION_ID");

        let err = fx.cycle.run().await.unwrap_err();
        assert!(matches!(err, ProdsyncError::Source(_)));

        let row = fx.repo.get_or_create("product-sync").await.unwrap();
        assert_eq!(row.status, "failed");
        assert!(row.error_message.unwrap().contains("INVALID_SESSION_ID"));
    }

    #[tokio::test]
    async fn skips_when_lock_is_held() {
        let fx = fixture();
        fx.repo.get_or_create("product-sync").await.unwrap();
        fx.repo.acquire_lock("product-sync").await.unwrap().unwrap();

        let result = fx.cycle.run().await.unwrap();
        assert!(result.skipped);
        assert!(!result.is_success());
        assert_eq!(fx.source.query_calls(), 0);
    }
}
