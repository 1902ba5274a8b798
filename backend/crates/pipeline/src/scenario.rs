//! End-to-end propagation check.
//!
//! Inserts a uniquely named product in the source, fires one sync cycle,
//! waits for the batch job, confirms the material landed in the target and
//! removes the product from both systems. The phases share an explicit
//! [`ScenarioContext`] instead of fixture state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::batch::BatchJobTracker;
use crate::cleanup::{Cleanup, CleanupReport};
use crate::connector::{SourceSystem, TargetSystem};
use crate::poll::{await_condition, PollSpec};
use crate::record::{MaterialRecord, ProductRecord};
use crate::trigger::{CycleEvent, CycleListener, Trigger};
use crate::verify::Verifier;
use prodsync_common::error::{ProdsyncError, ProdsyncResult};

pub const PRODUCT_NAME_PREFIX: &str = "Product Test Name";

/// State carried from setup through run to teardown.
pub struct ScenarioContext {
    pub product: ProductRecord,
    listener: CycleListener,
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub material: MaterialRecord,
    pub cleanup: CleanupReport,
}

pub struct BusinessScenario {
    trigger: Trigger,
    source: Arc<dyn SourceSystem>,
    tracker: BatchJobTracker,
    verifier: Verifier,
    cleanup: Cleanup,
    cycle_poll: PollSpec,
    batch_poll: PollSpec,
    verify_poll: PollSpec,
}

impl BusinessScenario {
    pub fn new(
        trigger: Trigger,
        source: Arc<dyn SourceSystem>,
        target: Arc<dyn TargetSystem>,
    ) -> Self {
        let tracker = trigger.cycle().runner().tracker().clone();
        Self {
            verifier: Verifier::new(Arc::clone(&target)),
            cleanup: Cleanup::new(Arc::clone(&source), target),
            trigger,
            source,
            tracker,
            cycle_poll: PollSpec::cycle(),
            batch_poll: PollSpec::batch(),
            verify_poll: PollSpec::verify(),
        }
    }

    pub fn with_polls(mut self, cycle: PollSpec, batch: PollSpec, verify: PollSpec) -> Self {
        self.cycle_poll = cycle;
        self.batch_poll = batch;
        self.verify_poll = verify;
        self
    }

    /// Stop recurring polling, start listening and insert the test product.
    ///
    /// If the insert fails part way, whatever it left in the source under the
    /// product's name is deleted before the error is returned.
    pub async fn setup(&self) -> ProdsyncResult<ScenarioContext> {
        self.trigger.stop().await;
        let listener = CycleListener::new(&self.trigger);
        self.tracker.clear();

        let millis = Utc::now().timestamp_millis();
        let name = format!("{PRODUCT_NAME_PREFIX}{millis}");
        let product = ProductRecord {
            product_code: Some(format!("PT-{millis}")),
            description: Some("created by the propagation check".to_string()),
            ..ProductRecord::named(name.clone())
        };

        let created = match self.source.create_products(vec![product]).await {
            Ok(created) => created,
            Err(e) => {
                self.remove_partial_insert(&name).await;
                return Err(e);
            }
        };
        let product = created.into_iter().next().ok_or_else(|| {
            ProdsyncError::Source("source returned no created product".to_string())
        })?;

        tracing::info!(
            id = ?product.id,
            name = %product.name,
            last_modified = ?product.last_modified,
            "test product inserted in source"
        );
        Ok(ScenarioContext { product, listener })
    }

    /// Fire one cycle and check that the product reached the target.
    pub async fn run(&self, ctx: &ScenarioContext) -> ProdsyncResult<MaterialRecord> {
        self.wait_until_settled(&ctx.product).await?;

        self.trigger.run_once();
        tracing::info!(trigger = self.trigger.name(), "waiting for the sync cycle to submit its batch");
        match ctx.listener.wait_for_batch(self.cycle_poll).await? {
            CycleEvent::Failed { run, error, .. } => {
                return Err(ProdsyncError::Internal(format!(
                    "sync cycle {run} failed: {error}"
                )));
            }
            CycleEvent::Completed { result, .. } if result.skipped => {
                return Err(ProdsyncError::Scheduler(
                    "sync cycle was skipped because another one holds the lock".to_string(),
                ));
            }
            CycleEvent::BatchSubmitted { job_id, records, .. } => {
                tracing::info!(%job_id, records, "batch job submitted")
            }
            _ => tracing::info!("sync cycle done"),
        }

        self.tracker.await_job_termination(self.batch_poll).await?;
        self.tracker.assert_job_was_successful()?;

        self.verifier
            .verify_synced(&ctx.product.name, self.verify_poll)
            .await
    }

    /// Stop polling and delete the test product from both systems.
    pub async fn teardown(&self, ctx: ScenarioContext) -> CleanupReport {
        self.trigger.stop().await;
        self.cleanup.run(&[ctx.product]).await
    }

    /// Setup, run and teardown. Teardown always happens; its failures are
    /// logged and never replace the outcome of the run.
    pub async fn execute(&self) -> ProdsyncResult<ScenarioReport> {
        let ctx = self.setup().await?;
        let outcome = self.run(&ctx).await;
        let cleanup = self.teardown(ctx).await;

        if !cleanup.is_clean() {
            tracing::warn!(failures = ?cleanup.failures, "cleanup left records behind");
        }
        outcome.map(|material| ScenarioReport { material, cleanup })
    }

    async fn remove_partial_insert(&self, name: &str) {
        let leftovers = match self.source.find_by_name(name).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(name, error = %e, "could not look up partially inserted product");
                return;
            }
        };
        if leftovers.is_empty() {
            return;
        }

        let report = self.cleanup.run(&leftovers).await;
        tracing::warn!(
            name,
            source_deleted = report.source_deleted,
            failures = ?report.failures,
            "removed product left behind by a failed insert"
        );
    }

    /// Wait until the product is older than the safety lag, so the next
    /// extraction window covers it.
    async fn wait_until_settled(&self, product: &ProductRecord) -> ProdsyncResult<()> {
        let Some(modified) = product.last_modified else {
            return Ok(());
        };
        let lag = self.trigger.cycle().policy().safety_lag();
        let spec = PollSpec::new(
            Duration::from_millis(100),
            lag.to_std().unwrap_or_default() + self.cycle_poll.timeout,
        );
        await_condition("test product to settle past the safety lag", spec, move || async move {
            Ok((Utc::now() - lag > modified).then_some(()))
        })
        .await
    }
}
