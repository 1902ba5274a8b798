mod http;
mod salesforce;
mod sap;

use std::sync::Arc;

use anyhow::Context;
use prodsync_config::{init_tracing, AppConfig, RunMode};
use prodsync_db::sync::memory_repository::InMemorySyncRepository;
use prodsync_db::sync::pg_repository::PgSyncRepository;
use prodsync_db::sync::repositories::SyncWatermarkRepository;
use prodsync_pipeline::{
    BatchJobRunner, BatchJobTracker, BusinessScenario, Extractor, SourceSystem, SyncCycle,
    TargetSystem, Trigger, WatermarkPolicy,
};

use crate::salesforce::client::{SalesforceClient, SalesforceClientConfig};
use crate::sap::client::{SapClient, SapClientConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.log_level);

    tracing::info!(
        service = "prodsync-worker",
        job = %config.job_name,
        mode = ?config.mode,
        "starting"
    );

    let sync_repo: Arc<dyn SyncWatermarkRepository> = match &config.database_url {
        Some(url) => {
            let pool = prodsync_db::create_pool(url).await?;
            prodsync_db::ensure_schema(&pool).await?;
            Arc::new(PgSyncRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, watermark is kept in memory for this process");
            Arc::new(InMemorySyncRepository::new())
        }
    };

    let sf_config = SalesforceClientConfig::from_env()
        .map_err(anyhow::Error::msg)?
        .context("SALESFORCE_INSTANCE_URL and SALESFORCE_ACCESS_TOKEN must be set")?;
    let sap_config = SapClientConfig::from_env()
        .map_err(anyhow::Error::msg)?
        .context("SAP_BASE_URL, SAP_USER and SAP_PASSWORD must be set")?;

    let source: Arc<dyn SourceSystem> = Arc::new(
        SalesforceClient::new(sf_config).context("failed to build salesforce client")?,
    );
    let target: Arc<dyn TargetSystem> =
        Arc::new(SapClient::new(sap_config).context("failed to build sap client")?);

    let policy = WatermarkPolicy::new(
        config.watermark_default_offset(),
        config.watermark_safety_lag(),
    )?;
    let runner = BatchJobRunner::new(
        Arc::clone(&target),
        config.batch_block_size,
        BatchJobTracker::new(),
    );
    let cycle = SyncCycle::new(
        &config.job_name,
        sync_repo,
        policy,
        Extractor::new(Arc::clone(&source)),
        runner,
    );
    let trigger = Trigger::new(&config.job_name, config.poll_interval(), cycle);

    match config.mode {
        RunMode::Once => {
            let result = trigger.run_once_and_wait().await?;
            tracing::info!(
                extracted = result.extracted,
                upserted = result.upserted,
                errors = result.errors,
                skipped = result.skipped,
                "sync cycle finished"
            );
            if result.skipped {
                anyhow::bail!("sync cycle skipped, job '{}' is locked", result.job_name);
            }
            if !result.is_success() {
                anyhow::bail!(
                    "sync cycle did not succeed: {} of {} records failed",
                    result.errors,
                    result.extracted
                );
            }
        }
        RunMode::Recurring => {
            trigger.start()?;
            tracing::info!(
                interval_secs = config.poll_interval_secs,
                "polling started, press ctrl-c to stop"
            );
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            tracing::info!("shutting down");
            trigger.stop().await;
        }
        RunMode::Check => {
            let scenario = BusinessScenario::new(trigger, source, target);
            let report = scenario.execute().await?;
            tracing::info!(
                material_number = ?report.material.material_number,
                name = %report.material.name,
                cleanup_clean = report.cleanup.is_clean(),
                "product propagated to sap"
            );
        }
    }

    Ok(())
}
