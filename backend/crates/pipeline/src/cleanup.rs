use std::sync::Arc;

use serde::Serialize;

use crate::connector::{SourceSystem, TargetSystem};
use crate::record::ProductRecord;

/// What a cleanup pass managed to remove.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub target_deleted: usize,
    pub source_deleted: usize,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Best-effort removal of records created by a check from both systems.
#[derive(Clone)]
pub struct Cleanup {
    source: Arc<dyn SourceSystem>,
    target: Arc<dyn TargetSystem>,
}

impl Cleanup {
    pub fn new(source: Arc<dyn SourceSystem>, target: Arc<dyn TargetSystem>) -> Self {
        Self { source, target }
    }

    /// Delete `created` from the target (by name) and from the source (by id).
    ///
    /// Never fails: every error is logged and collected in the report, and a
    /// failure in one system does not stop the attempt on the other.
    pub async fn run(&self, created: &[ProductRecord]) -> CleanupReport {
        let mut report = CleanupReport::default();

        for product in created {
            match self.target.delete_by_name(&product.name).await {
                Ok(deleted) => report.target_deleted += deleted,
                Err(e) => {
                    tracing::warn!(
                        target_system = self.target.system_name(),
                        name = %product.name,
                        error = %e,
                        "failed to delete material during cleanup"
                    );
                    report
                        .failures
                        .push(format!("{}: {e}", self.target.system_name()));
                }
            }
        }

        let ids: Vec<String> = created.iter().filter_map(|p| p.id.clone()).collect();
        if !ids.is_empty() {
            match self.source.delete_products(&ids).await {
                Ok(deleted) => report.source_deleted += deleted,
                Err(e) => {
                    tracing::warn!(
                        source_system = self.source.system_name(),
                        ids = ?ids,
                        error = %e,
                        "failed to delete products during cleanup"
                    );
                    report
                        .failures
                        .push(format!("{}: {e}", self.source.system_name()));
                }
            }
        }

        tracing::info!(
            target_deleted = report.target_deleted,
            source_deleted = report.source_deleted,
            failures = report.failures.len(),
            "cleanup finished"
        );
        report
    }
}
