use std::sync::Arc;

use crate::connector::TargetSystem;
use crate::poll::{await_condition, PollSpec};
use crate::record::MaterialRecord;
use prodsync_common::error::{ProdsyncError, ProdsyncResult};

/// Confirms that loaded records are visible in the target.
#[derive(Clone)]
pub struct Verifier {
    target: Arc<dyn TargetSystem>,
}

impl Verifier {
    pub fn new(target: Arc<dyn TargetSystem>) -> Self {
        Self { target }
    }

    /// Poll the target by name until at least `expected_count` records show up.
    pub async fn await_record(
        &self,
        name: &str,
        expected_count: usize,
        spec: PollSpec,
    ) -> ProdsyncResult<Vec<MaterialRecord>> {
        let what = format!("'{name}' to appear in {}", self.target.system_name());
        let target = &self.target;
        await_condition(&what, spec, move || async move {
            let found = target.find_by_name(name).await?;
            Ok((found.len() >= expected_count).then_some(found))
        })
        .await
    }

    /// Exactly one record, carrying `expected_name`.
    pub fn assert_matches(
        records: &[MaterialRecord],
        expected_name: &str,
    ) -> ProdsyncResult<MaterialRecord> {
        let [record] = records else {
            return Err(ProdsyncError::verification(
                "the product should have been synced exactly once",
                1,
                records.len(),
            ));
        };
        if record.name != expected_name {
            return Err(ProdsyncError::verification(
                "the material name should match the product name",
                expected_name,
                &record.name,
            ));
        }
        Ok(record.clone())
    }

    /// Wait for `name` to land in the target and check it landed once.
    ///
    /// Only called once the batch job reported success, so a record that never
    /// shows up is reported as a verification failure rather than a timeout.
    pub async fn verify_synced(
        &self,
        name: &str,
        spec: PollSpec,
    ) -> ProdsyncResult<MaterialRecord> {
        let records = match self.await_record(name, 1, spec).await {
            Ok(records) => records,
            Err(e) if e.is_timeout() => self.target.find_by_name(name).await?,
            Err(e) => return Err(e),
        };

        for record in &records {
            tracing::info!(
                target_system = self.target.system_name(),
                name = %record.name,
                material_number = ?record.material_number,
                "found material in target"
            );
        }

        Self::assert_matches(&records, name)
    }
}
