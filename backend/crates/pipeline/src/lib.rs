pub mod batch;
pub mod cleanup;
pub mod connector;
pub mod cycle;
pub mod extract;
pub mod poll;
pub mod record;
pub mod scenario;
pub mod trigger;
pub mod verify;
pub mod watermark;

#[cfg(test)]
mod testing;

use std::sync::{Mutex, MutexGuard};

pub use batch::{
    BatchJobHandle, BatchJobRunner, BatchJobSnapshot, BatchJobTracker, JobStatus, RecordOutcome,
};
pub use cleanup::{Cleanup, CleanupReport};
pub use connector::{SourceSystem, TargetSystem};
pub use cycle::{SyncCycle, SyncResult};
pub use extract::Extractor;
pub use poll::{await_condition, PollSpec};
pub use record::{MaterialRecord, ProductRecord};
pub use scenario::{BusinessScenario, ScenarioContext};
pub use trigger::{CycleEvent, CycleListener, Trigger};
pub use verify::Verifier;
pub use watermark::{ExtractionWindow, WatermarkPolicy};

/// Lock shared pipeline state, recovering it if a holder panicked.
pub(crate) fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
