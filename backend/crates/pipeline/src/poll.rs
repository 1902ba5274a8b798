use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use prodsync_common::error::{ProdsyncError, ProdsyncResult};

/// How often to probe and how long to keep trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSpec {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Waiting for a triggered cycle: every second, up to a minute.
    pub const fn cycle() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    /// Waiting for a batch job to terminate: every 500ms, up to two minutes.
    pub const fn batch() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(120))
    }

    /// Waiting for the target to show a loaded record.
    pub const fn verify() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Probe until it yields `Some`, sleeping `spec.interval` between attempts.
///
/// The probe always runs at least once. Probe errors are returned as-is; running
/// out of time yields [`ProdsyncError::Timeout`] naming `what`.
pub async fn await_condition<T, F, Fut>(
    what: &str,
    spec: PollSpec,
    mut probe: F,
) -> ProdsyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProdsyncResult<Option<T>>>,
{
    let started = Instant::now();
    let deadline = started + spec.timeout;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        if let Some(value) = probe().await? {
            tracing::debug!(what, attempts, "condition met");
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(
                what,
                attempts,
                timeout_ms = spec.timeout.as_millis() as u64,
                "condition not met before deadline"
            );
            return Err(ProdsyncError::Timeout {
                what: what.to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }

        tokio::time::sleep(spec.interval.min(deadline - now)).await;
    }
}
