use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::cycle::{SyncCycle, SyncResult};
use crate::lock;
use crate::poll::{await_condition, PollSpec};
use prodsync_common::error::{ProdsyncError, ProdsyncResult};

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications for cycles fired by a [`Trigger`].
#[derive(Debug, Clone)]
pub enum CycleEvent {
    Started {
        trigger: String,
        run: u64,
    },
    /// The cycle handed its records to a batch job and is now waiting on it.
    BatchSubmitted {
        trigger: String,
        run: u64,
        job_id: Uuid,
        records: usize,
    },
    Completed {
        trigger: String,
        run: u64,
        result: SyncResult,
    },
    Failed {
        trigger: String,
        run: u64,
        error: String,
    },
}

impl CycleEvent {
    pub fn run(&self) -> u64 {
        match self {
            Self::Started { run, .. }
            | Self::BatchSubmitted { run, .. }
            | Self::Completed { run, .. }
            | Self::Failed { run, .. } => *run,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

struct Recurring {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    name: String,
    interval: Duration,
    cycle: SyncCycle,
    events: broadcast::Sender<CycleEvent>,
    in_flight: AtomicBool,
    runs: AtomicU64,
    recurring: Mutex<Option<Recurring>>,
}

/// Clears the in-flight flag even if the cycle future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    /// Run one cycle unless another is in flight. `None` means skipped.
    async fn fire(&self) -> Option<ProdsyncResult<SyncResult>> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::info!(trigger = %self.name, "previous cycle still running, skipping tick");
            return None;
        }
        let _guard = InFlight(&self.in_flight);

        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        // no subscribers is fine
        let _ = self.events.send(CycleEvent::Started {
            trigger: self.name.clone(),
            run,
        });

        let outcome = self
            .cycle
            .run_notifying(|job| {
                let _ = self.events.send(CycleEvent::BatchSubmitted {
                    trigger: self.name.clone(),
                    run,
                    job_id: job.id(),
                    records: job.snapshot().total,
                });
            })
            .await;
        let event = match &outcome {
            Ok(result) => CycleEvent::Completed {
                trigger: self.name.clone(),
                run,
                result: result.clone(),
            },
            Err(e) => CycleEvent::Failed {
                trigger: self.name.clone(),
                run,
                error: e.to_string(),
            },
        };
        let _ = self.events.send(event);
        Some(outcome)
    }
}

/// Fires sync cycles on an interval or on demand.
#[derive(Clone)]
pub struct Trigger {
    inner: Arc<Inner>,
}

impl Trigger {
    pub fn new(name: &str, interval: Duration, cycle: SyncCycle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                interval,
                cycle,
                events,
                in_flight: AtomicBool::new(false),
                runs: AtomicU64::new(0),
                recurring: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn cycle(&self) -> &SyncCycle {
        &self.inner.cycle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_started(&self) -> bool {
        lock(&self.inner.recurring)
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Begin recurring mode. The first cycle fires immediately.
    pub fn start(&self) -> ProdsyncResult<()> {
        let mut recurring = lock(&self.inner.recurring);
        if recurring.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return Err(ProdsyncError::Scheduler(format!(
                "trigger '{}' is already started",
                self.inner.name
            )));
        }

        let (stop, mut stopped) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.fire().await;
                    }
                    _ = stopped.changed() => break,
                }
            }
            tracing::info!(trigger = %inner.name, "recurring trigger stopped");
        });

        tracing::info!(
            trigger = %self.inner.name,
            interval_secs = self.inner.interval.as_secs_f64(),
            "recurring trigger started"
        );
        *recurring = Some(Recurring { stop, task });
        Ok(())
    }

    /// Leave recurring mode, letting a cycle in progress finish. No-op if not started.
    pub async fn stop(&self) {
        let recurring = lock(&self.inner.recurring).take();
        if let Some(Recurring { stop, task }) = recurring {
            let _ = stop.send(true);
            if let Err(e) = task.await {
                tracing::warn!(
                    trigger = %self.inner.name,
                    error = %e,
                    "recurring task ended abnormally"
                );
            }
        }
    }

    /// Fire a single cycle in the background. Observe it through [`CycleListener`].
    pub fn run_once(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.fire().await;
        });
    }

    /// Run a single cycle and wait for its result.
    pub async fn run_once_and_wait(&self) -> ProdsyncResult<SyncResult> {
        match self.inner.fire().await {
            Some(outcome) => outcome,
            None => Err(ProdsyncError::Scheduler(format!(
                "trigger '{}' already has a cycle in progress",
                self.inner.name
            ))),
        }
    }
}

#[derive(Default)]
struct ListenerState {
    started: u64,
    finished: u64,
    last_finished: Option<CycleEvent>,
    /// Latest `BatchSubmitted`, `Completed` or `Failed` event.
    last_progress: Option<CycleEvent>,
}

/// Records cycles that start and finish after it subscribed.
pub struct CycleListener {
    trigger: String,
    events: Mutex<broadcast::Receiver<CycleEvent>>,
    state: Mutex<ListenerState>,
}

impl CycleListener {
    pub fn new(trigger: &Trigger) -> Self {
        Self {
            trigger: trigger.name().to_string(),
            events: Mutex::new(trigger.subscribe()),
            state: Mutex::new(ListenerState::default()),
        }
    }

    fn drain(&self) {
        let mut events = lock(&self.events);
        let mut state = lock(&self.state);
        loop {
            match events.try_recv() {
                Ok(CycleEvent::Started { .. }) => state.started += 1,
                Ok(event @ CycleEvent::BatchSubmitted { .. }) => {
                    state.last_progress = Some(event);
                }
                Ok(event) => {
                    state.finished += 1;
                    state.last_finished = Some(event.clone());
                    state.last_progress = Some(event);
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(trigger = %self.trigger, skipped, "cycle listener lagged");
                }
                Err(_) => break,
            }
        }
    }

    pub fn has_started(&self) -> bool {
        self.drain();
        lock(&self.state).started > 0
    }

    pub fn has_finished(&self) -> bool {
        self.drain();
        lock(&self.state).finished > 0
    }

    /// The most recent `Completed` or `Failed` event seen.
    pub fn last_finished(&self) -> Option<CycleEvent> {
        self.drain();
        lock(&self.state).last_finished.clone()
    }

    /// Forget what was observed so far.
    pub fn reset(&self) {
        self.drain();
        *lock(&self.state) = ListenerState::default();
    }

    /// Poll until a cycle has submitted its batch job or finished without one.
    ///
    /// Returns `BatchSubmitted` for a cycle that is still loading, otherwise
    /// its terminal event.
    pub async fn wait_for_batch(&self, spec: PollSpec) -> ProdsyncResult<CycleEvent> {
        let what = format!("trigger '{}' to submit a batch job", self.trigger);
        let listener = self;
        await_condition(&what, spec, move || async move {
            listener.drain();
            Ok(lock(&listener.state).last_progress.clone())
        })
        .await
    }

    /// Poll until a cycle has finished, returning its terminal event.
    pub async fn wait_for_cycle(&self, spec: PollSpec) -> ProdsyncResult<CycleEvent> {
        let what = format!("trigger '{}' to run a cycle", self.trigger);
        let listener = self;
        await_condition(&what, spec, move || async move { Ok(listener.last_finished()) }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchJobRunner, BatchJobTracker};
    use crate::extract::Extractor;
    use crate::record::ProductRecord;
    use crate::testing::{InMemorySource, InMemoryTarget};
    use crate::watermark::WatermarkPolicy;
    use chrono::Utc;
    use prodsync_db::sync::memory_repository::InMemorySyncRepository;

    fn fast() -> PollSpec {
        PollSpec::new(Duration::from_millis(5), Duration::from_secs(2))
    }

    fn trigger_with(source: InMemorySource, target: InMemoryTarget, interval: Duration) -> Trigger {
        let cycle = SyncCycle::new(
            "product-sync",
            Arc::new(InMemorySyncRepository::new()),
            WatermarkPolicy::new(Duration::from_secs(300), Duration::ZERO).unwrap(),
            Extractor::new(Arc::new(source)),
            BatchJobRunner::new(Arc::new(target), 100, BatchJobTracker::new()),
        )
        .with_batch_poll(fast());
        Trigger::new("triggerFlow", interval, cycle)
    }

    fn settled(name: &str) -> ProductRecord {
        ProductRecord {
            last_modified: Some(Utc::now() - chrono::Duration::seconds(5)),
            ..ProductRecord::named(name)
        }
    }

    #[tokio::test]
    async fn run_once_is_observable_through_listener() {
        let source = InMemorySource::new();
        source.seed(vec![settled("Observed")]);
        let target = InMemoryTarget::new();
        let trigger = trigger_with(source, target.clone(), Duration::from_secs(3600));

        let listener = CycleListener::new(&trigger);
        assert!(!listener.has_started());

        trigger.run_once();
        let event = listener.wait_for_cycle(fast()).await.unwrap();

        assert!(listener.has_started());
        assert!(listener.has_finished());
        assert_eq!(event.run(), 1);
        match event {
            CycleEvent::Completed { trigger, result, .. } => {
                assert_eq!(trigger, "triggerFlow");
                assert_eq!(result.upserted, 1);
            }
            other => panic!("expected Completed, got: {other:?}"),
        }
        assert_eq!(target.materials().len(), 1);
    }

    #[tokio::test]
    async fn failed_cycle_emits_failed_event() {
        let source = InMemorySource::new();
        source.fail_queries("INVALID_SESSION_ID");
        let trigger = trigger_with(source, InMemoryTarget::new(), Duration::from_secs(3600));
        let listener = CycleListener::new(&trigger);

        trigger.run_once();
        let event = listener.wait_for_cycle(fast()).await.unwrap();
        assert!(
            matches!(event, CycleEvent::Failed { ref error, .. } if error.contains("INVALID_SESSION_ID")),
            "got: {event:?}"
        );
    }

    #[tokio::test]
    async fn waiting_without_a_cycle_times_out() {
        let trigger = trigger_with(
            InMemorySource::new(),
            InMemoryTarget::new(),
            Duration::from_secs(3600),
        );
        let listener = CycleListener::new(&trigger);

        let spec = PollSpec::new(Duration::from_millis(5), Duration::from_millis(40));
        let err = listener.wait_for_cycle(spec).await.unwrap_err();
        assert!(err.is_timeout(), "got: {err}");
        assert!(!err.is_assertion());
    }

    #[tokio::test]
    async fn run_once_and_wait_returns_result() {
        let source = InMemorySource::new();
        source.seed(vec![settled("Direct")]);
        let trigger = trigger_with(source, InMemoryTarget::new(), Duration::from_secs(3600));

        let result = trigger.run_once_and_wait().await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.extracted, 1);
    }

    #[tokio::test]
    async fn recurring_mode_fires_until_stopped() {
        let source = InMemorySource::new();
        let trigger = trigger_with(source.clone(), InMemoryTarget::new(), Duration::from_millis(10));

        trigger.start().unwrap();
        assert!(trigger.is_started());
        assert!(trigger.start().is_err());

        let observed = &source;
        await_condition("two recurring cycles", fast(), move || async move {
            Ok((observed.query_calls() >= 2).then_some(()))
        })
        .await
        .unwrap();

        trigger.stop().await;
        assert!(!trigger.is_started());
        let calls = source.query_calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.query_calls(), calls);

        // stopping twice is harmless, and the trigger can be restarted
        trigger.stop().await;
        trigger.start().unwrap();
        trigger.stop().await;
    }

    #[tokio::test]
    async fn batch_submission_is_reported_before_the_load_finishes() {
        let source = InMemorySource::new();
        source.seed(vec![settled("Slow")]);
        let target = InMemoryTarget::new();
        target.delay_upserts(Duration::from_millis(300));
        let trigger = trigger_with(source, target.clone(), Duration::from_secs(3600));
        let listener = CycleListener::new(&trigger);

        trigger.run_once();
        let spec = PollSpec::new(Duration::from_millis(5), Duration::from_millis(100));
        let event = listener.wait_for_batch(spec).await.unwrap();

        assert!(
            matches!(event, CycleEvent::BatchSubmitted { records: 1, run: 1, .. }),
            "got: {event:?}"
        );
        assert!(!listener.has_finished());
        assert!(target.materials().is_empty());

        let done = listener.wait_for_cycle(fast()).await.unwrap();
        assert!(matches!(done, CycleEvent::Completed { .. }), "got: {done:?}");
        assert_eq!(target.materials().len(), 1);
    }

    #[tokio::test]
    async fn failed_extraction_ends_the_batch_wait() {
        let source = InMemorySource::new();
        source.fail_queries("INVALID_SESSION_ID");
        let trigger = trigger_with(source, InMemoryTarget::new(), Duration::from_secs(3600));
        let listener = CycleListener::new(&trigger);

        trigger.run_once();
        let event = listener.wait_for_batch(fast()).await.unwrap();
        assert!(matches!(event, CycleEvent::Failed { .. }), "got: {event:?}");
    }

    #[tokio::test]
    async fn listener_reset_forgets_previous_cycles() {
        let trigger = trigger_with(
            InMemorySource::new(),
            InMemoryTarget::new(),
            Duration::from_secs(3600),
        );
        let listener = CycleListener::new(&trigger);

        trigger.run_once_and_wait().await.unwrap();
        assert!(listener.has_finished());

        listener.reset();
        assert!(!listener.has_started());
        assert!(listener.last_finished().is_none());
    }
}
