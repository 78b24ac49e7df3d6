// =====================================================================================
// MEDICATION TIMELINE SCHEDULER
// =====================================================================================

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use shared_config::AppConfig;

use crate::error::{TrackingError, VitalsFetchError};
use crate::models::{HealthDataPoint, MedicationJourney, Stage, TrackingEvent, VitalsSnapshot};
use crate::services::sink::DataPointSink;
use crate::services::vitals::VitalsSource;

/// Longest delay a stage can be scheduled with.
pub const MAX_STAGE_DELAY: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// How a single stage talks to the vitals source.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Total attempts per stage, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 1,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl FetchPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.vitals_fetch_timeout_seconds),
            max_attempts: config.vitals_fetch_max_attempts.max(1),
            retry_delay: Duration::from_millis(config.vitals_retry_delay_ms),
        }
    }
}

/// Converts a stage offset in minutes into a timer delay. Zero, negative
/// and NaN offsets fire immediately.
pub fn stage_delay(minutes: f64) -> Duration {
    if !(minutes > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(minutes * 60.0)
        .unwrap_or(MAX_STAGE_DELAY)
        .min(MAX_STAGE_DELAY)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingOutcome {
    /// Stages delivered as data points, in emission order.
    pub emitted: Vec<Stage>,
    /// Stages delivered as failures, in emission order.
    pub failed: Vec<Stage>,
    pub cancelled: bool,
}

impl TrackingOutcome {
    fn record(&mut self, event: &TrackingEvent) {
        if event.is_failure() {
            self.failed.push(event.label());
        } else {
            self.emitted.push(event.label());
        }
    }
}

/// Control over a running journey. Dropping the handle leaves the journey
/// running to completion; call [`TrackingHandle::cancel`] to stop it.
#[derive(Debug)]
pub struct TrackingHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<TrackingOutcome>,
}

impl TrackingHandle {
    /// Stops every stage that has not been emitted yet.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<TrackingOutcome, TrackingError> {
        self.task.await.map_err(|e| {
            error!("Tracking task ended abnormally: {}", e);
            TrackingError::Aborted(e.to_string())
        })
    }
}

pub struct TimelineScheduler {
    source: Arc<dyn VitalsSource>,
    policy: FetchPolicy,
}

impl TimelineScheduler {
    pub fn new(source: Arc<dyn VitalsSource>, policy: FetchPolicy) -> Self {
        Self { source, policy }
    }

    pub fn from_config(source: Arc<dyn VitalsSource>, config: &AppConfig) -> Self {
        Self::new(source, FetchPolicy::from_config(config))
    }

    /// Emits the start stage, then schedules half-life and full-life
    /// relative to now. `journey.start_time` only stamps the emitted points.
    ///
    /// Each timed stage fetches at its own deadline and is emitted as soon
    /// as its fetch resolves, so a slow stage never holds back the other.
    /// Fetch failures never abort the journey: they reach the sink as
    /// [`TrackingEvent::StageFailed`] and the remaining stages still fire.
    #[instrument(skip(self, journey, sink), fields(medicine = %journey.medicine_name))]
    pub async fn start_health_tracking(
        &self,
        journey: MedicationJourney,
        sink: Arc<dyn DataPointSink>,
        user_id: &str,
    ) -> TrackingHandle {
        let runner = StageRunner {
            source: self.source.clone(),
            policy: self.policy.clone(),
            journey: Arc::new(journey),
            user_id: Arc::from(user_id),
        };
        let mut outcome = TrackingOutcome::default();

        let start = runner.clone().run(Stage::Start).await;
        outcome.record(&start);
        sink.emit(start);

        let scheduled_at = Instant::now();
        let mut pending: Vec<(Stage, Instant)> = [Stage::HalfLife, Stage::FullLife]
            .into_iter()
            .map(|stage| (stage, scheduled_at + stage_delay(stage.offset_minutes(&runner.journey))))
            .collect();
        // Stable: equal deadlines keep half-life ahead of full-life.
        pending.sort_by_key(|(_, deadline)| *deadline);

        let mut due: Vec<(Instant, Vec<Stage>)> = Vec::new();
        for (stage, deadline) in pending {
            debug!(
                "Scheduling {} in {:?}",
                stage,
                deadline.saturating_duration_since(scheduled_at)
            );
            match due.last_mut() {
                Some((at, stages)) if *at == deadline => stages.push(stage),
                _ => due.push((deadline, vec![stage])),
            }
        }

        let steps: FuturesUnordered<BoxFuture<'static, Step>> = due
            .into_iter()
            .map(|(deadline, stages)| {
                async move {
                    sleep_until(deadline).await;
                    Step::Due(stages)
                }
                .boxed()
            })
            .collect();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(drive(runner, steps, sink, cancel_rx, outcome));

        info!("Tracking journey for user {}", user_id);
        TrackingHandle { cancel_tx, task }
    }
}

/// Unit of work inside a running journey: a timer that came due, or a
/// stage whose fetch resolved.
enum Step {
    Due(Vec<Stage>),
    Done(TrackingEvent),
}

#[derive(Clone)]
struct StageRunner {
    source: Arc<dyn VitalsSource>,
    policy: FetchPolicy,
    journey: Arc<MedicationJourney>,
    user_id: Arc<str>,
}

impl StageRunner {
    async fn run(self, stage: Stage) -> TrackingEvent {
        let timestamp = self.journey.timestamp_for(stage);

        match fetch_with_policy(self.source.as_ref(), &self.policy, &self.user_id).await {
            Ok(vitals) => {
                debug!("Stage {} captured for user {}", stage, self.user_id);
                TrackingEvent::DataPoint(HealthDataPoint {
                    timestamp,
                    label: stage,
                    vitals,
                })
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, "Vitals fetch failed for user {}", self.user_id);
                TrackingEvent::StageFailed {
                    label: stage,
                    timestamp,
                    error: e.to_string(),
                }
            }
        }
    }
}

async fn fetch_with_policy(
    source: &dyn VitalsSource,
    policy: &FetchPolicy,
    user_id: &str,
) -> Result<VitalsSnapshot, VitalsFetchError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match timeout(policy.timeout, source.fetch_health_data(user_id)).await {
            Ok(result) => result,
            Err(_) => Err(VitalsFetchError::Timeout {
                timeout_ms: policy.timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(vitals) => return Ok(vitals),
            Err(e) if attempt < max_attempts => {
                debug!("Attempt {}/{} failed: {}, retrying", attempt, max_attempts, e);
                sleep(policy.retry_delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn drive(
    runner: StageRunner,
    mut steps: FuturesUnordered<BoxFuture<'static, Step>>,
    sink: Arc<dyn DataPointSink>,
    cancel_rx: watch::Receiver<bool>,
    mut outcome: TrackingOutcome,
) -> TrackingOutcome {
    let cancelled = wait_for_cancel(cancel_rx);
    tokio::pin!(cancelled);

    loop {
        tokio::select! {
            biased;
            _ = &mut cancelled => {
                info!("Journey cancelled with {} step(s) pending", steps.len());
                outcome.cancelled = true;
                break;
            }
            next = steps.next() => match next {
                // Fetches pushed together are first polled in push order.
                Some(Step::Due(stages)) => {
                    for stage in stages {
                        steps.push(runner.clone().run(stage).map(Step::Done).boxed());
                    }
                }
                Some(Step::Done(event)) => {
                    outcome.record(&event);
                    sink.emit(event);
                }
                None => break,
            },
        }
    }

    outcome
}

async fn wait_for_cancel(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Handle dropped without cancelling.
            std::future::pending::<()>().await;
        }
    }
}
