use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio::time::{sleep, Duration, Instant};

use health_tracking_cell::api::{DataPointSink, FetchPolicy, TimelineScheduler, VitalsSource};
use health_tracking_cell::{
    BloodPressure, MedicationJourney, Stage, TrackingEvent, VitalsFetchError, VitalsSnapshot,
};

/// Returns the same snapshot every call, except for the calls listed in `fail_on`.
struct ScriptedSource {
    vitals: VitalsSnapshot,
    fail_on: Vec<usize>,
    calls: AtomicUsize,
    latency: Duration,
    slow_calls: Vec<(usize, Duration)>,
}

impl ScriptedSource {
    fn returning(vitals: VitalsSnapshot) -> Self {
        Self {
            vitals,
            fail_on: Vec::new(),
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
            slow_calls: Vec::new(),
        }
    }

    fn failing_on(mut self, calls: &[usize]) -> Self {
        self.fail_on = calls.to_vec();
        self
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Overrides the latency of a single call.
    fn slow_on(mut self, call: usize, latency: Duration) -> Self {
        self.slow_calls.push((call, latency));
        self
    }
}

#[async_trait]
impl VitalsSource for ScriptedSource {
    async fn fetch_health_data(&self, _user_id: &str) -> Result<VitalsSnapshot, VitalsFetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self
            .slow_calls
            .iter()
            .find(|(slow, _)| *slow == call)
            .map_or(self.latency, |(_, latency)| *latency);
        if !latency.is_zero() {
            sleep(latency).await;
        }
        if self.fail_on.contains(&call) {
            return Err(VitalsFetchError::Unavailable(format!("call {} rejected", call)));
        }
        Ok(self.vitals.clone())
    }
}

type Recorded = Arc<Mutex<Vec<(TrackingEvent, Duration)>>>;

fn recording_sink(origin: Instant) -> (Arc<dyn DataPointSink>, Recorded) {
    let events: Recorded = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    let sink: Arc<dyn DataPointSink> = Arc::new(move |event: TrackingEvent| {
        events_clone.lock().unwrap().push((event, origin.elapsed()));
    });
    (sink, events)
}

fn heart_rate_only(bpm: f64) -> VitalsSnapshot {
    VitalsSnapshot {
        heart_rate: Some(bpm),
        ..Default::default()
    }
}

fn scheduler(source: ScriptedSource) -> TimelineScheduler {
    TimelineScheduler::new(Arc::new(source), FetchPolicy::default())
}

/// Timer deadlines round up to the next millisecond.
fn assert_fired_at(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual - expected < Duration::from_millis(5),
        "fired at {:?}, expected {:?}",
        actual,
        expected
    );
}

fn labels(events: &Recorded) -> Vec<Stage> {
    events.lock().unwrap().iter().map(|(e, _)| e.label()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_three_points_with_computed_timestamps() {
    let origin = Instant::now();
    let (sink, events) = recording_sink(origin);
    let start_time = 1_700_000_000_000;

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(72.0)))
        .start_health_tracking(MedicationJourney::new("Amoxicillin", 30.0, 90.0, start_time), sink, "user-1")
        .await;
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.emitted, vec![Stage::Start, Stage::HalfLife, Stage::FullLife]);
    assert!(outcome.failed.is_empty());
    assert!(!outcome.cancelled);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);

    let timestamps: Vec<i64> = events.iter().map(|(e, _)| e.timestamp()).collect();
    assert_eq!(
        timestamps,
        vec![start_time, start_time + 30 * 60_000, start_time + 90 * 60_000]
    );

    assert_fired_at(events[0].1, Duration::ZERO);
    assert_fired_at(events[1].1, Duration::from_secs(30 * 60));
    assert_fired_at(events[2].1, Duration::from_secs(90 * 60));
}

#[tokio::test(start_paused = true)]
async fn test_delays_ignore_journey_start_time() {
    let origin = Instant::now();
    let (sink, events) = recording_sink(origin);

    // A start time far in the past must not shorten the delays.
    let handle = scheduler(ScriptedSource::returning(heart_rate_only(72.0)))
        .start_health_tracking(MedicationJourney::new("X", 1.0, 2.0, 0), sink, "user-1")
        .await;
    handle.wait().await.unwrap();

    let events = events.lock().unwrap();
    assert_fired_at(events[1].1, Duration::from_secs(60));
    assert_eq!(events[1].0.timestamp(), 60_000);
    assert_fired_at(events[2].1, Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_start_is_emitted_before_returning() {
    let (sink, events) = recording_sink(Instant::now());

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(72.0)))
        .start_health_tracking(MedicationJourney::new("X", 0.0, 5.0, 1000), sink, "user-1")
        .await;

    assert_eq!(labels(&events), vec![Stage::Start]);
    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_zero_half_life_fires_on_next_tick() {
    let (sink, events) = recording_sink(Instant::now());

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(72.0)))
        .start_health_tracking(MedicationJourney::new("X", 0.0, 5.0, 1000), sink, "user-1")
        .await;

    sleep(Duration::from_secs(1)).await;
    assert_eq!(labels(&events), vec![Stage::Start, Stage::HalfLife]);
    assert!(!handle.is_finished());

    handle.wait().await.unwrap();
    assert_eq!(labels(&events), vec![Stage::Start, Stage::HalfLife, Stage::FullLife]);
}

#[tokio::test(start_paused = true)]
async fn test_delay_order_wins_over_label_order() {
    let origin = Instant::now();
    let (sink, events) = recording_sink(origin);

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(72.0)))
        .start_health_tracking(MedicationJourney::new("X", 10.0, 5.0, 0), sink, "user-1")
        .await;
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.emitted, vec![Stage::Start, Stage::FullLife, Stage::HalfLife]);

    let events = events.lock().unwrap();
    assert_eq!(events[1].0.timestamp(), 5 * 60_000);
    assert_fired_at(events[1].1, Duration::from_secs(5 * 60));
    assert_eq!(events[2].0.timestamp(), 10 * 60_000);
}

#[tokio::test(start_paused = true)]
async fn test_zero_delays_keep_scheduling_order() {
    let (sink, events) = recording_sink(Instant::now());

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(70.0)))
        .start_health_tracking(MedicationJourney::new("X", 0.0, 0.0, 1000), sink, "user-1")
        .await;
    handle.wait().await.unwrap();

    let events = events.lock().unwrap();
    let emitted: Vec<(Stage, i64, Option<f64>)> = events
        .iter()
        .map(|(event, _)| match event {
            TrackingEvent::DataPoint(point) => (point.label, point.timestamp, point.vitals.heart_rate),
            other => panic!("unexpected event {:?}", other),
        })
        .collect();

    assert_eq!(
        emitted,
        vec![
            (Stage::Start, 1000, Some(70.0)),
            (Stage::HalfLife, 1000, Some(70.0)),
            (Stage::FullLife, 1000, Some(70.0)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_half_life_fetch_does_not_hold_back_full_life() {
    let origin = Instant::now();
    let (sink, events) = recording_sink(origin);

    // Half-life is due at 60s but its fetch takes 8s; full-life is due at 63s.
    let source = ScriptedSource::returning(heart_rate_only(70.0)).slow_on(1, Duration::from_secs(8));
    let handle = scheduler(source)
        .start_health_tracking(MedicationJourney::new("X", 1.0, 1.05, 0), sink, "user-1")
        .await;
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.emitted, vec![Stage::Start, Stage::FullLife, Stage::HalfLife]);

    let events = events.lock().unwrap();
    assert_eq!(events[1].0.label(), Stage::FullLife);
    assert_fired_at(events[1].1, Duration::from_secs(63));
    assert_eq!(events[2].0.label(), Stage::HalfLife);
    assert_eq!(events[2].0.timestamp(), 60_000);
    assert_fired_at(events[2].1, Duration::from_secs(68));
}

#[tokio::test(start_paused = true)]
async fn test_retrying_stage_does_not_hold_back_later_stage() {
    let origin = Instant::now();
    let (sink, events) = recording_sink(origin);
    let policy = FetchPolicy {
        timeout: Duration::from_secs(10),
        max_attempts: 3,
        retry_delay: Duration::from_secs(5),
    };

    // Half-life (due at 60s) fails twice then succeeds at 70s.
    let source = ScriptedSource::returning(heart_rate_only(70.0)).failing_on(&[1, 2]);
    let handle = TimelineScheduler::new(Arc::new(source), policy)
        .start_health_tracking(MedicationJourney::new("X", 1.0, 1.1, 0), sink, "user-1")
        .await;
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.emitted, vec![Stage::Start, Stage::FullLife, Stage::HalfLife]);
    assert!(outcome.failed.is_empty());

    let events = events.lock().unwrap();
    assert_fired_at(events[1].1, Duration::from_secs(66));
    assert_fired_at(events[2].1, Duration::from_secs(70));
}

#[tokio::test(start_paused = true)]
async fn test_negative_offsets_fire_immediately() {
    let origin = Instant::now();
    let (sink, events) = recording_sink(origin);

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(70.0)))
        .start_health_tracking(MedicationJourney::new("X", -3.0, -1.0, 1_000_000), sink, "user-1")
        .await;
    handle.wait().await.unwrap();

    let events = events.lock().unwrap();
    for (_, at) in events.iter() {
        assert_fired_at(*at, Duration::ZERO);
    }
    assert_eq!(events[1].0.timestamp(), 1_000_000 - 3 * 60_000);
    assert_eq!(events[2].0.timestamp(), 1_000_000 - 60_000);
}

#[tokio::test(start_paused = true)]
async fn test_optional_vitals_pass_through_untouched() {
    let vitals = VitalsSnapshot {
        heart_rate: None,
        blood_pressure: Some(BloodPressure { systolic: 121.0, diastolic: 79.0 }),
        temperature: None,
        oxygen_saturation: Some(97.0),
    };
    let (sink, events) = recording_sink(Instant::now());

    let handle = scheduler(ScriptedSource::returning(vitals.clone()))
        .start_health_tracking(MedicationJourney::new("X", 1.0, 2.0, 0), sink, "user-1")
        .await;
    handle.wait().await.unwrap();

    for (event, _) in events.lock().unwrap().iter() {
        assert_matches!(event, TrackingEvent::DataPoint(point) if point.vitals == vitals);
    }
}

#[tokio::test(start_paused = true)]
async fn test_half_life_failure_is_reported_and_others_still_fire() {
    let (sink, events) = recording_sink(Instant::now());

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(70.0)).failing_on(&[1]))
        .start_health_tracking(MedicationJourney::new("X", 1.0, 2.0, 0), sink, "user-1")
        .await;
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.emitted, vec![Stage::Start, Stage::FullLife]);
    assert_eq!(outcome.failed, vec![Stage::HalfLife]);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert_matches!(&events[0].0, TrackingEvent::DataPoint(p) if p.label == Stage::Start);
    assert_matches!(
        &events[1].0,
        TrackingEvent::StageFailed { label: Stage::HalfLife, timestamp: 60_000, error }
            if error.contains("call 1 rejected")
    );
    assert_matches!(&events[2].0, TrackingEvent::DataPoint(p) if p.label == Stage::FullLife);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_does_not_stop_the_timeline() {
    let (sink, events) = recording_sink(Instant::now());

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(70.0)).failing_on(&[0]))
        .start_health_tracking(MedicationJourney::new("X", 1.0, 2.0, 0), sink, "user-1")
        .await;
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.failed, vec![Stage::Start]);
    assert_eq!(outcome.emitted, vec![Stage::HalfLife, Stage::FullLife]);
    assert!(events.lock().unwrap()[0].0.is_failure());
}

#[tokio::test(start_paused = true)]
async fn test_slow_source_times_out() {
    let (sink, events) = recording_sink(Instant::now());
    let policy = FetchPolicy {
        timeout: Duration::from_secs(1),
        ..FetchPolicy::default()
    };
    let source = ScriptedSource::returning(heart_rate_only(70.0)).with_latency(Duration::from_secs(30));

    let handle = TimelineScheduler::new(Arc::new(source), policy)
        .start_health_tracking(MedicationJourney::new("X", 1.0, 2.0, 0), sink, "user-1")
        .await;
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.failed, vec![Stage::Start, Stage::HalfLife, Stage::FullLife]);
    assert_matches!(
        &events.lock().unwrap()[0].0,
        TrackingEvent::StageFailed { error, .. } if error.contains("timed out after 1000 ms")
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_pending_stages() {
    let (sink, events) = recording_sink(Instant::now());

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(70.0)))
        .start_health_tracking(MedicationJourney::new("X", 10.0, 20.0, 0), sink, "user-1")
        .await;

    sleep(Duration::from_secs(60)).await;
    handle.cancel();
    let outcome = handle.wait().await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.emitted, vec![Stage::Start]);

    sleep(Duration::from_secs(30 * 60)).await;
    assert_eq!(labels(&events), vec![Stage::Start]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_between_stages() {
    let (sink, events) = recording_sink(Instant::now());

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(70.0)))
        .start_health_tracking(MedicationJourney::new("X", 1.0, 20.0, 0), sink, "user-1")
        .await;

    sleep(Duration::from_secs(5 * 60)).await;
    handle.cancel();
    let outcome = handle.wait().await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.emitted, vec![Stage::Start, Stage::HalfLife]);
    assert_eq!(labels(&events), vec![Stage::Start, Stage::HalfLife]);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_handle_runs_to_completion() {
    let (sink, events) = recording_sink(Instant::now());

    let handle = scheduler(ScriptedSource::returning(heart_rate_only(70.0)))
        .start_health_tracking(MedicationJourney::new("X", 1.0, 2.0, 0), sink, "user-1")
        .await;
    drop(handle);

    sleep(Duration::from_secs(3 * 60)).await;
    assert_eq!(labels(&events), vec![Stage::Start, Stage::HalfLife, Stage::FullLife]);
}
