use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MILLIS_PER_MINUTE: f64 = 60_000.0;

// =====================================================================================
// JOURNEY AND DATA POINTS
// =====================================================================================

/// A dose of medication and the two follow-up sampling points after it.
///
/// Nothing here is validated: `0 < half_life < full_life` is expected but
/// a journey that breaks it still runs, just with a different emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationJourney {
    pub medicine_name: String,
    /// Minutes after the start stage.
    pub half_life: f64,
    /// Minutes after the start stage.
    pub full_life: f64,
    /// Epoch milliseconds, only used to stamp emitted points.
    pub start_time: i64,
}

impl MedicationJourney {
    pub fn new(medicine_name: impl Into<String>, half_life: f64, full_life: f64, start_time: i64) -> Self {
        Self {
            medicine_name: medicine_name.into(),
            half_life,
            full_life,
            start_time,
        }
    }

    /// Timestamp stamped on the point emitted for `stage`.
    pub fn timestamp_for(&self, stage: Stage) -> i64 {
        let offset = stage.offset_minutes(self) * MILLIS_PER_MINUTE;
        if offset.is_finite() {
            self.start_time.saturating_add(offset.round() as i64)
        } else {
            self.start_time
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Start,
    HalfLife,
    FullLife,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Start, Stage::HalfLife, Stage::FullLife];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::HalfLife => "half-life",
            Stage::FullLife => "full-life",
        }
    }

    pub fn offset_minutes(&self, journey: &MedicationJourney) -> f64 {
        match self {
            Stage::Start => 0.0,
            Stage::HalfLife => journey.half_life,
            Stage::FullLife => journey.full_life,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDataPoint {
    pub timestamp: i64,
    pub label: Stage,
    pub vitals: VitalsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BloodPressure {
    pub systolic: f64,
    pub diastolic: f64,
}

/// Point-in-time vitals. A source reports whatever it has; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<BloodPressure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oxygen_saturation: Option<f64>,
}

impl VitalsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none()
            && self.blood_pressure.is_none()
            && self.temperature.is_none()
            && self.oxygen_saturation.is_none()
    }

    /// Vitals that are present and outside their normal range.
    pub fn out_of_range(&self) -> Vec<VitalSign> {
        let mut flagged = Vec::new();

        if let Some(hr) = self.heart_rate {
            if !VitalSign::HeartRate.is_normal(hr) {
                flagged.push(VitalSign::HeartRate);
            }
        }
        if let Some(bp) = self.blood_pressure {
            if bp.systolic > SYSTOLIC_MAX || bp.diastolic > DIASTOLIC_MAX {
                flagged.push(VitalSign::BloodPressure);
            }
        }
        if let Some(spo2) = self.oxygen_saturation {
            if !VitalSign::OxygenLevel.is_normal(spo2) {
                flagged.push(VitalSign::OxygenLevel);
            }
        }
        if let Some(temp) = self.temperature {
            if !VitalSign::BodyTemperature.is_normal(temp) {
                flagged.push(VitalSign::BodyTemperature);
            }
        }

        flagged
    }
}

// =====================================================================================
// NORMAL RANGES
// =====================================================================================

const SYSTOLIC_MAX: f64 = 120.0;
const DIASTOLIC_MAX: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VitalSign {
    HeartRate,
    BloodPressure,
    OxygenLevel,
    BodyTemperature,
}

impl VitalSign {
    /// Inclusive normal range. Blood pressure is an upper bound on both
    /// readings, so its range is expressed on the systolic value only.
    pub fn normal_range(&self) -> (f64, f64) {
        match self {
            VitalSign::HeartRate => (60.0, 100.0),
            VitalSign::BloodPressure => (0.0, SYSTOLIC_MAX),
            VitalSign::OxygenLevel => (95.0, 100.0),
            VitalSign::BodyTemperature => (36.1, 37.2),
        }
    }

    pub fn is_normal(&self, value: f64) -> bool {
        let (min, max) = self.normal_range();
        value >= min && value <= max
    }
}

// =====================================================================================
// SINK EVENTS
// =====================================================================================

/// What the scheduler hands to a sink: either a completed stage or the
/// marker for a stage whose vitals could not be fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    DataPoint(HealthDataPoint),
    StageFailed {
        label: Stage,
        timestamp: i64,
        error: String,
    },
}

impl TrackingEvent {
    pub fn label(&self) -> Stage {
        match self {
            TrackingEvent::DataPoint(point) => point.label,
            TrackingEvent::StageFailed { label, .. } => *label,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            TrackingEvent::DataPoint(point) => point.timestamp,
            TrackingEvent::StageFailed { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TrackingEvent::StageFailed { .. })
    }
}

// =====================================================================================
// TRACKING SESSIONS
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Tracking,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailure {
    pub label: Stage,
    pub timestamp: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub id: Uuid,
    pub user_id: String,
    pub journey: MedicationJourney,
    pub data_points: Vec<HealthDataPoint>,
    pub failures: Vec<StageFailure>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl TrackingSession {
    pub fn is_tracking(&self) -> bool {
        self.status == SessionStatus::Tracking
    }

    pub fn point(&self, stage: Stage) -> Option<&HealthDataPoint> {
        self.data_points.iter().find(|p| p.label == stage)
    }
}

/// Percent change of each vital at `label` relative to the start stage.
/// A field is `None` unless both readings exist and the start value is non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsTrend {
    pub label: Stage,
    pub heart_rate: Option<f64>,
    pub systolic: Option<f64>,
    pub diastolic: Option<f64>,
    pub temperature: Option<f64>,
    pub oxygen_saturation: Option<f64>,
}

impl VitalsTrend {
    pub fn between(baseline: &VitalsSnapshot, point: &HealthDataPoint) -> Self {
        let current = &point.vitals;
        Self {
            label: point.label,
            heart_rate: percent_change(baseline.heart_rate, current.heart_rate),
            systolic: percent_change(
                baseline.blood_pressure.map(|bp| bp.systolic),
                current.blood_pressure.map(|bp| bp.systolic),
            ),
            diastolic: percent_change(
                baseline.blood_pressure.map(|bp| bp.diastolic),
                current.blood_pressure.map(|bp| bp.diastolic),
            ),
            temperature: percent_change(baseline.temperature, current.temperature),
            oxygen_saturation: percent_change(baseline.oxygen_saturation, current.oxygen_saturation),
        }
    }
}

fn percent_change(previous: Option<f64>, current: Option<f64>) -> Option<f64> {
    match (previous, current) {
        (Some(prev), Some(curr)) if prev != 0.0 => {
            let change = (curr - prev) / prev * 100.0;
            Some((change * 10.0).round() / 10.0)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointAssessment {
    pub label: Stage,
    pub timestamp: i64,
    pub out_of_range: Vec<VitalSign>,
}

// =====================================================================================
// REQUESTS
// =====================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJourneyRequest {
    pub medicine_name: String,
    pub half_life: f64,
    pub full_life: f64,
    pub start_time: Option<i64>,
}

impl StartJourneyRequest {
    pub fn into_journey(self, now: DateTime<Utc>) -> MedicationJourney {
        MedicationJourney {
            medicine_name: self.medicine_name,
            half_life: self.half_life,
            full_life: self.full_life,
            start_time: self.start_time.unwrap_or_else(|| now.timestamp_millis()),
        }
    }
}
