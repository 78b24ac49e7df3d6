use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use chrono::Utc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::TrackingError;
use crate::models::{
    MedicationJourney, PointAssessment, SessionStatus, Stage, StageFailure, TrackingEvent,
    TrackingSession, VitalsTrend,
};
use crate::services::sink::DataPointSink;
use crate::services::timeline::{TimelineScheduler, TrackingHandle};
use crate::services::vitals::{vitals_source_from_config, VitalsSource};

pub const DEFAULT_SESSION_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_ACTIVE_SESSIONS: usize = 10;

struct SessionEntry {
    session: TrackingSession,
    handle: Option<TrackingHandle>,
    finished_at: Option<Instant>,
}

impl SessionEntry {
    /// Marks the session finished and hands back its timeline handle, if any.
    fn finish(&mut self, status: SessionStatus) -> Option<TrackingHandle> {
        self.session.status = status;
        self.finished_at = Some(Instant::now());
        self.handle.take()
    }

    fn expired(&self, now: Instant, retention: Duration) -> bool {
        self.finished_at
            .is_some_and(|finished| now.saturating_duration_since(finished) >= retention)
    }
}

type SessionMap = Arc<RwLock<HashMap<Uuid, SessionEntry>>>;

/// Journeys started through the API, each with its own timeline and the
/// points it has produced so far.
///
/// Finished sessions are evicted once they are older than the retention
/// window, and each user may only have a bounded number running at once.
pub struct HealthTrackingService {
    scheduler: TimelineScheduler,
    sessions: SessionMap,
    retention: Duration,
    max_active_per_user: usize,
}

impl HealthTrackingService {
    pub fn new(scheduler: TimelineScheduler) -> Self {
        Self {
            scheduler,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            retention: DEFAULT_SESSION_RETENTION,
            max_active_per_user: DEFAULT_MAX_ACTIVE_SESSIONS,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_source(vitals_source_from_config(config), config)
    }

    pub fn with_source(source: Arc<dyn VitalsSource>, config: &AppConfig) -> Self {
        Self::new(TimelineScheduler::from_config(source, config))
            .with_retention(Duration::from_secs(config.tracking_session_retention_minutes * 60))
            .with_max_active_sessions(config.tracking_max_active_sessions)
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_active_sessions(mut self, max: usize) -> Self {
        self.max_active_per_user = max.max(1);
        self
    }

    /// Write access to the session map with expired sessions already removed.
    fn sessions(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, SessionEntry>> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.expired(now, self.retention));

        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!("Evicted {} finished tracking session(s)", evicted);
        }
        sessions
    }

    #[instrument(skip(self, journey), fields(medicine = %journey.medicine_name))]
    pub async fn start_journey(
        &self,
        user_id: &str,
        journey: MedicationJourney,
    ) -> Result<TrackingSession, TrackingError> {
        let id = Uuid::new_v4();
        {
            let mut sessions = self.sessions();
            let active = sessions
                .values()
                .filter(|entry| entry.session.user_id == user_id && entry.session.is_tracking())
                .count();
            if active >= self.max_active_per_user {
                return Err(TrackingError::TooManySessions(active));
            }

            let session = TrackingSession {
                id,
                user_id: user_id.to_string(),
                journey: journey.clone(),
                data_points: Vec::new(),
                failures: Vec::new(),
                status: SessionStatus::Tracking,
                created_at: Utc::now(),
            };
            sessions.insert(
                id,
                SessionEntry {
                    session,
                    handle: None,
                    finished_at: None,
                },
            );
        }

        let recorder = Arc::new(SessionRecorder {
            id,
            sessions: self.sessions.clone(),
        });
        let handle = self
            .scheduler
            .start_health_tracking(journey, recorder, user_id)
            .await;

        let mut sessions = self.sessions();
        let entry = sessions.get_mut(&id).ok_or(TrackingError::SessionNotFound(id))?;

        match entry.session.status {
            SessionStatus::Tracking => entry.handle = Some(handle),
            // Cancelled while the start stage was still fetching.
            SessionStatus::Cancelled => handle.cancel(),
            SessionStatus::Completed => {}
        }

        info!("Started tracking session {} for user {}", id, user_id);
        Ok(entry.session.clone())
    }

    pub fn get_session(&self, user_id: &str, id: Uuid) -> Result<TrackingSession, TrackingError> {
        self.sessions()
            .get(&id)
            .filter(|entry| entry.session.user_id == user_id)
            .map(|entry| entry.session.clone())
            .ok_or(TrackingError::SessionNotFound(id))
    }

    /// The user's sessions, newest first.
    pub fn list_sessions(&self, user_id: &str) -> Vec<TrackingSession> {
        let mut owned: Vec<TrackingSession> = self
            .sessions()
            .values()
            .filter(|entry| entry.session.user_id == user_id)
            .map(|entry| entry.session.clone())
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned
    }

    #[instrument(skip(self))]
    pub fn cancel_session(&self, user_id: &str, id: Uuid) -> Result<TrackingSession, TrackingError> {
        let mut sessions = self.sessions();
        let entry = sessions
            .get_mut(&id)
            .filter(|entry| entry.session.user_id == user_id)
            .ok_or(TrackingError::SessionNotFound(id))?;

        if !entry.session.is_tracking() {
            return Err(TrackingError::AlreadyFinished(id));
        }

        if let Some(handle) = entry.finish(SessionStatus::Cancelled) {
            handle.cancel();
        }

        info!("Cancelled tracking session {}", id);
        Ok(entry.session.clone())
    }

    /// Change of each later stage relative to the start stage. Empty when the
    /// start stage has no data point.
    pub fn trend(&self, user_id: &str, id: Uuid) -> Result<Vec<VitalsTrend>, TrackingError> {
        let session = self.get_session(user_id, id)?;

        let Some(baseline) = session.point(Stage::Start) else {
            return Ok(Vec::new());
        };

        Ok(session
            .data_points
            .iter()
            .filter(|point| point.label != Stage::Start)
            .map(|point| VitalsTrend::between(&baseline.vitals, point))
            .collect())
    }

    pub fn assessment(&self, user_id: &str, id: Uuid) -> Result<Vec<PointAssessment>, TrackingError> {
        let session = self.get_session(user_id, id)?;

        Ok(session
            .data_points
            .iter()
            .map(|point| PointAssessment {
                label: point.label,
                timestamp: point.timestamp,
                out_of_range: point.vitals.out_of_range(),
            })
            .collect())
    }
}

/// Sink that writes a journey's events into its session. Events arriving
/// after the session stopped tracking are dropped.
struct SessionRecorder {
    id: Uuid,
    sessions: SessionMap,
}

impl DataPointSink for SessionRecorder {
    fn emit(&self, event: TrackingEvent) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = sessions.get_mut(&self.id) else {
            return;
        };

        if !entry.session.is_tracking() {
            debug!(
                "Dropping {} for session {} ({:?})",
                event.label(),
                self.id,
                entry.session.status
            );
            return;
        }

        let session = &mut entry.session;
        match event {
            TrackingEvent::DataPoint(point) => session.data_points.push(point),
            TrackingEvent::StageFailed { label, timestamp, error } => {
                session.failures.push(StageFailure { label, timestamp, error })
            }
        }

        let delivered = session.data_points.len() + session.failures.len();
        if delivered == Stage::ALL.len() {
            entry.finish(SessionStatus::Completed);
            debug!("Tracking session {} completed", self.id);
        }
    }
}
