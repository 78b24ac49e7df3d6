use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::error::TrackingError;
use crate::models::StartJourneyRequest;
use crate::services::tracking::HealthTrackingService;

pub struct TrackingState {
    pub config: Arc<AppConfig>,
    pub tracking: Arc<HealthTrackingService>,
}

impl TrackingState {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let tracking = Arc::new(HealthTrackingService::from_config(&config));
        Self { config, tracking }
    }
}

fn validate_request(request: &StartJourneyRequest) -> Result<(), TrackingError> {
    if request.medicine_name.trim().is_empty() {
        return Err(TrackingError::InvalidJourney("medicineName must not be empty".to_string()));
    }
    if !request.half_life.is_finite() || !request.full_life.is_finite() {
        return Err(TrackingError::InvalidJourney("halfLife and fullLife must be finite".to_string()));
    }
    Ok(())
}

pub async fn start_journey(
    State(state): State<Arc<TrackingState>>,
    Extension(user): Extension<User>,
    Json(request): Json<StartJourneyRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    validate_request(&request)?;

    if request.half_life >= request.full_life {
        debug!(
            "Journey for {} has halfLife >= fullLife, stages will fire out of label order",
            request.medicine_name
        );
    }

    let journey = request.into_journey(Utc::now());
    let session = state.tracking.start_journey(&user.id, journey).await?;

    Ok((StatusCode::CREATED, Json(json!(session))))
}

pub async fn list_journeys(
    State(state): State<Arc<TrackingState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let sessions = state.tracking.list_sessions(&user.id);

    Ok(Json(json!({
        "sessions": sessions,
        "total": sessions.len()
    })))
}

pub async fn get_journey(
    State(state): State<Arc<TrackingState>>,
    Path(id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let session = state.tracking.get_session(&user.id, id)?;
    Ok(Json(json!(session)))
}

pub async fn cancel_journey(
    State(state): State<Arc<TrackingState>>,
    Path(id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let session = state.tracking.cancel_session(&user.id, id)?;
    Ok(Json(json!(session)))
}

pub async fn get_journey_trend(
    State(state): State<Arc<TrackingState>>,
    Path(id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let trends = state.tracking.trend(&user.id, id)?;

    Ok(Json(json!({
        "sessionId": id,
        "trends": trends
    })))
}

pub async fn get_journey_assessment(
    State(state): State<Arc<TrackingState>>,
    Path(id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let assessments = state.tracking.assessment(&user.id, id)?;
    let flagged = assessments.iter().filter(|a| !a.out_of_range.is_empty()).count();

    Ok(Json(json!({
        "sessionId": id,
        "assessments": assessments,
        "flaggedPoints": flagged
    })))
}
