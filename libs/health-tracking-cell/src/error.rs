use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VitalsFetchError {
    #[error("Vitals request failed: {0}")]
    Request(String),

    #[error("Vitals API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Could not decode vitals response: {0}")]
    Decode(String),

    #[error("Vitals fetch timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Vitals source unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for VitalsFetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            VitalsFetchError::Decode(err.to_string())
        } else {
            VitalsFetchError::Request(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Tracking session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Tracking session {0} has already finished")]
    AlreadyFinished(Uuid),

    #[error("Already tracking {0} journeys, finish or cancel one first")]
    TooManySessions(usize),

    #[error("Invalid journey: {0}")]
    InvalidJourney(String),

    #[error("Tracking task aborted: {0}")]
    Aborted(String),
}

impl From<TrackingError> for AppError {
    fn from(err: TrackingError) -> Self {
        match err {
            TrackingError::SessionNotFound(_) => AppError::NotFound(err.to_string()),
            TrackingError::AlreadyFinished(_) | TrackingError::TooManySessions(_) => {
                AppError::Conflict(err.to_string())
            }
            TrackingError::InvalidJourney(msg) => AppError::ValidationError(msg),
            TrackingError::Aborted(_) => AppError::Internal(err.to_string()),
        }
    }
}
