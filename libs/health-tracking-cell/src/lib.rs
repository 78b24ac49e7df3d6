pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::{TrackingError, VitalsFetchError};
pub use models::*;
pub use router::health_tracking_routes;

pub mod api {
    pub use crate::services::sink::{ChannelSink, DataPointSink};
    pub use crate::services::timeline::{FetchPolicy, TimelineScheduler, TrackingHandle, TrackingOutcome};
    pub use crate::services::tracking::HealthTrackingService;
    pub use crate::services::vitals::{SimulatedVitalsSource, VitalsSource, WearableVitalsSource};
}
