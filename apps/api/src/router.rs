use std::sync::Arc;

use axum::{routing::get, Router};

use health_tracking_cell::handlers::TrackingState;
use health_tracking_cell::health_tracking_routes;
use shared_config::AppConfig;

pub fn create_router(config: Arc<AppConfig>) -> Router {
    let tracking_state = Arc::new(TrackingState::new(config));

    Router::new()
        .route("/", get(|| async { "Health tracking API is running!" }))
        .nest("/tracking", health_tracking_routes(tracking_state))
}
