use std::sync::Arc;

use axum::{
    middleware,
    routing::get,
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, TrackingState};

pub fn health_tracking_routes(state: Arc<TrackingState>) -> Router {
    let protected_routes = Router::new()
        .route("/journeys", get(handlers::list_journeys).post(handlers::start_journey))
        .route("/journeys/{id}", get(handlers::get_journey).delete(handlers::cancel_journey))
        .route("/journeys/{id}/trend", get(handlers::get_journey_trend))
        .route("/journeys/{id}/assessment", get(handlers::get_journey_assessment))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
