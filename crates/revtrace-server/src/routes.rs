use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::handlers::{access_checks, dashboard, issues, webhooks};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Inbound webhook ingress
        .route("/webhooks/:org_slug/:source", post(webhooks::receive))
        // Access-check ingress
        .route("/api/v1/access-checks", post(access_checks::record))
        .route("/api/v1/access-checks/batch", post(access_checks::record_batch))
        // Issue administration
        .route("/issues", get(issues::list))
        .route("/issues/:id/:action", post(issues::transition))
        // Read projections for the external dashboard
        .route("/api/v1/summary", get(dashboard::summary))
        .route("/api/v1/revenue-impact", get(dashboard::revenue_impact))
        .route("/api/v1/entitlements/health", get(dashboard::entitlement_health))
        .route("/api/v1/events", get(dashboard::events))
        .route("/api/v1/users/:id", get(dashboard::user_profile))
        .route("/api/v1/connections/health", get(dashboard::connections_health))
        // Liveness
        .route("/health", get(dashboard::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
