//! RSVP admission HTTP router.
//!
//! Composes all handlers into a single Axum router.

use crate::handlers::{health, rsvp};
use crate::middleware::correlate;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Create the admission router with all endpoints.
///
/// # Routes
///
/// - `POST /api/rsvp/waitlist` - Take a spot or join the waitlist
/// - `POST /api/rsvp/verify` - Confirm a reserved spot
/// - `POST /api/rsvp/withdraw` - Give up a confirmed RSVP
/// - `GET /api/rsvp/status` - Caller's admission status
/// - `GET /health` - Liveness
/// - `GET /health/ready` - Readiness (ledger reachable)
/// - `GET /metrics` - Prometheus metrics, when enabled
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/rsvp/waitlist", post(rsvp::join_waitlist))
        .route("/api/rsvp/verify", post(rsvp::verify_rsvp))
        .route("/api/rsvp/withdraw", post(rsvp::withdraw_rsvp))
        .route("/api/rsvp/status", get(rsvp::status))
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(correlate))
                .layer(TraceLayer::new_for_http()),
        )
}
