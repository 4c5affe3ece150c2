//! Prometheus metrics endpoint
//!
//! Table-size gauges are refreshed from the database on every scrape;
//! counters are updated where the events happen.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;
use crate::metrics::{FOLLOW_RELATIONS, REGISTERED_USERS, REGISTRY, STORED_RECORDS};

/// Create metrics router
///
/// Routes:
/// - GET /metrics
pub fn metrics_router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    // A failed refresh still serves the counters
    match state.db.table_counts().await {
        Ok(counts) => {
            REGISTERED_USERS.set(counts.users);
            STORED_RECORDS.set(counts.records);
            FOLLOW_RELATIONS.set(counts.followers);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to refresh table gauges"),
    }

    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
