//! Well-known endpoints
//!
//! - /.well-known/webfinger

use axum::{
    Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{generate_webfinger_response, parse_resource};

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
pub fn wellknown_router() -> Router<AppState> {
    Router::new().route("/.well-known/webfinger", get(webfinger))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: Option<String>,
}

/// GET /.well-known/webfinger
///
/// Responds to WebFinger queries for registered users.
///
/// Query: ?resource=acct:user@domain
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<Response, AppError> {
    let resource = query
        .resource
        .ok_or_else(|| AppError::Validation("Missing resource parameter".to_string()))?;

    let domain = &state.config.server.domain;
    let name = parse_resource(&resource, domain)?;

    if !state.db.user_exists(&name).await? {
        return Err(AppError::NotFound);
    }

    let response = generate_webfinger_response(&name, domain, &state.urls);
    Ok((
        [(header::CONTENT_TYPE, "application/jrd+json")],
        axum::Json(response),
    )
        .into_response())
}
