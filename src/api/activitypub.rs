//! ActivityPub endpoints
//!
//! - Shared inbox (activity receiving)
//! - Actor profile
//! - Followers collection
//! - Outbox, notes and their Create activities
//! - Service public key

use axum::body::Bytes;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{
    ACTIVITY_JSON, FollowerDirectory, InboxOutcome, key_id_matches_actor, parse_signature_header,
    presenter, verify_signature,
};
use crate::metrics::HTTP_REQUESTS_TOTAL;

/// Path of the shared inbox; part of the signed request target
const INBOX_PATH: &str = "/pub";

/// Create ActivityPub router
///
/// Routes:
/// - POST /pub - Shared inbox
/// - GET /pub/key - Service public key (PEM)
/// - GET /pub/user/:name - Actor profile
/// - GET /pub/user/:name/followers - Followers collection
/// - GET /pub/user/:name/outbox - Outbox
/// - GET /pub/note/:id - Note
/// - GET /pub/create/:id - Create activity for a note
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route(INBOX_PATH, post(inbox))
        .route("/pub/key", get(service_key))
        .route("/pub/user/:name", get(actor))
        .route("/pub/user/:name/followers", get(followers))
        .route("/pub/user/:name/outbox", get(outbox))
        .route("/pub/note/:id", get(note))
        .route("/pub/create/:id", get(create))
}

/// JSON document served as `application/activity+json`
struct ActivityJson(Value);

impl IntoResponse for ActivityJson {
    fn into_response(self) -> Response {
        (
            [(header::CONTENT_TYPE, ACTIVITY_JSON)],
            axum::Json(self.0),
        )
            .into_response()
    }
}

async fn ensure_user(state: &AppState, name: &str) -> Result<(), AppError> {
    if state.db.user_exists(name).await? {
        Ok(())
    } else {
        Err(AppError::NotFound)
    }
}

/// POST /pub
///
/// Receives incoming ActivityPub activities.
///
/// # Steps
/// 1. Parse activity
/// 2. Verify HTTP Signature (when enabled)
/// 3. Dispatch by type
///
/// Answers 200 for processed and ignored activities alike; a failed Accept
/// does not fail the request.
async fn inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    // 1. Parse activity
    let activity: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;

    // 2. Verify HTTP Signature
    if state.config.federation.verify_inbound_signatures {
        verify_inbound(&state, &headers, &body, &activity).await?;
    }

    // 3. Dispatch
    let outcome = state.inbox.dispatch(&activity).await?;
    if let InboxOutcome::Ignored { activity_type } = &outcome {
        tracing::debug!(activity_type = %activity_type, "Inbox ignored activity");
    }

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", INBOX_PATH, "200"])
        .inc();

    Ok(StatusCode::OK)
}

/// Check the request signature against the activity actor's published key
async fn verify_inbound(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    activity: &Value,
) -> Result<(), AppError> {
    let signature = headers
        .get("signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    let parsed = parse_signature_header(signature).map_err(|_| AppError::InvalidSignature)?;

    let actor = activity
        .get("actor")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation("Missing actor field".to_string()))?;

    // keyId must belong to the actor before any key is fetched
    if !key_id_matches_actor(&parsed.key_id, actor) {
        tracing::warn!(key_id = %parsed.key_id, actor = %actor, "Signature keyId actor mismatch");
        return Err(AppError::InvalidSignature);
    }

    let public_key_pem = state
        .resolver
        .fetch_public_key(&parsed.key_id)
        .await
        .map_err(|e| {
            tracing::warn!(key_id = %parsed.key_id, error = %e, "Failed to fetch signer key");
            AppError::InvalidSignature
        })?;
    verify_signature("POST", INBOX_PATH, headers, body, &public_key_pem)
}

/// GET /pub/key
///
/// The service public key as PEM text.
async fn service_key(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.service_public_key_pem.as_str().to_string(),
    )
        .into_response()
}

/// GET /pub/user/:name
///
/// Returns ActivityPub Actor document.
///
/// Content-Type: application/activity+json
async fn actor(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<ActivityJson, AppError> {
    ensure_user(&state, &name).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/pub/user/:name", "200"])
        .inc();

    Ok(ActivityJson(presenter::actor(
        &state.urls,
        &name,
        &state.service_public_key_pem,
    )))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<String>,
}

/// GET /pub/user/:name/followers
///
/// Query: ?page=1 returns the single page on its own
async fn followers(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<ActivityJson, AppError> {
    ensure_user(&state, &name).await?;

    let mut followers = FollowerDirectory::list(state.db.as_ref(), &name).await?;
    followers.sort();

    let document = match query.page.as_deref() {
        Some(_) => presenter::followers_page_document(&state.urls, &name, &followers),
        None => presenter::followers_collection(&state.urls, &name, &followers),
    };

    Ok(ActivityJson(document))
}

/// GET /pub/user/:name/outbox
///
/// Create activities for every published note, newest first
async fn outbox(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<ActivityJson, AppError> {
    ensure_user(&state, &name).await?;

    let notes = state.db.list_outbox_notes(&name).await?;
    Ok(ActivityJson(presenter::outbox_collection(&state.urls, &name, &notes)))
}

/// GET /pub/note/:id
async fn note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ActivityJson, AppError> {
    let note = state.db.get_outbox_note(&id).await?.ok_or(AppError::NotFound)?;
    Ok(ActivityJson(presenter::note_document(&state.urls, &note)))
}

/// GET /pub/create/:id
async fn create(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ActivityJson, AppError> {
    let note = state.db.get_outbox_note(&id).await?.ok_or(AppError::NotFound)?;
    Ok(ActivityJson(presenter::create_activity(&state.urls, &note)))
}
