//! Record endpoints
//!
//! - Listing and lookup (public)
//! - Registration
//! - Set, update, delete (ownership token in the `Token` header)

use axum::{
    Json, Router,
    extract::{FromRequest, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::OwnershipToken;
use crate::data::{Entry, EntryFilter, EntryUpdate, HistoryEntry};
use crate::error::AppError;
use crate::metrics::HTTP_REQUESTS_TOTAL;

/// Header carrying the email address at registration
pub const EMAIL_HEADER: &str = "Email";

/// Create records router
///
/// Routes:
/// - GET / - All records
/// - GET /:owner - Records of one owner
/// - POST /:owner - Register owner
/// - GET /:owner/:name - One record
/// - PUT /:owner/:name - Set record
/// - PATCH /:owner/:name - Rename, note, body
/// - DELETE /:owner/:name - Delete record
pub fn records_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_all))
        .route("/:owner", get(list_owner).post(register))
        .route(
            "/:owner/:name",
            get(get_entry).put(set_entry).patch(update_entry).delete(delete_entry),
        )
}

/// Record as served over HTTP
///
/// `body` and `history` only appear in the full view.
#[derive(Debug, Serialize)]
pub struct EntryView {
    pub owner: String,
    pub name: String,
    pub cid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
}

impl From<Entry> for EntryView {
    fn from(entry: Entry) -> Self {
        Self {
            owner: entry.owner,
            name: entry.name,
            cid: entry.cid,
            note: entry.note,
            updated_at: entry.updated_at,
            body: None,
            history: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    cid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntryQuery {
    full: Option<String>,
}

impl EntryQuery {
    fn is_full(&self) -> bool {
        matches!(self.full.as_deref(), Some("1" | "true" | "yes"))
    }
}

/// JSON request body; a missing or malformed body is a validation error
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
struct JsonBody<T>(T);

/// PUT body
#[derive(Debug, Deserialize)]
pub struct SetEntryRequest {
    pub cid: String,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisteredResponse {
    name: String,
}

fn observe(method: &str, endpoint: &str, status: StatusCode) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, status.as_str()])
        .inc();
}

/// GET /
///
/// Query: ?cid=<cid> to find every record pointing at a content identifier
async fn list_all(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<EntryView>>, AppError> {
    let filter = EntryFilter {
        cid: query.cid,
        ..Default::default()
    };
    let entries = state.records.list(&filter).await?;

    observe("GET", "/", StatusCode::OK);
    Ok(Json(entries.into_iter().map(EntryView::from).collect()))
}

/// GET /:owner
async fn list_owner(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<EntryView>>, AppError> {
    let filter = EntryFilter {
        owner: Some(owner),
        cid: query.cid,
        ..Default::default()
    };
    let entries = state.records.list(&filter).await?;

    observe("GET", "/:owner", StatusCode::OK);
    Ok(Json(entries.into_iter().map(EntryView::from).collect()))
}

/// GET /:owner/:name
///
/// Query: ?full=1 adds the body and the history (newest first)
async fn get_entry(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<EntryQuery>,
) -> Result<Json<EntryView>, AppError> {
    let entry = state.records.get(&owner, &name).await?;

    let view = if query.is_full() {
        let body = entry.body.clone();
        let history = state.records.history(&owner, &name).await?;
        EntryView {
            body,
            history: Some(history),
            ..EntryView::from(entry)
        }
    } else {
        EntryView::from(entry)
    };

    observe("GET", "/:owner/:name", StatusCode::OK);
    Ok(Json(view))
}

/// POST /:owner
///
/// Body: public key PEM. Header `Email`: contact address.
async fn register(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    headers: HeaderMap,
    public_key_pem: String,
) -> Result<(StatusCode, Json<RegisteredResponse>), AppError> {
    let email = headers
        .get(EMAIL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Validation("Missing Email header".to_string()))?;

    if public_key_pem.trim().is_empty() {
        return Err(AppError::Validation("Missing public key".to_string()));
    }

    state.records.register(&owner, email, &public_key_pem).await?;

    observe("POST", "/:owner", StatusCode::CREATED);
    Ok((StatusCode::CREATED, Json(RegisteredResponse { name: owner })))
}

/// PUT /:owner/:name
///
/// Body: `{"cid": "...", "note": "..."}`; token claims `owner`, `name`, `cid`
async fn set_entry(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    OwnershipToken(token): OwnershipToken,
    JsonBody(request): JsonBody<SetEntryRequest>,
) -> Result<Json<EntryView>, AppError> {
    let entry = state
        .records
        .set(&token, &owner, &name, &request.cid, request.note.as_deref())
        .await?;

    observe("PUT", "/:owner/:name", StatusCode::OK);
    Ok(Json(entry.into()))
}

/// PATCH /:owner/:name
///
/// Body: any of `name`, `note`, `body`
async fn update_entry(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    OwnershipToken(token): OwnershipToken,
    JsonBody(update): JsonBody<EntryUpdate>,
) -> Result<Json<EntryView>, AppError> {
    let entry = state.records.update(&token, &owner, &name, &update).await?;

    observe("PATCH", "/:owner/:name", StatusCode::OK);
    Ok(Json(entry.into()))
}

/// DELETE /:owner/:name
async fn delete_entry(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    OwnershipToken(token): OwnershipToken,
) -> Result<StatusCode, AppError> {
    state.records.delete(&token, &owner, &name).await?;

    observe("DELETE", "/:owner/:name", StatusCode::NO_CONTENT);
    Ok(StatusCode::NO_CONTENT)
}
