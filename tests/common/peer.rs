//! A remote ActivityPub server for federation tests
//!
//! Serves actor documents at `/u/:name` and records deliveries posted to
//! `/u/:name/inbox`. The actor `ghost` does not exist.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::Value;
use tokio::sync::Mutex;

use super::ALICE_PUBLIC;

/// A delivery received by the peer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub inbox_owner: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Delivery {
    pub fn activity(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Clone)]
struct PeerState {
    base: String,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

pub struct RemotePeer {
    pub base: String,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RemotePeer {
    pub fn actor(&self, name: &str) -> String {
        format!("{}/u/{}", self.base, name)
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().await.clone()
    }

    /// Deliveries whose activity has the given type
    pub async fn deliveries_of(&self, activity_type: &str) -> Vec<Delivery> {
        self.deliveries()
            .await
            .into_iter()
            .filter(|d| d.activity()["type"] == activity_type)
            .collect()
    }
}

async fn actor_document(State(state): State<PeerState>, Path(name): Path<String>) -> Response {
    if name == "ghost" {
        return StatusCode::NOT_FOUND.into_response();
    }

    let id = format!("{}/u/{}", state.base, name);
    Json(serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": id,
        "type": "Person",
        "inbox": format!("{}/inbox", id),
        "publicKey": {
            "id": format!("{}#main-key", id),
            "owner": id,
            "publicKeyPem": ALICE_PUBLIC
        }
    }))
    .into_response()
}

async fn inbox(
    State(state): State<PeerState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.deliveries.lock().await.push(Delivery {
        inbox_owner: name,
        headers,
        body,
    });
    StatusCode::ACCEPTED
}

pub async fn spawn_peer() -> RemotePeer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let deliveries = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route("/u/:name", get(actor_document))
        .route("/u/:name/inbox", post(inbox))
        .with_state(PeerState {
            base: base.clone(),
            deliveries: deliveries.clone(),
        });

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    RemotePeer { base, deliveries }
}
