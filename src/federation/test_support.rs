//! In-process remote federation peer for unit tests
//!
//! Serves actor documents at `/u/:name` and accepts deliveries at
//! `/u/:name/inbox`. Actors named `ghost` do not exist; actors whose name
//! starts with `slow` answer after a minute.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::auth::KeyRegistry;
use crate::error::AppError;

pub(crate) const ALICE_PRIVATE: &str = include_str!("../../tests/fixtures/alice_private_key.pem");
pub(crate) const ALICE_PUBLIC: &str = include_str!("../../tests/fixtures/alice_public_key.pem");

pub(crate) fn service_key() -> Arc<RsaPrivateKey> {
    Arc::new(RsaPrivateKey::from_pkcs8_pem(ALICE_PRIVATE).unwrap())
}

/// A delivery received by the peer
#[derive(Debug, Clone)]
pub(crate) struct Received {
    pub inbox_owner: String,
    pub headers: HeaderMap,
    pub activity: Value,
}

#[derive(Clone)]
struct PeerState {
    base: String,
    received: Arc<Mutex<Vec<Received>>>,
}

pub(crate) struct RemotePeer {
    pub base: String,
    received: Arc<Mutex<Vec<Received>>>,
}

impl RemotePeer {
    pub fn actor(&self, name: &str) -> String {
        format!("{}/u/{}", self.base, name)
    }

    pub async fn received(&self) -> Vec<Received> {
        self.received.lock().await.clone()
    }
}

async fn actor_document(State(state): State<PeerState>, Path(name): Path<String>) -> Response {
    if name == "ghost" {
        return StatusCode::NOT_FOUND.into_response();
    }
    if name.starts_with("slow") {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }

    let id = format!("{}/u/{}", state.base, name);
    Json(serde_json::json!({
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
    Json(activity): Json<Value>,
) -> StatusCode {
    state.received.lock().await.push(Received {
        inbox_owner: name,
        headers,
        activity,
    });
    StatusCode::ACCEPTED
}

pub(crate) async fn spawn_peer() -> RemotePeer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let received = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route("/u/:name", get(actor_document))
        .route("/u/:name/inbox", post(inbox))
        .with_state(PeerState {
            base: base.clone(),
            received: received.clone(),
        });

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    RemotePeer { base, received }
}

/// Key registry with a fixed set of users
pub(crate) struct StaticRegistry(pub Vec<&'static str>);

#[async_trait]
impl KeyRegistry for StaticRegistry {
    async fn register(&self, _: &str, _: &str, _: &str) -> Result<(), AppError> {
        Err(AppError::Conflict("read-only registry".to_string()))
    }

    async fn lookup(&self, user_id: &str) -> Result<Option<String>, AppError> {
        Ok(self
            .0
            .contains(&user_id)
            .then(|| ALICE_PUBLIC.to_string()))
    }
}
