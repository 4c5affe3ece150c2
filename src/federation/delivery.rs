//! Signed activity delivery
//!
//! POSTs one activity to one remote inbox, signed with the service key.

use std::sync::Arc;

use reqwest::StatusCode;
use rsa::RsaPrivateKey;
use serde::Serialize;
use thiserror::Error;

use super::signature::{generate_digest, sign_request};
use crate::error::AppError;

pub const ACTIVITY_JSON: &str = "application/activity+json";

/// Why a delivery attempt failed
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Activity could not be serialized or signed
    #[error("signing failed: {0}")]
    Signing(String),

    /// Remote actor document unusable (unreachable, no inbox)
    #[error("inbox discovery failed: {0}")]
    Discovery(String),

    /// Connection or transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Gave up waiting
    #[error("timed out")]
    Timeout,

    /// Remote inbox answered with a non-success status
    #[error("inbox rejected activity: HTTP {status}")]
    Rejected { status: u16 },
}

impl DeliveryError {
    /// Whether a later attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Network(_) | DeliveryError::Timeout | DeliveryError::Discovery(_) => {
                true
            }
            DeliveryError::Rejected { status } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            DeliveryError::Signing(_) => false,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Signing(_) => "signing",
            DeliveryError::Discovery(_) => "discovery",
            DeliveryError::Network(_) => "network",
            DeliveryError::Timeout => "timeout",
            DeliveryError::Rejected { .. } => "rejected",
        }
    }
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        AppError::Federation(err.to_string())
    }
}

/// Outcome of delivering to one follower
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    /// Follower actor URI
    pub follower: String,
    /// Inbox the activity went to, when discovery succeeded
    pub inbox_uri: Option<String>,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub retryable: bool,
}

impl DeliveryResult {
    pub fn delivered(follower: String, inbox_uri: String, status: u16) -> Self {
        Self {
            follower,
            inbox_uri: Some(inbox_uri),
            success: true,
            status_code: Some(status),
            error: None,
            retryable: false,
        }
    }

    pub fn failed(follower: String, inbox_uri: Option<String>, error: &DeliveryError) -> Self {
        let status_code = match error {
            DeliveryError::Rejected { status } => Some(*status),
            _ => None,
        };

        Self {
            follower,
            inbox_uri,
            success: false,
            status_code,
            error: Some(error.to_string()),
            retryable: error.is_retryable(),
        }
    }
}

/// Signed Delivery Client
///
/// Holds the service private key; the key ID is chosen per call so each
/// local actor can sign as itself.
#[derive(Clone)]
pub struct ActivityDelivery {
    http_client: reqwest::Client,
    private_key: Arc<RsaPrivateKey>,
}

impl ActivityDelivery {
    pub fn new(http_client: reqwest::Client, private_key: Arc<RsaPrivateKey>) -> Self {
        Self {
            http_client,
            private_key,
        }
    }

    /// Deliver an activity to a single inbox
    ///
    /// The body is serialized once and the digest is computed over exactly
    /// those bytes.
    ///
    /// # Returns
    /// HTTP status of the accepted delivery
    pub async fn deliver(
        &self,
        key_id: &str,
        inbox_uri: &str,
        activity: &serde_json::Value,
    ) -> Result<u16, DeliveryError> {
        // 1. Serialize activity
        let body = serde_json::to_vec(activity)
            .map_err(|e| DeliveryError::Signing(format!("serialize activity: {}", e)))?;

        // 2. Sign request
        let digest = generate_digest(&body);
        let sig_headers = sign_request("POST", inbox_uri, &self.private_key, key_id)
            .map_err(|e| DeliveryError::Signing(e.to_string()))?;

        // 3. POST to inbox with signed headers
        let response = self
            .http_client
            .post(inbox_uri)
            .header("Content-Type", ACTIVITY_JSON)
            .header("Accept", ACTIVITY_JSON)
            .header("Host", sig_headers.host)
            .header("Date", sig_headers.date)
            .header("Digest", digest)
            .header("Signature", sig_headers.signature)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Network(e.to_string())
                }
            })?;

        // 4. Handle response
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!(inbox = %inbox_uri, status = status.as_u16(), "Delivered activity");
        Ok(status.as_u16())
    }
}

/// ActivityPub JSON builders
pub mod builder {
    use serde_json::Value;

    pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

    /// JSON-LD context sent with every top-level document
    pub fn context() -> Value {
        serde_json::json!([
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ])
    }

    /// Build an Accept activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (accepter)
    /// * `object` - Original activity being accepted (usually a Follow)
    pub fn accept(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": context(),
            "type": "Accept",
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build a public Note
    pub fn note(id: &str, attributed_to: &str, content: &str, published: &str) -> Value {
        serde_json::json!({
            "type": "Note",
            "id": id,
            "attributedTo": attributed_to,
            "content": content,
            "published": published,
            "to": [PUBLIC_AUDIENCE]
        })
    }

    /// Build a Create activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (creator)
    /// * `object` - Object being created (a Note)
    /// * `published` - RFC 3339 timestamp
    pub fn create(id: &str, actor: &str, object: Value, published: &str) -> Value {
        serde_json::json!({
            "@context": context(),
            "type": "Create",
            "id": id,
            "actor": actor,
            "object": object,
            "published": published,
            "to": [PUBLIC_AUDIENCE]
        })
    }
}
