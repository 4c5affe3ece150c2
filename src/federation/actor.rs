//! Remote actor discovery
//!
//! Fetches actor documents with `Accept: application/activity+json` and
//! reads the fields federation needs: `inbox` and `publicKey.publicKeyPem`.

use serde_json::Value;

use super::delivery::{ACTIVITY_JSON, DeliveryError};
use super::signature::{extract_actor_domain, validate_resolved_host_ips};
use crate::config::FederationConfig;
use crate::error::AppError;

/// Build the HTTP client used for actor fetches and deliveries
///
/// Redirects are never followed: every URL the client touches has to pass
/// the address checks in [`ActorResolver`] first.
pub fn http_client(config: &FederationConfig) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.delivery_timeout())
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| AppError::Internal(e.into()))
}

/// Fetches and interprets remote actor documents
#[derive(Clone)]
pub struct ActorResolver {
    http_client: reqwest::Client,
    /// Skip the loopback/private address checks (local testing only)
    allow_private_networks: bool,
}

impl ActorResolver {
    pub fn new(http_client: reqwest::Client, allow_private_networks: bool) -> Self {
        Self {
            http_client,
            allow_private_networks,
        }
    }

    /// Reject URLs that point at this host or a private network
    async fn ensure_remote(&self, url: &str) -> Result<(), AppError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid actor URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported actor URL scheme: {}",
                parsed.scheme()
            )));
        }

        if self.allow_private_networks {
            return Ok(());
        }

        let host = extract_actor_domain(url)?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| AppError::Validation("Missing port in actor URL".to_string()))?;
        validate_resolved_host_ips(&host, port).await
    }

    /// Fetch an actor document
    pub async fn fetch_actor(&self, actor_uri: &str) -> Result<Value, AppError> {
        let actor_url = actor_uri.split('#').next().unwrap_or(actor_uri);
        self.ensure_remote(actor_url).await?;

        let response = self
            .http_client
            .get(actor_url)
            .header("Accept", ACTIVITY_JSON)
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to fetch actor: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Failed to fetch actor: HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to parse actor: {}", e)))
    }

    /// Discover the inbox of a remote actor
    ///
    /// # Errors
    /// `DeliveryError::Discovery` when the actor is unreachable or its
    /// document has no usable `inbox`.
    pub async fn discover_inbox(&self, actor_uri: &str) -> Result<String, DeliveryError> {
        let actor = self
            .fetch_actor(actor_uri)
            .await
            .map_err(|e| DeliveryError::Discovery(e.to_string()))?;

        let inbox = actor
            .get("inbox")
            .and_then(Value::as_str)
            .filter(|inbox| !inbox.is_empty())
            .ok_or_else(|| {
                DeliveryError::Discovery(format!("actor {} has no inbox", actor_uri))
            })?;

        self.ensure_remote(inbox)
            .await
            .map_err(|e| DeliveryError::Discovery(e.to_string()))?;

        Ok(inbox.to_string())
    }

    /// Fetch the PEM published for a signature key ID
    ///
    /// When the key ID carries a fragment, the actor must advertise exactly
    /// that key ID.
    pub async fn fetch_public_key(&self, key_id: &str) -> Result<String, AppError> {
        let actor = self.fetch_actor(key_id).await?;

        let public_key = actor
            .get("publicKey")
            .ok_or_else(|| AppError::Federation("Missing publicKey in actor".to_string()))?;

        if key_id.contains('#') {
            let advertised_key_id = public_key
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::Federation("Missing publicKey.id in actor".to_string()))?;

            if advertised_key_id != key_id {
                return Err(AppError::InvalidSignature);
            }
        }

        public_key
            .get("publicKeyPem")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| AppError::Federation("Missing publicKeyPem in actor".to_string()))
    }
}
