//! Content store existence check
//!
//! Asks an IPFS node whether anyone provides a content identifier. A
//! search that runs out of time without a definite answer counts as
//! "exists": slow networks must not block announcing real content.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::ClientError;

/// Routing event type for "found a provider"
const PROVIDER_EVENT: u8 = 4;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Whether `cid` is retrievable
    ///
    /// Returns `Ok(true)` when the check times out.
    async fn exists(&self, cid: &str, timeout: Duration) -> Result<bool, ClientError>;
}

/// IPFS HTTP API client (`/api/v0/routing/findprovs`)
#[derive(Clone)]
pub struct IpfsContentStore {
    http: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct RoutingEvent {
    #[serde(rename = "Type")]
    event_type: u8,
    #[serde(rename = "Responses", default)]
    responses: Option<Vec<serde_json::Value>>,
}

impl RoutingEvent {
    fn is_provider(&self) -> bool {
        self.event_type == PROVIDER_EVENT && self.responses.as_ref().is_some_and(|r| !r.is_empty())
    }
}

impl IpfsContentStore {
    /// `api_url` is the node's API root, e.g. `http://127.0.0.1:5001`
    pub fn new(http: reqwest::Client, api_url: &str) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Read the event stream until a provider shows up or it ends
    async fn find_provider(&self, cid: &str) -> Result<bool, ClientError> {
        let mut response = self
            .http
            .post(format!("{}/api/v0/routing/findprovs", self.api_url))
            .query(&[("arg", cid), ("num-providers", "1")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, message });
        }

        let mut pending = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            pending.extend_from_slice(&chunk);

            while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();
                if Self::line_has_provider(&line) {
                    return Ok(true);
                }
            }
        }

        Ok(Self::line_has_provider(&pending))
    }

    fn line_has_provider(line: &[u8]) -> bool {
        let line = line.trim_ascii();
        if line.is_empty() {
            return false;
        }

        match serde_json::from_slice::<RoutingEvent>(line) {
            Ok(event) => event.is_provider(),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable routing event");
                false
            }
        }
    }
}

#[async_trait]
impl ContentStore for IpfsContentStore {
    async fn exists(&self, cid: &str, timeout: Duration) -> Result<bool, ClientError> {
        match tokio::time::timeout(timeout, self.find_provider(cid)).await {
            Ok(found) => found,
            Err(_) => {
                tracing::warn!(cid = %cid, ?timeout, "Provider search timed out; assuming content exists");
                Ok(true)
            }
        }
    }
}
