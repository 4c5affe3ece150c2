//! HTTP client for a Gravity server
//!
//! Every mutating call signs a fresh token whose claims name exactly the
//! operation's parameters; nothing is cached between calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;
use serde::Deserialize;

use super::{ClientError, ContentStore};
use crate::auth::{Claims, TOKEN_HEADER, TokenIssuer, claims};
use crate::data::HistoryEntry;

/// Record as returned by the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    pub owner: String,
    pub name: String,
    pub cid: String,
    #[serde(default)]
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub history: Option<Vec<HistoryEntry>>,
}

/// Client bound to one server and one owner identity
#[derive(Clone)]
pub struct GravityClient {
    http: reqwest::Client,
    base_url: String,
    owner: String,
    issuer: TokenIssuer,
    /// Checked before `put` announces an identifier
    content_store: Option<Arc<dyn ContentStore>>,
    content_wait: Duration,
}

/// How long `put` waits for the content store by default
pub const DEFAULT_CONTENT_WAIT: Duration = Duration::from_secs(30);

impl GravityClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        owner: &str,
        private_key: &RsaPrivateKey,
    ) -> Result<Self, ClientError> {
        url::Url::parse(base_url).map_err(|e| ClientError::Invalid(format!("base URL: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            issuer: TokenIssuer::from_private_key(private_key)?,
            content_store: None,
            content_wait: DEFAULT_CONTENT_WAIT,
        })
    }

    /// Refuse to `put` identifiers the store reports as missing
    ///
    /// A check that outlasts `wait` lets the put through.
    pub fn with_content_store(mut self, store: Arc<dyn ContentStore>, wait: Duration) -> Self {
        self.content_store = Some(store);
        self.content_wait = wait;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn token(&self, claims: &Claims) -> Result<String, ClientError> {
        Ok(self.issuer.issue(claims)?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);

        Err(ClientError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// Register this client's owner with `public_key_pem`
    pub async fn register(&self, email: &str, public_key_pem: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url(&[&self.owner]))
            .header("Email", email)
            .body(public_key_pem.to_string())
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    /// Point `name` at `cid`
    pub async fn put(&self, name: &str, cid: &str, note: Option<&str>) -> Result<Record, ClientError> {
        if let Some(store) = &self.content_store {
            if !store.exists(cid, self.content_wait).await? {
                return Err(ClientError::ContentUnavailable(cid.to_string()));
            }
        }

        let token = self.token(&claims([("owner", self.owner.as_str()), ("name", name), ("cid", cid)]))?;

        let response = self
            .http
            .put(self.url(&[&self.owner, name]))
            .header(TOKEN_HEADER, token)
            .json(&serde_json::json!({ "cid": cid, "note": note }))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn patch(&self, name: &str, field: &str, value: &str) -> Result<Record, ClientError> {
        // The new name travels as `new_name`; `name` is the current one
        let claim = if field == "name" { "new_name" } else { field };
        let token = self.token(&claims([
            ("owner", self.owner.as_str()),
            ("name", name),
            (claim, value),
        ]))?;

        let mut body = serde_json::Map::new();
        body.insert(field.to_string(), serde_json::Value::String(value.to_string()));

        let response = self
            .http
            .patch(self.url(&[&self.owner, name]))
            .header(TOKEN_HEADER, token)
            .json(&body)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn rename(&self, name: &str, new_name: &str) -> Result<Record, ClientError> {
        self.patch(name, "name", new_name).await
    }

    pub async fn set_note(&self, name: &str, note: &str) -> Result<Record, ClientError> {
        self.patch(name, "note", note).await
    }

    pub async fn set_body(&self, name: &str, body: &str) -> Result<Record, ClientError> {
        self.patch(name, "body", body).await
    }

    pub async fn delete(&self, name: &str) -> Result<(), ClientError> {
        let token = self.token(&claims([("owner", self.owner.as_str()), ("name", name)]))?;

        let response = self
            .http
            .delete(self.url(&[&self.owner, name]))
            .header(TOKEN_HEADER, token)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    /// Fetch any owner's record; `full` adds body and history
    pub async fn get(&self, owner: &str, name: &str, full: bool) -> Result<Record, ClientError> {
        let mut request = self.http.get(self.url(&[owner, name]));
        if full {
            request = request.query(&[("full", "1")]);
        }

        let response = request.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// List records, optionally of one owner
    pub async fn list(&self, owner: Option<&str>) -> Result<Vec<Record>, ClientError> {
        let url = match owner {
            Some(owner) => self.url(&[owner]),
            None => format!("{}/", self.base_url),
        };

        let response = self.http.get(url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
