//! WebFinger
//!
//! Maps `acct:name@domain` to the actor URL of a local user.

use serde::{Deserialize, Serialize};

use super::delivery::ACTIVITY_JSON;
use super::presenter::ServiceUrls;
use crate::error::AppError;

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Parse a `acct:name@domain` resource addressed to this service
///
/// # Errors
/// `AppError::Validation` when the resource is malformed or names another
/// domain.
pub fn parse_resource(resource: &str, domain: &str) -> Result<String, AppError> {
    let acct = resource
        .strip_prefix("acct:")
        .ok_or_else(|| AppError::Validation("Resource must start with 'acct:'".to_string()))?;

    let (name, acct_domain) = acct
        .split_once('@')
        .filter(|(name, acct_domain)| {
            !name.is_empty() && !acct_domain.is_empty() && !acct_domain.contains('@')
        })
        .ok_or_else(|| AppError::Validation("Invalid acct format".to_string()))?;

    if !acct_domain.eq_ignore_ascii_case(domain) {
        return Err(AppError::Validation(format!(
            "Resource domain {} is not served here",
            acct_domain
        )));
    }

    Ok(name.to_string())
}

/// Generate WebFinger response for a local user
pub fn generate_webfinger_response(name: &str, domain: &str, urls: &ServiceUrls) -> WebFingerResponse {
    let actor_url = urls.actor(name);

    WebFingerResponse {
        subject: format!("acct:{}@{}", name, domain),
        aliases: Some(vec![actor_url.clone()]),
        links: vec![WebFingerLink {
            rel: "self".to_string(),
            link_type: Some(ACTIVITY_JSON.to_string()),
            href: Some(actor_url),
        }],
    }
}
