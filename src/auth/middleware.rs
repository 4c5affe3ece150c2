//! Ownership token extraction
//!
//! Mutating record requests carry the signed token in a `Token` header.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

/// Header carrying the ownership token
pub const TOKEN_HEADER: &str = "Token";

/// Raw ownership token taken from the request
///
/// Extraction only checks presence; verification against the claims of
/// the operation happens in the service layer.
///
/// # Usage
/// ```ignore
/// async fn handler(OwnershipToken(token): OwnershipToken) -> impl IntoResponse {
///     // verify token for the record being changed
/// }
/// ```
#[derive(Debug, Clone)]
pub struct OwnershipToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for OwnershipToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(TOKEN_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| OwnershipToken(token.to_owned()))
            .ok_or(AppError::Unauthorized)
    }
}
