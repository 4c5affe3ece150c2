//! Ownership tokens
//!
//! A token is a JWT signed with the owner's RSA private key (RS256).
//! The claim set is free-form: each mutating operation names the claims it
//! requires, and the verifier compares them by string equality.
//!
//! Tokens carry no expiry by default. When an `exp` claim is present it is
//! enforced.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::DecodePrivateKey;
use serde_json::Value;
use thiserror::Error;

use super::registry::{KeyRegistry, decode_public_key_pem};
use crate::error::AppError;
use crate::metrics::TOKEN_VERIFICATIONS_TOTAL;

/// Ordered claim set
pub type Claims = BTreeMap<String, String>;

/// The only accepted JWT algorithm
const TOKEN_ALGORITHM: &str = "RS256";

/// Reasons a token is rejected
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("unknown user")]
    UnknownUser,

    #[error("registered public key is malformed")]
    MalformedKey,

    #[error("signature does not verify")]
    InvalidSignature,

    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("token has expired")]
    Expired,

    #[error("claim {claim} does not match")]
    MismatchedClaim { claim: String },

    #[error("malformed token: {0}")]
    Malformed(String),
}

impl TokenError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::UnknownUser => "unknown_user",
            TokenError::MalformedKey => "malformed_key",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            TokenError::Expired => "expired",
            TokenError::MismatchedClaim { .. } => "mismatched_claim",
            TokenError::Malformed(_) => "malformed",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                TokenError::UnsupportedAlgorithm(err.to_string())
            }
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => TokenError::MalformedKey,
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}

/// Signs claim sets with a private key (client side)
#[derive(Clone)]
pub struct TokenIssuer {
    key: EncodingKey,
}

impl TokenIssuer {
    pub fn from_private_key(private_key: &RsaPrivateKey) -> Result<Self, TokenError> {
        let der = private_key
            .to_pkcs1_der()
            .map_err(|e| TokenError::Malformed(e.to_string()))?;

        Ok(Self {
            key: EncodingKey::from_rsa_der(der.as_bytes()),
        })
    }

    /// Load a PKCS#8 or PKCS#1 private key PEM
    pub fn from_pem(private_key_pem: &str) -> Result<Self, TokenError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|_| TokenError::MalformedKey)?;

        Self::from_private_key(&private_key)
    }

    /// Produce a signed token over exactly the given claims
    pub fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        Ok(encode(&Header::new(Algorithm::RS256), claims, &self.key)?)
    }
}

/// Issue a token with a private key in one call
pub fn issue_token(private_key: &RsaPrivateKey, claims: &Claims) -> Result<String, TokenError> {
    TokenIssuer::from_private_key(private_key)?.issue(claims)
}

/// Verify a token against a stored public key PEM and the required claims
///
/// Pure check: no registry access, no side effects.
pub fn verify_with_key(token: &str, public_key_pem: &str, required: &Claims) -> Result<(), TokenError> {
    let public_key = decode_public_key_pem(public_key_pem)?;
    let der = public_key
        .to_pkcs1_der()
        .map_err(|_| TokenError::MalformedKey)?;
    let decoding_key = DecodingKey::from_rsa_der(der.as_bytes());

    ensure_rs256(token)?;

    let data = decode::<BTreeMap<String, Value>>(token, &decoding_key, &validation())?;

    for (claim, expected) in required {
        match data.claims.get(claim).and_then(Value::as_str) {
            Some(actual) if actual == expected => {}
            _ => {
                return Err(TokenError::MismatchedClaim {
                    claim: claim.clone(),
                });
            }
        }
    }

    Ok(())
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = true;
    validation.validate_aud = false;
    validation
}

/// Reject anything but RS256 before touching the signature
///
/// A header naming `none` does not even deserialize in jsonwebtoken, so the
/// raw header is inspected to report the algorithm that was attempted.
fn ensure_rs256(token: &str) -> Result<(), TokenError> {
    let header_segment = token
        .split('.')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| TokenError::Malformed("missing header".to_string()))?;

    let header_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(header_segment.trim_end_matches('='))
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    let header: Value =
        serde_json::from_slice(&header_bytes).map_err(|e| TokenError::Malformed(e.to_string()))?;

    match header.get("alg").and_then(Value::as_str) {
        Some(TOKEN_ALGORITHM) => Ok(()),
        Some(other) => Err(TokenError::UnsupportedAlgorithm(other.to_string())),
        None => Err(TokenError::Malformed("missing alg".to_string())),
    }
}

/// Verifies ownership tokens against the Key Registry
#[derive(Clone)]
pub struct TokenVerifier {
    registry: Arc<dyn KeyRegistry>,
}

impl TokenVerifier {
    pub fn new(registry: Arc<dyn KeyRegistry>) -> Self {
        Self { registry }
    }

    /// Verify `token` for `user_id` carrying every claim in `required`
    ///
    /// # Errors
    /// `AppError::Token` for every rejection; `AppError::Database` when the
    /// registry cannot be read.
    pub async fn verify(&self, token: &str, user_id: &str, required: &Claims) -> Result<(), AppError> {
        let outcome = match self.registry.lookup(user_id).await? {
            Some(public_key_pem) => verify_with_key(token, &public_key_pem, required),
            None => Err(TokenError::UnknownUser),
        };

        match outcome {
            Ok(()) => {
                TOKEN_VERIFICATIONS_TOTAL.with_label_values(&["ok"]).inc();
                Ok(())
            }
            Err(err) => {
                TOKEN_VERIFICATIONS_TOTAL
                    .with_label_values(&[err.kind()])
                    .inc();
                tracing::debug!(user = %user_id, error = %err, "Token rejected");
                Err(err.into())
            }
        }
    }
}

/// Build a claim set from string pairs
pub fn claims<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Claims {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
