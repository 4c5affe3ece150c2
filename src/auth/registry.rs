//! Key Registry contract and public key normalisation
//!
//! Public keys are stored exactly as the user submitted them. Both PKIX
//! (`BEGIN PUBLIC KEY`) and PKCS#1 (`BEGIN RSA PUBLIC KEY`) encodings are
//! accepted and normalised when read.

use async_trait::async_trait;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::pkcs8::der::pem;

use super::TokenError;
use crate::error::AppError;

/// Maps a user identifier to its registered public key
///
/// Implementations must reject a second registration for the same user
/// with `AppError::Conflict`.
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    /// Register a user's public key exactly once
    ///
    /// # Errors
    /// - `AppError::Validation` if the key does not parse
    /// - `AppError::Conflict` if the user already has a key
    async fn register(&self, user_id: &str, email: &str, public_key_pem: &str)
    -> Result<(), AppError>;

    /// Look up the stored PEM for a user, `None` when unknown
    async fn lookup(&self, user_id: &str) -> Result<Option<String>, AppError>;
}

/// Parse a stored public key PEM into an RSA key
///
/// Accepts, in order:
/// 1. PKIX SubjectPublicKeyInfo under a `PUBLIC KEY` label
/// 2. PKCS#1 under an `RSA PUBLIC KEY` label
/// 3. PKCS#1 DER under a `PUBLIC KEY` label (written by older clients)
pub fn decode_public_key_pem(pem: &str) -> Result<RsaPublicKey, TokenError> {
    let pem = pem.trim();

    if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
        return Ok(key);
    }

    if let Ok(key) = RsaPublicKey::from_pkcs1_pem(pem) {
        return Ok(key);
    }

    let der = pem_body(pem, "PUBLIC KEY").ok_or(TokenError::MalformedKey)?;
    RsaPublicKey::from_pkcs1_der(&der).map_err(|_| TokenError::MalformedKey)
}

/// Check that a submitted key is usable before storing it
pub fn validate_public_key_pem(pem: &str) -> Result<(), AppError> {
    decode_public_key_pem(pem)
        .map(|_| ())
        .map_err(|_| AppError::Validation("Public key is not a valid RSA PEM".to_string()))
}

fn pem_body(text: &str, label: &str) -> Option<Vec<u8>> {
    match pem::decode_vec(text.as_bytes()) {
        Ok((found, der)) if found == label => Some(der),
        _ => None,
    }
}
