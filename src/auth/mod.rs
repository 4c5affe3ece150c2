//! Proof-of-ownership authentication
//!
//! Handles:
//! - Key Registry contract and public key normalisation
//! - Token issuing (client side) and verification (server side)
//! - `Token` header extraction

mod middleware;
pub mod registry;
pub mod token;

pub use middleware::{OwnershipToken, TOKEN_HEADER};
pub use registry::{KeyRegistry, decode_public_key_pem, validate_public_key_pem};
pub use token::{Claims, TokenError, TokenIssuer, TokenVerifier, claims, issue_token, verify_with_key};
