//! Client-side capability
//!
//! What a command-line tool needs to talk to a Gravity server: a keystore
//! for the owner's private key, an HTTP client that issues a fresh
//! ownership token for every mutation, and a content-store existence check
//! to run before announcing a new identifier.

mod content;
mod http;
mod keystore;

use thiserror::Error;

use crate::auth::TokenError;

pub use content::{ContentStore, IpfsContentStore};
pub use http::{DEFAULT_CONTENT_WAIT, GravityClient, Record};
pub use keystore::{DEFAULT_KEY_BITS, Keystore};

/// Client-side failures
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an error status
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Token could not be issued
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Key file unreadable or unusable
    #[error("key error: {0}")]
    Key(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Content store has no provider for the identifier
    #[error("content {0} is not available from any provider")]
    ContentUnavailable(String),

    /// Malformed URL or response
    #[error("invalid response: {0}")]
    Invalid(String),
}
