//! Data models
//!
//! Rust structs representing database rows.
//! Timestamps are chrono UTC values; generated IDs are ULIDs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Users
// =============================================================================

/// A registered identity
///
/// The public key is kept exactly as submitted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub name: String,
    pub email: String,
    pub public_key_pem: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Records
// =============================================================================

/// Current head of an `(owner, name)` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entry {
    pub owner: String,
    pub name: String,
    pub cid: String,
    pub note: Option<String>,
    pub body: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One past value of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub cid: String,
    pub set_at: DateTime<Utc>,
}

/// Selection for record listings; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub owner: Option<String>,
    pub name: Option<String>,
    pub cid: Option<String>,
}

/// Partial update of a record
///
/// Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EntryUpdate {
    /// New name (rename)
    pub name: Option<String>,
    pub note: Option<String>,
    pub body: Option<String>,
}

impl EntryUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.note.is_none() && self.body.is_none()
    }
}

// =============================================================================
// Federation
// =============================================================================

/// A remote actor following a local user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Follower {
    /// Actor URI of the follower
    pub follower: String,
    /// Local user being followed
    pub target: String,
    pub created_at: DateTime<Utc>,
}

/// A note published to followers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxNote {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub cid: String,
    /// Rendered HTML content
    pub content: String,
    pub published: DateTime<Utc>,
}

/// Table sizes reported on the metrics endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub users: i64,
    pub records: i64,
    pub followers: i64,
}
