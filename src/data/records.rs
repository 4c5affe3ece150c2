//! Record store contract
//!
//! Plain CRUD over the `(owner, name) -> cid` table. Callers verify the
//! ownership token before any write reaches this interface.

use async_trait::async_trait;

use super::models::{Entry, EntryFilter, EntryUpdate, HistoryEntry};
use crate::error::AppError;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records matching the filter, most recently updated first
    async fn list(&self, filter: &EntryFilter) -> Result<Vec<Entry>, AppError>;

    async fn get(&self, owner: &str, name: &str) -> Result<Option<Entry>, AppError>;

    /// Point `(owner, name)` at `cid`, creating the record if needed
    ///
    /// Appends to the record history. A `None` note keeps the current note.
    async fn upsert(
        &self,
        owner: &str,
        name: &str,
        cid: &str,
        note: Option<&str>,
    ) -> Result<Entry, AppError>;

    /// Apply a partial update (rename, note, body)
    ///
    /// # Errors
    /// - `AppError::NotFound` if the record does not exist
    /// - `AppError::Conflict` if the new name is already taken
    async fn update(&self, owner: &str, name: &str, update: &EntryUpdate)
    -> Result<Entry, AppError>;

    /// Remove the record head; returns whether a record existed
    async fn delete(&self, owner: &str, name: &str) -> Result<bool, AppError>;

    /// Past values, newest first
    async fn history(&self, owner: &str, name: &str) -> Result<Vec<HistoryEntry>, AppError>;
}
