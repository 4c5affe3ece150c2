//! Follower Directory
//!
//! The set of `(follower actor URI, local user)` pairs. The inbox is its
//! only writer; the outbound notifier reads it.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::AppError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FollowerDirectory: Send + Sync {
    /// Record that `follower` follows `target`
    ///
    /// Idempotent: returns `false` when the pair already existed.
    async fn add(&self, follower: &str, target: &str) -> Result<bool, AppError>;

    /// Forget one pair; returns whether it existed
    async fn remove(&self, follower: &str, target: &str) -> Result<bool, AppError>;

    /// Forget every pair where `follower` is the follower
    async fn remove_all(&self, follower: &str) -> Result<u64, AppError>;

    /// Followers of `target`, in no particular order
    async fn list(&self, target: &str) -> Result<Vec<String>, AppError>;
}

/// Process-local directory, mostly useful in tests and tooling
#[derive(Debug, Default)]
pub struct InMemoryFollowerDirectory {
    pairs: RwLock<BTreeSet<(String, String)>>,
}

impl InMemoryFollowerDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FollowerDirectory for InMemoryFollowerDirectory {
    async fn add(&self, follower: &str, target: &str) -> Result<bool, AppError> {
        let mut pairs = self.pairs.write().await;
        Ok(pairs.insert((follower.to_string(), target.to_string())))
    }

    async fn remove(&self, follower: &str, target: &str) -> Result<bool, AppError> {
        let mut pairs = self.pairs.write().await;
        Ok(pairs.remove(&(follower.to_string(), target.to_string())))
    }

    async fn remove_all(&self, follower: &str) -> Result<u64, AppError> {
        let mut pairs = self.pairs.write().await;
        let before = pairs.len();
        pairs.retain(|(f, _)| f != follower);
        Ok((before - pairs.len()) as u64)
    }

    async fn list(&self, target: &str) -> Result<Vec<String>, AppError> {
        let pairs = self.pairs.read().await;
        Ok(pairs
            .iter()
            .filter(|(_, t)| t == target)
            .map(|(f, _)| f.clone())
            .collect())
    }
}
