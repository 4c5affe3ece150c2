//! SQLite database operations
//!
//! All database access goes through this module. `Database` implements the
//! Key Registry, Follower Directory and Record Store contracts.

use async_trait::async_trait;
use chrono::Utc;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use super::records::RecordStore;
use crate::auth::{KeyRegistry, validate_public_key_pem};
use crate::error::AppError;
use crate::federation::FollowerDirectory;

/// Settings key holding the service private key (PKCS#8 PEM)
pub const SERVICE_KEY_SETTING: &str = "service_private_key";

/// Size of a freshly generated service key
const SERVICE_KEY_BITS: usize = 2048;

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn get_user(&self, name: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn user_exists(&self, name: &str) -> Result<bool, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }

    // =========================================================================
    // Counts
    // =========================================================================

    /// Row counts of registered users, current records and follow pairs
    pub async fn table_counts(&self) -> Result<TableCounts, AppError> {
        let (users, records, followers) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT (SELECT COUNT(*) FROM users), (SELECT COUNT(*) FROM head), (SELECT COUNT(*) FROM followers)",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(TableCounts {
            users,
            records,
            followers,
        })
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    pub async fn insert_outbox_note(&self, note: &OutboxNote) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO outbox (id, owner, name, cid, content, published) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&note.id)
        .bind(&note.owner)
        .bind(&note.name)
        .bind(&note.cid)
        .bind(&note.content)
        .bind(note.published)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_outbox_note(&self, id: &str) -> Result<Option<OutboxNote>, AppError> {
        let note = sqlx::query_as::<_, OutboxNote>("SELECT * FROM outbox WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(note)
    }

    /// Notes published by `owner`, newest first
    pub async fn list_outbox_notes(&self, owner: &str) -> Result<Vec<OutboxNote>, AppError> {
        let notes = sqlx::query_as::<_, OutboxNote>(
            "SELECT * FROM outbox WHERE owner = ? ORDER BY published DESC, id DESC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(notes)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Get setting value
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, AppError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    /// Set setting value
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Load the service keypair, generating and storing one when absent
    ///
    /// Concurrent first starts converge on whichever key was stored first.
    pub async fn get_or_create_service_key(&self) -> Result<RsaPrivateKey, AppError> {
        if let Some(pem) = self.get_setting(SERVICE_KEY_SETTING).await? {
            return parse_service_key(&pem);
        }

        tracing::info!(bits = SERVICE_KEY_BITS, "Generating service keypair");
        let generated = tokio::task::spawn_blocking(|| {
            RsaPrivateKey::new(&mut rand::thread_rng(), SERVICE_KEY_BITS)
        })
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("key generation failed: {}", e)))?;

        let pem = generated
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("key encoding failed: {}", e)))?;

        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(SERVICE_KEY_SETTING)
            .bind(pem.as_str())
            .execute(&self.pool)
            .await?;

        let stored = self
            .get_setting(SERVICE_KEY_SETTING)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("service key vanished")))?;
        parse_service_key(&stored)
    }

    async fn fetch_entry(&self, owner: &str, name: &str) -> Result<Option<Entry>, AppError> {
        let entry = sqlx::query_as::<_, Entry>("SELECT * FROM head WHERE owner = ? AND name = ?")
            .bind(owner)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }
}

fn parse_service_key(pem: &str) -> Result<RsaPrivateKey, AppError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("stored service key is invalid: {}", e)))
}

// =============================================================================
// Key Registry
// =============================================================================

#[async_trait]
impl KeyRegistry for Database {
    async fn register(
        &self,
        user_id: &str,
        email: &str,
        public_key_pem: &str,
    ) -> Result<(), AppError> {
        validate_public_key_pem(public_key_pem)?;

        let result = sqlx::query(
            "INSERT INTO users (name, email, public_key_pem, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(email)
        .bind(public_key_pem)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AppError::Conflict(format!(
                "User {} is already registered",
                user_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn lookup(&self, user_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.get_user(user_id).await?.map(|user| user.public_key_pem))
    }
}

// =============================================================================
// Follower Directory
// =============================================================================

#[async_trait]
impl FollowerDirectory for Database {
    async fn add(&self, follower: &str, target: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO followers (follower, target, created_at) VALUES (?, ?, ?)",
        )
        .bind(follower)
        .bind(target)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, follower: &str, target: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM followers WHERE follower = ? AND target = ?")
            .bind(follower)
            .bind(target)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_all(&self, follower: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM followers WHERE follower = ?")
            .bind(follower)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list(&self, target: &str) -> Result<Vec<String>, AppError> {
        let followers = sqlx::query_scalar::<_, String>(
            "SELECT follower FROM followers WHERE target = ? ORDER BY created_at",
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await?;

        Ok(followers)
    }
}

// =============================================================================
// Record Store
// =============================================================================

#[async_trait]
impl RecordStore for Database {
    async fn list(&self, filter: &EntryFilter) -> Result<Vec<Entry>, AppError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT * FROM head
            WHERE (?1 IS NULL OR owner = ?1)
              AND (?2 IS NULL OR name = ?2)
              AND (?3 IS NULL OR cid = ?3)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(filter.owner.as_deref())
        .bind(filter.name.as_deref())
        .bind(filter.cid.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn get(&self, owner: &str, name: &str) -> Result<Option<Entry>, AppError> {
        self.fetch_entry(owner, name).await
    }

    async fn upsert(
        &self,
        owner: &str,
        name: &str,
        cid: &str,
        note: Option<&str>,
    ) -> Result<Entry, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO head (owner, name, cid, note, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (owner, name) DO UPDATE SET
                cid = excluded.cid,
                note = COALESCE(excluded.note, head.note),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(owner)
        .bind(name)
        .bind(cid)
        .bind(note)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO history (owner, name, cid, set_at) VALUES (?, ?, ?, ?)")
            .bind(owner)
            .bind(name)
            .bind(cid)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let entry = sqlx::query_as::<_, Entry>("SELECT * FROM head WHERE owner = ? AND name = ?")
            .bind(owner)
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn update(
        &self,
        owner: &str,
        name: &str,
        update: &EntryUpdate,
    ) -> Result<Entry, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM head WHERE owner = ? AND name = ?",
        )
        .bind(owner)
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;
        if exists == 0 {
            return Err(AppError::NotFound);
        }

        let mut current_name = name.to_string();

        if let Some(new_name) = update.name.as_deref().filter(|n| *n != name) {
            let renamed = sqlx::query("UPDATE head SET name = ? WHERE owner = ? AND name = ?")
                .bind(new_name)
                .bind(owner)
                .bind(name)
                .execute(&mut *tx)
                .await;
            match renamed {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(AppError::Conflict(format!(
                        "{}/{} already exists",
                        owner, new_name
                    )));
                }
                Err(e) => return Err(e.into()),
            }

            sqlx::query("UPDATE history SET name = ? WHERE owner = ? AND name = ?")
                .bind(new_name)
                .bind(owner)
                .bind(name)
                .execute(&mut *tx)
                .await?;

            current_name = new_name.to_string();
        }

        if let Some(note) = &update.note {
            sqlx::query("UPDATE head SET note = ? WHERE owner = ? AND name = ?")
                .bind(note)
                .bind(owner)
                .bind(&current_name)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(body) = &update.body {
            sqlx::query("UPDATE head SET body = ? WHERE owner = ? AND name = ?")
                .bind(body)
                .bind(owner)
                .bind(&current_name)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE head SET updated_at = ? WHERE owner = ? AND name = ?")
            .bind(now)
            .bind(owner)
            .bind(&current_name)
            .execute(&mut *tx)
            .await?;

        let entry = sqlx::query_as::<_, Entry>("SELECT * FROM head WHERE owner = ? AND name = ?")
            .bind(owner)
            .bind(&current_name)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn delete(&self, owner: &str, name: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM head WHERE owner = ? AND name = ?")
            .bind(owner)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn history(&self, owner: &str, name: &str) -> Result<Vec<HistoryEntry>, AppError> {
        let history = sqlx::query_as::<_, HistoryEntry>(
            "SELECT cid, set_at FROM history WHERE owner = ? AND name = ? ORDER BY set_at DESC, id DESC",
        )
        .bind(owner)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(history)
    }
}
