//! Record service
//!
//! Registration and the record mutation flow: verify the ownership token,
//! commit the write, then hand the change to the Outbound Notifier.
//! Nothing is written before the token checks out.

use std::sync::Arc;

use chrono::Utc;

use crate::auth::{KeyRegistry, TokenVerifier, claims};
use crate::data::{
    Database, EntityId, Entry, EntryFilter, EntryUpdate, HistoryEntry, OutboxNote, RecordStore,
};
use crate::error::AppError;
use crate::federation::{OutboundNotifier, presenter};
use crate::metrics::RECORD_MUTATIONS_TOTAL;

const MAX_NAME_LENGTH: usize = 64;
/// Owner names that collide with service routes
const RESERVED_OWNERS: &[&str] = &["pub", "metrics", "health", ".well-known"];
const CID_V0_LENGTH: usize = 46;
const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Owner and record names: 1-64 of `[A-Za-z0-9._-]`
pub fn validate_name(name: &str) -> Result<(), AppError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid name: {:?}", name)))
    }
}

/// Syntactic email check
pub fn validate_email(email: &str) -> Result<(), AppError> {
    let invalid = || AppError::Validation(format!("Invalid email address: {:?}", email));

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    let domain_ok = domain
        .split('.')
        .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
        && domain.contains('.');
    let local_ok = !local.is_empty() && !local.chars().any(|c| c.is_whitespace() || c == '@');

    if local_ok && domain_ok {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Content identifier syntax
///
/// CIDv0 is `Qm` followed by base58 to 46 characters; CIDv1 is accepted in
/// its `b` (base32) and `z` (base58) multibase forms.
pub fn validate_cid(cid: &str) -> Result<(), AppError> {
    let valid = if cid.starts_with("Qm") {
        cid.len() == CID_V0_LENGTH && cid.chars().all(|c| BASE58_ALPHABET.contains(c))
    } else if let Some(rest) = cid.strip_prefix('b').or_else(|| cid.strip_prefix('z')) {
        rest.len() >= 8 && rest.chars().all(|c| c.is_ascii_alphanumeric())
    } else {
        false
    };

    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid content identifier: {:?}", cid)))
    }
}

/// Record service
pub struct RecordService {
    db: Arc<Database>,
    verifier: TokenVerifier,
    notifier: Arc<OutboundNotifier>,
    gateway_url: String,
}

impl RecordService {
    pub fn new(db: Arc<Database>, notifier: Arc<OutboundNotifier>, gateway_url: String) -> Self {
        Self {
            verifier: TokenVerifier::new(db.clone()),
            db,
            notifier,
            gateway_url,
        }
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Register `name` with a public key
    ///
    /// # Errors
    /// - `Validation` for a bad name, email or key
    /// - `Conflict` when the name is taken
    pub async fn register(&self, name: &str, email: &str, public_key_pem: &str) -> Result<(), AppError> {
        validate_name(name)?;
        if RESERVED_OWNERS.contains(&name) {
            return Err(AppError::Validation(format!("Name {:?} is reserved", name)));
        }
        validate_email(email)?;

        KeyRegistry::register(self.db.as_ref(), name, email, public_key_pem).await?;

        RECORD_MUTATIONS_TOTAL.with_label_values(&["register"]).inc();
        tracing::info!(owner = %name, "User registered");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn list(&self, filter: &EntryFilter) -> Result<Vec<Entry>, AppError> {
        RecordStore::list(self.db.as_ref(), filter).await
    }

    pub async fn get(&self, owner: &str, name: &str) -> Result<Entry, AppError> {
        self.db.get(owner, name).await?.ok_or(AppError::NotFound)
    }

    pub async fn history(&self, owner: &str, name: &str) -> Result<Vec<HistoryEntry>, AppError> {
        self.db.history(owner, name).await
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Point `owner/name` at `cid`
    ///
    /// Token claims: `owner`, `name`, `cid`.
    pub async fn set(
        &self,
        token: &str,
        owner: &str,
        name: &str,
        cid: &str,
        note: Option<&str>,
    ) -> Result<Entry, AppError> {
        validate_name(name)?;
        validate_cid(cid)?;

        self.verifier
            .verify(token, owner, &claims([("owner", owner), ("name", name), ("cid", cid)]))
            .await?;

        let entry = self.db.upsert(owner, name, cid, note).await?;

        RECORD_MUTATIONS_TOTAL.with_label_values(&["set"]).inc();
        tracing::info!(owner = %owner, name = %name, cid = %cid, "Record set");

        self.announce(&entry).await;
        Ok(entry)
    }

    /// Rename a record and/or change its note or body
    ///
    /// Token claims: `owner`, `name`, and each changed field under its own
    /// key with the new value.
    pub async fn update(
        &self,
        token: &str,
        owner: &str,
        name: &str,
        update: &EntryUpdate,
    ) -> Result<Entry, AppError> {
        if update.is_empty() {
            return Err(AppError::Validation("Nothing to update".to_string()));
        }
        if let Some(new_name) = &update.name {
            validate_name(new_name)?;
        }

        let mut required = claims([("owner", owner), ("name", name)]);
        if let Some(new_name) = &update.name {
            required.insert("new_name".to_string(), new_name.clone());
        }
        if let Some(note) = &update.note {
            required.insert("note".to_string(), note.clone());
        }
        if let Some(body) = &update.body {
            required.insert("body".to_string(), body.clone());
        }

        self.verifier.verify(token, owner, &required).await?;

        let entry = self.db.update(owner, name, update).await?;

        RECORD_MUTATIONS_TOTAL.with_label_values(&["update"]).inc();
        tracing::info!(
            owner = %owner,
            name = %name,
            new_name = ?update.name,
            note = update.note.is_some(),
            body = update.body.is_some(),
            "Record updated"
        );

        if update.note.is_some() || update.body.is_some() {
            self.announce(&entry).await;
        }
        Ok(entry)
    }

    /// Remove `owner/name`; its history is kept
    ///
    /// Token claims: `owner`, `name`.
    pub async fn delete(&self, token: &str, owner: &str, name: &str) -> Result<(), AppError> {
        self.verifier
            .verify(token, owner, &claims([("owner", owner), ("name", name)]))
            .await?;

        if !self.db.delete(owner, name).await? {
            return Err(AppError::NotFound);
        }

        RECORD_MUTATIONS_TOTAL.with_label_values(&["delete"]).inc();
        tracing::info!(owner = %owner, name = %name, "Record deleted");
        Ok(())
    }

    /// Persist the outbox note for a committed write and notify followers
    ///
    /// Failures here never undo the write.
    async fn announce(&self, entry: &Entry) {
        let note = OutboxNote {
            id: EntityId::new().0,
            owner: entry.owner.clone(),
            name: entry.name.clone(),
            cid: entry.cid.clone(),
            content: presenter::note_content(&entry.owner, &entry.name, &entry.cid, &self.gateway_url),
            published: Utc::now(),
        };

        if let Err(e) = self.db.insert_outbox_note(&note).await {
            tracing::warn!(owner = %note.owner, name = %note.name, error = %e, "Failed to store outbox note");
            return;
        }

        self.notifier.spawn(note);
    }
}
