//! Activity processing
//!
//! Inbox Dispatcher: classifies incoming activities and maintains the
//! Follower Directory.
//!
//! | Inbound | Effect | Outbound |
//! |---|---|---|
//! | Follow | add (actor, target) | Accept to the actor's inbox |
//! | Undo(Follow) | remove (actor, target) | none |
//! | Delete | remove every pair with the actor as follower | none |
//! | other | logged, ignored | none |
//!
//! The directory is updated before the Accept is attempted; an Accept
//! failure never rolls the follow back.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::actor::ActorResolver;
use super::delivery::{ActivityDelivery, DeliveryError, builder};
use super::followers::FollowerDirectory;
use super::presenter::ServiceUrls;
use crate::auth::KeyRegistry;
use crate::data::EntityId;
use crate::error::AppError;
use crate::metrics::{ACTIVITYPUB_ACTIVITIES_RECEIVED, ACTIVITYPUB_ACTIVITIES_SENT};

/// ActivityPub activity types the inbox acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityType {
    Follow,
    Undo,
    Delete,
}

impl ActivityType {
    /// Parse activity type from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Follow" => Some(Self::Follow),
            "Undo" => Some(Self::Undo),
            "Delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// What the inbox did with an activity
#[derive(Debug)]
pub enum InboxOutcome {
    Followed {
        follower: String,
        target: String,
        /// Whether the pair was new
        created: bool,
        /// Outcome of the Accept courtesy notification
        accept: Result<u16, DeliveryError>,
    },
    Unfollowed {
        follower: String,
        target: String,
        removed: bool,
    },
    ActorRemoved {
        actor: String,
        removed: u64,
    },
    Ignored {
        activity_type: String,
    },
}

/// Read an id that may be given inline or as an object with `id`
fn id_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("id").and_then(Value::as_str),
        _ => None,
    }
    .filter(|id| !id.is_empty())
}

/// Inbox Dispatcher
///
/// Holds no state between requests beyond the Follower Directory.
pub struct InboxDispatcher {
    followers: Arc<dyn FollowerDirectory>,
    users: Arc<dyn KeyRegistry>,
    resolver: ActorResolver,
    delivery: ActivityDelivery,
    urls: ServiceUrls,
    /// Local domain for `acct:` targets
    domain: String,
    /// Bound on inbox discovery plus Accept delivery
    accept_timeout: Duration,
}

impl InboxDispatcher {
    pub fn new(
        followers: Arc<dyn FollowerDirectory>,
        users: Arc<dyn KeyRegistry>,
        resolver: ActorResolver,
        delivery: ActivityDelivery,
        urls: ServiceUrls,
        domain: String,
        accept_timeout: Duration,
    ) -> Self {
        Self {
            followers,
            users,
            resolver,
            delivery,
            urls,
            domain,
            accept_timeout,
        }
    }

    /// Process an incoming activity
    ///
    /// # Errors
    /// - `AppError::Validation` when `type` is missing, or `actor` is
    ///   missing on a handled type, or a Follow targets no local user
    /// - storage errors from the Follower Directory
    pub async fn dispatch(&self, activity: &Value) -> Result<InboxOutcome, AppError> {
        // 1. Parse activity type
        let activity_type = activity
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Validation("Missing activity type".to_string()))?;

        ACTIVITYPUB_ACTIVITIES_RECEIVED
            .with_label_values(&[activity_type])
            .inc();

        let Some(kind) = ActivityType::from_str(activity_type) else {
            tracing::info!(activity_type, "Ignoring unsupported activity");
            return Ok(InboxOutcome::Ignored {
                activity_type: activity_type.to_string(),
            });
        };

        let actor = activity
            .get("actor")
            .and_then(id_of)
            .ok_or_else(|| AppError::Validation("Missing actor".to_string()))?;

        // 2. Dispatch to type-specific handler
        match kind {
            ActivityType::Follow => self.handle_follow(activity, actor).await,
            ActivityType::Undo => self.handle_undo(activity, actor).await,
            ActivityType::Delete => self.handle_delete(actor).await,
        }
    }

    /// Resolve a Follow `object` to a registered local user
    async fn local_target(&self, object: Option<&Value>) -> Result<Option<String>, AppError> {
        let Some(object) = object.and_then(id_of) else {
            return Ok(None);
        };
        let Some(name) = self.urls.local_user(object, &self.domain) else {
            return Ok(None);
        };

        Ok(self.users.lookup(&name).await?.map(|_| name))
    }

    /// Handle Follow activity
    async fn handle_follow(&self, activity: &Value, actor: &str) -> Result<InboxOutcome, AppError> {
        // 1. Verify target is local user
        let target = self
            .local_target(activity.get("object"))
            .await?
            .ok_or_else(|| AppError::Validation("Follow target is not a local user".to_string()))?;

        // 2. Commit the relationship
        let created = self.followers.add(actor, &target).await?;
        tracing::info!(follower = %actor, target = %target, created, "Follow recorded");

        // 3. Send Accept; failure is logged only
        let accept = self.send_accept(activity, actor, &target).await;
        match &accept {
            Ok(status) => {
                tracing::info!(follower = %actor, target = %target, status, "Sent Accept");
            }
            Err(e) => {
                tracing::warn!(
                    follower = %actor,
                    target = %target,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to send Accept; follow kept"
                );
            }
        }

        Ok(InboxOutcome::Followed {
            follower: actor.to_string(),
            target,
            created,
            accept,
        })
    }

    async fn send_accept(
        &self,
        follow: &Value,
        actor: &str,
        target: &str,
    ) -> Result<u16, DeliveryError> {
        let accept = builder::accept(
            &self.urls.accept(&EntityId::new().0),
            &self.urls.actor(target),
            follow.clone(),
        );
        let key_id = self.urls.key_id(target);

        let attempt = async {
            let inbox = self.resolver.discover_inbox(actor).await?;
            self.delivery.deliver(&key_id, &inbox, &accept).await
        };

        let result = match tokio::time::timeout(self.accept_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout),
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        ACTIVITYPUB_ACTIVITIES_SENT
            .with_label_values(&["Accept", outcome])
            .inc();

        result
    }

    /// Handle Undo activity
    ///
    /// Only Undo(Follow) changes anything. The nested Follow's actor must
    /// be the actor undoing it.
    async fn handle_undo(&self, activity: &Value, actor: &str) -> Result<InboxOutcome, AppError> {
        let ignored = || InboxOutcome::Ignored {
            activity_type: "Undo".to_string(),
        };

        let Some(object) = activity.get("object").filter(|o| o.is_object()) else {
            tracing::debug!(actor = %actor, "Undo without embedded object, ignoring");
            return Ok(ignored());
        };

        if object.get("type").and_then(Value::as_str) != Some("Follow") {
            return Ok(ignored());
        }

        let follower = object.get("actor").and_then(id_of).unwrap_or(actor);
        if follower != actor {
            tracing::warn!(actor = %actor, follower = %follower, "Undo of someone else's Follow, ignoring");
            return Ok(ignored());
        }

        let Some(target) = self.local_target(object.get("object")).await? else {
            tracing::debug!(actor = %actor, "Undo Follow target is not a local user, ignoring");
            return Ok(ignored());
        };

        let removed = self.followers.remove(follower, &target).await?;
        tracing::info!(follower = %follower, target = %target, removed, "Follow undone");

        Ok(InboxOutcome::Unfollowed {
            follower: follower.to_string(),
            target,
            removed,
        })
    }

    /// Handle Delete activity
    ///
    /// A deleted remote actor stops following everyone.
    async fn handle_delete(&self, actor: &str) -> Result<InboxOutcome, AppError> {
        if actor.starts_with(&format!("{}/", self.urls.base())) {
            tracing::debug!(actor = %actor, "Delete from a local actor, ignoring");
            return Ok(InboxOutcome::Ignored {
                activity_type: "Delete".to_string(),
            });
        }

        let removed = self.followers.remove_all(actor).await?;
        tracing::info!(actor = %actor, removed, "Removed deleted actor from followers");

        Ok(InboxOutcome::ActorRemoved {
            actor: actor.to_string(),
            removed,
        })
    }
}
