//! Outbound Notifier
//!
//! Fans a Create(Note) out to every follower of the note's owner. Each
//! follower gets its own discovery and delivery under one timeout; a slow
//! or failing follower never holds up the others. Failures are logged and
//! reported back, never retried here.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;

use super::actor::ActorResolver;
use super::delivery::{ActivityDelivery, DeliveryError, DeliveryResult};
use super::followers::FollowerDirectory;
use super::presenter::{self, ServiceUrls};
use crate::data::OutboxNote;
use crate::metrics::{ACTIVITYPUB_ACTIVITIES_SENT, FEDERATION_DELIVERY_DURATION_SECONDS};

pub struct OutboundNotifier {
    followers: Arc<dyn FollowerDirectory>,
    resolver: ActorResolver,
    delivery: ActivityDelivery,
    urls: ServiceUrls,
    /// Bound on one discovery plus one delivery
    delivery_timeout: Duration,
    max_concurrent: usize,
}

impl OutboundNotifier {
    pub fn new(
        followers: Arc<dyn FollowerDirectory>,
        resolver: ActorResolver,
        delivery: ActivityDelivery,
        urls: ServiceUrls,
        delivery_timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            followers,
            resolver,
            delivery,
            urls,
            delivery_timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Deliver a Create for `note` to every follower of its owner
    ///
    /// Returns one result per follower, in completion order.
    pub async fn notify(&self, note: &OutboxNote) -> Vec<DeliveryResult> {
        let followers = match self.followers.list(&note.owner).await {
            Ok(followers) => followers,
            Err(e) => {
                tracing::warn!(owner = %note.owner, error = %e, "Failed to list followers; skipping notification");
                return Vec::new();
            }
        };

        if followers.is_empty() {
            tracing::debug!(owner = %note.owner, "No followers to notify");
            return Vec::new();
        }

        let activity = presenter::create_activity(&self.urls, note);
        let key_id = self.urls.key_id(&note.owner);

        tracing::info!(
            owner = %note.owner,
            name = %note.name,
            followers = followers.len(),
            "Notifying followers"
        );

        let results: Vec<DeliveryResult> = stream::iter(followers)
            .map(|follower| self.deliver_to(follower, &key_id, &activity))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let delivered = results.iter().filter(|r| r.success).count();
        tracing::info!(
            owner = %note.owner,
            name = %note.name,
            delivered,
            failed = results.len() - delivered,
            "Notification finished"
        );

        results
    }

    /// Run [`notify`](Self::notify) on a detached task
    pub fn spawn(self: &Arc<Self>, note: OutboxNote) -> JoinHandle<Vec<DeliveryResult>> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move { notifier.notify(&note).await })
    }

    async fn deliver_to(&self, follower: String, key_id: &str, activity: &Value) -> DeliveryResult {
        let _timer = FEDERATION_DELIVERY_DURATION_SECONDS
            .with_label_values(&["Create"])
            .start_timer();

        let attempt = async {
            let inbox = self
                .resolver
                .discover_inbox(&follower)
                .await
                .map_err(|e| (None, e))?;
            match self.delivery.deliver(key_id, &inbox, activity).await {
                Ok(status) => Ok((inbox, status)),
                Err(e) => Err((Some(inbox), e)),
            }
        };

        let outcome = match tokio::time::timeout(self.delivery_timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => Err((None, DeliveryError::Timeout)),
        };

        match outcome {
            Ok((inbox, status)) => {
                ACTIVITYPUB_ACTIVITIES_SENT
                    .with_label_values(&["Create", "success"])
                    .inc();
                tracing::debug!(follower = %follower, inbox = %inbox, status, "Delivered Create");
                DeliveryResult::delivered(follower, inbox, status)
            }
            Err((inbox, e)) => {
                ACTIVITYPUB_ACTIVITIES_SENT
                    .with_label_values(&["Create", e.kind()])
                    .inc();
                tracing::warn!(
                    follower = %follower,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to deliver Create"
                );
                DeliveryResult::failed(follower, inbox, &e)
            }
        }
    }
}
