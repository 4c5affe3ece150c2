//! ActivityPub federation module
//!
//! Handles:
//! - HTTP Signatures (outbound signing, optional inbound verification)
//! - Signed activity delivery
//! - Remote actor and inbox discovery
//! - Follower Directory
//! - Inbox dispatch (Follow, Undo, Delete)
//! - Outbound Create(Note) notification
//! - Actor/collection documents
//! - WebFinger

mod activity;
mod actor;
mod delivery;
mod followers;
mod notifier;
pub mod presenter;
mod signature;
mod webfinger;

#[cfg(test)]
pub(crate) mod test_support;

pub use activity::{ActivityType, InboxDispatcher, InboxOutcome};
pub use actor::{ActorResolver, http_client};
pub use delivery::{ACTIVITY_JSON, ActivityDelivery, DeliveryError, DeliveryResult, builder};
pub use followers::{FollowerDirectory, InMemoryFollowerDirectory};
pub use notifier::OutboundNotifier;
pub use presenter::ServiceUrls;
pub use signature::{
    ParsedSignature, SignatureHeaders, extract_actor_domain, generate_digest, http_date,
    key_id_matches_actor, parse_signature_header, sign_request, signing_string, verify_signature,
};
pub use webfinger::{WebFingerLink, WebFingerResponse, generate_webfinger_response, parse_resource};
