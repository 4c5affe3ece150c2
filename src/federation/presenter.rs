//! Actor/Collection Presenter
//!
//! Stateless rendering of actor, collection, note and create documents.
//! URL layout:
//!
//! | Document | URL |
//! |---|---|
//! | actor | `{base}/pub/user/{name}` |
//! | followers | `{base}/pub/user/{name}/followers` |
//! | outbox | `{base}/pub/user/{name}/outbox` |
//! | shared inbox | `{base}/pub` |
//! | note | `{base}/pub/note/{id}` |
//! | create | `{base}/pub/create/{id}` |

use serde_json::Value;

use super::delivery::builder;
use crate::data::OutboxNote;

/// URLs of the documents this service publishes
#[derive(Debug, Clone)]
pub struct ServiceUrls {
    base: String,
}

impl ServiceUrls {
    pub fn new(base_url: &str) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn actor(&self, name: &str) -> String {
        format!("{}/pub/user/{}", self.base, name)
    }

    /// Key ID used when signing as `name`
    pub fn key_id(&self, name: &str) -> String {
        format!("{}#main-key", self.actor(name))
    }

    pub fn followers(&self, name: &str) -> String {
        format!("{}/followers", self.actor(name))
    }

    pub fn outbox(&self, name: &str) -> String {
        format!("{}/outbox", self.actor(name))
    }

    pub fn inbox(&self) -> String {
        format!("{}/pub", self.base)
    }

    pub fn note(&self, id: &str) -> String {
        format!("{}/pub/note/{}", self.base, id)
    }

    pub fn create(&self, id: &str) -> String {
        format!("{}/pub/create/{}", self.base, id)
    }

    pub fn accept(&self, id: &str) -> String {
        format!("{}/pub/accept/{}", self.base, id)
    }

    /// Resolve a Follow object to a local user name
    ///
    /// Accepts the actor URL (trailing slash tolerated), `acct:name@domain`
    /// and `name@domain`, where `domain` is this service's domain.
    pub fn local_user(&self, object: &str, domain: &str) -> Option<String> {
        let object = object.trim();

        if let Some(rest) = object.strip_prefix(&format!("{}/pub/user/", self.base)) {
            let name = rest.trim_end_matches('/');
            return (!name.is_empty() && !name.contains(['/', '?', '#'])).then(|| name.to_string());
        }

        let acct = object.strip_prefix("acct:").unwrap_or(object);
        let (name, acct_domain) = acct.split_once('@')?;
        (!name.is_empty() && acct_domain.eq_ignore_ascii_case(domain)).then(|| name.to_string())
    }
}

/// Human-readable note content, HTML-escaped
pub fn note_content(owner: &str, name: &str, cid: &str, gateway_url: &str) -> String {
    let text = format!("{}/{}: {}{}", owner, name, gateway_url, cid);
    html_escape::encode_text(&text).into_owned()
}

/// Actor document for a registered user
///
/// All local actors publish the service key.
pub fn actor(urls: &ServiceUrls, name: &str, public_key_pem: &str) -> Value {
    let actor_url = urls.actor(name);

    serde_json::json!({
        "@context": builder::context(),
        "type": "Person",
        "id": actor_url,
        "preferredUsername": name,
        "name": name,
        "url": format!("{}/{}", urls.base(), name),
        "inbox": urls.inbox(),
        "outbox": urls.outbox(name),
        "followers": urls.followers(name),
        "manuallyApprovesFollowers": false,
        "endpoints": {
            "sharedInbox": urls.inbox()
        },
        "publicKey": {
            "id": urls.key_id(name),
            "owner": actor_url,
            "publicKeyPem": public_key_pem
        }
    })
}

fn collection_page(id: String, part_of: String, items: Vec<Value>) -> Value {
    serde_json::json!({
        "type": "OrderedCollectionPage",
        "id": id,
        "partOf": part_of,
        "totalItems": items.len(),
        "orderedItems": items
    })
}

fn collection(id: String, page: Value) -> Value {
    let total = page["totalItems"].clone();
    serde_json::json!({
        "@context": builder::context(),
        "type": "OrderedCollection",
        "id": id,
        "totalItems": total,
        "first": page
    })
}

fn with_context(mut document: Value) -> Value {
    if let Value::Object(map) = &mut document {
        map.insert("@context".to_string(), builder::context());
    }
    document
}

/// Followers page; the only page, holding every follower
pub fn followers_page(urls: &ServiceUrls, name: &str, followers: &[String]) -> Value {
    let items = followers.iter().map(|f| Value::String(f.clone())).collect();
    collection_page(
        format!("{}?page=1", urls.followers(name)),
        urls.followers(name),
        items,
    )
}

/// Followers collection; `first` is the whole collection
pub fn followers_collection(urls: &ServiceUrls, name: &str, followers: &[String]) -> Value {
    collection(urls.followers(name), followers_page(urls, name, followers))
}

/// Followers page with its own JSON-LD context (served at `?page=1`)
pub fn followers_page_document(urls: &ServiceUrls, name: &str, followers: &[String]) -> Value {
    with_context(followers_page(urls, name, followers))
}

/// Note object for an outbox entry, without context
pub fn note_object(urls: &ServiceUrls, note: &OutboxNote) -> Value {
    builder::note(
        &urls.note(&note.id),
        &urls.actor(&note.owner),
        &note.content,
        &note.published.to_rfc3339(),
    )
}

/// Create(Note) activity for an outbox entry
pub fn create_activity(urls: &ServiceUrls, note: &OutboxNote) -> Value {
    builder::create(
        &urls.create(&note.id),
        &urls.actor(&note.owner),
        note_object(urls, note),
        &note.published.to_rfc3339(),
    )
}

/// Standalone Note document
pub fn note_document(urls: &ServiceUrls, note: &OutboxNote) -> Value {
    with_context(note_object(urls, note))
}

/// Outbox collection of Create activities, newest first
pub fn outbox_collection(urls: &ServiceUrls, name: &str, notes: &[OutboxNote]) -> Value {
    let items = notes
        .iter()
        .map(|note| {
            let mut create = create_activity(urls, note);
            if let Value::Object(map) = &mut create {
                map.remove("@context");
            }
            create
        })
        .collect();

    collection(
        urls.outbox(name),
        collection_page(
            format!("{}?page=1", urls.outbox(name)),
            urls.outbox(name),
            items,
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn urls() -> ServiceUrls {
        ServiceUrls::new("https://gravity.example/")
    }

    fn sample_note() -> OutboxNote {
        OutboxNote {
            id: "01HNOTE".to_string(),
            owner: "alice".to_string(),
            name: "doc".to_string(),
            cid: "Qm123".to_string(),
            content: note_content("alice", "doc", "Qm123", "https://ipfs.io/ipfs/"),
            published: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn test_url_layout() {
        let urls = urls();
        assert_eq!(urls.actor("alice"), "https://gravity.example/pub/user/alice");
        assert_eq!(
            urls.key_id("alice"),
            "https://gravity.example/pub/user/alice#main-key"
        );
        assert_eq!(urls.inbox(), "https://gravity.example/pub");
        assert_eq!(
            urls.followers("alice"),
            "https://gravity.example/pub/user/alice/followers"
        );
    }

    #[test]
    fn test_local_user_resolution() {
        let urls = urls();
        let domain = "gravity.example";

        assert_eq!(
            urls.local_user("https://gravity.example/pub/user/alice", domain),
            Some("alice".to_string())
        );
        assert_eq!(
            urls.local_user("https://gravity.example/pub/user/alice/", domain),
            Some("alice".to_string())
        );
        assert_eq!(
            urls.local_user("acct:alice@gravity.example", domain),
            Some("alice".to_string())
        );
        assert_eq!(urls.local_user("alice@GRAVITY.example", domain), Some("alice".to_string()));

        assert_eq!(urls.local_user("https://other.example/pub/user/alice", domain), None);
        assert_eq!(urls.local_user("acct:alice@other.example", domain), None);
        assert_eq!(
            urls.local_user("https://gravity.example/pub/user/alice/outbox", domain),
            None
        );
        assert_eq!(urls.local_user("", domain), None);
    }

    #[test]
    fn test_note_content_is_escaped() {
        assert_eq!(
            note_content("alice", "<b>", "Qm1", "https://ipfs.io/ipfs/"),
            "alice/&lt;b&gt;: https://ipfs.io/ipfs/Qm1"
        );
    }

    #[test]
    fn test_actor_document() {
        let doc = actor(&urls(), "alice", "PEM");

        assert_eq!(doc["type"], "Person");
        assert_eq!(doc["id"], "https://gravity.example/pub/user/alice");
        assert_eq!(doc["inbox"], "https://gravity.example/pub");
        assert_eq!(doc["publicKey"]["id"], "https://gravity.example/pub/user/alice#main-key");
        assert_eq!(doc["publicKey"]["owner"], doc["id"]);
        assert_eq!(doc["publicKey"]["publicKeyPem"], "PEM");
    }

    #[test]
    fn test_followers_collection_first_is_whole_collection() {
        let followers = vec!["https://remote/u/bob".to_string()];
        let doc = followers_collection(&urls(), "alice", &followers);

        assert_eq!(doc["type"], "OrderedCollection");
        assert_eq!(doc["totalItems"], 1);
        assert_eq!(doc["first"]["type"], "OrderedCollectionPage");
        assert_eq!(doc["first"]["orderedItems"][0], "https://remote/u/bob");
        assert_eq!(doc["first"]["partOf"], doc["id"]);

        let page = followers_page_document(&urls(), "alice", &followers);
        assert!(page.get("@context").is_some());
        assert_eq!(page["id"], "https://gravity.example/pub/user/alice/followers?page=1");
    }

    #[test]
    fn test_create_wraps_note() {
        let note = sample_note();
        let create = create_activity(&urls(), &note);

        assert_eq!(create["type"], "Create");
        assert_eq!(create["id"], "https://gravity.example/pub/create/01HNOTE");
        assert_eq!(create["actor"], "https://gravity.example/pub/user/alice");
        assert_eq!(create["object"]["type"], "Note");
        assert_eq!(create["object"]["id"], "https://gravity.example/pub/note/01HNOTE");
        assert_eq!(
            create["object"]["content"],
            "alice/doc: https://ipfs.io/ipfs/Qm123"
        );
        assert_eq!(create["object"]["published"], "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_outbox_items_have_no_context() {
        let doc = outbox_collection(&urls(), "alice", &[sample_note()]);

        assert_eq!(doc["totalItems"], 1);
        let item = &doc["first"]["orderedItems"][0];
        assert_eq!(item["type"], "Create");
        assert!(item.get("@context").is_none());
    }
}
