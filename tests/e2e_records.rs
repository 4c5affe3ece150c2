//! E2E tests for record endpoints
//!
//! Registration, ownership-token mutations and public reads.

mod common;

use common::{CID_A, CID_B, TestServer, alice_token, mallory_token};
use serde_json::Value;

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn test_register_user() {
    let server = TestServer::new().await;

    let response = server.register("alice").await;
    assert_eq!(response.status(), 201);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["name"], "alice");
}

#[tokio::test]
async fn test_register_twice_conflicts() {
    let server = TestServer::new().await;

    assert_eq!(server.register("alice").await.status(), 201);
    assert_eq!(server.register("alice").await.status(), 409);
}

#[tokio::test]
async fn test_register_requires_valid_email_and_key() {
    let server = TestServer::new().await;

    let missing_email = server
        .client
        .post(server.url("/alice"))
        .body(common::ALICE_PUBLIC)
        .send()
        .await
        .unwrap();
    assert_eq!(missing_email.status(), 400);

    let bad_email = server
        .client
        .post(server.url("/alice"))
        .header("Email", "not an email")
        .body(common::ALICE_PUBLIC)
        .send()
        .await
        .unwrap();
    assert_eq!(bad_email.status(), 400);

    let bad_key = server
        .client
        .post(server.url("/alice"))
        .header("Email", "alice@example.com")
        .body("-----BEGIN PUBLIC KEY-----\nnope\n-----END PUBLIC KEY-----\n")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_key.status(), 400);

    let json: Value = bad_key.json().await.unwrap();
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_register_accepts_pkcs1_key() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.url("/alice"))
        .header("Email", "alice@example.com")
        .body(include_str!("fixtures/alice_public_key_pkcs1.pem"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // Tokens verify against the PKCS#1 registration too
    assert_eq!(server.put("alice", "doc", CID_A).await.status(), 200);
}

// =============================================================================
// Set
// =============================================================================

#[tokio::test]
async fn test_put_and_get_record() {
    let server = TestServer::new().await;
    server.register("alice").await;

    let response = server.put("alice", "doc", CID_A).await;
    assert_eq!(response.status(), 200);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["owner"], "alice");
    assert_eq!(json["cid"], CID_A);

    let response = server.client.get(server.url("/alice/doc")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["cid"], CID_A);
    assert!(json.get("history").is_none());
}

#[tokio::test]
async fn test_put_without_token_is_unauthorized() {
    let server = TestServer::new().await;
    server.register("alice").await;

    let response = server
        .client
        .put(server.url("/alice/doc"))
        .json(&serde_json::json!({ "cid": CID_A }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_put_with_mismatched_cid_claim_is_unauthorized() {
    let server = TestServer::new().await;
    server.register("alice").await;

    let token = alice_token(&[("owner", "alice"), ("name", "doc"), ("cid", CID_B)]);
    let response = server
        .client
        .put(server.url("/alice/doc"))
        .header("Token", token)
        .json(&serde_json::json!({ "cid": CID_A }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let json: Value = response.json().await.unwrap();
    assert!(json["error"].as_str().unwrap().contains("cid"));

    // Nothing was written
    let response = server.client.get(server.url("/alice/doc")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_put_signed_by_other_key_is_unauthorized() {
    let server = TestServer::new().await;
    server.register("alice").await;

    let token = mallory_token(&[("owner", "alice"), ("name", "doc"), ("cid", CID_A)]);
    let response = server
        .client
        .put(server.url("/alice/doc"))
        .header("Token", token)
        .json(&serde_json::json!({ "cid": CID_A }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_put_for_unregistered_owner_is_unauthorized() {
    let server = TestServer::new().await;

    assert_eq!(server.put("nobody", "doc", CID_A).await.status(), 401);
}

#[tokio::test]
async fn test_put_rejects_malformed_cid() {
    let server = TestServer::new().await;
    server.register("alice").await;

    assert_eq!(server.put("alice", "doc", "not-a-cid").await.status(), 400);
}

async fn assert_validation_error(response: reqwest::Response) {
    assert_eq!(response.status(), 400);
    let json: Value = response.json().await.unwrap();
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_put_without_body_is_bad_request() {
    let server = TestServer::new().await;
    server.register("alice").await;

    let token = alice_token(&[("owner", "alice"), ("name", "doc"), ("cid", CID_A)]);
    let response = server
        .client
        .put(server.url("/alice/doc"))
        .header("Token", token)
        .send()
        .await
        .unwrap();

    assert_validation_error(response).await;
}

#[tokio::test]
async fn test_put_without_cid_is_bad_request() {
    let server = TestServer::new().await;
    server.register("alice").await;

    let token = alice_token(&[("owner", "alice"), ("name", "doc"), ("cid", CID_A)]);
    let response = server
        .client
        .put(server.url("/alice/doc"))
        .header("Token", token)
        .json(&serde_json::json!({ "note": "x" }))
        .send()
        .await
        .unwrap();

    assert_validation_error(response).await;
}

#[tokio::test]
async fn test_put_with_invalid_json_is_bad_request() {
    let server = TestServer::new().await;
    server.register("alice").await;

    let token = alice_token(&[("owner", "alice"), ("name", "doc"), ("cid", CID_A)]);
    let response = server
        .client
        .put(server.url("/alice/doc"))
        .header("Token", token)
        .header("content-type", "application/json")
        .body("{\"cid\": ")
        .send()
        .await
        .unwrap();

    assert_validation_error(response).await;
}

#[tokio::test]
async fn test_patch_without_body_is_bad_request() {
    let server = TestServer::new().await;
    server.register("alice").await;
    server.put("alice", "doc", CID_A).await;

    let token = alice_token(&[("owner", "alice"), ("name", "doc"), ("note", "x")]);
    let response = server
        .client
        .patch(server.url("/alice/doc"))
        .header("Token", token)
        .send()
        .await
        .unwrap();

    assert_validation_error(response).await;
}

#[tokio::test]
async fn test_history_is_newest_first() {
    let server = TestServer::new().await;
    server.register("alice").await;

    server.put("alice", "doc", CID_A).await;
    server.put("alice", "doc", CID_B).await;

    let response = server
        .client
        .get(server.url("/alice/doc?full=1"))
        .send()
        .await
        .unwrap();
    let json: Value = response.json().await.unwrap();

    assert_eq!(json["cid"], CID_B);
    let history = json["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["cid"], CID_B);
    assert_eq!(history[1]["cid"], CID_A);
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn test_list_filters() {
    let server = TestServer::new().await;
    server.register("alice").await;
    server.register("bob").await;

    server.put("alice", "one", CID_A).await;
    server.put("alice", "two", CID_B).await;
    server.put("bob", "three", CID_A).await;

    let all: Vec<Value> = server
        .client
        .get(server.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 3);

    let by_cid: Vec<Value> = server
        .client
        .get(server.url(&format!("/?cid={}", CID_A)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_cid.len(), 2);

    let alice: Vec<Value> = server
        .client
        .get(server.url("/alice"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|e| e["owner"] == "alice"));

    let nobody: Vec<Value> = server
        .client
        .get(server.url("/nobody"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(nobody.is_empty());
}

// =============================================================================
// Update
// =============================================================================

#[tokio::test]
async fn test_rename_note_and_body() {
    let server = TestServer::new().await;
    server.register("alice").await;
    server.put("alice", "doc", CID_A).await;

    let token = alice_token(&[("owner", "alice"), ("name", "doc"), ("new_name", "paper")]);
    let response = server
        .client
        .patch(server.url("/alice/doc"))
        .header("Token", token)
        .json(&serde_json::json!({ "name": "paper" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    assert_eq!(
        server.client.get(server.url("/alice/doc")).send().await.unwrap().status(),
        404
    );

    let token = alice_token(&[("owner", "alice"), ("name", "paper"), ("note", "v1")]);
    let response = server
        .client
        .patch(server.url("/alice/paper"))
        .header("Token", token)
        .json(&serde_json::json!({ "note": "v1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let token = alice_token(&[("owner", "alice"), ("name", "paper"), ("body", "# Paper")]);
    server
        .client
        .patch(server.url("/alice/paper"))
        .header("Token", token)
        .json(&serde_json::json!({ "body": "# Paper" }))
        .send()
        .await
        .unwrap();

    let json: Value = server
        .client
        .get(server.url("/alice/paper?full=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["cid"], CID_A);
    assert_eq!(json["note"], "v1");
    assert_eq!(json["body"], "# Paper");
}

#[tokio::test]
async fn test_delete_token_cannot_rename() {
    let server = TestServer::new().await;
    server.register("alice").await;
    server.put("alice", "doc", CID_A).await;

    let token = alice_token(&[("owner", "alice"), ("name", "doc")]);
    let response = server
        .client
        .patch(server.url("/alice/doc"))
        .header("Token", token)
        .json(&serde_json::json!({ "name": "stolen" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_rename_onto_existing_record_conflicts() {
    let server = TestServer::new().await;
    server.register("alice").await;
    server.put("alice", "one", CID_A).await;
    server.put("alice", "two", CID_B).await;

    let token = alice_token(&[("owner", "alice"), ("name", "one"), ("new_name", "two")]);
    let response = server
        .client
        .patch(server.url("/alice/one"))
        .header("Token", token)
        .json(&serde_json::json!({ "name": "two" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 409);
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn test_delete_record() {
    let server = TestServer::new().await;
    server.register("alice").await;
    server.put("alice", "doc", CID_A).await;

    let token = alice_token(&[("owner", "alice"), ("name", "doc")]);
    let response = server
        .client
        .delete(server.url("/alice/doc"))
        .header("Token", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    assert_eq!(
        server.client.get(server.url("/alice/doc")).send().await.unwrap().status(),
        404
    );

    let response = server
        .client
        .delete(server.url("/alice/doc"))
        .header("Token", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
