//! Common test utilities for E2E tests

#![allow(dead_code)]

pub mod peer;
pub mod schema_validator;

use gravity::auth::{Claims, issue_token};
use gravity::data::{Database, SERVICE_KEY_SETTING};
use gravity::{AppState, config};
use rsa::RsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const DOMAIN: &str = "test.example.com";
pub const BASE_URL: &str = "https://test.example.com";

pub const ALICE_PRIVATE: &str = include_str!("../fixtures/alice_private_key.pem");
pub const ALICE_PUBLIC: &str = include_str!("../fixtures/alice_public_key.pem");
pub const MALLORY_PRIVATE: &str = include_str!("../fixtures/mallory_private_key.pem");
pub const MALLORY_PUBLIC: &str = include_str!("../fixtures/mallory_public_key.pem");

/// Valid CIDv0 values
pub const CID_A: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
pub const CID_B: &str = "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

pub fn test_config(db_path: std::path::PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            domain: DOMAIN.to_string(),
            protocol: "https".to_string(),
        },
        database: config::DatabaseConfig { path: db_path },
        federation: config::FederationConfig {
            delivery_timeout_seconds: 5,
            max_concurrent_deliveries: 4,
            verify_inbound_signatures: false,
            allow_private_networks: true,
            user_agent: "Gravity/test".to_string(),
        },
        content: config::ContentConfig {
            gateway_url: "https://ipfs.io/ipfs/".to_string(),
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the default test configuration
    pub async fn with_config(adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        gravity::metrics::init_metrics();

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path().join("test.db"));
        adjust(&mut config);

        // Seed the service key so no key is generated per test
        let db = Database::connect(&config.database.path).await.unwrap();
        db.set_setting(SERVICE_KEY_SETTING, MALLORY_PRIVATE)
            .await
            .unwrap();

        // Initialize app state
        let state = AppState::with_database(config, Arc::new(db)).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = gravity::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Register `name` with alice's public key
    pub async fn register(&self, name: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/{}", name)))
            .header("Email", format!("{}@example.com", name))
            .body(ALICE_PUBLIC)
            .send()
            .await
            .unwrap()
    }

    /// Set a record with a correctly signed token
    pub async fn put(&self, owner: &str, name: &str, cid: &str) -> reqwest::Response {
        let token = alice_token(&[("owner", owner), ("name", name), ("cid", cid)]);
        self.client
            .put(self.url(&format!("/{}/{}", owner, name)))
            .header("Token", token)
            .json(&serde_json::json!({ "cid": cid }))
            .send()
            .await
            .unwrap()
    }
}

pub fn alice_key() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(ALICE_PRIVATE).unwrap()
}

/// Token signed with alice's private key
pub fn alice_token(pairs: &[(&str, &str)]) -> String {
    sign_token(&alice_key(), pairs)
}

/// Token signed with mallory's private key
pub fn mallory_token(pairs: &[(&str, &str)]) -> String {
    sign_token(&RsaPrivateKey::from_pkcs8_pem(MALLORY_PRIVATE).unwrap(), pairs)
}

fn sign_token(key: &RsaPrivateKey, pairs: &[(&str, &str)]) -> String {
    let claims: Claims = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    issue_token(key, &claims).unwrap()
}

/// Poll until `check` passes or a few seconds have gone by
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    false
}
