//! Gravity - a public index of content identifiers
//!
//! Maps `(owner, name)` to content identifiers. Owners prove ownership with
//! RSA-signed tokens; remote ActivityPub servers can follow an owner and
//! receive a signed Create(Note) whenever one of their records changes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Record endpoints (Token header)                          │
//! │  - ActivityPub endpoints (/pub)                             │
//! │  - WebFinger, metrics                                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Service / Federation Layer                   │
//! │  - Token verification, record mutations                     │
//! │  - Inbox dispatch, outbound notification                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `auth`: Key Registry contract, ownership tokens
//! - `client`: client-side keystore, HTTP client, content store check
//! - `config`: Configuration management
//! - `data`: Database layer
//! - `error`: Error types
//! - `federation`: ActivityPub federation handling
//! - `service`: Business logic layer

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;

use rsa::RsaPublicKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like the database and federation clients.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// URLs of published documents
    pub urls: federation::ServiceUrls,

    /// Public half of the service key, published by every local actor
    pub service_public_key_pem: Arc<String>,

    /// Record mutations and registration
    pub records: Arc<service::RecordService>,

    /// Inbound activity processing
    pub inbox: Arc<federation::InboxDispatcher>,

    /// Remote actor lookups (inbound signature keys)
    pub resolver: federation::ActorResolver,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Load or generate the service key
    /// 3. Build federation clients and services
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = data::Database::connect(&config.database.path).await?;
        tracing::info!("Database connected");

        Self::with_database(config, Arc::new(db)).await
    }

    /// Build application state around an already connected database
    pub async fn with_database(
        config: config::AppConfig,
        db: Arc<data::Database>,
    ) -> Result<Self, error::AppError> {
        // 1. Service key
        let private_key = Arc::new(db.get_or_create_service_key().await?);
        let service_public_key_pem = RsaPublicKey::from(private_key.as_ref())
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| error::AppError::Internal(e.into()))?;

        // 2. HTTP client for federation
        let federation_config = &config.federation;
        let http_client = federation::http_client(federation_config)?;

        let urls = federation::ServiceUrls::new(&config.server.base_url());
        let resolver = federation::ActorResolver::new(
            http_client.clone(),
            federation_config.allow_private_networks,
        );
        let delivery = federation::ActivityDelivery::new(http_client, private_key);

        // 3. Services
        let notifier = Arc::new(federation::OutboundNotifier::new(
            db.clone(),
            resolver.clone(),
            delivery.clone(),
            urls.clone(),
            federation_config.delivery_timeout(),
            federation_config.max_concurrent_deliveries,
        ));
        let records = Arc::new(service::RecordService::new(
            db.clone(),
            notifier,
            config.content.gateway_url.clone(),
        ));
        let inbox = Arc::new(federation::InboxDispatcher::new(
            db.clone(),
            db.clone(),
            resolver.clone(),
            delivery,
            urls.clone(),
            config.server.domain.clone(),
            federation_config.delivery_timeout(),
        ));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            urls,
            service_public_key_pem: Arc::new(service_public_key_pem),
            records,
            inbox,
            resolver,
        })
    }
}

/// Maximum accepted request body (public keys, notes, activities)
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .merge(api::metrics_router())
        .merge(api::records_router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
