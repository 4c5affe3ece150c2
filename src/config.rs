//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub content: ContentConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain, optionally with port (e.g., "gravity.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the service
    ///
    /// # Returns
    /// Full URL like "https://gravity.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Federation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Upper bound for one inbox discovery plus one signed delivery
    pub delivery_timeout_seconds: u64,
    /// Maximum number of follower deliveries in flight per notification
    pub max_concurrent_deliveries: usize,
    /// Require a valid HTTP Signature on inbound activities
    pub verify_inbound_signatures: bool,
    /// Allow fetching actors and delivering to loopback/private addresses
    #[serde(default)]
    pub allow_private_networks: bool,
    /// User-Agent sent on outbound federation requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl FederationConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_seconds)
    }
}

fn default_user_agent() -> String {
    format!("Gravity/{}", env!("CARGO_PKG_VERSION"))
}

/// Content-addressed storage settings
#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    /// Public gateway prefix used when linking a cid in notes
    pub gateway_url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (GRAVITY__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost:8080")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/gravity.db")?
            .set_default("federation.delivery_timeout_seconds", 10)?
            .set_default("federation.max_concurrent_deliveries", 10)?
            .set_default("federation.verify_inbound_signatures", false)?
            .set_default("federation.allow_private_networks", false)?
            .set_default("content.gateway_url", "https://ipfs.io/ipfs/")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("GRAVITY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        if !self.server.protocol.eq_ignore_ascii_case("http")
            && !self.server.protocol.eq_ignore_ascii_case("https")
        {
            return Err(crate::error::AppError::Config(format!(
                "server.protocol must be http or https, got {}",
                self.server.protocol
            )));
        }

        if self.federation.delivery_timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "federation.delivery_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.federation.max_concurrent_deliveries == 0 {
            return Err(crate::error::AppError::Config(
                "federation.max_concurrent_deliveries must be greater than 0".to_string(),
            ));
        }

        if url::Url::parse(&self.server.base_url()).is_err() {
            return Err(crate::error::AppError::Config(format!(
                "server.domain does not form a valid URL: {}",
                self.server.domain
            )));
        }

        Ok(())
    }
}
