//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations
//! - Record store contract
//! - Row models

mod database;
mod models;
mod records;

pub use database::{Database, SERVICE_KEY_SETTING};
pub use models::*;
pub use records::RecordStore;
