//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate database, token verification and federation.

mod record;

pub use record::{RecordService, validate_cid, validate_email, validate_name};
